//! Turns one namespace's observed flows into a peer-scoped rule set.
//!
//! Classification precedence per flow peer: Service, then NetworkSet (or
//! global network set), then in-cluster namespace, then resolved domains,
//! then private address space. Flows matching none of these are dropped;
//! they are not actionable as a peer-scoped rule.

use crate::flows::{Endpoint, EndpointKind, FlowRecord, Protocol};
use crate::rules::{Direction, PeerScope, PortRange, Rule, RuleSet, Warning};
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

/// Declared service ports, by namespace. Backed by the Service index in the
/// controller; tests provide maps directly.
pub trait ServiceLookup {
    /// The set of (protocol, port) pairs exposed by Services in `namespace`.
    fn declared_ports(&self, namespace: &str) -> BTreeSet<(Protocol, u16)>;
}

impl ServiceLookup for BTreeMap<String, BTreeSet<(Protocol, u16)>> {
    fn declared_ports(&self, namespace: &str) -> BTreeSet<(Protocol, u16)> {
        self.get(namespace).cloned().unwrap_or_default()
    }
}

/// Derives `namespace`'s rule set from `flows`.
///
/// Pure and deterministic: the same flow set yields the same rule set
/// regardless of record order. Unclassifiable or malformed records are
/// skipped, never the whole pass.
pub fn synthesize(
    namespace: &str,
    flows: &[FlowRecord],
    now: DateTime<Utc>,
    services: &dyn ServiceLookup,
) -> RuleSet {
    let mut rules = RuleSet::default();

    for flow in flows {
        for (direction, peer) in orientations(namespace, flow) {
            let Some(peer) = classify(direction, peer, &flow.domains) else {
                tracing::debug!(
                    %namespace,
                    ?direction,
                    peer.name = %peer.name,
                    "Dropping flow with unclassifiable peer"
                );
                continue;
            };

            let mut ports = BTreeSet::new();
            if flow.protocol.has_ports() {
                match flow.dest_port {
                    Some(port) if port != 0 => {
                        ports.insert(PortRange::single(port));
                    }
                    _ => {
                        tracing::debug!(
                            %namespace,
                            protocol = %flow.protocol,
                            "Skipping flow without a destination port"
                        );
                        continue;
                    }
                }
            }

            rules.upsert(
                Rule {
                    direction,
                    protocol: flow.protocol,
                    peer,
                    ports,
                    last_updated: now,
                    warnings: BTreeSet::new(),
                },
                now,
            );
        }
    }

    apply_service_warnings(&mut rules, services);
    rules.sort();
    rules
}

/// Which directions a flow contributes to, with the peer endpoint for each.
/// Intra-namespace traffic contributes both an egress and an ingress rule.
fn orientations<'f>(namespace: &str, flow: &'f FlowRecord) -> Vec<(Direction, &'f Endpoint)> {
    let mut out = Vec::with_capacity(2);
    if flow.source.namespace.as_deref() == Some(namespace) {
        out.push((Direction::Egress, &flow.dest));
    }
    if flow.dest.namespace.as_deref() == Some(namespace) {
        out.push((Direction::Ingress, &flow.source));
    }
    out
}

fn classify(direction: Direction, peer: &Endpoint, domains: &[String]) -> Option<PeerScope> {
    match peer.kind {
        EndpointKind::Service => {
            let namespace = peer.namespace.clone()?;
            if peer.name.is_empty() {
                return None;
            }
            Some(PeerScope::Service {
                name: peer.name.clone(),
                namespace,
            })
        }
        EndpointKind::NetworkSet => {
            if peer.name.is_empty() {
                return None;
            }
            Some(PeerScope::NetworkSet {
                name: peer.name.clone(),
                namespace: peer.namespace.clone(),
            })
        }
        EndpointKind::GlobalNetworkSet => {
            if peer.name.is_empty() {
                return None;
            }
            Some(PeerScope::NetworkSet {
                name: peer.name.clone(),
                namespace: None,
            })
        }
        EndpointKind::Pod => peer.namespace.clone().map(PeerScope::Namespace),
        EndpointKind::External => {
            // Domain rules are only expressible for egress traffic.
            if direction == Direction::Egress && !domains.is_empty() {
                return Some(PeerScope::Domains(domains.iter().cloned().collect()));
            }
            let block = private_block(peer.ip?)?;
            Some(PeerScope::Private([block].into_iter().collect()))
        }
    }
}

/// The RFC 1918 block containing `ip`, if any.
fn private_block(ip: IpAddr) -> Option<IpNet> {
    let IpAddr::V4(v4) = ip else {
        return None;
    };
    let octets = v4.octets();
    let block = if octets[0] == 10 {
        "10.0.0.0/8"
    } else if octets[0] == 172 && (16..32).contains(&octets[1]) {
        "172.16.0.0/12"
    } else if octets[0] == 192 && octets[1] == 168 {
        "192.168.0.0/16"
    } else {
        return None;
    };
    Some(block.parse().expect("RFC 1918 literals parse"))
}

/// Flags namespace-scoped rules whose aggregated ports exceed what the peer
/// namespace's services declare, signalling that the namespace-wide rule is
/// broader than strictly necessary.
fn apply_service_warnings(rules: &mut RuleSet, services: &dyn ServiceLookup) {
    for rule in rules.iter_mut() {
        let PeerScope::Namespace(peer_ns) = &rule.peer else {
            continue;
        };
        let declared = services.declared_ports(peer_ns);
        if declared.is_empty() {
            continue;
        }
        let undeclared = rule
            .ports
            .iter()
            .any(|range| (range.min..=range.max).any(|p| !declared.contains(&(rule.protocol, p))));
        if undeclared {
            rule.warnings.insert(Warning::NonServicePortsAndProtocol);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::FlowAction;
    use chrono::TimeZone;
    use maplit::btreemap;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn pod(namespace: &str, name: &str) -> Endpoint {
        Endpoint {
            kind: EndpointKind::Pod,
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
            ip: None,
        }
    }

    fn external(ip: &str) -> Endpoint {
        Endpoint {
            kind: EndpointKind::External,
            name: String::new(),
            namespace: None,
            ip: Some(ip.parse().unwrap()),
        }
    }

    fn tcp_flow(source: Endpoint, dest: Endpoint, port: u16) -> FlowRecord {
        FlowRecord {
            source,
            dest,
            protocol: Protocol::Tcp,
            dest_port: Some(port),
            domains: vec![],
            action: FlowAction::Allow,
        }
    }

    fn no_services() -> BTreeMap<String, BTreeSet<(Protocol, u16)>> {
        BTreeMap::new()
    }

    #[test]
    fn pod_to_pod_yields_symmetric_rules() {
        let flow = tcp_flow(pod("app1-ns", "app1"), pod("nginx-ns", "nginx"), 80);

        let egress = synthesize("app1-ns", &[flow.clone()], now(), &no_services());
        assert_eq!(egress.len(), 1);
        let rule = egress.iter().next().unwrap();
        assert_eq!(rule.direction, Direction::Egress);
        assert_eq!(rule.protocol, Protocol::Tcp);
        assert_eq!(rule.peer, PeerScope::Namespace("nginx-ns".to_string()));
        assert_eq!(rule.ports, [PortRange::single(80)].into_iter().collect());

        let ingress = synthesize("nginx-ns", &[flow], now(), &no_services());
        assert_eq!(ingress.len(), 1);
        let rule = ingress.iter().next().unwrap();
        assert_eq!(rule.direction, Direction::Ingress);
        assert_eq!(rule.peer, PeerScope::Namespace("app1-ns".to_string()));
    }

    #[test]
    fn domain_flows_merge_per_protocol() {
        let mut to_google = tcp_flow(pod("app1-ns", "app1"), external("142.250.65.68"), 80);
        to_google.domains = vec!["www.google.com".to_string()];
        let mut on_81 = tcp_flow(pod("app1-ns", "app1"), external("142.250.65.68"), 81);
        on_81.domains = vec!["www.google.com".to_string()];

        let rules = synthesize("app1-ns", &[to_google, on_81], now(), &no_services());
        assert_eq!(rules.len(), 1);
        let rule = rules.iter().next().unwrap();
        assert_eq!(
            rule.peer,
            PeerScope::Domains(["www.google.com".to_string()].into_iter().collect())
        );
        assert_eq!(
            rule.ports,
            [PortRange::single(80), PortRange::single(81)]
                .into_iter()
                .collect()
        );
    }

    #[test]
    fn udp_and_tcp_domain_flows_stay_separate() {
        let mut tcp = tcp_flow(pod("app1-ns", "app1"), external("142.250.65.68"), 80);
        tcp.domains = vec!["www.google.com".to_string()];
        let mut udp = tcp.clone();
        udp.protocol = Protocol::Udp;
        udp.dest_port = Some(53);

        let rules = synthesize("app1-ns", &[tcp, udp], now(), &no_services());
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn service_kind_takes_precedence_over_namespace() {
        let svc = Endpoint {
            kind: EndpointKind::Service,
            name: "nginx".to_string(),
            namespace: Some("nginx-ns".to_string()),
            ip: None,
        };
        let rules = synthesize(
            "app1-ns",
            &[tcp_flow(pod("app1-ns", "app1"), svc, 80)],
            now(),
            &no_services(),
        );
        assert_eq!(rules.len(), 1);
        assert_eq!(
            rules.iter().next().unwrap().peer,
            PeerScope::Service {
                name: "nginx".to_string(),
                namespace: "nginx-ns".to_string(),
            }
        );
    }

    #[test]
    fn public_address_without_domain_is_dropped() {
        let rules = synthesize(
            "app1-ns",
            &[tcp_flow(pod("app1-ns", "app1"), external("93.184.216.34"), 443)],
            now(),
            &no_services(),
        );
        assert!(rules.is_empty());
    }

    #[test]
    fn private_address_falls_back_to_rfc1918_block() {
        let rules = synthesize(
            "app1-ns",
            &[tcp_flow(pod("app1-ns", "app1"), external("192.168.12.7"), 5432)],
            now(),
            &no_services(),
        );
        assert_eq!(rules.len(), 1);
        assert_eq!(
            rules.iter().next().unwrap().peer,
            PeerScope::Private(["192.168.0.0/16".parse().unwrap()].into_iter().collect())
        );
    }

    #[test]
    fn flow_without_port_is_skipped() {
        let mut flow = tcp_flow(pod("app1-ns", "app1"), pod("nginx-ns", "nginx"), 80);
        flow.dest_port = None;
        let rules = synthesize("app1-ns", &[flow], now(), &no_services());
        assert!(rules.is_empty());
    }

    #[test]
    fn namespace_rule_is_flagged_for_non_service_ports() {
        let services = btreemap! {
            "nginx-ns".to_string() => [(Protocol::Tcp, 80)].into_iter().collect::<BTreeSet<_>>(),
        };
        let on_service_port = tcp_flow(pod("app1-ns", "app1"), pod("nginx-ns", "nginx"), 80);
        let off_service_port = tcp_flow(pod("app1-ns", "app1"), pod("nginx-ns", "nginx"), 9090);

        let rules = synthesize("app1-ns", &[on_service_port.clone()], now(), &services);
        assert!(rules.iter().next().unwrap().warnings.is_empty());

        let rules = synthesize(
            "app1-ns",
            &[on_service_port, off_service_port],
            now(),
            &services,
        );
        assert_eq!(
            rules.iter().next().unwrap().warnings,
            [Warning::NonServicePortsAndProtocol].into_iter().collect()
        );
    }

    #[test]
    fn synthesis_is_order_independent() {
        let flows = vec![
            tcp_flow(pod("app1-ns", "app1"), pod("nginx-ns", "nginx"), 80),
            tcp_flow(pod("app1-ns", "app1"), pod("db-ns", "postgres"), 5432),
            tcp_flow(pod("app1-ns", "app1"), external("10.2.3.4"), 9000),
        ];
        let forward = synthesize("app1-ns", &flows, now(), &no_services());
        let reversed: Vec<_> = flows.into_iter().rev().collect();
        let backward = synthesize("app1-ns", &reversed, now(), &no_services());
        assert_eq!(forward, backward);
    }
}
