use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use policy_recommender_core::{synthesize::ServiceLookup, Protocol};
use policy_recommender_k8s_api::{self as k8s, ResourceExt};
use std::{collections::BTreeSet, sync::Arc};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Declared Service ports, grouped by namespace.
///
/// Backs the synthesizer's cross-check of namespace-scoped rules against
/// what the peer namespace's services actually expose.
#[derive(Default)]
pub struct Index {
    by_ns: HashMap<String, HashMap<String, BTreeSet<(Protocol, u16)>>>,
}

// === impl Index ===

impl Index {
    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::default()))
    }
}

impl ServiceLookup for Index {
    fn declared_ports(&self, namespace: &str) -> BTreeSet<(Protocol, u16)> {
        self.by_ns
            .get(namespace)
            .map(|services| services.values().flatten().copied().collect())
            .unwrap_or_default()
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Service> for Index {
    fn apply(&mut self, service: k8s::Service) {
        let namespace = service.namespace().expect("Service must have a namespace");
        let name = service.name_unchecked();

        let mut ports = BTreeSet::new();
        for port in service
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref())
            .into_iter()
            .flatten()
        {
            let protocol = match port.protocol.as_deref() {
                None | Some("TCP") => Protocol::Tcp,
                Some("UDP") => Protocol::Udp,
                Some("SCTP") => Protocol::Sctp,
                Some(protocol) => {
                    tracing::debug!(%namespace, service = %name, %protocol, "Ignoring service port with unsupported protocol");
                    continue;
                }
            };
            match u16::try_from(port.port) {
                Ok(number) if number != 0 => {
                    ports.insert((protocol, number));
                }
                _ => {
                    tracing::debug!(%namespace, service = %name, port = port.port, "Ignoring out-of-range service port");
                }
            }
        }

        self.by_ns.entry(namespace).or_default().insert(name, ports);
    }

    fn delete(&mut self, namespace: String, name: String) {
        if let Some(services) = self.by_ns.get_mut(&namespace) {
            services.remove(&name);
            if services.is_empty() {
                self.by_ns.remove(&namespace);
            }
        }
    }

    // Since apply reindexes a single Service at a time, there's no need to
    // handle resets specially.
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use kubert::index::IndexNamespacedResource;

    fn service(namespace: &str, name: &str, ports: &[(Option<&str>, i32)]) -> k8s::Service {
        k8s::Service {
            metadata: k8s::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(
                    ports
                        .iter()
                        .map(|(protocol, port)| ServicePort {
                            protocol: protocol.map(Into::into),
                            port: *port,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn aggregates_ports_across_services() {
        let mut index = Index::default();
        index.apply(service("nginx-ns", "nginx", &[(None, 80), (Some("TCP"), 443)]));
        index.apply(service("nginx-ns", "dns", &[(Some("UDP"), 53)]));

        assert_eq!(
            index.declared_ports("nginx-ns"),
            [
                (Protocol::Tcp, 80),
                (Protocol::Tcp, 443),
                (Protocol::Udp, 53)
            ]
            .into_iter()
            .collect()
        );
        assert!(index.declared_ports("other-ns").is_empty());

        index.delete("nginx-ns".to_string(), "nginx".to_string());
        assert_eq!(
            index.declared_ports("nginx-ns"),
            [(Protocol::Udp, 53)].into_iter().collect()
        );
    }

    #[test]
    fn ignores_invalid_ports() {
        let mut index = Index::default();
        index.apply(service("ns", "svc", &[(Some("ICMP"), 1), (None, 0), (None, 70000)]));
        assert!(index.declared_ports("ns").is_empty());
    }
}
