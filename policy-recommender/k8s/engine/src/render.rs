//! Renders a recommendation's in-memory state into the persisted policy
//! object shape.

use crate::engine::EngineSettings;
use crate::recommendation::Recommendation;
use chrono::{DateTime, SecondsFormat, Utc};
use policy_recommender_core::{Direction, PeerScope, Rule};
use policy_recommender_k8s_api::{policy, ObjectMeta, OwnerReference};
use std::collections::BTreeMap;

pub(crate) fn staged_network_policy(
    rec: &Recommendation,
    settings: &EngineSettings,
) -> policy::StagedNetworkPolicy {
    let labels = [
        (policy::LABEL_SCOPE, "namespace"),
        (policy::LABEL_TIER, settings.tier.as_str()),
        (policy::LABEL_OWNER_KIND, policy::SCOPE_KIND),
        (policy::LABEL_STAGED_ACTION, "Learn"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect::<BTreeMap<_, _>>();

    let mut annotations = BTreeMap::new();
    annotations.insert(policy::ANNOTATION_STATUS.to_string(), rec.status.to_string());
    annotations.insert(
        policy::ANNOTATION_LAST_UPDATED.to_string(),
        rfc3339(rec.last_changed_at),
    );
    if let Some(at) = rec.promoted_at() {
        annotations.insert(policy::ANNOTATION_PROMOTED_AT.to_string(), rfc3339(at));
    }

    let ingress: Vec<_> = rec.rules.ingress().map(policy_rule).collect();
    let egress: Vec<_> = rec.rules.egress().map(policy_rule).collect();
    let mut types = Vec::new();
    if !ingress.is_empty() {
        types.push(policy::PolicyType::Ingress);
    }
    if !egress.is_empty() {
        types.push(policy::PolicyType::Egress);
    }

    policy::StagedNetworkPolicy {
        metadata: ObjectMeta {
            name: Some(rec.name.clone()),
            namespace: Some(rec.namespace.clone()),
            labels: Some(labels),
            annotations: Some(annotations),
            owner_references: Some(vec![OwnerReference {
                api_version: policy::API_VERSION.to_string(),
                kind: policy::SCOPE_KIND.to_string(),
                name: settings.owner_name.clone(),
                uid: settings.owner_uid.clone(),
                controller: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        },
        spec: policy::StagedNetworkPolicySpec {
            tier: settings.tier.clone(),
            staged_action: policy::StagedAction::Learn,
            selector: name_selector(policy::NAMESPACE_NAME_LABEL, &rec.namespace),
            types,
            ingress,
            egress,
        },
    }
}

fn policy_rule(rule: &Rule) -> policy::PolicyRule {
    let mut peer = policy::RuleEntity::default();
    match &rule.peer {
        PeerScope::Domains(domains) => {
            peer.domains = domains.iter().cloned().collect();
        }
        PeerScope::Namespace(namespace) => {
            peer.namespace_selector =
                Some(name_selector(policy::NAMESPACE_NAME_LABEL, namespace));
        }
        PeerScope::Service { name, namespace } => {
            peer.services = Some(policy::ServiceMatch {
                name: name.clone(),
                namespace: Some(namespace.clone()),
            });
        }
        PeerScope::NetworkSet { name, namespace } => {
            peer.selector = Some(format!(
                "{} == '{}' && {} == 'NetworkSet'",
                policy::NAME_LABEL,
                name,
                policy::KIND_LABEL
            ));
            peer.namespace_selector = Some(match namespace {
                Some(namespace) => name_selector(policy::NAMESPACE_NAME_LABEL, namespace),
                None => "global()".to_string(),
            });
        }
        PeerScope::Private(nets) => {
            peer.nets = nets.iter().map(|net| net.to_string()).collect();
        }
    }

    let ports: Vec<policy::PolicyPort> = rule
        .ports
        .iter()
        .map(|range| {
            if range.min == range.max {
                policy::PolicyPort::Number(range.min)
            } else {
                policy::PolicyPort::Range(range.to_string())
            }
        })
        .collect();

    // Ports always describe the destination side; the peer lands on whichever
    // side is remote for the rule's direction.
    let (source, destination) = match rule.direction {
        Direction::Egress => {
            let mut destination = peer;
            destination.ports = ports;
            (policy::RuleEntity::default(), destination)
        }
        Direction::Ingress => (
            peer,
            policy::RuleEntity {
                ports,
                ..Default::default()
            },
        ),
    };

    let mut annotations = BTreeMap::new();
    annotations.insert(
        policy::RULE_ANNOTATION_SCOPE.to_string(),
        rule.peer.tag().to_string(),
    );
    annotations.insert(
        policy::RULE_ANNOTATION_LAST_UPDATED.to_string(),
        rfc3339(rule.last_updated),
    );
    if !rule.warnings.is_empty() {
        let warnings = rule
            .warnings
            .iter()
            .map(|warning| warning.to_string())
            .collect::<Vec<_>>()
            .join(",");
        annotations.insert(policy::RULE_ANNOTATION_WARNINGS.to_string(), warnings);
    }

    policy::PolicyRule {
        action: policy::RuleAction::Allow,
        protocol: Some(rule.protocol.to_string()),
        metadata: Some(policy::RuleMetadata { annotations }),
        source,
        destination,
    }
}

fn name_selector(label: &str, value: &str) -> String {
    format!("{label} == '{value}'")
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
