use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A non-enforcing, reviewable network policy.
///
/// Recommendations are written with `stagedAction: Learn`; promotion to an
/// enforcing action is a human decision made outside this controller.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "policyrecommender.io",
    version = "v1alpha1",
    kind = "StagedNetworkPolicy",
    plural = "stagednetworkpolicies",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct StagedNetworkPolicySpec {
    pub tier: String,
    pub staged_action: StagedAction,
    /// Selects the workloads the policy applies to.
    pub selector: String,
    /// The directions with rules present.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<PolicyType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress: Vec<PolicyRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub egress: Vec<PolicyRule>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum StagedAction {
    Learn,
    Set,
    Ignore,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum PolicyType {
    Ingress,
    Egress,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum RuleAction {
    #[default]
    Allow,
    Deny,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RuleMetadata>,
    #[serde(default, skip_serializing_if = "RuleEntity::is_empty")]
    pub source: RuleEntity,
    #[serde(default, skip_serializing_if = "RuleEntity::is_empty")]
    pub destination: RuleEntity,
}

/// One side of a rule. Fields are alternatives; the synthesizer populates at
/// most one peer field plus `ports`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<ServiceMatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PolicyPort>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMatch {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A single port number or a `"min:max"` range.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum PolicyPort {
    Number(u16),
    Range(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct RuleMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

// === impl RuleEntity ===

impl RuleEntity {
    pub fn is_empty(&self) -> bool {
        self.selector.is_none()
            && self.namespace_selector.is_none()
            && self.services.is_none()
            && self.nets.is_empty()
            && self.domains.is_empty()
            && self.ports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_serializes_camel_case_and_elides_empty_fields() {
        let spec = StagedNetworkPolicySpec {
            tier: "namespace-isolation".to_string(),
            staged_action: StagedAction::Learn,
            selector: "kubernetes.io/metadata.name == 'app1-ns'".to_string(),
            types: vec![PolicyType::Egress],
            ingress: vec![],
            egress: vec![PolicyRule {
                action: RuleAction::Allow,
                protocol: Some("TCP".to_string()),
                metadata: None,
                source: RuleEntity::default(),
                destination: RuleEntity {
                    namespace_selector: Some(
                        "kubernetes.io/metadata.name == 'nginx-ns'".to_string(),
                    ),
                    ports: vec![PolicyPort::Number(80)],
                    ..RuleEntity::default()
                },
            }],
        };

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["stagedAction"], "Learn");
        assert!(value.get("ingress").is_none());
        let rule = &value["egress"][0];
        assert!(rule.get("source").is_none());
        assert_eq!(rule["destination"]["ports"][0], 80);
        assert_eq!(
            rule["destination"]["namespaceSelector"],
            "kubernetes.io/metadata.name == 'nginx-ns'"
        );
    }

    #[test]
    fn port_ranges_serialize_as_strings() {
        let ports = vec![PolicyPort::Number(80), PolicyPort::Range("100:200".into())];
        assert_eq!(
            serde_json::to_value(&ports).unwrap(),
            serde_json::json!([80, "100:200"])
        );
    }
}
