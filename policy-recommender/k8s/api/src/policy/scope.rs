use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster-wide switch and tuning for the recommendation engine.
///
/// A single instance named `default` controls the engine. Deleting it is
/// equivalent to setting `enabled: false`; generated policies are left in
/// place for administrative cleanup.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "policyrecommender.io",
    version = "v1alpha1",
    kind = "PolicyRecommendationScope",
    plural = "policyrecommendationscopes"
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRecommendationScopeSpec {
    /// Whether the engine runs at all.
    pub enabled: bool,

    /// Label expression restricting which namespaces participate. Absent or
    /// `all()` matches every namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<String>,

    /// How often each namespace is re-evaluated. Go duration string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,

    /// How far back the very first query for a namespace reaches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_lookback: Option<String>,

    /// Minimum time a rule set must remain unchanged before its
    /// recommendation is promoted to Stable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stabilization_period: Option<String>,

    /// Tier generated policies are placed in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}
