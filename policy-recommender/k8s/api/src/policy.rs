pub mod scope;
pub mod staged;

pub use self::scope::{PolicyRecommendationScope, PolicyRecommendationScopeSpec};
pub use self::staged::{
    PolicyPort, PolicyRule, PolicyType, RuleAction, RuleEntity, RuleMetadata, ServiceMatch,
    StagedAction, StagedNetworkPolicy, StagedNetworkPolicySpec,
};

pub const API_GROUP: &str = "policyrecommender.io";
pub const API_VERSION: &str = "policyrecommender.io/v1alpha1";

/// Name of the singleton scope resource. Instances under any other name are
/// ignored.
pub const SCOPE_RESOURCE_NAME: &str = "default";

pub const SCOPE_KIND: &str = "PolicyRecommendationScope";

/// Labels stamped on generated policies.
pub const LABEL_SCOPE: &str = "policyrecommender.io/scope";
pub const LABEL_TIER: &str = "policyrecommender.io/tier";
pub const LABEL_OWNER_KIND: &str = "policyrecommender.io/owner-kind";
pub const LABEL_STAGED_ACTION: &str = "policyrecommender.io/staged-action";

/// Annotations carrying recommendation state on generated policies.
pub const ANNOTATION_STATUS: &str = "policyrecommender.io/status";
pub const ANNOTATION_LAST_UPDATED: &str = "policyrecommender.io/last-updated";
pub const ANNOTATION_PROMOTED_AT: &str = "policyrecommender.io/promoted-at";

/// Per-rule metadata annotations.
pub const RULE_ANNOTATION_SCOPE: &str = "policyrecommender.io/scope";
pub const RULE_ANNOTATION_LAST_UPDATED: &str = "policyrecommender.io/last-updated";
pub const RULE_ANNOTATION_WARNINGS: &str = "policyrecommender.io/warnings";

/// Labels used in rendered selector expressions.
pub const NAME_LABEL: &str = "policyrecommender.io/name";
pub const KIND_LABEL: &str = "policyrecommender.io/kind";

/// The well-known label every namespace carries with its own name.
pub const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";
