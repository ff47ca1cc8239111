//! The reconciling write-through store for generated policies.
//!
//! The engine submits desired-state objects through a cloneable [`Writer`];
//! a single [`Controller`] task owns the API client and converges the live
//! objects using server-side apply, so conflicting writers are overridden
//! rather than retried. Transient failures are logged and healed by the next
//! tick's submission.

use crate::resource_id::ResourceId;
use ahash::AHashMap as HashMap;
use anyhow::Result;
use chrono::{DateTime, Utc};
use policy_recommender_k8s_api::{
    self as k8s,
    policy::{self, StagedNetworkPolicy},
    ResourceExt,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Field manager identifying this controller's writes to the API server.
pub const FIELD_MANAGER: &str = "policyrecommender.io/recommendation-engine";

#[derive(Debug)]
pub(crate) enum Op {
    Apply(Box<StagedNetworkPolicy>),
    Delete(ResourceId),
}

/// Handle the engine's namespace tasks submit desired state to.
#[derive(Clone)]
pub struct Writer {
    tx: UnboundedSender<Op>,
}

/// Converges live API objects to the submitted desired state.
pub struct Controller {
    client: k8s::Client,
    rx: UnboundedReceiver<Op>,
}

pub fn channel(client: k8s::Client) -> (Writer, Controller) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Writer { tx }, Controller { client, rx })
}

// === impl Writer ===

impl Writer {
    pub fn submit(&self, policy: StagedNetworkPolicy) {
        if self.tx.send(Op::Apply(Box::new(policy))).is_err() {
            tracing::error!("Recommendation cache controller is gone");
        }
    }

    pub fn delete(&self, namespace: String, name: String) {
        if self
            .tx
            .send(Op::Delete(ResourceId::new(namespace, name)))
            .is_err()
        {
            tracing::error!("Recommendation cache controller is gone");
        }
    }
}

// === impl Controller ===

impl Controller {
    /// Processes submissions until every `Writer` has been dropped.
    pub async fn run(mut self) {
        let params = k8s::PatchParams::apply(FIELD_MANAGER).force();

        while let Some(op) = self.rx.recv().await {
            match op {
                Op::Apply(policy) => {
                    let namespace = policy.namespace().unwrap_or_default();
                    let name = policy.name_unchecked();
                    let api =
                        k8s::Api::<StagedNetworkPolicy>::namespaced(self.client.clone(), &namespace);
                    if let Err(error) = api.patch(&name, &params, &k8s::Patch::Apply(&*policy)).await
                    {
                        tracing::error!(%namespace, %name, %error, "Failed to apply recommendation");
                    }
                }
                Op::Delete(id) => {
                    let api =
                        k8s::Api::<StagedNetworkPolicy>::namespaced(self.client.clone(), &id.namespace);
                    match api.delete(&id.name, &Default::default()).await {
                        Ok(_) => {}
                        Err(kube::Error::Api(response)) if response.code == 404 => {}
                        Err(error) => {
                            tracing::error!(id = %id, %error, "Failed to delete recommendation");
                        }
                    }
                }
            }
        }
    }
}

/// State recovered from a persisted recommendation at startup.
#[derive(Clone, Debug)]
pub struct Seed {
    pub name: String,
    pub promoted_at: Option<DateTime<Utc>>,
}

/// Lists recommendations previously written by this controller so the engine
/// can resume identities (and promotion state) after a restart. Rule history
/// is not recovered; every namespace restarts its episode in Learning.
pub async fn existing(client: &k8s::Client, tier: &str) -> Result<HashMap<String, Seed>> {
    let api = k8s::Api::<StagedNetworkPolicy>::all(client.clone());
    let selector = format!(
        "{}={},{}={}",
        policy::LABEL_OWNER_KIND,
        policy::SCOPE_KIND,
        policy::LABEL_TIER,
        tier
    );
    let params = k8s::ListParams::default().labels(&selector);

    let mut seeds = HashMap::new();
    for item in api.list(&params).await?.items {
        let Some(namespace) = item.namespace() else {
            continue;
        };
        let promoted_at = item
            .annotations()
            .get(policy::ANNOTATION_PROMOTED_AT)
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|at| at.with_timezone(&Utc));
        seeds.insert(
            namespace,
            Seed {
                name: item.name_unchecked(),
                promoted_at,
            },
        );
    }
    Ok(seeds)
}

#[cfg(test)]
pub(crate) fn test_channel() -> (Writer, UnboundedReceiver<Op>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Writer { tx }, rx)
}
