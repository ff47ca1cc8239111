use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use policy_recommender_k8s_api::{self as k8s, Labels, ResourceExt};
use std::sync::Arc;
use tokio::sync::watch;

pub type SharedIndex = Arc<RwLock<Index>>;

/// A point-in-time view of the cluster's namespaces and their labels.
pub type Snapshot = Arc<HashMap<String, Labels>>;

/// Tracks cluster namespaces and publishes label snapshots to the engine.
pub struct Index {
    namespaces: HashMap<String, Labels>,
    tx: watch::Sender<Snapshot>,
}

// === impl Index ===

impl Index {
    pub fn shared() -> (SharedIndex, watch::Receiver<Snapshot>) {
        let (tx, rx) = watch::channel(Snapshot::default());
        let index = Arc::new(RwLock::new(Self {
            namespaces: HashMap::new(),
            tx,
        }));
        (index, rx)
    }

    fn publish(&self) {
        // The receiver may be gone while the engine is disabled.
        let _ = self.tx.send(Arc::new(self.namespaces.clone()));
    }
}

impl kubert::index::IndexClusterResource<k8s::Namespace> for Index {
    fn apply(&mut self, resource: k8s::Namespace) {
        let name = resource.name_unchecked();
        let labels = Labels::from(resource.metadata.labels);
        if self.namespaces.get(&name).map(|current| current == &labels) == Some(true) {
            return;
        }
        tracing::debug!(namespace = %name, "Indexing namespace");
        self.namespaces.insert(name, labels);
        self.publish();
    }

    fn delete(&mut self, name: String) {
        if self.namespaces.remove(&name).is_some() {
            tracing::debug!(namespace = %name, "Forgetting namespace");
            self.publish();
        }
    }

    // Resets reuse apply/delete; there is no cross-resource state to rebuild.
}
