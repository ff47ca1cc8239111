//! The singleton-scope reconciler.
//!
//! Driven by the cluster watch on the scope resource; the shared lock around
//! this index serializes reconciliation, so enable/disable/update sequences
//! are never observed out of order.

use crate::cache;
use crate::engine::{Engine, EngineSettings};
use parking_lot::RwLock;
use policy_recommender_core::FlowQuery;
use policy_recommender_k8s_api::{
    self as k8s,
    policy::{self, PolicyRecommendationScope},
    ResourceExt,
};
use policy_recommender_k8s_index::{namespace, service};
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, watch};
use tracing::{info_span, Instrument};

pub type SharedReconciler = Arc<RwLock<Reconciler>>;

/// Turns the singleton scope resource into a running or stopped engine.
pub struct Reconciler {
    client: k8s::Client,
    flows: Arc<dyn FlowQuery>,
    services: service::SharedIndex,
    namespaces: watch::Receiver<namespace::Snapshot>,
    min_poll_interval: Duration,
    /// Constructed lazily on the first enable and shared across
    /// enable/disable cycles.
    cache: Option<cache::Writer>,
    running: Option<Running>,
}

struct Running {
    updates: mpsc::UnboundedSender<EngineSettings>,
    stop: drain::Signal,
    settings: EngineSettings,
}

// === impl Reconciler ===

impl Reconciler {
    pub fn shared(
        client: k8s::Client,
        flows: Arc<dyn FlowQuery>,
        services: service::SharedIndex,
        namespaces: watch::Receiver<namespace::Snapshot>,
        min_poll_interval: Duration,
    ) -> SharedReconciler {
        Arc::new(RwLock::new(Self {
            client,
            flows,
            services,
            namespaces,
            min_poll_interval,
            cache: None,
            running: None,
        }))
    }

    fn reconcile(&mut self, scope: Option<PolicyRecommendationScope>) {
        let desired = scope.filter(|scope| scope.spec.enabled);
        match desired {
            None => self.stop(),
            Some(scope) => match EngineSettings::from_scope(&scope, self.min_poll_interval) {
                // A malformed configuration leaves the last-known-good state
                // in place rather than stalling the watch.
                Err(error) => tracing::warn!(%error, "Ignoring invalid scope configuration"),
                Ok(settings) => self.update(settings),
            },
        }
    }

    fn update(&mut self, settings: EngineSettings) {
        // A tier change renames every generated policy; rebuild from scratch
        // rather than updating in place.
        let restart = match &self.running {
            None => true,
            Some(running) => running.settings.tier != settings.tier,
        };
        if restart {
            self.stop();
            self.start(settings);
            return;
        }

        let Some(running) = self.running.as_mut() else {
            return;
        };
        if running.settings == settings {
            return;
        }
        tracing::info!("Forwarding updated scope configuration to the engine");
        if running.updates.send(settings.clone()).is_ok() {
            running.settings = settings;
            return;
        }
        tracing::error!("Recommendation engine is gone; restarting");
        self.stop();
        self.start(settings);
    }

    fn start(&mut self, settings: EngineSettings) {
        tracing::info!(tier = %settings.tier, "Starting recommendation engine");

        let writer = self.cache_writer();
        let (stop, stopped) = drain::channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        let client = self.client.clone();
        let flows = self.flows.clone();
        let services = self.services.clone();
        let namespaces = self.namespaces.clone();
        let engine_settings = settings.clone();
        tokio::spawn(
            async move {
                // Resume identities from policies written by a previous run.
                let seeds = match cache::existing(&client, &engine_settings.tier).await {
                    Ok(seeds) => seeds,
                    Err(error) => {
                        tracing::warn!(%error, "Failed to list existing recommendations; starting fresh");
                        Default::default()
                    }
                };
                Engine::new(
                    engine_settings,
                    flows,
                    writer,
                    services,
                    namespaces,
                    updates_rx,
                    seeds,
                )
                .run(stopped)
                .await;
            }
            .instrument(info_span!("recommendation_engine")),
        );

        self.running = Some(Running {
            updates: updates_tx,
            stop,
            settings,
        });
    }

    /// The shared write-through cache, constructed on first use.
    fn cache_writer(&mut self) -> cache::Writer {
        if let Some(writer) = &self.cache {
            return writer.clone();
        }
        let (writer, controller) = cache::channel(self.client.clone());
        tokio::spawn(controller.run().instrument(info_span!("recommendation_cache")));
        self.cache = Some(writer.clone());
        writer
    }

    /// Stops the running engine, if any. A later enable constructs a fresh
    /// engine; no stabilization progress is preserved across the cycle.
    fn stop(&mut self) {
        if let Some(Running { stop, .. }) = self.running.take() {
            tracing::info!("Stopping recommendation engine");
            tokio::spawn(stop.drain());
        }
    }
}

impl kubert::index::IndexClusterResource<PolicyRecommendationScope> for Reconciler {
    fn apply(&mut self, scope: PolicyRecommendationScope) {
        let name = scope.name_unchecked();
        if name != policy::SCOPE_RESOURCE_NAME {
            tracing::debug!(%name, "Ignoring non-singleton scope resource");
            return;
        }
        self.reconcile(Some(scope));
    }

    fn delete(&mut self, name: String) {
        if name == policy::SCOPE_RESOURCE_NAME {
            self.reconcile(None);
        }
    }
}
