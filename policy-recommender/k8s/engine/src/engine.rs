use crate::cache::{self, Writer};
use crate::recommendation::{Recommendation, Transition};
use crate::render;
use ahash::AHashMap as HashMap;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use policy_recommender_core::{synthesize::synthesize, FlowQuery, TimeRange};
use policy_recommender_k8s_api::{duration::ConfigDuration, labels::Selector, policy};
use policy_recommender_k8s_index::{namespace::Snapshot, service};
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{info_span, Instrument};

/// Effective engine configuration derived from the scope resource.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    pub poll_interval: Duration,
    pub initial_lookback: Duration,
    pub stabilization_period: Duration,
    pub selector: Selector,
    pub tier: String,
    pub owner_name: String,
    pub owner_uid: String,
}

// === impl EngineSettings ===

impl EngineSettings {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(150);
    pub const DEFAULT_INITIAL_LOOKBACK: Duration = Duration::from_secs(24 * 60 * 60);
    pub const DEFAULT_STABILIZATION_PERIOD: Duration = Duration::from_secs(10 * 60);
    pub const DEFAULT_TIER: &'static str = "namespace-isolation";

    /// Derives settings from the scope resource, clamping the poll interval
    /// to the configured floor. Fails on malformed durations or selectors so
    /// the reconciler can keep its last-known-good configuration.
    pub fn from_scope(
        scope: &policy::PolicyRecommendationScope,
        min_poll_interval: Duration,
    ) -> Result<Self> {
        use policy_recommender_k8s_api::ResourceExt;

        let spec = &scope.spec;
        let poll_interval =
            parse_duration(spec.poll_interval.as_deref(), Self::DEFAULT_POLL_INTERVAL)
                .context("pollInterval")?;
        if poll_interval.is_zero() {
            bail!("pollInterval must be positive");
        }
        let initial_lookback = parse_duration(
            spec.initial_lookback.as_deref(),
            Self::DEFAULT_INITIAL_LOOKBACK,
        )
        .context("initialLookback")?;
        let stabilization_period = parse_duration(
            spec.stabilization_period.as_deref(),
            Self::DEFAULT_STABILIZATION_PERIOD,
        )
        .context("stabilizationPeriod")?;
        let selector = spec
            .namespace_selector
            .as_deref()
            .unwrap_or_default()
            .parse::<Selector>()
            .context("namespaceSelector")?;

        Ok(Self {
            poll_interval: poll_interval.max(min_poll_interval),
            initial_lookback,
            stabilization_period,
            selector,
            tier: spec
                .tier
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_TIER.to_string()),
            owner_name: scope.name_unchecked(),
            owner_uid: scope.metadata.uid.clone().unwrap_or_default(),
        })
    }
}

fn parse_duration(value: Option<&str>, default: Duration) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(value) => Ok(value.parse::<ConfigDuration>()?.into()),
    }
}

/// Runs one recommendation task per tracked namespace and keeps the set of
/// tasks in sync with the namespace snapshot and the configured selector.
pub struct Engine {
    flows: Arc<dyn FlowQuery>,
    cache: Writer,
    services: service::SharedIndex,
    settings: watch::Sender<EngineSettings>,
    updates: mpsc::UnboundedReceiver<EngineSettings>,
    namespaces: watch::Receiver<Snapshot>,
    seeds: HashMap<String, cache::Seed>,
    tasks: HashMap<String, drain::Signal>,
}

// === impl Engine ===

impl Engine {
    pub fn new(
        settings: EngineSettings,
        flows: Arc<dyn FlowQuery>,
        cache: Writer,
        services: service::SharedIndex,
        namespaces: watch::Receiver<Snapshot>,
        updates: mpsc::UnboundedReceiver<EngineSettings>,
        seeds: HashMap<String, cache::Seed>,
    ) -> Self {
        let (settings, _) = watch::channel(settings);
        Self {
            flows,
            cache,
            services,
            settings,
            updates,
            namespaces,
            seeds,
            tasks: HashMap::new(),
        }
    }

    /// Runs until `shutdown` fires, the reconciler drops its update handle,
    /// or the namespace index goes away. Tasks exit after completing their
    /// current write.
    pub async fn run(mut self, shutdown: drain::Watch) {
        self.sync();

        let released = shutdown.signaled();
        tokio::pin!(released);
        loop {
            tokio::select! {
                update = self.updates.recv() => match update {
                    Some(settings) => {
                        tracing::info!("Applying updated scope configuration");
                        // Running tasks observe interval and stabilization
                        // changes on their next tick.
                        self.settings.send_replace(settings);
                        self.sync();
                    }
                    None => break,
                },
                res = self.namespaces.changed() => {
                    if res.is_err() {
                        break;
                    }
                    self.sync();
                }
                _ = &mut released => break,
            }
        }

        self.stop_tasks().await;
    }

    /// Reconciles the task set against the namespace snapshot and selector.
    fn sync(&mut self) {
        let snapshot = self.namespaces.borrow().clone();
        let settings = self.settings.borrow().clone();

        let stale: Vec<String> = self
            .tasks
            .keys()
            .filter(|name| {
                !snapshot
                    .get(name.as_str())
                    .map(|labels| settings.selector.matches(labels))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        for name in stale {
            if let Some(stop) = self.tasks.remove(&name) {
                // State is discarded; the persisted object is left for
                // administrative cleanup.
                tracing::info!(namespace = %name, "Stopping recommendation task");
                tokio::spawn(stop.drain());
            }
        }

        for (name, labels) in snapshot.iter() {
            if self.tasks.contains_key(name) || !settings.selector.matches(labels) {
                continue;
            }
            self.spawn_task(name.clone(), &settings);
        }
    }

    fn spawn_task(&mut self, namespace: String, settings: &EngineSettings) {
        let now = Utc::now();
        let rec = match self.seeds.remove(&namespace) {
            Some(seed) => {
                tracing::info!(%namespace, name = %seed.name, "Resuming recommendation identity");
                Recommendation::seeded(namespace.clone(), settings.tier.clone(), seed, now)
            }
            None => Recommendation::new(namespace.clone(), settings.tier.clone(), now),
        };

        let task = NamespaceTask::new(
            rec,
            self.flows.clone(),
            self.cache.clone(),
            self.services.clone(),
        );
        let (stop, stopped) = drain::channel();
        tracing::info!(%namespace, "Starting recommendation task");
        tokio::spawn(
            run_task(task, self.settings.subscribe(), stopped)
                .instrument(info_span!("recommend", %namespace)),
        );
        self.tasks.insert(namespace, stop);
    }

    async fn stop_tasks(&mut self) {
        for (namespace, stop) in self.tasks.drain() {
            tracing::debug!(%namespace, "Stopping recommendation task");
            stop.drain().await;
        }
    }
}

/// One namespace's periodic evaluation loop.
async fn run_task(
    mut task: NamespaceTask,
    mut settings_rx: watch::Receiver<EngineSettings>,
    stop: drain::Watch,
) {
    let mut settings = settings_rx.borrow().clone();
    // The first tick fires immediately so a newly tracked namespace gets its
    // initial Learning policy without waiting a full interval.
    let mut ticker = time::interval(settings.poll_interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    let released = stop.signaled();
    tokio::pin!(released);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now();
                if let Err(error) = task.tick(now, &settings).await {
                    tracing::warn!(%error, "Recommendation tick failed; retrying next tick");
                }
            }
            res = settings_rx.changed() => {
                if res.is_err() {
                    return;
                }
                let next = settings_rx.borrow_and_update().clone();
                if next.poll_interval != settings.poll_interval {
                    ticker = time::interval_at(
                        time::Instant::now() + next.poll_interval,
                        next.poll_interval,
                    );
                    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
                }
                settings = next;
            }
            _ = &mut released => {
                tracing::debug!("Recommendation task stopped");
                return;
            }
        }
    }
}

pub(crate) struct NamespaceTask {
    rec: Recommendation,
    /// Fixed at the first tick; the window end advances each tick but the
    /// start does not, so rule content accumulates across the episode.
    episode_start: Option<DateTime<Utc>>,
    flows: Arc<dyn FlowQuery>,
    cache: Writer,
    services: service::SharedIndex,
}

// === impl NamespaceTask ===

impl NamespaceTask {
    pub(crate) fn new(
        rec: Recommendation,
        flows: Arc<dyn FlowQuery>,
        cache: Writer,
        services: service::SharedIndex,
    ) -> Self {
        Self {
            rec,
            episode_start: None,
            flows,
            cache,
            services,
        }
    }

    pub(crate) async fn tick(&mut self, now: DateTime<Utc>, settings: &EngineSettings) -> Result<()> {
        let start = *self.episode_start.get_or_insert_with(|| {
            now - chrono::Duration::from_std(settings.initial_lookback)
                .unwrap_or_else(|_| chrono::Duration::zero())
        });
        let window = TimeRange { start, end: now };

        let records = self
            .flows
            .flows(&self.rec.namespace, window)
            .await
            .context("querying flows")?;

        let fresh = {
            let services = self.services.read();
            synthesize(&self.rec.namespace, &records, now, &*services)
        };
        let changed = self.rec.rules.merge_from(fresh, now);

        match self
            .rec
            .observe(changed, now, settings.stabilization_period)
        {
            Transition::Unchanged => {}
            Transition::Update => {
                tracing::debug!(name = %self.rec.name, status = %self.rec.status, "Updating recommendation");
                self.cache.submit(render::staged_network_policy(&self.rec, settings));
            }
            Transition::Promote { previous } => {
                tracing::info!(name = %self.rec.name, %previous, "Promoting recommendation to Stable");
                self.cache.submit(render::staged_network_policy(&self.rec, settings));
                self.cache.delete(self.rec.namespace.clone(), previous);
            }
        }
        Ok(())
    }
}
