use crate::{engine::Reconciler, flows, index, k8s};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use std::sync::Arc;
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "policy-recommender",
    about = "Synthesizes staged network policy recommendations from observed flows"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "policy_recommender=info,warn",
        env = "POLICY_RECOMMENDER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Base URL of the flow query API.
    #[clap(
        long,
        default_value = "http://127.0.0.1:8444",
        env = "POLICY_RECOMMENDER_FLOW_API"
    )]
    flow_api: String,

    /// Floor applied to the scope's poll interval.
    #[clap(long, default_value = "30s")]
    min_poll_interval: k8s::duration::ConfigDuration,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            flow_api,
            min_poll_interval,
        } = self;

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin)
            .with_client(client)
            .build()
            .await?;

        let flows = Arc::new(flows::Client::new(flow_api)?);

        // Indexes feeding the engine: namespace labels for membership and
        // service ports for the synthesizer's cross-check.
        let (namespace_index, namespaces_rx) = index::namespace::Index::shared();
        let service_index = index::service::Index::shared();

        let reconciler = Reconciler::shared(
            runtime.client(),
            flows,
            service_index.clone(),
            namespaces_rx,
            min_poll_interval.into(),
        );

        let namespaces = runtime.watch_all::<k8s::Namespace>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(namespace_index, namespaces).instrument(info_span!("namespaces")),
        );

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(service_index, services).instrument(info_span!("services")),
        );

        let scopes =
            runtime.watch_all::<k8s::policy::PolicyRecommendationScope>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(reconciler, scopes)
                .instrument(info_span!("policyrecommendationscopes")),
        );

        // Block the main thread on the shutdown signal.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
