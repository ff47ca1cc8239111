use crate::core::{FlowQuery, FlowRecord, TimeRange};
use anyhow::{bail, Context, Result};
use hyper::{body, client::HttpConnector, Uri};

/// HTTP client for the external flow query API.
///
/// Expects `GET {base}/flows?namespace=...&start=...&end=...` (unix-second
/// window bounds) to return a JSON array of flow records. Individually
/// malformed records are dropped, not the page.
pub struct Client {
    http: hyper::Client<HttpConnector>,
    base: String,
}

// === impl Client ===

impl Client {
    pub fn new(base: String) -> Result<Self> {
        let base = base.trim_end_matches('/').to_string();
        base.parse::<Uri>().context("invalid flow API address")?;
        Ok(Self {
            http: hyper::Client::new(),
            base,
        })
    }
}

#[async_trait::async_trait]
impl FlowQuery for Client {
    async fn flows(&self, namespace: &str, window: TimeRange) -> Result<Vec<FlowRecord>> {
        let uri: Uri = format!(
            "{}/flows?namespace={}&start={}&end={}",
            self.base,
            namespace,
            window.start.timestamp(),
            window.end.timestamp(),
        )
        .parse()
        .context("building flow query URI")?;

        let response = self.http.get(uri).await.context("querying flows")?;
        let status = response.status();
        if !status.is_success() {
            bail!("flow API returned {status}");
        }

        let bytes = body::to_bytes(response.into_body())
            .await
            .context("reading flow response")?;
        let records: Vec<serde_json::Value> =
            serde_json::from_slice(&bytes).context("decoding flow response")?;

        Ok(records
            .into_iter()
            .filter_map(|record| {
                serde_json::from_value(record)
                    .map_err(|error| tracing::debug!(%error, "Skipping malformed flow record"))
                    .ok()
            })
            .collect())
    }
}
