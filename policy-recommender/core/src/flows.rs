use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, net::IpAddr};

/// A window of observation time, `[start, end]`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// An observed traffic summary between a source and a destination endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRecord {
    pub source: Endpoint,
    #[serde(rename = "destination")]
    pub dest: Endpoint,
    pub protocol: Protocol,
    /// Absent for protocols without ports.
    #[serde(default)]
    pub dest_port: Option<u16>,
    /// DNS names the destination address resolved from, if any.
    #[serde(default)]
    pub domains: Vec<String>,
    pub action: FlowAction,
}

/// One side of a flow, as identified by the flow store.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub kind: EndpointKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub ip: Option<IpAddr>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum EndpointKind {
    #[serde(rename = "pod")]
    Pod,
    #[serde(rename = "service")]
    Service,
    #[serde(rename = "networkSet")]
    NetworkSet,
    #[serde(rename = "globalNetworkSet")]
    GlobalNetworkSet,
    #[serde(rename = "external")]
    External,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
pub enum Protocol {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "SCTP")]
    Sctp,
    #[serde(rename = "ICMP")]
    Icmp,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum FlowAction {
    #[serde(rename = "allow")]
    Allow,
    #[serde(rename = "deny")]
    Deny,
}

// === impl Protocol ===

impl Protocol {
    /// Whether flows over this protocol carry a destination port.
    pub fn has_ports(&self) -> bool {
        !matches!(self, Self::Icmp)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("TCP"),
            Self::Udp => f.write_str("UDP"),
            Self::Sctp => f.write_str("SCTP"),
            Self::Icmp => f.write_str("ICMP"),
        }
    }
}

/// Reads observed flows from the flow store.
///
/// Implementations must support an expanding window cheaply; the engine
/// re-queries the whole observation episode every tick. Errors are treated as
/// transient and retried at the next tick.
#[async_trait::async_trait]
pub trait FlowQuery: Send + Sync + 'static {
    /// Returns flows whose source or destination is in `namespace`, observed
    /// within `window`.
    async fn flows(&self, namespace: &str, window: TimeRange) -> Result<Vec<FlowRecord>>;
}
