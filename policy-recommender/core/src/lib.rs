//! Domain model for the policy recommendation engine.
//!
//! Everything in this crate is independent of the Kubernetes API machinery:
//! flow records as returned by the flow store, the peer-scoped rule model,
//! and the pure synthesizer that turns one namespace's flows into a rule set.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod flows;
pub mod rules;
pub mod synthesize;

pub use self::flows::{
    Endpoint, EndpointKind, FlowAction, FlowQuery, FlowRecord, Protocol, TimeRange,
};
pub use self::rules::{Direction, PeerScope, PortRange, Rule, RuleSet, Warning};
pub use ipnet::{IpNet, Ipv4Net, Ipv6Net};
