use crate::flows::Protocol;
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use std::{collections::BTreeSet, fmt};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Direction {
    Ingress,
    Egress,
}

/// A single port or an inclusive range of ports.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

/// Classification of a rule's non-local endpoint.
///
/// The set of scopes is fixed and precedence-ordered; see
/// [`crate::synthesize`] for how flows are classified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerScope {
    /// Egress to external addresses that resolved from DNS names.
    Domains(BTreeSet<String>),
    /// Any workload in a peer namespace.
    Namespace(String),
    /// A specific cluster service.
    Service { name: String, namespace: String },
    /// A named network set; `namespace` is `None` for global sets.
    NetworkSet { name: String, namespace: Option<String> },
    /// RFC 1918 address space not otherwise classified.
    Private(BTreeSet<IpNet>),
}

/// Flags surfaced to the human reviewer alongside a rule.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Warning {
    /// A namespace-scoped rule carries ports/protocol pairs beyond what the
    /// peer namespace's services declare.
    NonServicePortsAndProtocol,
}

/// One synthesized allow rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub direction: Direction,
    pub protocol: Protocol,
    pub peer: PeerScope,
    /// Sorted, disjoint port entries. Empty for port-less protocols.
    pub ports: BTreeSet<PortRange>,
    pub last_updated: DateTime<Utc>,
    pub warnings: BTreeSet<Warning>,
}

/// A namespace's synthesized rules, kept in canonical order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

// === impl PortRange ===

impl PortRange {
    pub fn single(port: u16) -> Self {
        Self {
            min: port,
            max: port,
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}:{}", self.min, self.max)
        }
    }
}

// === impl PeerScope ===

impl PeerScope {
    /// Scope tag recorded in rule metadata.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Domains(_) => "domains",
            Self::Namespace(_) => "namespace",
            Self::Service { .. } => "service",
            Self::NetworkSet { .. } => "networkSet",
            Self::Private(_) => "private",
        }
    }

    /// Identity used for rule grouping. Domain and private rules form a
    /// single group per (direction, protocol); their payload sets are unioned
    /// within the group rather than contributing to its identity.
    fn group_key(&self) -> (u8, &str, &str) {
        match self {
            Self::Service { name, namespace } => (0, namespace, name),
            Self::NetworkSet { name, namespace } => (1, namespace.as_deref().unwrap_or(""), name),
            Self::Namespace(namespace) => (2, namespace, ""),
            Self::Domains(_) => (3, "", ""),
            Self::Private(_) => (4, "", ""),
        }
    }
}

// === impl Rule ===

impl Rule {
    fn same_group(&self, other: &Self) -> bool {
        self.direction == other.direction
            && self.protocol == other.protocol
            && self.peer.group_key() == other.peer.group_key()
    }

    /// Absorbs a freshly synthesized rule from the same group, returning true
    /// if this rule's content grew. Warnings are metadata and are refreshed
    /// without counting as a content change.
    fn absorb(&mut self, fresh: Self, now: DateTime<Utc>) -> bool {
        let mut grew = false;
        for port in fresh.ports {
            grew |= self.ports.insert(port);
        }
        match (&mut self.peer, fresh.peer) {
            (PeerScope::Domains(mine), PeerScope::Domains(theirs)) => {
                for domain in theirs {
                    grew |= mine.insert(domain);
                }
            }
            (PeerScope::Private(mine), PeerScope::Private(theirs)) => {
                for net in theirs {
                    grew |= mine.insert(net);
                }
            }
            _ => {}
        }
        self.warnings = fresh.warnings;
        if grew {
            self.last_updated = now;
        }
        grew
    }
}

// === impl RuleSet ===

impl RuleSet {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Rule> {
        self.rules.iter_mut()
    }

    pub fn ingress(&self) -> impl Iterator<Item = &Rule> {
        self.rules
            .iter()
            .filter(|r| r.direction == Direction::Ingress)
    }

    pub fn egress(&self) -> impl Iterator<Item = &Rule> {
        self.rules
            .iter()
            .filter(|r| r.direction == Direction::Egress)
    }

    /// Unions `fresh` into this set, returning true if any rule content
    /// changed. Content never shrinks: rules absent from `fresh` are kept.
    pub fn merge_from(&mut self, fresh: RuleSet, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        for rule in fresh.rules {
            changed |= self.upsert(rule, now);
        }
        self.sort();
        changed
    }

    /// Equality over rule content only: directions, protocols, peers, and
    /// ports. Timestamps and warnings are metadata. Both sets must be in
    /// canonical order.
    pub fn content_eq(&self, other: &Self) -> bool {
        self.rules.len() == other.rules.len()
            && self.rules.iter().zip(&other.rules).all(|(a, b)| {
                a.direction == b.direction
                    && a.protocol == b.protocol
                    && a.peer == b.peer
                    && a.ports == b.ports
            })
    }

    pub(crate) fn upsert(&mut self, rule: Rule, now: DateTime<Utc>) -> bool {
        if let Some(existing) = self.rules.iter_mut().find(|r| r.same_group(&rule)) {
            existing.absorb(rule, now)
        } else {
            self.rules.push(rule);
            true
        }
    }

    pub(crate) fn sort(&mut self) {
        self.rules.sort_by(|a, b| {
            (a.direction, a.peer.group_key(), a.protocol).cmp(&(
                b.direction,
                b.peer.group_key(),
                b.protocol,
            ))
        });
    }
}

impl FromIterator<Rule> for RuleSet {
    fn from_iter<T: IntoIterator<Item = Rule>>(iter: T) -> Self {
        let mut set = Self::default();
        for rule in iter {
            let at = rule.last_updated;
            set.upsert(rule, at);
        }
        set.sort();
        set
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonServicePortsAndProtocol => f.write_str("NonServicePortsAndProtocol"),
        }
    }
}
