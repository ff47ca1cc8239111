use crate::cache::Seed;
use chrono::{DateTime, Utc};
use policy_recommender_core::RuleSet;
use rand::Rng;
use std::{fmt, time::Duration};

/// Trust stage of a namespace's recommendation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Learning,
    Stabilizing,
    Stable,
}

/// What the engine must do with the persisted object after a tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Nothing to write.
    Unchanged,
    /// Update the object in place under the current identity.
    Update,
    /// Replace the object: create under the new identity, delete `previous`.
    Promote { previous: String },
}

/// Per-namespace recommendation state.
///
/// Owned exclusively by the namespace's task; ticks are strictly sequential,
/// so `observe` never sees overlapping snapshots.
#[derive(Clone, Debug)]
pub struct Recommendation {
    pub namespace: String,
    /// Current persisted object name. Replaced exactly once, at the first
    /// promotion to Stable; relearning keeps the promoted identity.
    pub name: String,
    pub status: Status,
    pub rules: RuleSet,
    /// Last time the rule content changed; measures stabilization time.
    pub last_changed_at: DateTime<Utc>,
    tier: String,
    promoted_at: Option<DateTime<Utc>>,
    persisted: bool,
}

// === impl Recommendation ===

impl Recommendation {
    pub fn new(namespace: String, tier: String, now: DateTime<Utc>) -> Self {
        let name = mint_name(&tier, &namespace);
        Self {
            namespace,
            name,
            status: Status::Learning,
            rules: RuleSet::default(),
            last_changed_at: now,
            tier,
            promoted_at: None,
            persisted: false,
        }
    }

    /// Resumes the identity of a previously persisted recommendation. Rule
    /// history is not resumed; the namespace restarts in Learning.
    pub fn seeded(namespace: String, tier: String, seed: Seed, now: DateTime<Utc>) -> Self {
        Self {
            namespace,
            name: seed.name,
            status: Status::Learning,
            rules: RuleSet::default(),
            last_changed_at: now,
            tier,
            promoted_at: seed.promoted_at,
            persisted: true,
        }
    }

    pub fn promoted_at(&self) -> Option<DateTime<Utc>> {
        self.promoted_at
    }

    /// Advances the staging state machine after a tick whose synthesis has
    /// already been merged into `rules`; `changed` reports whether that merge
    /// altered rule content.
    pub fn observe(
        &mut self,
        changed: bool,
        now: DateTime<Utc>,
        stabilization: Duration,
    ) -> Transition {
        if !self.persisted {
            // Creation counts as a content event; stabilization starts from
            // the first persisted state.
            self.persisted = true;
            self.status = Status::Learning;
            self.last_changed_at = now;
            return Transition::Update;
        }

        if changed {
            self.status = Status::Learning;
            self.last_changed_at = now;
            return Transition::Update;
        }

        match self.status {
            Status::Learning => {
                self.status = Status::Stabilizing;
                Transition::Update
            }
            Status::Stabilizing => {
                let unchanged_for = (now - self.last_changed_at).to_std().unwrap_or_default();
                if unchanged_for < stabilization {
                    return Transition::Unchanged;
                }
                self.status = Status::Stable;
                if self.promoted_at.is_some() {
                    // The identity was already minted at a prior promotion;
                    // renaming again would break the single-rename guarantee.
                    return Transition::Update;
                }
                self.promoted_at = Some(now);
                let previous =
                    std::mem::replace(&mut self.name, mint_name(&self.tier, &self.namespace));
                Transition::Promote { previous }
            }
            Status::Stable => Transition::Unchanged,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Learning => f.write_str("Learning"),
            Self::Stabilizing => f.write_str("Stabilizing"),
            Self::Stable => f.write_str("Stable"),
        }
    }
}

/// Generated policy names are tier-prefixed with a random 5-character suffix,
/// matching the API server's generateName convention.
fn mint_name(tier: &str, namespace: &str) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    const SUFFIX_LEN: usize = 5;

    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{tier}.{namespace}-{suffix}")
}
