//! Version vectors for ordering entry updates across peers
//!
//! Each peer keeps a logical counter per path. Comparing vectors tells
//! whether one update causally follows another or whether they were made
//! concurrently. Wall-clock time is never consulted.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a node taking part in synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(Uuid);

impl PeerId {
    /// A fresh random peer id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// A peer id from a fixed value, mostly useful for deterministic tests.
    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Short form used in logs and version file names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_uppercase()
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Causality relationship between two version vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    Before,
    After,
    Concurrent,
    Equal,
}

/// Per-peer monotonic counters for one path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionVector {
    counters: BTreeMap<PeerId, u64>,
}

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for `peer` (0 if the peer never touched the path).
    pub fn get(&self, peer: &PeerId) -> u64 {
        self.counters.get(peer).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn peers(&self) -> impl Iterator<Item = (&PeerId, &u64)> {
        self.counters.iter()
    }

    /// Advance `peer`'s counter and return the new value.
    pub fn increment(&mut self, peer: PeerId) -> u64 {
        let entry = self.counters.entry(peer).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Pointwise maximum with `other`.
    pub fn merge(&mut self, other: &Self) {
        for (peer, &count) in &other.counters {
            let entry = self.counters.entry(*peer).or_insert(0);
            if count > *entry {
                *entry = count;
            }
        }
    }

    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// A copy of this vector advanced by one for `peer`.
    #[must_use]
    pub fn bumped(&self, peer: PeerId) -> Self {
        let mut out = self.clone();
        out.increment(peer);
        out
    }

    pub fn compare(&self, other: &Self) -> CausalOrder {
        let mut self_ge = true;
        let mut other_ge = true;

        for peer in self.counters.keys().chain(other.counters.keys()) {
            let a = self.get(peer);
            let b = other.get(peer);
            if a < b {
                self_ge = false;
            }
            if b < a {
                other_ge = false;
            }
        }

        match (self_ge, other_ge) {
            (true, true) => CausalOrder::Equal,
            (true, false) => CausalOrder::After,
            (false, true) => CausalOrder::Before,
            (false, false) => CausalOrder::Concurrent,
        }
    }

    /// Whether this vector is greater than or equal to `other` everywhere.
    pub fn dominates(&self, other: &Self) -> bool {
        matches!(self.compare(other), CausalOrder::After | CausalOrder::Equal)
    }

    /// Sum of all counters; a cheap progress measure for logs.
    pub fn total(&self) -> u64 {
        self.counters.values().sum()
    }

    /// Causal order as an [`Ordering`], `None` when concurrent.
    pub fn partial_order(&self, other: &Self) -> Option<Ordering> {
        match self.compare(other) {
            CausalOrder::Before => Some(Ordering::Less),
            CausalOrder::After => Some(Ordering::Greater),
            CausalOrder::Equal => Some(Ordering::Equal),
            CausalOrder::Concurrent => None,
        }
    }
}

impl fmt::Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (peer, count)) in self.counters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", peer.short(), count)?;
        }
        write!(f, "}}")
    }
}
