//! Convergence estimation
//!
//! Completion is measured against what a peer announced: for every path the
//! peer told us about, the target is the global winner, and the path counts
//! as matched once the local, applied state equals that target.

use serde::{Deserialize, Serialize};

use crate::entry::PeerId;
use crate::folder::FolderIndex;

/// Progress towards a peer's view of a folder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// 0 to 100, exactly 100 only when nothing is outstanding.
    pub percent: f64,
    /// Non-deleted targets.
    pub total: usize,
    /// Unmatched targets plus pending deletions.
    pub needed: usize,
    /// Deleted targets whose local object still exists.
    pub deletes: usize,
}

impl Completion {
    pub const COMPLETE: Completion = Completion {
        percent: 100.0,
        total: 0,
        needed: 0,
        deletes: 0,
    };

    fn from_counts(total: usize, unmatched: usize, deletes: usize) -> Self {
        let percent = if unmatched + deletes == 0 {
            100.0
        } else {
            // Never round up to a false 100.
            (100.0 * (total - unmatched) as f64 / (total + deletes) as f64).min(99.99)
        };
        Self {
            percent,
            total,
            needed: unmatched + deletes,
            deletes,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.needed == 0
    }

    fn weight(&self) -> usize {
        self.total + self.deletes
    }
}

/// Completion of `index` towards what `peer` announced.
pub fn completion(index: &FolderIndex, peer: &PeerId) -> Completion {
    let mut total = 0;
    let mut unmatched = 0;
    let mut deletes = 0;

    for announced in index.remote_entries(peer) {
        let Some(target) = index.global(&announced.path) else {
            continue;
        };
        let matched = index.local_matches(target);
        if target.is_deleted() {
            if !matched {
                deletes += 1;
            }
        } else {
            total += 1;
            if !matched {
                unmatched += 1;
            }
        }
    }

    Completion::from_counts(total, unmatched, deletes)
}

/// Weighted average of several folders' completion by entry count.
pub fn aggregate(parts: &[Completion]) -> Completion {
    let total: usize = parts.iter().map(|c| c.total).sum();
    let needed: usize = parts.iter().map(|c| c.needed).sum();
    let deletes: usize = parts.iter().map(|c| c.deletes).sum();
    let weight: usize = parts.iter().map(Completion::weight).sum();

    if weight == 0 || needed == 0 {
        return Completion {
            percent: 100.0,
            total,
            needed,
            deletes,
        };
    }

    let weighted: f64 = parts.iter().map(|c| c.percent * c.weight() as f64).sum();
    Completion {
        percent: (weighted / weight as f64).min(99.99),
        total,
        needed,
        deletes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Entry, VersionVector};
    use sync_fs::{ContentId, RelPath};

    fn rel(s: &str) -> RelPath {
        RelPath::new(s).unwrap()
    }

    fn p(n: u128) -> PeerId {
        PeerId::from_u128(n)
    }

    fn file(path: &str, by: PeerId) -> Entry {
        Entry::file(rel(path), ContentId::of_bytes(path.as_bytes()), path.len() as u64, by)
            .with_version(VersionVector::new().bumped(by))
    }

    #[test]
    fn empty_target_set_is_complete() {
        let index = FolderIndex::new();
        assert_eq!(completion(&index, &p(2)), Completion::COMPLETE);
    }

    #[test]
    fn counts_unmatched_and_pending_deletions() {
        let mut index = FolderIndex::new();
        let gone = file("gone", p(1));
        index.record_local(file("have", p(2)));
        index.record_local(gone.clone());

        index.merge_remote(p(2), [file("have", p(2)), file("want", p(2)), gone.tombstone(p(2))]);

        let c = completion(&index, &p(2));
        assert_eq!(c.total, 2);
        assert_eq!(c.deletes, 1);
        assert_eq!(c.needed, 2);
        assert!((c.percent - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn applying_everything_reaches_100() {
        let mut index = FolderIndex::new();
        let want = file("want", p(2));
        index.merge_remote(p(2), [want.clone()]);
        assert_eq!(completion(&index, &p(2)).percent, 0.0);

        index.record_local(want);
        let c = completion(&index, &p(2));
        assert_eq!(c.percent, 100.0);
        assert!(c.is_complete());
    }

    #[test]
    fn aggregate_weights_by_entry_count() {
        let done = Completion::from_counts(3, 0, 0);
        let half = Completion::from_counts(1, 1, 0);
        let all = aggregate(&[done, half]);
        assert_eq!(all.total, 4);
        assert_eq!(all.needed, 1);
        assert!((all.percent - 75.0).abs() < 1e-9);

        assert_eq!(aggregate(&[]).percent, 100.0);
    }
}
