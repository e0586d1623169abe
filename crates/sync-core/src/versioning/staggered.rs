//! Staggered versioning: versions thin out as they age.
//!
//! Each archived object is tagged with its archive time. Versions are then
//! grouped into age buckets (30 seconds wide during the first hour, an hour
//! wide during the first day, and so on); only the oldest version in each
//! bucket survives, and anything older than `max_age` is deleted.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use sync_fs::{RelPath, io};

use super::{
    TIMESTAMP_TAG, VersioningPolicy, list_versions, move_into, retention_parent, retire_tree, tagged_name,
};
use crate::{Error, Result};

pub(crate) const DEFAULT_MAX_AGE: i64 = 365 * 86_400;

const TAG_FORMAT: &str = "%Y%m%d-%H%M%S";

/// One span of the bucket schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    /// Bucket width in seconds.
    pub step: i64,
    /// Age in seconds up to which this span applies.
    pub end: i64,
}

impl Interval {
    /// 30s buckets for an hour, hourly for a day, daily for 30 days, weekly
    /// up to `max_age`.
    pub fn default_schedule(max_age: i64) -> Vec<Interval> {
        vec![
            Interval { step: 30, end: 3_600 },
            Interval { step: 3_600, end: 86_400 },
            Interval { step: 86_400, end: 30 * 86_400 },
            Interval { step: 7 * 86_400, end: max_age },
        ]
    }

    /// Parse `step:end,step:end,...` (seconds).
    pub fn parse_list(raw: &str) -> Result<Vec<Interval>> {
        let bad = || Error::Config {
            message: format!("staggered intervals must look like 'step:end,...', got {raw:?}"),
        };
        let mut out = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (step, end) = part.split_once(':').ok_or_else(bad)?;
            let step: i64 = step.trim().parse().map_err(|_| bad())?;
            let end: i64 = end.trim().parse().map_err(|_| bad())?;
            if step <= 0 || end <= 0 {
                return Err(bad());
            }
            out.push(Interval { step, end });
        }
        if out.is_empty() {
            return Err(bad());
        }
        out.sort_by_key(|i| i.end);
        Ok(out)
    }
}

/// Moves superseded objects aside as `<name>~<YYYYMMDD-HHMMSS>` and thins
/// them out over time.
#[derive(Debug, Clone)]
pub struct Staggered {
    versions_dir: PathBuf,
    max_age: i64,
    intervals: Vec<Interval>,
    clock: fn() -> DateTime<Utc>,
}

impl Staggered {
    pub fn new(versions_dir: impl Into<PathBuf>, max_age: i64, intervals: Vec<Interval>) -> Self {
        Self {
            versions_dir: versions_dir.into(),
            max_age,
            intervals,
            clock: Utc::now,
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Retained versions of `path` with their archive times, oldest first.
    pub fn versions_of(&self, path: &RelPath) -> Vec<(DateTime<Utc>, PathBuf)> {
        let dir = retention_parent(&self.versions_dir, path);
        let mut tagged: Vec<_> = list_versions(&TIMESTAMP_TAG, &dir, path.file_name())
            .into_iter()
            .filter_map(|(tag, p)| parse_tag(&tag).map(|(time, seq)| (time, seq, p)))
            .collect();
        tagged.sort();
        tagged.into_iter().map(|(time, _, p)| (time, p)).collect()
    }

    /// Apply the bucket schedule to the versions of `path` as of `now`.
    pub fn expire(&self, path: &RelPath, now: DateTime<Utc>) -> Result<()> {
        let mut last_bucket: Option<(usize, i64)> = None;

        for (time, version) in self.versions_of(path) {
            let age = (now - time).num_seconds().max(0);
            let bucket = self.bucket_for(age);

            let drop_it = match bucket {
                None => true,
                Some(b) => last_bucket == Some(b),
            };

            if drop_it {
                io::remove_object(&version).map_err(|e| Error::versioning(path, e.to_string()))?;
                tracing::debug!(path = %path, version = %version.display(), age, "Expired version");
            } else {
                last_bucket = bucket;
            }
        }
        Ok(())
    }

    /// (interval index, bucket number) for an age, `None` past `max_age`.
    fn bucket_for(&self, age: i64) -> Option<(usize, i64)> {
        if age > self.max_age {
            return None;
        }
        self.intervals
            .iter()
            .enumerate()
            .find(|(_, i)| age <= i.end)
            .map(|(idx, i)| (idx, age / i.step))
    }

    fn archive_one(&self, path: &RelPath, source: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
        let dir = retention_parent(&self.versions_dir, path);
        let stamp = now.format(TAG_FORMAT).to_string();
        let mut seq = 0u32;
        let dest = loop {
            let tag = if seq == 0 { stamp.clone() } else { format!("{stamp}-{seq}") };
            let dest = dir.join(tagged_name(path.file_name(), &tag));
            if fs::symlink_metadata(&dest).is_err() {
                break dest;
            }
            seq += 1;
        };
        move_into(path, source, &dest)?;
        tracing::debug!(path = %path, version = %dest.display(), "Archived superseded object");
        Ok(dest)
    }
}

/// Archive time and same-second sequence number of a tag.
fn parse_tag(tag: &str) -> Option<(DateTime<Utc>, u32)> {
    let mut parts = tag.splitn(3, '-');
    let stamp = format!("{}-{}", parts.next()?, parts.next()?);
    let seq = match parts.next() {
        Some(n) => n.parse().ok()?,
        None => 0,
    };
    let time = NaiveDateTime::parse_from_str(&stamp, TAG_FORMAT).ok()?.and_utc();
    Some((time, seq))
}

impl VersioningPolicy for Staggered {
    fn name(&self) -> &'static str {
        "staggered"
    }

    fn archive(&self, root: &Path, path: &RelPath) -> Result<()> {
        let now = (self.clock)();
        let archived = retire_tree(root, path, &self.versions_dir, &mut |p, native| {
            self.archive_one(p, native, now)
        })?;
        for p in &archived {
            self.expire(p, now)?;
        }
        Ok(())
    }

    fn retention_dir(&self) -> Option<&Path> {
        Some(&self.versions_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::fs;
    use tempfile::tempdir;

    fn rel(s: &str) -> RelPath {
        RelPath::new(s).unwrap()
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn plant(versions_dir: &Path, name: &str, at: DateTime<Utc>) {
        fs::create_dir_all(versions_dir).unwrap();
        let tag = at.format(TAG_FORMAT).to_string();
        fs::write(versions_dir.join(tagged_name(name, &tag)), tag).unwrap();
    }

    #[test]
    fn parse_list_accepts_pairs() {
        let list = Interval::parse_list("3600:86400, 30:3600").unwrap();
        assert_eq!(
            list,
            vec![
                Interval { step: 30, end: 3_600 },
                Interval { step: 3_600, end: 86_400 }
            ]
        );
        assert!(Interval::parse_list("nonsense").is_err());
        assert!(Interval::parse_list("0:10").is_err());
    }

    #[test]
    fn archive_uses_timestamp_tag() {
        let dir = tempdir().unwrap();
        let versions = dir.path().join(".stversions");
        let policy = Staggered::new(&versions, DEFAULT_MAX_AGE, Interval::default_schedule(DEFAULT_MAX_AGE))
            .with_clock(fixed_now);
        fs::write(dir.path().join("f.txt"), "x").unwrap();

        policy.archive(dir.path(), &rel("f.txt")).unwrap();

        assert!(versions.join("f~20261019-120000.txt").exists());
        assert!(!dir.path().join("f.txt").exists());
    }

    #[test]
    fn keeps_one_version_per_bucket() {
        let dir = tempdir().unwrap();
        let versions = dir.path().join(".stversions");
        let policy = Staggered::new(&versions, DEFAULT_MAX_AGE, Interval::default_schedule(DEFAULT_MAX_AGE));
        let now = fixed_now();

        // Two versions within the same 30s bucket, one an hour and a half old.
        plant(&versions, "f", now - Duration::seconds(5));
        plant(&versions, "f", now - Duration::seconds(10));
        plant(&versions, "f", now - Duration::seconds(5_400));

        policy.expire(&rel("f"), now).unwrap();

        let left: Vec<_> = policy.versions_of(&rel("f")).into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            left,
            vec![now - Duration::seconds(5_400), now - Duration::seconds(10)]
        );
    }

    #[test]
    fn drops_versions_past_max_age() {
        let dir = tempdir().unwrap();
        let versions = dir.path().join(".stversions");
        let policy = Staggered::new(&versions, 86_400, Interval::default_schedule(86_400));
        let now = fixed_now();

        plant(&versions, "f", now - Duration::days(3));
        plant(&versions, "f", now - Duration::seconds(60));

        policy.expire(&rel("f"), now).unwrap();

        assert_eq!(policy.versions_of(&rel("f")).len(), 1);
    }

    #[test]
    fn same_second_archives_keep_the_first() {
        let dir = tempdir().unwrap();
        let versions = dir.path().join(".stversions");
        let policy = Staggered::new(&versions, DEFAULT_MAX_AGE, Interval::default_schedule(DEFAULT_MAX_AGE))
            .with_clock(fixed_now);

        for content in ["first", "second"] {
            fs::write(dir.path().join("f"), content).unwrap();
            policy.archive(dir.path(), &rel("f")).unwrap();
        }

        let left: Vec<String> = policy
            .versions_of(&rel("f"))
            .iter()
            .map(|(_, p)| fs::read_to_string(p).unwrap())
            .collect();
        assert_eq!(left, vec!["first"]);
    }

    #[test]
    fn sequence_suffix_orders_within_a_second() {
        let dir = tempdir().unwrap();
        let versions = dir.path().join(".stversions");
        fs::create_dir_all(&versions).unwrap();
        for tag in ["20261019-120000-10", "20261019-120000-2", "20261019-120000"] {
            fs::write(versions.join(tagged_name("f", tag)), tag).unwrap();
        }
        let policy = Staggered::new(&versions, DEFAULT_MAX_AGE, Interval::default_schedule(DEFAULT_MAX_AGE));

        let order: Vec<String> = policy
            .versions_of(&rel("f"))
            .iter()
            .map(|(_, p)| fs::read_to_string(p).unwrap())
            .collect();
        assert_eq!(
            order,
            vec!["20261019-120000", "20261019-120000-2", "20261019-120000-10"]
        );
    }
}
