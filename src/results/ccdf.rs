//! Empirical complementary cumulative distribution of latencies, per
//! (experiment, queries, rate) group.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use kstring::KString;
use noisy_float::prelude::R64;

use super::record::ResultRecord;

pub const GROUP_KEYS: [&str; 3] = ["experiment", "queries", "rate"];

/// Used for group keys missing from a record
pub const MISSING_GROUP_VALUE: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub struct GroupKey {
    pub experiment: KString,
    pub queries: KString,
    pub rate: KString,
}

impl GroupKey {
    pub fn of_record(record: &ResultRecord) -> Self {
        let get = |key: &str| {
            record
                .metadata
                .get(key)
                .cloned()
                .unwrap_or_else(|| KString::from_static(MISSING_GROUP_VALUE))
        };
        let [experiment, queries, rate] = GROUP_KEYS;
        Self {
            experiment: get(experiment),
            queries: get(queries),
            rate: get(rate),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CcdfPoint {
    pub latency: R64,
    /// Fraction of samples with latency >= `latency`
    pub ccdf: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CcdfSeries {
    pub key: GroupKey,
    /// Ascending by latency, each latency once, ccdf non-increasing
    pub points: Vec<CcdfPoint>,
    pub num_samples: u64,
}

/// The CCDF of the (latency, count) observations of one group; `None`
/// if the observations hold no samples, `Err` if the total count does
/// not fit a u64.
fn ccdf_points(mut observations: Vec<(R64, u64)>) -> Result<Option<(Vec<CcdfPoint>, u64)>> {
    observations.retain(|(_, count)| *count > 0);
    observations.sort_by_key(|(latency, _)| *latency);
    let n = observations
        .iter()
        .try_fold(0u64, |n, (_, count)| n.checked_add(*count))
        .ok_or_else(|| anyhow!("sample count overflows"))?;
    if n == 0 {
        return Ok(None);
    }
    let mut points: Vec<CcdfPoint> = Vec::new();
    // Samples with a smaller latency than the current one
    let mut num_below: u64 = 0;
    for (latency, count) in observations {
        if points.last().map(|p| p.latency) != Some(latency) {
            points.push(CcdfPoint {
                latency,
                ccdf: (n - num_below) as f64 / n as f64,
            });
        }
        num_below += count;
    }
    Ok(Some((points, n)))
}

/// Group `records` by `GroupKey` and compute each group's CCDF, sorted
/// by group key. A bucket record counts as `count` samples. Fails if a
/// group's bucket counts add up to more than `u64::MAX`.
pub fn aggregate<'r>(
    records: impl IntoIterator<Item = &'r ResultRecord>,
) -> Result<Vec<CcdfSeries>> {
    let mut groups: BTreeMap<GroupKey, Vec<(R64, u64)>> = BTreeMap::new();
    for record in records {
        groups
            .entry(GroupKey::of_record(record))
            .or_default()
            .push((record.observation.latency(), record.observation.count()));
    }
    let mut series = Vec::new();
    for (key, observations) in groups {
        let points = ccdf_points(observations).map_err(|e| {
            anyhow!(
                "group experiment={}, queries={}, rate={}: {e}",
                key.experiment,
                key.queries,
                key.rate
            )
        })?;
        if let Some((points, num_samples)) = points {
            series.push(CcdfSeries {
                key,
                points,
                num_samples,
            });
        }
    }
    Ok(series)
}
