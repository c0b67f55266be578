//! Fixed-width time bucketing for bar-style views.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::series::Sample;

/// Upper bound on buckets per query.
pub const MAX_BUCKETS: i64 = 10_000;

/// How samples landing in one bucket are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Avg,
    Max,
    Sum,
}

impl std::str::FromStr for Aggregation {
    type Err = BucketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avg" => Ok(Self::Avg),
            "max" => Ok(Self::Max),
            "sum" => Ok(Self::Sum),
            other => Err(BucketError::UnknownAggregation(other.to_string())),
        }
    }
}

/// One aggregation window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub start_ts: i64,
    pub width_ms: i64,
    /// Rounded aggregate; 0 when the bucket saw no samples.
    pub value: f64,
    pub sample_count: u64,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BucketError {
    #[error("bucket width must be > 0, got {0}ms")]
    InvalidWidth(i64),

    #[error("window must be > 0, got {0}ms")]
    InvalidWindow(i64),

    #[error("{window_ms}ms window at {width_ms}ms width exceeds {MAX_BUCKETS} buckets")]
    TooManyBuckets { window_ms: i64, width_ms: i64 },

    #[error("unknown aggregation: {0}")]
    UnknownAggregation(String),
}

#[derive(Clone, Copy)]
struct Acc {
    sum: f64,
    max: f64,
    count: u64,
}

/// Partitions `[now - window_ms, now]` into left-aligned buckets of
/// `width_ms` and aggregates `samples` into them.
///
/// Always returns `ceil(window_ms / width_ms)` buckets. Samples outside the
/// window are ignored; a sample at exactly `now` lands in the last bucket.
pub fn buckets(
    samples: &[Sample],
    now_ms: i64,
    window_ms: i64,
    width_ms: i64,
    agg: Aggregation,
) -> Result<Vec<Bucket>, BucketError> {
    if width_ms <= 0 {
        return Err(BucketError::InvalidWidth(width_ms));
    }
    if window_ms <= 0 {
        return Err(BucketError::InvalidWindow(window_ms));
    }

    // Both operands are positive here.
    let n = (window_ms as u64).div_ceil(width_ms as u64);
    if n > MAX_BUCKETS as u64 {
        return Err(BucketError::TooManyBuckets {
            window_ms,
            width_ms,
        });
    }
    let n = n as usize;
    let start = now_ms.saturating_sub(window_ms);

    let mut accs = vec![
        Acc {
            sum: 0.0,
            max: f64::NEG_INFINITY,
            count: 0,
        };
        n
    ];

    for s in samples {
        if s.t < start || s.t > now_ms || !s.v.is_finite() {
            continue;
        }
        let idx = ((i128::from(s.t) - i128::from(start)) / i128::from(width_ms)) as usize;
        let idx = idx.min(n - 1);
        let acc = &mut accs[idx];
        acc.sum += s.v;
        acc.max = acc.max.max(s.v);
        acc.count += 1;
    }

    Ok(accs
        .iter()
        .enumerate()
        .map(|(i, acc)| {
            let value = if acc.count == 0 {
                0.0
            } else {
                match agg {
                    Aggregation::Avg => acc.sum / acc.count as f64,
                    Aggregation::Max => acc.max,
                    Aggregation::Sum => acc.sum,
                }
            };
            Bucket {
                start_ts: start + i as i64 * width_ms,
                width_ms,
                value: value.round(),
                sample_count: acc.count,
            }
        })
        .collect())
}
