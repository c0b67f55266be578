//! Dynamic chart-axis bounds derived from a series' recent values.

use serde::{Deserialize, Serialize};

use crate::series::Sample;

/// Default symmetric padding, as a percentage of the value range.
pub const DEFAULT_PADDING_PCT: f64 = 10.0;

/// Per-unit scaling behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleProfile {
    /// Values in `[0, 100]`.
    Percentage,
    /// GB-denominated memory.
    Gigabytes,
    /// Unbounded non-negative counts and rates.
    #[default]
    Count,
}

/// Tunables for one [`ScaleProfile`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileParams {
    pub default: Scale,
    pub min_padding: f64,
    pub min_range: f64,
    /// Inclusive snap distance for the floor and ceiling.
    pub tolerance: f64,
    /// Rounding granularity of the final bounds.
    pub step: f64,
    pub ceiling: Option<f64>,
}

impl ScaleProfile {
    pub const fn params(self) -> ProfileParams {
        match self {
            Self::Percentage => ProfileParams {
                default: Scale::new(0.0, 100.0),
                min_padding: 2.0,
                min_range: 8.0,
                tolerance: 5.0,
                step: 1.0,
                ceiling: Some(100.0),
            },
            Self::Gigabytes => ProfileParams {
                default: Scale::new(0.0, 36.0),
                min_padding: 1.0,
                min_range: 3.0,
                tolerance: 0.5,
                step: 0.5,
                ceiling: None,
            },
            Self::Count => ProfileParams {
                default: Scale::new(0.0, 10.0),
                min_padding: 1.0,
                min_range: 4.0,
                tolerance: 1.0,
                step: 1.0,
                ceiling: None,
            },
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Gigabytes => "gigabytes",
            Self::Count => "count",
        }
    }
}

/// Axis bounds for one series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Scale {
    pub min: f64,
    pub max: f64,
}

impl Scale {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn range(&self) -> f64 {
        self.max - self.min
    }
}

/// Computes axis bounds for `samples`.
///
/// Steps, in order: min/max of finite values (profile default when none),
/// symmetric padding, minimum visible range re-centred on the midpoint,
/// floor snap to 0, ceiling snap, then rounding outward to the profile step.
pub fn scale(samples: &[Sample], profile: ScaleProfile, padding_pct: f64) -> Scale {
    scale_values(samples.iter().map(|s| s.v), profile, padding_pct)
}

/// Same as [`scale`] over bare values.
pub fn scale_values(
    values: impl IntoIterator<Item = f64>,
    profile: ScaleProfile,
    padding_pct: f64,
) -> Scale {
    let params = profile.params();

    let Some((min, max)) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    else {
        return params.default;
    };

    let padding_pct = if padding_pct.is_finite() && padding_pct >= 0.0 {
        padding_pct
    } else {
        DEFAULT_PADDING_PCT
    };

    let range = max - min;
    let pad = (range * padding_pct / 100.0).max(params.min_padding);
    let mut lo = min - pad;
    let mut hi = max + pad;

    if hi - lo < params.min_range {
        let mid = (min + max) / 2.0;
        lo = mid - params.min_range / 2.0;
        hi = mid + params.min_range / 2.0;
    }

    // Floor: only when no real value is negative.
    if min >= 0.0 && lo <= params.tolerance {
        lo = 0.0;
    }

    if let Some(ceiling) = params.ceiling {
        if max <= ceiling && hi >= ceiling - params.tolerance {
            hi = ceiling;
        }
    }

    let lo = (lo / params.step).floor() * params.step;
    let hi = (hi / params.step).ceil() * params.step;

    Scale::new(lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pct(values: &[f64]) -> Scale {
        scale_values(values.iter().copied(), ScaleProfile::Percentage, DEFAULT_PADDING_PCT)
    }

    #[test]
    fn test_empty_returns_profile_default() {
        assert_eq!(scale(&[], ScaleProfile::Percentage, 10.0), Scale::new(0.0, 100.0));
        assert_eq!(scale(&[], ScaleProfile::Gigabytes, 10.0), Scale::new(0.0, 36.0));
        assert_eq!(scale(&[], ScaleProfile::Count, 10.0), Scale::new(0.0, 10.0));
    }

    #[test]
    fn test_nan_only_returns_default() {
        assert_eq!(pct(&[f64::NAN, f64::INFINITY]), Scale::new(0.0, 100.0));
    }

    #[test]
    fn test_constant_series_is_centered_with_min_range() {
        let samples: Vec<Sample> = (0..10).map(|t| Sample::new(t, 50.0)).collect();
        let s = scale(&samples, ScaleProfile::Percentage, DEFAULT_PADDING_PCT);
        assert!(s.range() >= 8.0);
        assert_eq!((s.min + s.max) / 2.0, 50.0);
        assert_eq!(s, Scale::new(46.0, 54.0));
    }

    #[test]
    fn test_boundary_min_5_max_95_snaps_both_ends() {
        // pad 9 → [-4, 104]; both within tolerance 5 of the bounds.
        assert_eq!(pct(&[5.0, 50.0, 95.0]), Scale::new(0.0, 100.0));
    }

    #[test]
    fn test_lower_bound_exactly_at_tolerance_snaps() {
        // range 20, pad 2 → lower bound 5.0 exactly.
        assert_eq!(pct(&[7.0, 27.0]), Scale::new(0.0, 29.0));
    }

    #[test]
    fn test_lower_bound_just_above_tolerance_is_kept() {
        // range 20, pad 2 → lower bound 5.5, floored to 5.
        assert_eq!(pct(&[7.5, 27.5]), Scale::new(5.0, 30.0));
    }

    #[test]
    fn test_upper_bound_at_ceiling_tolerance_snaps() {
        // range 20, pad 2 → upper bound 95.0, exactly 100 - tolerance.
        assert_eq!(pct(&[73.0, 93.0]), Scale::new(71.0, 100.0));
    }

    #[test]
    fn test_negative_values_are_not_floored() {
        let s = scale_values([-3.0, 2.0], ScaleProfile::Count, DEFAULT_PADDING_PCT);
        assert!(s.min < 0.0, "{s:?}");
        assert_eq!(s, Scale::new(-4.0, 3.0));
    }

    #[test]
    fn test_operating_band_is_preserved() {
        let s = pct(&[40.0, 45.0, 60.0]);
        assert_eq!(s, Scale::new(38.0, 62.0));
    }

    #[test]
    fn test_gigabytes_half_unit_rounding() {
        let s = scale_values([8.2, 8.3, 8.4], ScaleProfile::Gigabytes, DEFAULT_PADDING_PCT);
        assert_eq!(s, Scale::new(6.5, 10.0));
    }

    #[test]
    fn test_count_has_no_ceiling_snap() {
        let s = scale_values([90.0, 98.0], ScaleProfile::Count, DEFAULT_PADDING_PCT);
        assert_eq!(s, Scale::new(89.0, 99.0));
    }

    #[test]
    fn test_profile_deserializes_lowercase() {
        let p: ScaleProfile = serde_yaml::from_str("gigabytes").expect("valid profile");
        assert_eq!(p, ScaleProfile::Gigabytes);
        assert!(serde_yaml::from_str::<ScaleProfile>("bytes").is_err());
    }
}
