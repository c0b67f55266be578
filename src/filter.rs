//! Validation and smoothing of successive samples before they are stored.

use std::collections::HashMap;

use serde::Deserialize;

use crate::event::extract::MEMORY_GB_KEY;
use crate::scale::ScaleProfile;
use crate::series::SeriesKey;

/// Per-series filter configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeriesRule {
    /// Inclusive domain `[min, max]` the emitted value is clamped to.
    pub clamp: Option<[f64; 2]>,
    /// A jump larger than this from the previous value is discarded.
    pub reject_threshold: Option<f64>,
    /// A jump larger than this (and not rejected) is averaged with the
    /// previous value.
    pub smooth_threshold: Option<f64>,
    pub scale: ScaleProfile,
}

impl SeriesRule {
    pub fn percentage() -> Self {
        Self {
            clamp: Some([0.0, 100.0]),
            scale: ScaleProfile::Percentage,
            ..Self::default()
        }
    }

    pub fn with_reject(mut self, threshold: f64) -> Self {
        self.reject_threshold = Some(threshold);
        self
    }

    pub fn with_smooth(mut self, threshold: f64) -> Self {
        self.smooth_threshold = Some(threshold);
        self
    }

    fn clamp_value(&self, v: f64) -> f64 {
        match self.clamp {
            Some([lo, hi]) => v.clamp(lo, hi),
            None => v,
        }
    }
}

/// Outcome of validating one raw value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Stored unchanged.
    Accepted(f64),
    /// Stored after domain clamping.
    Clamped(f64),
    /// Jump too large; the previous value is reused.
    Rejected(f64),
    /// Jump large; the rounded mean of raw and previous is stored.
    Smoothed(f64),
    /// Non-finite input; nothing is stored.
    Absent,
}

impl Verdict {
    /// The value to store, if any.
    pub fn value(&self) -> Option<f64> {
        match *self {
            Self::Accepted(v) | Self::Clamped(v) | Self::Rejected(v) | Self::Smoothed(v) => Some(v),
            Self::Absent => None,
        }
    }
}

/// Validates `raw` against `rule` given the most recent accepted value.
///
/// Jump size is measured on the unclamped raw value so an out-of-domain spike
/// is still recognised as one. Rejection takes precedence over smoothing; the
/// emitted value is always within the clamp domain.
pub fn validate(rule: &SeriesRule, raw: f64, previous: Option<f64>) -> Verdict {
    if !raw.is_finite() {
        return Verdict::Absent;
    }

    if let Some(prev) = previous.filter(|p| p.is_finite()) {
        let delta = (raw - prev).abs();

        if rule.reject_threshold.is_some_and(|t| delta > t) {
            return Verdict::Rejected(prev);
        }

        if rule.smooth_threshold.is_some_and(|t| delta > t) {
            return Verdict::Smoothed(rule.clamp_value(((raw + prev) / 2.0).round()));
        }
    }

    let v = rule.clamp_value(raw);
    if v != raw {
        Verdict::Clamped(v)
    } else {
        Verdict::Accepted(v)
    }
}

/// Rules for every known series, with a pass-through fallback.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: HashMap<SeriesKey, SeriesRule>,
    fallback: SeriesRule,
}

impl RuleSet {
    /// Built-in rules for the standard system series.
    pub fn defaults() -> Self {
        let mut rules = HashMap::with_capacity(4);
        rules.insert(SeriesKey::from("cpu"), SeriesRule::percentage().with_smooth(80.0));
        rules.insert(SeriesKey::from("memory"), SeriesRule::percentage().with_reject(50.0));
        rules.insert(SeriesKey::from("disk"), SeriesRule::percentage());
        rules.insert(
            SeriesKey::from(MEMORY_GB_KEY),
            SeriesRule {
                scale: ScaleProfile::Gigabytes,
                ..SeriesRule::default()
            },
        );

        Self {
            rules,
            fallback: SeriesRule::default(),
        }
    }

    /// Defaults with per-key overrides applied. An override replaces the
    /// whole rule for its key.
    pub fn with_overrides<'a>(
        overrides: impl IntoIterator<Item = (&'a String, &'a SeriesRule)>,
    ) -> Self {
        let mut set = Self::defaults();
        for (key, rule) in overrides {
            set.rules.insert(SeriesKey::from(key.as_str()), rule.clone());
        }
        set
    }

    pub fn for_key(&self, key: &SeriesKey) -> &SeriesRule {
        self.rules.get(key).unwrap_or(&self.fallback)
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::defaults()
    }
}
