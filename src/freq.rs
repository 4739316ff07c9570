//! Frequency-map primitives.
//!
//! A [`FrequencyMap`] is a compact histogram from a stringified numeric value
//! to a positive count. It is the common currency between the profiler, the
//! synthesizer (as the `x-array-length-distribution` payload) and the
//! generator, which samples it by a uniform draw.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Histogram of observed values. Keys are stored lexicographically but are
/// semantically numeric; every traversal that cares about order re-sorts by
/// numeric value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FrequencyMap {
    counts: BTreeMap<String, u64>,
}

/// Summary statistics derived from a [`FrequencyMap`].
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionStats {
    /// Smallest observed value.
    pub min: f64,
    /// Largest observed value.
    pub max: f64,
    /// Value at rank ⌈total/2⌉.
    pub median: f64,
    /// Value at rank ⌈0.95·total⌉.
    pub p95: f64,
    /// Sum of all counts.
    pub total: u64,
    /// Number of distinct values.
    pub unique: u64,
}

/// Formats a numeric key the way the artifacts store it: integral values
/// print without a fraction so `3` and `3.0` collapse into one bucket.
pub fn numeric_key(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

impl FrequencyMap {
    /// An empty histogram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no samples were recorded.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Number of distinct values.
    pub fn unique(&self) -> u64 {
        self.counts.len() as u64
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Records one observation of `value`.
    pub fn add_sample(&mut self, value: f64) {
        self.add_count(value, 1);
    }

    /// Records `count` observations of `value`.
    pub fn add_count(&mut self, value: f64, count: u64) {
        if count > 0 {
            *self.counts.entry(numeric_key(value)).or_insert(0) += count;
        }
    }

    /// Folds another histogram into this one.
    pub fn merge(&mut self, other: &FrequencyMap) {
        for (key, count) in &other.counts {
            *self.counts.entry(key.clone()).or_insert(0) += count;
        }
    }

    /// Raw view of the counts, keyed by stringified value.
    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }

    /// Entries sorted by numeric value, smallest first. Keys that fail to
    /// parse sort last, ordered by their string form.
    fn sorted_numeric(&self) -> Vec<(f64, u64)> {
        let mut entries: Vec<(f64, &str, u64)> = self
            .counts
            .iter()
            .map(|(key, count)| (key.parse::<f64>().unwrap_or(f64::INFINITY), key.as_str(), *count))
            .collect();
        entries.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        entries.into_iter().map(|(value, _, count)| (value, count)).collect()
    }

    /// Derives summary statistics, or `None` for an empty histogram.
    pub fn stats(&self) -> Option<DistributionStats> {
        let entries = self.sorted_numeric();
        let (first, last) = (entries.first()?, entries.last()?);
        let total: u64 = entries.iter().map(|(_, count)| count).sum();
        Some(DistributionStats {
            min: first.0,
            max: last.0,
            median: self.value_at_fraction(0.5)?,
            p95: self.value_at_fraction(0.95)?,
            total,
            unique: entries.len() as u64,
        })
    }

    /// The value at rank ⌈fraction·total⌉ in numeric order (1-based rank,
    /// clamped to at least 1).
    pub fn value_at_fraction(&self, fraction: f64) -> Option<f64> {
        let entries = self.sorted_numeric();
        let total: u64 = entries.iter().map(|(_, count)| count).sum();
        if total == 0 {
            return None;
        }
        let rank = ((fraction * total as f64).ceil() as u64).max(1);
        let mut cumulative = 0;
        for (value, count) in &entries {
            cumulative += count;
            if cumulative >= rank {
                return Some(*value);
            }
        }
        entries.last().map(|(value, _)| *value)
    }

    /// Weighted sampling: walks values in numeric order accumulating a
    /// running fraction of the total, returning the first value whose
    /// running fraction exceeds `u`. Ties break toward the smaller value.
    pub fn sample(&self, u: f64) -> Option<f64> {
        let entries = self.sorted_numeric();
        let total: u64 = entries.iter().map(|(_, count)| count).sum();
        if total == 0 {
            return None;
        }
        let mut running = 0.0;
        for (value, count) in &entries {
            running += *count as f64 / total as f64;
            if running > u {
                return Some(*value);
            }
        }
        entries.last().map(|(value, _)| *value)
    }
}

impl<'de> Deserialize<'de> for FrequencyMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Zero counts would violate the histogram invariant; drop them on read.
        let raw = BTreeMap::<String, u64>::deserialize(deserializer)?;
        Ok(FrequencyMap {
            counts: raw.into_iter().filter(|(_, count)| *count > 0).collect(),
        })
    }
}

impl FromIterator<(f64, u64)> for FrequencyMap {
    fn from_iter<I: IntoIterator<Item = (f64, u64)>>(iter: I) -> Self {
        let mut map = FrequencyMap::new();
        for (value, count) in iter {
            map.add_count(value, count);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lengths() -> FrequencyMap {
        // 10 twos, 20 threes, 5 fives.
        [(2.0, 10), (3.0, 20), (5.0, 5)].into_iter().collect()
    }

    #[test]
    fn stats_walk_numeric_order() {
        let stats = lengths().stats().unwrap();
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.total, 35);
        assert_eq!(stats.unique, 3);
        // rank ⌈35/2⌉ = 18 lands inside the threes.
        assert_eq!(stats.median, 3.0);
        // rank ⌈0.95·35⌉ = 34 lands inside the fives.
        assert_eq!(stats.p95, 5.0);
    }

    #[test]
    fn keys_sort_numerically_not_lexicographically() {
        let map: FrequencyMap = [(10.0, 1), (2.0, 1), (100.0, 1)].into_iter().collect();
        let stats = map.stats().unwrap();
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 100.0);
        assert_eq!(stats.median, 10.0);
    }

    #[test]
    fn sampling_covers_the_distribution() {
        let map = lengths();
        assert_eq!(map.sample(0.0), Some(2.0));
        // First 10/35 of the mass is twos.
        assert_eq!(map.sample(10.0 / 35.0 - 1e-9), Some(2.0));
        assert_eq!(map.sample(10.0 / 35.0 + 1e-9), Some(3.0));
        assert_eq!(map.sample(0.999), Some(5.0));
        assert_eq!(FrequencyMap::new().sample(0.5), None);
    }

    #[test]
    fn merge_adds_counts() {
        let mut a = lengths();
        a.merge(&lengths());
        assert_eq!(a.total(), 70);
        assert_eq!(a.unique(), 3);
    }

    #[test]
    fn serde_round_trip_uses_string_keys() {
        let json = serde_json::to_value(lengths()).unwrap();
        assert_eq!(json["2"], 10);
        let back: FrequencyMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, lengths());
    }

    #[test]
    fn zero_counts_dropped_on_read() {
        let back: FrequencyMap = serde_json::from_str(r#"{"1": 0, "2": 3}"#).unwrap();
        assert_eq!(back.unique(), 1);
        assert_eq!(back.total(), 3);
    }
}
