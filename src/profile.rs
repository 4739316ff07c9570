//! Statistical constraint extraction.
//!
//! Three bounded accumulators consume the same normalized documents: array
//! lengths per path, numeric value ranges per path, and a document-size
//! histogram over a cheap proxy. Their output is the constraints profile
//! consumed by the synthesizer and the validator.

use crate::freq::{DistributionStats, FrequencyMap};
use crate::infer::ObjectKeysAnalysis;
use crate::value::{join_path, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Distinct values tracked per numeric path before the histogram stops
/// admitting new keys.
const NUMERIC_CARDINALITY_CAP: u64 = 1000;

/// Distinct proxy values tracked for the size histogram.
const PROXY_CARDINALITY_CAP: u64 = 10_000;

/// Array length statistics for one path.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayLengthStats {
    /// Dotted path of the array field.
    #[serde(default)]
    pub field_path: String,
    /// Histogram of observed lengths.
    pub distribution: FrequencyMap,
    /// Stats over the histogram.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<DistributionStats>,
    /// Arrays observed at the path.
    pub arrays_analyzed: u64,
}

impl ArrayLengthStats {
    fn from_distribution(field_path: String, distribution: FrequencyMap) -> Self {
        ArrayLengthStats {
            field_path,
            stats: distribution.stats(),
            arrays_analyzed: distribution.total(),
            distribution,
        }
    }
}

/// Whether a numeric path held only integers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericType {
    /// Every observed value was integral.
    Integer,
    /// At least one observed value had a fraction.
    Float,
}

/// Numeric range statistics for one path.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumericRangeStats {
    /// Dotted path of the numeric field.
    #[serde(default)]
    pub field_path: String,
    /// Histogram of observed values; approximate once the cardinality cap
    /// was reached.
    pub distribution: FrequencyMap,
    /// Stats over the histogram, min/max corrected from exact tracking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<DistributionStats>,
    /// Values observed, including those beyond the cap.
    pub values_analyzed: u64,
    /// Integer or float.
    pub value_type: NumericType,
    /// Whether every value was ≥ 0.
    pub all_positive: bool,
    /// Arithmetic mean over all values.
    pub mean: f64,
    /// Population standard deviation over all values.
    pub std_dev: f64,
}

/// The scalar standing in for document size.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SizeProxy {
    /// Number of scalar leaves.
    LeafFieldCount,
    /// Sum of all array lengths.
    ArrayLengthSum,
    /// Serialized JSON byte length.
    ByteSize,
}

impl Default for SizeProxy {
    fn default() -> Self {
        SizeProxy::LeafFieldCount
    }
}

/// Half-open size range `[min, max)`; `max` absent in the last bucket.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SizeRange {
    /// Inclusive lower bound.
    pub min: u64,
    /// Exclusive upper bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
}

impl SizeRange {
    fn contains(&self, size: u64) -> bool {
        size >= self.min && self.max.map_or(true, |max| size < max)
    }
}

/// One bucket of the document-size histogram.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSizeBucket {
    /// Position of this bucket, smallest sizes first.
    pub bucket_id: u32,
    /// The covered size range.
    pub size_range: SizeRange,
    /// Which proxy the sizes were measured with.
    pub size_proxy: SizeProxy,
    /// Documents landing in this bucket.
    pub count: u64,
    /// `count / documents`; all bucket probabilities sum to 1.
    pub probability: f64,
}

/// How array bounds are derived from the observed distribution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArrayLenPolicy {
    /// `minItems`/`maxItems` are the observed extremes.
    Minmax,
    /// Bounds interpolated at the configured clamp percentiles.
    PercentileClamp,
}

impl Default for ArrayLenPolicy {
    fn default() -> Self {
        ArrayLenPolicy::Minmax
    }
}

/// Uniqueness configuration for one key field.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFieldConfig {
    /// Dotted path of the key field.
    pub field_path: String,
    /// Whether generated values must be unique within a run.
    pub enforce_uniqueness: bool,
}

/// The key fields of the collection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFields {
    /// The primary key; uniqueness is always enforced at run scope.
    #[serde(rename = "_id")]
    pub id: KeyFieldConfig,
    /// Further unique keys, by dotted path.
    #[serde(default)]
    pub additional_keys: Vec<KeyFieldConfig>,
}

impl Default for KeyFields {
    fn default() -> Self {
        KeyFields {
            id: KeyFieldConfig {
                field_path: "_id".to_owned(),
                enforce_uniqueness: true,
            },
            additional_keys: Vec::new(),
        }
    }
}

/// Profile-wide settings recorded in the artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileSettings {
    /// Array bound policy.
    pub array_len_policy: ArrayLenPolicy,
    /// Percentiles reported in deviation checks.
    pub percentiles: Vec<f64>,
    /// `[lo, hi]` percentile pair for [`ArrayLenPolicy::PercentileClamp`].
    pub clamp_range: [f64; 2],
}

impl Default for ProfileSettings {
    fn default() -> Self {
        ProfileSettings {
            array_len_policy: ArrayLenPolicy::Minmax,
            percentiles: vec![0.5, 0.9, 0.99],
            clamp_range: [0.05, 0.95],
        }
    }
}

/// Profiler tuning.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileConfig {
    /// Which size proxy to measure.
    pub size_proxy: SizeProxy,
    /// Explicit bucket boundaries; auto-derived from proxy percentiles when
    /// absent.
    pub bucket_boundaries: Option<Vec<u64>>,
    /// Percentiles used to auto-derive boundaries.
    pub bucket_percentiles: Vec<f64>,
    /// Settings copied into the artifact.
    pub settings: ProfileSettings,
    /// Additional unique key paths.
    pub additional_keys: Vec<String>,
}

/// The constraints profile artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintsProfile {
    /// Array stats keyed by path. Accepts the legacy `observedLengths`
    /// entry shape on read.
    #[serde(deserialize_with = "deserialize_array_stats")]
    pub array_stats: BTreeMap<String, ArrayLengthStats>,
    /// Numeric stats keyed by path.
    pub numeric_ranges: BTreeMap<String, NumericRangeStats>,
    /// Document-size histogram.
    pub size_buckets: Vec<DocumentSizeBucket>,
    /// Key uniqueness configuration.
    #[serde(default)]
    pub key_fields: KeyFields,
    /// Settings the profile was computed under.
    #[serde(default)]
    pub config: ProfileSettings,
    /// Dynamic-key analyses carried over from inference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_key_stats: Option<BTreeMap<String, ObjectKeysAnalysis>>,
}

impl ConstraintsProfile {
    /// Restores invariants after deserialization: map keys win over embedded
    /// paths, and stats missing from legacy entries are recomputed.
    pub fn normalize(&mut self) {
        for (path, stats) in &mut self.array_stats {
            stats.field_path = path.clone();
            if stats.stats.is_none() {
                stats.stats = stats.distribution.stats();
            }
            if stats.arrays_analyzed == 0 {
                stats.arrays_analyzed = stats.distribution.total();
            }
        }
        for (path, stats) in &mut self.numeric_ranges {
            stats.field_path = path.clone();
            if stats.stats.is_none() {
                stats.stats = stats.distribution.stats();
            }
        }
    }
}

// Legacy constraint files stored raw length arrays instead of histograms.
// Recompute the histogram on read so downstream code sees one shape only.
impl ArrayLengthStats {
    fn from_legacy(observed_lengths: &[u64]) -> Self {
        let mut distribution = FrequencyMap::new();
        for len in observed_lengths {
            distribution.add_sample(*len as f64);
        }
        ArrayLengthStats::from_distribution(String::new(), distribution)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ArrayStatsRepr {
    Legacy {
        #[serde(rename = "observedLengths")]
        observed_lengths: Vec<u64>,
    },
    Current {
        #[serde(rename = "fieldPath", default)]
        field_path: String,
        distribution: FrequencyMap,
        #[serde(default)]
        stats: Option<DistributionStats>,
        #[serde(rename = "arraysAnalyzed", default)]
        arrays_analyzed: u64,
    },
}

impl From<ArrayStatsRepr> for ArrayLengthStats {
    fn from(repr: ArrayStatsRepr) -> Self {
        match repr {
            ArrayStatsRepr::Legacy { observed_lengths } => {
                ArrayLengthStats::from_legacy(&observed_lengths)
            }
            ArrayStatsRepr::Current {
                field_path,
                distribution,
                stats,
                arrays_analyzed,
            } => ArrayLengthStats {
                field_path,
                stats: stats.or_else(|| distribution.stats()),
                arrays_analyzed: if arrays_analyzed == 0 {
                    distribution.total()
                } else {
                    arrays_analyzed
                },
                distribution,
            },
        }
    }
}

/// Deserializes an array-stats map accepting both the current and the legacy
/// entry shape.
pub fn deserialize_array_stats<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, ArrayLengthStats>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, ArrayStatsRepr>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(path, repr)| {
            let mut stats = ArrayLengthStats::from(repr);
            stats.field_path = path.clone();
            (path, stats)
        })
        .collect())
}

#[derive(Default)]
struct NumericAcc {
    distribution: FrequencyMap,
    truncated: bool,
    values: u64,
    all_positive: bool,
    all_integer: bool,
    min: f64,
    max: f64,
    // Welford online mean/variance.
    mean: f64,
    m2: f64,
}

impl NumericAcc {
    fn new() -> Self {
        NumericAcc {
            all_positive: true,
            all_integer: true,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            ..Default::default()
        }
    }

    fn add(&mut self, value: f64, is_integer: bool) {
        self.values += 1;
        self.all_positive &= value >= 0.0;
        self.all_integer &= is_integer;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        let delta = value - self.mean;
        self.mean += delta / self.values as f64;
        self.m2 += delta * (value - self.mean);

        let key_exists = self
            .distribution
            .counts()
            .contains_key(&crate::freq::numeric_key(value));
        if key_exists || self.distribution.unique() < NUMERIC_CARDINALITY_CAP {
            self.distribution.add_sample(value);
        } else {
            self.truncated = true;
        }
    }

    fn finish(self, field_path: String) -> NumericRangeStats {
        let mut stats = self.distribution.stats();
        if let Some(stats) = stats.as_mut() {
            // The histogram may have dropped extremes past the cap; the
            // tracked bounds are exact.
            stats.min = self.min;
            stats.max = self.max;
        }
        NumericRangeStats {
            field_path,
            distribution: self.distribution,
            stats,
            values_analyzed: self.values,
            value_type: if self.all_integer {
                NumericType::Integer
            } else {
                NumericType::Float
            },
            all_positive: self.all_positive,
            mean: self.mean,
            std_dev: if self.values == 0 {
                0.0
            } else {
                (self.m2 / self.values as f64).sqrt()
            },
        }
    }
}

/// Streaming profiler. Feed normalized documents with
/// [`observe`](Profiler::observe), then [`finish`](Profiler::finish).
#[derive(Debug, Default)]
pub struct Profiler {
    config: ProfileConfig,
    arrays: BTreeMap<String, FrequencyMap>,
    numerics: BTreeMap<String, NumericAccWrapper>,
    proxies: FrequencyMap,
    proxies_truncated: bool,
    documents: u64,
}

// NumericAcc has no Debug on purpose (Welford internals); wrap for the
// profiler's derive.
struct NumericAccWrapper(NumericAcc);

impl std::fmt::Debug for NumericAccWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NumericAcc")
            .field("values", &self.0.values)
            .finish()
    }
}

impl Profiler {
    /// Builds a profiler with the given configuration.
    pub fn new(config: ProfileConfig) -> Self {
        Profiler {
            config,
            ..Default::default()
        }
    }

    /// Records one normalized document. Non-objects are silently skipped.
    pub fn observe(&mut self, document: &Value) {
        let Value::Object(map) = document else { return };
        self.documents += 1;

        let proxy = match self.config.size_proxy {
            SizeProxy::LeafFieldCount => document.leaf_count(),
            SizeProxy::ArrayLengthSum => document.array_length_sum(),
            SizeProxy::ByteSize => document.byte_size(),
        };
        let key_exists = self
            .proxies
            .counts()
            .contains_key(&crate::freq::numeric_key(proxy as f64));
        if key_exists || self.proxies.unique() < PROXY_CARDINALITY_CAP {
            self.proxies.add_sample(proxy as f64);
        } else {
            self.proxies_truncated = true;
        }

        for (key, child) in map {
            self.walk(&join_path("", key), child);
        }
    }

    fn walk(&mut self, path: &str, value: &Value) {
        match value {
            Value::Int(i) => self
                .numerics
                .entry(path.to_owned())
                .or_insert_with(|| NumericAccWrapper(NumericAcc::new()))
                .0
                .add(*i as f64, true),
            Value::Float(f) => self
                .numerics
                .entry(path.to_owned())
                .or_insert_with(|| NumericAccWrapper(NumericAcc::new()))
                .0
                .add(*f, false),
            Value::Array(items) => {
                self.arrays
                    .entry(path.to_owned())
                    .or_default()
                    .add_sample(items.len() as f64);
                for item in items {
                    self.walk(path, item);
                }
            }
            Value::Object(map) => {
                for (key, child) in map {
                    self.walk(&join_path(path, key), child);
                }
            }
            _ => {}
        }
    }

    /// Number of documents observed so far.
    pub fn documents_analyzed(&self) -> u64 {
        self.documents
    }

    /// Produces the constraints profile. Array stats nested under a
    /// dynamic-key path are stripped: those paths are not statically
    /// reachable in the emitted schema.
    pub fn finish(
        self,
        dynamic_keys: &BTreeMap<String, ObjectKeysAnalysis>,
    ) -> ConstraintsProfile {
        if self.proxies_truncated {
            tracing::debug!(cap = PROXY_CARDINALITY_CAP, "size-proxy histogram truncated");
        }
        let array_stats: BTreeMap<String, ArrayLengthStats> = self
            .arrays
            .into_iter()
            .filter(|(path, _)| {
                !dynamic_keys
                    .keys()
                    .any(|dynamic| path.starts_with(&format!("{dynamic}.")))
            })
            .map(|(path, distribution)| {
                let stats = ArrayLengthStats::from_distribution(path.clone(), distribution);
                (path, stats)
            })
            .collect();

        let numeric_ranges = self
            .numerics
            .into_iter()
            .map(|(path, acc)| {
                let stats = acc.0.finish(path.clone());
                (path, stats)
            })
            .collect();

        let size_buckets = bucketize(
            &self.proxies,
            self.config.size_proxy,
            self.config.bucket_boundaries.as_deref(),
            &self.config.bucket_percentiles,
            self.documents,
        );

        ConstraintsProfile {
            array_stats,
            numeric_ranges,
            size_buckets,
            key_fields: KeyFields {
                id: KeyFieldConfig {
                    field_path: "_id".to_owned(),
                    enforce_uniqueness: true,
                },
                additional_keys: self
                    .config
                    .additional_keys
                    .iter()
                    .map(|path| KeyFieldConfig {
                        field_path: path.clone(),
                        enforce_uniqueness: true,
                    })
                    .collect(),
            },
            config: self.config.settings,
            dynamic_key_stats: if dynamic_keys.is_empty() {
                None
            } else {
                Some(dynamic_keys.clone())
            },
        }
    }
}

/// Partitions the non-negative integers into buckets and counts the proxy
/// histogram into them. Boundaries come from config, or from percentiles of
/// the observed proxies.
fn bucketize(
    proxies: &FrequencyMap,
    size_proxy: SizeProxy,
    boundaries: Option<&[u64]>,
    percentiles: &[f64],
    documents: u64,
) -> Vec<DocumentSizeBucket> {
    if documents == 0 {
        return Vec::new();
    }
    let mut bounds: Vec<u64> = match boundaries {
        Some(explicit) => explicit.to_vec(),
        None => {
            let defaults = [0.25, 0.5, 0.75, 0.9];
            let cuts: &[f64] = if percentiles.is_empty() {
                &defaults
            } else {
                percentiles
            };
            cuts.iter()
                .filter_map(|p| proxies.value_at_fraction(*p))
                .map(|v| v.ceil() as u64 + 1)
                .collect()
        }
    };
    bounds.sort_unstable();
    bounds.dedup();
    bounds.retain(|bound| *bound > 0);

    let mut ranges = Vec::with_capacity(bounds.len() + 1);
    let mut lower = 0;
    for bound in bounds {
        ranges.push(SizeRange {
            min: lower,
            max: Some(bound),
        });
        lower = bound;
    }
    ranges.push(SizeRange { min: lower, max: None });

    ranges
        .into_iter()
        .enumerate()
        .map(|(id, size_range)| {
            let count: u64 = proxies
                .counts()
                .iter()
                .filter_map(|(key, count)| {
                    let size = key.parse::<f64>().ok()? as u64;
                    size_range.contains(size).then_some(*count)
                })
                .sum();
            DocumentSizeBucket {
                bucket_id: id as u32,
                size_range,
                size_proxy,
                count,
                probability: count as f64 / documents as f64,
            }
        })
        .collect()
}
