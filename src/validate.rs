//! Streaming conformance and quality validation.
//!
//! Consumes a generated document stream and runs four accumulators side by
//! side: compiled-schema conformance, array-length statistics, size-bucket
//! statistics, and per-key uniqueness. After the stream closes the observed
//! statistics are compared against the sample's constraints profile and
//! judged within configured tolerances.

use crate::error::Error;
use crate::freq::FrequencyMap;
use crate::keypattern::KeyPattern;
use crate::profile::{ConstraintsProfile, SizeProxy};
use crate::value::{join_path, Value};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::collections::{BTreeMap, HashSet};

/// Validator tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidateConfig {
    /// Allowed relative deviation per array percentile.
    pub array_length_tolerance: f64,
    /// Allowed absolute deviation per bucket probability.
    pub size_bucket_tolerance: f64,
    /// Retained schema-violation records.
    pub max_violations: usize,
}

impl Default for ValidateConfig {
    fn default() -> Self {
        ValidateConfig {
            array_length_tolerance: 0.1,
            size_bucket_tolerance: 0.2,
            max_violations: 1000,
        }
    }
}

/// One retained schema violation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaViolation {
    /// Zero-based index of the offending document in the stream.
    pub document_index: u64,
    /// JSON pointer into the document.
    pub instance_path: String,
    /// Human-readable description.
    pub message: String,
}

/// Array-length deviation at one percentile of one path.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayDeviation {
    /// The array path.
    pub path: String,
    /// The compared percentile.
    pub percentile: f64,
    /// Sample-side value.
    pub sample: f64,
    /// Generated-side value.
    pub generated: f64,
    /// `|generated − sample| / sample`, with 0-sample handling.
    pub deviation: f64,
    /// Whether the deviation is within tolerance.
    pub within_tolerance: bool,
}

/// Probability deviation of one size bucket.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketDeviation {
    /// The bucket position.
    pub bucket_id: u32,
    /// Sample-side probability.
    pub sample_probability: f64,
    /// Generated-side probability.
    pub generated_probability: f64,
    /// Absolute probability difference.
    pub deviation: f64,
    /// Whether the deviation is within tolerance.
    pub within_tolerance: bool,
}

/// Uniqueness outcome for one key field.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniquenessReport {
    /// The key path.
    pub field_path: String,
    /// Values observed at the path.
    pub total: u64,
    /// Distinct values observed.
    pub distinct: u64,
    /// `total − distinct`.
    pub duplicates: u64,
    /// Whether no duplicates were seen.
    pub passed: bool,
}

/// The final validation report.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Documents consumed.
    pub total_documents: u64,
    /// Documents passing schema conformance.
    pub valid_documents: u64,
    /// `valid / total` (1 for an empty stream).
    pub conformance_rate: f64,
    /// Retained violations, capped at `maxViolations`.
    pub violations: Vec<SchemaViolation>,
    /// Whether violations were dropped past the cap.
    pub violations_truncated: bool,
    /// Array-length deviations per path and percentile.
    pub array_deviations: Vec<ArrayDeviation>,
    /// Size-bucket probability deviations.
    pub size_bucket_deviations: Vec<BucketDeviation>,
    /// True when the sample profile carried no buckets and the bucket
    /// accumulator disabled itself.
    pub size_buckets_skipped: bool,
    /// Per-key uniqueness results.
    pub uniqueness: Vec<UniquenessReport>,
    /// The overall verdict.
    pub overall_passed: bool,
}

/// Rewrites `x-dynamic-keys` subtrees into validatable form: runtime keys
/// cannot be enumerated, so the subtree constrains key shape via
/// `propertyNames.pattern` and value shape via `additionalProperties`.
pub fn conformance_schema(schema: &Json) -> Json {
    let mut schema = schema.clone();
    rewrite_dynamic(&mut schema);
    schema
}

fn rewrite_dynamic(node: &mut Json) {
    let Some(map) = node.as_object_mut() else { return };
    if let Some(annotation) = map.remove("x-dynamic-keys") {
        let pattern = annotation
            .get("metadata")
            .and_then(|m| m.get("pattern"))
            .and_then(|p| serde_json::from_value::<KeyPattern>(p.clone()).ok());
        let source = match pattern {
            Some(KeyPattern::Custom) => annotation
                .get("metadata")
                .and_then(|m| m.get("customPattern"))
                .and_then(Json::as_str)
                .map(str::to_owned),
            Some(builtin) => builtin.portable_source().map(str::to_owned),
            None => None,
        };
        if let Some(source) = source {
            map.insert("propertyNames".to_owned(), json!({"pattern": source}));
        }
        let mut value_schema = annotation
            .get("valueSchema")
            .and_then(|vs| vs.get("schemas"))
            .and_then(Json::as_array)
            .and_then(|schemas| schemas.first().cloned())
            .unwrap_or(json!(true));
        rewrite_dynamic(&mut value_schema);
        map.insert("additionalProperties".to_owned(), value_schema);
    }
    if let Some(properties) = map.get_mut("properties").and_then(Json::as_object_mut) {
        for child in properties.values_mut() {
            rewrite_dynamic(child);
        }
    }
    if let Some(items) = map.get_mut("items") {
        rewrite_dynamic(items);
    }
    if let Some(additional) = map.get_mut("additionalProperties") {
        if additional.is_object() {
            rewrite_dynamic(additional);
        }
    }
}

struct KeyTracker {
    field_path: String,
    seen: HashSet<String>,
    total: u64,
    duplicates: u64,
}

/// The streaming validator.
pub struct StreamingValidator {
    validator: jsonschema::Validator,
    profile: ConstraintsProfile,
    config: ValidateConfig,
    arrays: BTreeMap<String, FrequencyMap>,
    bucket_counts: Vec<u64>,
    size_proxy: Option<SizeProxy>,
    keys: Vec<KeyTracker>,
    violations: Vec<SchemaViolation>,
    violations_truncated: bool,
    total: u64,
    valid: u64,
}

impl std::fmt::Debug for StreamingValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingValidator")
            .field("total", &self.total)
            .field("valid", &self.valid)
            .finish()
    }
}

impl StreamingValidator {
    /// Compiles the generation schema and prepares the accumulators from the
    /// sample profile. The bucket accumulator is initialized from the
    /// sample's bucket definitions only; with zero buckets it stays off.
    pub fn new(
        schema: &Json,
        profile: ConstraintsProfile,
        config: ValidateConfig,
    ) -> Result<Self, Error> {
        let conformance = conformance_schema(schema);
        let validator = jsonschema::options()
            .with_draft(jsonschema::Draft::Draft7)
            .build(&conformance)
            .map_err(|e| Error::SchemaCompile(e.to_string()))?;

        let mut keys = vec![&profile.key_fields.id]
            .into_iter()
            .chain(profile.key_fields.additional_keys.iter())
            .filter(|key| key.enforce_uniqueness)
            .map(|key| KeyTracker {
                field_path: key.field_path.clone(),
                seen: HashSet::new(),
                total: 0,
                duplicates: 0,
            })
            .collect::<Vec<_>>();
        // `_id` is always checked, even if the profile says otherwise.
        if !keys.iter().any(|tracker| tracker.field_path == "_id") {
            keys.insert(
                0,
                KeyTracker {
                    field_path: "_id".to_owned(),
                    seen: HashSet::new(),
                    total: 0,
                    duplicates: 0,
                },
            );
        }

        Ok(StreamingValidator {
            validator,
            bucket_counts: vec![0; profile.size_buckets.len()],
            size_proxy: profile.size_buckets.first().map(|bucket| bucket.size_proxy),
            keys,
            arrays: BTreeMap::new(),
            violations: Vec::new(),
            violations_truncated: false,
            total: 0,
            valid: 0,
            profile,
            config,
        })
    }

    /// Feeds one document through all accumulators.
    pub fn observe(&mut self, document: &Value) {
        let index = self.total;
        self.total += 1;

        let instance = document.to_json();
        let mut conforming = true;
        for violation in self.validator.iter_errors(&instance) {
            conforming = false;
            if self.violations.len() < self.config.max_violations {
                self.violations.push(SchemaViolation {
                    document_index: index,
                    instance_path: violation.instance_path.to_string(),
                    message: violation.to_string(),
                });
            } else {
                self.violations_truncated = true;
                break;
            }
        }
        if conforming {
            self.valid += 1;
        }

        if let Value::Object(map) = document {
            for (name, child) in map {
                self.walk_arrays(&join_path("", name), child);
            }
        }

        if let Some(proxy) = self.size_proxy {
            let size = match proxy {
                SizeProxy::LeafFieldCount => document.leaf_count(),
                SizeProxy::ArrayLengthSum => document.array_length_sum(),
                SizeProxy::ByteSize => document.byte_size(),
            };
            for (bucket, count) in self.profile.size_buckets.iter().zip(&mut self.bucket_counts) {
                let in_range = size >= bucket.size_range.min
                    && bucket.size_range.max.map_or(true, |max| size < max);
                if in_range {
                    *count += 1;
                    break;
                }
            }
        }

        for tracker in &mut self.keys {
            if let Some(value) = document.pointer(&tracker.field_path) {
                tracker.total += 1;
                if !tracker.seen.insert(value.to_string()) {
                    tracker.duplicates += 1;
                }
            }
        }
    }

    fn walk_arrays(&mut self, path: &str, value: &Value) {
        match value {
            Value::Array(items) => {
                // Only paths the sample profiled are compared.
                if self.profile.array_stats.contains_key(path) {
                    self.arrays
                        .entry(path.to_owned())
                        .or_default()
                        .add_sample(items.len() as f64);
                }
                for item in items {
                    self.walk_arrays(path, item);
                }
            }
            Value::Object(map) => {
                for (name, child) in map {
                    self.walk_arrays(&join_path(path, name), child);
                }
            }
            _ => {}
        }
    }

    /// Closes the stream and produces the report.
    pub fn finish(self) -> ValidationReport {
        let conformance_rate = if self.total == 0 {
            1.0
        } else {
            self.valid as f64 / self.total as f64
        };

        let mut array_deviations = Vec::new();
        for (path, sample_stats) in &self.profile.array_stats {
            let generated = self.arrays.get(path);
            for percentile in &self.profile.config.percentiles {
                let sample_px = sample_stats
                    .distribution
                    .value_at_fraction(*percentile)
                    .unwrap_or(0.0);
                let generated_px = generated
                    .and_then(|dist| dist.value_at_fraction(*percentile))
                    .unwrap_or(0.0);
                let deviation = relative_deviation(sample_px, generated_px);
                array_deviations.push(ArrayDeviation {
                    path: path.clone(),
                    percentile: *percentile,
                    sample: sample_px,
                    generated: generated_px,
                    deviation,
                    within_tolerance: deviation <= self.config.array_length_tolerance,
                });
            }
        }

        let size_buckets_skipped = self.profile.size_buckets.is_empty();
        let size_bucket_deviations: Vec<BucketDeviation> = self
            .profile
            .size_buckets
            .iter()
            .zip(&self.bucket_counts)
            .map(|(bucket, count)| {
                let generated_probability = if self.total == 0 {
                    0.0
                } else {
                    *count as f64 / self.total as f64
                };
                let deviation = (generated_probability - bucket.probability).abs();
                BucketDeviation {
                    bucket_id: bucket.bucket_id,
                    sample_probability: bucket.probability,
                    generated_probability,
                    deviation,
                    within_tolerance: deviation <= self.config.size_bucket_tolerance,
                }
            })
            .collect();

        let uniqueness: Vec<UniquenessReport> = self
            .keys
            .iter()
            .map(|tracker| UniquenessReport {
                field_path: tracker.field_path.clone(),
                total: tracker.total,
                distinct: tracker.seen.len() as u64,
                duplicates: tracker.duplicates,
                passed: tracker.duplicates == 0,
            })
            .collect();

        let overall_passed = (conformance_rate - 1.0).abs() < f64::EPSILON
            && array_deviations.iter().all(|d| d.within_tolerance)
            && size_bucket_deviations.iter().all(|d| d.within_tolerance)
            && uniqueness.iter().all(|u| u.passed);

        ValidationReport {
            total_documents: self.total,
            valid_documents: self.valid,
            conformance_rate,
            violations: self.violations,
            violations_truncated: self.violations_truncated,
            array_deviations,
            size_bucket_deviations,
            size_buckets_skipped,
            uniqueness,
            overall_passed,
        }
    }
}

/// `|generated − sample| / sample`; a zero sample maps to 1.0 unless both
/// sides are zero.
fn relative_deviation(sample: f64, generated: f64) -> f64 {
    if sample == 0.0 {
        if generated == 0.0 {
            0.0
        } else {
            1.0
        }
    } else {
        (generated - sample).abs() / sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{
        ArrayLengthStats, DocumentSizeBucket, KeyFields, ProfileSettings, SizeRange,
    };
    use serde_json::json;

    fn profile_with_tags() -> ConstraintsProfile {
        let mut array_stats = BTreeMap::new();
        let distribution: FrequencyMap = [(2.0, 10), (3.0, 20), (5.0, 5)].into_iter().collect();
        array_stats.insert(
            "tags".to_owned(),
            ArrayLengthStats {
                field_path: "tags".to_owned(),
                stats: distribution.stats(),
                arrays_analyzed: distribution.total(),
                distribution,
            },
        );
        ConstraintsProfile {
            array_stats,
            numeric_ranges: BTreeMap::new(),
            size_buckets: vec![
                DocumentSizeBucket {
                    bucket_id: 0,
                    size_range: SizeRange { min: 0, max: Some(4) },
                    size_proxy: SizeProxy::LeafFieldCount,
                    count: 50,
                    probability: 0.5,
                },
                DocumentSizeBucket {
                    bucket_id: 1,
                    size_range: SizeRange { min: 4, max: None },
                    size_proxy: SizeProxy::LeafFieldCount,
                    count: 50,
                    probability: 0.5,
                },
            ],
            key_fields: KeyFields::default(),
            config: ProfileSettings::default(),
            dynamic_key_stats: None,
        }
    }

    fn schema() -> Json {
        json!({
            "type": "object",
            "properties": {
                "_id": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}},
            },
            "required": ["_id"],
            "additionalProperties": false,
        })
    }

    fn doc(id: &str, tags: usize, pad: usize) -> Value {
        let mut object = serde_json::Map::new();
        object.insert("_id".to_owned(), json!(id));
        object.insert("tags".to_owned(), json!(vec!["t"; tags]));
        for i in 0..pad {
            object.insert(format!("pad{i}"), json!(i));
        }
        Value::from_json(&Json::Object(object))
    }

    #[test]
    fn matching_stream_passes() {
        let mut profile = profile_with_tags();
        profile.size_buckets.clear();
        let mut validator =
            StreamingValidator::new(&schema(), profile, ValidateConfig::default()).unwrap();
        // Mirror the sample distribution exactly: 10 twos, 20 threes, 5 fives.
        let mut index = 0;
        for (len, count) in [(2, 10), (3, 20), (5, 5)] {
            for _ in 0..count {
                validator.observe(&doc(&format!("id{index}"), len, 0));
                index += 1;
            }
        }
        let report = validator.finish();
        assert_eq!(report.total_documents, 35);
        assert_eq!(report.conformance_rate, 1.0);
        assert!(report.size_buckets_skipped);
        assert!(report.overall_passed, "report: {report:?}");
    }

    #[test]
    fn schema_violations_fail_conformance() {
        let mut profile = profile_with_tags();
        profile.size_buckets.clear();
        profile.array_stats.clear();
        let mut validator =
            StreamingValidator::new(&schema(), profile, ValidateConfig::default()).unwrap();
        validator.observe(&Value::from_json(&json!({"_id": "a", "extra": 1})));
        validator.observe(&Value::from_json(&json!({"_id": "b"})));
        let report = validator.finish();
        assert_eq!(report.valid_documents, 1);
        assert!(report.conformance_rate < 1.0);
        assert!(!report.overall_passed);
        assert!(!report.violations.is_empty());
    }

    #[test]
    fn array_deviation_beyond_tolerance_names_the_path() {
        let mut profile = profile_with_tags();
        profile.size_buckets.clear();
        let mut validator =
            StreamingValidator::new(&schema(), profile, ValidateConfig::default()).unwrap();
        // Everything length 9: p50/p95 way off.
        for i in 0..35 {
            validator.observe(&doc(&format!("id{i}"), 9, 0));
        }
        let report = validator.finish();
        assert!(!report.overall_passed);
        let failing: Vec<_> = report
            .array_deviations
            .iter()
            .filter(|d| !d.within_tolerance)
            .collect();
        assert!(!failing.is_empty());
        assert!(failing.iter().all(|d| d.path == "tags"));
    }

    #[test]
    fn duplicate_ids_fail_uniqueness() {
        let mut profile = profile_with_tags();
        profile.size_buckets.clear();
        profile.array_stats.clear();
        let mut validator =
            StreamingValidator::new(&schema(), profile, ValidateConfig::default()).unwrap();
        validator.observe(&doc("same", 2, 0));
        validator.observe(&doc("same", 2, 0));
        let report = validator.finish();
        let id_report = report
            .uniqueness
            .iter()
            .find(|u| u.field_path == "_id")
            .unwrap();
        assert_eq!(id_report.duplicates, 1);
        assert!(!report.overall_passed);
    }

    #[test]
    fn size_buckets_compare_probabilities() {
        let mut profile = profile_with_tags();
        profile.array_stats.clear();
        let mut validator =
            StreamingValidator::new(&schema(), profile, ValidateConfig::default()).unwrap();
        // All small documents: bucket 0 probability 1.0 vs sample 0.5.
        for i in 0..10 {
            validator.observe(&doc(&format!("id{i}"), 2, 0));
        }
        let report = validator.finish();
        assert!(!report.size_buckets_skipped);
        assert!(!report.size_bucket_deviations[0].within_tolerance);
        assert!(!report.overall_passed);
    }

    #[test]
    fn dynamic_subtrees_validate_generated_documents() {
        let schema = json!({
            "type": "object",
            "properties": {
                "_id": {"type": "string"},
                "balances": {
                    "type": "object",
                    "additionalProperties": false,
                    "x-dynamic-keys": {
                        "enabled": true,
                        "metadata": {"enabled": true, "pattern": "UUID", "confidence": 1.0,
                                     "confidenceLevel": "high", "countDistribution": {"2": 1},
                                     "documentsAnalyzed": 1, "uniqueKeysObserved": 2, "exampleKeys": []},
                        "valueSchema": {"types": ["integer"], "typeProbabilities": [1.0],
                                        "schemas": [{"type": "integer"}],
                                        "isUniformType": true, "dominantType": "integer"},
                    },
                },
            },
            "required": ["_id", "balances"],
            "additionalProperties": false,
        });
        let mut profile = profile_with_tags();
        profile.size_buckets.clear();
        profile.array_stats.clear();
        let mut validator =
            StreamingValidator::new(&schema, profile, ValidateConfig::default()).unwrap();
        validator.observe(&Value::from_json(&json!({
            "_id": "a",
            "balances": {
                "5e0ad387-0001-4ce2-ae06-3b5098e10ad5": 10,
                "5e0ad387-0002-4ce2-ae06-3b5098e10ad5": 20,
            },
        })));
        // Non-UUID key and non-integer value must both fail.
        validator.observe(&Value::from_json(&json!({
            "_id": "b",
            "balances": {"not-a-uuid": "nope"},
        })));
        let report = validator.finish();
        assert_eq!(report.valid_documents, 1);
        assert_eq!(report.total_documents, 2);
    }

    #[test]
    fn violation_cap_truncates() {
        let mut profile = profile_with_tags();
        profile.size_buckets.clear();
        profile.array_stats.clear();
        let config = ValidateConfig {
            max_violations: 3,
            ..ValidateConfig::default()
        };
        let mut validator = StreamingValidator::new(&schema(), profile, config).unwrap();
        for i in 0..10 {
            validator.observe(&Value::from_json(&json!({"_id": i, "bogus": true})));
        }
        let report = validator.finish();
        assert_eq!(report.violations.len(), 3);
        assert!(report.violations_truncated);
    }

    #[test]
    fn deviation_zero_rules() {
        assert_eq!(relative_deviation(0.0, 0.0), 0.0);
        assert_eq!(relative_deviation(0.0, 3.0), 1.0);
        assert_eq!(relative_deviation(4.0, 5.0), 0.25);
    }
}
