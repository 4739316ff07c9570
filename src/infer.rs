//! Probabilistic schema inference.
//!
//! Walks normalized sample documents and accumulates, per field path, the
//! observation count and type mix. Object paths whose key sets look like
//! runtime identifiers are switched to a dynamic-key representation: instead
//! of enumerating thousands of child fields, the path carries metadata about
//! the key pattern plus a compact schema of the values behind the keys.

use crate::error::Error;
use crate::freq::{DistributionStats, FrequencyMap};
use crate::keypattern::{
    ConfidenceLevel, DetectorConfig, KeyPattern, PatternDetection, PatternSet, MAX_EXAMPLE_KEYS,
};
use crate::value::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

/// Longest path the inference walk follows.
const MAX_INFER_DEPTH: usize = 10;

/// Recursion bound when analysing values behind dynamic keys.
const MAX_VALUE_SCHEMA_DEPTH: usize = 5;

/// String values longer than this are not carried as representative enums.
const MAX_ENUM_STRING_LEN: usize = 100;

/// Cap on distinct string values retained per field.
const MAX_STRING_SAMPLES: usize = 64;

/// Inference tuning.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InferConfig {
    /// Dynamic-key detector knobs.
    pub detector: DetectorConfig,
    /// Paths never treated as dynamic maps (glob: `*`, `?`, `.` literal).
    pub force_static_paths: Vec<String>,
    /// Paths always treated as dynamic maps, bypassing the detector triggers.
    pub force_dynamic_paths: Vec<String>,
}

/// Semantic string classes the inferencer tags.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SemanticType {
    /// An email address.
    Email,
    /// An http(s) URL.
    Url,
    /// A hyphenated UUID.
    Uuid,
    /// A phone number.
    Phone,
    /// Two or three capitalized words.
    PersonName,
    /// A dotted-quad IPv4 address.
    Ipv4,
    /// A colon-separated IPv6 address.
    Ipv6,
}

impl SemanticType {
    /// The JSON-Schema format this class maps to at synthesis time.
    pub fn format(self) -> &'static str {
        match self {
            SemanticType::Email => "email",
            SemanticType::Url => "uri",
            SemanticType::Uuid => "uuid",
            SemanticType::Phone => "phone",
            SemanticType::PersonName => "person-name",
            SemanticType::Ipv4 => "ipv4",
            SemanticType::Ipv6 => "ipv6",
        }
    }
}

/// One observed type at a path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeObservation {
    /// JSON-Schema type name.
    #[serde(rename = "type")]
    pub type_: String,
    /// Occurrences of this type.
    pub count: u64,
    /// Share of this type among all observations at the path.
    pub probability: f64,
}

/// A field in the inferred schema.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferredField {
    /// Field name.
    pub name: String,
    /// Dotted path from the root.
    pub path: String,
    /// Number of parent occurrences carrying this field.
    pub count: u64,
    /// Observed types, most probable first.
    pub types: Vec<TypeObservation>,
    /// `count / parent occurrences`.
    pub probability: f64,
    /// Semantic class of string values, when one dominates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_type: Option<SemanticType>,
    /// Child fields of a plain (non-dynamic) object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, InferredField>>,
    /// Schema of array elements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<InferredField>>,
    /// Representative string values (small, capped sample).
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub sample_values: Vec<String>,
}

impl InferredField {
    /// The most probable type at this path.
    pub fn dominant_type(&self) -> Option<&str> {
        self.types.first().map(|t| t.type_.as_str())
    }
}

/// Dynamic-key metadata attached to a detected map path.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicKeyMetadata {
    /// Whether dynamic-key expansion is active for the path.
    pub enabled: bool,
    /// Identifier shape of the keys.
    pub pattern: KeyPattern,
    /// Configured pattern source for [`KeyPattern::Custom`] keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_pattern: Option<String>,
    /// Detector confidence.
    pub confidence: f64,
    /// Bucketed confidence.
    pub confidence_level: ConfidenceLevel,
    /// Histogram of per-document key counts at the path.
    pub count_distribution: FrequencyMap,
    /// Stats over `count_distribution`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_stats: Option<DistributionStats>,
    /// Documents contributing to the analysis.
    pub documents_analyzed: u64,
    /// Distinct keys seen across all documents.
    pub unique_keys_observed: u64,
    /// Up to ten observed keys.
    pub example_keys: Vec<String>,
}

/// Compact schema of the values stored behind dynamic keys.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicKeyValueSchema {
    /// Observed value types, most probable first.
    pub types: Vec<String>,
    /// Probability of each type; sums to 1.
    pub type_probabilities: Vec<f64>,
    /// Representative JSON-Schema fragment per type, index-aligned.
    pub schemas: Vec<serde_json::Value>,
    /// Whether a single type covers all values.
    pub is_uniform_type: bool,
    /// The most probable type.
    pub dominant_type: String,
}

/// Full analysis of one dynamic-key path.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectKeysAnalysis {
    /// Key-side metadata.
    pub metadata: DynamicKeyMetadata,
    /// Value-side schema.
    pub value_schema: DynamicKeyValueSchema,
}

/// The inferred schema artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferredSchema {
    /// Source collection name.
    pub collection: String,
    /// Number of documents walked.
    pub documents_analyzed: u64,
    /// Top-level fields.
    pub fields: BTreeMap<String, InferredField>,
    /// Dynamic-key analyses keyed by path.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub dynamic_keys: BTreeMap<String, ObjectKeysAnalysis>,
}

/// Translates a path glob (`*`, `?`, everything else literal — including
/// `.`) into an anchored regex.
pub fn glob_to_regex(glob: &str) -> Result<Regex, Error> {
    let mut pattern = String::with_capacity(glob.len() + 2);
    pattern.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|source| Error::InvalidKeyPattern {
        pattern: glob.to_owned(),
        source,
    })
}

#[derive(Default)]
struct FieldAcc {
    /// Occurrences of this field under its parent.
    present: u64,
    /// Occurrences per JSON type.
    type_counts: BTreeMap<&'static str, u64>,
    /// Times the value was an object (denominator for child probability).
    object_occurrences: u64,
    /// Union of keys observed when the value was an object.
    keys_observed: BTreeSet<String>,
    /// Per-occurrence object key counts.
    key_counts: FrequencyMap,
    /// Child field accumulators.
    children: BTreeMap<String, FieldAcc>,
    /// Array element accumulator.
    item: Option<Box<FieldAcc>>,
    /// Capped sample of distinct string values.
    string_values: BTreeSet<String>,
    string_count: u64,
    /// Semantic classification tallies over string values.
    semantic_counts: BTreeMap<SemanticType, u64>,
}

impl FieldAcc {
    fn merge(&mut self, other: &FieldAcc) {
        self.present += other.present;
        for (ty, count) in &other.type_counts {
            *self.type_counts.entry(ty).or_insert(0) += count;
        }
        self.object_occurrences += other.object_occurrences;
        self.keys_observed
            .extend(other.keys_observed.iter().cloned());
        self.key_counts.merge(&other.key_counts);
        for (name, child) in &other.children {
            self.children.entry(name.clone()).or_default().merge(child);
        }
        if let Some(other_item) = &other.item {
            self.item.get_or_insert_with(Default::default).merge(other_item);
        }
        for value in &other.string_values {
            if self.string_values.len() >= MAX_STRING_SAMPLES {
                break;
            }
            self.string_values.insert(value.clone());
        }
        self.string_count += other.string_count;
        for (semantic, count) in &other.semantic_counts {
            *self.semantic_counts.entry(*semantic).or_insert(0) += count;
        }
    }
}

struct SemanticClassifier {
    classes: Vec<(SemanticType, Regex)>,
}

impl SemanticClassifier {
    fn new() -> Result<Self, Error> {
        let table: &[(SemanticType, &str)] = &[
            (SemanticType::Email, r"^[^@\s]+@[^@\s]+\.[^@\s]+$"),
            (SemanticType::Url, r"^https?://[^\s]+$"),
            (
                SemanticType::Uuid,
                r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$",
            ),
            (SemanticType::Phone, r"^\+?[0-9][0-9 ().-]{6,18}[0-9]$"),
            (SemanticType::Ipv4, r"^(\d{1,3}\.){3}\d{1,3}$"),
            (SemanticType::Ipv6, r"^[0-9a-fA-F:]+:[0-9a-fA-F:]+$"),
            (
                SemanticType::PersonName,
                r"^[A-Z][a-z]+(?: [A-Z][a-z]+){1,2}$",
            ),
        ];
        let mut classes = Vec::with_capacity(table.len());
        for (semantic, source) in table {
            let regex = Regex::new(source).map_err(|source_err| Error::InvalidKeyPattern {
                pattern: (*source).to_owned(),
                source: source_err,
            })?;
            classes.push((*semantic, regex));
        }
        Ok(SemanticClassifier { classes })
    }

    fn classify(&self, value: &str) -> Option<SemanticType> {
        self.classes
            .iter()
            .find(|(_, regex)| regex.is_match(value))
            .map(|(semantic, _)| *semantic)
    }
}

/// Streaming schema inferencer. Feed normalized documents with
/// [`observe`](Inferencer::observe), then [`finish`](Inferencer::finish).
pub struct Inferencer {
    config: InferConfig,
    patterns: PatternSet,
    semantics: SemanticClassifier,
    force_static: Vec<Regex>,
    force_dynamic: Vec<Regex>,
    root: FieldAcc,
    documents: u64,
}

impl std::fmt::Debug for Inferencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inferencer")
            .field("documents", &self.documents)
            .finish()
    }
}

impl Inferencer {
    /// Builds an inferencer, compiling every configured pattern up front.
    pub fn new(config: InferConfig) -> Result<Self, Error> {
        let patterns = PatternSet::compile(&config.detector)?;
        let force_static = config
            .force_static_paths
            .iter()
            .map(|glob| glob_to_regex(glob))
            .collect::<Result<_, _>>()?;
        let force_dynamic = config
            .force_dynamic_paths
            .iter()
            .map(|glob| glob_to_regex(glob))
            .collect::<Result<_, _>>()?;
        Ok(Inferencer {
            config,
            patterns,
            semantics: SemanticClassifier::new()?,
            force_static,
            force_dynamic,
            root: FieldAcc::default(),
            documents: 0,
        })
    }

    /// Records one normalized document. Non-object values are skipped.
    pub fn observe(&mut self, document: &Value) {
        if let Value::Object(_) = document {
            self.documents += 1;
            // Split borrows: the walk only needs the classifier.
            let semantics = &self.semantics;
            observe_value(&mut self.root, document, 0, semantics);
        }
    }

    /// Number of documents observed so far.
    pub fn documents_analyzed(&self) -> u64 {
        self.documents
    }

    /// Produces the inferred schema artifact.
    pub fn finish(self, collection: &str) -> Result<InferredSchema, Error> {
        if self.documents == 0 {
            return Err(Error::Inference(format!(
                "no documents observed for collection {collection}"
            )));
        }
        let mut dynamic_keys = BTreeMap::new();
        let fields = emit_fields(
            &self.root,
            "",
            self.documents,
            &Emitter {
                config: &self.config,
                patterns: &self.patterns,
                force_static: &self.force_static,
                force_dynamic: &self.force_dynamic,
            },
            &mut dynamic_keys,
        );
        Ok(InferredSchema {
            collection: collection.to_owned(),
            documents_analyzed: self.documents,
            fields,
            dynamic_keys,
        })
    }
}

fn observe_value(acc: &mut FieldAcc, value: &Value, depth: usize, semantics: &SemanticClassifier) {
    acc.present += 1;
    *acc.type_counts.entry(value.json_type()).or_insert(0) += 1;
    match value {
        Value::Object(map) => {
            acc.object_occurrences += 1;
            acc.key_counts.add_sample(map.len() as f64);
            if depth >= MAX_INFER_DEPTH {
                return;
            }
            for (key, child) in map {
                acc.keys_observed.insert(key.clone());
                observe_value(
                    acc.children.entry(key.clone()).or_default(),
                    child,
                    depth + 1,
                    semantics,
                );
            }
        }
        Value::Array(items) => {
            if depth >= MAX_INFER_DEPTH {
                return;
            }
            let item_acc = acc.item.get_or_insert_with(Default::default);
            for item in items {
                observe_value(item_acc, item, depth + 1, semantics);
            }
        }
        Value::String(s) => {
            acc.string_count += 1;
            if s.len() < MAX_ENUM_STRING_LEN && acc.string_values.len() < MAX_STRING_SAMPLES {
                acc.string_values.insert(s.clone());
            }
            if let Some(semantic) = semantics.classify(s) {
                *acc.semantic_counts.entry(semantic).or_insert(0) += 1;
            }
        }
        _ => {}
    }
}

struct Emitter<'a> {
    config: &'a InferConfig,
    patterns: &'a PatternSet,
    force_static: &'a [Regex],
    force_dynamic: &'a [Regex],
}

impl Emitter<'_> {
    fn is_forced_static(&self, path: &str) -> bool {
        self.force_static.iter().any(|re| re.is_match(path))
    }

    fn is_forced_dynamic(&self, path: &str) -> bool {
        self.force_dynamic.iter().any(|re| re.is_match(path))
    }

    /// Runs dynamic-key detection for an object path, honoring overrides.
    fn detect(&self, path: &str, acc: &FieldAcc) -> Option<PatternDetection> {
        if path.is_empty() || self.is_forced_static(path) || acc.keys_observed.is_empty() {
            return None;
        }
        if self.is_forced_dynamic(path) {
            let mut detection = self.patterns.detect(
                &acc.keys_observed,
                &self.config.detector,
                Some(acc.object_occurrences),
            );
            detection.detected = true;
            if detection.pattern.is_none() {
                detection.pattern = Some(KeyPattern::Custom);
            }
            return Some(detection);
        }
        let detection = self.patterns.detect(
            &acc.keys_observed,
            &self.config.detector,
            Some(acc.object_occurrences),
        );
        detection.detected.then_some(detection)
    }
}

fn semantic_of(acc: &FieldAcc) -> Option<SemanticType> {
    if acc.string_count == 0 {
        return None;
    }
    acc.semantic_counts
        .iter()
        .max_by_key(|(_, count)| **count)
        .filter(|(_, count)| **count * 10 >= acc.string_count * 9)
        .map(|(semantic, _)| *semantic)
}

fn type_observations(acc: &FieldAcc) -> Vec<TypeObservation> {
    let total: u64 = acc.type_counts.values().sum();
    let mut types: Vec<TypeObservation> = acc
        .type_counts
        .iter()
        .map(|(ty, count)| TypeObservation {
            type_: (*ty).to_owned(),
            count: *count,
            probability: if total == 0 {
                0.0
            } else {
                *count as f64 / total as f64
            },
        })
        .collect();
    types.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.type_.cmp(&b.type_)));
    types
}

fn emit_fields(
    acc: &FieldAcc,
    path: &str,
    parent_occurrences: u64,
    emitter: &Emitter<'_>,
    dynamic_keys: &mut BTreeMap<String, ObjectKeysAnalysis>,
) -> BTreeMap<String, InferredField> {
    acc.children
        .iter()
        .map(|(name, child)| {
            let child_path = crate::value::join_path(path, name);
            (
                name.clone(),
                emit_field(name, child, &child_path, parent_occurrences, emitter, dynamic_keys),
            )
        })
        .collect()
}

fn emit_field(
    name: &str,
    acc: &FieldAcc,
    path: &str,
    parent_occurrences: u64,
    emitter: &Emitter<'_>,
    dynamic_keys: &mut BTreeMap<String, ObjectKeysAnalysis>,
) -> InferredField {
    let detection = if acc.object_occurrences > 0 {
        emitter.detect(path, acc)
    } else {
        None
    };

    let fields = if detection.is_some() {
        // Dynamic maps do not enumerate their children; the analysis below
        // captures the value side instead.
        None
    } else if acc.object_occurrences > 0 {
        Some(emit_fields(acc, path, acc.object_occurrences, emitter, dynamic_keys))
    } else {
        None
    };

    if let Some(detection) = detection {
        dynamic_keys.insert(path.to_owned(), analyze_dynamic(acc, detection, emitter));
    }

    let items = acc.item.as_ref().map(|item| {
        Box::new(emit_field(
            name,
            item,
            path,
            item.present.max(1),
            emitter,
            dynamic_keys,
        ))
    });

    InferredField {
        name: name.to_owned(),
        path: path.to_owned(),
        count: acc.present,
        types: type_observations(acc),
        probability: if parent_occurrences == 0 {
            0.0
        } else {
            acc.present as f64 / parent_occurrences as f64
        },
        semantic_type: semantic_of(acc),
        fields,
        items,
        sample_values: acc.string_values.iter().take(8).cloned().collect(),
    }
}

/// Builds the key- and value-side analysis for a detected dynamic path.
fn analyze_dynamic(
    acc: &FieldAcc,
    detection: PatternDetection,
    emitter: &Emitter<'_>,
) -> ObjectKeysAnalysis {
    // Aggregate every per-key child into a single value accumulator.
    let mut value_acc = FieldAcc::default();
    for child in acc.children.values() {
        value_acc.merge(child);
    }
    let value_schema = value_schema_of(&value_acc, 0, emitter);

    ObjectKeysAnalysis {
        metadata: DynamicKeyMetadata {
            enabled: true,
            pattern: detection.pattern.unwrap_or(KeyPattern::Custom),
            custom_pattern: detection.custom_pattern,
            confidence: detection.confidence,
            confidence_level: detection.confidence_level,
            count_stats: acc.key_counts.stats(),
            count_distribution: acc.key_counts.clone(),
            documents_analyzed: acc.object_occurrences,
            unique_keys_observed: acc.keys_observed.len() as u64,
            example_keys: acc
                .keys_observed
                .iter()
                .take(MAX_EXAMPLE_KEYS)
                .cloned()
                .collect(),
        },
        value_schema,
    }
}

/// Summarizes the types of the values stored behind dynamic keys, recursing
/// into object values (to a bound) to catch dynamic maps nested inside.
fn value_schema_of(acc: &FieldAcc, depth: usize, emitter: &Emitter<'_>) -> DynamicKeyValueSchema {
    let total: u64 = acc.type_counts.values().sum();
    let mut observed: Vec<(&str, u64)> = acc
        .type_counts
        .iter()
        .map(|(ty, count)| (*ty, *count))
        .collect();
    observed.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    if observed.is_empty() {
        return DynamicKeyValueSchema {
            types: vec!["string".to_owned()],
            type_probabilities: vec![1.0],
            schemas: vec![json!({"type": "string"})],
            is_uniform_type: true,
            dominant_type: "string".to_owned(),
        };
    }

    let mut types = Vec::with_capacity(observed.len());
    let mut probabilities = Vec::with_capacity(observed.len());
    let mut schemas = Vec::with_capacity(observed.len());
    for (ty, count) in &observed {
        types.push((*ty).to_owned());
        probabilities.push(*count as f64 / total as f64);
        schemas.push(schema_for_type(ty, acc, depth, emitter));
    }

    DynamicKeyValueSchema {
        is_uniform_type: observed.len() == 1,
        dominant_type: types[0].clone(),
        types,
        type_probabilities: probabilities,
        schemas,
    }
}

fn schema_for_type(
    ty: &str,
    acc: &FieldAcc,
    depth: usize,
    emitter: &Emitter<'_>,
) -> serde_json::Value {
    match ty {
        "string" => {
            // Short strings keep one representative value as an enum.
            if let Some(example) = acc.string_values.iter().next() {
                json!({"type": "string", "enum": [example]})
            } else {
                json!({"type": "string"})
            }
        }
        "object" => {
            if depth >= MAX_VALUE_SCHEMA_DEPTH {
                return json!({"type": "object"});
            }
            // A nested map of identifiers inside the values?
            let detection = emitter.patterns.detect(
                &acc.keys_observed,
                &emitter.config.detector,
                Some(acc.object_occurrences),
            );
            if detection.detected {
                let nested = analyze_dynamic(acc, detection, emitter);
                let mut schema = json!({"type": "object", "additionalProperties": false});
                schema["x-dynamic-keys"] = json!({
                    "enabled": true,
                    "metadata": nested.metadata,
                    "valueSchema": nested.value_schema,
                });
                return schema;
            }
            let mut properties = serde_json::Map::new();
            let mut required = Vec::new();
            for (name, child) in &acc.children {
                let child_schema = value_schema_of(child, depth + 1, emitter);
                properties.insert(name.clone(), child_schema.schemas[0].clone());
                if acc.object_occurrences > 0 && child.present == acc.object_occurrences {
                    required.push(serde_json::Value::String(name.clone()));
                }
            }
            json!({
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false,
            })
        }
        "array" => {
            let item_schema = acc
                .item
                .as_ref()
                .map(|item| value_schema_of(item, depth + 1, emitter).schemas[0].clone())
                .unwrap_or_else(|| json!({"type": "string"}));
            json!({"type": "array", "items": item_schema})
        }
        other => json!({ "type": other }),
    }
}
