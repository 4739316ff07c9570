//! Generation-schema synthesis.
//!
//! Merges the inferred schema, the constraints profile, and the normalizer's
//! type hints into one JSON-Schema draft-07 document annotated with the
//! vendor extensions the generator understands: `x-gen`, `x-dynamic-keys`
//! and `x-array-length-distribution`.

use crate::error::Error;
use crate::infer::{InferredField, InferredSchema};
use crate::profile::{ArrayLenPolicy, ConstraintsProfile, NumericType};
use crate::value::TypeHints;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};

/// Fields observed at least this often are `required`.
pub const DEFAULT_REQUIRED_THRESHOLD: f64 = 0.95;

/// Synthesizer tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SynthConfig {
    /// Presence probability above which a field becomes required.
    pub required_threshold: f64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        SynthConfig {
            required_threshold: DEFAULT_REQUIRED_THRESHOLD,
        }
    }
}

/// Composes the generation schema.
pub fn synthesize(
    inferred: &InferredSchema,
    profile: &ConstraintsProfile,
    hints: &TypeHints,
    config: &SynthConfig,
) -> Result<Json, Error> {
    let ctx = Ctx {
        inferred,
        profile,
        hints,
        config,
    };

    let mut properties = Map::new();
    for (name, field) in &inferred.fields {
        properties.insert(name.clone(), ctx.field_schema(field));
    }

    // `_id` always exists in the output, even when the sample hid it.
    properties
        .entry("_id".to_owned())
        .or_insert_with(|| json!({"type": "string", "x-gen": {"key": true}}));

    let mut required: Vec<String> = vec!["_id".to_owned()];
    for key in &profile.key_fields.additional_keys {
        // Additional keys address top-level properties in `required`; nested
        // segments are validated below.
        let head = key.field_path.split('.').next().unwrap_or_default();
        required.push(head.to_owned());
    }
    for (name, field) in &inferred.fields {
        if field.probability >= config.required_threshold {
            required.push(name.clone());
        }
    }
    required.sort();
    required.dedup();
    // `_id` leads the list regardless of sort order.
    if let Some(pos) = required.iter().position(|name| name == "_id") {
        required.remove(pos);
    }
    required.insert(0, "_id".to_owned());

    let schema = json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    });

    for key in &profile.key_fields.additional_keys {
        if resolve_path(&schema, &key.field_path).is_none() {
            return Err(Error::Synthesis(format!(
                "additional key '{}' does not resolve through the generation schema",
                key.field_path
            )));
        }
    }

    mark_key(&schema, profile)
}

/// Stamps `x-gen.key` on every configured key field.
fn mark_key(schema: &Json, profile: &ConstraintsProfile) -> Result<Json, Error> {
    let mut schema = schema.clone();
    let mut paths = vec![profile.key_fields.id.field_path.clone()];
    paths.extend(
        profile
            .key_fields
            .additional_keys
            .iter()
            .map(|key| key.field_path.clone()),
    );
    for path in paths {
        if let Some(node) = resolve_path_mut(&mut schema, &path) {
            let extension = node
                .as_object_mut()
                .and_then(|map| {
                    map.entry("x-gen".to_owned())
                        .or_insert_with(|| json!({}))
                        .as_object_mut()
                })
                .ok_or_else(|| Error::Synthesis(format!("key field '{path}' is not an object schema")))?;
            extension.insert("key".to_owned(), json!(true));
        }
    }
    Ok(schema)
}

/// Resolves a dotted data path through `properties` (and `items` for
/// arrays).
pub fn resolve_path<'a>(schema: &'a Json, path: &str) -> Option<&'a Json> {
    let mut node = schema;
    for segment in path.split('.') {
        loop {
            match node.get("items") {
                Some(items) if node.get("type").and_then(Json::as_str) == Some("array") => {
                    node = items;
                }
                _ => break,
            }
        }
        node = node.get("properties")?.get(segment)?;
    }
    Some(node)
}

fn resolve_path_mut<'a>(schema: &'a mut Json, path: &str) -> Option<&'a mut Json> {
    let mut node = schema;
    for segment in path.split('.') {
        if node.get("type").and_then(Json::as_str) == Some("array") && node.get("items").is_some() {
            node = node.get_mut("items")?;
        }
        node = node.get_mut("properties")?.get_mut(segment)?;
    }
    Some(node)
}

struct Ctx<'a> {
    inferred: &'a InferredSchema,
    profile: &'a ConstraintsProfile,
    hints: &'a TypeHints,
    config: &'a SynthConfig,
}

impl Ctx<'_> {
    fn field_schema(&self, field: &InferredField) -> Json {
        match self.try_field_schema(field) {
            Some(schema) => schema,
            None => {
                tracing::warn!(path = %field.path, "malformed sub-schema, falling back to string");
                json!({"type": "string"})
            }
        }
    }

    fn try_field_schema(&self, field: &InferredField) -> Option<Json> {
        // Most-probable type wins on a union.
        let dominant = field.dominant_type()?;
        let mut schema = Map::new();
        let mut x_gen = Map::new();
        x_gen.insert("probability".to_owned(), json!(round3(field.probability)));
        if let Some(hint) = self.hints.get(&field.path) {
            x_gen.insert("mongoType".to_owned(), json!(hint.original_type));
        }

        match dominant {
            "null" => {
                schema.insert("type".to_owned(), json!("null"));
            }
            "boolean" => {
                schema.insert("type".to_owned(), json!("boolean"));
            }
            "integer" | "number" => {
                self.numeric_schema(field, dominant, &mut schema, &mut x_gen);
            }
            "string" => {
                schema.insert("type".to_owned(), json!("string"));
                if let Some(format) = self.string_format(field) {
                    schema.insert("format".to_owned(), json!(format));
                }
            }
            "array" => {
                self.array_schema(field, &mut schema, &mut x_gen)?;
            }
            "object" => {
                self.object_schema(field, &mut schema)?;
            }
            _ => return None,
        }

        schema.insert("x-gen".to_owned(), Json::Object(x_gen));
        Some(Json::Object(schema))
    }

    /// Format priority: the normalizer's type hint, then the semantic tag.
    fn string_format(&self, field: &InferredField) -> Option<String> {
        if let Some(hint) = self.hints.get(&field.path) {
            if let Some(format) = &hint.json_schema_format {
                return Some(format.clone());
            }
        }
        field.semantic_type.map(|semantic| semantic.format().to_owned())
    }

    fn numeric_schema(
        &self,
        field: &InferredField,
        dominant: &str,
        schema: &mut Map<String, Json>,
        x_gen: &mut Map<String, Json>,
    ) {
        let range = self.profile.numeric_ranges.get(&field.path);
        let ty = match range.map(|r| r.value_type) {
            Some(NumericType::Float) => "number",
            Some(NumericType::Integer) => "integer",
            None => dominant,
        };
        schema.insert("type".to_owned(), json!(ty));
        if let Some(stats) = range.and_then(|r| r.stats) {
            schema.insert("minimum".to_owned(), json!(stats.min));
            schema.insert("maximum".to_owned(), json!(stats.max));
            x_gen.insert(
                "numericRange".to_owned(),
                json!({"min": stats.min, "max": stats.max}),
            );
        }
    }

    fn array_schema(
        &self,
        field: &InferredField,
        schema: &mut Map<String, Json>,
        x_gen: &mut Map<String, Json>,
    ) -> Option<()> {
        schema.insert("type".to_owned(), json!("array"));
        let items = match &field.items {
            Some(items) => self.field_schema(items),
            None => json!({"type": "string"}),
        };
        schema.insert("items".to_owned(), items);

        if let Some(stats) = self.profile.array_stats.get(&field.path) {
            let bounds = stats.stats.map(|s| (s.min, s.max));
            let (min_items, max_items) = match self.profile.config.array_len_policy {
                ArrayLenPolicy::Minmax => bounds?,
                ArrayLenPolicy::PercentileClamp => {
                    let [lo, hi] = self.profile.config.clamp_range;
                    (
                        stats.distribution.value_at_fraction(lo)?,
                        stats.distribution.value_at_fraction(hi)?,
                    )
                }
            };
            schema.insert("minItems".to_owned(), json!(min_items as u64));
            schema.insert("maxItems".to_owned(), json!(max_items as u64));
            x_gen.insert(
                "arrayLen".to_owned(),
                json!({"min": min_items as u64, "max": max_items as u64}),
            );
            schema.insert(
                "x-array-length-distribution".to_owned(),
                serde_json::to_value(&stats.distribution).ok()?,
            );
        }
        Some(())
    }

    fn object_schema(&self, field: &InferredField, schema: &mut Map<String, Json>) -> Option<()> {
        schema.insert("type".to_owned(), json!("object"));
        schema.insert("additionalProperties".to_owned(), json!(false));

        if let Some(analysis) = self.inferred.dynamic_keys.get(&field.path) {
            // Dynamic maps enumerate nothing; the annotation is expanded at
            // generation time.
            schema.insert(
                "x-dynamic-keys".to_owned(),
                json!({
                    "enabled": true,
                    "metadata": analysis.metadata,
                    "valueSchema": analysis.value_schema,
                }),
            );
            return Some(());
        }

        let children = field.fields.as_ref()?;
        let mut properties = Map::new();
        let mut required = Vec::new();
        for (name, child) in children {
            properties.insert(name.clone(), self.field_schema(child));
            if child.probability >= self.config.required_threshold {
                required.push(json!(name));
            }
        }
        schema.insert("properties".to_owned(), Json::Object(properties));
        schema.insert("required".to_owned(), Json::Array(required));
        Some(())
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::{InferConfig, Inferencer};
    use crate::profile::{ProfileConfig, Profiler};
    use crate::value::Value;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn discover(
        documents: impl IntoIterator<Item = serde_json::Value> + Clone,
    ) -> (InferredSchema, ConstraintsProfile) {
        let mut inferencer = Inferencer::new(InferConfig::default()).unwrap();
        let mut profiler = Profiler::new(ProfileConfig::default());
        for doc in documents {
            let value = Value::from_json(&doc);
            inferencer.observe(&value);
            profiler.observe(&value);
        }
        let inferred = inferencer.finish("things").unwrap();
        let profile = profiler.finish(&inferred.dynamic_keys);
        (inferred, profile)
    }

    fn synthesize_from(
        documents: impl IntoIterator<Item = serde_json::Value> + Clone,
    ) -> Json {
        let (inferred, profile) = discover(documents);
        synthesize(&inferred, &profile, &BTreeMap::new(), &SynthConfig::default()).unwrap()
    }

    #[test]
    fn root_is_a_closed_draft7_object() {
        let schema = synthesize_from((0..5).map(|i| json!({"_id": format!("{i:024x}"), "n": i})));
        assert_eq!(schema["$schema"], "http://json-schema.org/draft-07/schema#");
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["required"][0], "_id");
        assert_eq!(schema["properties"]["_id"]["x-gen"]["key"], true);
    }

    #[test]
    fn every_property_has_a_type() {
        let schema = synthesize_from((0..5).map(|i| {
            json!({"_id": i, "name": "x", "flag": i % 2 == 0, "nested": {"a": 1.5}})
        }));
        for (name, prop) in schema["properties"].as_object().unwrap() {
            assert!(prop.get("type").is_some(), "property {name} lacks a type");
        }
        assert_eq!(schema["properties"]["nested"]["properties"]["a"]["type"], "number");
    }

    #[test]
    fn arrays_carry_bounds_and_distribution() {
        let schema = synthesize_from((0..10).map(|i| {
            json!({"_id": i, "tags": vec!["t"; if i < 4 { 2 } else { 5 }]})
        }));
        let tags = &schema["properties"]["tags"];
        assert_eq!(tags["minItems"], 2);
        assert_eq!(tags["maxItems"], 5);
        assert_eq!(tags["x-array-length-distribution"]["2"], 4);
        assert_eq!(tags["x-array-length-distribution"]["5"], 6);
        assert_eq!(tags["x-gen"]["arrayLen"]["min"], 2);
    }

    #[test]
    fn numeric_fields_carry_ranges() {
        let schema = synthesize_from((0..10).map(|i| json!({"_id": i, "qty": i + 5})));
        let qty = &schema["properties"]["qty"];
        assert_eq!(qty["type"], "integer");
        assert_eq!(qty["minimum"], 5.0);
        assert_eq!(qty["maximum"], 14.0);
        assert_eq!(qty["x-gen"]["numericRange"]["max"], 14.0);
    }

    #[test]
    fn dynamic_maps_have_no_enumerated_properties() {
        let schema = synthesize_from((0..60).map(|i| {
            let mut balances = serde_json::Map::new();
            for j in 0..9 {
                balances.insert(
                    format!("5e0ad387-{:04}-4ce2-ae06-3b5098e10ad5", (i * 9 + j) % 10_000),
                    json!(j * 100),
                );
            }
            json!({"_id": format!("{i:024x}"), "accountBalances": balances})
        }));
        let balances = &schema["properties"]["accountBalances"];
        assert_eq!(balances["x-dynamic-keys"]["enabled"], true);
        assert_eq!(balances["x-dynamic-keys"]["metadata"]["pattern"], "UUID");
        assert!(balances.get("properties").is_none());
        assert_eq!(balances["additionalProperties"], false);
    }

    #[test]
    fn required_follows_probability_threshold() {
        let schema = synthesize_from((0..20).map(|i| {
            if i < 19 {
                json!({"_id": i, "always": 1, "sometimes": 2})
            } else {
                json!({"_id": i, "always": 1})
            }
        }));
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Json::as_str)
            .collect();
        assert!(required.contains(&"always"));
        assert!(!required.contains(&"sometimes"));
    }

    #[test]
    fn unresolvable_additional_key_is_an_error() {
        let (inferred, mut profile) = discover((0..5).map(|i| json!({"_id": i, "a": 1})));
        profile.key_fields.additional_keys.push(crate::profile::KeyFieldConfig {
            field_path: "missing.key".to_owned(),
            enforce_uniqueness: true,
        });
        let result = synthesize(&inferred, &profile, &BTreeMap::new(), &SynthConfig::default());
        assert!(matches!(result, Err(Error::Synthesis(_))));
    }

    #[test]
    fn type_hints_become_formats() {
        let (inferred, profile) = discover((0..5).map(|i| json!({"_id": i, "when": "2024-01-01T00:00:00Z"})));
        let mut hints = BTreeMap::new();
        hints.insert(
            "when".to_owned(),
            crate::value::TypeHint {
                original_type: "date".to_owned(),
                json_schema_type: "string".to_owned(),
                json_schema_format: Some("date-time".to_owned()),
            },
        );
        let schema = synthesize(&inferred, &profile, &hints, &SynthConfig::default()).unwrap();
        assert_eq!(schema["properties"]["when"]["format"], "date-time");
        assert_eq!(schema["properties"]["when"]["x-gen"]["mongoType"], "date");
    }
}
