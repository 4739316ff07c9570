//! Document generator.
//!
//! Resolves a generation schema into concrete documents. Each document pass
//! first expands the vendor annotations — dynamic-key subtrees become
//! enumerated properties with freshly synthesized keys, array subtrees get
//! their length pinned from the observed distribution — then walks the
//! expanded schema synthesizing primitive values. The whole pass is a pure
//! function of `(schema, seed)`.

use crate::error::Error;
use crate::freq::FrequencyMap;
use crate::infer::{DynamicKeyMetadata, DynamicKeyValueSchema};
use crate::keygen::KeyGenerator;
use crate::keypattern::KeyPattern;
use crate::value::Value;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use data_encoding::{BASE64, HEXLOWER, HEXLOWER_PERMISSIVE};
use rand::{Rng, RngCore, SeedableRng};
use rand_hc::Hc128Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Deepest schema node the preprocessing and synthesis walks will visit.
const MAX_GEN_DEPTH: usize = 100;

/// Attempts at regenerating a colliding unique key before counter-stamping.
const UNIQUE_RETRIES: usize = 8;

/// Repetition bound handed to compiled custom patterns.
const CUSTOM_PATTERN_MAX_REPEAT: u32 = 100;

/// Generation options.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateOptions {
    /// Seed: 64 hex digits, or any string hashed into one.
    pub seed: Option<String>,
    /// Expand `x-dynamic-keys` annotations.
    pub use_dynamic_keys: bool,
    /// Draw array lengths and key counts from observed distributions.
    pub use_frequency_distributions: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        GenerateOptions {
            seed: None,
            use_dynamic_keys: true,
            use_frequency_distributions: true,
        }
    }
}

/// Derives the 32-byte RNG seed from a seed string: 64 hex digits are taken
/// verbatim, anything else is hashed.
pub fn seed_bytes(seed: &str) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    if seed.len() == 64
        && HEXLOWER_PERMISSIVE
            .decode_mut(seed.as_bytes(), &mut bytes)
            .is_ok()
    {
        return bytes;
    }
    let digest = Sha256::digest(seed.as_bytes());
    bytes.copy_from_slice(&digest);
    bytes
}

/// A fresh seed from the OS entropy source.
pub fn random_seed() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Schema-driven document generator. One instance owns its PRNG state; two
/// instances with the same seed produce identical outputs independently.
pub struct Generator {
    schema: Json,
    options: GenerateOptions,
    rng: Hc128Rng,
    keygen: KeyGenerator,
    custom_shapes: BTreeMap<String, rand_regex::Regex>,
    unique_paths: Vec<String>,
    seen_keys: BTreeMap<String, BTreeSet<String>>,
    seed: [u8; 32],
    generated: u64,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("generated", &self.generated)
            .field("unique_paths", &self.unique_paths)
            .finish()
    }
}

impl Generator {
    /// Builds a generator, compiling every custom key pattern up front so a
    /// bad pattern fails before any output is produced.
    pub fn new(mut schema: Json, options: GenerateOptions) -> Result<Self, Error> {
        let seed = match &options.seed {
            Some(seed) => seed_bytes(seed),
            None => random_seed(),
        };

        // `_id` as a bare string means an ObjectId-shaped identifier.
        if let Some(id) = schema
            .get_mut("properties")
            .and_then(|props| props.get_mut("_id"))
            .and_then(Json::as_object_mut)
        {
            if id.get("type").and_then(Json::as_str) == Some("string")
                && !id.contains_key("format")
            {
                id.insert("format".to_owned(), json!("objectid"));
            }
        }

        let mut custom_sources = BTreeSet::new();
        collect_custom_patterns(&schema, &mut custom_sources);
        let mut custom_shapes = BTreeMap::new();
        for source in custom_sources {
            custom_shapes.insert(source.clone(), compile_shape(&source)?);
        }

        let mut unique_paths = Vec::new();
        collect_unique_paths(&schema, "", &mut unique_paths);

        Ok(Generator {
            schema,
            rng: Hc128Rng::from_seed(seed),
            keygen: KeyGenerator::new(),
            custom_shapes,
            seen_keys: unique_paths
                .iter()
                .map(|path| (path.clone(), BTreeSet::new()))
                .collect(),
            unique_paths,
            seed,
            options,
            generated: 0,
        })
    }

    /// The effective seed, hex-encoded for display and replay.
    pub fn seed_hex(&self) -> String {
        HEXLOWER.encode(&self.seed)
    }

    /// The (possibly adjusted) generation schema.
    pub fn schema(&self) -> &Json {
        &self.schema
    }

    /// Documents generated so far.
    pub fn generated(&self) -> u64 {
        self.generated
    }

    /// Produces the next document.
    pub fn generate(&mut self) -> Result<Value, Error> {
        let mut working = self.schema.clone();
        self.preprocess(&mut working, 0);
        let mut document = self.value_for(&working, 0);
        self.enforce_unique_keys(&mut document, &working);
        self.generated += 1;
        Ok(document)
    }

    /// Expands `x-dynamic-keys` and pins array lengths, in place.
    fn preprocess(&mut self, node: &mut Json, depth: usize) {
        if depth >= MAX_GEN_DEPTH {
            return;
        }
        let Some(map) = node.as_object_mut() else { return };

        if self.options.use_dynamic_keys {
            let enabled = map
                .get("x-dynamic-keys")
                .and_then(|x| x.get("enabled"))
                .and_then(Json::as_bool)
                .unwrap_or(false);
            if enabled {
                match self.expand_dynamic(map) {
                    Some(()) => {}
                    None => {
                        tracing::warn!("malformed x-dynamic-keys annotation, emitting empty object");
                        map.remove("x-dynamic-keys");
                    }
                }
            }
        }

        if map.get("type").and_then(Json::as_str) == Some("array")
            && self.options.use_frequency_distributions
        {
            if let Some(annotation) = map.remove("x-array-length-distribution") {
                match serde_json::from_value::<FrequencyMap>(annotation) {
                    Ok(distribution) => {
                        let u: f64 = self.rng.gen();
                        if let Some(len) = distribution.sample(u) {
                            map.insert("minItems".to_owned(), json!(len as u64));
                            map.insert("maxItems".to_owned(), json!(len as u64));
                        }
                    }
                    Err(_) => {
                        tracing::warn!("malformed x-array-length-distribution annotation, ignoring");
                    }
                }
            }
        }

        if let Some(properties) = map.get_mut("properties").and_then(Json::as_object_mut) {
            for child in properties.values_mut() {
                self.preprocess(child, depth + 1);
            }
        }
        if let Some(items) = map.get_mut("items") {
            self.preprocess(items, depth + 1);
        }
    }

    /// Replaces one dynamic-key annotation with enumerated properties.
    fn expand_dynamic(&mut self, map: &mut serde_json::Map<String, Json>) -> Option<()> {
        let annotation = map.remove("x-dynamic-keys")?;
        let metadata: DynamicKeyMetadata =
            serde_json::from_value(annotation.get("metadata")?.clone()).ok()?;
        let value_schema: DynamicKeyValueSchema =
            serde_json::from_value(annotation.get("valueSchema")?.clone()).ok()?;

        let count = if self.options.use_frequency_distributions
            && !metadata.count_distribution.is_empty()
        {
            let u: f64 = self.rng.gen();
            metadata.count_distribution.sample(u).unwrap_or(1.0)
        } else {
            metadata.count_stats.map_or(1.0, |stats| stats.median)
        };
        let count = count.max(0.0) as usize;

        let shape = metadata
            .custom_pattern
            .as_ref()
            .and_then(|source| self.custom_shapes.get(source).cloned());

        let mut keys = BTreeSet::new();
        let mut attempts = 0usize;
        while keys.len() < count {
            let mut key =
                self.keygen
                    .next_key(metadata.pattern, shape.as_ref(), &mut self.rng);
            attempts += 1;
            if attempts > count * 10 + 100 {
                // A narrow custom pattern may be unable to produce enough
                // distinct keys; stamp the counter to force progress.
                key.push_str(&format!("{:06x}", self.keygen.generated()));
            }
            keys.insert(key);
        }

        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for key in &keys {
            let schema = if value_schema.is_uniform_type || value_schema.schemas.len() == 1 {
                value_schema.schemas.first().cloned()
            } else {
                let u: f64 = self.rng.gen();
                pick_weighted(&value_schema.type_probabilities, u)
                    .and_then(|index| value_schema.schemas.get(index).cloned())
            };
            properties.insert(key.clone(), schema.unwrap_or_else(|| json!({"type": "string"})));
            required.push(json!(key));
        }

        map.insert("type".to_owned(), json!("object"));
        map.insert("properties".to_owned(), Json::Object(properties));
        map.insert("required".to_owned(), Json::Array(required));
        map.insert("additionalProperties".to_owned(), json!(false));
        Some(())
    }

    /// Synthesizes a value for one (preprocessed) schema node.
    fn value_for(&mut self, schema: &Json, depth: usize) -> Value {
        if depth >= MAX_GEN_DEPTH {
            return Value::Null;
        }
        let Some(map) = schema.as_object() else {
            return Value::Null;
        };

        if let Some(choices) = map.get("enum").and_then(Json::as_array) {
            if !choices.is_empty() {
                let index = self.rng.gen_range(0..choices.len());
                return Value::from_json(&choices[index]);
            }
        }

        let ty = map
            .get("type")
            .and_then(Json::as_str)
            .or_else(|| map.contains_key("properties").then_some("object"))
            .unwrap_or("string");

        match ty {
            "null" => Value::Null,
            "boolean" => Value::Bool(self.rng.gen_bool(0.5)),
            "integer" => {
                let (min, max) = numeric_bounds(map, 0.0, 1000.0);
                let (lo, hi) = (min.ceil() as i64, max.floor() as i64);
                Value::Int(if lo >= hi { lo } else { self.rng.gen_range(lo..=hi) })
            }
            "number" => {
                let (min, max) = numeric_bounds(map, 0.0, 1000.0);
                Value::Float(if min >= max {
                    min
                } else {
                    self.rng.gen_range(min..=max)
                })
            }
            "string" => Value::String(self.string_for(map.get("format").and_then(Json::as_str))),
            "array" => {
                let min = map.get("minItems").and_then(Json::as_u64).unwrap_or(0);
                let max = map.get("maxItems").and_then(Json::as_u64).unwrap_or(min.max(5));
                let len = if min >= max {
                    min
                } else {
                    self.rng.gen_range(min..=max)
                };
                let default_items = json!({"type": "string"});
                let items = map.get("items").unwrap_or(&default_items);
                Value::Array((0..len).map(|_| self.value_for(items, depth + 1)).collect())
            }
            "object" => {
                let required: BTreeSet<&str> = map
                    .get("required")
                    .and_then(Json::as_array)
                    .map(|names| names.iter().filter_map(Json::as_str).collect())
                    .unwrap_or_default();
                let mut object = BTreeMap::new();
                if let Some(properties) = map.get("properties").and_then(Json::as_object) {
                    for (name, child) in properties {
                        let include = required.contains(name.as_str()) || {
                            let probability = child
                                .get("x-gen")
                                .and_then(|x| x.get("probability"))
                                .and_then(Json::as_f64)
                                .unwrap_or(1.0);
                            self.rng.gen_bool(probability.clamp(0.0, 1.0))
                        };
                        if include {
                            object.insert(name.clone(), self.value_for(child, depth + 1));
                        }
                    }
                }
                Value::Object(object)
            }
            other => {
                tracing::warn!(r#type = other, "unknown schema type, falling back to string");
                Value::String(self.string_for(None))
            }
        }
    }

    fn string_for(&mut self, format: Option<&str>) -> String {
        let rng = &mut self.rng;
        match format {
            Some("objectid") => {
                let mut bytes = [0u8; 12];
                rng.fill(&mut bytes);
                HEXLOWER.encode(&bytes)
            }
            Some("uuid") => {
                let mut bytes = [0u8; 16];
                rng.fill(&mut bytes);
                bytes[6] = (bytes[6] & 0x0f) | 0x40;
                bytes[8] = (bytes[8] & 0x3f) | 0x80;
                let hex = HEXLOWER.encode(&bytes);
                format!(
                    "{}-{}-{}-{}-{}",
                    &hex[0..8],
                    &hex[8..12],
                    &hex[12..16],
                    &hex[16..20],
                    &hex[20..32]
                )
            }
            Some("date-time") => {
                let seconds = 1_420_070_400 + rng.gen_range(0..470_000_000_i64);
                let millis: u32 = rng.gen_range(0..1000);
                let datetime: DateTime<Utc> = Utc
                    .timestamp_opt(seconds, millis * 1_000_000)
                    .single()
                    .unwrap_or_default();
                datetime.to_rfc3339_opts(SecondsFormat::Millis, true)
            }
            Some("email") => {
                let name = pick(rng, FIRST_NAMES).to_lowercase();
                let domain = pick(rng, DOMAINS);
                format!("{}{}@{}", name, rng.gen_range(1..10_000), domain)
            }
            Some("uri") => {
                format!(
                    "https://{}/{}",
                    pick(rng, DOMAINS),
                    pick(rng, WORDS)
                )
            }
            Some("ipv4") => {
                format!(
                    "{}.{}.{}.{}",
                    rng.gen_range(1..255),
                    rng.gen_range(0..256),
                    rng.gen_range(0..256),
                    rng.gen_range(1..255)
                )
            }
            Some("ipv6") => {
                let groups: Vec<String> =
                    (0..8).map(|_| format!("{:x}", rng.gen::<u16>())).collect();
                groups.join(":")
            }
            Some("phone") => {
                format!(
                    "+1 {:03} {:03} {:04}",
                    rng.gen_range(200..1000),
                    rng.gen_range(200..1000),
                    rng.gen_range(0..10_000)
                )
            }
            Some("person-name") => {
                format!("{} {}", pick(rng, FIRST_NAMES), pick(rng, LAST_NAMES))
            }
            Some("decimal") => {
                format!("{:.2}", rng.gen_range(0.0..10_000.0))
            }
            Some("byte") => {
                let len = rng.gen_range(4..24);
                let mut bytes = vec![0u8; len];
                rng.fill(bytes.as_mut_slice());
                BASE64.encode(&bytes)
            }
            Some("ulid") => {
                let mut bytes = [0u8; 16];
                rng.fill(&mut bytes);
                crate::keygen::crockford_encode(&bytes)
            }
            _ => {
                let count = rng.gen_range(1..4);
                let words: Vec<&str> = (0..count).map(|_| pick(rng, WORDS)).collect();
                words.join(" ")
            }
        }
    }

    /// Run-scope uniqueness for `_id` and configured additional keys.
    fn enforce_unique_keys(&mut self, document: &mut Value, working: &Json) {
        for index in 0..self.unique_paths.len() {
            let path = self.unique_paths[index].clone();
            let Some(current) = document.pointer(&path) else { continue };
            let mut rendered = current.to_string();

            let mut replacement = None;
            for attempt in 0..=UNIQUE_RETRIES {
                let seen = &self.seen_keys[&path];
                if !seen.contains(&rendered) {
                    break;
                }
                if attempt == UNIQUE_RETRIES {
                    // Counter-stamp: deterministic escape hatch for
                    // exhausted value spaces.
                    let mut stamp = self.generated;
                    loop {
                        let stamped = Value::String(format!("{}-{:08x}", rendered.trim_matches('"'), stamp));
                        let candidate = stamped.to_string();
                        if !self.seen_keys[&path].contains(&candidate) {
                            rendered = candidate;
                            replacement = Some(stamped);
                            break;
                        }
                        stamp += 1;
                    }
                    break;
                }
                let Some(leaf) = crate::synth::resolve_path(working, &path) else { break };
                let fresh = self.value_for(&leaf.clone(), MAX_GEN_DEPTH - 1);
                rendered = fresh.to_string();
                replacement = Some(fresh);
            }

            if let Some(fresh) = replacement {
                set_at_path(document, &path, fresh);
            }
            if let Some(seen) = self.seen_keys.get_mut(&path) {
                seen.insert(rendered);
            }
        }
    }
}

fn pick<'a>(rng: &mut impl Rng, list: &'a [&'a str]) -> &'a str {
    list[rng.gen_range(0..list.len())]
}

fn numeric_bounds(map: &serde_json::Map<String, Json>, lo: f64, hi: f64) -> (f64, f64) {
    let explicit = |key: &str| map.get(key).and_then(Json::as_f64);
    let range = map.get("x-gen").and_then(|x| x.get("numericRange"));
    let from_range = |key: &str| range.and_then(|r| r.get(key)).and_then(Json::as_f64);
    (
        explicit("minimum").or_else(|| from_range("min")).unwrap_or(lo),
        explicit("maximum").or_else(|| from_range("max")).unwrap_or(hi),
    )
}

/// Weighted index choice over normalized probabilities.
fn pick_weighted(probabilities: &[f64], u: f64) -> Option<usize> {
    let mut running = 0.0;
    for (index, probability) in probabilities.iter().enumerate() {
        running += probability;
        if running > u {
            return Some(index);
        }
    }
    probabilities.len().checked_sub(1)
}

fn collect_custom_patterns(node: &Json, out: &mut BTreeSet<String>) {
    let Some(map) = node.as_object() else { return };
    if let Some(source) = map
        .get("x-dynamic-keys")
        .and_then(|x| x.get("metadata"))
        .and_then(|m| m.get("customPattern"))
        .and_then(Json::as_str)
    {
        out.insert(source.to_owned());
    }
    for value in map.values() {
        match value {
            Json::Object(_) => collect_custom_patterns(value, out),
            Json::Array(items) => {
                for item in items {
                    collect_custom_patterns(item, out);
                }
            }
            _ => {}
        }
    }
}

fn collect_unique_paths(schema: &Json, path: &str, out: &mut Vec<String>) {
    let Some(map) = schema.as_object() else { return };
    let is_key = map
        .get("x-gen")
        .and_then(|x| x.get("key"))
        .and_then(Json::as_bool)
        .unwrap_or(false);
    if is_key && !path.is_empty() {
        out.push(path.to_owned());
    }
    if let Some(properties) = map.get("properties").and_then(Json::as_object) {
        for (name, child) in properties {
            let child_path = crate::value::join_path(path, name);
            collect_unique_paths(child, &child_path, out);
        }
    }
    if let Some(items) = map.get("items") {
        collect_unique_paths(items, path, out);
    }
}

/// Compiles a custom pattern into a string-shape generator, the same way the
/// detector's patterns are parsed.
fn compile_shape(source: &str) -> Result<rand_regex::Regex, Error> {
    let hir = regex_syntax::ParserBuilder::new()
        .build()
        .parse(source)
        .map_err(|e| Error::InvalidGeneratorPattern(rand_regex::Error::from(e)))?;
    rand_regex::Regex::with_hir(hir, CUSTOM_PATTERN_MAX_REPEAT).map_err(Error::from)
}

fn set_at_path(document: &mut Value, path: &str, value: Value) {
    let mut current = document;
    let segments: Vec<&str> = path.split('.').collect();
    for (index, segment) in segments.iter().enumerate() {
        let Value::Object(map) = current else { return };
        if index + 1 == segments.len() {
            map.insert((*segment).to_owned(), value);
            return;
        }
        match map.get_mut(*segment) {
            Some(child) => current = child,
            None => return,
        }
    }
}

const WORDS: &[&str] = &[
    "alpha", "harbor", "crimson", "delta", "ember", "forest", "granite", "horizon", "indigo",
    "juniper", "kestrel", "lantern", "meadow", "nectar", "orchid", "prairie", "quartz", "river",
    "summit", "timber", "umber", "violet", "willow", "zephyr",
];

const FIRST_NAMES: &[&str] = &[
    "Ada", "Bruno", "Carmen", "Dmitri", "Elena", "Felix", "Greta", "Hugo", "Iris", "Jonas",
    "Katya", "Liam", "Mona", "Nils", "Oona", "Pavel",
];

const LAST_NAMES: &[&str] = &[
    "Adler", "Bergstrom", "Castellan", "Dvorak", "Eriksen", "Falk", "Grimaldi", "Hale", "Ivanov",
    "Jansen", "Keller", "Lindqvist", "Moreau", "Novak", "Olsen", "Petrov",
];

const DOMAINS: &[&str] = &[
    "example.com", "example.org", "mailbox.test", "postbox.test", "inbox.test",
];

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn schema_with_uuid_map() -> Json {
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "properties": {
                "_id": {"type": "string", "x-gen": {"key": true}},
                "accountBalances": {
                    "type": "object",
                    "additionalProperties": false,
                    "x-dynamic-keys": {
                        "enabled": true,
                        "metadata": {
                            "enabled": true,
                            "pattern": "UUID",
                            "confidence": 0.95,
                            "confidenceLevel": "high",
                            "countDistribution": {"3": 1},
                            "documentsAnalyzed": 100,
                            "uniqueKeysObserved": 300,
                            "exampleKeys": [],
                        },
                        "valueSchema": {
                            "types": ["integer"],
                            "typeProbabilities": [1.0],
                            "schemas": [{"type": "integer", "minimum": 0, "maximum": 100}],
                            "isUniformType": true,
                            "dominantType": "integer",
                        },
                    },
                },
            },
            "required": ["_id", "accountBalances"],
            "additionalProperties": false,
        })
    }

    fn options(seed: &str) -> GenerateOptions {
        GenerateOptions {
            seed: Some(seed.to_owned()),
            ..GenerateOptions::default()
        }
    }

    #[test]
    fn identical_seeds_produce_identical_documents() {
        let mut a = Generator::new(schema_with_uuid_map(), options("test-determinism-seed")).unwrap();
        let mut b = Generator::new(schema_with_uuid_map(), options("test-determinism-seed")).unwrap();
        for _ in 0..10 {
            let doc_a = serde_json::to_string(&a.generate().unwrap()).unwrap();
            let doc_b = serde_json::to_string(&b.generate().unwrap()).unwrap();
            assert_eq!(doc_a, doc_b);
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = Generator::new(schema_with_uuid_map(), options("seed-one")).unwrap();
        let mut b = Generator::new(schema_with_uuid_map(), options("seed-two")).unwrap();
        let docs_a: Vec<String> = (0..5)
            .map(|_| serde_json::to_string(&a.generate().unwrap()).unwrap())
            .collect();
        let docs_b: Vec<String> = (0..5)
            .map(|_| serde_json::to_string(&b.generate().unwrap()).unwrap())
            .collect();
        assert_ne!(docs_a, docs_b);
    }

    #[test]
    fn dynamic_keys_expand_with_exact_count_and_shape() {
        let uuid = Regex::new(
            r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$",
        )
        .unwrap();
        let mut generator = Generator::new(schema_with_uuid_map(), options("fidelity")).unwrap();
        for _ in 0..10 {
            let document = generator.generate().unwrap();
            let balances = document.pointer("accountBalances").unwrap();
            let map = balances.as_object().unwrap();
            assert_eq!(map.len(), 3);
            for (key, value) in map {
                assert!(uuid.is_match(key), "key {key} is not a UUID");
                assert!(matches!(value, Value::Int(_)));
            }
        }
    }

    #[test]
    fn id_defaults_to_objectid_format_and_stays_unique() {
        let oid = Regex::new(r"^[0-9a-f]{24}$").unwrap();
        let mut generator = Generator::new(schema_with_uuid_map(), options("ids")).unwrap();
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..200 {
            let document = generator.generate().unwrap();
            let id = document.pointer("_id").unwrap().as_str().unwrap().to_owned();
            assert!(oid.is_match(&id));
            assert!(seen.insert(id), "duplicate _id generated");
        }
    }

    #[test]
    fn array_lengths_follow_the_distribution() {
        let schema = json!({
            "type": "object",
            "properties": {
                "tags": {
                    "type": "array",
                    "items": {"type": "string"},
                    "x-array-length-distribution": {"2": 10, "3": 20, "5": 5},
                },
            },
            "required": ["tags"],
            "additionalProperties": false,
        });
        let mut generator = Generator::new(schema, options("lengths")).unwrap();
        let mut counts: BTreeMap<usize, u64> = BTreeMap::new();
        let n = 3500;
        for _ in 0..n {
            let document = generator.generate().unwrap();
            let Some(Value::Array(tags)) = document.pointer("tags").cloned() else {
                panic!("tags missing")
            };
            *counts.entry(tags.len()).or_insert(0) += 1;
        }
        assert_eq!(counts.keys().copied().collect::<Vec<_>>(), vec![2, 3, 5]);
        let expectations = [(2, 10.0 / 35.0), (3, 20.0 / 35.0), (5, 5.0 / 35.0)];
        for (len, expected) in expectations {
            let observed = counts[&len] as f64 / n as f64;
            assert!(
                (observed - expected).abs() / expected < 0.15,
                "length {len}: observed {observed}, expected {expected}"
            );
        }
    }

    #[test]
    fn formats_render_plausible_strings() {
        let schema = json!({
            "type": "object",
            "properties": {
                "mail": {"type": "string", "format": "email"},
                "site": {"type": "string", "format": "uri"},
                "ip": {"type": "string", "format": "ipv4"},
                "when": {"type": "string", "format": "date-time"},
                "who": {"type": "string", "format": "person-name"},
            },
            "required": ["mail", "site", "ip", "when", "who"],
            "additionalProperties": false,
        });
        let mut generator = Generator::new(schema, options("formats")).unwrap();
        let document = generator.generate().unwrap();
        let get = |path: &str| document.pointer(path).unwrap().as_str().unwrap().to_owned();
        assert!(get("mail").contains('@'));
        assert!(get("site").starts_with("https://"));
        assert_eq!(get("ip").split('.').count(), 4);
        assert!(get("when").ends_with('Z'));
        assert!(get("who").contains(' '));
    }

    #[test]
    fn numeric_bounds_are_respected() {
        let schema = json!({
            "type": "object",
            "properties": {
                "qty": {"type": "integer", "minimum": 5, "maximum": 14},
            },
            "required": ["qty"],
            "additionalProperties": false,
        });
        let mut generator = Generator::new(schema, options("bounds")).unwrap();
        for _ in 0..100 {
            let document = generator.generate().unwrap();
            let Some(Value::Int(qty)) = document.pointer("qty").cloned() else {
                panic!("qty missing")
            };
            assert!((5..=14).contains(&qty));
        }
    }

    #[test]
    fn bad_custom_pattern_fails_construction() {
        let schema = json!({
            "type": "object",
            "properties": {
                "m": {
                    "type": "object",
                    "x-dynamic-keys": {
                        "enabled": true,
                        "metadata": {
                            "enabled": true,
                            "pattern": "CUSTOM",
                            "customPattern": "(",
                            "confidence": 1.0,
                            "confidenceLevel": "high",
                            "countDistribution": {"1": 1},
                            "documentsAnalyzed": 1,
                            "uniqueKeysObserved": 1,
                            "exampleKeys": [],
                        },
                        "valueSchema": {
                            "types": ["string"],
                            "typeProbabilities": [1.0],
                            "schemas": [{"type": "string"}],
                            "isUniformType": true,
                            "dominantType": "string",
                        },
                    },
                },
            },
            "required": [],
            "additionalProperties": false,
        });
        assert!(Generator::new(schema, options("bad")).is_err());
    }

    #[test]
    fn seed_bytes_accepts_hex_and_text() {
        let hex = "00".repeat(32);
        assert_eq!(seed_bytes(&hex), [0u8; 32]);
        // Arbitrary text hashes deterministically.
        assert_eq!(seed_bytes("abc"), seed_bytes("abc"));
        assert_ne!(seed_bytes("abc"), seed_bytes("abd"));
    }
}
