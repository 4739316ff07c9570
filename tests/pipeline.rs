//! End-to-end pipeline tests: discovery through generation and validation,
//! with no database in the loop.

use data_encoding::HEXLOWER;
use mongogen::format::{DocumentWriter, NdjsonFormat};
use mongogen::gen::{GenerateOptions, Generator};
use mongogen::infer::{InferConfig, Inferencer, InferredSchema};
use mongogen::keypattern::KeyPattern;
use mongogen::profile::{ConstraintsProfile, ProfileConfig, Profiler};
use mongogen::synth::{synthesize, SynthConfig};
use mongogen::validate::{StreamingValidator, ValidateConfig};
use mongogen::value::Value;
use regex::Regex;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

fn uuid(n: usize) -> String {
    format!("{:08x}-1111-4ce2-ae06-3b5098e10ad5", n)
}

/// 100 documents, each with a map of 8–12 UUID keys to integer balances and
/// a `tags` array whose lengths follow 2:10, 3:20, 5:5.
fn sample_corpus() -> Vec<Value> {
    let mut key_counter = 0;
    (0..100)
        .map(|i| {
            let mut balances = serde_json::Map::new();
            let keys = 8 + i % 5;
            for _ in 0..keys {
                balances.insert(uuid(key_counter), json!(100 + key_counter as i64));
                key_counter += 1;
            }
            let tag_len = match i % 35 {
                n if n < 10 => 2,
                n if n < 30 => 3,
                _ => 5,
            };
            Value::from_json(&json!({
                "_id": format!("{i:024x}"),
                "accountBalances": balances,
                "tags": vec!["tag"; tag_len],
                "qty": (i % 50) as i64,
            }))
        })
        .collect()
}

fn discover(corpus: &[Value]) -> (InferredSchema, ConstraintsProfile, serde_json::Value) {
    let mut inferencer = Inferencer::new(InferConfig::default()).unwrap();
    let mut profiler = Profiler::new(ProfileConfig::default());
    for document in corpus {
        inferencer.observe(document);
        profiler.observe(document);
    }
    let inferred = inferencer.finish("accounts").unwrap();
    let profile = profiler.finish(&inferred.dynamic_keys);
    let schema = synthesize(&inferred, &profile, &BTreeMap::new(), &SynthConfig::default()).unwrap();
    (inferred, profile, schema)
}

fn generate_ndjson(schema: &serde_json::Value, count: u64, seed: &str) -> Vec<u8> {
    let mut generator = Generator::new(
        schema.clone(),
        GenerateOptions {
            seed: Some(seed.to_owned()),
            ..GenerateOptions::default()
        },
    )
    .unwrap();
    let mut writer = DocumentWriter::new(Vec::new(), NdjsonFormat);
    for _ in 0..count {
        writer.write(&generator.generate().unwrap()).unwrap();
    }
    writer.finish().unwrap()
}

#[test]
fn uuid_map_round_trip() {
    let corpus = sample_corpus();
    let (inferred, _profile, schema) = discover(&corpus);

    // Discovery detected the UUID map with confident metadata.
    let analysis = &inferred.dynamic_keys["accountBalances"];
    assert_eq!(analysis.metadata.pattern, KeyPattern::Uuid);
    assert!(analysis.metadata.confidence >= 0.8);
    let stats = analysis.metadata.count_stats.unwrap();
    assert_eq!(stats.min, 8.0);
    assert_eq!(stats.max, 12.0);

    // Every generated document carries 8–12 UUID keys mapping to integers.
    let uuid_shape =
        Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap();
    let mut generator = Generator::new(
        schema,
        GenerateOptions {
            seed: Some("round-trip".to_owned()),
            ..GenerateOptions::default()
        },
    )
    .unwrap();
    for _ in 0..10 {
        let document = generator.generate().unwrap();
        let balances = document
            .pointer("accountBalances")
            .and_then(Value::as_object)
            .unwrap();
        assert!((8..=12).contains(&balances.len()), "{} keys", balances.len());
        for (key, value) in balances {
            assert!(uuid_shape.is_match(key), "bad key {key}");
            assert!(matches!(value, Value::Int(_)), "bad value for {key}");
        }
    }
}

#[test]
fn seed_replay_is_byte_identical() {
    let corpus = sample_corpus();
    let (_, _, schema) = discover(&corpus);

    let first = generate_ndjson(&schema, 10, "test-determinism-seed");
    let second = generate_ndjson(&schema, 10, "test-determinism-seed");
    assert_eq!(first, second);
    assert_eq!(
        HEXLOWER.encode(&Sha256::digest(&first)),
        HEXLOWER.encode(&Sha256::digest(&second))
    );

    let other = generate_ndjson(&schema, 10, "another-seed");
    assert_ne!(first, other);
}

#[test]
fn generated_stream_passes_validation() {
    let corpus = sample_corpus();
    let (_, profile, schema) = discover(&corpus);

    let mut generator = Generator::new(
        schema.clone(),
        GenerateOptions {
            seed: Some("validate-me".to_owned()),
            ..GenerateOptions::default()
        },
    )
    .unwrap();
    let mut validator =
        StreamingValidator::new(&schema, profile, ValidateConfig::default()).unwrap();
    for _ in 0..2000 {
        validator.observe(&generator.generate().unwrap());
    }
    let report = validator.finish();
    assert_eq!(report.conformance_rate, 1.0, "violations: {:?}", report.violations.first());
    assert!(
        report.array_deviations.iter().all(|d| d.within_tolerance),
        "array deviations: {:?}",
        report.array_deviations
    );
    assert!(report.overall_passed, "report failed: {report:?}");
}

#[test]
fn skewed_stream_fails_validation_naming_the_path() {
    let corpus = sample_corpus();
    let (_, profile, schema) = discover(&corpus);

    let mut validator =
        StreamingValidator::new(&schema, profile, ValidateConfig::default()).unwrap();
    // Arrays systematically too long.
    for i in 0..200 {
        validator.observe(&Value::from_json(&json!({
            "_id": format!("{i:024x}"),
            "tags": vec!["tag"; 9],
            "qty": 1,
            "accountBalances": {},
        })));
    }
    let report = validator.finish();
    assert!(!report.overall_passed);
    assert!(report
        .array_deviations
        .iter()
        .any(|d| d.path == "tags" && !d.within_tolerance));
}

#[test]
fn legacy_constraints_match_new_form() {
    let schema = json!({
        "type": "object",
        "properties": {
            "_id": {"type": "string"},
            "tags": {"type": "array", "items": {"type": "string"}},
        },
        "required": ["_id"],
        "additionalProperties": false,
    });

    let legacy: ConstraintsProfile = {
        let mut profile: ConstraintsProfile = serde_json::from_value(json!({
            "arrayStats": {"tags": {"observedLengths": [1, 1, 2, 3, 3, 3]}},
            "numericRanges": {},
            "sizeBuckets": [],
        }))
        .unwrap();
        profile.normalize();
        profile
    };
    let current: ConstraintsProfile = {
        let mut profile: ConstraintsProfile = serde_json::from_value(json!({
            "arrayStats": {"tags": {
                "fieldPath": "tags",
                "distribution": {"1": 2, "2": 1, "3": 3},
                "arraysAnalyzed": 6,
            }},
            "numericRanges": {},
            "sizeBuckets": [],
        }))
        .unwrap();
        profile.normalize();
        profile
    };

    let stream: Vec<Value> = (0..60)
        .map(|i| {
            Value::from_json(&json!({
                "_id": format!("{i}"),
                "tags": vec!["t"; [1, 1, 2, 3, 3, 3][i % 6]],
            }))
        })
        .collect();

    let run = |profile: ConstraintsProfile| {
        let mut validator =
            StreamingValidator::new(&schema, profile, ValidateConfig::default()).unwrap();
        for document in &stream {
            validator.observe(document);
        }
        validator.finish()
    };

    let legacy_report = run(legacy);
    let current_report = run(current);
    let key = |report: &mongogen::validate::ValidationReport| {
        report
            .array_deviations
            .iter()
            .map(|d| (d.path.clone(), d.percentile.to_bits(), d.deviation.to_bits()))
            .collect::<Vec<_>>()
    };
    assert_eq!(key(&legacy_report), key(&current_report));
    assert!(legacy_report.overall_passed);
}

#[test]
fn numeric_ranges_survive_the_pipeline() {
    let corpus = sample_corpus();
    let (_, profile, schema) = discover(&corpus);
    assert!(profile.numeric_ranges.contains_key("qty"));

    let mut generator = Generator::new(
        schema,
        GenerateOptions {
            seed: Some("ranges".to_owned()),
            ..GenerateOptions::default()
        },
    )
    .unwrap();
    for _ in 0..100 {
        let document = generator.generate().unwrap();
        let Some(Value::Int(qty)) = document.pointer("qty").cloned() else {
            panic!("qty missing");
        };
        assert!((0..=49).contains(&qty), "qty {qty} out of observed range");
    }
}
