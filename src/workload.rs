//! CDC workload engine.
//!
//! Produces a stream of insert/update/delete operations against a target
//! collection, mixing them by configured ratios. Inserted IDs feed a rolling
//! cache so updates and deletes can target real documents; a warmup phase of
//! pure inserts primes that cache before the mixed phase starts.

use crate::emit::{Emitter, WriteMetrics};
use crate::error::Error;
use crate::gen::{seed_bytes, Generator};
use crate::idcache::DocumentIdCache;
use crate::ratelimit::RateLimiter;
use crate::value::Value;
use chrono::{SecondsFormat, Utc};
use rand::{Rng, SeedableRng};
use rand_distr::weighted_alias::WeightedAliasIndex;
use rand_distr::Distribution;
use rand_hc::Hc128Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// One simulated change event.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum CdcOperation {
    /// Insert a freshly synthesized document; the payload is the document
    /// itself.
    Insert(Value),
    /// Update one existing document.
    Update {
        /// Filter selecting the target, always by `_id`.
        filter: Value,
        /// The update document (`$set` / `$inc`).
        update: Value,
    },
    /// Delete one existing document.
    Delete {
        /// The target `_id`.
        #[serde(rename = "_id")]
        id: String,
    },
}

/// How update payloads are built.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateStrategy {
    /// `$set` a whole fresh document (minus `_id`).
    Regenerate,
    /// `$set` one to three fields of a fresh document.
    Partial,
    /// `$inc` a numeric path, falling back to touching `updatedAt`.
    Increment,
    /// Alternate between partial and increment.
    Mixed,
}

/// What happens to a deleted ID in the cache.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeleteBehavior {
    /// Forget the ID.
    Remove,
    /// Keep it selectable as-is.
    Keep,
    /// Keep it, marked as logically deleted.
    Tombstone,
}

/// Relative operation weights.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationRatios {
    /// Insert weight.
    pub insert: u32,
    /// Update weight.
    pub update: u32,
    /// Delete weight.
    pub delete: u32,
}

impl Default for OperationRatios {
    fn default() -> Self {
        OperationRatios {
            insert: 60,
            update: 30,
            delete: 10,
        }
    }
}

/// Configuration of one mutation run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MutationConfig {
    /// Target connection string.
    pub target_uri: String,
    /// Target database.
    pub database: String,
    /// Target collection.
    pub collection: String,
    /// Operation mix.
    pub ratios: OperationRatios,
    /// Target rate; ≤ 0 disables throttling.
    pub rate_limit_ops_per_sec: f64,
    /// Operations per submitted batch.
    pub batch_size: usize,
    /// Update payload strategy.
    pub update_strategy: UpdateStrategy,
    /// Cache behavior on delete.
    pub delete_behavior: DeleteBehavior,
    /// Rolling ID cache capacity.
    pub id_cache_size: usize,
    /// Pure-insert operations preceding the mixed phase.
    pub warmup_inserts: u64,
    /// Operations in the mixed phase.
    pub operations: u64,
    /// Ordered server-side writes.
    pub ordered: bool,
}

impl Default for MutationConfig {
    fn default() -> Self {
        MutationConfig {
            target_uri: "mongodb://localhost:27017".to_owned(),
            database: "mongogen".to_owned(),
            collection: "mongogen".to_owned(),
            ratios: OperationRatios::default(),
            rate_limit_ops_per_sec: 0.0,
            batch_size: 1000,
            update_strategy: UpdateStrategy::Partial,
            delete_behavior: DeleteBehavior::Remove,
            id_cache_size: 10_000,
            warmup_inserts: 0,
            operations: 0,
            ordered: false,
        }
    }
}

/// Metrics of a workload run. Generated counts and driver-acknowledged
/// counts are reported separately; updates on already-deleted targets match
/// nothing server-side.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadMetrics {
    /// Mixed-phase operations generated.
    pub operations_generated: u64,
    /// Mixed-phase inserts generated.
    pub inserts_generated: u64,
    /// Mixed-phase updates generated.
    pub updates_generated: u64,
    /// Mixed-phase deletes generated.
    pub deletes_generated: u64,
    /// Warmup inserts generated.
    pub warmup_inserts: u64,
    /// Driver-side accounting.
    pub write: WriteMetrics,
}

/// The operation producer. Owns the generator, the ID cache and its own
/// PRNG (derived from the generator seed, so a seeded run replays).
pub struct WorkloadEngine {
    generator: Generator,
    cache: DocumentIdCache,
    rng: Hc128Rng,
    mix: WeightedAliasIndex<u32>,
    update_strategy: UpdateStrategy,
    delete_behavior: DeleteBehavior,
    numeric_paths: Vec<String>,
    op_index: u64,
}

impl std::fmt::Debug for WorkloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadEngine")
            .field("op_index", &self.op_index)
            .field("cached_ids", &self.cache.len())
            .finish()
    }
}

impl WorkloadEngine {
    /// Builds an engine around a generator. Fails fast on an all-zero mix.
    pub fn new(generator: Generator, config: &MutationConfig) -> Result<Self, Error> {
        let weights = vec![
            config.ratios.insert,
            config.ratios.update,
            config.ratios.delete,
        ];
        if weights.iter().all(|weight| *weight == 0) {
            return Err(Error::InvalidRatios);
        }
        let mix = WeightedAliasIndex::new(weights).map_err(|_| Error::InvalidRatios)?;

        let mut numeric_paths = Vec::new();
        collect_numeric_paths(generator.schema(), "", &mut numeric_paths);

        let workload_seed = seed_bytes(&format!("{}:workload", generator.seed_hex()));
        Ok(WorkloadEngine {
            rng: Hc128Rng::from_seed(workload_seed),
            cache: DocumentIdCache::new(config.id_cache_size),
            generator,
            mix,
            update_strategy: config.update_strategy,
            delete_behavior: config.delete_behavior,
            numeric_paths,
            op_index: 0,
        })
    }

    /// Pre-populates the ID cache, e.g. from an existing collection.
    pub fn seed_cache(&mut self, ids: impl IntoIterator<Item = String>) {
        for id in ids {
            self.cache.add(id);
        }
    }

    /// Tracked IDs.
    pub fn cached_ids(&self) -> usize {
        self.cache.len()
    }

    /// Produces the next operation. With `force_insert` (the warmup phase)
    /// the mix is overridden to inserts only. Updates and deletes fall back
    /// to inserts while the cache is empty — there is nothing to target yet.
    pub fn next_operation(&mut self, force_insert: bool) -> Result<CdcOperation, Error> {
        let choice = if force_insert {
            0
        } else {
            self.mix.sample(&mut self.rng)
        };
        let choice = if choice != 0 && self.cache.is_empty() {
            0
        } else {
            choice
        };
        self.op_index += 1;

        match choice {
            0 => {
                let document = self.generator.generate()?;
                if let Some(id) = rendered_id(&document) {
                    self.cache.add(id);
                }
                Ok(CdcOperation::Insert(document))
            }
            1 => {
                let id = self
                    .cache
                    .get_random(&mut self.rng)
                    .map(str::to_owned)
                    .unwrap_or_default();
                let update = self.build_update()?;
                Ok(CdcOperation::Update {
                    filter: object([("_id", Value::String(id))]),
                    update,
                })
            }
            _ => {
                let id = self
                    .cache
                    .get_random(&mut self.rng)
                    .map(str::to_owned)
                    .unwrap_or_default();
                match self.delete_behavior {
                    DeleteBehavior::Remove => {
                        self.cache.remove(&id);
                    }
                    DeleteBehavior::Keep => {}
                    DeleteBehavior::Tombstone => {
                        self.cache.tombstone(&id);
                    }
                }
                Ok(CdcOperation::Delete { id })
            }
        }
    }

    fn build_update(&mut self) -> Result<Value, Error> {
        let strategy = match self.update_strategy {
            UpdateStrategy::Mixed => {
                if self.op_index % 2 == 0 {
                    UpdateStrategy::Increment
                } else {
                    UpdateStrategy::Partial
                }
            }
            strategy => strategy,
        };

        match strategy {
            UpdateStrategy::Regenerate => {
                let mut document = self.generator.generate()?;
                if let Value::Object(map) = &mut document {
                    map.remove("_id");
                }
                Ok(object([("$set", document)]))
            }
            UpdateStrategy::Partial => {
                let document = self.generator.generate()?;
                let Value::Object(map) = document else {
                    return Ok(object([("$set", Value::Object(BTreeMap::new()))]));
                };
                let fields: Vec<(String, Value)> =
                    map.into_iter().filter(|(name, _)| name != "_id").collect();
                let mut set = BTreeMap::new();
                if !fields.is_empty() {
                    let take = self.rng.gen_range(1..=3usize.min(fields.len()));
                    let mut indices: Vec<usize> = (0..fields.len()).collect();
                    for picked in 0..take {
                        let swap = self.rng.gen_range(picked..indices.len());
                        indices.swap(picked, swap);
                    }
                    for index in indices.into_iter().take(take) {
                        let (name, value) = fields[index].clone();
                        set.insert(name, value);
                    }
                }
                Ok(object([("$set", Value::Object(set))]))
            }
            UpdateStrategy::Increment | UpdateStrategy::Mixed => {
                if self.numeric_paths.is_empty() {
                    let touched = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
                    return Ok(object([(
                        "$set",
                        object([("updatedAt", Value::String(touched))]),
                    )]));
                }
                let path =
                    self.numeric_paths[self.rng.gen_range(0..self.numeric_paths.len())].clone();
                Ok(object([("$inc", object([(path.as_str(), Value::Int(1))]))]))
            }
        }
    }
}

/// Runs the workload: warmup inserts first, then the mixed phase, batched
/// through `emitter` with the limiter applied after every generated op.
pub async fn run_workload(
    engine: &mut WorkloadEngine,
    emitter: &Emitter,
    limiter: &mut RateLimiter,
    config: &MutationConfig,
    cancel: &AtomicBool,
) -> Result<WorkloadMetrics, Error> {
    let mut metrics = WorkloadMetrics::default();
    let mut batch: Vec<CdcOperation> = Vec::with_capacity(emitter.batch_size());
    let total = config.warmup_inserts + config.operations;

    for index in 0..total {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let warming = index < config.warmup_inserts;
        let operation = engine.next_operation(warming)?;

        if warming {
            metrics.warmup_inserts += 1;
        } else {
            metrics.operations_generated += 1;
            match &operation {
                CdcOperation::Insert(_) => metrics.inserts_generated += 1,
                CdcOperation::Update { .. } => metrics.updates_generated += 1,
                CdcOperation::Delete { .. } => metrics.deletes_generated += 1,
            }
        }

        batch.push(operation);
        if batch.len() >= emitter.batch_size() {
            emitter.submit_operations(&mut batch, &mut metrics.write).await?;
        }
        limiter.throttle().await;
        if (index + 1) % 100 == 0 {
            tokio::task::yield_now().await;
        }
    }

    emitter.submit_operations(&mut batch, &mut metrics.write).await?;
    Ok(metrics)
}

fn object<'a>(entries: impl IntoIterator<Item = (&'a str, Value)>) -> Value {
    Value::Object(
        entries
            .into_iter()
            .map(|(key, value)| (key.to_owned(), value))
            .collect(),
    )
}

/// The `_id` of a generated document, rendered the way filters expect it.
fn rendered_id(document: &Value) -> Option<String> {
    match document.pointer("_id")? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Static numeric leaf paths of a generation schema; dynamic-key subtrees
/// are skipped because their keys only exist at generation time.
fn collect_numeric_paths(schema: &Json, path: &str, out: &mut Vec<String>) {
    let Some(map) = schema.as_object() else { return };
    if map.contains_key("x-dynamic-keys") {
        return;
    }
    match map.get("type").and_then(Json::as_str) {
        Some("integer") | Some("number") if !path.is_empty() && path != "_id" => {
            out.push(path.to_owned());
        }
        _ => {}
    }
    if let Some(properties) = map.get("properties").and_then(Json::as_object) {
        for (name, child) in properties {
            collect_numeric_paths(child, &crate::value::join_path(path, name), out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gen::GenerateOptions;
    use serde_json::json;

    fn schema() -> Json {
        json!({
            "type": "object",
            "properties": {
                "_id": {"type": "string", "x-gen": {"key": true}},
                "qty": {"type": "integer", "minimum": 0, "maximum": 100},
                "name": {"type": "string"},
            },
            "required": ["_id", "qty", "name"],
            "additionalProperties": false,
        })
    }

    fn engine(config: &MutationConfig) -> WorkloadEngine {
        let generator = Generator::new(
            schema(),
            GenerateOptions {
                seed: Some("workload-test".to_owned()),
                ..GenerateOptions::default()
            },
        )
        .unwrap();
        WorkloadEngine::new(generator, config).unwrap()
    }

    #[test]
    fn all_zero_ratios_are_rejected() {
        let generator = Generator::new(schema(), GenerateOptions::default()).unwrap();
        let config = MutationConfig {
            ratios: OperationRatios {
                insert: 0,
                update: 0,
                delete: 0,
            },
            ..MutationConfig::default()
        };
        assert!(matches!(
            WorkloadEngine::new(generator, &config),
            Err(Error::InvalidRatios)
        ));
    }

    #[test]
    fn warmup_produces_only_inserts_and_primes_the_cache() {
        let mut engine = engine(&MutationConfig::default());
        for _ in 0..50 {
            let operation = engine.next_operation(true).unwrap();
            assert!(matches!(operation, CdcOperation::Insert(_)));
        }
        assert_eq!(engine.cached_ids(), 50);
    }

    #[test]
    fn mix_roughly_follows_ratios() {
        let config = MutationConfig {
            ratios: OperationRatios {
                insert: 40,
                update: 40,
                delete: 20,
            },
            ..MutationConfig::default()
        };
        let mut engine = engine(&config);
        engine.seed_cache((0..50).map(|i| format!("{i:024x}")));

        let (mut inserts, mut updates, mut deletes) = (0u64, 0u64, 0u64);
        for _ in 0..1000 {
            match engine.next_operation(false).unwrap() {
                CdcOperation::Insert(_) => inserts += 1,
                CdcOperation::Update { .. } => updates += 1,
                CdcOperation::Delete { .. } => deletes += 1,
            }
        }
        assert_eq!(inserts + updates + deletes, 1000);
        assert!((300..500).contains(&inserts), "inserts {inserts}");
        assert!((300..500).contains(&updates), "updates {updates}");
        assert!((120..280).contains(&deletes), "deletes {deletes}");
    }

    #[test]
    fn updates_target_cached_ids() {
        let config = MutationConfig {
            ratios: OperationRatios {
                insert: 0,
                update: 100,
                delete: 0,
            },
            ..MutationConfig::default()
        };
        let mut engine = engine(&config);
        engine.seed_cache(["known-id".to_owned()]);
        match engine.next_operation(false).unwrap() {
            CdcOperation::Update { filter, .. } => {
                assert_eq!(
                    filter.pointer("_id"),
                    Some(&Value::String("known-id".to_owned()))
                );
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn empty_cache_falls_back_to_insert() {
        let config = MutationConfig {
            ratios: OperationRatios {
                insert: 0,
                update: 100,
                delete: 0,
            },
            ..MutationConfig::default()
        };
        let mut engine = engine(&config);
        assert!(matches!(
            engine.next_operation(false).unwrap(),
            CdcOperation::Insert(_)
        ));
    }

    #[test]
    fn delete_behaviors_shape_the_cache() {
        for (behavior, expect_len, expect_tombstone) in [
            (DeleteBehavior::Remove, 0usize, false),
            (DeleteBehavior::Keep, 1, false),
            (DeleteBehavior::Tombstone, 1, true),
        ] {
            let config = MutationConfig {
                ratios: OperationRatios {
                    insert: 0,
                    update: 0,
                    delete: 100,
                },
                delete_behavior: behavior,
                ..MutationConfig::default()
            };
            let mut engine = engine(&config);
            engine.seed_cache(["victim".to_owned()]);
            match engine.next_operation(false).unwrap() {
                CdcOperation::Delete { id } => assert_eq!(id, "victim"),
                other => panic!("expected delete, got {other:?}"),
            }
            assert_eq!(engine.cached_ids(), expect_len, "behavior {behavior:?}");
            assert_eq!(
                engine.cache.is_tombstoned("victim"),
                expect_tombstone,
                "behavior {behavior:?}"
            );
        }
    }

    #[test]
    fn partial_updates_set_one_to_three_fields() {
        let config = MutationConfig {
            ratios: OperationRatios {
                insert: 0,
                update: 100,
                delete: 0,
            },
            update_strategy: UpdateStrategy::Partial,
            ..MutationConfig::default()
        };
        let mut engine = engine(&config);
        engine.seed_cache(["x".to_owned()]);
        for _ in 0..20 {
            let CdcOperation::Update { update, .. } = engine.next_operation(false).unwrap() else {
                panic!("expected update")
            };
            let set = update.pointer("$set").unwrap().as_object().unwrap();
            assert!((1..=3).contains(&set.len()));
            assert!(!set.contains_key("_id"));
        }
    }

    #[test]
    fn increment_targets_a_numeric_path() {
        let config = MutationConfig {
            ratios: OperationRatios {
                insert: 0,
                update: 100,
                delete: 0,
            },
            update_strategy: UpdateStrategy::Increment,
            ..MutationConfig::default()
        };
        let mut engine = engine(&config);
        engine.seed_cache(["x".to_owned()]);
        let CdcOperation::Update { update, .. } = engine.next_operation(false).unwrap() else {
            panic!("expected update")
        };
        assert_eq!(update.pointer("$inc.qty"), Some(&Value::Int(1)));
    }

    #[test]
    fn cdc_operations_serialize_with_tagged_payloads() {
        let operation = CdcOperation::Delete {
            id: "abc".to_owned(),
        };
        let json = serde_json::to_value(&operation).unwrap();
        assert_eq!(json["type"], "delete");
        assert_eq!(json["payload"]["_id"], "abc");
    }
}
