//! CLI argument handling and subcommand drivers.

use crate::emit::{Emitter, EmitterConfig};
use crate::error::Error;
use crate::format::{DocumentWriter, JsonArrayFormat, NdjsonFormat, NdjsonReader};
use crate::gen::{GenerateOptions, Generator};
use crate::infer::{InferConfig, Inferencer};
use crate::keypattern::DetectorConfig;
use crate::manifest::RunManifest;
use crate::profile::{ArrayLenPolicy, ConstraintsProfile, ProfileConfig, Profiler, SizeProxy};
use crate::ratelimit::RateLimiter;
use crate::sampler::{connect, normalize_samples, redact_uri, SampleConfig, Sampler};
use crate::synth::{synthesize, SynthConfig};
use crate::validate::{StreamingValidator, ValidateConfig};
use crate::workload::{
    run_workload, DeleteBehavior, MutationConfig, OperationRatios, UpdateStrategy, WorkloadEngine,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

/// Top-level CLI arguments.
#[derive(Debug, Parser)]
#[command(name = "mongogen", version, about = "Schema-driven synthetic documents for MongoDB")]
pub struct Args {
    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// The four pipeline phases.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover schema, constraints and a generation schema from a live collection.
    Infer(InferArgs),
    /// Generate synthetic documents to a file or straight into a collection.
    Generate(GenerateArgs),
    /// Validate a generated NDJSON stream against the stored artifacts.
    Validate(ValidateArgs),
    /// Drive a simulated CDC workload of inserts, updates and deletes.
    Mutate(MutateArgs),
}

impl Command {
    /// The phase name used in error reports and manifests.
    pub fn phase(&self) -> &'static str {
        match self {
            Command::Infer(_) => "infer",
            Command::Generate(_) => "generate",
            Command::Validate(_) => "validate",
            Command::Mutate(_) => "mutate",
        }
    }
}

/// Arguments of `mongogen infer`.
#[derive(Debug, clap::Args)]
pub struct InferArgs {
    /// Source connection string.
    #[arg(long)]
    pub uri: String,

    /// Source database.
    #[arg(long)]
    pub database: String,

    /// Source collection.
    #[arg(long)]
    pub collection: String,

    /// Documents to sample.
    #[arg(long, default_value_t = 1000)]
    pub sample_size: u64,

    /// Output directory for the three artifacts.
    #[arg(short = 'o', long, default_value = "artifacts")]
    pub out_dir: PathBuf,

    /// Path glob never treated as a dynamic-key map (repeatable).
    #[arg(long = "force-static")]
    pub force_static: Vec<String>,

    /// Path glob always treated as a dynamic-key map (repeatable).
    #[arg(long = "force-dynamic")]
    pub force_dynamic: Vec<String>,

    /// Extra identifier regex for the key-pattern detector (repeatable).
    #[arg(long = "key-pattern")]
    pub key_patterns: Vec<String>,

    /// Path (besides _id) whose generated values must be unique (repeatable).
    #[arg(long = "unique-key")]
    pub additional_keys: Vec<String>,

    /// Size proxy for the document-size histogram.
    #[arg(long, value_enum, default_value_t = SizeProxyArg::LeafFieldCount)]
    pub size_proxy: SizeProxyArg,

    /// Array bound policy for the generation schema.
    #[arg(long, value_enum, default_value_t = ArrayLenPolicyArg::Minmax)]
    pub array_len_policy: ArrayLenPolicyArg,
}

/// Arguments of `mongogen generate`.
#[derive(Debug, clap::Args)]
pub struct GenerateArgs {
    /// Generation schema file.
    #[arg(short = 'i', long)]
    pub schema: PathBuf,

    /// Number of documents to generate.
    #[arg(short = 'n', long)]
    pub count: u64,

    /// RNG seed: 64 hex digits, or any string.
    #[arg(short = 's', long)]
    pub seed: Option<String>,

    /// Output file; `-` writes NDJSON to stdout. Ignored with --uri.
    #[arg(short = 'o', long)]
    pub out: Option<PathBuf>,

    /// Output layout; defaults from the file extension.
    #[arg(long, value_enum)]
    pub format: Option<OutputFormatArg>,

    /// Insert into this deployment instead of writing a file.
    #[arg(long)]
    pub uri: Option<String>,

    /// Target database (with --uri).
    #[arg(long)]
    pub database: Option<String>,

    /// Target collection (with --uri).
    #[arg(long)]
    pub collection: Option<String>,

    /// Documents per insert batch.
    #[arg(long, default_value_t = 1000)]
    pub batch_size: usize,

    /// Ordered server-side inserts; stop at the first write error.
    #[arg(long)]
    pub ordered: bool,

    /// Do not expand x-dynamic-keys annotations.
    #[arg(long)]
    pub no_dynamic_keys: bool,

    /// Ignore observed frequency distributions.
    #[arg(long)]
    pub no_frequency_distributions: bool,
}

/// Arguments of `mongogen validate`.
#[derive(Debug, clap::Args)]
pub struct ValidateArgs {
    /// NDJSON input; `-` reads stdin.
    #[arg(short = 'i', long)]
    pub input: PathBuf,

    /// Generation schema file.
    #[arg(long)]
    pub schema: PathBuf,

    /// Constraints profile file.
    #[arg(long)]
    pub profile: PathBuf,

    /// Allowed relative deviation per array percentile.
    #[arg(long, default_value_t = 0.1)]
    pub array_length_tolerance: f64,

    /// Allowed absolute deviation per size-bucket probability.
    #[arg(long, default_value_t = 0.2)]
    pub size_bucket_tolerance: f64,

    /// Retained schema-violation records.
    #[arg(long, default_value_t = 1000)]
    pub max_violations: usize,

    /// Report file; stdout by default.
    #[arg(short = 'o', long)]
    pub report: Option<PathBuf>,
}

/// Arguments of `mongogen mutate`.
#[derive(Debug, clap::Args)]
pub struct MutateArgs {
    /// Target connection string.
    #[arg(long)]
    pub uri: String,

    /// Target database.
    #[arg(long)]
    pub database: String,

    /// Target collection.
    #[arg(long)]
    pub collection: String,

    /// Generation schema file.
    #[arg(short = 'i', long)]
    pub schema: PathBuf,

    /// Mixed-phase operations to run.
    #[arg(short = 'n', long)]
    pub operations: u64,

    /// insert,update,delete weights.
    #[arg(long, default_value = "60,30,10", value_parser = parse_ratios)]
    pub ratios: OperationRatios,

    /// Target operation rate; 0 disables throttling.
    #[arg(long, default_value_t = 0.0)]
    pub rate_limit: f64,

    /// Operations per submitted batch.
    #[arg(long, default_value_t = 1000)]
    pub batch_size: usize,

    /// Update payload strategy.
    #[arg(long, value_enum, default_value_t = UpdateStrategyArg::Partial)]
    pub update_strategy: UpdateStrategyArg,

    /// Cache behavior on delete.
    #[arg(long, value_enum, default_value_t = DeleteBehaviorArg::Remove)]
    pub delete_behavior: DeleteBehaviorArg,

    /// Rolling ID cache capacity.
    #[arg(long, default_value_t = 10_000)]
    pub id_cache_size: usize,

    /// Pure-insert operations priming the ID cache.
    #[arg(long, default_value_t = 0)]
    pub warmup_inserts: u64,

    /// RNG seed: 64 hex digits, or any string.
    #[arg(short = 's', long)]
    pub seed: Option<String>,

    /// Ordered server-side writes.
    #[arg(long)]
    pub ordered: bool,
}

/// CLI-facing size proxy names.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum SizeProxyArg {
    /// Count scalar leaves.
    LeafFieldCount,
    /// Sum array lengths.
    ArrayLengthSum,
    /// Serialized byte length.
    ByteSize,
}

impl From<SizeProxyArg> for SizeProxy {
    fn from(arg: SizeProxyArg) -> Self {
        match arg {
            SizeProxyArg::LeafFieldCount => SizeProxy::LeafFieldCount,
            SizeProxyArg::ArrayLengthSum => SizeProxy::ArrayLengthSum,
            SizeProxyArg::ByteSize => SizeProxy::ByteSize,
        }
    }
}

/// CLI-facing array bound policies.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ArrayLenPolicyArg {
    /// Observed extremes.
    Minmax,
    /// Percentile-clamped bounds.
    PercentileClamp,
}

impl From<ArrayLenPolicyArg> for ArrayLenPolicy {
    fn from(arg: ArrayLenPolicyArg) -> Self {
        match arg {
            ArrayLenPolicyArg::Minmax => ArrayLenPolicy::Minmax,
            ArrayLenPolicyArg::PercentileClamp => ArrayLenPolicy::PercentileClamp,
        }
    }
}

/// CLI-facing output layouts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormatArg {
    /// One document per line.
    Ndjson,
    /// A single pretty-printed array.
    Json,
}

/// CLI-facing update strategies.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum UpdateStrategyArg {
    /// `$set` a whole fresh document.
    Regenerate,
    /// `$set` one to three fields.
    Partial,
    /// `$inc` a numeric path.
    Increment,
    /// Alternate partial and increment.
    Mixed,
}

impl From<UpdateStrategyArg> for UpdateStrategy {
    fn from(arg: UpdateStrategyArg) -> Self {
        match arg {
            UpdateStrategyArg::Regenerate => UpdateStrategy::Regenerate,
            UpdateStrategyArg::Partial => UpdateStrategy::Partial,
            UpdateStrategyArg::Increment => UpdateStrategy::Increment,
            UpdateStrategyArg::Mixed => UpdateStrategy::Mixed,
        }
    }
}

/// CLI-facing delete behaviors.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum DeleteBehaviorArg {
    /// Forget deleted IDs.
    Remove,
    /// Keep them selectable.
    Keep,
    /// Keep them, marked deleted.
    Tombstone,
}

impl From<DeleteBehaviorArg> for DeleteBehavior {
    fn from(arg: DeleteBehaviorArg) -> Self {
        match arg {
            DeleteBehaviorArg::Remove => DeleteBehavior::Remove,
            DeleteBehaviorArg::Keep => DeleteBehavior::Keep,
            DeleteBehaviorArg::Tombstone => DeleteBehavior::Tombstone,
        }
    }
}

/// Parses `insert,update,delete` weights.
fn parse_ratios(raw: &str) -> Result<OperationRatios, String> {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 3 {
        return Err("expected three comma-separated weights, e.g. 60,30,10".to_owned());
    }
    let parse = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|e| format!("bad weight '{s}': {e}"))
    };
    Ok(OperationRatios {
        insert: parse(parts[0])?,
        update: parse(parts[1])?,
        delete: parse(parts[2])?,
    })
}

/// Installs the stderr tracing subscriber, filtered by `RUST_LOG`.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

/// Runs the parsed command.
pub async fn run(args: Args) -> Result<(), Error> {
    match args.command {
        Command::Infer(args) => run_infer(args).await,
        Command::Generate(args) => run_generate(args).await,
        Command::Validate(args) => run_validate(args),
        Command::Mutate(args) => run_mutate(args).await,
    }
}

async fn run_infer(args: InferArgs) -> Result<(), Error> {
    let sample_config = SampleConfig {
        uri: args.uri.clone(),
        database: args.database.clone(),
        collection: args.collection.clone(),
        sample_size: args.sample_size,
    };
    let infer_config = InferConfig {
        detector: DetectorConfig {
            custom_patterns: args.key_patterns.clone(),
            ..DetectorConfig::default()
        },
        force_static_paths: args.force_static.clone(),
        force_dynamic_paths: args.force_dynamic.clone(),
    };
    let profile_config = ProfileConfig {
        size_proxy: args.size_proxy.into(),
        additional_keys: args.additional_keys.clone(),
        settings: crate::profile::ProfileSettings {
            array_len_policy: args.array_len_policy.into(),
            ..Default::default()
        },
        ..ProfileConfig::default()
    };
    // Configuration errors surface before the first connection attempt.
    let mut inferencer = Inferencer::new(infer_config.clone())?;
    let mut profiler = Profiler::new(profile_config.clone());

    let client = connect(&args.uri).await?;
    let result = async {
        let sampler = Sampler::new(client.clone(), sample_config.clone());
        let total = sampler.count().await?;
        tracing::info!(collection = %args.collection, total, "sampling source collection");
        let samples = sampler.sample().await?;
        let (normalized, hints) = normalize_samples(&samples);

        for document in &normalized {
            inferencer.observe(document);
            profiler.observe(document);
        }
        let inferred = inferencer.finish(&args.collection)?;
        let profile = profiler.finish(&inferred.dynamic_keys);
        let schema = synthesize(&inferred, &profile, &hints, &SynthConfig::default())?;

        fs::create_dir_all(&args.out_dir).map_err(|source| Error::Io {
            action: "create output directory",
            path: args.out_dir.clone(),
            source,
        })?;
        let inferred_path = args.out_dir.join("inferred-schema.json");
        let profile_path = args.out_dir.join("constraints-profile.json");
        let schema_path = args.out_dir.join("generation-schema.json");
        write_json(&inferred_path, &inferred)?;
        write_json(&profile_path, &profile)?;
        write_json(&schema_path, &schema)?;

        let mut manifest = RunManifest::new(
            "infer",
            json!({
                "sample": sanitized_sample_config(&sample_config),
                "infer": infer_config,
                "profile": profile_config,
            }),
        );
        manifest.add_artifact(&inferred_path)?;
        manifest.add_artifact(&profile_path)?;
        manifest.add_artifact(&schema_path)?;
        manifest.write_beside(&schema_path)?;

        tracing::info!(out_dir = %args.out_dir.display(), "discovery artifacts written");
        Ok(())
    }
    .await;

    client.shutdown().await;
    result
}

async fn run_generate(args: GenerateArgs) -> Result<(), Error> {
    let schema = read_json_file(&args.schema, "generation schema")?;
    let options = GenerateOptions {
        seed: args.seed.clone(),
        use_dynamic_keys: !args.no_dynamic_keys,
        use_frequency_distributions: !args.no_frequency_distributions,
    };
    let mut generator = Generator::new(schema, options.clone())?;
    eprintln!("Using seed: {}", generator.seed_hex());

    if let Some(uri) = &args.uri {
        let (Some(database), Some(collection)) = (&args.database, &args.collection) else {
            return Err(Error::UnsupportedCliParameter {
                kind: "generate target",
                value: "--uri requires --database and --collection".to_owned(),
            });
        };
        let client = connect(uri).await?;
        let result = async {
            let emitter = Emitter::new(
                client.database(database).collection(collection),
                EmitterConfig {
                    batch_size: args.batch_size,
                    ordered: args.ordered,
                },
            );
            let cancel = AtomicBool::new(false);
            let mut remaining = args.count;
            let documents = std::iter::from_fn(|| {
                if remaining == 0 {
                    return None;
                }
                remaining -= 1;
                Some(generator.generate())
            });
            let metrics = emitter.bulk_insert(documents, &cancel).await?;
            println!("{}", to_json_string(&metrics)?);
            Ok(())
        }
        .await;
        client.shutdown().await;
        return result;
    }

    let out = args.out.clone().unwrap_or_else(|| PathBuf::from("-"));
    let format = args
        .format
        .unwrap_or_else(|| match out.extension().and_then(|ext| ext.to_str()) {
            Some("json") => OutputFormatArg::Json,
            _ => OutputFormatArg::Ndjson,
        });

    if out.as_os_str() == "-" {
        let stdout = std::io::stdout();
        write_documents(stdout.lock(), format, &mut generator, args.count, &out)?;
        return Ok(());
    }

    let file = fs::File::create(&out).map_err(|source| Error::Io {
        action: "create output file",
        path: out.clone(),
        source,
    })?;
    write_documents(BufWriter::new(file), format, &mut generator, args.count, &out)?;

    let mut manifest = RunManifest::new(
        "generate",
        json!({
            "schema": args.schema.display().to_string(),
            "count": args.count,
            "options": GenerateOptions {
                seed: Some(generator.seed_hex()),
                ..options
            },
        }),
    );
    manifest.add_artifact(&out)?;
    manifest.set_metrics(&json!({"documents": args.count}))?;
    manifest.write_beside(&out)?;
    Ok(())
}

fn write_documents<W: Write>(
    writer: W,
    format: OutputFormatArg,
    generator: &mut Generator,
    count: u64,
    path: &Path,
) -> Result<(), Error> {
    let io_error = |source| Error::Io {
        action: "write documents",
        path: path.to_owned(),
        source,
    };
    match format {
        OutputFormatArg::Ndjson => {
            let mut writer = DocumentWriter::new(writer, NdjsonFormat);
            for _ in 0..count {
                let document = generator.generate()?;
                writer.write(&document).map_err(io_error)?;
            }
            writer.finish().map_err(io_error)?;
        }
        OutputFormatArg::Json => {
            let mut writer = DocumentWriter::new(writer, JsonArrayFormat);
            for _ in 0..count {
                let document = generator.generate()?;
                writer.write(&document).map_err(io_error)?;
            }
            writer.finish().map_err(io_error)?;
        }
    }
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<(), Error> {
    let schema = read_json_file(&args.schema, "generation schema")?;
    let profile = load_profile(&args.profile)?;
    let config = ValidateConfig {
        array_length_tolerance: args.array_length_tolerance,
        size_bucket_tolerance: args.size_bucket_tolerance,
        max_violations: args.max_violations,
    };
    let mut validator = StreamingValidator::new(&schema, profile, config)?;

    let reader: Box<dyn std::io::BufRead> = if args.input.as_os_str() == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = fs::File::open(&args.input).map_err(|source| Error::Io {
            action: "open input",
            path: args.input.clone(),
            source,
        })?;
        Box::new(BufReader::new(file))
    };

    for document in NdjsonReader::new(reader) {
        validator.observe(&document?);
    }
    let report = validator.finish();

    let rendered = to_json_string(&report)?;
    match &args.report {
        Some(path) => fs::write(path, rendered + "\n").map_err(|source| Error::Io {
            action: "write report",
            path: path.clone(),
            source,
        })?,
        None => println!("{rendered}"),
    }

    if report.overall_passed {
        Ok(())
    } else {
        let failing = report
            .array_deviations
            .iter()
            .filter(|deviation| !deviation.within_tolerance)
            .map(|deviation| deviation.path.as_str())
            .next()
            .unwrap_or("schema or uniqueness checks");
        Err(Error::Validation(format!(
            "stream deviates from the sample profile ({failing})"
        )))
    }
}

async fn run_mutate(args: MutateArgs) -> Result<(), Error> {
    let schema = read_json_file(&args.schema, "generation schema")?;
    let config = MutationConfig {
        target_uri: args.uri.clone(),
        database: args.database.clone(),
        collection: args.collection.clone(),
        ratios: args.ratios,
        rate_limit_ops_per_sec: args.rate_limit,
        batch_size: args.batch_size,
        update_strategy: args.update_strategy.into(),
        delete_behavior: args.delete_behavior.into(),
        id_cache_size: args.id_cache_size,
        warmup_inserts: args.warmup_inserts,
        operations: args.operations,
        ordered: args.ordered,
    };
    let generator = Generator::new(
        schema,
        GenerateOptions {
            seed: args.seed.clone(),
            ..GenerateOptions::default()
        },
    )?;
    eprintln!("Using seed: {}", generator.seed_hex());
    let mut engine = WorkloadEngine::new(generator, &config)?;
    let mut limiter = RateLimiter::new(config.rate_limit_ops_per_sec);

    let client = connect(&args.uri).await?;
    let result = async {
        let emitter = Emitter::new(
            client.database(&args.database).collection(&args.collection),
            EmitterConfig {
                batch_size: config.batch_size,
                ordered: config.ordered,
            },
        );
        let cancel = AtomicBool::new(false);
        let metrics = run_workload(&mut engine, &emitter, &mut limiter, &config, &cancel).await?;
        println!("{}", to_json_string(&metrics)?);
        Ok(())
    }
    .await;

    client.shutdown().await;
    result
}

fn sanitized_sample_config(config: &SampleConfig) -> SampleConfig {
    SampleConfig {
        uri: redact_uri(&config.uri),
        ..config.clone()
    }
}

fn read_json_file(path: &Path, what: &'static str) -> Result<serde_json::Value, Error> {
    let bytes = fs::read(path).map_err(|source| Error::Io {
        action: "read file",
        path: path.to_owned(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| Error::Artifact { what, source })
}

fn load_profile(path: &Path) -> Result<ConstraintsProfile, Error> {
    let bytes = fs::read(path).map_err(|source| Error::Io {
        action: "read file",
        path: path.to_owned(),
        source,
    })?;
    let mut profile: ConstraintsProfile =
        serde_json::from_slice(&bytes).map_err(|source| Error::Artifact {
            what: "constraints profile",
            source,
        })?;
    profile.normalize();
    Ok(profile)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    let rendered = to_json_string(value)?;
    fs::write(path, rendered + "\n").map_err(|source| Error::Io {
        action: "write file",
        path: path.to_owned(),
        source,
    })
}

fn to_json_string<T: serde::Serialize>(value: &T) -> Result<String, Error> {
    serde_json::to_string_pretty(value).map_err(|source| Error::Artifact {
        what: "serialized output",
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_parsing() {
        let ratios = parse_ratios("40,40,20").unwrap();
        assert_eq!((ratios.insert, ratios.update, ratios.delete), (40, 40, 20));
        assert!(parse_ratios("40,40").is_err());
        assert!(parse_ratios("a,b,c").is_err());
    }

    #[test]
    fn cli_parses_generate_invocation() {
        let args = Args::try_parse_from([
            "mongogen",
            "generate",
            "-i",
            "schema.json",
            "-n",
            "100",
            "-s",
            "test-seed",
            "-o",
            "out.ndjson",
        ])
        .unwrap();
        assert_eq!(args.command.phase(), "generate");
        let Command::Generate(generate) = args.command else {
            panic!("expected generate");
        };
        assert_eq!(generate.count, 100);
        assert_eq!(generate.seed.as_deref(), Some("test-seed"));
    }

    #[test]
    fn cli_parses_mutate_ratios() {
        let args = Args::try_parse_from([
            "mongogen",
            "mutate",
            "--uri",
            "mongodb://localhost:27017",
            "--database",
            "db",
            "--collection",
            "c",
            "-i",
            "schema.json",
            "-n",
            "500",
            "--ratios",
            "40,40,20",
            "--warmup-inserts",
            "50",
        ])
        .unwrap();
        let Command::Mutate(mutate) = args.command else {
            panic!("expected mutate");
        };
        assert_eq!(mutate.ratios.delete, 20);
        assert_eq!(mutate.warmup_inserts, 50);
    }
}
