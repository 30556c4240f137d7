//! `replay` — runs a trace replay from the command line (§4.7).

use anyhow::{bail, Context, Result};
use cachesim::analyzer::{Analyzer, AnalyzerConfig, ReportPaths};
use cachesim::config::RunConfigBuilder;
use cachesim::driver::{join_producer, spawn_replay, ChannelBounds};
use cachesim::logging::init_logging;
use cachesim::oracle::{FutureOracle, InMemoryOracle};
use cachesim::trace_source::{JsonlTraceSource, TraceSource};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Replay a request trace against one or more cache policies.
#[derive(Debug, Parser)]
#[command(name = "replay", version, about)]
struct Cli {
    /// Path to a newline-delimited JSON trace file. Reads stdin if omitted.
    #[arg(long)]
    input: Option<PathBuf>,

    /// One or more `KIND:CAPACITY` specifications (e.g. `lru:1000`,
    /// `protected-fifo:5000`, `belady:2000`).
    #[arg(long = "policy", required = true)]
    policies: Vec<String>,

    /// Default max-age (seconds) for records whose trace omits it.
    #[arg(long, default_value_t = cachesim::DEFAULT_MAXAGE_SECS)]
    default_maxage: u64,

    /// Records batched into one chunk handed to every instance.
    #[arg(long, default_value_t = cachesim::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Emit a per-count CHR row every N processed records.
    #[arg(long, default_value_t = 1000)]
    freq_records: u64,

    /// Emit a per-time CHR row every N seconds of trace time.
    #[arg(long, default_value_t = 3600.0)]
    freq_seconds: f64,

    /// Emit per-group CHR rows every N seconds; 0 disables group reporting.
    #[arg(long, default_value_t = 0.0)]
    group_interval: f64,

    /// Directory the analyzer CSV reports are written to.
    #[arg(long, default_value = "results")]
    output_dir: PathBuf,

    /// Seed for the RAN policy's per-instance RNG.
    #[arg(long, default_value_t = 0)]
    rng_seed: u64,

    /// Precompute the full trace for Bélády instead of running without
    /// lookahead (required if any `belady` policy is configured).
    #[arg(long, default_value_t = true)]
    preload_for_belady: bool,
}

impl Cli {
    fn parse_policy_spec(spec: &str) -> Result<(String, u64, bool)> {
        let (kind, capacity) = spec
            .split_once(':')
            .with_context(|| format!("policy spec '{spec}' must be KIND:CAPACITY"))?;
        let capacity: u64 = capacity
            .parse()
            .with_context(|| format!("invalid capacity in policy spec '{spec}'"))?;
        let (kind, protected) = match kind.strip_prefix("protected-") {
            Some(rest) => (rest.to_string(), true),
            None => (kind.to_string(), false),
        };
        Ok((kind, capacity, protected))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut builder = RunConfigBuilder::new()
        .default_maxage(cli.default_maxage)
        .chunk_size(cli.chunk_size)
        .freq_records(cli.freq_records)
        .freq_seconds(cli.freq_seconds)
        .group_interval(cli.group_interval)
        .output_dir(cli.output_dir.to_string_lossy().into_owned())
        .rng_seed(cli.rng_seed);

    for spec in &cli.policies {
        let (kind, capacity, protected) = Cli::parse_policy_spec(spec)?;
        builder = builder.policy(kind, capacity, protected);
    }
    let config = builder.build()?;
    std::fs::create_dir_all(&cli.output_dir).context("creating output directory")?;

    let needs_oracle = cli.policies.iter().any(|p| p.contains("belady"));
    let oracle: Option<Arc<dyn FutureOracle>> = if needs_oracle {
        if !cli.preload_for_belady {
            bail!("belady is configured but --preload-for-belady is false; there is no online oracle");
        }
        let records = load_full_trace(&cli).await?;
        info!(records = records.len(), "precomputed future oracle for Bélády");
        Some(Arc::new(InMemoryOracle::build(&records)))
    } else {
        None
    };

    let source: Box<dyn TraceSource> = match &cli.input {
        Some(path) => Box::new(JsonlTraceSource::from_path(path, config.default_maxage, config.chunk_size)?),
        None => Box::new(JsonlTraceSource::from_stdin(config.default_maxage, config.chunk_size)),
    };

    let instances = config.instances()?;
    let mut replay = spawn_replay(source, instances, oracle, ChannelBounds::default())?;

    let analyzer_config = AnalyzerConfig {
        freq_records: config.freq_records,
        freq_seconds: config.freq_seconds,
        group_interval: config.group_interval,
    };

    let mut handles = Vec::with_capacity(replay.instances.len());
    for (label, rx) in replay.instances.drain(..) {
        let paths = ReportPaths::for_instance(&cli.output_dir, &label);
        let analyzer = Analyzer::new(label, analyzer_config, paths)?;
        handles.push(tokio::spawn(analyzer.run(rx)));
    }

    for handle in handles {
        if let Err(e) = handle.await.context("analyzer task panicked")? {
            bail!("analyzer failed: {e}");
        }
    }
    join_producer(replay).await?;

    info!("replay complete");
    Ok(())
}

/// Loads the entire trace into memory so a [`InMemoryOracle`] can answer
/// "next reference" queries. Used only when a `belady` instance is
/// configured; every other policy streams the trace without buffering it.
async fn load_full_trace(cli: &Cli) -> Result<Vec<cachesim::Request>> {
    let mut source: Box<dyn TraceSource> = match &cli.input {
        Some(path) => Box::new(JsonlTraceSource::from_path(path, cli.default_maxage, cli.chunk_size)?),
        None => bail!("Bélády requires a seekable --input file, not stdin"),
    };
    let mut all = Vec::new();
    while let Some(chunk) = source.next_chunk().await? {
        all.extend(chunk.requests);
    }
    Ok(all)
}
