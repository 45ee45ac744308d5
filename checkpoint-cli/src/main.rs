/*!
Checkpoint CLI - Command-line interface for simulation checkpoints.

Inspects, verifies and deletes checkpoints stored in a local directory, and
drives a small demonstration simulation that saves periodically and on
Ctrl+C (`run`) and later continues from its last checkpoint (`resume`).
*/

use anyhow::Context as _;
use checkpoint_core::{
    checkpoint_from_config, store_from_config, Actor, ActorHandle, AdapterSet, Checkpoint,
    CheckpointConfig, CheckpointError, CheckpointMetadata, CompressionAdapter, CompressionKind,
    LennardJones, LocalFileStorage, P3m, Particle, Registry, SimulationContext, SystemParams,
    Thermostat,
};
use clap::{Parser, Subcommand, ValueEnum};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tabled::{Table, Tabled};
use tracing::{error, info, warn};

type CliCheckpoint = Checkpoint<LocalFileStorage, Box<dyn CompressionAdapter + Send + Sync>>;

/// Registry entry counting integration steps across runs
const STEPS_ENTRY: &str = "steps";

#[derive(Parser)]
#[command(name = "checkpoint")]
#[command(about = "CLI for simulation checkpoints")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Checkpoint directory or file:// URI
    #[arg(short, long, global = true, env = "CHECKPOINT_PATH")]
    path: Option<String>,

    /// JSON configuration file, overrides --path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Compression for new checkpoints
    #[arg(long, global = true, value_enum)]
    compression: Option<CompressionType>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CompressionType {
    Gzip,
    None,
}

#[derive(Subcommand)]
enum Commands {
    /// List all checkpoints
    List {
        /// Show additional details
        #[arg(short, long)]
        detailed: bool,
    },
    /// Show details of a checkpoint
    Show {
        /// Checkpoint identifier
        checkpoint_id: String,
    },
    /// Verify integrity of a checkpoint
    Verify {
        /// Checkpoint identifier
        checkpoint_id: String,
    },
    /// Delete a checkpoint
    Delete {
        /// Checkpoint identifier
        checkpoint_id: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Start the demo simulation, saving periodically and on Ctrl+C
    Run {
        #[arg(default_value = "mycheckpoint")]
        checkpoint_id: String,
        #[command(flatten)]
        run: RunArgs,
        /// Seed of the per-rank random streams
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Number of cooperating ranks
        #[arg(long, default_value_t = 1)]
        ranks: usize,
        /// Number of particles
        #[arg(long, default_value_t = 10)]
        particles: u64,
    },
    /// Restore a checkpoint, print its state and keep integrating
    Resume {
        #[arg(default_value = "mycheckpoint")]
        checkpoint_id: String,
        #[command(flatten)]
        run: RunArgs,
        /// Restart every rank's stream from this seed after loading
        #[arg(long)]
        reseed: Option<u64>,
    },
}

#[derive(clap::Args, Clone, Debug)]
struct RunArgs {
    /// Integration steps per chunk
    #[arg(long, default_value_t = 1000)]
    steps: u64,
    /// Save after every N chunks
    #[arg(long, default_value_t = 10)]
    save_every: u64,
    /// Stop after this many chunks (runs until Ctrl+C otherwise)
    #[arg(long)]
    chunks: Option<u64>,
    /// Print collected metrics when the run ends
    #[arg(long)]
    metrics: bool,
}

#[derive(Tabled)]
struct CheckpointInfo {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Sequence")]
    sequence: u64,
    #[tabled(rename = "Created")]
    timestamp: String,
    #[tabled(rename = "Sim time")]
    sim_time: String,
    #[tabled(rename = "Entries")]
    entries: usize,
    #[tabled(rename = "Size")]
    size: String,
}

#[derive(Tabled)]
struct DetailedCheckpointInfo {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Sequence")]
    sequence: u64,
    #[tabled(rename = "Created")]
    timestamp: String,
    #[tabled(rename = "Sim time")]
    sim_time: String,
    #[tabled(rename = "Ranks")]
    ranks: usize,
    #[tabled(rename = "Entries")]
    entries: usize,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Compression")]
    compression: String,
    #[tabled(rename = "Hash")]
    hash: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    let config = create_config(&cli)?;

    match cli.command {
        Commands::List { detailed } => list_checkpoints(&config, detailed).await?,
        Commands::Show { checkpoint_id } => show_checkpoint(&config, &checkpoint_id).await?,
        Commands::Verify { checkpoint_id } => verify_checkpoint(&config, &checkpoint_id).await?,
        Commands::Delete {
            checkpoint_id,
            force,
        } => delete_checkpoint(&config, &checkpoint_id, force).await?,
        Commands::Run {
            checkpoint_id,
            run,
            seed,
            ranks,
            particles,
        } => run_simulation(&config, &checkpoint_id, run, seed, ranks, particles).await?,
        Commands::Resume {
            checkpoint_id,
            run,
            reseed,
        } => resume_simulation(&config, &checkpoint_id, run, reseed).await?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn create_config(cli: &Cli) -> Result<CheckpointConfig, anyhow::Error> {
    let mut config = match (&cli.config, &cli.path) {
        (Some(file), _) => CheckpointConfig::from_json_file(file)
            .with_context(|| format!("reading configuration {}", file.display()))?,
        (None, Some(path)) => CheckpointConfig::from_uri(path)?,
        (None, None) => CheckpointConfig::default_local(),
    };

    if let Some(compression) = cli.compression {
        config = config.with_compression(match compression {
            CompressionType::Gzip => CompressionKind::Gzip,
            CompressionType::None => CompressionKind::None,
        });
    }

    config.validate()?;
    Ok(config)
}

async fn list_checkpoints(config: &CheckpointConfig, detailed: bool) -> Result<(), anyhow::Error> {
    info!("Listing checkpoints in {}", config.base_dir.display());

    if !config.base_dir.exists() {
        println!("No checkpoint directory found at: {}", config.base_dir.display());
        return Ok(());
    }

    let store = store_from_config(config)?;
    let ids = store.list()?;

    let loaded: Vec<(String, Result<CheckpointMetadata, CheckpointError>)> = ids
        .par_iter()
        .map(|id| (id.clone(), store.metadata(id)))
        .collect();

    let mut found = Vec::new();
    for (id, metadata) in loaded {
        match metadata {
            Ok(metadata) => found.push(metadata),
            Err(e) => warn!("Failed to load metadata for {}: {}", id, e),
        }
    }

    if found.is_empty() {
        println!("No checkpoints found");
        return Ok(());
    }

    found.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    let table = if detailed {
        Table::new(found.iter().map(|m| DetailedCheckpointInfo {
            id: m.checkpoint_id.clone(),
            sequence: m.sequence,
            timestamp: format_timestamp(m.timestamp.timestamp()),
            sim_time: format!("{:.3}", m.sim_time),
            ranks: m.n_ranks,
            entries: m.entry_count,
            size: format_size(stored_size(m)),
            compression: m.compression_algorithm.clone(),
            hash: m.content_hash.chars().take(12).collect(),
        }))
    } else {
        Table::new(found.iter().map(|m| CheckpointInfo {
            id: m.checkpoint_id.clone(),
            sequence: m.sequence,
            timestamp: format_timestamp(m.timestamp.timestamp()),
            sim_time: format!("{:.3}", m.sim_time),
            entries: m.entry_count,
            size: format_size(stored_size(m)),
        }))
    };
    println!("{table}");

    Ok(())
}

async fn show_checkpoint(config: &CheckpointConfig, checkpoint_id: &str) -> Result<(), anyhow::Error> {
    info!("Showing checkpoint: {}", checkpoint_id);

    let checkpoint = checkpoint_from_config(checkpoint_id, config, AdapterSet::with_builtins())?;

    let metadata = match checkpoint.metadata() {
        Ok(metadata) => metadata,
        Err(e) => {
            error!("Failed to load checkpoint: {}", e);
            return Err(e.into());
        }
    };

    println!("Checkpoint Details:");
    println!("  ID: {}", metadata.checkpoint_id);
    println!("  Snapshot: {}", metadata.snapshot_id);
    println!("  Sequence: {}", metadata.sequence);
    println!("  Created: {}", format_timestamp(metadata.timestamp.timestamp()));
    println!("  Format Version: {}", metadata.format_version);
    println!("  Content Hash: {}", metadata.content_hash);
    println!("  Simulation Time: {}", metadata.sim_time);
    println!("  Ranks: {}", metadata.n_ranks);
    println!(
        "  Size: {} ({} uncompressed, {})",
        format_size(stored_size(&metadata)),
        format_size(metadata.uncompressed_size as u64),
        metadata.compression_algorithm
    );
    if let Some(description) = &metadata.description {
        println!("  Description: {description}");
    }

    let names = checkpoint.registered_names()?;
    println!("  Registered ({}):", names.len());
    for name in names {
        println!("    {name}");
    }

    Ok(())
}

async fn verify_checkpoint(config: &CheckpointConfig, checkpoint_id: &str) -> Result<(), anyhow::Error> {
    info!("Verifying checkpoint: {}", checkpoint_id);

    let store = store_from_config(config)?;

    match store.verify(checkpoint_id) {
        Ok(metadata) => {
            println!(
                "✓ Checkpoint '{}' (sequence {}) is valid and integrity check passed",
                checkpoint_id, metadata.sequence
            );
        }
        Err(CheckpointError::CorruptSnapshot(reason)) => {
            error!("✗ Checkpoint is corrupt:");
            error!("  {}", reason);
            return Err(anyhow::anyhow!("Integrity check failed"));
        }
        Err(e) => {
            error!("✗ Failed to verify checkpoint: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}

async fn delete_checkpoint(
    config: &CheckpointConfig,
    checkpoint_id: &str,
    force: bool,
) -> Result<(), anyhow::Error> {
    if !force {
        print!("Are you sure you want to delete checkpoint '{checkpoint_id}'? (y/N): ");
        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().to_lowercase().starts_with('y') {
            println!("Deletion cancelled");
            return Ok(());
        }
    }

    let store = store_from_config(config)?;
    store.delete(checkpoint_id)?;
    println!("✓ Checkpoint deleted successfully");

    Ok(())
}

/// Charged Lennard-Jones fluid with a Langevin thermostat and P3M electrostatics
fn demo_system(seed: u64, ranks: usize, n_particles: u64) -> Result<(SimulationContext, Registry), anyhow::Error> {
    let params = SystemParams {
        box_l: [10.7437; 3],
        n_ranks: ranks,
        ..SystemParams::default()
    };
    let box_l = params.box_l;
    let mut context = SimulationContext::new(params, seed)?;

    let cutoff = 2f64.powf(1.0 / 6.0);
    context
        .non_bonded
        .set_lennard_jones(0, 0, LennardJones::new(1.0, 1.0, cutoff).with_auto_shift())?;

    for id in 0..n_particles {
        let rank = id as usize % ranks;
        let mut pos = [0.0; 3];
        for (dim, x) in pos.iter_mut().enumerate() {
            *x = context.random.uniform(rank) * box_l[dim];
        }
        let q = if id % 2 == 0 { 1.0 } else { -1.0 };
        context.particles.add(Particle::new(id, pos).with_charge(q))?;
    }
    context.thermostat = Thermostat::langevin(1.0, 1.0)?;
    let p3m = context.add_actor(P3m::new(1.0, 0.1, [16; 3], 5, 1.0, 2.5))?;

    let mut registry = Registry::new();
    registry.register("myvar", String::from("some script variable"))?;
    registry.register("p3m", p3m)?;
    registry.register(STEPS_ENTRY, 0u64)?;

    Ok((context, registry))
}

async fn run_simulation(
    config: &CheckpointConfig,
    checkpoint_id: &str,
    run: RunArgs,
    seed: u64,
    ranks: usize,
    particles: u64,
) -> Result<(), anyhow::Error> {
    let checkpoint = checkpoint_from_config(checkpoint_id, config, AdapterSet::with_builtins())?;
    let (context, registry) = demo_system(seed, ranks, particles)?;
    info!(
        "Starting '{}' with {} particles on {} ranks",
        checkpoint_id,
        context.particles.len(),
        context.n_ranks()
    );
    drive(checkpoint, context, registry, run).await
}

async fn resume_simulation(
    config: &CheckpointConfig,
    checkpoint_id: &str,
    run: RunArgs,
    reseed: Option<u64>,
) -> Result<(), anyhow::Error> {
    let checkpoint = checkpoint_from_config(checkpoint_id, config, AdapterSet::with_builtins())?;
    let (mut context, mut registry) = checkpoint
        .load()
        .with_context(|| format!("loading checkpoint '{checkpoint_id}'"))?;

    print_restored(&context, &registry, &checkpoint)?;

    if let Some(seed) = reseed {
        context.random.reseed(&vec![seed; context.n_ranks()])?;
        info!("Reseeded {} random streams with {}", context.n_ranks(), seed);
    }
    if !registry.contains(STEPS_ENTRY) {
        registry.register(STEPS_ENTRY, 0u64)?;
    }

    drive(checkpoint, context, registry, run).await
}

fn print_restored(
    context: &SimulationContext,
    registry: &Registry,
    checkpoint: &CliCheckpoint,
) -> Result<(), anyhow::Error> {
    println!("### current active actors ###");
    for (handle, actor) in context.actors().iter() {
        println!("  [{}] {}: {}", handle.slot, actor.type_tag(), actor.params()?);
    }

    println!("### user variables ###");
    match registry.get::<String>("myvar") {
        Ok(myvar) => println!("  myvar = {myvar}"),
        Err(e) => warn!("{}", e),
    }
    if let Ok(steps) = registry.get::<u64>(STEPS_ENTRY) {
        println!("  {STEPS_ENTRY} = {steps}");
    }

    println!("### system ###");
    println!("  time = {}", context.time());
    println!("  box_l = {:?}", context.params().box_l);

    println!("### non-bonded interactions ###");
    match context.non_bonded.lennard_jones(0, 0) {
        Some(lj) => println!("  lennard_jones[0, 0] = {}", serde_json::to_string(lj)?),
        None => println!("  lennard_jones[0, 0] = inactive"),
    }

    println!("### particles ###");
    for particle in context.particles.iter() {
        println!("  {}: {:?}", particle.id, particle.pos);
    }

    println!("### thermostat ###");
    for (name, value) in context.thermostat.state() {
        println!("  {name} = {value}");
    }

    println!("### p3m ###");
    let handle = registry.get::<ActorHandle>("p3m").ok();
    match handle.and_then(|h| context.actors().get_as::<P3m>(h)) {
        Some(p3m) => println!("  {}", p3m.params()?),
        None => match context.actors().find::<P3m>() {
            Some((_, p3m)) => println!("  {}", p3m.params()?),
            None => println!("  inactive"),
        },
    }

    println!("### registered objects ###");
    println!("  {:?}", checkpoint.registered_names()?);

    Ok(())
}

/// Integrate in chunks until the chunk limit or Ctrl+C, saving along the way
async fn drive(
    checkpoint: CliCheckpoint,
    mut context: SimulationContext,
    mut registry: Registry,
    run: RunArgs,
) -> Result<(), anyhow::Error> {
    if run.steps == 0 || run.save_every == 0 {
        return Err(anyhow::anyhow!("--steps and --save-every must be positive"));
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    let metrics = run.metrics;
    tokio::task::spawn_blocking(move || -> Result<(), anyhow::Error> {
        let mut chunk = 0u64;
        loop {
            context.integrate(run.steps);
            *registry.get_mut::<u64>(STEPS_ENTRY)? += run.steps;
            chunk += 1;

            let interrupted = stop.load(Ordering::SeqCst);
            let finished = interrupted || run.chunks.is_some_and(|limit| chunk >= limit);
            if finished || chunk % run.save_every == 0 {
                let metadata = if interrupted {
                    checkpoint.save_with_description(&context, &registry, "interrupted")?
                } else {
                    checkpoint.save(&context, &registry)?
                };
                println!(
                    "✓ Saved '{}' (sequence {}) at t = {:.3}",
                    checkpoint.id(),
                    metadata.sequence,
                    metadata.sim_time
                );
            }
            if finished {
                return Ok(());
            }
        }
    })
    .await??;

    if metrics {
        match checkpoint_core::CheckpointMetrics::global() {
            Some(collected) => println!("{}", collected.gather_metrics()?),
            None => warn!("Metrics are unavailable"),
        }
    }

    Ok(())
}

fn stored_size(metadata: &CheckpointMetadata) -> u64 {
    metadata.compressed_size.unwrap_or(metadata.uncompressed_size) as u64
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_timestamp(timestamp: i64) -> String {
    use chrono::{Local, TimeZone};

    match Local.timestamp_opt(timestamp, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => timestamp.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_demo_system_is_checkpointable() {
        let (context, registry) = demo_system(7, 2, 6).unwrap();
        assert_eq!(context.particles.len(), 6);
        assert!(context.actors().find::<P3m>().unwrap().1.is_bound());
        let payload = checkpoint_core::capture(&context, &registry, &AdapterSet::with_builtins()).unwrap();
        assert_eq!(payload.entries.len(), 3);
    }

    #[test]
    fn test_config_from_path() {
        let cli = Cli::parse_from(["checkpoint", "--path", "/tmp/ckpt", "--compression", "none", "list"]);
        let config = create_config(&cli).unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/tmp/ckpt"));
        assert_eq!(config.compression, CompressionKind::None);
    }
}
