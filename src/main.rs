//! Shaper: adaptive reward shaping for RL agents
//!
//! Subcommands:
//!
//! - `simulate`     -- Drive scripted game environments through the shaper
//! - `config`       -- Print the effective configuration
//! - `check-table`  -- Load and summarise a static objective table

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shaper::config::{ClassifierBackend, ShapingConfig};
use shaper::env::{GameEnvironment, ScriptedGame};
use shaper::model::{AnyClassifier, Classifier};
use shaper::shaping::{RewardShaper, ShaperPool, StaticObjectiveTable};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Shaper: adaptive reward shaping for RL agents
#[derive(Parser)]
#[command(name = "shaper", version, about)]
struct Cli {
    /// Path to a JSON configuration file (uses defaults if not provided).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scripted environments through the shaping engine.
    Simulate {
        /// Number of parallel environments.
        #[arg(long, default_value_t = 2)]
        envs: usize,

        /// Steps per episode.
        #[arg(long, default_value_t = 5000)]
        steps: u64,

        /// Episodes per environment.
        #[arg(long, default_value_t = 1)]
        episodes: u64,

        /// Constant base reward per step (defaults to the game's own reward).
        #[arg(long)]
        base_reward: Option<f64>,

        /// Seed of the first environment; the others use consecutive seeds.
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Use the LLM classifier instead of the offline rules.
        #[arg(long)]
        llm: bool,

        /// Log running totals every this many steps.
        #[arg(long, default_value_t = 1000)]
        log_every: u64,
    },

    /// Print the effective configuration as JSON.
    Config,

    /// Load a static objective table and print a summary.
    CheckTable {
        /// Path to the objective table JSON file.
        path: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing (reads RUST_LOG env var, defaults to info).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ShapingConfig::load_from_file(path)?,
        None => ShapingConfig::default(),
    };

    // Fill in the API key from the environment when not set in the config file.
    if let Ok(key) = std::env::var("SHAPER_API_KEY") {
        if config.classifier.api_key.is_empty() {
            config.classifier.api_key = key;
        }
    }

    match cli.command {
        Commands::Simulate {
            envs,
            steps,
            episodes,
            base_reward,
            seed,
            llm,
            log_every,
        } => {
            if llm {
                config.classifier.backend = ClassifierBackend::Llm;
            }
            let opts = SimulateOptions {
                envs,
                steps,
                episodes,
                base_reward,
                seed,
                log_every: log_every.max(1),
            };
            cmd_simulate(config, opts).await
        }
        Commands::Config => cmd_config(&config),
        Commands::CheckTable { path } => cmd_check_table(&path),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

struct SimulateOptions {
    envs: usize,
    steps: u64,
    episodes: u64,
    base_reward: Option<f64>,
    seed: u64,
    log_every: u64,
}

#[derive(Default)]
struct Totals {
    base: f64,
    shaped: f64,
}

async fn cmd_simulate(config: ShapingConfig, opts: SimulateOptions) -> Result<()> {
    config.validate()?;
    if opts.envs == 0 {
        anyhow::bail!("--envs must be at least 1");
    }

    let table = match &config.objective_table_path {
        Some(path) => StaticObjectiveTable::load_from_file(path)?,
        None => ScriptedGame::opening(opts.seed).objective_table(),
    };
    let classifier = AnyClassifier::from_config(&config.classifier);
    tracing::info!(
        envs = opts.envs,
        steps = opts.steps,
        episodes = opts.episodes,
        classifier = classifier.name(),
        "Starting simulation"
    );

    let shaper = RewardShaper::new(Arc::new(config), Arc::new(table), Arc::new(classifier));
    let env_ids: Vec<String> = (0..opts.envs).map(|i| format!("env-{i}")).collect();
    let pool = ShaperPool::new(shaper, env_ids.iter().cloned())?;

    let mut games: Vec<ScriptedGame> = (0..opts.envs as u64)
        .map(|i| ScriptedGame::opening(opts.seed + i).with_max_steps(opts.steps))
        .collect();
    let mut totals: Vec<Totals> = env_ids.iter().map(|_| Totals::default()).collect();

    for episode in 0..opts.episodes {
        if episode > 0 {
            for env_id in &env_ids {
                pool.on_episode_reset(env_id).await?;
            }
        }
        for game in games.iter_mut() {
            game.reset().await?;
        }

        // Round-robin, one step per environment per tick.
        for tick in 1..=opts.steps {
            for (i, game) in games.iter_mut().enumerate() {
                if game.is_done() {
                    continue;
                }
                let step = game.step().await?;
                let base = opts.base_reward.unwrap_or(step.base_reward);
                let shaped = pool.on_step(&env_ids[i], base, &step.state).await?;
                totals[i].base += base;
                totals[i].shaped += shaped;
            }

            if tick % opts.log_every == 0 {
                for (env_id, t) in env_ids.iter().zip(&totals) {
                    tracing::info!(
                        env_id = %env_id,
                        episode,
                        step = tick,
                        base_total = format!("{:.2}", t.base),
                        shaped_total = format!("{:.2}", t.shaped),
                        "progress"
                    );
                }
            }
        }
    }

    for (env_id, t) in env_ids.iter().zip(&totals) {
        let snapshot = pool.debug_snapshot(env_id).await?;
        tracing::info!(
            env_id = %env_id,
            base_total = format!("{:.2}", t.base),
            shaped_total = format!("{:.2}", t.shaped),
            degraded = snapshot.degraded_evaluations,
            learned = snapshot.learned_objectives,
            "Simulation finished"
        );
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    Ok(())
}

fn cmd_config(config: &ShapingConfig) -> Result<()> {
    config.validate()?;
    let mut shown = config.clone();
    if !shown.classifier.api_key.is_empty() {
        shown.classifier.api_key = "***".to_string();
    }
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}

fn cmd_check_table(path: &Path) -> Result<()> {
    let table = StaticObjectiveTable::load_from_file(path)?;

    println!("Objective table: {}", path.display());
    println!("  Maps: {}", table.map_count());
    println!("  Locations: {}", table.location_count());
    println!();

    let mut maps: Vec<&str> = table.map_ids().collect();
    maps.sort_unstable();
    for map in maps {
        match table.locations(map) {
            Some(locations) => {
                println!("{map}:");
                for loc in locations {
                    println!("  ({}, {}) {}", loc.x, loc.y, loc.label);
                }
            }
            None => println!("{map}: (no locations, treated as unmapped)"),
        }
    }

    Ok(())
}
