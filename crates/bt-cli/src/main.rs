//! bt-sim: run the demo behavior trees against a scripted world.
//!
//! - `bt-sim run <scenario>` ticks a scenario and prints what the agent did
//! - `bt-sim tree <scenario>` prints the flattened node layout
//! - `bt-sim list` lists the scenarios

mod scenarios;

use std::path::PathBuf;

use anyhow::{Context, Result};
use bt_core::TickContext;
use bt_engine::{RuntimeConfig, TreeComponent};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

use scenarios::Scenario;

#[derive(Parser)]
#[command(name = "bt-sim")]
#[command(about = "Behavior tree simulator", version)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tick a scenario and print the world events
    Run {
        #[arg(value_enum)]
        scenario: Scenario,

        /// Number of ticks to run
        #[arg(long, default_value_t = 80)]
        ticks: u64,

        /// Seconds per tick
        #[arg(long, default_value_t = 0.1)]
        dt: f32,

        /// Runtime config file (YAML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the configured seed
        #[arg(long)]
        seed: Option<u64>,

        /// Dump the trace log as JSON lines
        #[arg(long)]
        trace_json: bool,
    },

    /// Print the node layout of a scenario tree
    Tree {
        #[arg(value_enum)]
        scenario: Scenario,
    },

    /// List the available scenarios
    List,
}

struct RunArgs {
    scenario: Scenario,
    ticks: u64,
    dt: f32,
    config: Option<PathBuf>,
    seed: Option<u64>,
    trace_json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            scenario,
            ticks,
            dt,
            config,
            seed,
            trace_json,
        } => run(RunArgs {
            scenario,
            ticks,
            dt,
            config,
            seed,
            trace_json,
        }),
        Commands::Tree { scenario } => {
            let setup = scenario.build()?;
            print!("{}", setup.tree.describe());
            Ok(())
        }
        Commands::List => {
            for scenario in Scenario::value_variants() {
                let name = scenario
                    .to_possible_value()
                    .map(|v| v.get_name().to_string())
                    .unwrap_or_default();
                println!("{name:<10} {}", scenario.summary());
            }
            Ok(())
        }
    }
}

fn run(args: RunArgs) -> Result<()> {
    if !(args.dt.is_finite() && args.dt > 0.0) {
        anyhow::bail!("--dt must be a positive number of seconds, got {}", args.dt);
    }
    let setup = args.scenario.build()?;

    let mut config = match &args.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig {
            default_run_mode: setup.run_mode,
            ..Default::default()
        },
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    config.trace |= args.trace_json;
    let seed = config.seed;

    let mut world = setup.world;
    let mut component = TreeComponent::new(1, setup.tree, setup.blackboard).with_config(config);
    component
        .start_logic()
        .context("Failed to start behavior tree")?;

    let mut ctx = TickContext::new(0, args.dt, seed);
    let mut ticked = 0;
    while ticked < args.ticks && component.is_running() {
        ctx = ctx.advance(args.dt);
        component.tick(&ctx, &mut world);
        ticked += 1;
    }
    tracing::info!(ticks = ticked, events = world.events.len(), "simulation finished");

    for event in &world.events {
        println!("{event}");
    }
    let diagnostics = component.diagnostics();
    println!("---");
    println!("ticks:       {ticked}");
    println!("running:     {}", diagnostics.running);
    match &diagnostics.active_task {
        Some((index, name)) => println!("active task: {name} ({index})"),
        None => println!("active task: -"),
    }
    match diagnostics.last_tree_result {
        Some(result) => println!("last result: {result}"),
        None => println!("last result: -"),
    }

    if args.trace_json {
        if let Some(log) = component.trace_log() {
            for event in &log.events {
                let line = serde_json::to_string(event).context("Failed to encode trace event")?;
                println!("{line}");
            }
        }
    }
    Ok(())
}
