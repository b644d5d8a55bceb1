//! Weld CLI - compile the built-in scenarios, inspect fusion decisions,
//! generate dot graphs and run them on the host engine.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use weld_cli::inspect::{describe_execution, describe_program};
use weld_cli::scenarios::{self, Scenario};
use weld_cli::{compare_with_unfused, compile_scenario, run_scenario};
use weld_core::BuildConfig;

#[derive(Parser)]
#[command(name = "weld")]
#[command(about = "Buffer fusing for tensor dataflow graphs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in scenarios
    List,
    /// Show per-node layouts, fusion states and buffer groups
    Inspect {
        #[arg(value_name = "SCENARIO")]
        scenario: String,

        #[command(flatten)]
        build: BuildArgs,
    },
    /// Generate a Graphviz DOT file of the fused graph
    Dot {
        #[arg(value_name = "SCENARIO")]
        scenario: String,

        /// Output file path (defaults to stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        #[command(flatten)]
        build: BuildArgs,
    },
    /// Execute a scenario on random inputs
    Run {
        #[arg(value_name = "SCENARIO")]
        scenario: String,

        /// Seed for the random inputs
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Also run unfused and report the largest difference
        #[arg(long)]
        compare: bool,

        #[command(flatten)]
        build: BuildArgs,
    },
}

#[derive(Args)]
struct BuildArgs {
    /// Disable buffer fusing
    #[arg(long)]
    no_optimize: bool,

    /// Reject graphs whose shapes are not fully known at compile time
    #[arg(long)]
    static_shapes: bool,

    /// Keep nodes that do nothing
    #[arg(long)]
    keep_identities: bool,
}

impl BuildArgs {
    fn config(&self) -> BuildConfig {
        let mut config = BuildConfig::default()
            .with_optimize_data(!self.no_optimize)
            .with_dynamic_shapes(!self.static_shapes);
        if self.keep_identities {
            config = config.without_identity_removal();
        }
        config
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => cmd_list(),
        Commands::Inspect { scenario, build } => cmd_inspect(&scenario, &build)?,
        Commands::Dot {
            scenario,
            output,
            build,
        } => cmd_dot(&scenario, output, &build)?,
        Commands::Run {
            scenario,
            seed,
            compare,
            build,
        } => cmd_run(&scenario, seed, compare, &build)?,
    }

    Ok(())
}

fn lookup(name: &str) -> Result<Scenario> {
    scenarios::find(name).with_context(|| {
        let known: Vec<&str> = scenarios::catalog().iter().map(|s| s.name).collect();
        format!("Unknown scenario '{name}' (known: {})", known.join(", "))
    })
}

fn cmd_list() {
    for scenario in scenarios::catalog() {
        println!("{:<24} {}", scenario.name, scenario.description);
    }
}

fn cmd_inspect(name: &str, build: &BuildArgs) -> Result<()> {
    let scenario = lookup(name)?;
    let program = compile_scenario(&scenario, build.config())?;
    println!("Scenario: {} - {}", scenario.name, scenario.description);
    println!();
    print!("{}", describe_program(&program));
    Ok(())
}

fn cmd_dot(name: &str, output: Option<PathBuf>, build: &BuildArgs) -> Result<()> {
    let scenario = lookup(name)?;
    let program = compile_scenario(&scenario, build.config())?;
    let dot = weld_core::dot::to_dot(program.graph());

    match output {
        Some(path) => {
            std::fs::write(&path, dot)
                .with_context(|| format!("Failed to write DOT to {}", path.display()))?;
            eprintln!("Wrote DOT output to {}", path.display());
        }
        None => print!("{dot}"),
    }
    Ok(())
}

fn cmd_run(name: &str, seed: u64, compare: bool, build: &BuildArgs) -> Result<()> {
    let scenario = lookup(name)?;
    let config = build.config();
    let (network, outputs) = run_scenario(&scenario, config, seed)?;
    print!("{}", describe_execution(&network, &outputs));

    if compare {
        let diff = compare_with_unfused(&scenario, config, seed)?;
        println!("Max difference to unfused run: {diff}");
        anyhow::ensure!(diff <= 1e-5, "Fused and unfused outputs differ by {diff}");
    }
    Ok(())
}
