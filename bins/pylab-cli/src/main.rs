mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pylab-cli")]
#[command(about = "pylab CLI - Grade Python submissions locally", long_about = None)]
struct Cli {
    /// Exercises directory (overrides config and PYLAB_EXERCISES_DIR)
    #[arg(long, global = true)]
    exercises_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List categories and exercises
    List,

    /// Grade a file against an exercise from the catalog
    Run {
        /// Exercise id
        #[arg(short, long)]
        exercise: String,

        /// Python file with the submission
        #[arg(short, long)]
        code: PathBuf,

        /// Print the raw RunResult as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Grade a file against an ad hoc JSON test list
    Check {
        /// Python file with the submission
        #[arg(short, long)]
        code: PathBuf,

        /// JSON array of {input, expected, description?, hidden?}
        #[arg(short, long)]
        tests: PathBuf,

        /// Data file the submission may open (repeatable)
        #[arg(short, long = "data-file")]
        data_files: Vec<String>,

        /// Function to call (defaults to the last top-level function)
        #[arg(short, long)]
        entry_point: Option<String>,

        /// Wall-clock timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print the raw RunResult as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = pylab_common::config::PlatformConfig::load_default()?;
    if let Some(dir) = cli.exercises_dir {
        config.exercises_dir = dir;
    }

    let success = match cli.command {
        Commands::List => {
            commands::list_exercises(&config)?;
            true
        }
        Commands::Run {
            exercise,
            code,
            json,
        } => commands::run_exercise(&config, &exercise, &code, json).await?,
        Commands::Check {
            code,
            tests,
            data_files,
            entry_point,
            timeout_ms,
            json,
        } => {
            commands::check(
                &config,
                &code,
                &tests,
                data_files,
                entry_point.as_deref(),
                timeout_ms,
                json,
            )
            .await?
        }
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
