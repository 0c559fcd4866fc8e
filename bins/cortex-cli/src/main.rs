mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cortex-cli")]
#[command(about = "Cortex CLI - Inspect configuration, test output and execution results", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check language profiles and the exercise catalog against each other
    ValidateConfig {
        /// Path to languages.json
        #[arg(short, long, default_value = "config/languages.json")]
        languages: PathBuf,

        /// Path to exercises.json
        #[arg(short, long, default_value = "config/exercises.json")]
        exercises: PathBuf,
    },

    /// Interpret captured test-runner output offline
    Parse {
        /// Language whose runner produced the output (java, python, typescript, go, rust)
        #[arg(short, long)]
        language: String,

        /// File holding the captured stdout/stderr
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Fetch a stored execution result
    Result {
        /// Task ID returned on submission
        #[arg(short, long)]
        task_id: String,

        /// Redis connection URL
        #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
        redis_url: String,
    },

    /// Show a submission ledger record
    Submission {
        /// Submission ID
        #[arg(short, long)]
        id: i64,

        /// Redis connection URL
        #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
        redis_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig { languages, exercises } => {
            let report = commands::validate_config(&languages, &exercises)?;
            println!("✓ {} language profiles: {}", report.languages.len(), report.languages.join(", "));
            println!("✓ {} exercises, all with a matching profile", report.exercises);
        }
        Commands::Parse { language, file } => {
            let summary = commands::parse_file(&language, &file)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Result { task_id, redis_url } => {
            let result = commands::fetch_result(&redis_url, &task_id).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Submission { id, redis_url } => {
            let record = commands::fetch_submission(&redis_url, id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }

    Ok(())
}
