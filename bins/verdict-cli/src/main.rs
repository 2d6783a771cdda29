mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "verdict-cli")]
#[command(about = "Verdict CLI - Run and submit code against a judge from the terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
pub struct EvaluateArgs {
    /// Language name (e.g., python, c++, java)
    #[arg(short, long)]
    pub language: String,

    /// Source file to evaluate
    #[arg(short, long)]
    pub file: String,

    /// JSON file with [{"stdin": ..., "expected_output": ...}] test cases
    #[arg(short, long)]
    pub tests: Option<String>,

    /// Problem id (test data is loaded from the problem catalog when --tests is absent)
    #[arg(short, long, default_value = "scratch")]
    pub problem: String,

    /// Overall evaluation timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Print the full outcome as JSON
    #[arg(long, default_value = "false")]
    pub json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run code against test cases without recording it
    Run {
        #[command(flatten)]
        args: EvaluateArgs,
    },

    /// Evaluate code and record the submission in Redis
    Submit {
        #[command(flatten)]
        args: EvaluateArgs,

        /// User the submission is recorded for
        #[arg(short, long)]
        user: String,
    },

    /// List supported languages
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { args } => {
            commands::run(&args).await?;
        }
        Commands::Submit { args, user } => {
            commands::submit(&args, &user).await?;
        }
        Commands::Languages => {
            commands::list_languages();
        }
    }

    Ok(())
}
