mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hirebench")]
#[command(about = "HireBench - Run and verify candidate code in a sandbox", long_about = None)]
struct Cli {
    /// Language configuration file (defaults to config/languages.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a complete program and print the raw execution result
    Run {
        /// Language (python, javascript, java, cpp, rust)
        #[arg(short, long)]
        lang: String,

        /// Source file
        #[arg(short, long)]
        source: PathBuf,

        /// File fed to the program's stdin
        #[arg(long)]
        stdin: Option<PathBuf>,
    },

    /// Verify a solution against a test case file
    Test {
        /// Language (python, javascript, java, cpp, rust)
        #[arg(short, long)]
        lang: String,

        /// Source file
        #[arg(short, long)]
        source: PathBuf,

        /// JSON file with the test cases
        #[arg(short, long)]
        cases: PathBuf,

        /// Function to call when it cannot be detected from the source
        #[arg(short, long)]
        function: Option<String>,

        /// Persist the summary to Redis (e.g. redis://127.0.0.1:6379)
        #[arg(long)]
        store_redis: Option<String>,
    },

    /// Screen a source file without running it
    Check {
        /// Language (python, javascript, java, cpp, rust)
        #[arg(short, long)]
        lang: String,

        /// Source file
        #[arg(short, long)]
        source: PathBuf,
    },

    /// List configured languages and their toolchains
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Run { lang, source, stdin } => {
            commands::run_program(config, &lang, &source, stdin.as_deref()).await?;
        }
        Commands::Test {
            lang,
            source,
            cases,
            function,
            store_redis,
        } => {
            let all_passed = commands::run_tests(
                config,
                &lang,
                &source,
                &cases,
                function.as_deref(),
                store_redis.as_deref(),
            )
            .await?;
            if !all_passed {
                std::process::exit(1);
            }
        }
        Commands::Check { lang, source } => {
            let safe = commands::check_source(&lang, &source)?;
            if !safe {
                std::process::exit(1);
            }
        }
        Commands::Languages => {
            commands::list_languages(config)?;
        }
    }

    Ok(())
}
