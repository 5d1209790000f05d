//! aptitude CLI: scoring, integrity audits, and batch reports for the
//! aptitude test battery.

use std::path::PathBuf;
use std::process;

use clap::{ArgGroup, Parser, Subcommand};

use aptitude_core::comparative::GroupingKey;

mod commands;
mod console;

#[derive(Parser)]
#[command(name = "aptitude", version, about = "Aptitude test battery scoring pipeline")]
struct Cli {
    /// Config file path (defaults to ./aptitude.toml, then ~/.config/aptitude/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and score raw results from a file or directory
    Score {
        /// JSON/TOML results file, or a directory of them
        #[arg(long)]
        input: PathBuf,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Show a subject's aggregated profile
    Summarize {
        /// Subject id
        #[arg(long)]
        subject: String,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Audit one subject's data flow end to end
    Audit {
        /// Subject id
        #[arg(long)]
        subject: String,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,

        /// Exit code 1 if any stage fails
        #[arg(long)]
        fail_on_invalid: bool,
    },

    /// Generate reports for many subjects
    #[command(group(ArgGroup::new("selection").required(true).args(["subjects", "all"])))]
    Batch {
        /// Subject ids (comma-separated)
        #[arg(long)]
        subjects: Option<String>,

        /// Every subject in the data service
        #[arg(long)]
        all: bool,

        /// Write JSON + HTML reports here instead of the reports collection
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pause between subjects (overrides config)
        #[arg(long)]
        delay_ms: Option<u64>,
    },

    /// Compare groups of subjects
    Compare {
        /// Subject ids (comma-separated)
        #[arg(long)]
        subjects: String,

        /// Grouping key: institution, gender, age
        #[arg(long, default_value = "institution")]
        by: GroupingKey,

        /// Output format: text, markdown, json
        #[arg(long, default_value = "text")]
        format: String,

        /// Also write an HTML rendering to this path
        #[arg(long)]
        html: Option<PathBuf>,
    },

    /// List the aptitudes and percentile bands
    Catalog,

    /// Create starter config and a sample fixture
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("aptitude=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config;

    let result = match cli.command {
        Commands::Score { input, format } => commands::score::execute(input, format),
        Commands::Summarize { subject, format } => {
            commands::summarize::execute(subject, format, config).await
        }
        Commands::Audit {
            subject,
            format,
            fail_on_invalid,
        } => commands::audit::execute(subject, format, fail_on_invalid, config).await,
        Commands::Batch {
            subjects,
            all: _,
            output,
            delay_ms,
        } => commands::batch::execute(subjects, output, delay_ms, config).await,
        Commands::Compare {
            subjects,
            by,
            format,
            html,
        } => commands::compare::execute(subjects, by, format, html, config).await,
        Commands::Catalog => commands::catalog::execute(),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
