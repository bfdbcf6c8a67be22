//! # Repo Health CLI (`rh`)
//!
//! The `rh` binary clones a Git repository, samples its code through an
//! embedding index, and asks an LLM for a structured health report. It can
//! run one analysis in-process or serve the job API over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! rh --config ./config/rh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rh init` | Create the SQLite database and run schema migrations |
//! | `rh serve` | Start the HTTP job API |
//! | `rh analyze <url>` | Analyze a repository in-process and print the report |
//! | `rh analyze <url> --no-wait` | Queue an analysis on a running `rh serve` |
//! | `rh status <id>` | Print a job's status snapshot |
//! | `rh report <id>` | Print a completed job's report |
//! | `rh jobs` | List recent jobs |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! rh init --config ./config/rh.toml
//!
//! # Analyze a public repository and wait for the report
//! rh analyze github.com/octocat/Hello-World
//!
//! # Analyze a branch with JSON progress on stderr
//! rh analyze https://github.com/rust-lang/log --branch master --progress json
//!
//! # Serve the API
//! rh serve --config ./config/rh.toml
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use repo_health::progress::ProgressMode;
use repo_health::{commands, config, logging, migrate, server};

/// Repo Health: repository health reports from sampled code.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rh.example.toml` for a full example. When the file
/// does not exist, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "rh",
    about = "Repo Health: repository health reports via retrieval-augmented generation",
    version,
    long_about = "Repo Health clones a Git repository, chunks and embeds its source files, \
    samples a representative set of chunks, and asks an LLM for a JSON health report \
    (quality score, security findings, complexity hotspots, recommendations). Jobs run \
    one at a time and their progress and reports are kept in SQLite."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/rh.toml`. Database, workspace, embedding, LLM
    /// and server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/rh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the jobs, reports and vector
    /// tables. Running it more than once is safe.
    Init,

    /// Start the HTTP job API.
    ///
    /// Binds to `[server].bind`. Jobs left pending or processing by a
    /// previous run are marked failed before the first request is served.
    Serve,

    /// Analyze a repository.
    ///
    /// Without `--no-wait` the analysis runs in this process; progress is
    /// written to stderr and the report JSON to stdout. Exits non-zero when
    /// the analysis fails.
    Analyze {
        /// Repository URL (`https://host/owner/repo`, `host/owner/repo`, or `git@host:owner/repo`).
        url: String,

        /// Branch to analyze instead of the default branch.
        #[arg(long)]
        branch: Option<String>,

        /// Queue the job on the running `rh serve` instance and print its snapshot.
        #[arg(long)]
        no_wait: bool,

        /// Progress output on stderr.
        #[arg(long, value_enum, default_value = "auto")]
        progress: ProgressArg,
    },

    /// Print a job's status snapshot as JSON.
    Status {
        /// Job UUID.
        id: String,
    },

    /// Print a completed job's report as JSON.
    Report {
        /// Job UUID.
        id: String,
    },

    /// List recent jobs, newest first.
    Jobs {
        /// Maximum number of jobs to print.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    /// Human progress when stderr is a terminal, otherwise none.
    Auto,
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        config::Config::minimal()
    };
    logging::init(&cfg.logging)?;
    if !cli.config.exists() {
        tracing::debug!(path = %cli.config.display(), "config file not found, using defaults");
    }

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Analyze {
            url,
            branch,
            no_wait,
            progress,
        } => {
            if no_wait {
                commands::run_submit_remote(&cfg, &url, branch).await?;
            } else {
                commands::run_analyze(&cfg, &url, branch, progress.into()).await?;
            }
        }
        Commands::Status { id } => {
            commands::run_status(&cfg, &id).await?;
        }
        Commands::Report { id } => {
            commands::run_report(&cfg, &id).await?;
        }
        Commands::Jobs { limit } => {
            commands::run_jobs(&cfg, limit).await?;
        }
    }

    Ok(())
}
