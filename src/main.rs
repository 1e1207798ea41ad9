use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use helix::session::status_in;
use helix::{config, storage, SessionOrchestrator};

mod simulate;

/// helix - session scheduler for LEGO-based spoken-language drills
#[derive(Parser)]
#[command(name = "helix")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Triple-helix session scheduler for spoken-language drills", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Data directory (defaults to ./.helix, then ~/.helix)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory, database and default configuration
    Init,

    /// Serve the next cycle for a learner (JSON on stdout)
    Next {
        #[arg(long)]
        learner: String,
        #[arg(long)]
        course: String,
    },

    /// Record the learner's response to the pending cycle
    Respond {
        #[arg(long)]
        learner: String,
        #[arg(long)]
        course: String,
        /// Time from end of prompt to start of speech; omit when not measured
        #[arg(long)]
        latency_ms: Option<u64>,
        /// Length of the learner's utterance
        #[arg(long)]
        duration_ms: Option<u64>,
    },

    /// Close the learner's open session and fold its samples into the baseline
    EndSession {
        #[arg(long)]
        learner: String,
        #[arg(long)]
        course: String,
    },

    /// Show store totals, or one learner's progress
    Status {
        #[arg(long, requires = "course")]
        learner: Option<String>,
        #[arg(long)]
        course: Option<String>,
    },

    /// Run synthetic learners concurrently against the store
    Simulate {
        #[arg(long)]
        course: String,
        /// Number of concurrent learners
        #[arg(long, default_value = "4")]
        learners: u32,
        /// Cycles per learner
        #[arg(long, default_value = "60")]
        cycles: u32,
        /// Seed for the synthetic response generator
        #[arg(long, default_value = "7")]
        seed: u64,
        /// Print reports as JSON
        #[arg(long)]
        json: bool,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // stdout carries JSON payloads
        .init();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => config::default_data_dir()?,
    };

    match cli.command {
        Commands::Init => {
            info!("Initializing helix");
            let db = storage::init(&data_dir)?;
            println!("Initialized helix at {}", data_dir.display());
            println!("Database: {}", db.display());
            println!("Place course graphs in {}", data_dir.join("courses").display());
        }
        Commands::Next { learner, course } => {
            let mut orchestrator = SessionOrchestrator::open_in(&data_dir, &learner, &course)?;
            let outcome = orchestrator.next_cycle()?;
            print_json(&outcome)?;
        }
        Commands::Respond { learner, course, latency_ms, duration_ms } => {
            let mut orchestrator = SessionOrchestrator::open_in(&data_dir, &learner, &course)?;
            let result = orchestrator.record_response(latency_ms, duration_ms)?;
            print_json(&result)?;
        }
        Commands::EndSession { learner, course } => {
            let orchestrator = SessionOrchestrator::open_in(&data_dir, &learner, &course)?;
            let session = orchestrator.end_session()?;
            print_json(&session)?;
        }
        Commands::Status { learner, course } => match (learner, course) {
            (Some(learner), Some(course)) => {
                print_json(&status_in(&data_dir, &learner, &course)?)?;
            }
            _ => {
                println!("helix Status");
                println!("============");
                println!();
                let db = storage::db_path(&data_dir);
                if !db.exists() {
                    println!("Status: NOT INITIALIZED");
                    println!("Run 'helix init' to initialize");
                    return Ok(());
                }
                let conn = storage::open_connection(&db, config::StorageConfig::default().busy_timeout_ms)?;
                storage::init_schema(&conn)?;
                let summary = storage::summary(&conn)?;
                println!("Data directory: {}", data_dir.display());
                println!("Learners: {}", summary.learners);
                println!("Sessions: {} ({} open)", summary.sessions, summary.open_sessions);
                println!("Responses logged: {}", summary.responses);
                println!("Spikes logged: {}", summary.spikes);
            }
        },
        Commands::Simulate { course, learners, cycles, seed, json } => {
            storage::init(&data_dir)?;
            let reports = simulate::run_simulation(data_dir, course, learners, cycles, seed).await?;
            if json {
                print_json(&reports)?;
            } else {
                simulate::print_reports(&reports);
            }
        }
    }

    Ok(())
}
