//! rungraph CLI
//!
//! Runs the bundled demo agents from a terminal:
//!
//! ```text
//! rungraph --config rungraph.toml run --thread t1 --input "rust async" --stream
//! rungraph --config rungraph.toml resume --thread t1 --value yes
//! rungraph --config rungraph.toml history --thread t1
//! ```

use clap::{Parser, Subcommand};
use rungraph_cli::{logging, parse_value, DemoAgent, Session};
use rungraph_core::EngineConfig;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rungraph")]
#[command(about = "Run resumable agent graphs", long_about = None)]
#[command(version)]
struct Cli {
    /// Engine configuration (TOML); defaults apply when omitted
    #[arg(short, long, global = true, env = "RUNGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Agent to run
    #[arg(short, long, global = true, value_enum, default_value = "approval")]
    agent: DemoAgent,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a run on a thread
    Run {
        /// Thread ID
        #[arg(short, long)]
        thread: String,

        /// Run input: JSON, or plain text for the input channel
        #[arg(short, long)]
        input: Option<String>,

        /// Print events as they happen instead of the final checkpoint
        #[arg(short, long)]
        stream: bool,
    },

    /// Resume a paused thread
    Resume {
        /// Thread ID
        #[arg(short, long)]
        thread: String,

        /// Value handed to the interrupted step: JSON or plain text
        #[arg(short, long)]
        value: String,

        #[arg(short, long)]
        stream: bool,
    },

    /// Show every checkpoint of a thread
    History {
        /// Thread ID
        #[arg(short, long)]
        thread: String,
    },

    /// List threads in the checkpoint store
    Threads,

    /// Delete a thread and its sub-threads
    Delete {
        /// Thread ID
        #[arg(short, long)]
        thread: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path).await?,
        None => EngineConfig::default(),
    };
    logging::init(&config.logging)?;

    let session = Session::open(config, cli.agent).await?;
    let mut out = std::io::stdout().lock();

    match cli.command {
        Commands::Run { thread, input, stream } => {
            let input = input.as_deref().map_or(Value::Null, parse_value);
            session.run(&mut out, &thread, input, stream).await
        }
        Commands::Resume { thread, value, stream } => {
            session.resume(&mut out, &thread, parse_value(&value), stream).await
        }
        Commands::History { thread } => session.history(&mut out, &thread).await,
        Commands::Threads => session.threads(&mut out).await,
        Commands::Delete { thread } => session.delete(&mut out, &thread).await,
    }
}
