//! Chunkline command-line entry point.
//!
//! `serve` runs the upload server; the other subcommands drive the client.

mod commands;
mod config;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "chunkline")]
#[command(about = "Resumable chunked file uploads")]
#[command(version)]
struct Cli {
    /// Config file path (default: ~/.config/chunkline/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ServerArgs {
    /// Server URL (overrides config)
    #[arg(long)]
    server: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the upload server
    Serve {
        /// Address to listen on
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Directory for staged chunks and assembled files
        #[arg(long)]
        upload_dir: Option<PathBuf>,
        /// Chunk size handed to new sessions, in bytes
        #[arg(long)]
        chunk_size: Option<u64>,
    },
    /// Upload a file
    Upload {
        /// File to upload
        file: PathBuf,
        #[command(flatten)]
        server: ServerArgs,
    },
    /// Resume an incomplete upload (the most recent one by default)
    Resume {
        /// Session ID from `chunkline list`
        session_id: Option<String>,
        #[command(flatten)]
        server: ServerArgs,
    },
    /// List incomplete uploads recorded on this machine
    List,
    /// Discard an upload on the server and forget it locally
    Cancel {
        session_id: String,
        #[command(flatten)]
        server: ServerArgs,
    },
    /// Show server status, or one session's status
    Status {
        session_id: Option<String>,
        #[command(flatten)]
        server: ServerArgs,
    },
    /// Write the effective configuration to the config file
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chunkline=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            bind,
            upload_dir,
            chunk_size,
        } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(dir) = upload_dir {
                config.server.upload_dir = dir;
            }
            if let Some(size) = chunk_size {
                config.server.chunk_size = size;
            }
            commands::serve(config.server).await
        }
        Commands::Upload { file, server } => commands::upload(&config, server.server, file).await,
        Commands::Resume { session_id, server } => {
            commands::resume(&config, server.server, session_id).await
        }
        Commands::List => commands::list(&config),
        Commands::Cancel { session_id, server } => {
            commands::cancel(&config, server.server, session_id).await
        }
        Commands::Status { session_id, server } => {
            commands::status(&config, server.server, session_id).await
        }
        Commands::InitConfig => {
            config.save()?;
            println!("Wrote {}", config.file_path().display());
            Ok(())
        }
    }
}
