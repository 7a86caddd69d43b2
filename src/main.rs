//! Elohim Chunkstore CLI
//!
//! ## Usage
//!
//! ```bash
//! # Store a file as chunks
//! elohim-chunkstore put notes.txt ./notes.txt
//!
//! # Read it back to stdout
//! elohim-chunkstore get notes.txt
//!
//! # Push it to peers (defaults to replica_peers from config)
//! elohim-chunkstore replicate notes.txt node1:9000 node2:9000
//!
//! # Inspect and remove
//! elohim-chunkstore stat notes.txt
//! elohim-chunkstore delete notes.txt
//!
//! # Write/read/replicate/delete walkthrough with cache status
//! elohim-chunkstore demo
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use elohim_chunkstore::{BackendKind, Config, ReplicaTarget, StorageService};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "elohim-chunkstore")]
#[command(about = "Chunked object storage with LRU cache and replica fan-out")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "CHUNKSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "CHUNKSTORE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Chunk backend (fs, sled, memory)
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Chunk size in bytes
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Number of objects held in the read cache
    #[arg(long)]
    cache_capacity: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a file (or stdin with "-") under NAME
    Put { name: String, file: PathBuf },
    /// Write an object's content to stdout or --out
    Get {
        name: String,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Delete an object and all its chunks
    Delete { name: String },
    /// Fan an object out to peers
    Replicate { name: String, peers: Vec<String> },
    /// Show recorded metadata for an object
    Stat { name: String },
    /// List objects with recorded metadata
    List,
    /// Run a short write/read/replicate/delete walkthrough
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("elohim_chunkstore=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)
            .with_context(|| format!("loading config {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(size) = args.chunk_size {
        config.chunk_size = size;
    }
    if let Some(capacity) = args.cache_capacity {
        config.cache_capacity = capacity;
    }

    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if args.config.is_none() && !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let default_peers = config.replica_peers.clone();
    let service = StorageService::open(config).await?;

    let result = run(&service, args.command, default_peers).await;
    service.shutdown().await?;
    result
}

async fn run(
    service: &StorageService,
    command: Command,
    default_peers: Vec<String>,
) -> anyhow::Result<()> {
    match command {
        Command::Put { name, file } => {
            let content = if file.as_os_str() == "-" {
                let mut buf = Vec::new();
                tokio::io::stdin().read_to_end(&mut buf).await?;
                buf
            } else {
                tokio::fs::read(&file)
                    .await
                    .with_context(|| format!("reading {}", file.display()))?
            };
            service.write(&name, content).await?;
        }
        Command::Get { name, out } => {
            let content = service.read(&name).await?;
            match out {
                Some(path) => tokio::fs::write(&path, &content).await?,
                None => std::io::stdout().write_all(&content)?,
            }
        }
        Command::Delete { name } => {
            service.delete(&name).await?;
        }
        Command::Replicate { name, peers } => {
            let peers = if peers.is_empty() { default_peers } else { peers };
            let peers: Vec<ReplicaTarget> = peers.into_iter().map(ReplicaTarget::from).collect();
            let report = service.replicate(&name, &peers).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Stat { name } => match service.stat(&name)? {
            Some(metadata) => println!("{}", serde_json::to_string_pretty(&metadata)?),
            None => anyhow::bail!("no metadata recorded for {}", name),
        },
        Command::List => {
            for name in service.list()? {
                println!("{}", name);
            }
        }
        Command::Demo => demo(service).await?,
    }
    Ok(())
}

async fn demo(service: &StorageService) -> anyhow::Result<()> {
    service
        .write(
            "file1.txt",
            "This is a test file. Its content will be split into multiple chunks.",
        )
        .await?;
    service
        .write("file2.txt", "This is another file for testing purposes.")
        .await?;

    for name in ["file1.txt", "file2.txt"] {
        let content = service.read(name).await?;
        println!("{}", String::from_utf8_lossy(&content));
    }

    let peers: Vec<ReplicaTarget> = ["Node1", "Node2", "Node3"]
        .into_iter()
        .map(ReplicaTarget::from)
        .collect();
    service.replicate("file1.txt", &peers).await?;

    print_cache_status(service);

    service.delete("file1.txt").await?;
    print_cache_status(service);

    let stats = service.cache_stats();
    info!(
        hits = stats.hit_count,
        misses = stats.miss_count,
        evictions = stats.eviction_count,
        "Final cache stats"
    );
    Ok(())
}

fn print_cache_status(service: &StorageService) {
    println!("Cache Status:");
    for name in service.cache_snapshot() {
        println!(" - {}", name);
    }
}
