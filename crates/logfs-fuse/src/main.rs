#![deny(unsafe_code)]

// Use mimalloc for reduced allocation latency (enabled by default).
#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use logfs_core::{ContentBackend, FsConfig, LogFs, MemoryBackend};
use logfs_fuse::{LogFuse, MountConfig, spawn_mount};

/// Where file content is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Process memory; lost on exit
    Memory,
    /// A Redis server
    Redis,
}

/// Mount an in-memory filesystem whose file content lives in a key/value store
#[derive(Parser)]
#[command(name = "logfs")]
#[command(author, version)]
#[command(after_help = "EXAMPLES:
    # Scratch filesystem kept in memory
    logfs /mnt/logfs

    # Store file content in Redis
    logfs --backend redis --redis-url redis://127.0.0.1:6379/ /mnt/logfs
")]
struct Cli {
    /// Directory to mount on
    mountpoint: PathBuf,

    /// Content backend
    #[arg(long, value_enum, default_value = "memory")]
    backend: Backend,

    /// Redis server URL
    #[arg(
        long,
        env = "LOGFS_REDIS_URL",
        default_value = "redis://127.0.0.1:6379/"
    )]
    redis_url: String,

    /// Prefix for every Redis key
    #[arg(long, default_value = "logfs:")]
    redis_namespace: String,

    /// Kernel attribute cache TTL in milliseconds
    #[arg(long, default_value_t = 60_000)]
    attr_ttl_ms: u64,

    /// Fail mkdir/create on an existing name instead of replacing the entry
    #[arg(long)]
    reject_collisions: bool,

    /// Let other users access the mount (needs `user_allow_other`)
    #[arg(long)]
    allow_other: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    ensure!(
        cli.mountpoint.is_dir(),
        "Mountpoint {} is not a directory",
        cli.mountpoint.display()
    );

    let content = open_backend(&cli)?;
    let fs_config = if cli.reject_collisions {
        FsConfig::strict()
    } else {
        FsConfig::default()
    };
    let fs = LogFs::with_config(content, fs_config);

    let mount_config = MountConfig::default()
        .attr_ttl(Duration::from_millis(cli.attr_ttl_ms))
        .allow_other(cli.allow_other);
    let handle = spawn_mount(LogFuse::with_config(fs, mount_config), &cli.mountpoint)
        .with_context(|| format!("Failed to mount at {}", cli.mountpoint.display()))?;

    eprintln!("Mounted at {}", cli.mountpoint.display());
    eprintln!("Press Ctrl+C to unmount");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived interrupt, unmounting...");
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    handle.unmount();
    Ok(())
}

fn open_backend(cli: &Cli) -> Result<Arc<dyn ContentBackend>> {
    match cli.backend {
        Backend::Memory => Ok(Arc::new(MemoryBackend::new())),
        Backend::Redis => open_redis(cli),
    }
}

#[cfg(feature = "redis")]
fn open_redis(cli: &Cli) -> Result<Arc<dyn ContentBackend>> {
    let backend = logfs_core::RedisBackend::connect(&cli.redis_url)
        .with_context(|| format!("Failed to connect to {}", cli.redis_url))?
        .with_namespace(cli.redis_namespace.clone());
    tracing::info!(url = %cli.redis_url, namespace = %backend.namespace(), "Using Redis content backend");
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "redis"))]
fn open_redis(cli: &Cli) -> Result<Arc<dyn ContentBackend>> {
    anyhow::bail!(
        "Cannot use {} ({}): built without the `redis` feature",
        cli.redis_url,
        cli.redis_namespace
    )
}

fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}
