mod config;
use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Config;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod server;
use server::{build_service, run_server};

#[derive(Parser)]
#[command(name = "holdblob")]
#[command(about = "Deduplicating content-addressed blob storage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Server {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
    /// Run garbage collection sweeps, then exit
    Gc {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,

        /// Number of sweeps, one GC interval apart
        #[arg(long, default_value_t = 1)]
        sweeps: u32,
    },
    /// List stored objects that no content record points at
    Orphans {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "holdblob=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Server { config } => serve(&config).await,
        Commands::Gc { config, sweeps } => collect_garbage(&config, sweeps).await,
        Commands::Orphans { config } => list_orphans(&config).await,
    };

    if let Err(error) = result {
        tracing::error!("{:#}", error);
        std::process::exit(1);
    }
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    Config::from_file(path).with_context(|| format!("failed to load config {}", path))
}

async fn serve(config_path: &str) -> anyhow::Result<()> {
    tracing::info!("Starting Holdblob server with config: {}", config_path);
    let cfg = load_config(config_path)?;

    tracing::info!(
        "Bind: {}, Storage: {}, GC interval: {}s",
        cfg.bind_addr,
        cfg.storage.backend.as_str(),
        cfg.gc.interval_secs
    );

    run_server(cfg).await.context("server error")
}

async fn collect_garbage(config_path: &str, sweeps: u32) -> anyhow::Result<()> {
    let cfg = load_config(config_path)?;
    let service = build_service(&cfg).context("failed to open storage")?;
    let gc = service.garbage_collector(cfg.gc.interval());

    for sweep in 0..sweeps {
        if sweep > 0 {
            tracing::info!("Waiting {:?} before next sweep", gc.interval());
            tokio::time::sleep(gc.interval()).await;
        }
        let report = gc.sweep().await.context("gc sweep failed")?;
        println!("{}", serde_json::to_string(&report)?);
    }

    Ok(())
}

async fn list_orphans(config_path: &str) -> anyhow::Result<()> {
    let cfg = load_config(config_path)?;
    let service = build_service(&cfg).context("failed to open storage")?;
    let gc = service.garbage_collector(cfg.gc.interval());

    let orphans = gc
        .find_orphaned_objects()
        .await
        .context("failed to list orphaned objects")?;
    for name in &orphans {
        println!("{}", name);
    }
    tracing::info!("Found {} orphaned objects", orphans.len());

    Ok(())
}
