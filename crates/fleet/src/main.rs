//! Main entry point of the fleet master
//!
//! Loads the configuration, connects group storage, and runs the master
//! server with an operator console until a signal or `shutdown` stops it.

mod cli;
mod config;
mod console;
mod logging;
mod signals;

use anyhow::Context;
use cli::CliArgs;
use config::{AppConfig, StorageKind};
use fleet_master::{
    CloudContext, JsonFileGateway, MasterServer, MemoryGateway, PersistenceGateway,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// The configured master, ready to run.
struct Application {
    config: AppConfig,
    gateway: Arc<dyn PersistenceGateway>,
    console: bool,
}

impl Application {
    async fn new(args: CliArgs) -> anyhow::Result<Self> {
        // Load configuration first (before logging setup)
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(bind_address) = args.bind_address {
            config.master.bind_address = bind_address;
        }
        if let Some(node_name) = args.node_name {
            config.master.node_name = node_name;
        }
        if let Some(storage_dir) = args.storage_dir {
            config.storage.directory = storage_dir.to_string_lossy().to_string();
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {e}"))?;

        logging::setup_logging(&config.logging)?;
        display_banner();
        info!("📂 Config: {}", args.config_path.display());

        let gateway: Arc<dyn PersistenceGateway> = match config.storage.kind {
            StorageKind::Json => Arc::new(JsonFileGateway::new(config.storage_directory())),
            StorageKind::Memory => {
                warn!("💾 Memory storage selected, groups are lost on exit");
                Arc::new(MemoryGateway::new())
            }
        };

        Ok(Self {
            config,
            gateway,
            console: !args.no_console,
        })
    }

    /// Connects storage, serves, and disconnects storage on every exit path.
    async fn run(self) -> anyhow::Result<()> {
        self.gateway
            .connect()
            .await
            .context("connecting group storage")?;

        let result = self.serve().await;

        if let Err(e) = self.gateway.disconnect().await {
            warn!("Failed to disconnect group storage: {}", e);
        }
        result
    }

    async fn serve(&self) -> anyhow::Result<()> {
        let ctx = CloudContext::new(self.config.to_master_config()?, Arc::clone(&self.gateway))?;
        let loaded = ctx.groups.load().await.context("loading groups")?;
        info!("📦 Loaded {} group(s)", loaded);

        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", ctx.config.bind_address);
        info!("  🏷️ Node name: {}", ctx.config.node_name);
        info!("  ⚖️ Queue: {}", if ctx.config.queue_enabled { "enabled" } else { "disabled" });
        info!("  👥 Cascade policy: {:?}", ctx.config.cascade_policy);

        let server = Arc::new(MasterServer::new(Arc::clone(&ctx)));
        let shutdown = server.shutdown_handle();

        let server_handle = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.start().await })
        };

        let console_handle = self.console.then(|| {
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            tokio::spawn(console::run(Arc::clone(&ctx), input, shutdown.clone()))
        });

        let signal_handle = tokio::spawn(async move {
            match signals::next_stop_signal().await {
                Ok(signal) => info!("📡 Received {}, initiating graceful shutdown...", signal),
                Err(e) => error!("Failed to install signal handlers: {}", e),
            }
            let _ = shutdown.send(());
        });

        info!("🛑 Press Ctrl+C to gracefully shutdown");
        let outcome = server_handle.await;

        signal_handle.abort();
        if let Some(console) = console_handle {
            console.abort();
        }

        match outcome {
            Ok(Ok(())) => {
                let stats = ctx.bus.stats();
                info!(
                    "📊 Final Statistics: {} events published, {} handler failures",
                    stats.events_published, stats.handler_failures
                );
                info!("✅ Fleet master shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(anyhow::anyhow!("server task failed: {e}")),
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }
}

/// Display startup banner using proper logging
fn display_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("⚓ Fleet master v{}", version);
    info!("🧭 Groups, services and players for a fleet of game servers");
}
