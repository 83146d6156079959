// src/main.rs

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod deployer;
mod error;
mod sys;

use crate::config::{DeployConfig, StorageBackend};
use crate::deployer::DeploymentOrchestrator;
use crate::sys::actions::RuntimeCliDeployer;
use crate::sys::cancel::cancellation;
use crate::sys::remote::SyncProgressEvent;
use crate::sys::s3::S3Connector;
use crate::sys::storage::{InMemoryConnector, InMemoryObjectStore, LocalConnector};
use crate::sys::traits::StoreConnector;
use crate::sys::tvm::HttpTokenVendor;

#[derive(Parser, Debug)]
#[command(name = "webdeploy", version, about = "Publish web assets and serverless actions")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Upload into an in-memory bucket and list the resulting keys
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload the built web assets and print the public URL
    Web,
    /// Deploy serverless actions from a manifest through the runtime CLI
    Actions {
        manifest: PathBuf,
        /// Passed through to the CLI unchanged
        #[arg(last = true)]
        extra_args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ==============================================================================
    // 1. Configuration & Environment
    // ==============================================================================
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = DeployConfig::load()?;

    // ==============================================================================
    // 2. Dependency Injection
    // ==============================================================================
    let dry_bucket = Arc::new(InMemoryObjectStore::new());
    let connector: Arc<dyn StoreConnector> = if cli.dry_run {
        Arc::new(InMemoryConnector::new(dry_bucket.clone()))
    } else {
        match &config.storage.backend {
            StorageBackend::S3(settings) => Arc::new(S3Connector::new(settings.clone())),
            StorageBackend::Directory(root) => Arc::new(LocalConnector::new(root.clone())),
        }
    };
    let orchestrator = DeploymentOrchestrator::new(
        Arc::new(HttpTokenVendor::new()?),
        connector,
        Arc::new(RuntimeCliDeployer::default()),
    );

    let (handle, token) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after in-flight uploads");
            handle.cancel();
        }
    });

    // ==============================================================================
    // 3. Run
    // ==============================================================================
    match cli.command {
        Command::Web => {
            let on_progress = |event: &SyncProgressEvent| {
                println!("progress: deploying {}", event.relative_path);
            };
            let url = orchestrator
                .deploy_web(&config, &token, &on_progress)
                .await
                .inspect_err(|e| {
                    if e.is_retryable() {
                        tracing::warn!("Deployment failed with a transient error, it is safe to run again");
                    }
                })?;
            if cli.dry_run {
                for key in dry_bucket.keys().await {
                    println!("dry-run: {}", key);
                }
            }
            println!("{}", url);
        }
        Command::Actions { manifest, extra_args } => {
            orchestrator
                .deploy_actions(&manifest, &config.runtime, &extra_args)
                .await?;
            tracing::info!("Actions deployed from {}", manifest.display());
        }
    }

    Ok(())
}
