//! ledger-access command line tool
//!
//! Probe endpoints, discover a working one, watch endpoint health, issue
//! reads, and push writes through the full pipeline.

#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(unused_must_use)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ledger_access::biometric::BiometricService;
use ledger_access::rpc_manager::{HttpTransport, RpcTransport};
use ledger_access::tx_pipeline::{ConfirmOptions, SubmitOptions};
use ledger_access::wallet::{NodeSigner, WalletSigner};
use ledger_access::{AccessConfig, AccessLayer, Address, MethodCall};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ledger-access.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe every endpoint and print the snapshot
    Status,
    /// Select the first usable endpoint in priority order
    Discover,
    /// Refresh endpoint health in the background until Ctrl-C
    Watch,
    /// Read-only contract call
    Call {
        #[arg(long)]
        to: String,
        #[arg(long)]
        data: String,
        #[arg(long)]
        from: Option<String>,
    },
    /// Simulate, estimate, price and submit a write through the signer
    Send {
        #[arg(long)]
        to: String,
        #[arg(long)]
        data: String,
        /// Value in wei
        #[arg(long, default_value_t = 0)]
        value: u128,
        /// Sender; defaults to the signer's first account
        #[arg(long)]
        from: Option<String>,
        /// Wait for the receipt
        #[arg(long)]
        confirm: bool,
        /// Use the wider gas margin
        #[arg(long)]
        sensitive: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json_logs)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting ledger-access");
    let config = load_config(&args.config)?;

    let transport: Arc<dyn RpcTransport> = Arc::new(HttpTransport::new());
    let signer_url = match (&config.signer_url, &args.command) {
        (Some(url), _) => url.clone(),
        (None, Command::Send { .. }) => bail!("send requires signer_url (or SIGNER_URL) to be set"),
        (None, _) => config
            .endpoint_list()
            .first()
            .cloned()
            .context("no RPC endpoints configured")?,
    };
    let signer: Arc<dyn WalletSigner> = Arc::new(NodeSigner::new(
        Arc::clone(&transport),
        signer_url,
        config.rpc.request_timeout(),
    ));
    let gate = Arc::new(BiometricService::from_settings(&config.biometric));

    let layer = AccessLayer::new(config.clone(), transport, signer, gate)
        .context("Failed to build access layer")?;

    match args.command {
        Command::Status => {
            let snapshot = layer.current_endpoint_status().await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Discover => {
            let endpoint = layer
                .pool()
                .find_working()
                .await
                .context("Endpoint discovery failed")?;
            println!("{}", endpoint);
        }
        Command::Watch => watch(&layer, config.rpc.health_refresh_interval()).await?,
        Command::Call { to, data, from } => {
            let call = MethodCall::new(Address::parse(&to)?, data);
            let from = from.as_deref().map(Address::parse).transpose()?;
            let result = layer
                .pipeline()
                .read(&call, from.as_ref())
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()).context(e.to_string()))?;
            println!("{}", result);
        }
        Command::Send {
            to,
            data,
            value,
            from,
            confirm,
            sensitive,
        } => {
            let call = MethodCall::new(Address::parse(&to)?, data).with_value(value);
            let session = layer.initialize().await.context("Session setup failed")?;
            let sender = match from {
                Some(raw) => Address::parse(&raw)?,
                None => session.account,
            };

            let mut options = SubmitOptions::from_settings(&config.pipeline, &config.retry);
            if sensitive {
                options = options.with_sensitive_margin();
            }

            let result = if confirm {
                layer
                    .pipeline()
                    .submit_and_confirm(
                        &call,
                        &sender,
                        &options,
                        &ConfirmOptions::from_settings(&config.pipeline),
                    )
                    .await
            } else {
                layer.pipeline().submit(&call, &sender, &options).await
            };

            match result {
                Ok(pending) => {
                    let hash = pending.hash.map(|h| h.to_string()).unwrap_or_default();
                    println!("{}", hash);
                    if let Some(receipt) = pending.receipt {
                        println!("{}", serde_json::to_string_pretty(&receipt)?);
                    }
                }
                Err(e) => {
                    error!(error = %e, user_rejected = e.is_user_rejection(), "Send failed");
                    bail!(e.user_message());
                }
            }
            layer.shutdown();
        }
    }

    Ok(())
}

async fn watch(layer: &AccessLayer, interval: Duration) -> Result<()> {
    let refresh = Arc::clone(layer.pool()).start_health_refresh(interval);
    let mut ticker = tokio::time::interval(interval);
    let mut last_seen = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down watch");
                break;
            }
            _ = ticker.tick() => {
                if let Some(snapshot) = layer.pool().latest_snapshot() {
                    if last_seen != Some(snapshot.taken_at) {
                        last_seen = Some(snapshot.taken_at);
                        info!(
                            usable = snapshot.usable_count(),
                            total = snapshot.records.len(),
                            taken_at = %snapshot.taken_at,
                            "Endpoint health"
                        );
                        println!("{}", serde_json::to_string(&snapshot.as_map())?);
                    }
                }
            }
        }
    }

    refresh.abort();
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let default_filter = if verbose {
        "ledger_access=debug,info"
    } else {
        "ledger_access=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?;
    }
    Ok(())
}

/// Load configuration from file with fallback to defaults, then apply the environment
fn load_config(path: &str) -> Result<AccessConfig> {
    dotenvy::dotenv().ok();

    let mut config = if Path::new(path).exists() {
        AccessConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {}", path))?
    } else {
        warn!(path, "Config file not found, using defaults");
        AccessConfig::default()
    };
    config.apply_env();
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
