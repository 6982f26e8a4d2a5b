//! hybrid-agent - composite node attestation agent
//!
//! Loads a composite plugin configuration and runs attestation sessions in
//! which every configured plugin contributes to one combined payload.

mod stdio;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use hybrid_core::{CallContext, Orchestrator, PluginRegistry};
use hybrid_plugins::BuiltinRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::stdio::LineStream;

#[derive(Parser)]
#[command(name = "hybrid-agent")]
#[command(about = "Composite node attestation agent")]
#[command(version)]
struct Cli {
    /// Log output format (logs always go to stderr)
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List the supported attestation plugins
    Plugins,

    /// Validate a composite configuration by configuring every plugin
    Check {
        /// Path to the composite configuration
        #[arg(short, long, env = "HYBRID_CONFIG")]
        config: PathBuf,
    },

    /// Run one attestation session over stdin/stdout (JSON lines)
    Attest {
        /// Path to the composite configuration
        #[arg(short, long, env = "HYBRID_CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Plugins => {
            for name in BuiltinRegistry.supported() {
                println!("{name}");
            }
        }

        Commands::Check { config } => {
            let orchestrator = configure(&config)?;
            for name in orchestrator.plugins() {
                println!("{name}");
            }
        }

        Commands::Attest { config } => {
            attest(&config).await?;
        }
    }

    Ok(())
}

/// Default filter, used only when `RUST_LOG` is unset or invalid.
const DEFAULT_LOG_FILTER: &str = "hybrid=info";

fn env_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn init_tracing(format: LogFormat) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let registry = tracing_subscriber::registry().with(env_filter(rust_log.as_deref()));

    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

fn configure(path: &Path) -> anyhow::Result<Orchestrator<BuiltinRegistry>> {
    let document = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{}'", path.display()))?;

    let orchestrator = Orchestrator::new(BuiltinRegistry);
    orchestrator
        .configure(&document)
        .with_context(|| format!("failed to configure plugins from '{}'", path.display()))?;
    Ok(orchestrator)
}

async fn attest(path: &Path) -> anyhow::Result<()> {
    let orchestrator = configure(path)?;

    let cancellation = CancellationToken::new();
    tokio::spawn({
        let cancellation = cancellation.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling attestation session");
                cancellation.cancel();
            }
        }
    });

    let context = CallContext::new(cancellation);
    info!(session = %context.session_id(), plugins = orchestrator.plugins().len(), "starting attestation session");

    orchestrator
        .run_attestation(LineStream::stdio(context))
        .await
        .map_err(|e| anyhow::anyhow!("{e} (status: {:?})", e.status_code()))
}
