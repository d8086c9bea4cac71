//! Arcane Stream Operator
//!
//! Reconciles stream definitions of every registered stream kind into
//! streaming jobs.
//!
//! ## Usage
//!
//! ```bash
//! # Run the operator (requires kubeconfig)
//! arcane-operator
//!
//! # Run with a configuration file and custom log level
//! RUST_LOG=debug arcane-operator --config /etc/arcane/operator.yaml
//!
//! # Print the CRDs and exit
//! arcane-operator --print-crds | kubectl apply -f -
//! ```

use anyhow::Context;
use arcane_operator::accessors::KubeAccessor;
use arcane_operator::{crd, Operator, OperatorConfig};
use clap::Parser;
use kube::Client;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Arcane Stream Operator
#[derive(Parser, Debug)]
#[command(name = "arcane-operator")]
#[command(version, about = "Kubernetes operator for Arcane streaming jobs")]
struct Args {
    /// Operator configuration file (YAML)
    #[arg(long, env = "ARCANE_OPERATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Namespace to watch (empty for all namespaces)
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Seconds to wait before restarting a failed pipeline
    #[arg(long, env = "RESTART_DELAY_SECONDS")]
    restart_delay_seconds: Option<u64>,

    /// Print the CRD YAML and exit
    #[arg(long)]
    print_crds: bool,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<OperatorConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let document = std::fs::read_to_string(path)
                    .with_context(|| format!("Cannot read {}", path.display()))?;
                OperatorConfig::from_yaml(&document)?
            }
            None => OperatorConfig::default(),
        };
        if let Some(namespace) = &self.namespace {
            config.namespace = Some(namespace.clone()).filter(|ns| !ns.is_empty());
        }
        if let Some(delay) = self.restart_delay_seconds {
            config.restart_delay_seconds = delay;
        }
        config.validate()?;
        Ok(config)
    }
}

fn print_crds() -> anyhow::Result<()> {
    for crd in crd::crds() {
        println!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.print_crds {
        return print_crds();
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = args.load_config()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = config.namespace.as_deref().unwrap_or("all"),
        "Starting Arcane Stream Operator"
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let accessor = Arc::new(KubeAccessor::new(client, config.field_manager.clone()));
    let operator = Operator::new(accessor.clone(), accessor, &config);

    let cancel = operator.cancellation_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!(error = %e, "Cannot listen for shutdown signal"),
        }
        cancel.cancel();
    });

    operator.run().await?;
    info!("Arcane Stream Operator shut down");
    Ok(())
}
