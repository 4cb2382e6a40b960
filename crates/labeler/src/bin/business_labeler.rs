//! CLI for the business label reconciler
//!
//! Run `business-labeler --help` for usage information.

// CLI binaries legitimately need println! for user output
#![allow(clippy::disallowed_macros)]

use anyhow::{Context, Result};
use clap::builder::NonEmptyStringValueParser;
use clap::{Args, Parser, Subcommand};
use labeler::config::{EngineConfig, LabelerConfig, DEFAULT_LABEL_KEY};
use labeler::{list_by_business, ClusterApi, KubeClusterApi, ResourceEnumerator, RetryPolicy, RunCoordinator};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "business-labeler")]
#[command(about = "Keep the business classification label consistent across workloads")]
#[command(version)]
struct Cli {
    /// Log format: text, json
    #[arg(long, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the business label on every controller and its dependents
    Reconcile(ReconcileArgs),

    /// List controllers labelled with a business category
    List {
        /// Business category to look for
        #[arg(short, long, value_parser = NonEmptyStringValueParser::new())]
        business: String,

        /// Namespace to search (all namespaces when omitted)
        #[arg(short, long)]
        namespace: Option<String>,

        /// Label key carrying the category
        #[arg(long, default_value = DEFAULT_LABEL_KEY)]
        label_key: String,
    },
}

#[derive(Args)]
struct ReconcileArgs {
    /// Path to the category table and engine configuration
    #[arg(short, long, env = "LABELER_CONFIG", default_value = "/config/labeler.yaml")]
    config: String,

    /// Only reconcile this namespace
    #[arg(short, long)]
    namespace: Option<String>,

    /// Maximum number of controllers reconciled concurrently
    #[arg(short, long)]
    workers: Option<usize>,

    /// Timeout for each Kubernetes API call, in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Stop starting new reconciliations after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Report what would change without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Output format: text, json
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Reconcile(args) => run_reconcile(args).await,
        Commands::List {
            business,
            namespace,
            label_key,
        } => run_list(&business, namespace.as_deref(), &label_key).await,
    }
}

/// Logs go to stderr so stdout only carries the report
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

fn load_config(args: &ReconcileArgs) -> Result<LabelerConfig> {
    let mut config = LabelerConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    if let Some(workers) = args.workers {
        config.engine.workers = workers;
    }
    if let Some(timeout_secs) = args.timeout_secs {
        config.engine.request_timeout_secs = timeout_secs;
    }
    config.validate().context("Invalid command line overrides")?;

    info!(
        path = %args.config,
        categories = config.table.categories.len(),
        fallback = %config.table.fallback,
        label_key = %config.label_key,
        "Loaded configuration"
    );
    Ok(config)
}

async fn cluster_api() -> Result<Arc<dyn ClusterApi>> {
    let client = kube::Client::try_default()
        .await
        .context("Failed to connect to Kubernetes cluster")?;
    Ok(Arc::new(KubeClusterApi::new(client)))
}

async fn run_reconcile(args: ReconcileArgs) -> Result<()> {
    let config = load_config(&args)?;
    let api = cluster_api().await?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));
    if let Some(deadline) = args.deadline_secs {
        tokio::spawn(cancel_after(Duration::from_secs(deadline), cancel.clone()));
    }

    let coordinator = RunCoordinator::new(api, &config)
        .with_namespace(args.namespace.clone())
        .with_dry_run(args.dry_run)
        .with_cancellation(cancel);

    let summary = coordinator.run().await?;

    match args.format {
        OutputFormat::Text => print!("{}", summary.render_text()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
    }

    if summary.has_failures() {
        warn!("Reconciliation finished with failures, see the report for details");
    }

    Ok(())
}

async fn run_list(business: &str, namespace: Option<&str>, label_key: &str) -> Result<()> {
    let api = cluster_api().await?;
    let enumerator = ResourceEnumerator::new(
        api,
        RetryPolicy::from_engine(&EngineConfig::default()),
        label_key,
    );

    let listing = list_by_business(&enumerator, label_key, business, namespace)
        .await
        .context("Failed to list controllers")?;
    print!("{}", listing.render());
    Ok(())
}

async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            warn!("Received Ctrl+C, finishing in-flight reconciliations");
            cancel.cancel();
        }
        () = cancel.cancelled() => {}
    }
}

async fn cancel_after(deadline: Duration, cancel: CancellationToken) {
    tokio::select! {
        () = tokio::time::sleep(deadline) => {
            warn!(deadline_secs = deadline.as_secs(), "Run deadline reached, no new reconciliations will start");
            cancel.cancel();
        }
        () = cancel.cancelled() => {}
    }
}
