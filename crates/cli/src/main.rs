use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use kube::config::Kubeconfig;
use skiff_core::{
    sort_inventory, verification, FluxKind, FluxObject, Reconcilable, ResourceRef, Verification, CONTROLLER_GVK,
};
use skiff_kubehub::{KubeProxy, KubeconfigDirectory};
use skiff_ops::{
    Alert, AlertSink, FailurePolicy, InventoryOptions, ProxyOps, Severity, SkiffOps, SyncOptions, SyncTarget,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DEFAULT_NAMESPACE: &str = "flux-system";

#[derive(Parser, Debug)]
#[command(name = "skiffctl", version, about = "Reconcile and inspect Flux resources across clusters")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace of the target resource (default: flux-system)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    /// Kubeconfig context to act on (default: current context). Restricts `controllers` and `clusters`.
    #[arg(long = "cluster", global = true)]
    cluster: Option<String>,

    /// Delay between reconcile status polls, in milliseconds
    #[arg(long = "poll-ms", global = true, env = "SKIFF_POLL_INTERVAL_MS")]
    poll_ms: Option<u64>,

    /// Status polls before a reconcile is reported as timed out
    #[arg(long = "max-attempts", global = true, env = "SKIFF_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Concurrent listing calls during `controllers`
    #[arg(long = "fanout", global = true, env = "SKIFF_FANOUT")]
    fanout: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List kubeconfig contexts usable as clusters
    Clusters,
    /// Show readiness of a Flux resource
    Status {
        /// Flux kind, e.g. Kustomization or GitRepository
        kind: String,
        name: String,
    },
    /// Request a reconcile and wait until the controller handled it
    Reconcile {
        kind: String,
        name: String,
        /// Reconcile the referenced source first
        #[arg(long = "with-source", action = ArgAction::SetTrue)]
        with_source: bool,
    },
    /// Suspend reconciliation of a resource
    Suspend { kind: String, name: String },
    /// Resume reconciliation of a resource
    Resume { kind: String, name: String },
    /// Show availability and images of one Flux controller deployment
    Controller { name: String },
    /// List Flux controller deployments across clusters
    Controllers {
        /// Fail on the first listing error instead of reporting partial results
        #[arg(long = "fail-fast", action = ArgAction::SetTrue)]
        fail_fast: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("SKIFF_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SKIFF_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid SKIFF_METRICS_ADDR; expected host:port");
        }
    }
}

/// Prints alerts as they arrive.
struct ConsoleAlerts {
    output: Output,
}

impl AlertSink for ConsoleAlerts {
    fn post(&self, alert: Alert) {
        match (self.output, alert.severity) {
            (Output::Json, _) => match serde_json::to_string(&alert) {
                Ok(s) => println!("{}", s),
                Err(e) => warn!(error = %e, "alert not serializable"),
            },
            (Output::Human, Severity::Success) => println!("✔ {}", alert.message),
            (Output::Human, Severity::Error) => eprintln!("✘ {}", alert.message),
        }
    }
}

impl Cli {
    fn sync_options(&self) -> SyncOptions {
        let d = SyncOptions::default();
        SyncOptions {
            poll_interval: self.poll_ms.map(Duration::from_millis).unwrap_or(d.poll_interval),
            max_attempts: self.max_attempts.unwrap_or(d.max_attempts),
        }
    }

    fn inventory_options(&self) -> InventoryOptions {
        let d = InventoryOptions::from_env();
        InventoryOptions { max_concurrency: self.fanout.filter(|n| *n > 0).unwrap_or(d.max_concurrency), ..d }
    }

    fn namespace(&self) -> &str { self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE) }

    /// The single cluster a per-resource command acts on.
    fn cluster(&self, kubeconfig: &Kubeconfig) -> Result<String> {
        self.cluster
            .clone()
            .or_else(|| kubeconfig.current_context.clone())
            .context("no --cluster given and kubeconfig has no current context")
    }
}

fn resolve(cli: &Cli, cluster: &str, kind: &str, name: &str) -> Result<(FluxKind, ResourceRef)> {
    let kind = FluxKind::from_str(kind)?;
    Ok((kind, ResourceRef::new(kind.gvk(), name, cli.namespace(), cluster)))
}

fn describe(v: &Verification) -> String {
    match v {
        Verification::Verified => "verified".to_string(),
        Verification::Failed { message } if message.is_empty() => "failed".to_string(),
        Verification::Failed { message } => format!("failed: {}", message),
        Verification::Unverified => "unverified".to_string(),
    }
}

fn target_of(kind: FluxKind, r: &ResourceRef) -> SyncTarget {
    SyncTarget {
        kind: kind.as_str().to_string(),
        name: r.name.clone(),
        namespace: r.namespace.clone(),
        cluster_name: r.cluster_name.clone(),
        source_ref: None,
    }
}

fn print_status(output: Output, obj: &FluxObject) -> Result<()> {
    let readiness = obj.readiness();
    let message = obj.message();
    let verified = verification(obj.conditions());
    match output {
        Output::Human => {
            let meta = obj.meta();
            println!("{} {}/{} @ {}", obj.kind_name(), meta.namespace, meta.name, meta.cluster_name);
            println!("  readiness: {}", readiness);
            println!("  suspended: {}", obj.suspended());
            if !message.is_empty() {
                println!("  message:   {}", message);
            }
            if let Some(src) = obj.source_ref() {
                println!("  source:    {}/{}", src.kind, src.name);
            }
            if let Some(v) = &verified {
                println!("  verified:  {}", describe(v));
            }
            if let Some(at) = obj.last_handled_reconcile_at() {
                println!("  handled:   {}", at);
            }
            if let FluxObject::Controller(c) = obj {
                for image in &c.images {
                    println!("  image:     {}", image);
                }
            }
        }
        Output::Json => {
            let out = serde_json::json!({
                "object": obj,
                "readiness": readiness.to_string(),
                "message": message,
                "verification": verified,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let kubeconfig = Kubeconfig::read().context("reading kubeconfig")?;
    let current = cli.cluster(&kubeconfig);
    let directory = KubeconfigDirectory::new(kubeconfig.clone()).restrict_to(cli.cluster.clone());
    let ops = ProxyOps::new(
        Arc::new(KubeProxy::new(kubeconfig)),
        Arc::new(directory),
        Arc::new(ConsoleAlerts { output: cli.output }),
    )
    .with_sync_options(cli.sync_options())
    .with_inventory_options(cli.inventory_options());

    let ok = match &cli.command {
        Commands::Clusters => {
            let clusters = ops.clusters().await.context("listing clusters")?;
            match cli.output {
                Output::Human => {
                    println!("{:<24} USER", "CLUSTER");
                    for c in &clusters {
                        println!("{:<24} {}", c.name, c.auth_identity);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&clusters)?),
            }
            true
        }
        Commands::Status { kind, name } => {
            let (kind, r) = resolve(&cli, &current?, kind, name)?;
            info!(resource = %r, "status invoked");
            let obj = ops.status(&r, kind).await.with_context(|| format!("fetching {}", r))?;
            print_status(cli.output, &obj)?;
            true
        }
        Commands::Reconcile { kind, name, with_source } => {
            let (kind, r) = resolve(&cli, &current?, kind, name)?;
            info!(resource = %r, with_source, "reconcile invoked");
            let target = if *with_source {
                let obj = ops.status(&r, kind).await.with_context(|| format!("fetching {}", r))?;
                SyncTarget::from_object(&obj)
            } else {
                target_of(kind, &r)
            };
            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if signal::ctrl_c().await.is_ok() {
                        warn!("Ctrl-C received; cancelling reconcile");
                        cancel.cancel();
                    }
                }
            });
            // The alert sink already reported the outcome.
            ops.reconcile(&target, &cancel).await.is_ok()
        }
        Commands::Suspend { kind, name } | Commands::Resume { kind, name } => {
            let suspend = matches!(cli.command, Commands::Suspend { .. });
            let (kind, r) = resolve(&cli, &current?, kind, name)?;
            info!(resource = %r, suspend, "toggle invoked");
            ops.set_suspended(&target_of(kind, &r), suspend).await.is_ok()
        }
        Commands::Controller { name } => {
            let r = ResourceRef::new(CONTROLLER_GVK, name, cli.namespace(), &current?);
            info!(resource = %r, "controller invoked");
            let obj = ops.controller(&r).await.with_context(|| format!("fetching {}", r))?;
            print_status(cli.output, &obj)?;
            true
        }
        Commands::Controllers { fail_fast } => {
            let policy = if *fail_fast { FailurePolicy::FailFast } else { FailurePolicy::BestEffort };
            let mut inv = ops.controllers(policy).await.context("listing controllers")?;
            sort_inventory(&mut inv.items);
            match cli.output {
                Output::Human => {
                    println!("{:<20} {:<20} NAME", "CLUSTER", "NAMESPACE");
                    for it in &inv.items {
                        println!("{:<20} {:<20} {}", it.cluster_name, it.namespace, it.name);
                    }
                    for e in &inv.errors {
                        eprintln!("listing error: {}", e);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&inv)?),
            }
            if !inv.is_complete() {
                error!(errors = inv.errors.len(), "inventory incomplete");
            }
            inv.is_complete()
        }
    };
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
