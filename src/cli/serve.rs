use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use clap::Args;
use tracing::{error, info};

use super::CliContext;
use botflow::{
    flow::store::{FlowDirectory, InMemoryFlowStore},
    logger::init_tracing,
    server::{AppState, serve},
    storage::S3PostPolicySigner,
};

const DEFAULT_ADDR: &str = "0.0.0.0:3000";

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Bind address. Falls back to BOTFLOW_HTTP_ADDR, then 0.0.0.0:3000
    #[arg(long)]
    pub addr: Option<SocketAddr>,

    /// Optional log level override (e.g. error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// OpenTelemetry endpoint (e.g. http://localhost:4318)
    #[arg(long)]
    pub otel_endpoint: Option<String>,
}

impl ServeArgs {
    pub fn default_server() -> Self {
        Self {
            addr: None,
            log_level: "info".to_string(),
            otel_endpoint: None,
        }
    }
}

fn resolve_addr(arg: Option<SocketAddr>) -> anyhow::Result<SocketAddr> {
    if let Some(addr) = arg {
        return Ok(addr);
    }
    let raw = env::var("BOTFLOW_HTTP_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    raw.parse()
        .with_context(|| format!("Invalid BOTFLOW_HTTP_ADDR value `{raw}`"))
}

pub async fn execute(args: ServeArgs, context: &CliContext) -> anyhow::Result<()> {
    let telemetry = init_tracing(
        context.root.clone(),
        "logs/botflow.log".to_string(),
        "logs/botflow-requests.log".to_string(),
        args.log_level,
        args.otel_endpoint,
    )
    .context("could not initialise logging")?;

    if !context.root.exists() {
        let err = format!(
            "Root directory `{}` does not exist. Set BOTFLOW_ROOT or create it first.",
            context.root.display()
        );
        error!("{}", err);
        bail!(err);
    }

    let addr = resolve_addr(args.addr)?;

    let store = InMemoryFlowStore::new();
    let directory = FlowDirectory::new(store.clone());
    let watcher = directory.watch(context.flows_dir()).await?;
    info!("{} published flows loaded", store.len());

    let telemetry = Arc::new(telemetry);
    let state = AppState {
        store,
        config: context.config_manager.clone(),
        presigner: Arc::new(S3PostPolicySigner),
        telemetry: telemetry.clone(),
    };

    println!("botflow listening on {addr}; press Ctrl‐C to exit");
    let result = serve(addr, state).await;

    info!("botflow shutting down");
    watcher.shutdown();
    telemetry.shutdown();
    result
}
