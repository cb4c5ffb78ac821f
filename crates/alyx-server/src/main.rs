use std::{path::PathBuf, sync::Arc, time::Duration};

use alyx_admin::AlyxConfig;
use alyx_events::EventBus;
use alyx_functions::{FunctionRegistry, FunctionRuntime, RuntimeTable};
use alyx_hooks::{HookDispatcher, HookRegistry};
use alyx_realtime::RealtimeHub;
use alyx_reqlog::RequestLogRing;
use alyx_schedule::ScheduleEngine;
use alyx_server::{routes, state::AppState};
use alyx_storage::Gateway;
use alyx_txn::TransactionManager;
use alyx_watcher::Watcher;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const REQUEST_LOG_CAPACITY: usize = 4096;
const GLOBAL_FUNCTION_CONCURRENCY: usize = 32;
const GLOBAL_FUNCTION_QUEUE: usize = 256;
const PER_FUNCTION_CONCURRENCY: usize = 8;
const PER_FUNCTION_QUEUE: usize = 64;
const SCHEDULE_TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(name = "alyx-server", about = "Reactive backend core")]
struct Cli {
    /// Path to the YAML configuration file (§4.J).
    #[arg(long, short = 'c', default_value = "alyx.yaml")]
    config: PathBuf,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,alyx_server=debug"));
    let json_format = std::env::var("ALYX_LOG_FORMAT").map(|v| v == "json").unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json_format {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    tracing::info!(config_path = %cli.config.display(), "starting alyx-server");

    let config = Arc::new(AlyxConfig::load(&cli.config)?);

    let gateway = Gateway::open(&config.database)?;
    let txn = TransactionManager::new(gateway.clone(), alyx_txn::transaction_timeout_from_env());
    let bus = EventBus::new(gateway.clone(), config.events.to_events_config()).await?;

    let functions_root = PathBuf::from(&config.functions.path);
    let function_registry = FunctionRegistry::new();
    function_registry.reload(&functions_root);
    let functions = Arc::new(FunctionRuntime::new(
        function_registry.clone(),
        RuntimeTable::default(),
        GLOBAL_FUNCTION_CONCURRENCY,
        GLOBAL_FUNCTION_QUEUE,
        PER_FUNCTION_CONCURRENCY,
        PER_FUNCTION_QUEUE,
        format!("http://{}:{}", config.server.host, config.server.port),
    ));

    let hooks = HookRegistry::new();
    let hook_dispatcher = HookDispatcher::new(hooks.clone(), bus.clone(), functions.clone());
    hook_dispatcher.install();

    let schedules = Arc::new(ScheduleEngine::new(gateway.clone(), bus.clone(), SCHEDULE_TICK_INTERVAL).await?);
    let realtime = RealtimeHub::new(gateway.clone(), bus.clone(), config.realtime.clone());
    let request_log = Arc::new(RequestLogRing::new(REQUEST_LOG_CAPACITY));

    let mut background = bus.clone().spawn_loops();
    background.extend(schedules.clone().spawn_loops());
    background.push(realtime.clone().spawn_poll_loop());

    if config.dev.enabled {
        let watcher = Watcher::new(function_registry.clone(), functions_root.clone())
            .with_build_timeout(Duration::from_secs(30));
        background.push(watcher.spawn());
        tracing::info!("watcher & hot-reload enabled (dev mode)");
    }

    let state = AppState {
        gateway,
        txn: txn.clone(),
        bus,
        function_registry,
        functions,
        hooks,
        hook_dispatcher,
        schedules,
        realtime,
        request_log,
        config: config.clone(),
    };

    let app = routes::build(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    txn.shutdown().await;
    for handle in background {
        handle.abort();
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "failed to install ctrl-c handler");
    }
    tracing::info!("shutdown signal received");
}
