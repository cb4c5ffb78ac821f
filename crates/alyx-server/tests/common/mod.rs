use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use alyx_admin::AlyxConfig;
use alyx_events::{EventBus, EventsConfig};
use alyx_functions::{FunctionRegistry, FunctionRuntime, RuntimeConfig, RuntimeTable};
use alyx_hooks::{HookDispatcher, HookRegistry};
use alyx_realtime::{RealtimeConfig, RealtimeHub};
use alyx_reqlog::RequestLogRing;
use alyx_schedule::ScheduleEngine;
use alyx_server::state::AppState;
use alyx_storage::{Gateway, StorageConfig};
use alyx_txn::TransactionManager;

pub const ECHO_FUNCTIONS_ROOT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/functions_example");

/// Holds the `tempfile::TempDir` alive for the lifetime of the test so its
/// backing SQLite file isn't deleted out from under the gateway.
pub struct TestApp {
    pub state: AppState,
    _tmp: tempfile::TempDir,
}

fn shell_runtime_table() -> RuntimeTable {
    let mut overrides = HashMap::new();
    overrides.insert("shell".to_string(), RuntimeConfig { command: "sh".to_string(), args: vec![] });
    RuntimeTable::with_overrides(overrides)
}

/// Builds a full `AppState` over a real, file-backed SQLite database so the
/// writer and read-pool connections are guaranteed to agree, matching
/// production (§4.A).
pub async fn build_app() -> TestApp {
    let tmp = tempfile::tempdir().expect("tempdir");
    let db_path = tmp.path().join("alyx.sqlite");
    let storage = StorageConfig { path: db_path.to_string_lossy().into_owned(), ..StorageConfig::default() };
    let gateway = Gateway::open(&storage).expect("open gateway");

    let txn = TransactionManager::new(gateway.clone(), Duration::from_secs(60));
    let bus = EventBus::new(gateway.clone(), EventsConfig::default()).await.expect("event bus");

    let function_registry = FunctionRegistry::new();
    function_registry.reload(&PathBuf::from(ECHO_FUNCTIONS_ROOT));
    let functions = Arc::new(FunctionRuntime::new(
        function_registry.clone(),
        shell_runtime_table(),
        8,
        32,
        2,
        8,
        "http://127.0.0.1:0".to_string(),
    ));

    let hooks = HookRegistry::new();
    let hook_dispatcher = HookDispatcher::new(hooks.clone(), bus.clone(), functions.clone());
    hook_dispatcher.install();

    let schedules = Arc::new(ScheduleEngine::new(gateway.clone(), bus.clone(), Duration::from_millis(50)).await.expect("schedule engine"));
    let realtime = RealtimeHub::new(gateway.clone(), bus.clone(), RealtimeConfig::default());
    let request_log = Arc::new(RequestLogRing::new(256));
    let config_yaml = format!("database:\n  path: {:?}\n", db_path.to_string_lossy());
    let config = Arc::new(AlyxConfig::parse(&config_yaml).expect("config"));

    let state = AppState {
        gateway,
        txn,
        bus,
        function_registry,
        functions,
        hooks,
        hook_dispatcher,
        schedules,
        realtime,
        request_log,
        config,
    };

    TestApp { state, _tmp: tmp }
}

impl TestApp {
    pub fn router(&self) -> axum::Router {
        alyx_server::routes::build(self.state.clone())
    }
}
