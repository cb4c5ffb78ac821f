use std::sync::Arc;

use alyx_admin::AlyxConfig;
use alyx_events::EventBus;
use alyx_functions::{FunctionRegistry, FunctionRuntime};
use alyx_hooks::{HookDispatcher, HookRegistry};
use alyx_realtime::RealtimeHub;
use alyx_reqlog::RequestLogRing;
use alyx_schedule::ScheduleEngine;
use alyx_storage::Gateway;
use alyx_txn::TransactionManager;

/// Everything an HTTP handler needs, wired once at startup in `main` and
/// shared behind `Arc`/cheap-clone internals (mirrors the teacher's
/// `AppState`-via-`FromRef` pattern, simplified to one flat struct since
/// this server has a single axum `Router` rather than a nested dashboard +
/// API split).
#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    pub txn: TransactionManager,
    pub bus: Arc<EventBus>,
    pub function_registry: Arc<FunctionRegistry>,
    pub functions: Arc<FunctionRuntime>,
    pub hooks: Arc<HookRegistry>,
    pub hook_dispatcher: Arc<HookDispatcher>,
    pub schedules: Arc<ScheduleEngine>,
    pub realtime: Arc<RealtimeHub>,
    pub request_log: Arc<RequestLogRing>,
    pub config: Arc<AlyxConfig>,
}
