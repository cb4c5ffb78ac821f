//! Hook/Webhook Dispatcher (§4.F): binds declared subscriptions to event
//! patterns and invokes their targets (a registered function, or an HTTP
//! webhook with optional HMAC signing) as events flow through the bus.

mod dispatcher;
mod registry;
mod signing;
mod types;

pub use dispatcher::HookDispatcher;
pub use registry::HookRegistry;
pub use types::{DeadLetterPayload, Hook, HookMode, HookTarget, OnFailure, SignatureAlgo};
