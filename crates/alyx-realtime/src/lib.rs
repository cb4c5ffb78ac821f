//! Change Feed & Realtime Hub (§4.G): a single poller reads new change-log
//! rows, republishes each as a `database` event on the Event Bus, and fans
//! out matching deltas to WebSocket clients holding filtered subscriptions.

mod client;
mod config;
mod hub;
pub mod protocol;
mod socket;
mod subscription;

pub use client::ClientHandle;
pub use config::RealtimeConfig;
pub use hub::RealtimeHub;
pub use socket::handle_socket;
pub use subscription::Subscription;
