//! Event Store + Bus (§4.C): a durable event queue backed by the Storage
//! Gateway, wildcard (type, source, action) subscriber matching, and the
//! pending/scheduled dispatch loops plus retention cleanup.

mod bus;
mod store;

pub use bus::{EventBus, EventHandler, EventsConfig};
pub use store::{Event, Status};
