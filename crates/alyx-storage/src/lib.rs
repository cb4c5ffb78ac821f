//! Storage Gateway (§4.A): single-writer SQLite access, a query builder over
//! JSON document collections, a constraint-error classifier, and the
//! internal change log that the Event Bus and Realtime Hub poll.

pub mod changelog;
pub mod collection;
pub mod constraint;
mod gateway;
mod ops;
pub mod query;
mod tx;

pub use changelog::{ChangeLogRecord, Operation};
pub use constraint::ConstraintKind;
pub use gateway::{Gateway, StorageConfig};
pub use query::{Filter, FilterClause, FilterOp, Page, QueryOptions, SortClause, SortDirection};
pub use tx::GatewayTx;
