//! Function Registry & Runtime (§4.E): discovers function directories,
//! parses manifests, and invokes the language-appropriate subprocess under a
//! concurrency-bounded, timeout-enforced, schema-validating runtime.

mod concurrency;
mod discovery;
mod manifest;
mod process;
mod protocol;
mod registry;
mod runtime;
mod runtime_table;

pub use concurrency::BoundedConcurrency;
pub use discovery::{discover, FunctionRecord};
pub use manifest::{BuildStep, Manifest};
pub use protocol::{ExecutionContext, FunctionErrorBody, FunctionRequest, FunctionResponse, LogLine};
pub use registry::FunctionRegistry;
pub use runtime::{FunctionRuntime, InvokeArgs};
pub use runtime_table::{RuntimeConfig, RuntimeTable};
