//! Watcher & Hot-Reload (§4.H): watches function source directories in
//! development mode and rebuilds/reloads the `alyx-functions` registry in
//! place when sources change.

mod build;
mod watcher;

pub use watcher::Watcher;
