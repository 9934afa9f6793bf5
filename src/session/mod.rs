//! One language client session: which documents it serves, which files it
//! watches, and the lifecycle that ties them to a running server.

pub mod filter;
pub mod manager;
pub mod watcher;

pub use filter::{DocumentFilter, WatchPattern};
pub use manager::{Session, SessionManager, SessionState, StopHandle};
