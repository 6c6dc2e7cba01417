//! # Runtime
//!
//! Controller runtime modules for initialization, leader election, error handling,
//! watch loop, and shutdown signalling.

pub mod error_policy;
pub mod initialization;
pub mod leader_election;
pub mod shutdown;
pub mod watch_loop;

pub use error_policy::{handle_reconciliation_error, handle_watch_stream_error};
pub use initialization::{initialize, InitializationResult};
pub use leader_election::LeaderElector;
pub use shutdown::{shutdown_channel, spawn_signal_handler};
pub use watch_loop::run_watch_loop;
