//! # Controller
//!
//! Core controller modules for the PVC reclaimer.
//!
//! - `backoff`: Fibonacci backoff mechanism for retries
//! - `reconciler`: Admission, conflict detection and stale-binding resolution
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod reconciler;
pub mod server;
