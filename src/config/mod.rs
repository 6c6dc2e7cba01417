//! # Configuration
//!
//! Flag/environment driven configuration for the controller.

pub mod controller;

pub use controller::{
    Args, CandidateGuard, ConfigError, ControllerConfig, LeaderElectionConfig, LogFormat,
};
