//! PVC Reclaimer Library
//!
//! This library provides the core functionality for the PVC reclaimer controller:
//! it frees `PersistentVolume`s that still record the identity of a deleted claim,
//! so a recreated claim with the same name can bind again.
//! Tests are included in the module files and under `tests/`.
//!
//! ## Quick Start
//!
//! ```rust
//! use pvc_reclaimer::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod observability;
pub mod prelude;
pub mod runtime;
