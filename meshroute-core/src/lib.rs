//! Core shared library for the meshroute workspace.
//!
//! This crate exposes the ambient primitives the routing engine and its
//! embedders depend on: the canonical error type, environment driven
//! configuration and tracing setup.

pub mod config;
pub mod errors;
pub mod logging;

pub use config::{EngineConfig, Environment};
pub use errors::{ConfigError, MeshRouteError, Result as CoreResult};
