//! meshroute: route rule decision engine for service-mesh sidecars.
//!
//! The workspace is split into several crates:
//!
//! * `meshroute-core`: configuration, the shared error type and tracing setup
//! * `meshroute-rules`: rule model, matcher, selector, weighted resolver,
//!   policy resolution and the snapshot-publishing rule store
//!
//! This crate re-exports both and wires them together for embedders.

pub use meshroute_core::config::{load_engine_config, DEFAULT_TIMEOUT_MS};
pub use meshroute_core::logging::init_tracing;
pub use meshroute_core::{ConfigError, CoreResult, EngineConfig, Environment, MeshRouteError};
pub use meshroute_rules::*;

use tracing::{info, warn};

/// Builds an engine from the `MESHROUTE_` environment and installs the
/// tracing subscriber at the configured level.
pub fn bootstrap() -> CoreResult<RouteEngine> {
    let config = load_engine_config()?;
    init_tracing(Some(&config.log_level))?;
    bootstrap_with(&config)
}

/// Builds an engine from explicit configuration without touching logging.
///
/// Rules that fail validation while seeding are logged and skipped; an
/// unreadable rules path is an error.
pub fn bootstrap_with(config: &EngineConfig) -> CoreResult<RouteEngine> {
    let (engine, reports) = RouteEngine::from_config(config)?;
    for report in &reports {
        for rejected in &report.rejected {
            warn!(
                destination = %report.destination,
                rule = %rejected.rule,
                error = %rejected.error,
                "rule skipped while seeding"
            );
        }
    }
    info!(
        node = %config.node_name,
        environment = ?config.environment,
        destinations = engine.store().destinations().len(),
        "route engine ready"
    );
    Ok(engine)
}
