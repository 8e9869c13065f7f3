use std::path::Path;

use meshroute_core::EngineConfig;
use rand::Rng;
use tracing::{debug, warn};

use crate::action::ActionResolver;
use crate::attributes::{extract, AttributeSet, ConnectionInfo, RequestInfo};
use crate::error::RouteError;
use crate::loader::load_rules;
use crate::outcome::RoutingDecision;
use crate::policy::PolicyRegistry;
use crate::selector::candidates;
use crate::store::{RuleSnapshot, RuleStore, UpdateReport};

/// Runtime entry point: evaluates requests against the store's current snapshot.
///
/// Cheap to clone and safe to share between request-handling tasks;
/// evaluation never locks and never blocks.
#[derive(Debug, Clone, Default)]
pub struct RouteEngine {
    store: RuleStore,
    resolver: ActionResolver,
}

impl RouteEngine {
    /// Construct an engine over an existing store.
    pub fn new(store: RuleStore, resolver: ActionResolver) -> Self {
        Self { store, resolver }
    }

    /// Builds an engine from configuration, seeding the store from
    /// `rules_path` when one is configured.
    pub fn from_config(config: &EngineConfig) -> Result<(Self, Vec<UpdateReport>), RouteError> {
        let engine = Self::new(RuleStore::new(), ActionResolver::from_config(config));
        let reports = match &config.rules_path {
            Some(path) => engine.load_path(path)?,
            None => Vec::new(),
        };
        Ok((engine, reports))
    }

    pub fn with_registry(mut self, registry: PolicyRegistry) -> Self {
        self.resolver = self.resolver.with_registry(registry);
        self
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    pub fn resolver(&self) -> &ActionResolver {
        &self.resolver
    }

    /// Loads rule documents from a file or directory into the store.
    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<Vec<UpdateReport>, RouteError> {
        let path = path.as_ref();
        let rules = load_rules(path)?;
        Ok(self
            .store
            .install_all(rules, Some(format!("file:{}", path.display()))))
    }

    /// Evaluate a connection (and request, for HTTP) bound for `destination`.
    pub fn evaluate(
        &self,
        destination: &str,
        connection: &ConnectionInfo,
        request: Option<&RequestInfo>,
    ) -> RoutingDecision {
        let attrs = extract(connection, request);
        self.evaluate_attributes(destination, &attrs)
    }

    pub fn evaluate_attributes(&self, destination: &str, attrs: &AttributeSet) -> RoutingDecision {
        let snapshot = self.store.snapshot();
        evaluate_snapshot(&snapshot, &self.resolver, destination, attrs, &mut rand::thread_rng())
    }
}

/// Evaluates against one snapshot. Matching rules are tried best first; a
/// rule whose action cannot be resolved is skipped in favour of the next.
pub fn evaluate_snapshot<R: Rng + ?Sized>(
    snapshot: &RuleSnapshot,
    resolver: &ActionResolver,
    destination: &str,
    attrs: &AttributeSet,
    rng: &mut R,
) -> RoutingDecision {
    let mut first_failure: Option<(String, RouteError)> = None;

    for selection in candidates(destination, attrs, snapshot.rules_for(destination)) {
        match resolver.resolve_with(&selection, attrs, rng) {
            Ok(decision) => {
                debug!(
                    destination,
                    rule = selection.rule.name(),
                    decision = decision.kind(),
                    version = snapshot.version(),
                    "route decided"
                );
                return decision;
            }
            Err(error) => {
                warn!(
                    destination,
                    rule = selection.rule.name(),
                    error = %error,
                    "skipping rule that failed to resolve"
                );
                first_failure.get_or_insert_with(|| (selection.rule.name().to_string(), error));
            }
        }
    }

    match first_failure {
        Some((rule, error)) => RoutingDecision::Error { rule, error },
        None => {
            debug!(destination, "no rule applies");
            RoutingDecision::NotFound
        }
    }
}
