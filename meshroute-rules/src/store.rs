use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use meshroute_core::config::DEFAULT_TIMEOUT_MS;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::RouteError;
use crate::policy::{
    resolve_http_fault, resolve_l4_fault, resolve_retry, resolve_timeout, PolicyRegistry,
};
use crate::rule::{RouteRule, RuleAction};
use crate::selector::CompiledRule;
use crate::weighted::check_route;

const HISTORY_LIMIT: usize = 256;

/// Immutable view of every installed rule, grouped by destination.
#[derive(Debug, Default)]
pub struct RuleSnapshot {
    version: u64,
    rules: HashMap<String, Arc<[Arc<CompiledRule>]>>,
}

impl RuleSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Rules for `destination` in registration order.
    pub fn rules_for(&self, destination: &str) -> &[Arc<CompiledRule>] {
        self.rules
            .get(destination)
            .map(|rules| &rules[..])
            .unwrap_or(&[])
    }

    pub fn destinations(&self) -> Vec<String> {
        let mut destinations: Vec<String> = self.rules.keys().cloned().collect();
        destinations.sort();
        destinations
    }

    pub fn rule_count(&self) -> usize {
        self.rules.values().map(|rules| rules.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Rule refused during an update, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRule {
    pub rule: String,
    pub error: RouteError,
}

/// Result of replacing one destination's rule set.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateReport {
    pub destination: String,
    pub version: u64,
    pub accepted: Vec<String>,
    pub rejected: Vec<RejectedRule>,
}

impl UpdateReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Record of an installed update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateHistoryEntry {
    pub version: u64,
    pub destination: String,
    pub installed_at: DateTime<Utc>,
    pub updated_by: Option<String>,
    pub accepted: usize,
    pub rejected: usize,
}

struct StoreInner {
    current: ArcSwap<RuleSnapshot>,
    /// Serializes writers; readers never take it.
    history: Mutex<Vec<UpdateHistoryEntry>>,
}

/// Shared rule store. Readers load the current snapshot without locking;
/// every update publishes a complete new snapshot atomically.
#[derive(Clone)]
pub struct RuleStore {
    inner: Arc<StoreInner>,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("RuleStore")
            .field("version", &snapshot.version())
            .field("destinations", &snapshot.destinations())
            .finish()
    }
}

impl RuleStore {
    /// Creates a new empty rule store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                current: ArcSwap::from_pointee(RuleSnapshot::default()),
                history: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Current snapshot; stays valid (and unchanged) for as long as it is held.
    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        self.inner.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.inner.current.load().version()
    }

    pub fn destinations(&self) -> Vec<String> {
        self.inner.current.load().destinations()
    }

    /// Installed rules for `destination`, in registration order.
    pub fn rules_for(&self, destination: &str) -> Vec<Arc<RouteRule>> {
        self.inner
            .current
            .load()
            .rules_for(destination)
            .iter()
            .map(|rule| rule.shared_rule())
            .collect()
    }

    /// Replaces the rule set of `destination` wholesale.
    ///
    /// Each rule is checked on its own; rejected rules are reported and left
    /// out while the rest are installed.
    pub fn update_rules(
        &self,
        destination: &str,
        rules: Vec<RouteRule>,
        updated_by: Option<String>,
    ) -> UpdateReport {
        self.apply(vec![(destination.to_string(), Some(rules))], updated_by)
            .pop()
            .unwrap_or_else(|| UpdateReport {
                destination: destination.to_string(),
                version: self.version(),
                accepted: Vec::new(),
                rejected: Vec::new(),
            })
    }

    /// Installs rules for several destinations in one snapshot, grouping by
    /// each rule's destination and keeping their relative order.
    pub fn install_all(
        &self,
        rules: Vec<RouteRule>,
        updated_by: Option<String>,
    ) -> Vec<UpdateReport> {
        let mut grouped: BTreeMap<String, Vec<RouteRule>> = BTreeMap::new();
        for rule in rules {
            grouped.entry(rule.destination.clone()).or_default().push(rule);
        }
        let changes = grouped
            .into_iter()
            .map(|(destination, rules)| (destination, Some(rules)))
            .collect();
        self.apply(changes, updated_by)
    }

    /// Drops every rule of `destination`. Returns whether anything was removed.
    pub fn remove_destination(&self, destination: &str, updated_by: Option<String>) -> bool {
        if self.inner.current.load().rules_for(destination).is_empty() {
            return false;
        }
        self.apply(vec![(destination.to_string(), None)], updated_by);
        true
    }

    /// Update history, oldest first, optionally filtered by destination.
    pub fn history(&self, destination: Option<&str>) -> Vec<UpdateHistoryEntry> {
        self.inner
            .history
            .lock()
            .iter()
            .filter(|entry| destination.map_or(true, |wanted| entry.destination == wanted))
            .cloned()
            .collect()
    }

    fn apply(
        &self,
        changes: Vec<(String, Option<Vec<RouteRule>>)>,
        updated_by: Option<String>,
    ) -> Vec<UpdateReport> {
        let mut history = self.inner.history.lock();
        let current = self.inner.current.load_full();
        let version = current.version + 1;
        let mut rules = current.rules.clone();
        let mut reports = Vec::with_capacity(changes.len());

        for (destination, change) in changes {
            let Some(incoming) = change else {
                rules.remove(&destination);
                reports.push(UpdateReport {
                    destination,
                    version,
                    accepted: Vec::new(),
                    rejected: Vec::new(),
                });
                continue;
            };

            let (accepted, rejected) = compile_rules(&destination, incoming);
            for rejection in &rejected {
                warn!(
                    destination = %destination,
                    rule = %rejection.rule,
                    error = %rejection.error,
                    "rule rejected"
                );
            }

            let report = UpdateReport {
                destination: destination.clone(),
                version,
                accepted: accepted.iter().map(|rule| rule.name().to_string()).collect(),
                rejected,
            };

            if accepted.is_empty() {
                rules.remove(&destination);
            } else {
                rules.insert(destination, accepted.into());
            }
            reports.push(report);
        }

        let snapshot = RuleSnapshot { version, rules };
        info!(
            version,
            destinations = snapshot.rules.len(),
            rules = snapshot.rule_count(),
            "rule snapshot installed"
        );
        self.inner.current.store(Arc::new(snapshot));

        let installed_at = Utc::now();
        history.extend(reports.iter().map(|report| UpdateHistoryEntry {
            version,
            destination: report.destination.clone(),
            installed_at,
            updated_by: updated_by.clone(),
            accepted: report.accepted.len(),
            rejected: report.rejected.len(),
        }));
        if history.len() > HISTORY_LIMIT {
            let excess = history.len() - HISTORY_LIMIT;
            history.drain(..excess);
        }

        reports
    }
}

fn compile_rules(
    destination: &str,
    incoming: Vec<RouteRule>,
) -> (Vec<Arc<CompiledRule>>, Vec<RejectedRule>) {
    let mut seen = HashSet::new();
    let mut accepted = Vec::with_capacity(incoming.len());
    let mut rejected = Vec::new();

    for mut rule in incoming {
        if rule.name.trim().is_empty() {
            rule.name = format!("rule-{}", Uuid::new_v4());
        }

        if !seen.insert(rule.name.clone()) {
            rejected.push(RejectedRule {
                rule: rule.name.clone(),
                error: RouteError::DuplicateRule { id: rule.name },
            });
            continue;
        }

        match validate_rule(destination, rule) {
            Ok(compiled) => accepted.push(Arc::new(compiled)),
            Err((rule, error)) => rejected.push(RejectedRule { rule, error }),
        }
    }

    (accepted, rejected)
}

/// Checks the semantic constraints the schema cannot express.
pub fn validate_rule(
    destination: &str,
    rule: RouteRule,
) -> Result<CompiledRule, (String, RouteError)> {
    let name = rule.display_name().to_string();
    check_rule(destination, &rule).map_err(|error| (name.clone(), error))?;

    let compiled = CompiledRule::compile(rule);
    if let Some(error) = compiled
        .diagnostics()
        .iter()
        .find(|diagnostic| diagnostic.is_configuration())
    {
        return Err((name, error.clone()));
    }
    Ok(compiled)
}

fn check_rule(destination: &str, rule: &RouteRule) -> Result<(), RouteError> {
    let name = rule.display_name();
    if rule.destination.trim().is_empty() {
        return Err(RouteError::configuration(name, "destination is required"));
    }
    if rule.destination != destination {
        return Err(RouteError::configuration(
            name,
            format!(
                "rule targets {} but was submitted for {destination}",
                rule.destination
            ),
        ));
    }

    match rule.action()? {
        RuleAction::Route { route, .. } => {
            check_route(name, route)?;
        }
        RuleAction::Redirect(redirect) => {
            let has_uri = redirect.uri.as_deref().is_some_and(|uri| !uri.is_empty());
            let has_authority = redirect
                .authority
                .as_deref()
                .is_some_and(|authority| !authority.is_empty());
            if !has_uri && !has_authority {
                return Err(RouteError::configuration(
                    name,
                    "redirect needs a uri or an authority",
                ));
            }
        }
    }

    // Custom payloads are checked against the transport's registry at resolution.
    let registry = PolicyRegistry::new();
    let default_timeout = Duration::from_millis(DEFAULT_TIMEOUT_MS);
    resolve_timeout(name, rule.http_req_timeout.as_ref(), default_timeout, &registry)?;
    resolve_retry(name, rule.http_req_retries.as_ref(), default_timeout, &registry)?;
    if let Some(fault) = &rule.http_fault {
        resolve_http_fault(name, fault)?;
    }
    if let Some(fault) = &rule.l4_fault {
        resolve_l4_fault(name, fault)?;
    }
    Ok(())
}
