use std::cmp::Reverse;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::attributes::AttributeSet;
use crate::condition::{CompiledCondition, HeaderMatchers, MatchOutcome};
use crate::error::RouteError;
use crate::rule::RouteRule;

/// Rule paired with its pre-compiled match condition and fault headers.
#[derive(Debug)]
pub struct CompiledRule {
    rule: Arc<RouteRule>,
    condition: Option<CompiledCondition>,
    fault_headers: HeaderMatchers,
    diagnostics: Vec<RouteError>,
}

impl CompiledRule {
    pub fn compile(rule: impl Into<Arc<RouteRule>>) -> Self {
        let rule = rule.into();
        let name = rule.display_name().to_string();
        let mut diagnostics = Vec::new();

        let condition = rule.match_condition.as_ref().map(|condition| {
            if !condition.is_meaningful() {
                diagnostics.push(RouteError::configuration(
                    &name,
                    "match condition needs at least one of source, source_tags or http_headers",
                ));
            }
            let compiled = CompiledCondition::compile(&name, condition);
            diagnostics.extend(compiled.diagnostics().iter().cloned());
            compiled
        });

        let fault_headers = rule
            .http_fault
            .as_ref()
            .map(|fault| HeaderMatchers::compile(&name, &fault.headers, &mut diagnostics))
            .unwrap_or_default();

        Self {
            rule,
            condition,
            fault_headers,
            diagnostics,
        }
    }

    pub fn rule(&self) -> &RouteRule {
        &self.rule
    }

    pub fn shared_rule(&self) -> Arc<RouteRule> {
        Arc::clone(&self.rule)
    }

    pub fn name(&self) -> &str {
        self.rule.display_name()
    }

    pub fn precedence(&self) -> i32 {
        self.rule.precedence
    }

    /// Compile-time problems; configuration errors disqualify the rule.
    pub fn diagnostics(&self) -> &[RouteError] {
        &self.diagnostics
    }

    /// Evaluates the rule's match. A rule without a condition only matches HTTP.
    pub fn evaluate(&self, attrs: &AttributeSet) -> Option<MatchOutcome> {
        match &self.condition {
            None => attrs.is_http().then(MatchOutcome::default),
            Some(_) if !self.is_matchable() => None,
            Some(condition) => condition.evaluate(attrs),
        }
    }

    pub fn matches(&self, attrs: &AttributeSet) -> bool {
        self.evaluate(attrs).is_some()
    }

    /// Whether the rule's HTTP fault applies to this request.
    pub fn fault_applies(&self, attrs: &AttributeSet) -> bool {
        self.fault_headers.evaluate(attrs).is_some()
    }

    fn is_matchable(&self) -> bool {
        self.rule
            .match_condition
            .as_ref()
            .map_or(true, |condition| condition.is_meaningful())
    }
}

impl From<RouteRule> for CompiledRule {
    fn from(rule: RouteRule) -> Self {
        CompiledRule::compile(rule)
    }
}

/// Winning rule plus what its match reported.
#[derive(Debug, Clone)]
pub struct Selection {
    pub rule: Arc<CompiledRule>,
    pub outcome: MatchOutcome,
}

/// All rules for `destination` matching `attrs`, best first.
///
/// Ordered by precedence, highest first. Rules sharing a precedence keep
/// their registration order, so identical inputs always rank identically.
pub fn candidates(
    destination: &str,
    attrs: &AttributeSet,
    rules: &[Arc<CompiledRule>],
) -> Vec<Selection> {
    let mut matched: Vec<Selection> = rules
        .iter()
        .filter(|rule| rule.rule().destination == destination)
        .filter_map(|rule| {
            let outcome = rule.evaluate(attrs)?;
            trace!(rule = rule.name(), "rule matched");
            Some(Selection {
                rule: Arc::clone(rule),
                outcome,
            })
        })
        .collect();

    matched.sort_by_key(|selection| Reverse(selection.rule.precedence()));
    matched
}

/// The single applicable rule, or `None` when nothing matches.
pub fn select(
    destination: &str,
    attrs: &AttributeSet,
    rules: &[Arc<CompiledRule>],
) -> Option<Selection> {
    let selection = candidates(destination, attrs, rules).into_iter().next();
    match &selection {
        Some(selection) => debug!(destination, rule = selection.rule.name(), "rule selected"),
        None => debug!(destination, "no rule matched"),
    }
    selection
}
