//! Route rule evaluation engine for service-mesh sidecars.
//!
//! Given the rules configured for a destination and a description of an
//! incoming connection or request, the engine picks the single applicable
//! rule (highest precedence, registration order on ties) and resolves it into
//! a [`RoutingDecision`]: a redirect, or a forward to a weighted destination
//! carrying its timeout, retry and fault-injection policies.
//!
//! Evaluation is synchronous and lock-free. Rules live in a [`RuleStore`]
//! which publishes complete snapshots atomically on every update.

mod action;
pub mod attributes;
mod condition;
mod engine;
mod error;
mod loader;
mod outcome;
pub mod policy;
mod rule;
mod selector;
mod store;
pub mod weighted;

pub use action::ActionResolver;
pub use attributes::{extract, AttributeSet, ConnectionInfo, Protocol, RequestInfo, Transport};
pub use condition::{matches, parse_subnet, CompiledCondition, MatchOutcome};
pub use engine::{evaluate_snapshot, RouteEngine};
pub use error::RouteError;
pub use loader::{load_rules, parse_rules};
pub use outcome::{AppliedRewrite, ForwardAction, RedirectAction, RoutingDecision};
pub use policy::{
    CustomPolicy, CustomPolicyHandler, HttpFaultInjection, HttpRetry, HttpTimeout,
    L4FaultInjection, PolicyRegistry, RetryPolicy, TimeoutPolicy,
};
pub use rule::{
    DestinationWeight, HttpRedirect, HttpRewrite, L4MatchAttributes, MatchCondition, RouteRule,
    RuleAction, StringMatch, Tags,
};
pub use selector::{candidates, select, CompiledRule, Selection};
pub use store::{
    validate_rule, RejectedRule, RuleSnapshot, RuleStore, UpdateHistoryEntry, UpdateReport,
};
pub use weighted::ResolvedDestination;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_simple_rule() {
        let rule = RouteRule {
            name: "reviews-default".into(),
            destination: "reviews".into(),
            route: vec![DestinationWeight {
                destination: None,
                tags: Tags::from([("version".to_string(), "v1".to_string())]),
                weight: 100,
            }],
            ..RouteRule::default()
        };

        let engine = RouteEngine::default();
        let report = engine.store().update_rules("reviews", vec![rule], None);
        assert!(report.is_clean());

        let decision = engine.evaluate(
            "reviews",
            &ConnectionInfo::default(),
            Some(&RequestInfo::new("GET", "/reviews/1")),
        );
        assert_eq!(decision.rule(), Some("reviews-default"));
        assert_eq!(
            decision.as_forward().map(|forward| forward.destination.as_str()),
            Some("reviews")
        );
    }
}
