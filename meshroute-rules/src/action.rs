use std::time::Duration;

use meshroute_core::EngineConfig;
use rand::Rng;
use tracing::debug;

use crate::attributes::AttributeSet;
use crate::condition::MatchOutcome;
use crate::error::RouteError;
use crate::outcome::{AppliedRewrite, ForwardAction, RedirectAction, RoutingDecision};
use crate::policy::{
    resolve_http_fault, resolve_l4_fault, resolve_retry, resolve_timeout, PolicyRegistry,
    TimeoutPolicy,
};
use crate::rule::{HttpRedirect, HttpRewrite, RuleAction};
use crate::selector::Selection;
use crate::weighted::resolve_with;

/// Turns a selected rule into a redirect or forward decision with its policies.
#[derive(Debug, Clone)]
pub struct ActionResolver {
    default_timeout: Duration,
    registry: PolicyRegistry,
}

impl Default for ActionResolver {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl ActionResolver {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            registry: PolicyRegistry::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.default_timeout)
    }

    pub fn with_registry(mut self, registry: PolicyRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn resolve(
        &self,
        selection: &Selection,
        attrs: &AttributeSet,
    ) -> Result<RoutingDecision, RouteError> {
        self.resolve_with(selection, attrs, &mut rand::thread_rng())
    }

    pub fn resolve_with<R: Rng + ?Sized>(
        &self,
        selection: &Selection,
        attrs: &AttributeSet,
        rng: &mut R,
    ) -> Result<RoutingDecision, RouteError> {
        let compiled = &selection.rule;
        if let Some(error) = compiled
            .diagnostics()
            .iter()
            .find(|diagnostic| diagnostic.is_configuration())
        {
            return Err(error.clone());
        }

        let rule = compiled.rule();
        let name = rule.display_name();

        match rule.action()? {
            RuleAction::Redirect(redirect) => redirect_decision(name, redirect),
            RuleAction::Route { route, rewrite } => {
                let target = resolve_with(name, &rule.destination, route, rng)?;

                let timeout = resolve_timeout(
                    name,
                    rule.http_req_timeout.as_ref(),
                    self.default_timeout,
                    &self.registry,
                )?;
                let request_timeout = match &timeout {
                    TimeoutPolicy::Simple { timeout, .. } => *timeout,
                    TimeoutPolicy::Custom(_) => self.default_timeout,
                };
                let retry = resolve_retry(
                    name,
                    rule.http_req_retries.as_ref(),
                    request_timeout,
                    &self.registry,
                )?;

                let http_fault = match &rule.http_fault {
                    Some(fault) => {
                        let policy = resolve_http_fault(name, fault)?;
                        (attrs.is_http() && compiled.fault_applies(attrs)).then_some(policy)
                    }
                    None => None,
                };
                let l4_fault = rule
                    .l4_fault
                    .as_ref()
                    .map(|fault| resolve_l4_fault(name, fault))
                    .transpose()?;

                let rewrite = rewrite
                    .map(|rewrite| apply_rewrite(rewrite, attrs, selection.outcome))
                    .filter(|rewrite| !rewrite.is_empty());

                debug!(
                    rule = name,
                    destination = %target.destination,
                    tags = ?target.tags,
                    "forwarding"
                );

                Ok(RoutingDecision::Forward(ForwardAction {
                    rule: name.to_string(),
                    destination: target.destination,
                    tags: target.tags,
                    rewrite,
                    timeout,
                    retry,
                    http_fault,
                    l4_fault,
                }))
            }
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|value| !value.is_empty()).map(str::to_string)
}

fn redirect_decision(rule: &str, redirect: &HttpRedirect) -> Result<RoutingDecision, RouteError> {
    let uri = non_empty(&redirect.uri);
    let authority = non_empty(&redirect.authority);
    if uri.is_none() && authority.is_none() {
        return Err(RouteError::configuration(
            rule,
            "redirect needs a uri or an authority",
        ));
    }
    debug!(rule, ?uri, ?authority, "redirecting");
    Ok(RoutingDecision::Redirect(RedirectAction {
        rule: rule.to_string(),
        uri,
        authority,
    }))
}

/// Computes the rewritten path. When the winning condition matched `uri` by
/// prefix only that prefix is replaced; otherwise the whole path is.
fn apply_rewrite(
    rewrite: &HttpRewrite,
    attrs: &AttributeSet,
    outcome: MatchOutcome,
) -> AppliedRewrite {
    let uri = non_empty(&rewrite.uri).map(|replacement| {
        match (attrs.uri(), outcome.uri_prefix_len) {
            (Some(original), Some(len)) if original.is_char_boundary(len) => {
                format!("{replacement}{}", &original[len..])
            }
            _ => replacement,
        }
    });
    AppliedRewrite {
        uri,
        authority: non_empty(&rewrite.authority),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::attributes::{extract, ConnectionInfo, RequestInfo};
    use crate::policy::{
        Abort, HttpFaultInjection, HttpRetry, HttpTimeout, RetryPolicy, SimpleRetryPolicy,
        SimpleTimeoutPolicy,
    };
    use crate::rule::{DestinationWeight, MatchCondition, RouteRule, StringMatch, Tags};
    use crate::selector::{select, CompiledRule};

    fn v1() -> DestinationWeight {
        DestinationWeight {
            destination: None,
            tags: Tags::from([("version".to_string(), "v1".to_string())]),
            weight: 100,
        }
    }

    fn decide(rule: RouteRule, request: RequestInfo) -> Result<RoutingDecision, RouteError> {
        let destination = rule.destination.clone();
        let rules = vec![Arc::new(CompiledRule::compile(rule))];
        let attrs = extract(&ConnectionInfo::default(), Some(&request));
        let selection = select(&destination, &attrs, &rules).expect("rule should match");
        ActionResolver::default().resolve(&selection, &attrs)
    }

    #[test]
    fn forwards_with_default_policies() {
        let rule = RouteRule {
            name: "default".into(),
            destination: "reviews".into(),
            route: vec![v1()],
            ..RouteRule::default()
        };
        let decision = decide(rule, RequestInfo::new("GET", "/")).unwrap();
        let forward = decision.as_forward().expect("forward decision");
        assert_eq!(forward.destination, "reviews");
        assert_eq!(forward.tags.get("version").map(String::as_str), Some("v1"));
        assert_eq!(
            forward.timeout,
            TimeoutPolicy::Simple {
                timeout: Duration::from_secs(15),
                override_header_name: None
            }
        );
        assert_eq!(forward.retry, RetryPolicy::Disabled);
        assert!(forward.rewrite.is_none());
        assert!(forward.http_fault.is_none());
    }

    #[test]
    fn prefix_rewrite_replaces_only_the_prefix() {
        let rule = RouteRule {
            name: "ratings".into(),
            destination: "ratings".into(),
            match_condition: Some(MatchCondition {
                http_headers: BTreeMap::from([(
                    "uri".to_string(),
                    StringMatch::Prefix("/ratings".into()),
                )]),
                ..MatchCondition::default()
            }),
            route: vec![v1()],
            rewrite: Some(HttpRewrite {
                uri: Some("/v1/bookRatings".into()),
                authority: None,
            }),
            ..RouteRule::default()
        };
        let decision = decide(rule, RequestInfo::new("GET", "/ratings/v2/x")).unwrap();
        let rewrite = decision.as_forward().and_then(|f| f.rewrite.clone()).unwrap();
        assert_eq!(rewrite.uri.as_deref(), Some("/v1/bookRatings/v2/x"));
    }

    #[test]
    fn rewrite_without_prefix_match_replaces_whole_path() {
        let rule = RouteRule {
            name: "rewrite".into(),
            destination: "ratings".into(),
            route: vec![v1()],
            rewrite: Some(HttpRewrite {
                uri: Some("/health".into()),
                authority: Some("ratings.internal".into()),
            }),
            ..RouteRule::default()
        };
        let decision = decide(rule, RequestInfo::new("GET", "/anything")).unwrap();
        let rewrite = decision.as_forward().and_then(|f| f.rewrite.clone()).unwrap();
        assert_eq!(rewrite.uri.as_deref(), Some("/health"));
        assert_eq!(rewrite.authority.as_deref(), Some("ratings.internal"));
    }

    #[test]
    fn redirect_keeps_unset_fields() {
        let rule = RouteRule {
            name: "moved".into(),
            destination: "reviews".into(),
            redirect: Some(HttpRedirect {
                uri: Some("/v2/reviews".into()),
                authority: Some(String::new()),
            }),
            ..RouteRule::default()
        };
        let decision = decide(rule, RequestInfo::new("GET", "/reviews")).unwrap();
        assert_eq!(
            decision.as_redirect(),
            Some(&RedirectAction {
                rule: "moved".into(),
                uri: Some("/v2/reviews".into()),
                authority: None,
            })
        );
    }

    #[test]
    fn empty_redirect_is_rejected() {
        let rule = RouteRule {
            name: "nowhere".into(),
            destination: "reviews".into(),
            redirect: Some(HttpRedirect::default()),
            ..RouteRule::default()
        };
        assert!(decide(rule, RequestInfo::new("GET", "/")).unwrap_err().is_configuration());
    }

    #[test]
    fn route_and_redirect_together_are_rejected() {
        let rule = RouteRule {
            name: "both".into(),
            destination: "reviews".into(),
            route: vec![v1()],
            redirect: Some(HttpRedirect {
                uri: Some("/elsewhere".into()),
                authority: None,
            }),
            ..RouteRule::default()
        };
        let err = decide(rule, RequestInfo::new("GET", "/")).unwrap_err();
        assert_eq!(
            err,
            RouteError::configuration("both", "route and redirect are mutually exclusive")
        );
    }

    #[test]
    fn simple_policies_are_resolved() {
        let rule = RouteRule {
            name: "policies".into(),
            destination: "reviews".into(),
            route: vec![v1()],
            http_req_timeout: Some(HttpTimeout::SimpleTimeout(SimpleTimeoutPolicy {
                timeout_seconds: 2.5,
                override_header_name: None,
            })),
            http_req_retries: Some(HttpRetry::SimpleRetry(SimpleRetryPolicy {
                attempts: 3,
                per_try_timeout_seconds: None,
                override_header_name: Some("x-retries".into()),
            })),
            ..RouteRule::default()
        };
        let decision = decide(rule, RequestInfo::new("GET", "/")).unwrap();
        let forward = decision.as_forward().unwrap();
        assert_eq!(
            forward.retry,
            RetryPolicy::Simple {
                attempts: 3,
                per_try_timeout: Duration::from_millis(2500),
                override_header_name: Some("x-retries".into()),
            }
        );
    }

    #[test]
    fn sub_millisecond_timeout_is_a_configuration_error() {
        let rule = RouteRule {
            name: "tiny".into(),
            destination: "reviews".into(),
            route: vec![v1()],
            http_req_timeout: Some(HttpTimeout::SimpleTimeout(SimpleTimeoutPolicy {
                timeout_seconds: 0.0001,
                override_header_name: None,
            })),
            ..RouteRule::default()
        };
        assert!(decide(rule, RequestInfo::new("GET", "/")).unwrap_err().is_configuration());
    }

    #[test]
    fn http_fault_respects_header_restriction() {
        let rule = RouteRule {
            name: "faulty".into(),
            destination: "ratings".into(),
            route: vec![v1()],
            http_fault: Some(HttpFaultInjection {
                abort: Some(Abort {
                    percent: 100.0,
                    http_status: Some(500),
                    ..Abort::default()
                }),
                headers: BTreeMap::from([(
                    "cookie".to_string(),
                    StringMatch::Regex("^(.*?;)?(user=jason)(;.*)?$".into()),
                )]),
                ..HttpFaultInjection::default()
            }),
            ..RouteRule::default()
        };

        let jason = RequestInfo::new("GET", "/").header("Cookie", "user=jason");
        let decision = decide(rule.clone(), jason).unwrap();
        assert!(decision.as_forward().unwrap().http_fault.is_some());

        let anonymous = RequestInfo::new("GET", "/");
        let decision = decide(rule, anonymous).unwrap();
        assert!(decision.as_forward().unwrap().http_fault.is_none());
    }
}
