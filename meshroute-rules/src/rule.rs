use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RouteError;
use crate::policy::{HttpFaultInjection, HttpRetry, HttpTimeout, L4FaultInjection};

/// Label set identifying a service version, e.g. `version: v2`.
pub type Tags = BTreeMap<String, String>;

/// Declarative route rule for one destination service.
///
/// The raw shape mirrors the configuration schema, so a malformed document can
/// still be represented (both `route` and `redirect`, or neither). Use
/// [`RouteRule::action`] to obtain the validated, exclusive action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RouteRule {
    /// Identifier used for reporting. Assigned by the store when blank.
    #[serde(default)]
    pub name: String,
    /// Logical service the rule applies to.
    pub destination: String,
    /// Higher values win when several rules match.
    #[serde(default)]
    pub precedence: i32,
    /// Absent means the rule applies to all HTTP traffic for the destination.
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_condition: Option<MatchCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub route: Vec<DestinationWeight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<HttpRedirect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<HttpRewrite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_req_timeout: Option<HttpTimeout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_req_retries: Option<HttpRetry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_fault: Option<HttpFaultInjection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l4_fault: Option<L4FaultInjection>,
}

/// Exclusive action carried by a rule once `route`/`redirect` are reconciled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuleAction<'a> {
    Route {
        route: &'a [DestinationWeight],
        rewrite: Option<&'a HttpRewrite>,
    },
    Redirect(&'a HttpRedirect),
}

impl RouteRule {
    /// Name used in logs and errors, falling back to the destination.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.destination
        } else {
            &self.name
        }
    }

    /// Reconciles `route`, `redirect` and `rewrite` into a single action.
    pub fn action(&self) -> Result<RuleAction<'_>, RouteError> {
        match (self.route.is_empty(), &self.redirect) {
            (false, Some(_)) => Err(RouteError::configuration(
                self.display_name(),
                "route and redirect are mutually exclusive",
            )),
            (true, None) => Err(RouteError::configuration(
                self.display_name(),
                "rule has neither route nor redirect",
            )),
            (true, Some(redirect)) => {
                if self.rewrite.is_some() {
                    return Err(RouteError::configuration(
                        self.display_name(),
                        "rewrite cannot be combined with redirect",
                    ));
                }
                Ok(RuleAction::Redirect(redirect))
            }
            (false, None) => Ok(RuleAction::Route {
                route: &self.route,
                rewrite: self.rewrite.as_ref(),
            }),
        }
    }
}

/// Predicate over source identity, L4 endpoints and HTTP headers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MatchCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub source_tags: Tags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<L4MatchAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp: Option<L4MatchAttributes>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub http_headers: BTreeMap<String, StringMatch>,
}

impl MatchCondition {
    /// Whether the condition names any of the clauses that make it meaningful.
    pub fn is_meaningful(&self) -> bool {
        self.source.as_deref().is_some_and(|source| !source.is_empty())
            || !self.source_tags.is_empty()
            || !self.http_headers.is_empty()
    }
}

/// Subnets (CIDR or bare addresses) matched against connection endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct L4MatchAttributes {
    #[serde(default)]
    pub source_subnet: Vec<String>,
    #[serde(default)]
    pub destination_subnet: Vec<String>,
}

/// Exclusive string predicate used on header values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StringMatch {
    Exact(String),
    Prefix(String),
    Regex(String),
}

/// One weighted target of a rule's traffic split.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DestinationWeight {
    /// Inherits the parent rule's destination when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub weight: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HttpRedirect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HttpRewrite {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
}
