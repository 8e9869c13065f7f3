use serde::Serialize;

use crate::error::RouteError;
use crate::policy::{HttpFaultPolicy, L4FaultPolicy, RetryPolicy, TimeoutPolicy};
use crate::rule::Tags;

/// Final decision for one connection or request, consumed by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingDecision {
    Redirect(RedirectAction),
    Forward(ForwardAction),
    /// No rule applies; the caller's default policy takes over.
    NotFound,
    /// Rules matched but none of them resolved to an executable action.
    Error { rule: String, error: RouteError },
}

impl RoutingDecision {
    /// Name of the rule that produced the decision, if any.
    pub fn rule(&self) -> Option<&str> {
        match self {
            RoutingDecision::Redirect(action) => Some(&action.rule),
            RoutingDecision::Forward(action) => Some(&action.rule),
            RoutingDecision::Error { rule, .. } => Some(rule),
            RoutingDecision::NotFound => None,
        }
    }

    pub fn as_forward(&self) -> Option<&ForwardAction> {
        match self {
            RoutingDecision::Forward(action) => Some(action),
            _ => None,
        }
    }

    pub fn as_redirect(&self) -> Option<&RedirectAction> {
        match self {
            RoutingDecision::Redirect(action) => Some(action),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RoutingDecision::NotFound)
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RoutingDecision::Redirect(_) => "redirect",
            RoutingDecision::Forward(_) => "forward",
            RoutingDecision::NotFound => "not_found",
            RoutingDecision::Error { .. } => "error",
        }
    }
}

/// Redirect response; `None` fields keep the request's original value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectAction {
    pub rule: String,
    pub uri: Option<String>,
    pub authority: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForwardAction {
    pub rule: String,
    pub destination: String,
    pub tags: Tags,
    pub rewrite: Option<AppliedRewrite>,
    pub timeout: TimeoutPolicy,
    pub retry: RetryPolicy,
    pub http_fault: Option<HttpFaultPolicy>,
    pub l4_fault: Option<L4FaultPolicy>,
}

/// Rewrite with the final path already computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct AppliedRewrite {
    pub uri: Option<String>,
    pub authority: Option<String>,
}

impl AppliedRewrite {
    pub fn is_empty(&self) -> bool {
        self.uri.is_none() && self.authority.is_none()
    }
}
