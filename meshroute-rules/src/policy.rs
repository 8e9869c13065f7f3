//! Timeout, retry and fault-injection policies.
//!
//! Configuration shapes (`HttpTimeout`, `HttpFaultInjection`, ...) are
//! resolved into the exclusive policy types carried by a forward decision.
//! Every duration attached to a request must be at least one millisecond;
//! anything smaller is a configuration error rather than being clamped.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::RouteError;
use crate::rule::StringMatch;

const MIN_DURATION_SECS: f64 = 0.001;

/// Opaque, type-keyed policy payload interpreted by a transport plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomPolicy {
    pub type_url: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum HttpTimeout {
    SimpleTimeout(SimpleTimeoutPolicy),
    Custom(CustomPolicy),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimpleTimeoutPolicy {
    pub timeout_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_header_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum HttpRetry {
    SimpleRetry(SimpleRetryPolicy),
    Custom(CustomPolicy),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimpleRetryPolicy {
    pub attempts: u32,
    /// Falls back to the request timeout when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_try_timeout_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_header_name: Option<String>,
}

/// Faults injected into HTTP requests, optionally restricted by headers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HttpFaultInjection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Delay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort: Option<Abort>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, StringMatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Delay {
    #[serde(default)]
    pub percent: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_delay_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exponential_delay_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_header_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Abort {
    #[serde(default)]
    pub percent: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http2_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_header_name: Option<String>,
}

/// Faults injected at the connection level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct L4FaultInjection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle: Option<Throttle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate: Option<Terminate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Throttle {
    #[serde(default)]
    pub percent: f32,
    #[serde(default)]
    pub downstream_limit_bps: u64,
    #[serde(default)]
    pub upstream_limit_bps: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle_after_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle_after_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle_for_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Terminate {
    #[serde(default)]
    pub percent: f32,
    pub terminate_after_seconds: f64,
}

/// Timeout attached to a forward decision.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeoutPolicy {
    Simple {
        timeout: Duration,
        override_header_name: Option<String>,
    },
    Custom(CustomPolicy),
}

/// Retry behaviour attached to a forward decision.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryPolicy {
    Disabled,
    Simple {
        attempts: u32,
        per_try_timeout: Duration,
        override_header_name: Option<String>,
    },
    Custom(CustomPolicy),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpFaultPolicy {
    pub delay: Option<DelayPolicy>,
    pub abort: Option<AbortPolicy>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DelayPolicy {
    pub percent: f32,
    pub kind: DelayKind,
    pub override_header_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayKind {
    Fixed(Duration),
    Exponential(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AbortPolicy {
    pub percent: f32,
    pub error: AbortError,
    pub override_header_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    HttpStatus(u16),
    GrpcStatus(String),
    Http2Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct L4FaultPolicy {
    pub throttle: Option<ThrottlePolicy>,
    pub terminate: Option<TerminatePolicy>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThrottlePolicy {
    pub percent: f32,
    pub downstream_limit_bps: u64,
    pub upstream_limit_bps: u64,
    pub after: ThrottleAfter,
    pub throttle_for: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleAfter {
    Immediately,
    Period(Duration),
    Bytes(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TerminatePolicy {
    pub percent: f32,
    pub terminate_after: Duration,
}

/// Checks a custom policy payload on behalf of a transport plugin.
pub trait CustomPolicyHandler: Send + Sync {
    fn validate(&self, payload: &Value) -> Result<(), String>;
}

impl<F> CustomPolicyHandler for F
where
    F: Fn(&Value) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, payload: &Value) -> Result<(), String> {
        self(payload)
    }
}

/// Registry of custom policy handlers keyed by payload type identifier.
///
/// Payloads whose type has no registered handler pass through untouched.
#[derive(Clone, Default)]
pub struct PolicyRegistry {
    handlers: HashMap<String, Arc<dyn CustomPolicyHandler>>,
}

impl fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&String> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("PolicyRegistry").field("types", &types).finish()
    }
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the handler for `type_url`.
    pub fn register(
        &mut self,
        type_url: impl Into<String>,
        handler: impl CustomPolicyHandler + 'static,
    ) -> &mut Self {
        self.handlers.insert(type_url.into(), Arc::new(handler));
        self
    }

    pub fn handler(&self, type_url: &str) -> Option<Arc<dyn CustomPolicyHandler>> {
        self.handlers.get(type_url).cloned()
    }

    pub fn contains(&self, type_url: &str) -> bool {
        self.handlers.contains_key(type_url)
    }

    /// Validates a custom payload, attributing failures to `rule`.
    pub fn check(&self, rule: &str, policy: &CustomPolicy) -> Result<CustomPolicy, RouteError> {
        if policy.type_url.trim().is_empty() {
            return Err(RouteError::configuration(
                rule,
                "custom policy is missing its type_url",
            ));
        }
        match self.handlers.get(&policy.type_url) {
            Some(handler) => handler.validate(&policy.value).map_err(|reason| {
                RouteError::configuration(
                    rule,
                    format!("custom policy {} rejected: {reason}", policy.type_url),
                )
            })?,
            None => debug!(
                rule,
                type_url = %policy.type_url,
                "no handler for custom policy, passing through"
            ),
        }
        Ok(policy.clone())
    }
}

fn duration_from_secs(rule: &str, field: &str, secs: f64) -> Result<Duration, RouteError> {
    // `!(a >= b)` also rejects NaN.
    if !(secs >= MIN_DURATION_SECS) {
        return Err(RouteError::configuration(
            rule,
            format!("{field} must be at least 1ms, got {secs}s"),
        ));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|err| RouteError::configuration(rule, format!("{field} is out of range: {err}")))
}

fn check_percent(rule: &str, field: &str, percent: f32) -> Result<f32, RouteError> {
    if !(0.0..=100.0).contains(&percent) {
        return Err(RouteError::configuration(
            rule,
            format!("{field} percent must lie within 0..=100, got {percent}"),
        ));
    }
    Ok(percent)
}

/// Resolves the timeout policy; an absent policy yields `default_timeout`.
pub fn resolve_timeout(
    rule: &str,
    timeout: Option<&HttpTimeout>,
    default_timeout: Duration,
    registry: &PolicyRegistry,
) -> Result<TimeoutPolicy, RouteError> {
    match timeout {
        None => Ok(TimeoutPolicy::Simple {
            timeout: default_timeout,
            override_header_name: None,
        }),
        Some(HttpTimeout::SimpleTimeout(simple)) => Ok(TimeoutPolicy::Simple {
            timeout: duration_from_secs(rule, "timeout", simple.timeout_seconds)?,
            override_header_name: simple.override_header_name.clone(),
        }),
        Some(HttpTimeout::Custom(custom)) => {
            registry.check(rule, custom).map(TimeoutPolicy::Custom)
        }
    }
}

/// Resolves the retry policy. `request_timeout` seeds the per-try timeout
/// when the rule leaves it unset.
pub fn resolve_retry(
    rule: &str,
    retry: Option<&HttpRetry>,
    request_timeout: Duration,
    registry: &PolicyRegistry,
) -> Result<RetryPolicy, RouteError> {
    match retry {
        None => Ok(RetryPolicy::Disabled),
        Some(HttpRetry::SimpleRetry(simple)) => {
            let per_try_timeout = match simple.per_try_timeout_seconds {
                Some(secs) => duration_from_secs(rule, "per_try_timeout", secs)?,
                None => request_timeout,
            };
            if simple.attempts == 0 {
                return Ok(RetryPolicy::Disabled);
            }
            Ok(RetryPolicy::Simple {
                attempts: simple.attempts,
                per_try_timeout,
                override_header_name: simple.override_header_name.clone(),
            })
        }
        Some(HttpRetry::Custom(custom)) => registry.check(rule, custom).map(RetryPolicy::Custom),
    }
}

pub fn resolve_http_fault(
    rule: &str,
    fault: &HttpFaultInjection,
) -> Result<HttpFaultPolicy, RouteError> {
    let delay = fault
        .delay
        .as_ref()
        .map(|delay| -> Result<DelayPolicy, RouteError> {
            let kind = match (delay.fixed_delay_seconds, delay.exponential_delay_seconds) {
                (Some(secs), None) => {
                    DelayKind::Fixed(duration_from_secs(rule, "fixed_delay", secs)?)
                }
                (None, Some(secs)) => {
                    DelayKind::Exponential(duration_from_secs(rule, "exponential_delay", secs)?)
                }
                _ => {
                    return Err(RouteError::configuration(
                        rule,
                        "delay needs exactly one of fixed_delay_seconds \
                         or exponential_delay_seconds",
                    ))
                }
            };
            Ok(DelayPolicy {
                percent: check_percent(rule, "delay", delay.percent)?,
                kind,
                override_header_name: delay.override_header_name.clone(),
            })
        })
        .transpose()?;

    let abort = fault
        .abort
        .as_ref()
        .map(|abort| -> Result<AbortPolicy, RouteError> {
            let error = match (abort.http_status, &abort.grpc_status, &abort.http2_error) {
                (Some(status), None, None) => {
                    if !(100..=599).contains(&status) {
                        return Err(RouteError::configuration(
                            rule,
                            format!("abort http_status {status} is not a valid HTTP status"),
                        ));
                    }
                    AbortError::HttpStatus(status)
                }
                (None, Some(status), None) => AbortError::GrpcStatus(status.clone()),
                (None, None, Some(error)) => AbortError::Http2Error(error.clone()),
                _ => {
                    return Err(RouteError::configuration(
                        rule,
                        "abort needs exactly one of http_status, grpc_status or http2_error",
                    ))
                }
            };
            Ok(AbortPolicy {
                percent: check_percent(rule, "abort", abort.percent)?,
                error,
                override_header_name: abort.override_header_name.clone(),
            })
        })
        .transpose()?;

    Ok(HttpFaultPolicy { delay, abort })
}

pub fn resolve_l4_fault(rule: &str, fault: &L4FaultInjection) -> Result<L4FaultPolicy, RouteError> {
    let throttle = fault
        .throttle
        .as_ref()
        .map(|throttle| -> Result<ThrottlePolicy, RouteError> {
            let after = match (throttle.throttle_after_seconds, throttle.throttle_after_bytes) {
                (None, None) => ThrottleAfter::Immediately,
                (Some(secs), None) => {
                    ThrottleAfter::Period(duration_from_secs(rule, "throttle_after", secs)?)
                }
                (None, Some(bytes)) => ThrottleAfter::Bytes(bytes),
                (Some(_), Some(_)) => {
                    return Err(RouteError::configuration(
                        rule,
                        "throttle_after_seconds and throttle_after_bytes are mutually exclusive",
                    ))
                }
            };
            let throttle_for = throttle
                .throttle_for_seconds
                .map(|secs| duration_from_secs(rule, "throttle_for", secs))
                .transpose()?;
            Ok(ThrottlePolicy {
                percent: check_percent(rule, "throttle", throttle.percent)?,
                downstream_limit_bps: throttle.downstream_limit_bps,
                upstream_limit_bps: throttle.upstream_limit_bps,
                after,
                throttle_for,
            })
        })
        .transpose()?;

    let terminate = fault
        .terminate
        .as_ref()
        .map(|terminate| -> Result<TerminatePolicy, RouteError> {
            Ok(TerminatePolicy {
                percent: check_percent(rule, "terminate", terminate.percent)?,
                terminate_after: duration_from_secs(
                    rule,
                    "terminate_after",
                    terminate.terminate_after_seconds,
                )?,
            })
        })
        .transpose()?;

    Ok(L4FaultPolicy { throttle, terminate })
}
