use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by the routing engine when loading, installing or resolving rules.
///
/// Configuration and match-evaluation errors are always attributed to a single
/// rule; they disqualify that rule and never abort evaluation of the others.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RouteError {
    #[error("rule {rule} is misconfigured: {reason}")]
    Configuration { rule: String, reason: String },
    #[error("rule {rule} could not be evaluated: {reason}")]
    MatchEvaluation { rule: String, reason: String },
    #[error("rules path does not exist: {0}")]
    MissingPath(String),
    #[error("failed to read rules from {path}: {message}")]
    Io { path: String, message: String },
    #[error("failed to parse rules from {path}: {message}")]
    Parse { path: String, message: String },
    #[error("duplicate rule identifier detected: {id}")]
    DuplicateRule { id: String },
}

impl RouteError {
    pub fn configuration(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        RouteError::Configuration {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    pub fn match_evaluation(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        RouteError::MatchEvaluation {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RouteError::Io {
            path: path.into().display().to_string(),
            message: source.to_string(),
        }
    }

    pub fn parse_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        RouteError::Parse {
            path: path.into().display().to_string(),
            message: message.into(),
        }
    }

    /// Whether the error marks a rule as misconfigured.
    pub fn is_configuration(&self) -> bool {
        matches!(self, RouteError::Configuration { .. })
    }
}

impl From<RouteError> for meshroute_core::MeshRouteError {
    fn from(value: RouteError) -> Self {
        meshroute_core::MeshRouteError::RuleError(value.to_string())
    }
}
