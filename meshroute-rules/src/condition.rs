//! Match condition evaluation.
//!
//! Conditions are compiled once per installed rule: header regexes are built
//! and subnets parsed up front, so matching a request is a pure read. Clauses
//! that cannot be evaluated (bad regex, regex on `uri`, unparseable subnet)
//! fail closed and are reported as diagnostics at compile time.

use std::collections::BTreeMap;
use std::net::IpAddr;

use ipnet::IpNet;
use regex::Regex;
use tracing::{trace, warn};

use crate::attributes::{normalize_header_name, AttributeSet, URI};
use crate::error::RouteError;
use crate::rule::{L4MatchAttributes, MatchCondition, StringMatch, Tags};

/// Extra facts a successful match hands to the action resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchOutcome {
    /// Length of the `uri` prefix matched by a prefix clause, if any.
    pub uri_prefix_len: Option<usize>,
}

#[derive(Debug, Clone)]
enum CompiledStringMatch {
    Exact(String),
    Prefix(String),
    Regex(Regex),
    /// Never matches.
    Invalid,
}

impl CompiledStringMatch {
    fn compile(
        rule: &str,
        header: &str,
        matcher: &StringMatch,
        diagnostics: &mut Vec<RouteError>,
    ) -> Self {
        match matcher {
            StringMatch::Exact(value) => CompiledStringMatch::Exact(value.clone()),
            StringMatch::Prefix(value) => CompiledStringMatch::Prefix(value.clone()),
            StringMatch::Regex(_) if header == URI => {
                diagnostics.push(RouteError::configuration(
                    rule,
                    "uri only supports exact or prefix matches",
                ));
                CompiledStringMatch::Invalid
            }
            StringMatch::Regex(pattern) => match Regex::new(pattern) {
                Ok(regex) => CompiledStringMatch::Regex(regex),
                Err(err) => {
                    diagnostics.push(RouteError::match_evaluation(
                        rule,
                        format!("header {header} regex {pattern:?} does not compile: {err}"),
                    ));
                    CompiledStringMatch::Invalid
                }
            },
        }
    }

    /// Returns the matched prefix length for prefix matches.
    fn evaluate(&self, value: &str) -> Option<Option<usize>> {
        match self {
            CompiledStringMatch::Exact(expected) => (value == expected.as_str()).then_some(None),
            CompiledStringMatch::Prefix(prefix) => {
                value.starts_with(prefix.as_str()).then_some(Some(prefix.len()))
            }
            CompiledStringMatch::Regex(regex) => regex.is_match(value).then_some(None),
            CompiledStringMatch::Invalid => None,
        }
    }
}

/// Compiled `header -> StringMatch` map; every listed header must match.
#[derive(Debug, Clone, Default)]
pub struct HeaderMatchers {
    matchers: Vec<(String, CompiledStringMatch)>,
}

impl HeaderMatchers {
    pub fn compile(
        rule: &str,
        headers: &BTreeMap<String, StringMatch>,
        diagnostics: &mut Vec<RouteError>,
    ) -> Self {
        let matchers = headers
            .iter()
            .map(|(name, matcher)| {
                let name = normalize_header_name(name);
                let compiled = CompiledStringMatch::compile(rule, &name, matcher, diagnostics);
                (name, compiled)
            })
            .collect();
        Self { matchers }
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub fn evaluate(&self, attrs: &AttributeSet) -> Option<MatchOutcome> {
        let mut outcome = MatchOutcome::default();
        for (name, matcher) in &self.matchers {
            let value = attrs.header(name)?;
            let prefix_len = matcher.evaluate(value)?;
            if name == URI {
                outcome.uri_prefix_len = prefix_len;
            }
        }
        Some(outcome)
    }
}

#[derive(Debug, Clone, Default)]
struct SubnetList {
    nets: Vec<IpNet>,
    /// Whether the configuration listed any entry at all, valid or not.
    constrained: bool,
}

impl SubnetList {
    fn compile(rule: &str, raw: &[String], diagnostics: &mut Vec<RouteError>) -> Self {
        let mut nets = Vec::with_capacity(raw.len());
        for entry in raw {
            match parse_subnet(entry) {
                Some(net) => nets.push(net),
                None => diagnostics.push(RouteError::match_evaluation(
                    rule,
                    format!("{entry:?} is not a subnet or address"),
                )),
            }
        }
        Self {
            nets,
            constrained: !raw.is_empty(),
        }
    }

    fn matches(&self, addr: Option<IpAddr>) -> bool {
        if !self.constrained {
            return true;
        }
        addr.is_some_and(|addr| self.nets.iter().any(|net| net.contains(&addr)))
    }
}

/// Parses `10.0.0.0/8`, `2001:db8::/32` or a bare address (as /32 or /128).
pub fn parse_subnet(raw: &str) -> Option<IpNet> {
    let raw = raw.trim();
    raw.parse::<IpNet>()
        .ok()
        .or_else(|| raw.parse::<IpAddr>().ok().map(IpNet::from))
}

#[derive(Debug, Clone)]
struct CompiledL4 {
    source: SubnetList,
    destination: SubnetList,
}

impl CompiledL4 {
    fn compile(rule: &str, attrs: &L4MatchAttributes, diagnostics: &mut Vec<RouteError>) -> Self {
        Self {
            source: SubnetList::compile(rule, &attrs.source_subnet, diagnostics),
            destination: SubnetList::compile(rule, &attrs.destination_subnet, diagnostics),
        }
    }

    fn matches(&self, attrs: &AttributeSet) -> bool {
        self.source.matches(attrs.source_addr.map(|addr| addr.ip()))
            && self
                .destination
                .matches(attrs.destination_addr.map(|addr| addr.ip()))
    }
}

/// A [`MatchCondition`] ready to be evaluated against attribute sets.
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    source: Option<String>,
    source_tags: Tags,
    tcp: Option<CompiledL4>,
    udp: Option<CompiledL4>,
    headers: HeaderMatchers,
    diagnostics: Vec<RouteError>,
}

impl CompiledCondition {
    pub fn compile(rule: &str, condition: &MatchCondition) -> Self {
        let mut diagnostics = Vec::new();
        let tcp = condition
            .tcp
            .as_ref()
            .map(|tcp| CompiledL4::compile(rule, tcp, &mut diagnostics));
        let udp = condition
            .udp
            .as_ref()
            .map(|udp| CompiledL4::compile(rule, udp, &mut diagnostics));
        let headers = HeaderMatchers::compile(rule, &condition.http_headers, &mut diagnostics);

        for diagnostic in &diagnostics {
            warn!(rule, error = %diagnostic, "match clause will never match");
        }

        Self {
            source: condition.source.clone().filter(|source| !source.is_empty()),
            source_tags: condition.source_tags.clone(),
            tcp,
            udp,
            headers,
            diagnostics,
        }
    }

    /// Problems found while compiling; the affected clauses fail closed.
    pub fn diagnostics(&self) -> &[RouteError] {
        &self.diagnostics
    }

    pub fn matches(&self, attrs: &AttributeSet) -> bool {
        self.evaluate(attrs).is_some()
    }

    /// Evaluates the condition. Every applicable clause must hold; `tcp` and
    /// `udp` clauses apply only to traffic of their protocol. A condition with
    /// no applicable clause does not match.
    pub fn evaluate(&self, attrs: &AttributeSet) -> Option<MatchOutcome> {
        let mut applied = false;

        if let Some(expected) = &self.source {
            if attrs.source.as_deref() != Some(expected.as_str()) {
                return None;
            }
            applied = true;
        }

        if !self.source_tags.is_empty() {
            let tags_match = self
                .source_tags
                .iter()
                .all(|(key, value)| attrs.source_tags.get(key) == Some(value));
            if !tags_match {
                return None;
            }
            applied = true;
        }

        let l4 = if attrs.protocol.is_tcp() {
            self.tcp.as_ref()
        } else {
            self.udp.as_ref()
        };
        match l4 {
            Some(clause) if !clause.matches(attrs) => return None,
            Some(_) => applied = true,
            None if self.tcp.is_some() || self.udp.is_some() => {
                trace!(protocol = ?attrs.protocol, "l4 clause skipped for protocol");
            }
            None => {}
        }

        let outcome = self.headers.evaluate(attrs)?;
        applied |= !self.headers.is_empty();

        applied.then_some(outcome)
    }
}

/// Evaluates a raw condition without keeping the compiled form around.
pub fn matches(condition: &MatchCondition, attrs: &AttributeSet) -> bool {
    CompiledCondition::compile("<adhoc>", condition).matches(attrs)
}
