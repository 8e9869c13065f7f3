//! Normalization of connection and request descriptors into a flat attribute set.

use std::collections::HashMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::rule::Tags;

/// Pseudo attributes synthesized from the request line.
pub const URI: &str = "uri";
pub const SCHEME: &str = "scheme";
pub const METHOD: &str = "method";
pub const AUTHORITY: &str = "authority";

/// Transport protocol of the accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    #[default]
    Tcp,
    Udp,
}

/// Protocol seen by the matcher. HTTP rides on TCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Http,
    Tcp,
    Udp,
}

impl Protocol {
    pub fn is_http(self) -> bool {
        matches!(self, Protocol::Http)
    }

    /// Whether connections of this protocol are carried over TCP.
    pub fn is_tcp(self) -> bool {
        matches!(self, Protocol::Http | Protocol::Tcp)
    }

    pub fn is_udp(self) -> bool {
        matches!(self, Protocol::Udp)
    }
}

/// Read-only connection descriptor handed over by the transport layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default)]
    pub transport: Transport,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub source_tags: Tags,
    #[serde(default)]
    pub source_addr: Option<SocketAddr>,
    #[serde(default)]
    pub destination_addr: Option<SocketAddr>,
}

/// Read-only HTTP request descriptor. Header lines keep their wire spelling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestInfo {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub scheme: String,
    #[serde(default)]
    pub authority: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Flat view of a connection (and optional request) used by the matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSet {
    pub protocol: Protocol,
    pub source: Option<String>,
    pub source_tags: Tags,
    pub source_addr: Option<SocketAddr>,
    pub destination_addr: Option<SocketAddr>,
    headers: HashMap<String, String>,
}

impl AttributeSet {
    /// Header (or pseudo attribute) value by normalized name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn uri(&self) -> Option<&str> {
        self.header(URI)
    }

    pub fn is_http(&self) -> bool {
        self.protocol.is_http()
    }
}

/// Lowercases a header name and turns `_` separators into `-`.
pub fn normalize_header_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|ch| if ch == '_' { '-' } else { ch.to_ascii_lowercase() })
        .collect()
}

fn is_pseudo(name: &str) -> bool {
    matches!(name, URI | SCHEME | METHOD | AUTHORITY)
}

/// HTTP/2 pseudo header lines and `host` that may stand in for a pseudo attribute.
fn pseudo_fallback(name: &str) -> Option<&'static str> {
    match name {
        ":path" => Some(URI),
        ":scheme" => Some(SCHEME),
        ":method" => Some(METHOD),
        ":authority" | "host" => Some(AUTHORITY),
        _ => None,
    }
}

/// Builds the attribute set for one connection and, for HTTP, one request.
pub fn extract(connection: &ConnectionInfo, request: Option<&RequestInfo>) -> AttributeSet {
    let protocol = match (request, connection.transport) {
        (Some(_), _) => Protocol::Http,
        (None, Transport::Tcp) => Protocol::Tcp,
        (None, Transport::Udp) => Protocol::Udp,
    };

    let mut headers = HashMap::new();
    if let Some(request) = request {
        for (name, value) in [
            (URI, &request.uri),
            (SCHEME, &request.scheme),
            (METHOD, &request.method),
            (AUTHORITY, &request.authority),
        ] {
            if !value.is_empty() {
                headers.insert(name.to_string(), value.clone());
            }
        }

        let mut fallbacks: Vec<(&'static str, bool, &String)> = Vec::new();
        for (name, value) in &request.headers {
            let name = normalize_header_name(name);
            if let Some(pseudo) = pseudo_fallback(&name) {
                let is_host = name == "host";
                fallbacks.push((pseudo, is_host, value));
                if !is_host {
                    continue;
                }
            }
            if is_pseudo(&name) {
                continue;
            }
            headers.entry(name).or_insert_with(|| value.clone());
        }

        // `:authority` precedes `host` when both are present.
        fallbacks.sort_by_key(|(pseudo, is_host, _)| (*pseudo, *is_host));
        for (pseudo, _, value) in fallbacks {
            headers
                .entry(pseudo.to_string())
                .or_insert_with(|| value.clone());
        }
    }

    AttributeSet {
        protocol,
        source: connection.source.clone().filter(|source| !source.is_empty()),
        source_tags: connection.source_tags.clone(),
        source_addr: connection.source_addr,
        destination_addr: connection.destination_addr,
        headers,
    }
}
