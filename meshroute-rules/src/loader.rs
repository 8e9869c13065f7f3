use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::RouteError;
use crate::rule::RouteRule;

const EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

/// Shapes a rule document may take.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuleDocument {
    Wrapped(WrappedRules),
    List(Vec<RouteRule>),
    Single(Box<RouteRule>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WrappedRules {
    rules: Vec<RouteRule>,
}

impl From<RuleDocument> for Vec<RouteRule> {
    fn from(document: RuleDocument) -> Self {
        match document {
            RuleDocument::Wrapped(wrapped) => wrapped.rules,
            RuleDocument::List(rules) => rules,
            RuleDocument::Single(rule) => vec![*rule],
        }
    }
}

/// Reads route rules from a YAML/JSON file or a directory of them.
///
/// Directory entries are read in file-name order and rules keep their order
/// within each file, which fixes registration order for tie-breaks.
pub fn load_rules(path: impl AsRef<Path>) -> Result<Vec<RouteRule>, RouteError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(RouteError::MissingPath(path.display().to_string()));
    }

    let files = if path.is_dir() {
        rule_files(path)?
    } else {
        vec![path.to_path_buf()]
    };

    let mut rules = Vec::new();
    let mut origin: HashMap<String, PathBuf> = HashMap::new();
    for file in files {
        let raw = fs::read_to_string(&file).map_err(|err| RouteError::from_io(&file, err))?;
        let parsed = parse_rules(&raw, &file)?;
        debug!(path = %file.display(), rules = parsed.len(), "rule document read");

        for rule in parsed {
            if !rule.name.is_empty() {
                if let Some(first) = origin.insert(rule.name.clone(), file.clone()) {
                    debug!(
                        rule = %rule.name,
                        first = %first.display(),
                        again = %file.display(),
                        "duplicate rule name"
                    );
                    return Err(RouteError::DuplicateRule { id: rule.name });
                }
            }
            rules.push(rule);
        }
    }
    Ok(rules)
}

/// Rule documents directly inside `dir`, sorted by path.
fn rule_files(dir: &Path) -> Result<Vec<PathBuf>, RouteError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|err| RouteError::from_io(dir, err))? {
        let path = entry.map_err(|err| RouteError::from_io(dir, err))?.path();
        let known = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| EXTENSIONS.contains(&ext));
        if known && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Parses a document holding `{rules: [...]}`, a list of rules or a single rule.
///
/// `.json` paths are read as JSON, anything else as YAML (which also accepts
/// JSON text).
pub fn parse_rules(raw: &str, path: &Path) -> Result<Vec<RouteRule>, RouteError> {
    let is_json = path.extension().and_then(|ext| ext.to_str()) == Some("json");
    let document = if is_json {
        serde_json::from_str::<RuleDocument>(raw).map_err(|err| err.to_string())
    } else {
        serde_yaml::from_str::<RuleDocument>(raw).map_err(|err| err.to_string())
    };

    document.map(Vec::from).map_err(|err| {
        RouteError::parse_error(
            path.to_path_buf(),
            format!("expected a rules document, a list of rules or a single rule: {err}"),
        )
    })
}
