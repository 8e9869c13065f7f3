// Tests covering engine bootstrap from configuration and rule documents on disk.
use std::fs;
use std::time::Duration;

use meshroute::{
    bootstrap_with, ConnectionInfo, EngineConfig, MeshRouteError, RequestInfo, RoutingDecision,
    TimeoutPolicy,
};

const REVIEWS: &str = r#"
rules:
  - name: reviews-canary
    destination: reviews
    precedence: 10
    match:
      source: reviews-client
      http_headers:
        uri:
          prefix: /reviews
    route:
      - tags: {version: v2}
        weight: 100
    http_req_timeout:
      simple_timeout:
        timeout_seconds: 0.5
  - name: reviews-default
    destination: reviews
    route:
      - tags: {version: v1}
        weight: 100
"#;

const RATINGS: &str = r#"[
  {
    "name": "ratings-moved",
    "destination": "ratings",
    "match": {"http_headers": {"uri": {"exact": "/v1/ratings"}}},
    "redirect": {"uri": "/v2/ratings"}
  },
  {
    "name": "ratings-broken",
    "destination": "ratings",
    "route": [{"tags": {"version": "v1"}, "weight": 0}, {"tags": {"version": "v2"}, "weight": 0}]
  }
]"#;

fn config_for(path: &std::path::Path) -> EngineConfig {
    EngineConfig {
        rules_path: Some(path.to_path_buf()),
        ..EngineConfig::default()
    }
    .with_default_timeout(Duration::from_secs(4))
}

#[test]
fn bootstrap_seeds_store_from_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("10-reviews.yaml"), REVIEWS).expect("write reviews");
    fs::write(dir.path().join("20-ratings.json"), RATINGS).expect("write ratings");

    let engine = bootstrap_with(&config_for(dir.path())).expect("engine");
    assert_eq!(engine.store().destinations(), vec!["ratings", "reviews"]);
    assert_eq!(engine.store().rules_for("ratings").len(), 1);

    let history = engine.store().history(None);
    assert!(history
        .iter()
        .all(|entry| entry.updated_by.as_deref().is_some_and(|by| by.starts_with("file:"))));
    let ratings = history
        .iter()
        .find(|entry| entry.destination == "ratings")
        .expect("ratings history");
    assert_eq!((ratings.accepted, ratings.rejected), (1, 1));

    let canary = ConnectionInfo {
        source: Some("reviews-client".into()),
        ..ConnectionInfo::default()
    };
    let request = RequestInfo::new("GET", "/reviews/3");
    let decision = engine.evaluate("reviews", &canary, Some(&request));
    let forward = decision.as_forward().expect("forward decision");
    assert_eq!(forward.rule, "reviews-canary");
    assert_eq!(
        forward.timeout,
        TimeoutPolicy::Simple {
            timeout: Duration::from_millis(500),
            override_header_name: None,
        }
    );

    let fallback = engine.evaluate(
        "reviews",
        &ConnectionInfo::default(),
        Some(&RequestInfo::new("GET", "/reviews/3")),
    );
    let forward = fallback.as_forward().expect("forward decision");
    assert_eq!(forward.rule, "reviews-default");
    assert_eq!(
        forward.timeout,
        TimeoutPolicy::Simple {
            timeout: Duration::from_secs(4),
            override_header_name: None,
        }
    );

    let redirect = engine.evaluate(
        "ratings",
        &ConnectionInfo::default(),
        Some(&RequestInfo::new("GET", "/v1/ratings")),
    );
    assert!(matches!(redirect, RoutingDecision::Redirect(_)));
}

#[test]
fn missing_rules_path_fails_bootstrap() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("absent.yaml");
    let err = bootstrap_with(&config_for(&missing)).unwrap_err();
    assert!(matches!(err, MeshRouteError::RuleError(_)));
}

#[test]
fn engine_without_rules_path_starts_empty() {
    let engine = bootstrap_with(&EngineConfig::default()).expect("engine");
    assert_eq!(engine.store().version(), 0);
    assert!(engine
        .evaluate("reviews", &ConnectionInfo::default(), Some(&RequestInfo::new("GET", "/")))
        .is_not_found());
}

#[test]
fn reloading_a_document_replaces_previous_rules() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("reviews.yaml");
    fs::write(&path, REVIEWS).expect("write reviews");
    let engine = bootstrap_with(&config_for(&path)).expect("engine");
    assert_eq!(engine.store().rules_for("reviews").len(), 2);

    fs::write(
        &path,
        "name: only\ndestination: reviews\nroute:\n  - tags: {version: v3}\n    weight: 100\n",
    )
    .expect("rewrite reviews");
    let reports = engine.load_path(&path).expect("reload");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].accepted, vec!["only".to_string()]);

    let names: Vec<String> = engine
        .store()
        .rules_for("reviews")
        .iter()
        .map(|rule| rule.name.clone())
        .collect();
    assert_eq!(names, vec!["only"]);
}
