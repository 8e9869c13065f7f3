// Tests covering evaluation while rule sets are being replaced from other threads.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use meshroute::{
    ConnectionInfo, DestinationWeight, MatchCondition, RequestInfo, RouteEngine, RouteRule, Tags,
};

const GENERATIONS: u64 = 200;

fn generation(n: u64) -> Vec<RouteRule> {
    let tags = |version: &str| {
        Tags::from([
            ("version".to_string(), version.to_string()),
            ("generation".to_string(), n.to_string()),
        ])
    };
    let mut rules = vec![RouteRule {
        name: format!("default-{n}"),
        destination: "reviews".into(),
        route: vec![DestinationWeight {
            destination: None,
            tags: tags("v1"),
            weight: 100,
        }],
        ..RouteRule::default()
    }];
    if n % 2 == 0 {
        rules.insert(
            0,
            RouteRule {
                name: format!("canary-{n}"),
                destination: "reviews".into(),
                precedence: 10,
                match_condition: Some(MatchCondition {
                    source: Some("tester".into()),
                    ..MatchCondition::default()
                }),
                route: vec![DestinationWeight {
                    destination: None,
                    tags: tags("v2"),
                    weight: 100,
                }],
                ..RouteRule::default()
            },
        );
    }
    rules
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_only_observe_complete_rule_sets() {
    let engine = RouteEngine::default();
    engine.store().update_rules("reviews", generation(0), None);
    let done = Arc::new(AtomicBool::new(false));

    let mut readers = Vec::new();
    for _ in 0..3 {
        let engine = engine.clone();
        let done = done.clone();
        readers.push(tokio::task::spawn_blocking(move || {
            let connection = ConnectionInfo {
                source: Some("tester".into()),
                ..ConnectionInfo::default()
            };
            let request = RequestInfo::new("GET", "/reviews/1");
            let mut last_version = 0;
            let mut observed = 0u64;

            loop {
                let version = engine.store().version();
                assert!(version >= last_version, "snapshot version went backwards");
                last_version = version;

                let decision = engine.evaluate("reviews", &connection, Some(&request));
                let forward = decision
                    .as_forward()
                    .unwrap_or_else(|| panic!("reader saw a partial rule set: {decision:?}"));
                let generation: u64 = forward.tags["generation"].parse().expect("generation tag");
                let expected = if generation % 2 == 0 {
                    format!("canary-{generation}")
                } else {
                    format!("default-{generation}")
                };
                assert_eq!(forward.rule, expected);
                observed += 1;
                if done.load(Ordering::Acquire) {
                    break;
                }
            }
            observed
        }));
    }

    let writer = {
        let engine = engine.clone();
        tokio::task::spawn_blocking(move || {
            for n in 1..=GENERATIONS {
                let report = engine
                    .store()
                    .update_rules("reviews", generation(n), Some("writer".into()));
                assert!(report.is_clean());
            }
        })
    };

    writer.await.expect("writer task");
    done.store(true, Ordering::Release);
    for reader in readers {
        let observed = reader.await.expect("reader task");
        assert!(observed > 0);
    }

    assert_eq!(engine.store().version(), GENERATIONS + 1);
    assert_eq!(
        engine.store().history(Some("reviews")).len() as u64,
        GENERATIONS + 1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn held_snapshot_is_unaffected_by_later_updates() {
    let engine = RouteEngine::default();
    engine.store().update_rules("reviews", generation(0), None);
    let before = engine.store().snapshot();

    let updater = engine.clone();
    tokio::task::spawn_blocking(move || {
        updater.store().update_rules("reviews", generation(1), None);
        updater.store().remove_destination("reviews", None);
    })
    .await
    .expect("update task");

    assert_eq!(before.rules_for("reviews").len(), 2);
    assert!(engine.store().snapshot().rules_for("reviews").is_empty());
    assert_eq!(engine.store().version(), before.version() + 2);
}
