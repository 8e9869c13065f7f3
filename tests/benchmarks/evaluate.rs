// Benchmark measuring rule evaluation against stores of increasing size.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use meshroute::{
    extract, ConnectionInfo, DestinationWeight, MatchCondition, RequestInfo, RouteEngine,
    RouteRule, StringMatch, Tags,
};

fn rules(count: usize) -> Vec<RouteRule> {
    let mut rules: Vec<RouteRule> = (0..count)
        .map(|n| RouteRule {
            name: format!("header-{n}"),
            destination: "reviews".into(),
            precedence: n as i32,
            match_condition: Some(MatchCondition {
                http_headers: [
                    ("x-tenant".to_string(), StringMatch::Exact(format!("tenant-{n}"))),
                    ("uri".to_string(), StringMatch::Prefix("/reviews".into())),
                ]
                .into(),
                ..MatchCondition::default()
            }),
            route: vec![
                DestinationWeight {
                    destination: None,
                    tags: Tags::from([("version".to_string(), "v2".to_string())]),
                    weight: 10,
                },
                DestinationWeight {
                    destination: None,
                    tags: Tags::from([("version".to_string(), "v1".to_string())]),
                    weight: 90,
                },
            ],
            ..RouteRule::default()
        })
        .collect();
    rules.push(RouteRule {
        name: "default".into(),
        destination: "reviews".into(),
        precedence: -1,
        route: vec![DestinationWeight {
            destination: None,
            tags: Tags::from([("version".to_string(), "v1".to_string())]),
            weight: 100,
        }],
        ..RouteRule::default()
    });
    rules
}

fn evaluate_benchmarks(c: &mut Criterion) {
    let connection = ConnectionInfo {
        source: Some("productpage".into()),
        ..ConnectionInfo::default()
    };
    let request = RequestInfo::new("GET", "/reviews/42")
        .header("x-tenant", "tenant-0")
        .header("user-agent", "bench");

    c.bench_function("extract_attributes", |b| {
        b.iter(|| black_box(extract(black_box(&connection), Some(black_box(&request)))));
    });

    let mut group = c.benchmark_group("evaluate");
    for count in [1usize, 16, 256] {
        let engine = RouteEngine::default();
        engine.store().update_rules("reviews", rules(count), None);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let decision =
                    engine.evaluate("reviews", black_box(&connection), Some(black_box(&request)));
                black_box(decision);
            });
        });
    }
    group.finish();

    c.bench_function("update_rules_256", |b| {
        let engine = RouteEngine::default();
        let batch = rules(256);
        b.iter(|| {
            let report = engine.store().update_rules("reviews", black_box(batch.clone()), None);
            black_box(report);
        });
    });
}

criterion_group!(benches, evaluate_benchmarks);
criterion_main!(benches);
