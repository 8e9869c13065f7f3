// Fuzz target installing arbitrary rule documents and evaluating requests against them.
#![no_main]

use std::path::Path;

use libfuzzer_sys::fuzz_target;
use meshroute_rules::{parse_rules, ConnectionInfo, RequestInfo, RouteEngine, Transport};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Documents may carry a trailing JSON request after a `---request` marker.
    let (document, request) = match text.split_once("\n---request\n") {
        Some((document, raw)) => (document, serde_json::from_str::<RequestInfo>(raw).ok()),
        None => (text, None),
    };

    let Ok(rules) = parse_rules(document, Path::new("fuzz.yaml")) else {
        return;
    };

    let engine = RouteEngine::default();
    let reports = engine.store().install_all(rules, None);

    let request = request.unwrap_or_else(|| {
        RequestInfo::new("GET", "/reviews/1").header("cookie", "user=jason")
    });
    let connections = [
        ConnectionInfo {
            source: Some("reviews-client".into()),
            source_addr: "10.0.0.1:4000".parse().ok(),
            destination_addr: "10.0.1.1:9080".parse().ok(),
            ..ConnectionInfo::default()
        },
        ConnectionInfo {
            transport: Transport::Udp,
            ..ConnectionInfo::default()
        },
    ];

    for report in reports {
        for connection in &connections {
            let _ = engine.evaluate(&report.destination, connection, Some(&request));
            let _ = engine.evaluate(&report.destination, connection, None);
        }
    }
});
