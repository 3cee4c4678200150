use pacekeeper::telemetry::{CircuitEvent, LifecycleEvent, LimiterEvent};
use pacekeeper::{Algorithm, RateLimitRule, RateLimiter, Tier};
use pacekeeper_jsonl::JsonlSink;
use tower_service::Service;

fn lines(path: &std::path::Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .expect("file")
        .lines()
        .map(|l| serde_json::from_str(l).expect("json line"))
        .collect()
}

#[tokio::test]
async fn writes_json_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("events.jsonl");
    let mut sink = JsonlSink::new(&path);

    sink.call(LimiterEvent::Circuit(CircuitEvent::Opened { failure_count: 5 })).await.unwrap();
    sink.call(LimiterEvent::Lifecycle(LifecycleEvent::Shutdown)).await.unwrap();

    let events = lines(&path);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["kind"], "circuit_opened");
    assert_eq!(events[0]["failures"], 5);
    assert_eq!(events[1]["kind"], "shutdown");
}

#[tokio::test]
async fn unwritable_path_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut sink = JsonlSink::new(dir.path().join("missing").join("events.jsonl"));
    let err = sink.call(LimiterEvent::Lifecycle(LifecycleEvent::Shutdown)).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
}

#[tokio::test]
async fn records_limiter_lifecycle_and_failed_checks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("limiter.jsonl");

    let limiter = RateLimiter::builder().sink(JsonlSink::new(&path)).build().await;
    limiter
        .register_rules(
            "shop.example",
            RateLimitRule::new(Algorithm::TokenBucket, vec![Tier::new("per-ip", 5, 1_000).unwrap()])
                .unwrap(),
        )
        .unwrap();
    assert!(limiter.check_limit("10.0.0.1", "shop.example").await.allowed);
    assert!(limiter.check_limit("10.0.0.1", "unknown.example").await.is_fail_open());
    limiter.close().await;

    let kinds: Vec<String> =
        lines(&path).iter().map(|e| e["kind"].as_str().unwrap_or_default().to_string()).collect();
    assert_eq!(kinds, vec!["initialized", "check_failed", "shutdown"]);
}
