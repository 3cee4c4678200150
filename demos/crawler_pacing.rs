//! Crawler pacing example.
//!
//! A crawler fetches product pages from two shops through a `RateLimitLayer`. Each shop has its
//! own multi-tier rule; admitted requests wait the advisory delay and denied ones report how
//! long to back off. Run with `RUST_LOG=debug` to see the limiter's own logs.

use pacekeeper::telemetry::{LogSink, MemorySink, MulticastSink};
use pacekeeper::{
    Algorithm, LimiterConfig, RateLimitLayer, RateLimitRule, RateLimiter, RuleConfig, Tier,
};
use std::sync::Arc;
use std::time::Duration;
use tower::{Layer, ServiceExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Crawler Pacing Example ===\n");

    let events = MemorySink::new();
    let config = LimiterConfig::builder()
        .key_prefix("crawler")
        .max_local_entries(1_000)
        .build()?;
    let limiter = Arc::new(
        RateLimiter::builder()
            .config(config)
            .sink(MulticastSink::new(events.clone(), LogSink))
            .build()
            .await,
    );

    // Typed rule: a short burst per crawler identity plus an hourly budget.
    limiter.register_rules(
        "books.example",
        RateLimitRule::new(
            Algorithm::TokenBucket,
            vec![Tier::new("per-ip", 5, 1_000)?, Tier::new("per-credential", 200, 3_600_000)?],
        )?,
    )?;

    // The same shape, loaded from JSON configuration.
    let rule: RuleConfig = serde_json::from_str(
        r#"{
            "algorithm": "sliding-window-counter",
            "tiers": [{ "name": "per-ip", "maxRequests": 3, "windowMs": 2000 }]
        }"#,
    )?;
    limiter.register_rules("games.example", rule)?;

    let fetch = tower::service_fn(|url: String| async move {
        Ok::<_, std::io::Error>(format!("200 OK {url}"))
    });
    let crawler = RateLimitLayer::new(limiter.clone(), |url: &String| {
        let host = url.split('/').nth(2).unwrap_or_default().to_string();
        ("crawler-7".to_string(), host)
    })
    .with_pacing(Duration::from_millis(20))
    .layer(fetch);

    for shop in ["books.example", "games.example"] {
        println!("Crawling {shop}:");
        for page in 1..=6 {
            let url = format!("https://{shop}/p/{page}");
            match crawler.clone().oneshot(url.clone()).await {
                Ok(body) => println!("  {body}"),
                Err(err) if err.is_rate_limited() => {
                    println!("  {url}: rate limited, retry in {:?}", err.retry_after().unwrap_or_default());
                }
                Err(err) => println!("  {url}: {err}"),
            }
        }
        println!();
    }

    let decision = limiter.check_limit("crawler-7", "games.example").await;
    println!("Headers for the next games.example request:");
    for (name, value) in limiter.rate_limit_headers(&decision) {
        println!("  {name}: {value}");
    }

    limiter.close().await;

    println!("\nLimiter events:");
    for event in events.events() {
        println!("  - {event}");
    }
    Ok(())
}
