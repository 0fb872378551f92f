//! # Telemetry Core Live Test
//!
//! Exercises the Redis-backed store and quota limiter against a real Redis
//! instance (default `redis://127.0.0.1:6379`, override with `REDIS_URL`).
//! Run manually; each check prints PASS or FAIL and the process exits
//! non-zero on the first failure.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use lib_common::models::{MetricsEventType, TopologySnapshot, CHANNEL_TOPOLOGY};
use lib_common::quota::{QuotaError, QuotaLimiter};
use lib_common::stores::RedisStore;

fn check(label: &str, ok: bool) {
    if ok {
        println!("[PASS] {}", label);
    } else {
        eprintln!("[FAIL] {}", label);
        std::process::exit(1);
    }
}

fn sample_snapshot() -> TopologySnapshot {
    TopologySnapshot {
        timestamp: Utc::now(),
        network_id: Some("live-test".to_string()),
        nodes: Default::default(),
        gateways: vec![],
        connection_count: 0,
        total_nodes: 7,
        healthy_nodes: 7,
        degraded_nodes: 0,
        unhealthy_nodes: 0,
        unknown_nodes: 0,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    println!("[*] Using Redis at {}", url);

    let store = RedisStore::new(&url)?;
    check("store connects", store.connect().await);

    // --- Durable last snapshot round trip ---
    let snapshot = sample_snapshot();
    check("store_last_snapshot", store.store_last_snapshot(&snapshot).await);
    let restored = store.get_last_snapshot().await;
    check(
        "get_last_snapshot returns the stored snapshot",
        restored.as_ref().map(|s| s.timestamp) == Some(snapshot.timestamp)
            && restored.as_ref().and_then(|s| s.network_id.as_deref()) == Some("live-test"),
    );

    // --- Pub/sub round trip through the listener ---
    let received = Arc::new(Mutex::new(Vec::new()));
    let handler_received = Arc::clone(&received);
    store.add_handler(CHANNEL_TOPOLOGY, move |event| {
        handler_received.lock().unwrap().push(event.event_type);
        Ok(())
    });
    check("subscribe", store.subscribe(&[CHANNEL_TOPOLOGY]).await);

    check(
        "publish_topology_snapshot",
        store.publish_topology_snapshot(&snapshot).await,
    );
    tokio::time::sleep(Duration::from_millis(500)).await;
    check(
        "handler received the published event",
        received.lock().unwrap().contains(&MetricsEventType::FullSnapshot),
    );

    // --- Quota: N requests pass, request N+1 is rejected ---
    // Unique subject per run so reruns start from a clean counter.
    let subject = format!("live-test-{}", Utc::now().timestamp_millis());
    let limiter = QuotaLimiter::new(&url, "admin")?;

    let mut allowed = 0;
    for _ in 0..3 {
        if limiter.check_and_consume(&subject, "chat", 3, Some("member")).await.is_ok() {
            allowed += 1;
        }
    }
    check("quota allows the first N requests", allowed == 3);

    let rejected = limiter.check_and_consume(&subject, "chat", 3, Some("member")).await;
    let retry_after_plausible = match &rejected {
        Err(QuotaError::Exceeded { retry_after_seconds, .. }) => {
            (1..=86400).contains(retry_after_seconds)
        }
        _ => false,
    };
    check("request N+1 is rejected with a sane retry-after", retry_after_plausible);

    let status = limiter.status(&subject, "chat", 3, Some("member")).await?;
    check("status reads back the consumed counter", status.used == 4 && status.remaining == 0);

    let exempt_status = limiter.status(&subject, "chat", 3, Some("admin")).await?;
    check("exempt role reads unlimited status", exempt_status.is_exempt && exempt_status.limit == -1);

    store.disconnect().await;
    println!("\n[SUCCESS] All live checks passed.");
    Ok(())
}
