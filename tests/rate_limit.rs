//! Per-client rate limiting at the HTTP boundary.

use serde_json::Value;

mod common;

#[tokio::test]
async fn test_sixth_request_is_rejected() {
    let mut config = common::in_memory_config();
    config.rate_limit.max_requests = 5;
    config.rate_limit.window_secs = 60;
    let gateway = common::spawn_gateway(config).await;
    let client = common::client();

    for i in 0..5 {
        let res = client.get(gateway.url("/api/inventory")).send().await.unwrap();
        assert_eq!(res.status(), 200, "request {} should pass", i + 1);
        let remaining: u32 = res.headers()["x-ratelimit-remaining"].to_str().unwrap().parse().unwrap();
        assert_eq!(remaining, 4 - i);
    }

    let res = client.get(gateway.url("/api/inventory")).send().await.unwrap();
    assert_eq!(res.status(), 429);
    let retry_after: u64 = res.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!(retry_after > 0 && retry_after <= 60);
    let body: Value = res.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("Too many requests"));
}

#[tokio::test]
async fn test_disabling_via_reload_lifts_the_limit() {
    let mut config = common::in_memory_config();
    config.rate_limit.max_requests = 1;
    let gateway = common::spawn_gateway(config.clone()).await;
    let client = common::client();

    assert_eq!(client.get(gateway.url("/health")).send().await.unwrap().status(), 200);
    assert_eq!(client.get(gateway.url("/health")).send().await.unwrap().status(), 429);

    config.rate_limit.enabled = false;
    gateway.config_tx.send(config).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert_eq!(client.get(gateway.url("/health")).send().await.unwrap().status(), 200);
}
