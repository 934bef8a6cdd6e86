//! Integration tests for the background eviction sweeper.

use fetch_throttle::{LimiterConfig, RateLimiter, StartError};
use std::time::Duration;

fn short_lived_limiter(expiration: Duration) -> RateLimiter {
    let config = LimiterConfig::new(10.0, 2, expiration).unwrap();
    RateLimiter::new(config).unwrap()
}

#[tokio::test]
async fn test_sweeper_evicts_idle_keys_in_real_time() {
    let limiter = short_lived_limiter(Duration::from_millis(50));
    limiter.start().unwrap();

    limiter.allow("a");
    limiter.allow("b");
    assert_eq!(limiter.tracker_count(), 2);

    // Idle for more than one window, then give the next sweep time to run
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(limiter.tracker_count(), 0);
    assert!(limiter.metrics().evicted() >= 2);

    limiter.stop().await.unwrap();
    assert!(!limiter.is_running());
}

#[tokio::test]
async fn test_double_start_is_rejected() {
    let limiter = short_lived_limiter(Duration::from_secs(60));

    limiter.start().unwrap();
    assert!(matches!(limiter.start(), Err(StartError::AlreadyRunning)));

    // A clone shares the same sweeper
    let clone = limiter.clone();
    assert!(clone.is_running());
    assert!(matches!(clone.start(), Err(StartError::AlreadyRunning)));

    clone.stop().await.unwrap();
    assert!(!limiter.is_running());
}

#[tokio::test]
async fn test_stop_without_start() {
    let limiter = short_lived_limiter(Duration::from_secs(60));
    limiter.stop().await.expect("stop on an idle limiter should succeed");
}

#[tokio::test]
async fn test_stopped_sweeper_no_longer_evicts() {
    let limiter = short_lived_limiter(Duration::from_millis(30));
    limiter.start().unwrap();
    limiter.stop().await.unwrap();

    limiter.allow("kept");
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(limiter.tracker_count(), 1);

    // Manual sweeps still work
    assert_eq!(limiter.sweep(), 1);
}
