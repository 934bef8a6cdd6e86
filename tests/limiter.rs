//! Integration tests for per-key admission.

use fetch_throttle::infrastructure::mocks::MockClock;
use fetch_throttle::{
    composite_key, ConfigError, KeyedLimiter, LimiterConfig, RateLimiter, ShardedStorage,
    TokenBucket,
};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn limiter_with_clock(rate: f64, burst: u32, expiration: Duration) -> (RateLimiter, Arc<MockClock>) {
    let clock = Arc::new(MockClock::starting_now());
    let config = LimiterConfig::new(rate, burst, expiration).unwrap();
    let limiter = RateLimiter::with_clock(config, clock.clone()).unwrap();
    (limiter, clock)
}

#[test]
fn test_concurrent_burst_admits_exactly_burst() {
    let (limiter, _clock) = limiter_with_clock(5.0, 10, Duration::from_secs(60));
    let barrier = Arc::new(Barrier::new(15));

    let handles: Vec<_> = (0..15)
        .map(|_| {
            let limiter = limiter.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                limiter.allow("198.51.100.4")
            })
        })
        .collect();

    let admitted = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|admitted| *admitted)
        .count();

    assert_eq!(admitted, 10);
    let stats = limiter.stats("198.51.100.4").unwrap();
    assert_eq!(stats.total_requests, 10);
    assert_eq!(stats.rejected_requests, 5);
    assert_eq!(stats.tokens_remaining, 0.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_burst_from_tasks() {
    let (limiter, _clock) = limiter_with_clock(5.0, 10, Duration::from_secs(60));

    let handles: Vec<_> = (0..15)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.allow("client") })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 10);
}

#[test]
fn test_sequential_exhaustion() {
    let (limiter, _clock) = limiter_with_clock(5.0, 5, Duration::from_secs(60));

    for i in 0..5 {
        assert!(limiter.allow("seq"), "request {} should be admitted", i + 1);
    }
    assert!(!limiter.allow("seq"), "6th request should be denied");
}

#[test]
fn test_refill_after_one_second() {
    let (limiter, clock) = limiter_with_clock(5.0, 5, Duration::from_secs(60));

    for _ in 0..5 {
        limiter.allow("refill");
    }
    assert!(!limiter.allow("refill"));

    clock.advance(Duration::from_secs(1));
    for i in 0..5 {
        assert!(limiter.allow("refill"), "refilled token {} missing", i + 1);
    }
    assert!(!limiter.allow("refill"));
}

#[test]
fn test_partial_refill() {
    let (limiter, clock) = limiter_with_clock(2.0, 4, Duration::from_secs(60));

    for _ in 0..4 {
        limiter.allow("partial");
    }
    clock.advance(Duration::from_millis(500));
    assert!(limiter.allow("partial"));
    assert!(!limiter.allow("partial"));
}

#[test]
fn test_eviction_resets_to_full_burst() {
    let (limiter, clock) = limiter_with_clock(0.001, 3, Duration::from_secs(60));

    for _ in 0..3 {
        assert!(limiter.allow("sleepy"));
    }
    assert!(!limiter.allow("sleepy"));

    clock.advance(Duration::from_secs(61));
    assert_eq!(limiter.sweep(), 1);
    assert_eq!(limiter.stats("sleepy"), None);
    assert_eq!(limiter.metrics().evicted(), 1);

    for _ in 0..3 {
        assert!(limiter.allow("sleepy"));
    }
}

#[test]
fn test_active_keys_survive_sweep() {
    let (limiter, clock) = limiter_with_clock(1.0, 1, Duration::from_secs(60));

    limiter.allow("busy");
    limiter.allow("idle");
    for _ in 0..4 {
        clock.advance(Duration::from_secs(20));
        // Denied checks still count as activity
        limiter.allow("busy");
    }

    assert_eq!(limiter.sweep(), 1);
    assert!(limiter.stats("busy").is_some());
    assert!(limiter.stats("idle").is_none());
}

#[test]
fn test_stats_are_idempotent() {
    let (limiter, clock) = limiter_with_clock(5.0, 5, Duration::from_secs(60));
    limiter.allow("observed");
    limiter.allow("observed");

    let first = limiter.stats("observed").unwrap();
    clock.advance(Duration::from_secs(10));
    let second = limiter.stats("observed").unwrap();

    assert_eq!(first, second);
    assert_eq!(first.tokens_remaining, 3.0);
    assert_eq!(first.total_requests, 2);
}

#[test]
fn test_zero_burst_denies_everything() {
    let (limiter, clock) = limiter_with_clock(100.0, 0, Duration::from_secs(60));

    assert!(!limiter.allow("blocked"));
    clock.advance(Duration::from_secs(30));
    assert!(!limiter.allow("blocked"));
    assert_eq!(limiter.metrics().allowed(), 0);
}

#[test]
fn test_invalid_configs_rejected() {
    assert_eq!(
        LimiterConfig::new(-1.0, 5, Duration::from_secs(1)).unwrap_err(),
        ConfigError::InvalidRate(-1.0)
    );
    assert_eq!(
        LimiterConfig::new(1.0, 5, Duration::ZERO).unwrap_err(),
        ConfigError::ZeroExpiration
    );

    let hand_built = LimiterConfig {
        expiration: Duration::ZERO,
        ..LimiterConfig::default()
    };
    assert!(RateLimiter::new(hand_built).is_err());

    let forever = LimiterConfig {
        expiration: Duration::MAX,
        ..LimiterConfig::default()
    };
    assert!(matches!(
        RateLimiter::new(forever),
        Err(ConfigError::ExpirationTooLong { .. })
    ));
}

#[test]
fn test_tiny_rate_wait_saturates() {
    let (limiter, _clock) = limiter_with_clock(1e-300, 1, Duration::from_secs(60));

    assert!(limiter.allow("k"));
    assert!(!limiter.allow("k"));
    assert_eq!(limiter.time_until_allowed("k"), Some(Duration::MAX));
}

#[test]
fn test_profiles_share_storage_without_collisions() {
    let clock = Arc::new(MockClock::starting_now());
    let storage: Arc<ShardedStorage<String, TokenBucket>> = Arc::new(ShardedStorage::new());
    let ip = RateLimiter::with_storage(LimiterConfig::ip(), storage.clone(), clock.clone()).unwrap();
    let sector =
        RateLimiter::with_storage(LimiterConfig::sector_api(), storage.clone(), clock).unwrap();

    let key = composite_key("192.0.2.9", "");
    for _ in 0..5 {
        assert!(sector.allow(&key));
    }
    assert!(!sector.allow(&key));

    // The ip profile tracks the same string separately
    assert!(ip.allow(&key));
    assert_eq!(ip.stats(&key).unwrap().tokens_remaining, 9.0);
}

#[test]
fn test_keyed_limiter_uses_key_function() {
    #[derive(Debug)]
    struct ApiRequest {
        api_key: Option<&'static str>,
        remote_addr: &'static str,
    }

    let (limiter, _clock) = limiter_with_clock(1.0, 2, Duration::from_secs(60));
    let keyed = KeyedLimiter::new(limiter, |request: &ApiRequest| {
        request
            .api_key
            .unwrap_or(request.remote_addr)
            .to_string()
    });

    let with_key = ApiRequest {
        api_key: Some("key-123"),
        remote_addr: "10.0.0.1",
    };
    let anonymous = ApiRequest {
        api_key: None,
        remote_addr: "10.0.0.1",
    };

    assert!(keyed.allow_request(&with_key));
    assert!(keyed.allow_request(&with_key));
    assert!(!keyed.allow_request(&with_key));

    // Falls back to the address, which has its own bucket
    assert!(keyed.allow_request(&anonymous));
    assert_eq!(keyed.stats_for(&anonymous).unwrap().total_requests, 1);
    assert_eq!(keyed.limiter().tracker_count(), 2);
}
