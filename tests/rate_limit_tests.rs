use cmdgate::config::RateLimitSettings;
use cmdgate::error::LimiterError;
use cmdgate::rate_limit::{CommandLimiterRegistry, KeyedLimiter, LimitPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const MINUTE: Duration = Duration::from_secs(60);

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_requests_admit_exactly_remaining_slots() {
    const CALLERS: usize = 64;

    let limits = HashMap::from([("search".to_string(), 20)]);
    let registry = Arc::new(CommandLimiterRegistry::build(limits, 5, MINUTE).unwrap());
    let now = Instant::now();

    // Use 5 of the 20 slots up front, leaving 15 for the race
    for _ in 0..5 {
        assert!(registry.check("search", "10.0.0.1", now).allowed);
    }

    let tasks: Vec<_> = (0..CALLERS)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.check("search", "10.0.0.1", now).allowed })
        })
        .collect();

    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap() {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 15);
    assert!(!registry.check("search", "10.0.0.1", now).allowed);
}

#[test]
fn test_exactly_n_per_window_for_several_policies() {
    for max in [1u32, 2, 7, 50] {
        for window in [Duration::from_secs(1), MINUTE] {
            let limiter = KeyedLimiter::new(LimitPolicy::new("cmd", max, window).unwrap());
            let start = Instant::now();
            let step = window / (max * 2);

            for i in 0..max {
                assert!(limiter.admit("client", start + step * i));
            }
            assert!(!limiter.admit("client", start + step * max));
            assert!(limiter.admit("client", start + window));
        }
    }
}

#[test]
fn test_saturating_one_key_leaves_others_alone() {
    let limits = HashMap::from([("search".to_string(), 1), ("export".to_string(), 1)]);
    let registry = CommandLimiterRegistry::build(limits, 1, MINUTE).unwrap();
    let now = Instant::now();

    assert!(registry.check("search", "a", now).allowed);
    assert!(!registry.check("search", "a", now).allowed);

    // same command, other client
    assert!(registry.check("search", "b", now).allowed);
    // other command, same client
    assert!(registry.check("export", "a", now).allowed);
    // fallback command, same client
    assert!(registry.check("import", "a", now).allowed);
}

#[test]
fn test_registry_from_settings() {
    let settings = RateLimitSettings {
        default: 3,
        window_secs: 10,
        commands: HashMap::from([("search".to_string(), 1)]),
        ..RateLimitSettings::default()
    };

    let registry = CommandLimiterRegistry::from_config(&settings).unwrap();
    assert_eq!(registry.resolve("search").policy().max_requests(), 1);
    assert_eq!(registry.resolve("search").policy().window(), Duration::from_secs(10));
    assert_eq!(registry.fallback().policy().max_requests(), 3);
}

#[test]
fn test_zero_limit_reports_command() {
    let limits = HashMap::from([("search".to_string(), 2), ("bulk-export".to_string(), 0)]);

    match CommandLimiterRegistry::build(limits, 5, MINUTE) {
        Err(LimiterError::InvalidPolicy { command, reason }) => {
            assert_eq!(command, "bulk-export");
            assert!(reason.contains("> 0"));
        }
        other => panic!("expected invalid policy, got {:?}", other.map(|_| ())),
    }
}
