//! Property-based tests for the backoff policy

use proptest::prelude::*;
use std::time::Duration;
use tidewatch::{BackoffPolicy, FixedJitter, RandomJitter};

fn policy(base_ms: u64, cap_ms: u64) -> BackoffPolicy {
    BackoffPolicy::new(Duration::from_millis(base_ms), Duration::from_millis(cap_ms))
}

proptest! {
    #[test]
    fn prop_interval_within_bounds(
        base_ms in 1u64..10_000,
        extra_ms in 0u64..100_000,
        errors in 1u32..64,
        jitter in 0.85f64..=1.15,
    ) {
        let cap_ms = base_ms + extra_ms;
        let p = policy(base_ms, cap_ms);

        let d = p.next_interval(errors, &FixedJitter(jitter));

        prop_assert!(d >= Duration::from_millis(base_ms));
        prop_assert!(d <= Duration::from_millis(cap_ms));
    }

    #[test]
    fn prop_random_jitter_within_bounds(
        base_ms in 1u64..10_000,
        extra_ms in 0u64..100_000,
        errors in 1u32..64,
    ) {
        let cap_ms = base_ms + extra_ms;
        let d = policy(base_ms, cap_ms).next_interval(errors, &RandomJitter);

        prop_assert!(d >= Duration::from_millis(base_ms));
        prop_assert!(d <= Duration::from_millis(cap_ms));
    }

    #[test]
    fn prop_non_decreasing_without_jitter(
        base_ms in 1u64..10_000,
        extra_ms in 0u64..100_000,
        errors in 1u32..63,
    ) {
        let p = policy(base_ms, base_ms + extra_ms);

        let now = p.next_interval(errors, &FixedJitter::NONE);
        let next = p.next_interval(errors + 1, &FixedJitter::NONE);

        prop_assert!(next >= now);
    }

    #[test]
    fn prop_saturates_at_cap_or_ten_times_base(
        base_ms in 1u64..10_000,
        extra_ms in 0u64..100_000,
        errors in 5u32..1_000,
    ) {
        let cap_ms = base_ms + extra_ms;
        let d = policy(base_ms, cap_ms).next_interval(errors, &FixedJitter::NONE);

        prop_assert_eq!(d, Duration::from_millis((base_ms * 10).min(cap_ms)));
    }

    #[test]
    fn prop_disabled_backoff_is_constant(
        base_ms in 1u64..10_000,
        errors in 0u32..1_000,
        jitter in 0.85f64..=1.15,
    ) {
        let p = policy(base_ms, base_ms * 20).with_exponential(false);

        prop_assert_eq!(
            p.next_interval(errors, &FixedJitter(jitter)),
            Duration::from_millis(base_ms)
        );
    }
}
