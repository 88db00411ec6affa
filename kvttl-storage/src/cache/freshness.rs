//! Freshness evaluation for a cache entry.
//!
//! An entry is stale once the time elapsed since its value was established
//! meets or exceeds its effective TTL. A zero TTL is therefore always stale.

use std::time::Duration;

/// Outcome of checking an entry's age against its TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The value may be served without touching the store.
    Fresh {
        /// Time left before the value turns stale.
        remaining: Duration,
    },

    /// The value is due for a refresh.
    Stale {
        /// How far past its TTL the value is.
        overdue: Duration,
    },
}

impl Freshness {
    /// Compare `elapsed` against `ttl`.
    pub fn evaluate(elapsed: Duration, ttl: Duration) -> Self {
        if elapsed >= ttl {
            Self::Stale {
                overdue: elapsed - ttl,
            }
        } else {
            Self::Fresh {
                remaining: ttl - elapsed,
            }
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh { .. })
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

/// Effective TTL: the override if one is set, the fallback otherwise.
pub fn effective_ttl(expire_in: Option<Duration>, fallback: Duration) -> Duration {
    expire_in.unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fresh_before_ttl() {
        let f = Freshness::evaluate(Duration::from_millis(40), Duration::from_millis(100));
        assert_eq!(
            f,
            Freshness::Fresh {
                remaining: Duration::from_millis(60)
            }
        );
        assert!(f.is_fresh());
        assert!(!f.is_stale());
    }

    #[test]
    fn test_stale_exactly_at_ttl() {
        let f = Freshness::evaluate(Duration::from_millis(100), Duration::from_millis(100));
        assert_eq!(
            f,
            Freshness::Stale {
                overdue: Duration::ZERO
            }
        );
    }

    #[test]
    fn test_zero_ttl_is_always_stale() {
        assert!(Freshness::evaluate(Duration::ZERO, Duration::ZERO).is_stale());
    }

    #[test]
    fn test_effective_ttl_prefers_override() {
        let fallback = Duration::from_millis(2500);
        assert_eq!(effective_ttl(None, fallback), fallback);
        assert_eq!(
            effective_ttl(Some(Duration::from_millis(5)), fallback),
            Duration::from_millis(5)
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Property: fresh and stale partition the timeline at the TTL.
        #[test]
        fn prop_staleness_boundary(elapsed in 0u64..10_000, ttl in 0u64..10_000) {
            let f = Freshness::evaluate(Duration::from_millis(elapsed), Duration::from_millis(ttl));
            prop_assert_eq!(f.is_stale(), elapsed >= ttl);
        }
    }
}
