use crate::rate_limit::RateLimiter;

/// Outcome of asking a reservoir for a sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReservoirDecision {
    /// Granted before any quota was assigned.
    Borrow,
    /// Granted from an assigned quota.
    Take,
    /// Nothing left for this second, or no reservoir at all.
    NoTake,
}

/// Per-rule reservoir.
///
/// Until the sampling service assigns a quota, a rule with a non-zero
/// reservoir size may borrow one sample per second. Once a target is
/// applied, only the assigned quota is used, and only until its TTL passes.
#[derive(Debug)]
pub(crate) enum Reservoir {
    Borrowing(RateLimiter),
    Quota {
        limiter: RateLimiter,
        expires_at_millis: u64,
    },
    Disabled,
}

impl Reservoir {
    pub(crate) fn for_rule(reservoir_size: i64) -> Self {
        if reservoir_size > 0 {
            Reservoir::Borrowing(RateLimiter::new(1))
        } else {
            Reservoir::Disabled
        }
    }

    /// Reservoir backed by an assigned quota. A missing TTL means the quota
    /// is already expired.
    pub(crate) fn with_quota(quota: Option<u32>, expires_at_millis: Option<u64>) -> Self {
        match (quota, expires_at_millis) {
            (Some(quota), Some(expires_at_millis)) if quota > 0 => Reservoir::Quota {
                limiter: RateLimiter::new(quota),
                expires_at_millis,
            },
            _ => Reservoir::Disabled,
        }
    }

    pub(crate) fn take(&self, now_millis: u64) -> ReservoirDecision {
        match self {
            Reservoir::Borrowing(limiter) if limiter.try_acquire(now_millis) => {
                ReservoirDecision::Borrow
            }
            Reservoir::Quota {
                limiter,
                expires_at_millis,
            } if now_millis < *expires_at_millis && limiter.try_acquire(now_millis) => {
                ReservoirDecision::Take
            }
            _ => ReservoirDecision::NoTake,
        }
    }

    pub(crate) fn quota(&self) -> Option<u32> {
        match self {
            Reservoir::Quota { limiter, .. } => Some(limiter.per_second()),
            _ => None,
        }
    }
}
