use crate::clock::{Clock, SystemClock};
use opentelemetry::trace::{
    Link, SamplingDecision, SamplingResult, SpanKind, TraceContextExt, TraceId, TraceState,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::ShouldSample;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const COUNT_BITS: u32 = 32;
const COUNT_MASK: u64 = (1 << COUNT_BITS) - 1;

// Hard per-second counting window. The current second and the number of
// grants made in it share one atomic word so that a rollover and the first
// grant of the new second are a single transition.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    per_second: u32,
    window: AtomicU64,
}

impl RateLimiter {
    pub(crate) fn new(per_second: u32) -> Self {
        RateLimiter {
            per_second,
            window: AtomicU64::new(0),
        }
    }

    pub(crate) fn per_second(&self) -> u32 {
        self.per_second
    }

    /// Takes one grant from the window containing `now_millis`.
    pub(crate) fn try_acquire(&self, now_millis: u64) -> bool {
        if self.per_second == 0 {
            return false;
        }
        let second = (now_millis / 1000) & COUNT_MASK;
        let mut current = self.window.load(Ordering::Acquire);
        loop {
            let window_second = current >> COUNT_BITS;
            let count = current & COUNT_MASK;
            let next = if window_second != second {
                // a rewound clock also starts a fresh window
                (second << COUNT_BITS) | 1
            } else if count < u64::from(self.per_second) {
                current + 1
            } else {
                return false;
            };
            match self.window.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Samples at most a fixed number of traces per wall-clock second.
///
/// The budget is a hard window: it refills completely when the second
/// changes and unused grants are not carried over.
#[derive(Clone, Debug)]
pub struct RateLimitingSampler {
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
}

impl RateLimitingSampler {
    /// Creates a sampler granting `per_second` samples each second.
    pub fn new(per_second: u32) -> Self {
        Self::with_clock(per_second, Arc::new(SystemClock))
    }

    /// Creates a sampler reading time from `clock`.
    pub fn with_clock(per_second: u32, clock: Arc<dyn Clock>) -> Self {
        RateLimitingSampler {
            limiter: Arc::new(RateLimiter::new(per_second)),
            clock,
        }
    }

    pub(crate) fn allows(&self) -> bool {
        self.limiter.try_acquire(self.clock.now_millis())
    }
}

impl ShouldSample for RateLimitingSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        _trace_id: TraceId,
        _name: &str,
        _span_kind: &SpanKind,
        _attributes: &[KeyValue],
        _links: &[Link],
    ) -> SamplingResult {
        let decision = if self.allows() {
            SamplingDecision::RecordAndSample
        } else {
            SamplingDecision::Drop
        };
        SamplingResult {
            decision,
            attributes: Vec::new(),
            trace_state: parent_trace_state(parent_context),
        }
    }
}

pub(crate) fn parent_trace_state(parent_context: Option<&Context>) -> TraceState {
    match parent_context {
        Some(ctx) => ctx.span().span_context().trace_state().clone(),
        None => TraceState::default(),
    }
}
