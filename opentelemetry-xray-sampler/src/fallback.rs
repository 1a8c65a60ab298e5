use crate::clock::{Clock, SystemClock};
use crate::rate_limit::{parent_trace_state, RateLimitingSampler};
use opentelemetry::trace::{Link, SamplingDecision, SamplingResult, SpanKind, TraceId};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::{Sampler, ShouldSample};
use std::sync::Arc;

const FALLBACK_PER_SECOND: u32 = 1;
const FALLBACK_FIXED_RATE: f64 = 0.05;

/// Sampler used while no usable rules are available.
///
/// Samples the first trace of every second and 5% of the remaining ones,
/// which matches the default rule of the X-Ray sampling service.
#[derive(Clone, Debug)]
pub struct FallbackSampler {
    rate_limiter: RateLimitingSampler,
    fixed_rate: Sampler,
}

impl Default for FallbackSampler {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl FallbackSampler {
    /// Creates a fallback sampler whose one-per-second budget follows `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        FallbackSampler {
            rate_limiter: RateLimitingSampler::with_clock(FALLBACK_PER_SECOND, clock),
            fixed_rate: Sampler::TraceIdRatioBased(FALLBACK_FIXED_RATE),
        }
    }
}

impl ShouldSample for FallbackSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        if self.rate_limiter.allows() {
            return SamplingResult {
                decision: SamplingDecision::RecordAndSample,
                attributes: Vec::new(),
                trace_state: parent_trace_state(parent_context),
            };
        }
        self.fixed_rate
            .should_sample(parent_context, trace_id, name, span_kind, attributes, links)
    }
}
