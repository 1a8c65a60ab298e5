use crate::client::{HttpSamplingClient, SamplingClient};
use crate::clock::{Clock, SystemClock};
use crate::config::{XraySamplerConfig, XraySamplerConfigBuilder};
use crate::error::XraySamplerError;
use crate::fallback::FallbackSampler;
use crate::poller::{spawn_pollers, PollerContext};
use crate::rule_cache::RuleCache;
use opentelemetry::trace::{Link, SamplingResult, SpanKind, TraceId};
use opentelemetry::{otel_debug, Context, KeyValue};
use opentelemetry_http::HttpClient;
use opentelemetry_sdk::trace::{Sampler, ShouldSample};
use opentelemetry_sdk::Resource;
use rand::rngs::OsRng;
use rand::TryRngCore;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;

/// Identifier of one sampler instance in the statistics it reports.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// Generates a random id of 24 hexadecimal digits.
    pub fn generate() -> Result<Self, XraySamplerError> {
        let mut bytes = [0u8; 12];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|err| XraySamplerError::ClientIdGeneration(err.to_string()))?;
        Ok(ClientId(const_hex::encode(bytes)))
    }

    /// The id as sent to the sampling service.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rule based sampling engine, without parent-based handling.
///
/// Every call is matched against the cached rules and counted in the
/// statistics of the matched rule. Until the first rules arrive, or once
/// they are more than an hour old, decisions come from a
/// [`FallbackSampler`] and are not counted.
///
/// Clones share the same rules. The pollers feeding them stop when the last
/// clone is dropped.
#[derive(Clone, Debug)]
pub struct RulesSampler {
    cache: Arc<RuleCache>,
    fallback: FallbackSampler,
    client_id: ClientId,
    _shutdown: Arc<watch::Sender<()>>,
}

impl RulesSampler {
    /// Identifier reported along with this sampler's statistics.
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }
}

impl ShouldSample for RulesSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        if !self.cache.is_expired() {
            if let Some(applier) = self.cache.matched_rule(attributes) {
                return applier.should_sample(parent_context, trace_id, self.cache.now_millis());
            }
        }
        self.fallback
            .should_sample(parent_context, trace_id, name, span_kind, attributes, links)
    }
}

/// Sampler driven by the AWS X-Ray sampling rules.
///
/// Spans with a parent follow the parent's decision; root spans are decided
/// by a [`RulesSampler`].
#[derive(Clone, Debug)]
pub struct XrayRemoteSampler {
    inner: Sampler,
    rules: RulesSampler,
    config: XraySamplerConfig,
}

impl XrayRemoteSampler {
    /// Starts configuring a sampler for a service described by `resource`.
    pub fn builder(resource: Resource) -> XrayRemoteSamplerBuilder {
        XrayRemoteSamplerBuilder {
            resource,
            config: XraySamplerConfigBuilder::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// The engine deciding root spans.
    pub fn rules_sampler(&self) -> &RulesSampler {
        &self.rules
    }

    /// Configuration the sampler was built with.
    pub fn config(&self) -> &XraySamplerConfig {
        &self.config
    }
}

impl ShouldSample for XrayRemoteSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        self.inner
            .should_sample(parent_context, trace_id, name, span_kind, attributes, links)
    }
}

impl fmt::Display for XrayRemoteSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "XrayRemoteSampler{{endpoint={}, polling_interval={}s}}",
            self.config.endpoint(),
            self.config.polling_interval().as_secs()
        )
    }
}

/// Builder of [`XrayRemoteSampler`].
#[derive(Debug)]
pub struct XrayRemoteSamplerBuilder {
    resource: Resource,
    config: XraySamplerConfigBuilder,
    clock: Arc<dyn Clock>,
}

impl XrayRemoteSamplerBuilder {
    /// Base URL of the sampling service. Defaults to
    /// `http://localhost:2000`.
    pub fn with_endpoint<T: Into<String>>(mut self, endpoint: T) -> Self {
        self.config = self.config.with_endpoint(endpoint);
        self
    }

    /// Interval between two rules fetches. Defaults to five minutes.
    pub fn with_polling_interval(mut self, polling_interval: Duration) -> Self {
        self.config = self.config.with_polling_interval(polling_interval);
        self
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: XraySamplerConfig) -> Self {
        self.config = config.into();
        self
    }

    /// Time source for reservoirs and rule expiry.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Builds the sampler talking to the configured endpoint through
    /// `http_client`, and starts its pollers on the current Tokio runtime.
    pub fn build<C: HttpClient + 'static>(
        self,
        http_client: C,
    ) -> Result<XrayRemoteSampler, XraySamplerError> {
        let config = self.config.build();
        let client = HttpSamplingClient::new(http_client, config.endpoint())?;
        start(self.resource, config, self.clock, client)
    }

    /// Builds the sampler on top of a custom [`SamplingClient`], and starts
    /// its pollers on the current Tokio runtime. The configured endpoint is
    /// only used for display.
    pub fn build_with_client<T: SamplingClient + 'static>(
        self,
        client: T,
    ) -> Result<XrayRemoteSampler, XraySamplerError> {
        start(self.resource, self.config.build(), self.clock, client)
    }
}

fn start<T: SamplingClient + 'static>(
    resource: Resource,
    config: XraySamplerConfig,
    clock: Arc<dyn Clock>,
    client: T,
) -> Result<XrayRemoteSampler, XraySamplerError> {
    let handle = Handle::try_current().map_err(|_| XraySamplerError::NoRuntime)?;
    let client_id = ClientId::generate()?;

    let cache = Arc::new(RuleCache::new(&resource, clock.clone()));
    let (shutdown, shutdown_receiver) = watch::channel(());
    let context = Arc::new(PollerContext::new(
        cache.clone(),
        Arc::new(client),
        client_id.to_string(),
    ));
    spawn_pollers(
        &handle,
        context,
        config.polling_interval(),
        shutdown_receiver,
    );
    otel_debug!(
        name: "XrayRemoteSampler.Started",
        endpoint = config.endpoint(),
        polling_interval_secs = config.polling_interval().as_secs(),
        client_id = client_id.as_str()
    );

    let rules = RulesSampler {
        cache,
        fallback: FallbackSampler::with_clock(clock),
        client_id,
        _shutdown: Arc::new(shutdown),
    };
    Ok(XrayRemoteSampler {
        inner: Sampler::ParentBased(Box::new(rules.clone())),
        rules,
        config,
    })
}
