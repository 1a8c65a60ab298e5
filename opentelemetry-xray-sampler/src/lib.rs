//! # OpenTelemetry AWS X-Ray Remote Sampler
//!
//! This crate provides a [`ShouldSample`] implementation whose sampling
//! behaviour is administered centrally through the [AWS X-Ray sampling API],
//! usually reached through a local collector proxy.
//!
//! Instead of one global probability, the sampler works from a set of
//! *sampling rules*. Every rule carries a priority, a predicate over span
//! attributes and resource attributes, a *reservoir* (a fixed number of
//! traces per second) and a *fixed rate* applied once the reservoir for the
//! current second is exhausted. Reservoir quotas are recomputed by the remote
//! service from the statistics every client reports, so the aggregate volume
//! of sampled traces stays within the configured targets regardless of how
//! many instances of a service are running.
//!
//! Two background pollers keep the local state synchronized:
//!
//! * the rules poller fetches the full rule set (every 5 minutes by default)
//!   and merges it into the local cache, keeping live state for rules that
//!   did not change;
//! * the targets poller reports per-rule statistics and downloads updated
//!   quotas (every 10 seconds by default, or as instructed by the service).
//!
//! Sampling decisions never wait on the network. When no rule is known, or
//! the rules have not been refreshed for an hour, decisions are delegated to
//! a fallback sampler that samples one trace per second plus 5% of the rest.
//!
//! ### Quick start
//! ```no_run
//! use opentelemetry_sdk::trace::SdkTracerProvider;
//! use opentelemetry_sdk::Resource;
//! use opentelemetry_xray_sampler::XrayRemoteSampler;
//!
//! # use opentelemetry_http::HttpClient;
//! # use std::error::Error;
//! # async fn run(http_client: impl HttpClient + 'static) -> Result<(), Box<dyn Error>> {
//! let resource = Resource::builder().with_service_name("checkout").build();
//!
//! let sampler = XrayRemoteSampler::builder(resource.clone())
//!     .with_endpoint("http://localhost:2000")
//!     .build(http_client)?;
//!
//! let provider = SdkTracerProvider::builder()
//!     .with_sampler(sampler)
//!     .with_resource(resource)
//!     .build();
//! # drop(provider);
//! # Ok(())
//! # }
//! ```
//!
//! [AWS X-Ray sampling API]: https://docs.aws.amazon.com/xray/latest/devguide/xray-console-sampling.html
//! [`ShouldSample`]: opentelemetry_sdk::trace::ShouldSample
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]
#![cfg_attr(test, deny(warnings))]

mod client;
mod clock;
mod config;
mod error;
mod fallback;
mod matcher;
mod poller;
mod rate_limit;
mod remote;
mod reservoir;
mod rule_applier;
mod rule_cache;
mod sampler;
mod statistics;

pub use client::{HttpSamplingClient, SamplingClient};
#[cfg(any(test, feature = "testing"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub use clock::MockClock;
pub use clock::{Clock, SystemClock};
pub use config::{XraySamplerConfig, XraySamplerConfigBuilder};
pub use error::XraySamplerError;
pub use fallback::FallbackSampler;
pub use matcher::{attribute_match, wildcard_match};
pub use rate_limit::RateLimitingSampler;
pub use remote::{
    SamplingRule, SamplingStatisticsDocument, SamplingTarget, SamplingTargetsResponse,
};
pub use sampler::{ClientId, RulesSampler, XrayRemoteSampler, XrayRemoteSamplerBuilder};
