use opentelemetry::otel_warn;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable carrying the sampler argument, as comma separated
/// `key=value` pairs. Recognized keys are `endpoint` and `polling_interval`
/// (in seconds).
pub(crate) const OTEL_TRACES_SAMPLER_ARG: &str = "OTEL_TRACES_SAMPLER_ARG";
/// Default endpoint of the sampling service, the X-Ray proxy of a local
/// collector.
pub(crate) const XRAY_SAMPLER_ENDPOINT_DEFAULT: &str = "http://localhost:2000";
/// Default interval between two rules fetches, in seconds.
pub(crate) const XRAY_SAMPLER_POLLING_INTERVAL_DEFAULT: u64 = 300;

const ENDPOINT_ARG: &str = "endpoint";
const POLLING_INTERVAL_ARG: &str = "polling_interval";

/// Configuration of the remote sampler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XraySamplerConfig {
    pub(crate) endpoint: String,
    pub(crate) polling_interval: Duration,
}

impl Default for XraySamplerConfig {
    fn default() -> Self {
        XraySamplerConfigBuilder::default().build()
    }
}

impl XraySamplerConfig {
    /// Base URL of the sampling service.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Interval between two rules fetches.
    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }
}

/// A builder for creating [`XraySamplerConfig`] instances.
#[derive(Debug)]
pub struct XraySamplerConfigBuilder {
    endpoint: String,
    polling_interval: Duration,
}

impl Default for XraySamplerConfigBuilder {
    /// Create a new [`XraySamplerConfigBuilder`] with default values,
    /// overridden by `OTEL_TRACES_SAMPLER_ARG` when it is set, for example
    /// `OTEL_TRACES_SAMPLER_ARG="endpoint=http://localhost:2000,polling_interval=60"`.
    fn default() -> Self {
        XraySamplerConfigBuilder {
            endpoint: XRAY_SAMPLER_ENDPOINT_DEFAULT.to_string(),
            polling_interval: Duration::from_secs(XRAY_SAMPLER_POLLING_INTERVAL_DEFAULT),
        }
        .init_from_env_vars()
    }
}

impl From<XraySamplerConfig> for XraySamplerConfigBuilder {
    fn from(config: XraySamplerConfig) -> Self {
        XraySamplerConfigBuilder {
            endpoint: config.endpoint,
            polling_interval: config.polling_interval,
        }
    }
}

impl XraySamplerConfigBuilder {
    /// Set the base URL of the sampling service.
    ///
    /// The rules and targets endpoints are resolved against it.
    pub fn with_endpoint<T: Into<String>>(mut self, endpoint: T) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the interval between two rules fetches. A random jitter of up to
    /// five seconds is added to every wait.
    ///
    /// A zero interval is replaced by the default one.
    pub fn with_polling_interval(mut self, polling_interval: Duration) -> Self {
        self.polling_interval = polling_interval;
        self
    }

    /// Builds an `XraySamplerConfig`.
    pub fn build(self) -> XraySamplerConfig {
        let polling_interval = if self.polling_interval.is_zero() {
            otel_warn!(
                name: "XrayRemoteSampler.ZeroPollingInterval",
                message = "Polling interval must be positive, using the default interval instead",
                default_secs = XRAY_SAMPLER_POLLING_INTERVAL_DEFAULT
            );
            Duration::from_secs(XRAY_SAMPLER_POLLING_INTERVAL_DEFAULT)
        } else {
            self.polling_interval
        };

        XraySamplerConfig {
            endpoint: self.endpoint,
            polling_interval,
        }
    }

    fn init_from_env_vars(mut self) -> Self {
        let Ok(arg) = env::var(OTEL_TRACES_SAMPLER_ARG) else {
            return self;
        };

        for (key, value) in arg
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .map(|(key, value)| (key.trim(), value.trim()))
        {
            match key {
                ENDPOINT_ARG if !value.is_empty() => self.endpoint = value.to_string(),
                POLLING_INTERVAL_ARG => {
                    if let Ok(secs) = u64::from_str(value) {
                        self.polling_interval = Duration::from_secs(secs);
                    }
                }
                _ => {}
            }
        }
        self
    }
}
