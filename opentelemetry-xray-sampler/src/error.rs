use thiserror::Error;

/// Errors raised while building the sampler or talking to the sampling
/// service.
///
/// None of these ever reach a sampling decision: failures in the background
/// pollers are logged and the last known rules stay in use.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum XraySamplerError {
    /// The request to the sampling service could not be completed.
    #[error("sampling service request failed: {0}")]
    Transport(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// The sampling service answered with a non-success status code.
    #[error("sampling service responded with status {0}")]
    UnexpectedStatus(u16),

    /// The request body could not be serialized.
    #[error("failed to encode sampling service request: {0}")]
    Encode(serde_json::Error),

    /// The response body was not a valid sampling API document.
    #[error("failed to decode sampling service response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The configured endpoint cannot be turned into a request URI.
    #[error("invalid sampling endpoint: {0}")]
    InvalidEndpoint(String),

    /// No random source was available to generate the client id.
    #[error("failed to generate sampler client id: {0}")]
    ClientIdGeneration(String),

    /// The pollers need a Tokio runtime and none is running.
    #[error("the remote sampler must be built within a Tokio runtime")]
    NoRuntime,
}

impl From<http::Error> for XraySamplerError {
    fn from(err: http::Error) -> Self {
        XraySamplerError::Transport(Box::new(err))
    }
}
