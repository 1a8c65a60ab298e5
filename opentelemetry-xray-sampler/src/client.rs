use crate::error::XraySamplerError;
use crate::remote::{
    GetSamplingRulesRequest, GetSamplingRulesResponse, GetSamplingTargetsRequest,
    GetSamplingTargetsResponse, SamplingRule, SamplingStatisticsDocument, SamplingTargetsResponse,
};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::Uri;
use opentelemetry::otel_debug;
use opentelemetry_http::HttpClient;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::str::FromStr;

const GET_SAMPLING_RULES_PATH: &str = "GetSamplingRules";
const GET_SAMPLING_TARGETS_PATH: &str = "SamplingTargets";

/// Client of the sampling service.
///
/// [`HttpSamplingClient`] talks to the X-Ray sampling API over HTTP; other
/// implementations can bring their own transport.
#[async_trait]
pub trait SamplingClient: Debug + Send + Sync {
    /// Fetches the complete set of sampling rules.
    ///
    /// Malformed rule records are left out of the result.
    async fn get_sampling_rules(&self) -> Result<Vec<SamplingRule>, XraySamplerError>;

    /// Reports rule statistics and fetches the resulting targets.
    async fn get_sampling_targets(
        &self,
        documents: Vec<SamplingStatisticsDocument>,
    ) -> Result<SamplingTargetsResponse, XraySamplerError>;
}

#[async_trait]
impl<T: SamplingClient + ?Sized> SamplingClient for std::sync::Arc<T> {
    async fn get_sampling_rules(&self) -> Result<Vec<SamplingRule>, XraySamplerError> {
        (**self).get_sampling_rules().await
    }

    async fn get_sampling_targets(
        &self,
        documents: Vec<SamplingStatisticsDocument>,
    ) -> Result<SamplingTargetsResponse, XraySamplerError> {
        (**self).get_sampling_targets(documents).await
    }
}

/// [`SamplingClient`] speaking the X-Ray sampling API over any
/// [`HttpClient`].
///
/// The endpoint is usually a local collector exposing the X-Ray proxy, which
/// signs and forwards the requests to AWS.
#[derive(Debug)]
pub struct HttpSamplingClient<C> {
    client: C,
    rules_uri: Uri,
    targets_uri: Uri,
}

impl<C: HttpClient> HttpSamplingClient<C> {
    /// Creates a client sending requests to `endpoint`.
    pub fn new(client: C, endpoint: &str) -> Result<Self, XraySamplerError> {
        let base = url::Url::parse(endpoint)
            .map_err(|err| XraySamplerError::InvalidEndpoint(format!("{endpoint}: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(XraySamplerError::InvalidEndpoint(endpoint.to_string()));
        }
        let base = base.as_str().trim_end_matches('/');
        let uri = |path: &str| {
            Uri::from_str(&format!("{base}/{path}"))
                .map_err(|err| XraySamplerError::InvalidEndpoint(format!("{endpoint}: {err}")))
        };

        Ok(HttpSamplingClient {
            client,
            rules_uri: uri(GET_SAMPLING_RULES_PATH)?,
            targets_uri: uri(GET_SAMPLING_TARGETS_PATH)?,
        })
    }

    async fn post<B, T>(&self, uri: &Uri, body: &B) -> Result<T, XraySamplerError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let body = serde_json::to_vec(body).map_err(XraySamplerError::Encode)?;
        let request = http::Request::post(uri.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(Bytes::from(body))?;

        let response = self.client.send_bytes(request).await?;
        if !response.status().is_success() {
            return Err(XraySamplerError::UnexpectedStatus(response.status().as_u16()));
        }

        Ok(serde_json::from_slice(response.body())?)
    }
}

#[async_trait]
impl<C: HttpClient> SamplingClient for HttpSamplingClient<C> {
    async fn get_sampling_rules(&self) -> Result<Vec<SamplingRule>, XraySamplerError> {
        otel_debug!(name: "XrayRemoteSampler.GetSamplingRules");
        let response: GetSamplingRulesResponse = self
            .post(&self.rules_uri, &GetSamplingRulesRequest { next_token: None })
            .await?;
        Ok(response.into_rules())
    }

    async fn get_sampling_targets(
        &self,
        documents: Vec<SamplingStatisticsDocument>,
    ) -> Result<SamplingTargetsResponse, XraySamplerError> {
        otel_debug!(
            name: "XrayRemoteSampler.GetSamplingTargets",
            documents = documents.len()
        );
        let request = GetSamplingTargetsRequest {
            sampling_statistics_documents: &documents,
        };
        let response: GetSamplingTargetsResponse = self.post(&self.targets_uri, &request).await?;
        Ok(response.into_response())
    }
}
