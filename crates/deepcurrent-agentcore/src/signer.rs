//! SigV4 request signing for AgentCore data planes.
//!
//! Credentials come from the standard AWS chain (environment, shared
//! credentials file, instance/task role); each request is signed
//! individually, matching the one-connection-per-operation pattern the
//! Gateway expects.

use std::time::SystemTime;

use aws_config::BehaviorVersion;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4;
use deepcurrent::error::{Error, Result};

/// Signs outgoing HTTP requests with SigV4.
#[derive(Clone)]
pub struct RequestSigner {
    credentials: SharedCredentialsProvider,
    region: String,
    service: String,
}

impl RequestSigner {
    /// Build a signer from the ambient AWS configuration.
    pub async fn from_env(region: impl Into<String>, service: impl Into<String>) -> Result<Self> {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let credentials = config
            .credentials_provider()
            .ok_or_else(|| Error::config("no AWS credentials provider available"))?;
        Ok(Self {
            credentials,
            region: region.into(),
            service: service.into(),
        })
    }

    /// Build a signer from an explicit provider (tests).
    pub fn new(
        credentials: SharedCredentialsProvider,
        region: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            region: region.into(),
            service: service.into(),
        }
    }

    /// Produce a signed POST request carrying a JSON body.
    pub async fn signed_json_post(
        &self,
        url: &str,
        body: Vec<u8>,
    ) -> Result<http::Request<Vec<u8>>> {
        let credentials = self
            .credentials
            .provide_credentials()
            .await
            .map_err(|e| Error::config(format!("failed to resolve AWS credentials: {e}")))?;
        let identity = credentials.into();

        let mut request = http::Request::builder()
            .method(http::Method::POST)
            .uri(url)
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(http::header::ACCEPT, "application/json")
            .body(body)
            .map_err(|e| Error::other(format!("failed to build request: {e}")))?;

        let signing_params = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name(&self.service)
            .time(SystemTime::now())
            .settings(SigningSettings::default())
            .build()
            .map_err(|e| Error::other(format!("failed to build signing params: {e}")))?;

        let signable = SignableRequest::new(
            request.method().as_str(),
            request.uri().to_string(),
            request
                .headers()
                .iter()
                .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or(""))),
            SignableBody::Bytes(request.body()),
        )
        .map_err(|e| Error::other(format!("request not signable: {e}")))?;

        let (instructions, _signature) = sign(signable, &signing_params.into())
            .map_err(|e| Error::other(format!("signing failed: {e}")))?
            .into_parts();
        instructions.apply_to_request_http1x(&mut request);

        Ok(request)
    }
}
