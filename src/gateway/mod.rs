//! HTTP client for the compute gateway API.
//!
//! The gateway fronts the provider's block-storage and remote-execution
//! services behind one JSON-over-HTTPS surface authenticated by a token
//! header. This module implements the [`crate::provider::VolumeApi`] and
//! [`crate::provider::CommandApi`] traits against it; all wire types stay
//! private to the module.

mod commands;
mod error;
mod types;
mod volumes;

use std::sync::LazyLock;
use std::time::Duration;

use serde::de::DeserializeOwned;

pub use error::GatewayApiError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const AUTH_HEADER: &str = "X-Auth-Token";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Client for the compute gateway API.
///
/// Cheap to clone; every clone shares the process-wide HTTP connection pool.
#[derive(Clone, Debug)]
pub struct GatewayClient {
    base_url: String,
    api_token: String,
}

impl GatewayClient {
    /// Creates a client for the gateway at `base_url`, authenticating with
    /// `api_token`. A trailing slash on the base URL is normalised away.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_owned(),
            api_token: api_token.into().trim().to_owned(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Sends a request with the auth header and returns the raw body of a
    /// successful response. Non-success statuses become
    /// [`GatewayApiError::Api`] with the body as the message.
    async fn execute(&self, builder: reqwest::RequestBuilder) -> Result<Vec<u8>, GatewayApiError> {
        let response = builder
            .header(AUTH_HEADER, &self.api_token)
            .send()
            .await
            .map_err(|err| GatewayApiError::Transport {
                message: err.to_string(),
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| GatewayApiError::Transport {
                message: err.to_string(),
            })?;

        if status.is_success() {
            return Ok(body.to_vec());
        }

        Err(GatewayApiError::Api {
            status: status.as_u16(),
            message: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, GatewayApiError> {
        serde_json::from_slice(body).map_err(|err| GatewayApiError::Decode {
            message: err.to_string(),
        })
    }
}
