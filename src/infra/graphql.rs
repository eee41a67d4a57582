//! HTTP GraphQL backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use super::error::InfraError;
use crate::application::backend::QueryBackend;
use crate::config::BackendSettings;
use crate::resilience::{BackendError, GraphQlError};

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: &'a Value,
}

#[derive(Deserialize)]
struct GraphQlEnvelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

/// POSTs `{"query", "variables"}` to a single GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct GraphQlBackend {
    client: Client,
    endpoint: Url,
}

impl GraphQlBackend {
    pub fn new(
        endpoint: Url,
        auth_token: Option<&str>,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, InfraError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|err| InfraError::backend(format!("invalid auth token: {err}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::backend(err.to_string()))?;
        Ok(Self { client, endpoint })
    }

    pub fn from_settings(settings: &BackendSettings) -> Result<Self, InfraError> {
        let endpoint = settings.endpoint.clone().ok_or_else(|| {
            InfraError::configuration("backend.endpoint is required for this command")
        })?;
        Self::new(
            endpoint,
            settings.auth_token.as_deref(),
            settings.request_timeout,
            &settings.user_agent,
        )
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl QueryBackend for GraphQlBackend {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn execute(&self, query: &str, variables: &Value) -> Result<Value, BackendError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&GraphQlRequest { query, variables })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(BackendError::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        let envelope: GraphQlEnvelope = serde_json::from_slice(&bytes)
            .map_err(|err| BackendError::decode(format!("invalid JSON body: {err}")))?;
        if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
            debug!(errors = errors.len(), "Backend returned GraphQL errors");
            return Err(BackendError::GraphQl {
                errors,
                data: envelope.data,
            });
        }
        envelope
            .data
            .ok_or_else(|| BackendError::decode("response has neither data nor errors"))
    }
}

fn transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::network(err.to_string())
    }
}
