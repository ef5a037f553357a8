// `network` special file handler (spec §4.2): performs the HTTP request
// outside the sandbox on the cyber's behalf and returns the full response.
// Only wired up for I/O-capable cybers.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRequest {
    pub request_id: String,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkResponse {
    pub request_id: String,
    pub status: u16,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct NetworkChannel {
    client: reqwest::Client,
}

impl NetworkChannel {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub async fn perform(&self, request: &NetworkRequest) -> NetworkResponse {
        match self.perform_inner(request).await {
            Ok(response) => response,
            Err(err) => NetworkResponse {
                request_id: request.request_id.clone(),
                status: 0,
                body: String::new(),
                error: Some(err.to_string()),
            },
        }
    }

    async fn perform_inner(&self, request: &NetworkRequest) -> Result<NetworkResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .with_context(|| format!("invalid HTTP method `{}`", request.method))?;
        let mut builder = self.client.request(method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let response = builder.send().await.context("network request failed")?;
        let status = response.status().as_u16();
        let body = response.text().await.context("failed to read response body")?;
        Ok(NetworkResponse {
            request_id: request.request_id.clone(),
            status,
            body,
            error: None,
        })
    }
}

impl Default for NetworkChannel {
    fn default() -> Self {
        Self::new()
    }
}
