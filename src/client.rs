//! Nginx Proxy Manager API client
//!
//! ```text
//! POST /api/tokens                    {identity, secret} -> {token}
//! GET  /api/nginx/certificates        -> [{id, nice_name, domain_names}]
//! GET  /api/nginx/proxy-hosts         -> [{id, domain_names, ...}]
//! POST /api/nginx/proxy-hosts         host payload -> host
//! PUT  /api/nginx/proxy-hosts/{id}    host payload -> host (status only)
//! ```
//!
//! Every call after the token exchange carries `Authorization: Bearer`.

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::hosts::{Certificate, HostId, HostPayload, RemoteHost};

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    identity: &'a str,
    secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// Unauthenticated handle on a manager instance
#[derive(Debug, Clone)]
pub struct NpmClient {
    http: Client,
    base_url: String,
}

impl NpmClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidSetting {
                name: "http client",
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange credentials for a bearer token
    pub async fn authenticate(&self, identity: &str, secret: &str) -> Result<Session> {
        let response = self
            .http
            .post(format!("{}/api/tokens", self.base_url))
            .json(&TokenRequest { identity, secret })
            .send()
            .await
            .map_err(|e| SyncError::transport("authenticate", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Auth {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = decode(response, "authenticate").await?;
        debug!(url = %self.base_url, "Authenticated");

        Ok(Session {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            token: token.token,
        })
    }
}

/// Authenticated handle, valid for one reconciliation pass
pub struct Session {
    http: Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Session {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder, operation: &str) -> Result<Response> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SyncError::transport(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Api {
                operation: operation.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    pub async fn list_certificates(&self) -> Result<Vec<Certificate>> {
        let operation = "list certificates";
        let response = self
            .send(self.http.get(self.url("/api/nginx/certificates")), operation)
            .await?;
        decode(response, operation).await
    }

    pub async fn list_hosts(&self) -> Result<Vec<RemoteHost>> {
        let operation = "list proxy hosts";
        let response = self
            .send(self.http.get(self.url("/api/nginx/proxy-hosts")), operation)
            .await?;
        decode(response, operation).await
    }

    /// Create a host. The returned host is best effort: any 2xx counts as
    /// success, and `None` means the body was not a host object.
    pub async fn create_host(&self, payload: &HostPayload) -> Result<Option<RemoteHost>> {
        let operation = "create proxy host";
        let request = self
            .http
            .post(self.url("/api/nginx/proxy-hosts"))
            .json(payload);
        let response = self.send(request, operation).await?;

        match decode::<RemoteHost>(response, operation).await {
            Ok(host) => Ok(Some(host)),
            Err(e) => {
                warn!(error = %e, "Proxy host created but response body was not understood");
                Ok(None)
            }
        }
    }

    /// Replace the host `id` with `payload`. Only the status is checked.
    pub async fn update_host(&self, id: HostId, payload: &HostPayload) -> Result<()> {
        let operation = format!("update proxy host {}", id);
        let request = self
            .http
            .put(self.url(&format!("/api/nginx/proxy-hosts/{}", id)))
            .json(payload);
        self.send(request, &operation).await?;
        Ok(())
    }
}

async fn decode<T: DeserializeOwned>(response: Response, operation: &str) -> Result<T> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| SyncError::transport(operation, e))?;

    serde_json::from_str(&body).map_err(|e| SyncError::Api {
        operation: operation.to_string(),
        status,
        body: format!("unexpected response body ({}): {}", e, body),
    })
}
