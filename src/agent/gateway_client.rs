//! # Gateway HTTP Client
//!
//! Talks to one Ignition gateway's HTTP API (§6 "Gateway HTTP API"): the two
//! reload endpoints invoked in order during a tick's scan step, the
//! designer-session probe consulted by the skip predicates, and the
//! health endpoint used for readiness.
//!
//! Built with `reqwest`'s `rustls-tls` backend, the same tradeoff the
//! teacher's GCP REST client documents: a native HTTP client over a
//! provider SDK keeps the TLS stack on rustls instead of pulling OpenSSL.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const SCAN_RETRY_ATTEMPTS: u32 = 3;
const SCAN_RETRY_BACKOFF: [Duration; 2] = [Duration::from_secs(2), Duration::from_secs(4)];

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request to {path} failed: {source}")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("gateway returned non-2xx status {status} for {path}")]
    Status { path: String, status: u16 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct DesignerSession {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
}

pub struct GatewayClient {
    http: Client,
    base_url: String,
    api_token: Option<String>,
}

impl GatewayClient {
    pub fn new(base_url: String, api_token: Option<String>) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| GatewayError::Request {
                path: base_url.clone(),
                source,
            })?;
        Ok(Self {
            http,
            base_url,
            api_token,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.request(method, url);
        if let Some(token) = &self.api_token {
            req = req.header("X-Ignition-API-Token", token);
        }
        req
    }

    /// `GET /data/api/v1/gateway-info`: readiness probe.
    pub async fn health(&self) -> Result<(), GatewayError> {
        let path = "/data/api/v1/gateway-info";
        let resp = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(|source| GatewayError::Request {
                path: path.to_string(),
                source,
            })?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(GatewayError::Status {
                path: path.to_string(),
                status: resp.status().as_u16(),
            })
        }
    }

    /// `GET /data/api/v1/designers`: active designer-session probe consulted
    /// by the skip predicates (§4.3 step 2).
    pub async fn active_designer_sessions(&self) -> Result<Vec<DesignerSession>, GatewayError> {
        let path = "/data/api/v1/designers";
        let resp = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(|source| GatewayError::Request {
                path: path.to_string(),
                source,
            })?;
        if !resp.status().is_success() {
            return Err(GatewayError::Status {
                path: path.to_string(),
                status: resp.status().as_u16(),
            });
        }
        resp.json().await.map_err(|source| GatewayError::Request {
            path: path.to_string(),
            source,
        })
    }

    /// Invokes `POST /data/api/v1/scan/projects` then `POST
    /// /data/api/v1/scan/config`, in that order (§4.3 step 5, §5 "project
    /// reload strictly precedes config reload"). Each call retries up to
    /// `SCAN_RETRY_ATTEMPTS` with linear backoff; non-2xx responses are
    /// retryable.
    pub async fn scan(&self) -> Result<(), GatewayError> {
        self.scan_endpoint("/data/api/v1/scan/projects").await?;
        self.scan_endpoint("/data/api/v1/scan/config").await?;
        Ok(())
    }

    async fn scan_endpoint(&self, path: &str) -> Result<(), GatewayError> {
        let mut last_err = None;
        for attempt in 0..SCAN_RETRY_ATTEMPTS {
            let outcome = self
                .request(reqwest::Method::POST, path)
                .send()
                .await
                .map_err(|source| GatewayError::Request {
                    path: path.to_string(),
                    source,
                })
                .and_then(|resp| {
                    if resp.status().is_success() {
                        Ok(())
                    } else {
                        Err(GatewayError::Status {
                            path: path.to_string(),
                            status: resp.status().as_u16(),
                        })
                    }
                });
            match outcome {
                Ok(()) => return Ok(()),
                Err(err) => {
                    last_err = Some(err);
                    if let Some(delay) = SCAN_RETRY_BACKOFF.get(attempt as usize) {
                        tokio::time::sleep(*delay).await;
                    }
                }
            }
        }
        Err(last_err.expect("loop runs at least once"))
    }
}
