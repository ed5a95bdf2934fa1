//! HTTP implementation of [`Upstream`].

use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use squadwatch_core::{InfoEnvelope, NewsPayload, SquadronInfo};

use super::relay::RelayPool;
use super::token::TokenSource;
use super::{FetchOutcome, Upstream, UpstreamConfig};
use crate::{Error, Result};

const INFO_ENDPOINT: &str = "info";
const NEWS_ENDPOINT: &str = "news/list";

/// How the client treats an HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Ok,
    NotFound,
    Maintenance,
    Unknown,
}

impl StatusClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NotFound => "not_found",
            Self::Maintenance => "maintenance",
            Self::Unknown => "unknown",
        }
    }
}

/// Classify an upstream status code.
pub fn classify_status(code: u16) -> StatusClass {
    match code {
        200 => StatusClass::Ok,
        404 => StatusClass::NotFound,
        418 => StatusClass::Maintenance,
        _ => StatusClass::Unknown,
    }
}

/// Upstream client sending every request through a [`RelayPool`].
pub struct HttpUpstream<T> {
    config: UpstreamConfig,
    pool: RelayPool,
    /// One HTTP client per relay, indexed like the pool.
    clients: Vec<reqwest::Client>,
    token: T,
}

impl<T: TokenSource> HttpUpstream<T> {
    /// Create a client for every relay in the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if a relay URL isn't a usable proxy or the HTTP
    /// client can't be built.
    pub fn new(config: UpstreamConfig, pool: RelayPool, token: T) -> Result<Self> {
        let clients = pool
            .urls()
            .into_iter()
            .map(|url| build_client(url.as_deref(), config.timeout))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config,
            pool,
            clients,
            token,
        })
    }

    pub fn pool(&self) -> &RelayPool {
        &self.pool
    }

    /// GET an endpoint for a squadron, swapping relays on connection failure.
    async fn get(&self, endpoint: &'static str, squadron_id: i64) -> Result<(u16, String)> {
        let url = format!("{}{}", self.config.base_url, endpoint);
        let bearer = self.token.bearer().await?;

        let mut failed: Vec<usize> = Vec::new();
        let mut last_error = String::new();

        for _ in 0..=self.config.relay_retries {
            let lease = self.pool.acquire(&failed).await;
            let relay = lease.url.as_deref().unwrap_or("direct");
            tracing::debug!(squadron_id, relay, "GET {}", url);

            let started = Instant::now();
            let result = self.send(&url, squadron_id, &bearer, lease.index).await;
            self.pool.mark_used(lease.index);

            match result {
                Ok((status, body)) => {
                    histogram!("upstream_request_duration_seconds")
                        .record(started.elapsed().as_secs_f64());
                    tracing::debug!(squadron_id, status, len = body.len(), "Request complete");
                    return Ok((status, body));
                }
                Err(e) if is_relay_failure(&e) => {
                    counter!("upstream_relay_failures_total").increment(1);
                    tracing::warn!(relay, "Relay failed, trying another: {}", e);
                    failed.push(lease.index);
                    last_error = e.to_string();
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::Transport {
            attempts: failed.len(),
            last_error,
        })
    }

    /// One request through one relay, body included.
    async fn send(
        &self,
        url: &str,
        squadron_id: i64,
        bearer: &str,
        relay: usize,
    ) -> reqwest::Result<(u16, String)> {
        let response = self.clients[relay]
            .get(url)
            .query(&[("squadronId", squadron_id)])
            .bearer_auth(bearer)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }

    /// Fetch and classify; the body is only kept for 200 responses.
    async fn fetch(
        &self,
        endpoint: &'static str,
        squadron_id: i64,
    ) -> Result<FetchOutcome<String>> {
        let (code, body) = self.get(endpoint, squadron_id).await?;
        let class = classify_status(code);
        counter!("upstream_requests_total", "endpoint" => endpoint, "status" => class.as_str())
            .increment(1);

        Ok(match class {
            StatusClass::Ok => FetchOutcome::Found(body),
            StatusClass::NotFound => FetchOutcome::NotFound,
            StatusClass::Maintenance => {
                tracing::warn!(squadron_id, "GET {} returned 418, content: {}", endpoint, body);
                FetchOutcome::Unavailable
            }
            StatusClass::Unknown => {
                tracing::warn!(
                    squadron_id,
                    code,
                    "GET {} returned unexpected status, content: {}",
                    endpoint,
                    body
                );
                FetchOutcome::UnknownStatus { code, body }
            }
        })
    }
}

impl<T: TokenSource> Upstream for HttpUpstream<T> {
    async fn fetch_info(&self, squadron_id: i64) -> Result<FetchOutcome<SquadronInfo>> {
        Ok(match self.fetch(INFO_ENDPOINT, squadron_id).await? {
            FetchOutcome::Found(body) => {
                let envelope: InfoEnvelope = serde_json::from_str(&body)?;
                FetchOutcome::Found(envelope.squadron)
            }
            FetchOutcome::NotFound => FetchOutcome::NotFound,
            FetchOutcome::Unavailable => FetchOutcome::Unavailable,
            FetchOutcome::UnknownStatus { code, body } => {
                FetchOutcome::UnknownStatus { code, body }
            }
        })
    }

    async fn fetch_news(&self, squadron_id: i64) -> Result<FetchOutcome<NewsPayload>> {
        Ok(match self.fetch(NEWS_ENDPOINT, squadron_id).await? {
            FetchOutcome::Found(body) => {
                let value: serde_json::Value = serde_json::from_str(&body)?;
                FetchOutcome::Found(NewsPayload::from_response(&value))
            }
            FetchOutcome::NotFound => FetchOutcome::NotFound,
            FetchOutcome::Unavailable => FetchOutcome::Unavailable,
            FetchOutcome::UnknownStatus { code, body } => {
                FetchOutcome::UnknownStatus { code, body }
            }
        })
    }
}

/// Anything that went wrong on the wire, as opposed to building the request.
fn is_relay_failure(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}

fn build_client(proxy: Option<&str>, timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(concat!("squadwatch/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout);

    if let Some(url) = proxy {
        let proxy = reqwest::Proxy::all(url)
            .map_err(|e| Error::Config(format!("invalid relay '{}': {}", url, e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| Error::Config(format!("HTTP client: {}", e)))
}
