//! Bearer token sources for upstream requests.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Provides the bearer credential attached to every upstream request.
pub trait TokenSource: Send + Sync {
    fn bearer(&self) -> impl Future<Output = Result<String>> + Send;
}

/// A fixed token, e.g. from the environment.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenSource for StaticToken {
    async fn bearer(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Token service returning `{"access_token": "..."}`, queried per request.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    url: String,
    auth: Option<String>,
    client: reqwest::Client,
}

impl TokenEndpoint {
    /// `auth` is sent verbatim in the `auth` header when present.
    pub fn new(url: impl Into<String>, auth: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("token HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            auth,
            client,
        })
    }
}

impl TokenSource for TokenEndpoint {
    async fn bearer(&self) -> Result<String> {
        let mut request = self.client.get(&self.url);
        if let Some(auth) = &self.auth {
            request = request.header("auth", auth);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::Token(format!(
                "{} answered {}: {}",
                self.url, status, body
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::error!(url = %self.url, "Unparseable token response: {}", body);
            Error::Token(format!("unparseable token response: {}", e))
        })?;
        Ok(parsed.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        let token = StaticToken("abc".to_string());
        assert_eq!(token.bearer().await.unwrap(), "abc");
    }

    #[test]
    fn test_token_response_shape() {
        let parsed: TokenResponse =
            serde_json::from_str(r#"{"access_token": "xyz", "expires_in": 3600}"#).unwrap();
        assert_eq!(parsed.access_token, "xyz");
    }
}
