//! HTTP Contract Resolver
//!
//! Resolves option contracts through a token lookup endpoint:
//!
//! ```text
//! GET <base>?index=NIFTY&expiryDate=2025-07-31&optionType=ce&strikePrice=25000
//! 200 {"token": "43210"}
//! ```
//!
//! A 2xx response without a usable `token` means the contract does not
//! exist. Any other status is a lookup failure. No retries: a failed leg is
//! skipped by the expander.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::application::ports::{ContractQuery, ContractResolver, ResolverError};

/// Default token lookup endpoint.
pub const DEFAULT_RESOLVER_URL: &str = "https://api.trado.trade/token";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<serde_json::Value>,
}

impl TokenResponse {
    /// Token as a string; publishers send it either quoted or as a number.
    fn into_token(self) -> Option<String> {
        match self.token? {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Contract resolver backed by an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpContractResolver {
    client: Client,
    base_url: String,
}

impl HttpContractResolver {
    /// Create a resolver for `base_url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ResolverError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResolverError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Endpoint queried by this resolver.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ContractResolver for HttpContractResolver {
    async fn resolve_token(&self, query: &ContractQuery) -> Result<Option<String>, ResolverError> {
        let strike = query.strike.to_string();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("index", query.index.as_str()),
                ("expiryDate", query.expiry_date.as_str()),
                ("optionType", query.side.as_str()),
                ("strikePrice", strike.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ResolverError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolverError::Status(status.as_u16()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ResolverError::InvalidResponse(e.to_string()))?;

        let token = body.into_token();
        if token.is_none() {
            tracing::debug!(
                index = %query.index,
                strike = query.strike,
                side = query.side.as_str(),
                "No token in resolver response"
            );
        }
        Ok(token)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::observation::OptionSide;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn query() -> ContractQuery {
        ContractQuery {
            index: "NIFTY".to_string(),
            expiry_date: "2025-07-31".to_string(),
            side: OptionSide::Call,
            strike: 25_000,
        }
    }

    async fn resolver(server: &MockServer) -> HttpContractResolver {
        HttpContractResolver::new(format!("{}/token", server.uri()), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn resolves_token_with_query_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(query_param("index", "NIFTY"))
            .and(query_param("expiryDate", "2025-07-31"))
            .and(query_param("optionType", "ce"))
            .and(query_param("strikePrice", "25000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "43210"})))
            .expect(1)
            .mount(&server)
            .await;

        let token = resolver(&server).await.resolve_token(&query()).await.unwrap();

        assert_eq!(token.as_deref(), Some("43210"));
    }

    #[tokio::test]
    async fn numeric_token_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": 43210})))
            .mount(&server)
            .await;

        let token = resolver(&server).await.resolve_token(&query()).await.unwrap();

        assert_eq!(token.as_deref(), Some("43210"));
    }

    #[tokio::test]
    async fn missing_token_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"message": "no such contract"})))
            .mount(&server)
            .await;

        let r = resolver(&server).await;
        assert_eq!(r.resolve_token(&query()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_token_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": ""})))
            .mount(&server)
            .await;

        let r = resolver(&server).await;
        assert_eq!(r.resolve_token(&query()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn error_status_is_lookup_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = resolver(&server).await.resolve_token(&query()).await;

        assert!(matches!(result, Err(ResolverError::Status(503))));
    }

    #[tokio::test]
    async fn non_json_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let result = resolver(&server).await.resolve_token(&query()).await;

        assert!(matches!(result, Err(ResolverError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_http_error() {
        let r = HttpContractResolver::new("http://127.0.0.1:1/token", Duration::from_millis(200)).unwrap();

        assert!(matches!(
            r.resolve_token(&query()).await,
            Err(ResolverError::Http(_))
        ));
    }
}
