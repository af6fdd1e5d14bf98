//! FinanceHub adapter (primary provider)
//!
//! Bearer-authenticated REST endpoint returning a flat quote object with an
//! optional `candles` array.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::{send_json, QuoteProvider, RawQuote};
use crate::error::{FailureKind, ProviderError};
use crate::models::QuoteRequest;

pub struct FinanceHubProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl FinanceHubProvider {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn build_request(&self, request: &QuoteRequest, api_key: &str, timeout: Duration) -> reqwest::RequestBuilder {
        self.client
            .get(&self.base_url)
            .query(&[("symbol", request.symbol()), ("range", request.provider_range())])
            .bearer_auth(api_key)
            .timeout(timeout)
    }
}

#[async_trait]
impl QuoteProvider for FinanceHubProvider {
    fn name(&self) -> &'static str {
        "financehub"
    }

    async fn fetch(&self, request: &QuoteRequest, timeout: Duration) -> Result<RawQuote, ProviderError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ProviderError::new(FailureKind::Unreachable, "FINANCEHUB_API_KEY is not configured")
        })?;

        debug!(symbol = %request.symbol(), range = %request.provider_range(), "Calling FinanceHub");

        let body = send_json(self.build_request(request, api_key, timeout)).await?;

        Ok(RawQuote::FinanceHub {
            body,
            received_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuoteField;

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let provider = FinanceHubProvider::new(Client::new(), "http://127.0.0.1:9/quotes", None);
        let request = QuoteRequest::new("msft").unwrap();

        let err = provider
            .fetch(&request, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Unreachable);
        assert!(err.message.contains("not configured"));
    }

    #[test]
    fn test_request_shape() {
        let provider = FinanceHubProvider::new(
            Client::new(),
            "https://hub.test/v1/market/quotes/",
            Some("hub-key".to_string()),
        );
        let request = QuoteRequest::new("aapl")
            .unwrap()
            .with_fields([QuoteField::History])
            .with_range("5d")
            .unwrap();

        let built = provider
            .build_request(&request, "hub-key", Duration::from_secs(3))
            .build()
            .unwrap();

        assert_eq!(
            built.url().as_str(),
            "https://hub.test/v1/market/quotes?symbol=AAPL&range=5d"
        );
        assert_eq!(built.timeout(), Some(&Duration::from_secs(3)));
        let auth = built.headers().get("authorization").unwrap();
        assert_eq!(auth.to_str().unwrap(), "Bearer hub-key");
    }

    #[test]
    fn test_price_only_request_asks_for_shortest_range() {
        let provider = FinanceHubProvider::new(Client::new(), "https://hub.test/quotes", None);
        let request = QuoteRequest::new("aapl").unwrap().with_range("1y").unwrap();

        let built = provider
            .build_request(&request, "hub-key", Duration::from_secs(3))
            .build()
            .unwrap();

        assert_eq!(built.url().as_str(), "https://hub.test/quotes?symbol=AAPL&range=1d");
    }
}
