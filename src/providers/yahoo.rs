//! Yahoo Finance chart adapter (fallback provider)
//!
//! Key-less `v8/finance/chart/{symbol}` endpoint. One response carries both
//! the latest market price (`meta`) and the candle series.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::{send_json, QuoteProvider, RawQuote};
use crate::error::ProviderError;
use crate::models::QuoteRequest;

pub struct YahooChartProvider {
    client: Client,
    base_url: String,
}

impl YahooChartProvider {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn build_request(&self, request: &QuoteRequest, timeout: Duration) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, request.symbol());

        self.client
            .get(url)
            .query(&[
                ("range", request.provider_range()),
                ("interval", candle_interval(request.provider_range())),
            ])
            .timeout(timeout)
    }
}

/// Candle width that keeps the series a sensible length for each range.
fn candle_interval(range: &str) -> &'static str {
    match range {
        "1d" => "5m",
        "5d" => "30m",
        "5y" | "10y" | "max" => "1wk",
        _ => "1d",
    }
}

#[async_trait]
impl QuoteProvider for YahooChartProvider {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn fetch(&self, request: &QuoteRequest, timeout: Duration) -> Result<RawQuote, ProviderError> {
        debug!(symbol = %request.symbol(), range = %request.provider_range(), "Calling Yahoo chart API");

        let body = send_json(self.build_request(request, timeout)).await?;

        Ok(RawQuote::YahooChart {
            body,
            received_at: Utc::now(),
        })
    }
}
