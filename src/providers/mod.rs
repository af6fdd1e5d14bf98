//! Quote provider trait and adapters
//!
//! Adapters issue exactly one request per call and never retry. Retry and
//! fallback policy belongs to the arbiter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::ProviderError;
use crate::models::QuoteRequest;

pub mod financehub;
pub mod yahoo;

pub use financehub::FinanceHubProvider;
pub use yahoo::YahooChartProvider;

/// Provider payload tagged with the schema it must be validated against.
#[derive(Debug, Clone, PartialEq)]
pub enum RawQuote {
    FinanceHub {
        body: Value,
        received_at: DateTime<Utc>,
    },
    YahooChart {
        body: Value,
        received_at: DateTime<Utc>,
    },
}

impl RawQuote {
    pub fn received_at(&self) -> DateTime<Utc> {
        match self {
            RawQuote::FinanceHub { received_at, .. } | RawQuote::YahooChart { received_at, .. } => {
                *received_at
            }
        }
    }
}

/// A single upstream market-data source.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// One attempt. `timeout` bounds the whole HTTP exchange.
    async fn fetch(&self, request: &QuoteRequest, timeout: Duration) -> Result<RawQuote, ProviderError>;
}

/// Process-wide HTTP client shared by every adapter (connection-pooled).
pub fn build_http_client() -> reqwest::Result<Client> {
    Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(8)
        .user_agent(concat!("vittcott-backend/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Send a prepared request and decode its JSON body, mapping every failure
/// into a [`ProviderError`].
pub(crate) async fn send_json(request: reqwest::RequestBuilder) -> Result<Value, ProviderError> {
    let response = request.send().await.map_err(ProviderError::from_transport)?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::from_status(status));
    }

    response
        .json::<Value>()
        .await
        .map_err(ProviderError::from_transport)
}

/// Scripted provider for development and tests: replays a fixed outcome,
/// optionally after a delay, and records every call.
pub struct ScriptedProvider {
    name: &'static str,
    outcome: Result<RawQuote, ProviderError>,
    delay: Duration,
    calls: AtomicUsize,
    seen_symbols: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn succeeding(name: &'static str, raw: RawQuote) -> Self {
        Self::new(name, Ok(raw))
    }

    pub fn failing(name: &'static str, error: ProviderError) -> Self {
        Self::new(name, Err(error))
    }

    fn new(name: &'static str, outcome: Result<RawQuote, ProviderError>) -> Self {
        Self {
            name,
            outcome,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            seen_symbols: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_symbols(&self) -> Vec<String> {
        self.seen_symbols
            .lock()
            .map(|symbols| symbols.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QuoteProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self, request: &QuoteRequest, _timeout: Duration) -> Result<RawQuote, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut symbols) = self.seen_symbols.lock() {
            symbols.push(request.symbol().to_string());
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.outcome.clone()
    }
}
