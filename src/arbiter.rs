//! Quote arbitration
//!
//! Decides which provider answers a quote request. Sequential mode walks an
//! explicit state machine:
//!
//! ```text
//! AttemptPrimary --ok--> Succeeded
//!       |
//!     failed
//!       v
//! AttemptFallback --ok--> Succeeded
//!       |
//!     failed
//!       v
//!    Failed(primary cause, fallback cause)
//! ```
//!
//! Race mode issues both providers at once and keeps the first schema-valid
//! result. Each provider is called at most once per request.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::QuoteSettings;
use crate::error::{FailureKind, ProviderError, ProviderFailure, QuoteError};
use crate::models::{QuoteRequest, QuoteResult, QuoteSource};
use crate::normalizer::{self, NormalizeOptions};
use crate::providers::{FinanceHubProvider, QuoteProvider, YahooChartProvider};

/// Per-request arbitration policy.
#[derive(Debug, Clone)]
pub struct ArbiterPolicy {
    pub primary_timeout: Duration,
    pub fallback_timeout: Duration,
    pub race_mode: bool,
    pub default_currency: String,
}

impl ArbiterPolicy {
    pub fn sequential(default_currency: impl Into<String>) -> Self {
        Self {
            primary_timeout: Duration::from_secs(3),
            fallback_timeout: Duration::from_secs(5),
            race_mode: false,
            default_currency: default_currency.into(),
        }
    }
}

impl From<&QuoteSettings> for ArbiterPolicy {
    fn from(settings: &QuoteSettings) -> Self {
        Self {
            primary_timeout: settings.primary_timeout,
            fallback_timeout: settings.fallback_timeout,
            race_mode: settings.race_mode,
            default_currency: settings.default_currency.clone(),
        }
    }
}

/// Sequential arbitration state.
#[derive(Debug, Clone, PartialEq)]
pub enum ArbitrationState {
    AttemptPrimary,
    AttemptFallback { primary_failure: ProviderFailure },
    Succeeded(QuoteResult),
    Failed(Vec<ProviderFailure>),
}

impl ArbitrationState {
    /// Feed the outcome of the attempt this state describes.
    /// Terminal states ignore further outcomes.
    pub fn advance(self, outcome: Result<QuoteResult, ProviderFailure>) -> Self {
        match (self, outcome) {
            (Self::AttemptPrimary, Ok(quote)) => Self::Succeeded(quote),
            (Self::AttemptPrimary, Err(failure)) => Self::AttemptFallback {
                primary_failure: failure,
            },
            (Self::AttemptFallback { .. }, Ok(quote)) => Self::Succeeded(quote),
            (Self::AttemptFallback { primary_failure }, Err(failure)) => {
                Self::Failed(vec![primary_failure, failure])
            }
            (terminal, _) => terminal,
        }
    }

    /// Provider role the next attempt goes to, if any.
    pub fn next_attempt(&self) -> Option<QuoteSource> {
        match self {
            Self::AttemptPrimary => Some(QuoteSource::Primary),
            Self::AttemptFallback { .. } => Some(QuoteSource::Fallback),
            Self::Succeeded(_) | Self::Failed(_) => None,
        }
    }
}

pub struct QuoteArbiter {
    primary: Arc<dyn QuoteProvider>,
    fallback: Arc<dyn QuoteProvider>,
    policy: ArbiterPolicy,
}

impl QuoteArbiter {
    pub fn new(primary: Arc<dyn QuoteProvider>, fallback: Arc<dyn QuoteProvider>, policy: ArbiterPolicy) -> Self {
        Self {
            primary,
            fallback,
            policy,
        }
    }

    /// FinanceHub as primary, Yahoo chart as fallback, sharing one HTTP client.
    pub fn from_settings(client: reqwest::Client, settings: &QuoteSettings) -> Self {
        let primary = FinanceHubProvider::new(
            client.clone(),
            settings.financehub_base_url.clone(),
            settings.financehub_api_key.clone(),
        );
        let fallback = YahooChartProvider::new(client, settings.yahoo_base_url.clone());

        Self::new(Arc::new(primary), Arc::new(fallback), ArbiterPolicy::from(settings))
    }

    pub fn policy(&self) -> &ArbiterPolicy {
        &self.policy
    }

    pub async fn get_quote(&self, request: &QuoteRequest) -> Result<QuoteResult, QuoteError> {
        let started = Instant::now();

        let result = if self.policy.race_mode {
            self.race(request).await
        } else {
            self.sequential(request).await
        };

        match &result {
            Ok(quote) => info!(
                symbol = %quote.symbol,
                source = %quote.source,
                latency_ms = started.elapsed().as_millis() as u64,
                "Quote resolved"
            ),
            Err(QuoteError::Unavailable { causes }) => {
                for cause in causes {
                    warn!(symbol = %request.symbol(), cause = %cause, "Quote provider failed");
                }
            }
            Err(_) => {}
        }

        result
    }

    async fn sequential(&self, request: &QuoteRequest) -> Result<QuoteResult, QuoteError> {
        let mut state = ArbitrationState::AttemptPrimary;

        loop {
            state = match state {
                ArbitrationState::Succeeded(quote) => return Ok(quote),
                ArbitrationState::Failed(causes) => return Err(QuoteError::Unavailable { causes }),
                ArbitrationState::AttemptPrimary => {
                    let outcome = self.attempt(QuoteSource::Primary, request).await;
                    if let Err(failure) = &outcome {
                        info!(symbol = %request.symbol(), kind = %failure.kind, "Primary failed, trying fallback");
                    }
                    ArbitrationState::AttemptPrimary.advance(outcome)
                }
                pending @ ArbitrationState::AttemptFallback { .. } => {
                    let outcome = self.attempt(QuoteSource::Fallback, request).await;
                    pending.advance(outcome)
                }
            };
        }
    }

    /// Both providers concurrently; the losing future is dropped, which
    /// cancels its in-flight request.
    async fn race(&self, request: &QuoteRequest) -> Result<QuoteResult, QuoteError> {
        let primary = self.attempt(QuoteSource::Primary, request);
        let fallback = self.attempt(QuoteSource::Fallback, request);
        tokio::pin!(primary);
        tokio::pin!(fallback);

        let mut primary_failure: Option<ProviderFailure> = None;
        let mut fallback_failure: Option<ProviderFailure> = None;

        loop {
            tokio::select! {
                outcome = &mut primary, if primary_failure.is_none() => match outcome {
                    Ok(quote) => return Ok(quote),
                    Err(failure) => primary_failure = Some(failure),
                },
                outcome = &mut fallback, if fallback_failure.is_none() => match outcome {
                    Ok(quote) => return Ok(quote),
                    Err(failure) => fallback_failure = Some(failure),
                },
            }

            if primary_failure.is_some() && fallback_failure.is_some() {
                let causes = primary_failure.into_iter().chain(fallback_failure).collect();
                return Err(QuoteError::Unavailable { causes });
            }
        }
    }

    /// One bounded call to a provider followed by normalization.
    async fn attempt(&self, role: QuoteSource, request: &QuoteRequest) -> Result<QuoteResult, ProviderFailure> {
        let (provider, timeout) = match role {
            QuoteSource::Primary => (&self.primary, self.policy.primary_timeout),
            QuoteSource::Fallback => (&self.fallback, self.policy.fallback_timeout),
        };
        let name = provider.name();

        let raw = match tokio::time::timeout(timeout, provider.fetch(request, timeout)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => return Err(err.attribute(role, name)),
            Err(_) => {
                return Err(ProviderError::new(
                    FailureKind::Timeout,
                    format!("no response within {} ms", timeout.as_millis()),
                )
                .attribute(role, name))
            }
        };

        let options = NormalizeOptions::for_request(request, &self.policy.default_currency);
        normalizer::normalize(&raw, role, &options).map_err(|err| err.attribute(role, name))
    }
}
