//! Error types for the quote arbiter and finance assistant

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::models::QuoteSource;

/// Result type alias for quote operations
pub type Result<T> = std::result::Result<T, QuoteError>;

/// Classification of a single provider attempt failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    Timeout,
    RateLimited,
    NotFound,
    MalformedResponse,
    Unreachable,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::RateLimited => "RATE_LIMITED",
            Self::NotFound => "NOT_FOUND",
            Self::MalformedResponse => "MALFORMED_RESPONSE",
            Self::Unreachable => "UNREACHABLE",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by an adapter or the normalizer, before the arbiter
/// attributes it to a provider role.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: FailureKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::MalformedResponse, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    /// Attach the provider that produced this failure.
    pub fn attribute(self, role: QuoteSource, provider: &str) -> ProviderFailure {
        ProviderFailure {
            role,
            provider: provider.to_string(),
            kind: self.kind,
            message: self.message,
        }
    }

    /// Map a transport-level reqwest error. The URL is stripped first so
    /// credentials carried in query strings never reach logs.
    pub fn from_transport(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else if err.is_decode() {
            FailureKind::MalformedResponse
        } else {
            FailureKind::Unreachable
        };

        Self::new(kind, err.without_url().to_string())
    }

    /// Map a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        let kind = match status.as_u16() {
            429 => FailureKind::RateLimited,
            404 => FailureKind::NotFound,
            _ => FailureKind::Unreachable,
        };

        Self::new(kind, format!("upstream returned HTTP {}", status.as_u16()))
    }
}

/// Provider failure attributed to the role that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{role} provider '{provider}' failed with {kind}: {message}")]
pub struct ProviderFailure {
    pub role: QuoteSource,
    pub provider: String,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum QuoteError {
    #[error("Invalid symbol '{symbol}': {reason}")]
    InvalidSymbol { symbol: String, reason: String },

    #[error("Invalid quote request: {0}")]
    InvalidRequest(String),

    #[error("Quote unavailable: {}", format_causes(.causes))]
    Unavailable { causes: Vec<ProviderFailure> },
}

impl QuoteError {
    pub(crate) fn invalid_symbol(symbol: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSymbol {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }

    /// True when every provider that was asked reported the symbol as unknown.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Unavailable { causes } => {
                !causes.is_empty() && causes.iter().all(|c| c.kind == FailureKind::NotFound)
            }
            _ => false,
        }
    }
}

fn format_causes(causes: &[ProviderFailure]) -> String {
    causes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why the assistant could not produce an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    Timeout,
    RateLimited,
    Blocked,
    EmptyResponse,
    Upstream,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate limited",
            Self::Blocked => "blocked by safety filter",
            Self::EmptyResponse => "empty response",
            Self::Upstream => "upstream error",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssistantError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("AI service unavailable ({reason}): {detail}")]
    Unavailable {
        reason: UnavailableReason,
        detail: String,
    },
}

impl AssistantError {
    pub fn unavailable(reason: UnavailableReason, detail: impl Into<String>) -> Self {
        Self::Unavailable {
            reason,
            detail: detail.into(),
        }
    }
}

/// Startup configuration errors. These are the only fatal errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
