//! Core data models for quotes and assistant queries

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::QuoteError;

const MAX_SYMBOL_LEN: usize = 15;

/// Ranges understood by both quote providers.
pub const HISTORY_RANGES: &[&str] = &[
    "1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "ytd", "max",
];

pub const DEFAULT_HISTORY_RANGE: &str = "1mo";

//
// ================= Enums =================
//

/// Which configured provider produced a quote.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuoteSource {
    Primary,
    Fallback,
}

impl fmt::Display for QuoteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteSource::Primary => write!(f, "PRIMARY"),
            QuoteSource::Fallback => write!(f, "FALLBACK"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QuoteField {
    Price,
    Volume,
    History,
}

impl QuoteField {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "price" => Some(Self::Price),
            "volume" => Some(Self::Volume),
            "history" | "historical" | "historical-range" | "candles" => Some(Self::History),
            _ => None,
        }
    }
}

//
// ================= Quote request =================
//

/// Validated, immutable quote lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    symbol: String,
    fields: BTreeSet<QuoteField>,
    range: String,
    as_of: Option<DateTime<Utc>>,
}

impl QuoteRequest {
    /// Price-only request for a symbol.
    pub fn new(symbol: &str) -> Result<Self, QuoteError> {
        Ok(Self {
            symbol: normalize_symbol(symbol)?,
            fields: BTreeSet::from([QuoteField::Price]),
            range: DEFAULT_HISTORY_RANGE.to_string(),
            as_of: None,
        })
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = QuoteField>) -> Self {
        self.fields = fields.into_iter().collect();
        self.fields.insert(QuoteField::Price);
        self
    }

    pub fn with_range(mut self, range: &str) -> Result<Self, QuoteError> {
        let range = range.trim().to_ascii_lowercase();
        if !HISTORY_RANGES.contains(&range.as_str()) {
            return Err(QuoteError::InvalidRequest(format!(
                "unsupported range '{}', expected one of {}",
                range,
                HISTORY_RANGES.join(", ")
            )));
        }
        self.range = range;
        Ok(self)
    }

    pub fn with_as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn fields(&self) -> &BTreeSet<QuoteField> {
        &self.fields
    }

    pub fn range(&self) -> &str {
        &self.range
    }

    pub fn as_of(&self) -> Option<DateTime<Utc>> {
        self.as_of
    }

    pub fn wants(&self, field: QuoteField) -> bool {
        self.fields.contains(&field)
    }

    /// Providers must return a series when history was asked for or an
    /// as-of price has to be located in it.
    pub fn needs_history(&self) -> bool {
        self.wants(QuoteField::History) || self.as_of.is_some()
    }

    /// Range sent upstream: the requested one when a series is needed,
    /// otherwise the shortest window, which still carries the latest price.
    pub fn provider_range(&self) -> &str {
        if self.needs_history() {
            &self.range
        } else {
            "1d"
        }
    }
}

/// Trim, uppercase and validate a ticker.
pub fn normalize_symbol(input: &str) -> Result<String, QuoteError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(QuoteError::invalid_symbol(input, "symbol is empty"));
    }

    let normalized = trimmed.to_ascii_uppercase();
    let len = normalized.chars().count();
    if len > MAX_SYMBOL_LEN {
        return Err(QuoteError::invalid_symbol(
            input,
            format!("symbol has {} characters, max is {}", len, MAX_SYMBOL_LEN),
        ));
    }

    if let Some(ch) = normalized
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '^' | '=')))
    {
        return Err(QuoteError::invalid_symbol(
            input,
            format!("character '{}' is not allowed", ch),
        ));
    }

    Ok(normalized)
}

//
// ================= Quote result =================
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
}

/// Canonical quote returned to callers regardless of provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteResult {
    pub symbol: String,
    pub price: Decimal,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
    pub source: QuoteSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<PricePoint>>,
}

//
// ================= Assistant =================
//

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AiQuery {
    pub question: String,
    pub context: Vec<String>,
    pub portfolio: Option<String>,
}

impl AiQuery {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerMetadata {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiAnswer {
    pub text: String,
    pub metadata: AnswerMetadata,
}
