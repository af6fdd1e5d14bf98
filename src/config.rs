//! Settings loaded from the environment at startup
//!
//! Values are read through a lookup function so the same parsing runs
//! against `std::env` in the binaries and against a map in tests.

use std::time::Duration;
use tracing::warn;

use crate::error::ConfigError;

pub const DEFAULT_FINANCEHUB_BASE_URL: &str = "https://api.financehub.example/v1/market/quotes";
pub const DEFAULT_YAHOO_CHART_BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Quote arbitration settings
#[derive(Clone)]
pub struct QuoteSettings {
    pub financehub_api_key: Option<String>,
    pub financehub_base_url: String,
    pub yahoo_base_url: String,
    pub primary_timeout: Duration,
    pub fallback_timeout: Duration,
    pub race_mode: bool,
    /// Currency used when a provider omits one. Has no built-in value.
    pub default_currency: String,
}

/// Finance assistant settings
#[derive(Clone)]
pub struct AssistantSettings {
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub max_output_tokens: u32,
    pub max_context_turns: usize,
    pub max_context_tokens: usize,
}

#[derive(Clone)]
pub struct Settings {
    pub quotes: QuoteSettings,
    pub assistant: AssistantSettings,
    pub port: u16,
}

// Keys are deliberately left out of Debug output.
impl std::fmt::Debug for QuoteSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteSettings")
            .field("financehub_configured", &self.financehub_api_key.is_some())
            .field("financehub_base_url", &self.financehub_base_url)
            .field("yahoo_base_url", &self.yahoo_base_url)
            .field("primary_timeout", &self.primary_timeout)
            .field("fallback_timeout", &self.fallback_timeout)
            .field("race_mode", &self.race_mode)
            .field("default_currency", &self.default_currency)
            .finish()
    }
}

impl std::fmt::Debug for AssistantSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantSettings")
            .field("gemini_base_url", &self.gemini_base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("max_context_turns", &self.max_context_turns)
            .field("max_context_tokens", &self.max_context_tokens)
            .finish()
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("quotes", &self.quotes)
            .field("assistant", &self.assistant)
            .field("port", &self.port)
            .finish()
    }
}

impl Settings {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            quotes: QuoteSettings::from_lookup(&lookup)?,
            assistant: AssistantSettings::from_lookup(&lookup)?,
            port: parse_or(&lookup, "PORT", 8000)?,
        })
    }
}

impl QuoteSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_currency = required(&lookup, "DEFAULT_CURRENCY")?.to_ascii_uppercase();
        if default_currency.len() != 3 || !default_currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::Invalid {
                key: "DEFAULT_CURRENCY",
                reason: "expected a three-letter ISO 4217 code".to_string(),
            });
        }

        let financehub_api_key = optional(&lookup, "FINANCEHUB_API_KEY");
        if financehub_api_key.is_none() {
            warn!("FINANCEHUB_API_KEY not set; primary quote provider will always fall back");
        }

        Ok(Self {
            financehub_api_key,
            financehub_base_url: optional(&lookup, "FINANCEHUB_BASE_URL")
                .unwrap_or_else(|| DEFAULT_FINANCEHUB_BASE_URL.to_string()),
            yahoo_base_url: optional(&lookup, "YAHOO_CHART_BASE_URL")
                .unwrap_or_else(|| DEFAULT_YAHOO_CHART_BASE_URL.to_string()),
            primary_timeout: Duration::from_millis(parse_or(&lookup, "PRIMARY_TIMEOUT_MS", 3000)?),
            fallback_timeout: Duration::from_millis(parse_or(&lookup, "FALLBACK_TIMEOUT_MS", 5000)?),
            race_mode: parse_or(&lookup, "QUOTE_RACE_MODE", false)?,
            default_currency,
        })
    }
}

impl AssistantSettings {
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            gemini_api_key: required(&lookup, "GEMINI_API_KEY")?,
            gemini_base_url: optional(&lookup, "GEMINI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            model: optional(&lookup, "GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            timeout: Duration::from_secs(parse_or(&lookup, "AI_TIMEOUT_SECONDS", 30)?),
            max_output_tokens: parse_or(&lookup, "MAX_OUTPUT_TOKENS", 1024)?,
            max_context_turns: parse_or(&lookup, "AI_MAX_CONTEXT_TURNS", 6)?,
            max_context_tokens: parse_or(&lookup, "AI_MAX_CONTEXT_TOKENS", 2000)?,
        })
    }
}

fn optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, key).ok_or(ConfigError::Missing(key))
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional(lookup, key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
