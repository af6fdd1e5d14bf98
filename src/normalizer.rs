//! Response normalization
//!
//! Maps provider payloads into the canonical [`QuoteResult`]. Each provider
//! schema is a typed serde struct; deserialization is the schema validation
//! step and anything that does not fit is `MALFORMED_RESPONSE`. No I/O here.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

use crate::error::ProviderError;
use crate::models::{PricePoint, QuoteField, QuoteRequest, QuoteResult, QuoteSource};
use crate::providers::RawQuote;

/// What the caller asked for, plus the configured currency fallback.
#[derive(Debug, Clone)]
pub struct NormalizeOptions<'a> {
    pub expected_symbol: &'a str,
    pub default_currency: &'a str,
    pub include_volume: bool,
    pub include_history: bool,
    pub as_of: Option<DateTime<Utc>>,
}

impl<'a> NormalizeOptions<'a> {
    pub fn for_request(request: &'a QuoteRequest, default_currency: &'a str) -> Self {
        Self {
            expected_symbol: request.symbol(),
            default_currency,
            include_volume: request.wants(QuoteField::Volume),
            include_history: request.wants(QuoteField::History),
            as_of: request.as_of(),
        }
    }
}

/// Intermediate shape shared by every provider after schema validation.
struct Extracted {
    symbol: String,
    price: Option<Decimal>,
    currency: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    volume: Option<u64>,
    change: Option<Decimal>,
    history: Vec<PricePoint>,
}

pub fn normalize(
    raw: &RawQuote,
    source: QuoteSource,
    options: &NormalizeOptions<'_>,
) -> Result<QuoteResult, ProviderError> {
    let extracted = match raw {
        RawQuote::FinanceHub { body, .. } => extract_financehub(body)?,
        RawQuote::YahooChart { body, .. } => extract_yahoo(body)?,
    };

    into_canonical(extracted, raw.received_at(), source, options)
}

fn into_canonical(
    mut extracted: Extracted,
    received_at: DateTime<Utc>,
    source: QuoteSource,
    options: &NormalizeOptions<'_>,
) -> Result<QuoteResult, ProviderError> {
    let symbol = extracted.symbol.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(ProviderError::malformed("symbol is empty"));
    }
    if symbol != options.expected_symbol {
        return Err(ProviderError::malformed(format!(
            "provider answered for '{}' instead of '{}'",
            symbol, options.expected_symbol
        )));
    }

    let mut price = extracted
        .price
        .ok_or_else(|| ProviderError::malformed("price is missing or null"))?;
    if price.is_sign_negative() && !price.is_zero() {
        return Err(ProviderError::malformed(format!("negative price {}", price)));
    }

    extracted.history.sort_by_key(|p| p.timestamp);

    let mut timestamp = extracted
        .timestamp
        .or_else(|| extracted.history.last().map(|p| p.timestamp))
        .unwrap_or(received_at);
    let mut volume = extracted.volume;
    let mut change = extracted.change;

    if let Some(as_of) = options.as_of {
        let point = extracted
            .history
            .iter()
            .rev()
            .find(|p| p.timestamp <= as_of)
            .ok_or_else(|| {
                ProviderError::not_found(format!("no price for {} at or before {}", symbol, as_of))
            })?;
        price = point.price;
        timestamp = point.timestamp;
        volume = point.volume;
        change = None;
    }

    let currency = extracted
        .currency
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| options.default_currency.to_string());

    Ok(QuoteResult {
        symbol,
        price,
        currency,
        timestamp,
        source,
        volume: volume.filter(|_| options.include_volume),
        change,
        history: options.include_history.then_some(extracted.history),
    })
}

//
// ================= FinanceHub =================
//

#[derive(Debug, Deserialize)]
struct FinanceHubQuote {
    #[serde(alias = "symbol")]
    sym: Option<String>,
    #[serde(alias = "price")]
    last: Option<Value>,
    #[serde(alias = "currency")]
    ccy: Option<String>,
    #[serde(alias = "timestamp", alias = "as_of")]
    ts: Option<Value>,
    volume: Option<Value>,
    change: Option<Value>,
    candles: Option<Vec<FinanceHubCandle>>,
}

#[derive(Debug, Deserialize)]
struct FinanceHubCandle {
    #[serde(alias = "timestamp")]
    ts: Value,
    close: Option<Value>,
    volume: Option<Value>,
}

fn extract_financehub(body: &Value) -> Result<Extracted, ProviderError> {
    let quote: FinanceHubQuote = serde_json::from_value(body.clone())
        .map_err(|e| ProviderError::malformed(format!("financehub schema mismatch: {}", e)))?;

    let symbol = quote
        .sym
        .ok_or_else(|| ProviderError::malformed("symbol is missing"))?;

    let history = quote
        .candles
        .unwrap_or_default()
        .iter()
        .filter_map(|candle| {
            Some(PricePoint {
                timestamp: timestamp_from_value(&candle.ts)?,
                price: non_negative(decimal_from_value(candle.close.as_ref()?)?)?,
                volume: candle.volume.as_ref().and_then(u64_from_value),
            })
        })
        .collect();

    Ok(Extracted {
        symbol,
        price: required_decimal(quote.last.as_ref(), "price")?,
        currency: quote.ccy,
        timestamp: quote.ts.as_ref().and_then(timestamp_from_value),
        volume: quote.volume.as_ref().and_then(u64_from_value),
        change: quote.change.as_ref().and_then(decimal_from_value),
        history,
    })
}

//
// ================= Yahoo chart =================
//

#[derive(Debug, Deserialize)]
struct YahooEnvelope {
    chart: YahooChart,
}

#[derive(Debug, Deserialize)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
struct YahooError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YahooResult {
    meta: YahooMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Option<YahooIndicators>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooMeta {
    symbol: Option<String>,
    currency: Option<String>,
    regular_market_price: Option<Value>,
    regular_market_time: Option<Value>,
    regular_market_volume: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct YahooIndicators {
    #[serde(default)]
    quote: Vec<YahooQuoteSeries>,
}

#[derive(Debug, Default, Deserialize)]
struct YahooQuoteSeries {
    #[serde(default)]
    close: Vec<Option<Value>>,
    #[serde(default)]
    volume: Vec<Option<Value>>,
}

fn extract_yahoo(body: &Value) -> Result<Extracted, ProviderError> {
    let envelope: YahooEnvelope = serde_json::from_value(body.clone())
        .map_err(|e| ProviderError::malformed(format!("yahoo chart schema mismatch: {}", e)))?;

    if let Some(error) = envelope.chart.error {
        let description = error.description.unwrap_or_default();
        return Err(match error.code.as_deref() {
            Some("Not Found") => ProviderError::not_found(description),
            code => ProviderError::malformed(format!(
                "yahoo chart error {}: {}",
                code.unwrap_or("unknown"),
                description
            )),
        });
    }

    let result = envelope
        .chart
        .result
        .and_then(|mut results| (!results.is_empty()).then(|| results.swap_remove(0)))
        .ok_or_else(|| ProviderError::malformed("chart result is empty"))?;

    let series = result
        .indicators
        .and_then(|mut i| (!i.quote.is_empty()).then(|| i.quote.swap_remove(0)))
        .unwrap_or_default();

    let history: Vec<PricePoint> = result
        .timestamp
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .filter_map(|(idx, ts)| {
            let close = series.close.get(idx)?.as_ref()?;
            Some(PricePoint {
                timestamp: DateTime::<Utc>::from_timestamp(ts, 0)?,
                price: non_negative(decimal_from_value(close)?)?,
                volume: series
                    .volume
                    .get(idx)
                    .and_then(|v| v.as_ref())
                    .and_then(u64_from_value),
            })
        })
        .collect();

    let meta = result.meta;
    let symbol = meta
        .symbol
        .ok_or_else(|| ProviderError::malformed("meta.symbol is missing"))?;

    let price = match required_decimal(meta.regular_market_price.as_ref(), "regularMarketPrice") {
        Ok(Some(price)) => Some(price),
        Ok(None) => history.iter().max_by_key(|p| p.timestamp).map(|p| p.price),
        Err(e) => return Err(e),
    };

    Ok(Extracted {
        symbol,
        price,
        currency: meta.currency,
        timestamp: meta
            .regular_market_time
            .as_ref()
            .and_then(timestamp_from_value),
        volume: meta.regular_market_volume.as_ref().and_then(u64_from_value),
        change: None,
        history,
    })
}

//
// ================= Value helpers =================
//

/// `Ok(None)` when absent or null, `Err` when present but not a number.
fn required_decimal(value: Option<&Value>, field: &str) -> Result<Option<Decimal>, ProviderError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => decimal_from_value(v)
            .map(Some)
            .ok_or_else(|| ProviderError::malformed(format!("{} is not numeric: {}", field, v))),
    }
}

fn decimal_from_value(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn non_negative(value: Decimal) -> Option<Decimal> {
    (!value.is_sign_negative() || value.is_zero()).then_some(value)
}

fn u64_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Unix seconds, unix milliseconds, or RFC 3339.
fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let raw = n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64))?;
            if raw > 100_000_000_000 {
                DateTime::<Utc>::from_timestamp_millis(raw)
            } else {
                DateTime::<Utc>::from_timestamp(raw, 0)
            }
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| timestamp_from_value(&Value::from(s.trim().parse::<i64>().ok()?))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn received() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn options<'a>(symbol: &'a str) -> NormalizeOptions<'a> {
        NormalizeOptions {
            expected_symbol: symbol,
            default_currency: "EUR",
            include_volume: false,
            include_history: false,
            as_of: None,
        }
    }

    fn financehub(body: Value) -> RawQuote {
        RawQuote::FinanceHub {
            body,
            received_at: received(),
        }
    }

    fn yahoo(body: Value) -> RawQuote {
        RawQuote::YahooChart {
            body,
            received_at: received(),
        }
    }

    fn yahoo_chart(price: Value) -> Value {
        json!({
            "chart": {
                "result": [{
                    "meta": {
                        "symbol": "MSFT",
                        "currency": "USD",
                        "regularMarketPrice": price,
                        "regularMarketTime": 1_700_000_300,
                        "regularMarketVolume": 21_000_000
                    },
                    "timestamp": [1_699_900_000, 1_699_990_000],
                    "indicators": {
                        "quote": [{
                            "close": [310.25, 311.75],
                            "volume": [18_000_000, 19_500_000]
                        }]
                    }
                }],
                "error": null
            }
        })
    }

    #[test]
    fn test_financehub_short_field_names() {
        let raw = financehub(json!({"sym": "MSFT", "last": 312.5, "ccy": "USD"}));
        let quote = normalize(&raw, QuoteSource::Primary, &options("MSFT")).unwrap();

        assert_eq!(quote.symbol, "MSFT");
        assert_eq!(quote.price, dec!(312.5));
        assert_eq!(quote.currency, "USD");
        assert_eq!(quote.source, QuoteSource::Primary);
        assert_eq!(quote.timestamp, received());
        assert!(quote.history.is_none());
    }

    #[test]
    fn test_financehub_long_field_names_and_timestamp() {
        let raw = financehub(json!({
            "symbol": "msft",
            "price": "312.50",
            "currency": "usd",
            "timestamp": "2024-03-01T15:30:00Z",
            "change": -1.25
        }));
        let quote = normalize(&raw, QuoteSource::Primary, &options("MSFT")).unwrap();

        assert_eq!(quote.price, dec!(312.50));
        assert_eq!(quote.currency, "USD");
        assert_eq!(quote.change, Some(dec!(-1.25)));
        assert_eq!(quote.timestamp.to_rfc3339(), "2024-03-01T15:30:00+00:00");
    }

    #[test]
    fn test_missing_currency_uses_configured_default() {
        let raw = financehub(json!({"sym": "SAP", "last": 120}));
        let quote = normalize(&raw, QuoteSource::Primary, &options("SAP")).unwrap();
        assert_eq!(quote.currency, "EUR");
    }

    #[test]
    fn test_null_price_is_malformed_not_zero() {
        let raw = financehub(json!({"sym": "MSFT", "last": null, "ccy": "USD"}));
        let err = normalize(&raw, QuoteSource::Primary, &options("MSFT")).unwrap_err();
        assert_eq!(err.kind, crate::error::FailureKind::MalformedResponse);
    }

    #[test]
    fn test_non_numeric_and_negative_price_rejected() {
        for body in [
            json!({"sym": "MSFT", "last": "n/a"}),
            json!({"sym": "MSFT", "last": true}),
            json!({"sym": "MSFT", "last": -3.0}),
            json!({"last": 312.5}),
            json!([1, 2, 3]),
        ] {
            let err = normalize(&financehub(body.clone()), QuoteSource::Primary, &options("MSFT"))
                .unwrap_err();
            assert_eq!(
                err.kind,
                crate::error::FailureKind::MalformedResponse,
                "accepted {}",
                body
            );
        }
    }

    #[test]
    fn test_symbol_mismatch_rejected() {
        let raw = financehub(json!({"sym": "AAPL", "last": 190.0}));
        assert!(normalize(&raw, QuoteSource::Primary, &options("MSFT")).is_err());
    }

    #[test]
    fn test_financehub_candles_become_sorted_history() {
        let raw = financehub(json!({
            "sym": "MSFT",
            "last": 312.5,
            "candles": [
                {"ts": 1_699_990_000, "close": 311.0, "volume": 10},
                {"ts": "2023-11-13T00:00:00Z", "close": 305.0},
                {"ts": 1_699_995_000, "close": null}
            ]
        }));
        let mut opts = options("MSFT");
        opts.include_history = true;

        let quote = normalize(&raw, QuoteSource::Primary, &opts).unwrap();
        let history = quote.history.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].timestamp < history[1].timestamp);
        assert_eq!(history[1].price, dec!(311.0));
        assert_eq!(history[1].volume, Some(10));
        // no reported timestamp: newest candle wins over receive time
        assert_eq!(quote.timestamp, history[1].timestamp);
    }

    #[test]
    fn test_yahoo_chart_meta() {
        let mut opts = options("MSFT");
        opts.include_volume = true;

        let quote = normalize(&yahoo(yahoo_chart(json!(312.5))), QuoteSource::Fallback, &opts).unwrap();
        assert_eq!(quote.price, dec!(312.5));
        assert_eq!(quote.currency, "USD");
        assert_eq!(quote.volume, Some(21_000_000));
        assert_eq!(quote.source, QuoteSource::Fallback);
        assert_eq!(quote.timestamp.timestamp(), 1_700_000_300);
    }

    #[test]
    fn test_yahoo_market_time_accepts_float_and_string() {
        for market_time in [json!(1_700_000_300.0), json!("1700000300")] {
            let mut body = yahoo_chart(json!(312.5));
            body["chart"]["result"][0]["meta"]["regularMarketTime"] = market_time.clone();

            let quote = normalize(&yahoo(body), QuoteSource::Fallback, &options("MSFT"))
                .unwrap_or_else(|e| panic!("{} rejected: {}", market_time, e.message));
            assert_eq!(quote.timestamp.timestamp(), 1_700_000_300);
        }
    }

    #[test]
    fn test_yahoo_missing_market_price_uses_last_close() {
        let quote = normalize(
            &yahoo(yahoo_chart(Value::Null)),
            QuoteSource::Fallback,
            &options("MSFT"),
        )
        .unwrap();
        assert_eq!(quote.price, dec!(311.75));
    }

    #[test]
    fn test_yahoo_not_found() {
        let body = json!({
            "chart": {
                "result": null,
                "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}
            }
        });
        let err = normalize(&yahoo(body), QuoteSource::Fallback, &options("ZZZZ")).unwrap_err();
        assert_eq!(err.kind, crate::error::FailureKind::NotFound);
    }

    #[test]
    fn test_yahoo_empty_result_is_malformed() {
        let body = json!({"chart": {"result": [], "error": null}});
        let err = normalize(&yahoo(body), QuoteSource::Fallback, &options("MSFT")).unwrap_err();
        assert_eq!(err.kind, crate::error::FailureKind::MalformedResponse);
    }

    #[test]
    fn test_as_of_picks_point_at_or_before() {
        let mut opts = options("MSFT");
        opts.as_of = DateTime::<Utc>::from_timestamp(1_699_950_000, 0);

        let quote = normalize(&yahoo(yahoo_chart(json!(312.5))), QuoteSource::Fallback, &opts).unwrap();
        assert_eq!(quote.price, dec!(310.25));
        assert_eq!(quote.timestamp.timestamp(), 1_699_900_000);

        opts.as_of = DateTime::<Utc>::from_timestamp(1_600_000_000, 0);
        let err = normalize(&yahoo(yahoo_chart(json!(312.5))), QuoteSource::Fallback, &opts).unwrap_err();
        assert_eq!(err.kind, crate::error::FailureKind::NotFound);
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let raw = financehub(json!({"sym": "MSFT", "last": 312.5, "ccy": "USD"}));
        let first = normalize(&raw, QuoteSource::Primary, &options("MSFT")).unwrap();
        let second = normalize(&raw, QuoteSource::Primary, &options("MSFT")).unwrap();
        assert_eq!(first, second);
    }
}
