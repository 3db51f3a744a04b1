// Dashboard Payloads
// Typed views of cached dashboard data, realistic-bounds validation and placeholder synthesis

use crate::utils::error::{CacheError, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// Status tag carried by every synthesized payload
pub const FALLBACK_STATUS: &str = "fallback_data";

pub const MAX_SYMBOL_COUNT: i64 = 10_000;
pub const MAX_VOLUME: f64 = 1e15;
pub const MAX_SCORE: f64 = 100.0;
/// Exclusive bound on the magnitude of a percentage price change
pub const MAX_PRICE_CHANGE_PCT: f64 = 1000.0;

/// Kind of data stored under a dashboard key; selects validator and placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Overview,
    Signals,
    Movers,
    Generic,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Overview => "overview",
            DataType::Signals => "signals",
            DataType::Movers => "movers",
            DataType::Generic => "generic",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "overview" => Ok(DataType::Overview),
            "signals" => Ok(DataType::Signals),
            "movers" => Ok(DataType::Movers),
            "generic" => Ok(DataType::Generic),
            other => Err(CacheError::config(format!("Unknown data type: {}", other))),
        }
    }
}

/// A typed dashboard payload
pub trait DashboardData: Serialize + DeserializeOwned + Sized {
    const DATA_TYPE: DataType;

    /// Reject values outside realistic bounds
    fn validate(&self) -> Result<()>;

    /// Minimal schema-valid value tagged with [`FALLBACK_STATUS`]
    fn placeholder() -> Self;

    fn is_placeholder(&self) -> bool;
}

/// Market-wide summary
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketOverview {
    #[serde(default)]
    pub total_symbols: Option<i64>,
    #[serde(default)]
    pub active_symbols: Option<i64>,
    #[serde(default)]
    pub total_volume_24h: Option<f64>,
    #[serde(default)]
    pub total_market_cap: Option<f64>,
    #[serde(default)]
    pub avg_price_change_24h: Option<f64>,
    #[serde(default)]
    pub gainers_count: Option<i64>,
    #[serde(default)]
    pub losers_count: Option<i64>,
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub generated_at: Option<String>,
}

/// Scored trading signals
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SignalBoard {
    #[serde(default)]
    pub signals: Vec<Signal>,
    #[serde(default)]
    pub total_signals: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub generated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub price_change_24h: Option<f64>,
    #[serde(default)]
    pub volume_24h: Option<f64>,
}

/// Biggest gainers and losers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TopMovers {
    #[serde(default)]
    pub gainers: Vec<Mover>,
    #[serde(default)]
    pub losers: Vec<Mover>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub generated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Mover {
    pub symbol: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub price_change_24h: Option<f64>,
    #[serde(default)]
    pub volume_24h: Option<f64>,
}

fn check_count(field: &str, value: Option<i64>) -> Result<()> {
    match value {
        Some(v) if !(0..=MAX_SYMBOL_COUNT).contains(&v) => Err(CacheError::validation(format!(
            "{} = {} outside [0, {}]",
            field, v, MAX_SYMBOL_COUNT
        ))),
        _ => Ok(()),
    }
}

fn check_volume(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !(0.0..=MAX_VOLUME).contains(&v) => Err(CacheError::validation(format!(
            "{} = {} outside [0, {:e}]",
            field, v, MAX_VOLUME
        ))),
        _ => Ok(()),
    }
}

fn check_score(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !(0.0..=MAX_SCORE).contains(&v) => Err(CacheError::validation(format!(
            "{} = {} outside [0, {}]",
            field, v, MAX_SCORE
        ))),
        _ => Ok(()),
    }
}

fn check_price_change(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !(v.abs() < MAX_PRICE_CHANGE_PCT) => Err(CacheError::validation(format!(
            "{} = {}% exceeds {}%",
            field, v, MAX_PRICE_CHANGE_PCT
        ))),
        _ => Ok(()),
    }
}

fn check_list_len(field: &str, len: usize) -> Result<()> {
    check_count(field, Some(len as i64))
}

fn now_rfc3339() -> Option<String> {
    Some(Utc::now().to_rfc3339())
}

impl DashboardData for MarketOverview {
    const DATA_TYPE: DataType = DataType::Overview;

    fn validate(&self) -> Result<()> {
        check_count("total_symbols", self.total_symbols)?;
        check_count("active_symbols", self.active_symbols)?;
        check_count("gainers_count", self.gainers_count)?;
        check_count("losers_count", self.losers_count)?;
        check_volume("total_volume_24h", self.total_volume_24h)?;
        check_volume("total_market_cap", self.total_market_cap)?;
        check_price_change("avg_price_change_24h", self.avg_price_change_24h)?;
        Ok(())
    }

    fn placeholder() -> Self {
        Self {
            total_symbols: Some(0),
            active_symbols: Some(0),
            total_volume_24h: Some(0.0),
            total_market_cap: Some(0.0),
            avg_price_change_24h: Some(0.0),
            gainers_count: Some(0),
            losers_count: Some(0),
            sentiment: Some("neutral".to_string()),
            status: Some(FALLBACK_STATUS.to_string()),
            generated_at: now_rfc3339(),
        }
    }

    fn is_placeholder(&self) -> bool {
        self.status.as_deref() == Some(FALLBACK_STATUS)
    }
}

impl DashboardData for SignalBoard {
    const DATA_TYPE: DataType = DataType::Signals;

    fn validate(&self) -> Result<()> {
        check_list_len("signals", self.signals.len())?;
        check_count("total_signals", self.total_signals)?;
        for signal in &self.signals {
            check_score(&format!("{}.score", signal.symbol), signal.score)?;
            check_price_change(
                &format!("{}.price_change_24h", signal.symbol),
                signal.price_change_24h,
            )?;
            check_volume(&format!("{}.volume_24h", signal.symbol), signal.volume_24h)?;
        }
        Ok(())
    }

    fn placeholder() -> Self {
        Self {
            signals: Vec::new(),
            total_signals: Some(0),
            status: Some(FALLBACK_STATUS.to_string()),
            generated_at: now_rfc3339(),
        }
    }

    fn is_placeholder(&self) -> bool {
        self.status.as_deref() == Some(FALLBACK_STATUS)
    }
}

impl DashboardData for TopMovers {
    const DATA_TYPE: DataType = DataType::Movers;

    fn validate(&self) -> Result<()> {
        check_list_len("gainers", self.gainers.len())?;
        check_list_len("losers", self.losers.len())?;
        for mover in self.gainers.iter().chain(self.losers.iter()) {
            check_price_change(
                &format!("{}.price_change_24h", mover.symbol),
                mover.price_change_24h,
            )?;
            check_volume(&format!("{}.volume_24h", mover.symbol), mover.volume_24h)?;
            if let Some(price) = mover.price {
                if price < 0.0 {
                    return Err(CacheError::validation(format!(
                        "{}.price = {} is negative",
                        mover.symbol, price
                    )));
                }
            }
        }
        Ok(())
    }

    fn placeholder() -> Self {
        Self {
            gainers: Vec::new(),
            losers: Vec::new(),
            status: Some(FALLBACK_STATUS.to_string()),
            generated_at: now_rfc3339(),
        }
    }

    fn is_placeholder(&self) -> bool {
        self.status.as_deref() == Some(FALLBACK_STATUS)
    }
}

fn decode_and_validate<T: DashboardData>(value: &Value) -> Result<()> {
    let typed: T = serde_json::from_value(value.clone())
        .map_err(|e| CacheError::validation(format!("{} shape mismatch: {}", T::DATA_TYPE, e)))?;
    typed.validate()
}

/// Validate a raw cached value against the bounds for `data_type`
pub fn validate_value(data_type: DataType, value: &Value) -> Result<()> {
    match data_type {
        DataType::Overview => decode_and_validate::<MarketOverview>(value),
        DataType::Signals => decode_and_validate::<SignalBoard>(value),
        DataType::Movers => decode_and_validate::<TopMovers>(value),
        DataType::Generic => {
            if value.is_null() {
                Err(CacheError::validation("null value"))
            } else {
                Ok(())
            }
        }
    }
}

fn to_value<T: DashboardData>(data: T) -> Value {
    // These structs only hold strings, numbers and vectors; serialization cannot fail
    serde_json::to_value(data).unwrap_or_else(|_| json!({ "status": FALLBACK_STATUS }))
}

/// Synthesize the placeholder for `data_type`.
///
/// Generic keys reuse the caller's default: objects gain the status tag,
/// anything else is wrapped.
pub fn placeholder_value(data_type: DataType, default: &Value) -> Value {
    match data_type {
        DataType::Overview => to_value(MarketOverview::placeholder()),
        DataType::Signals => to_value(SignalBoard::placeholder()),
        DataType::Movers => to_value(TopMovers::placeholder()),
        DataType::Generic => match default {
            Value::Object(map) => {
                let mut map = map.clone();
                map.insert("status".to_string(), json!(FALLBACK_STATUS));
                Value::Object(map)
            }
            other => json!({ "value": other, "status": FALLBACK_STATUS }),
        },
    }
}

/// Whether a value was synthesized rather than read
pub fn is_placeholder_value(value: &Value) -> bool {
    value.get("status").and_then(Value::as_str) == Some(FALLBACK_STATUS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overview_rejects_unrealistic_symbol_count() {
        let value = json!({ "total_symbols": 50000, "total_volume_24h": 1.0e9 });
        let err = validate_value(DataType::Overview, &value).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("total_symbols"));
    }

    #[test]
    fn test_overview_accepts_realistic_values() {
        let value = json!({
            "total_symbols": 412,
            "total_volume_24h": 8.2e10,
            "avg_price_change_24h": -3.5,
            "unrelated_field": "kept"
        });
        assert!(validate_value(DataType::Overview, &value).is_ok());
    }

    #[test]
    fn test_price_change_bound_is_exclusive() {
        let ok = json!({ "avg_price_change_24h": 999.99 });
        let bad = json!({ "avg_price_change_24h": -1000.0 });
        assert!(validate_value(DataType::Overview, &ok).is_ok());
        assert!(validate_value(DataType::Overview, &bad).is_err());
    }

    #[test]
    fn test_signal_score_bounds() {
        let bad = json!({ "signals": [{ "symbol": "BTCUSDT", "score": 140.0 }] });
        assert!(validate_value(DataType::Signals, &bad).is_err());

        let ok = json!({ "signals": [{ "symbol": "BTCUSDT", "score": 72.5, "volume_24h": 3.1e10 }] });
        assert!(validate_value(DataType::Signals, &ok).is_ok());
    }

    #[test]
    fn test_movers_shape_mismatch_is_validation_failure() {
        let bad = json!({ "gainers": "not a list" });
        assert!(validate_value(DataType::Movers, &bad).unwrap_err().is_validation());
    }

    #[test]
    fn test_overview_placeholder_is_zeroed_and_tagged() {
        let value = placeholder_value(DataType::Overview, &json!({}));
        assert!(is_placeholder_value(&value));
        for (field, v) in value.as_object().unwrap() {
            if let Some(n) = v.as_f64() {
                assert_eq!(n, 0.0, "{} should be zero", field);
            }
        }
        assert_eq!(value["sentiment"], "neutral");
        assert!(validate_value(DataType::Overview, &value).is_ok());
    }

    #[test]
    fn test_generic_placeholder_keeps_default_shape() {
        let value = placeholder_value(DataType::Generic, &json!({ "levels": [] }));
        assert_eq!(value["levels"], json!([]));
        assert!(is_placeholder_value(&value));

        let wrapped = placeholder_value(DataType::Generic, &json!(0));
        assert_eq!(wrapped["value"], json!(0));
        assert!(is_placeholder_value(&wrapped));
    }

    #[test]
    fn test_data_type_parsing() {
        assert_eq!("overview".parse::<DataType>().unwrap(), DataType::Overview);
        assert_eq!("MOVERS".parse::<DataType>().unwrap(), DataType::Movers);
        assert!("candles".parse::<DataType>().is_err());
    }
}
