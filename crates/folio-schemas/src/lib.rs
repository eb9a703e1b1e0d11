//! Wire contract for the trade-ingestion pipeline.
//!
//! Producers (the API write path and the AI-extraction worker) publish JSON
//! trade intents onto the trade exchange; everything the consumer side needs
//! to decode and validate those messages lives here.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

/// Routing key for a single trade-creation event (payload: one object).
pub const ROUTING_KEY_SINGLE: &str = "trade.create.single";
/// Routing key for a batched trade-creation event (payload: JSON array).
pub const ROUTING_KEY_BULK: &str = "trade.create.bulk";
/// Binding pattern matching all trade-creation routing keys.
pub const ROUTING_KEY_PATTERN: &str = "trade.create.*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

/// One trade-creation intent as it travels on the wire.
///
/// `stock_symbol` is the external instrument identifier; it must be resolved
/// to an internal instrument id before anything is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeIntent {
    pub stock_symbol: String,
    pub trade_type: TradeSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub trade_date: NaiveDate,
    pub user_id: Uuid,
}

impl TradeIntent {
    /// Field-level validation, applied after JSON decode and before any
    /// persistence. Mirrors the producer-side contract: positive quantity,
    /// positive price with at most 2 decimal places.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.quantity <= Decimal::ZERO {
            return Err(DecodeError::NonPositiveField {
                field: "quantity",
                value: self.quantity,
            });
        }
        if self.price <= Decimal::ZERO {
            return Err(DecodeError::NonPositiveField {
                field: "price",
                value: self.price,
            });
        }
        if self.price.normalize().scale() > 2 {
            return Err(DecodeError::PriceScale { value: self.price });
        }
        Ok(())
    }
}

/// Routing-key dispatch, decoded once at the boundary.
///
/// Unrecognized keys are an explicit variant, not a fallthrough: the worker
/// acks and drops them for forward compatibility with future routing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeRoute {
    SingleCreate,
    BulkCreate,
    Unknown,
}

impl TradeRoute {
    pub fn from_routing_key(key: &str) -> Self {
        match key {
            ROUTING_KEY_SINGLE => TradeRoute::SingleCreate,
            ROUTING_KEY_BULK => TradeRoute::BulkCreate,
            _ => TradeRoute::Unknown,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bulk payload must contain at least one trade intent")]
    EmptyBatch,

    #[error("cannot decode a payload for an unrecognized routing key")]
    UnknownRoute,

    #[error("{field} must be positive, got {value}")]
    NonPositiveField { field: &'static str, value: Decimal },

    #[error("price {value} has more than 2 decimal places")]
    PriceScale { value: Decimal },
}

/// Normalize a message body into a uniform list of validated trade intents.
///
/// Single-create expects one JSON object, bulk-create a non-empty JSON array.
/// Any malformed or invalid element fails the whole message as a unit.
pub fn decode_intents(route: TradeRoute, payload: &[u8]) -> Result<Vec<TradeIntent>, DecodeError> {
    let intents = match route {
        TradeRoute::SingleCreate => vec![serde_json::from_slice::<TradeIntent>(payload)?],
        TradeRoute::BulkCreate => {
            let batch: Vec<TradeIntent> = serde_json::from_slice(payload)?;
            if batch.is_empty() {
                return Err(DecodeError::EmptyBatch);
            }
            batch
        }
        TradeRoute::Unknown => return Err(DecodeError::UnknownRoute),
    };

    for intent in &intents {
        intent.validate()?;
    }

    Ok(intents)
}

/// Distinct symbols referenced by a batch, in deterministic order, so the
/// worker can resolve them in one lookup.
pub fn distinct_symbols(intents: &[TradeIntent]) -> Vec<String> {
    let set: BTreeSet<&str> = intents.iter().map(|i| i.stock_symbol.as_str()).collect();
    set.into_iter().map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_keys_dispatch_to_closed_variants() {
        assert_eq!(
            TradeRoute::from_routing_key("trade.create.single"),
            TradeRoute::SingleCreate
        );
        assert_eq!(
            TradeRoute::from_routing_key("trade.create.bulk"),
            TradeRoute::BulkCreate
        );
        assert_eq!(
            TradeRoute::from_routing_key("trade.update.single"),
            TradeRoute::Unknown
        );
        assert_eq!(TradeRoute::from_routing_key(""), TradeRoute::Unknown);
    }

    #[test]
    fn side_round_trips_through_lowercase_json() {
        let buy: TradeSide = serde_json::from_str("\"buy\"").unwrap();
        assert_eq!(buy, TradeSide::Buy);
        assert_eq!(serde_json::to_string(&TradeSide::Sell).unwrap(), "\"sell\"");
    }

    #[test]
    fn distinct_symbols_dedupes_and_sorts() {
        let payload = br#"[
            {"stockSymbol":"TSM","tradeType":"buy","quantity":1,"price":10.0,"tradeDate":"2025-01-06","userId":"0195b5b4-0000-7000-8000-000000000001"},
            {"stockSymbol":"AAPL","tradeType":"buy","quantity":1,"price":10.0,"tradeDate":"2025-01-06","userId":"0195b5b4-0000-7000-8000-000000000001"},
            {"stockSymbol":"TSM","tradeType":"sell","quantity":1,"price":11.0,"tradeDate":"2025-01-07","userId":"0195b5b4-0000-7000-8000-000000000001"}
        ]"#;
        let intents = decode_intents(TradeRoute::BulkCreate, payload).unwrap();
        assert_eq!(distinct_symbols(&intents), vec!["AAPL", "TSM"]);
    }
}
