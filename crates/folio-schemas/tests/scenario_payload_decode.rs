//! Scenario: Payload Decode Fails As A Unit
//!
//! # Invariant under test
//! A message body decodes into a uniform list of validated trade intents, or
//! fails whole. A single malformed or invalid element must poison the entire
//! batch — partial batches never reach persistence.

use folio_schemas::{decode_intents, DecodeError, TradeRoute, TradeSide};
use rust_decimal_macros::dec;

const USER: &str = "0195b5b4-0000-7000-8000-000000000001";

fn single(body: &str) -> Result<Vec<folio_schemas::TradeIntent>, DecodeError> {
    decode_intents(TradeRoute::SingleCreate, body.as_bytes())
}

fn bulk(body: &str) -> Result<Vec<folio_schemas::TradeIntent>, DecodeError> {
    decode_intents(TradeRoute::BulkCreate, body.as_bytes())
}

#[test]
fn single_object_decodes_to_one_intent() {
    let body = format!(
        r#"{{"stockSymbol":"TSM","tradeType":"buy","quantity":10,"price":100.25,"tradeDate":"2025-03-14","userId":"{USER}"}}"#
    );
    let intents = single(&body).expect("well-formed single payload must decode");

    assert_eq!(intents.len(), 1);
    let intent = &intents[0];
    assert_eq!(intent.stock_symbol, "TSM");
    assert_eq!(intent.trade_type, TradeSide::Buy);
    assert_eq!(intent.quantity, dec!(10));
    assert_eq!(intent.price, dec!(100.25));
}

#[test]
fn bulk_array_decodes_to_many_intents() {
    let body = format!(
        r#"[
            {{"stockSymbol":"TSM","tradeType":"buy","quantity":10,"price":100,"tradeDate":"2025-03-14","userId":"{USER}"}},
            {{"stockSymbol":"AAPL","tradeType":"sell","quantity":3,"price":212.5,"tradeDate":"2025-03-14","userId":"{USER}"}}
        ]"#
    );
    let intents = bulk(&body).expect("well-formed bulk payload must decode");

    assert_eq!(intents.len(), 2);
    assert_eq!(intents[1].trade_type, TradeSide::Sell);
    assert_eq!(intents[1].price, dec!(212.5));
}

#[test]
fn missing_quantity_fails_the_message() {
    // Scenario: a producer drops a required field. The decode error is
    // permanent — this message belongs in the dead-letter queue, never in a
    // retry loop.
    let body = format!(
        r#"{{"stockSymbol":"TSM","tradeType":"buy","price":100.25,"tradeDate":"2025-03-14","userId":"{USER}"}}"#
    );
    assert!(
        matches!(single(&body), Err(DecodeError::Json(_))),
        "missing quantity must fail decode"
    );
}

#[test]
fn one_invalid_element_poisons_the_whole_batch() {
    let body = format!(
        r#"[
            {{"stockSymbol":"TSM","tradeType":"buy","quantity":10,"price":100,"tradeDate":"2025-03-14","userId":"{USER}"}},
            {{"stockSymbol":"AAPL","tradeType":"buy","quantity":0,"price":212.5,"tradeDate":"2025-03-14","userId":"{USER}"}}
        ]"#
    );
    assert!(
        matches!(
            bulk(&body),
            Err(DecodeError::NonPositiveField { field: "quantity", .. })
        ),
        "a zero-quantity element must fail the entire batch"
    );
}

#[test]
fn empty_bulk_array_is_rejected() {
    assert!(matches!(bulk("[]"), Err(DecodeError::EmptyBatch)));
}

#[test]
fn non_positive_price_is_rejected() {
    let body = format!(
        r#"{{"stockSymbol":"TSM","tradeType":"sell","quantity":5,"price":-1,"tradeDate":"2025-03-14","userId":"{USER}"}}"#
    );
    assert!(matches!(
        single(&body),
        Err(DecodeError::NonPositiveField { field: "price", .. })
    ));
}

#[test]
fn price_with_three_decimal_places_is_rejected() {
    let body = format!(
        r#"{{"stockSymbol":"TSM","tradeType":"buy","quantity":5,"price":100.125,"tradeDate":"2025-03-14","userId":"{USER}"}}"#
    );
    assert!(matches!(single(&body), Err(DecodeError::PriceScale { .. })));
}

#[test]
fn malformed_json_is_rejected() {
    assert!(matches!(single("{not json"), Err(DecodeError::Json(_))));
}

#[test]
fn unknown_route_never_decodes() {
    let err = decode_intents(TradeRoute::Unknown, b"{}").unwrap_err();
    assert!(matches!(err, DecodeError::UnknownRoute));
}
