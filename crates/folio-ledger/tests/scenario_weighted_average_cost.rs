//! Scenario: Weighted-Average Cost Basis
//!
//! # Invariant under test
//! For any sequence of buys q₁..qₙ at prices p₁..pₙ applied to an initially
//! empty position, the resulting average cost equals Σ(qᵢ·pᵢ) / Σqᵢ: exactly
//! where the quotients terminate, and to the edge of Decimal's 28 significant
//! digits where they do not. Either way, orders of magnitude beyond what
//! binary floating point could hold over the same sequence.

use folio_ledger::{reconcile, Position, ReconcileOutcome};
use folio_schemas::TradeSide;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Fold a buy sequence through the engine, starting from no position.
fn apply_buys(buys: &[(Decimal, Decimal)]) -> Position {
    let mut position: Option<Position> = None;
    for &(qty, price) in buys {
        match reconcile(position.as_ref(), TradeSide::Buy, qty, price) {
            ReconcileOutcome::Updated(p) => position = Some(p),
            ReconcileOutcome::Untouched => panic!("a buy must always update the position"),
        }
    }
    position.expect("at least one buy was applied")
}

fn expected_average(buys: &[(Decimal, Decimal)]) -> Decimal {
    let notional: Decimal = buys.iter().map(|(q, p)| q * p).sum();
    let total_qty: Decimal = buys.iter().map(|(q, _)| q).sum();
    notional / total_qty
}

/// The incremental average divides at every step, so for non-terminating
/// quotients it can differ from the closed form in the last of Decimal's 28
/// significant digits. 1e-18 is far tighter than binary floats could ever
/// hold over these sequences while leaving that headroom.
fn assert_close(actual: Decimal, expected: Decimal, context: &str) {
    let tolerance = Decimal::new(1, 18);
    assert!(
        (actual - expected).abs() < tolerance,
        "{context}: {actual} differs from {expected} by more than {tolerance}"
    );
}

#[test]
fn two_equal_buys_average_to_midpoint() {
    // Empty position; buy 10 @ 100, then buy 10 @ 200 → 20 held @ 150.
    let position = apply_buys(&[(dec!(10), dec!(100)), (dec!(10), dec!(200))]);
    assert_eq!(position.quantity, dec!(20));
    assert_eq!(position.average_cost, dec!(150));
}

#[test]
fn uneven_buy_sequence_matches_closed_form() {
    let buys = [
        (dec!(3), dec!(91.37)),
        (dec!(11), dec!(88.02)),
        (dec!(7), dec!(102.50)),
        (dec!(1), dec!(79.99)),
        (dec!(25), dec!(95.00)),
    ];
    let position = apply_buys(&buys);

    assert_eq!(position.quantity, dec!(47));
    assert_close(
        position.average_cost,
        expected_average(&buys),
        "incremental weighted average must match the closed form",
    );
}

#[test]
fn long_sequence_of_awkward_prices_does_not_drift() {
    // 0.10 is the classic binary-float repeating fraction; a hundred buys at
    // prices stepping by 0.01 would smear an f64 cost basis.
    let buys: Vec<(Decimal, Decimal)> = (0..100i64)
        .map(|i| (dec!(1), dec!(0.10) + Decimal::new(i, 2)))
        .collect();
    let position = apply_buys(&buys);

    assert_eq!(position.quantity, dec!(100));
    assert_close(
        position.average_cost,
        expected_average(&buys),
        "hundred-step average must not drift from the closed form",
    );
}

#[test]
fn buys_after_a_sell_weight_against_remaining_quantity() {
    // Sell does not move the cost basis, so a later buy averages against the
    // clamped remainder at the old cost.
    let mut position = apply_buys(&[(dec!(10), dec!(100))]);

    position = match reconcile(Some(&position), TradeSide::Sell, dec!(5), dec!(140)) {
        ReconcileOutcome::Updated(p) => p,
        ReconcileOutcome::Untouched => panic!("sell against a held position must update it"),
    };
    assert_eq!(position.quantity, dec!(5));
    assert_eq!(position.average_cost, dec!(100));

    position = match reconcile(Some(&position), TradeSide::Buy, dec!(5), dec!(200)) {
        ReconcileOutcome::Updated(p) => p,
        ReconcileOutcome::Untouched => unreachable!(),
    };
    assert_eq!(position.quantity, dec!(10));
    assert_eq!(position.average_cost, dec!(150));
}
