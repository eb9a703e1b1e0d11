//! folio-ledger
//!
//! Position reconciliation for the trade-ingestion pipeline.
//! - One position per (user, instrument): quantity + weighted-average cost
//! - Pure deterministic logic (no IO, no time, no persistence wiring)
//!
//! The worker reads the current position row, calls [`reconcile`], and writes
//! the result back inside the same transaction as the trade insert. Keeping
//! the arithmetic here makes the accounting testable without a database.

use folio_schemas::TradeSide;
use rust_decimal::Decimal;

/// A user's aggregated holding of one instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    /// Quantity held. Never negative.
    pub quantity: Decimal,
    /// Quantity-weighted average of all buy prices. Sells leave it untouched.
    pub average_cost: Decimal,
}

/// What a trade did to the position row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No ledger effect: a sell against a position that does not exist.
    Untouched,
    /// The position row to insert or update.
    Updated(Position),
}

/// Apply one trade to the current position (or none).
///
/// - First buy creates the position at `(quantity, price)`.
/// - A sell with no position is a no-op: nothing is held, nothing changes.
/// - Buys recompute the average cost as a quantity-weighted mean.
/// - Sells reduce quantity, clamped at zero; overselling is tolerated by
///   policy, not an error. Average cost never moves on a sell.
pub fn reconcile(
    existing: Option<&Position>,
    side: TradeSide,
    quantity: Decimal,
    price: Decimal,
) -> ReconcileOutcome {
    let Some(position) = existing else {
        return match side {
            TradeSide::Buy => ReconcileOutcome::Updated(Position {
                quantity,
                average_cost: price,
            }),
            TradeSide::Sell => ReconcileOutcome::Untouched,
        };
    };

    match side {
        TradeSide::Buy => {
            let new_quantity = position.quantity + quantity;
            let new_average_cost =
                (position.quantity * position.average_cost + quantity * price) / new_quantity;
            ReconcileOutcome::Updated(Position {
                quantity: new_quantity,
                average_cost: new_average_cost,
            })
        }
        TradeSide::Sell => {
            let new_quantity = (position.quantity - quantity).max(Decimal::ZERO);
            ReconcileOutcome::Updated(Position {
                quantity: new_quantity,
                average_cost: position.average_cost,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn first_buy_creates_position_at_trade_price() {
        let outcome = reconcile(None, TradeSide::Buy, dec!(10), dec!(100.25));
        assert_eq!(
            outcome,
            ReconcileOutcome::Updated(Position {
                quantity: dec!(10),
                average_cost: dec!(100.25),
            })
        );
    }

    #[test]
    fn sell_without_position_is_untouched() {
        assert_eq!(
            reconcile(None, TradeSide::Sell, dec!(999), dec!(1)),
            ReconcileOutcome::Untouched
        );
    }

    #[test]
    fn sell_leaves_average_cost_alone() {
        let pos = Position {
            quantity: dec!(10),
            average_cost: dec!(150),
        };
        let outcome = reconcile(Some(&pos), TradeSide::Sell, dec!(4), dec!(310));
        assert_eq!(
            outcome,
            ReconcileOutcome::Updated(Position {
                quantity: dec!(6),
                average_cost: dec!(150),
            })
        );
    }
}
