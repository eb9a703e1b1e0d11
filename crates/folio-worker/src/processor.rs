//! Per-message persistence pipeline: decode → resolve instruments → one
//! transaction covering every trade insert and position update.

use anyhow::Context;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, warn};

use folio_db::NewTrade;
use folio_ledger::{reconcile, Position, ReconcileOutcome};
use folio_schemas::{decode_intents, distinct_symbols, DecodeError, TradeRoute};

#[derive(Debug, Error)]
pub enum ProcessError {
    /// Malformed or invalid payload. Permanent: the message can never
    /// succeed, so it belongs in the dead-letter queue.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The batch referenced a symbol that does not resolve to an instrument.
    /// Fails the whole message; no partial batch is ever applied.
    #[error("unresolved instrument symbol: {0}")]
    UnknownSymbol(String),

    /// Persistence failure. Routed to the dead-letter queue like the
    /// permanent errors above; transient-vs-permanent differentiation with
    /// bounded retry is a known gap inherited from the source system.
    #[error("persistence failure: {0}")]
    Db(#[from] anyhow::Error),
}

/// What a successfully processed message did.
#[derive(Debug, Clone, Copy)]
pub struct ProcessedBatch {
    pub trades: usize,
    pub positions_updated: usize,
}

/// Stateless over the pool: one processor handles every message the consumer
/// feeds it, one transaction at a time.
#[derive(Clone)]
pub struct TradeProcessor {
    pool: PgPool,
}

impl TradeProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run one message through decode, resolution, persistence and
    /// reconciliation. Commits before returning `Ok`; any error leaves the
    /// database untouched (the transaction rolls back on drop).
    pub async fn process(
        &self,
        route: TradeRoute,
        payload: &[u8],
    ) -> Result<ProcessedBatch, ProcessError> {
        let intents = decode_intents(route, payload)?;

        // One lookup for the whole batch. A single unresolved symbol fails
        // the message as a unit.
        let symbols = distinct_symbols(&intents);
        let instruments = folio_db::resolve_instruments(&self.pool, &symbols).await?;
        for symbol in &symbols {
            if !instruments.contains_key(symbol) {
                return Err(ProcessError::UnknownSymbol(symbol.clone()));
            }
        }

        let mut tx = self.pool.begin().await.context("begin trade transaction")?;

        let mut positions_updated = 0usize;
        for intent in &intents {
            let instrument_id = instruments[&intent.stock_symbol];

            let trade_id = folio_db::insert_trade(
                &mut tx,
                &NewTrade {
                    user_id: intent.user_id,
                    instrument_id,
                    side: intent.trade_type,
                    quantity: intent.quantity,
                    price: intent.price,
                    trade_date: intent.trade_date,
                },
            )
            .await?;

            let current = folio_db::fetch_position(&mut tx, intent.user_id, instrument_id).await?;
            let existing = current.map(|row| Position {
                quantity: row.quantity,
                average_cost: row.average_cost,
            });

            match reconcile(
                existing.as_ref(),
                intent.trade_type,
                intent.quantity,
                intent.price,
            ) {
                ReconcileOutcome::Untouched => {
                    // Possibly an erroneous short sell; surfaced to operators
                    // but not a reason to poison the message.
                    warn!(
                        user_id = %intent.user_id,
                        symbol = %intent.stock_symbol,
                        quantity = %intent.quantity,
                        "sell against empty position; ledger untouched"
                    );
                }
                ReconcileOutcome::Updated(position) => {
                    folio_db::upsert_position(
                        &mut tx,
                        intent.user_id,
                        instrument_id,
                        position.quantity,
                        position.average_cost,
                    )
                    .await?;
                    positions_updated += 1;
                }
            }

            debug!(trade_id, symbol = %intent.stock_symbol, "trade persisted");
        }

        tx.commit().await.context("commit trade transaction")?;

        Ok(ProcessedBatch {
            trades: intents.len(),
            positions_updated,
        })
    }
}
