//! Trade-pipeline topology.
//!
//! Declared idempotently at worker startup and again after every reconnect —
//! a fresh channel has no memory of prior declarations or subscriptions.
//! The names below are the wire contract; external producers (the API write
//! path, the AI-extraction worker) publish against them and must not change.

use lapin::options::{BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};
use tracing::info;

use crate::BrokerError;
use folio_schemas::ROUTING_KEY_PATTERN;

/// Durable topic exchange trade-creation events are published to.
pub const TRADE_EXCHANGE: &str = "trade_exchange";
/// Durable queue the trade worker consumes from.
pub const TRADE_QUEUE: &str = "trade_processing_queue";
/// Durable direct exchange rejected messages are dead-lettered through.
pub const TRADE_DLX: &str = "trade_dlx";
/// Durable queue holding dead-lettered messages for operator inspection.
pub const TRADE_DLQ: &str = "trade_dead_letter_queue";

/// Messages handed to one consumer before an ack is required. Serializing
/// message handling per worker instance is what makes the position
/// read-modify-write safe without extra locking; scaling out consumers
/// requires row-level locks instead.
pub const PREFETCH_COUNT: u16 = 1;

fn durable_exchange() -> ExchangeDeclareOptions {
    ExchangeDeclareOptions {
        durable: true,
        ..Default::default()
    }
}

/// Dead-letter arguments for the main queue.
fn dead_letter_args() -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(TRADE_DLX.into()),
    );
    args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(TRADE_DLQ.into()),
    );
    args
}

/// Declare the full trade topology on `channel` and set its prefetch.
///
/// Safe to repeat: every declaration is idempotent. The dead-letter pair is
/// declared first so the main queue's arguments always point at something
/// that exists.
pub async fn declare_trade_topology(channel: &Channel) -> Result<(), BrokerError> {
    channel
        .exchange_declare(
            TRADE_DLX,
            ExchangeKind::Direct,
            durable_exchange(),
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_declare(
            TRADE_DLQ,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_bind(
            TRADE_DLQ,
            TRADE_DLX,
            TRADE_DLQ,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    channel
        .exchange_declare(
            TRADE_EXCHANGE,
            ExchangeKind::Topic,
            durable_exchange(),
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_declare(
            TRADE_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            dead_letter_args(),
        )
        .await?;
    channel
        .queue_bind(
            TRADE_QUEUE,
            TRADE_EXCHANGE,
            ROUTING_KEY_PATTERN,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    channel
        .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
        .await?;

    info!(
        exchange = TRADE_EXCHANGE,
        queue = TRADE_QUEUE,
        dead_letter_queue = TRADE_DLQ,
        "trade topology declared"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_queue_dead_letters_into_the_declared_pair() {
        use lapin::types::ShortString;

        let args = dead_letter_args();
        assert_eq!(
            args.inner().get(&ShortString::from("x-dead-letter-exchange")),
            Some(&AMQPValue::LongString(TRADE_DLX.into()))
        );
        assert_eq!(
            args.inner().get(&ShortString::from("x-dead-letter-routing-key")),
            Some(&AMQPValue::LongString(TRADE_DLQ.into()))
        );
    }
}
