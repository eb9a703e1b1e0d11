//! The consume loop.
//!
//! Per-message state machine: received → decoded → instruments-resolved →
//! persisted → reconciled → committed → acknowledged. Any failure rolls the
//! transaction back and nacks without requeue, which routes the message to
//! the dead-letter queue — reconciliation is not idempotent, so blind
//! redelivery would double-apply a trade. Unrecognized routing keys are
//! acked and dropped (forward compatibility, not an error).

use std::time::Duration;

use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions};
use lapin::types::FieldTable;
use tokio::sync::watch;
use tracing::{error, info, warn};

use folio_broker::topology::{declare_trade_topology, TRADE_QUEUE};
use folio_broker::{BrokerError, BrokerManager, ChannelPurpose};
use folio_schemas::TradeRoute;

use crate::processor::TradeProcessor;

const CONSUMER_TAG: &str = "folio-trade-worker";

/// Pause between subscription attempts while the connection manager's
/// backoff brings the broker back.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

/// Why a consume session ended.
enum SessionEnd {
    Shutdown,
    ConnectionLost,
}

#[derive(Clone)]
pub struct TradeWorker {
    broker: BrokerManager,
    processor: TradeProcessor,
}

impl TradeWorker {
    pub fn new(broker: BrokerManager, processor: TradeProcessor) -> Self {
        Self { broker, processor }
    }

    /// Consume until `shutdown` flips to true. Each (re)subscription
    /// re-declares the topology first — a fresh channel has no memory of
    /// prior declarations — so consumption resumes without manual restart
    /// after a broker drop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.consume_session(&mut shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::ConnectionLost) => {
                    warn!("consumer stream ended; resubscribing");
                }
                Err(err) => {
                    warn!(error = %err, "could not subscribe to trade queue; retrying");
                }
            }

            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        }

        info!("trade worker stopped");
    }

    async fn consume_session(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, BrokerError> {
        let channel = self
            .broker
            .get_or_create_channel(ChannelPurpose::TradeConsumer)
            .await?;
        declare_trade_topology(&channel).await?;

        let mut consumer = channel
            .basic_consume(
                TRADE_QUEUE,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = TRADE_QUEUE, "consumer ready");

        loop {
            tokio::select! {
                // Stop taking new deliveries; the in-flight message below is
                // never interrupted mid-transaction.
                _ = shutdown.changed() => return Ok(SessionEnd::Shutdown),

                delivery = consumer.next() => match delivery {
                    Some(Ok(delivery)) => self.handle_delivery(delivery).await,
                    Some(Err(err)) => {
                        warn!(error = %err, "delivery stream error");
                        return Ok(SessionEnd::ConnectionLost);
                    }
                    None => return Ok(SessionEnd::ConnectionLost),
                },
            }
        }
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        let routing_key = delivery.routing_key.as_str().to_string();
        let route = TradeRoute::from_routing_key(&routing_key);

        if route == TradeRoute::Unknown {
            warn!(routing_key, "unknown routing key; dropping message");
            if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                warn!(error = %err, "failed to ack dropped message");
            }
            return;
        }

        match self.processor.process(route, &delivery.data).await {
            Ok(batch) => {
                // Ack strictly after commit. A crash between the two means
                // redelivery, never a lost trade.
                match delivery.ack(BasicAckOptions::default()).await {
                    Ok(()) => info!(
                        routing_key,
                        trades = batch.trades,
                        positions_updated = batch.positions_updated,
                        "trade message processed"
                    ),
                    Err(err) => error!(error = %err, "failed to ack processed message"),
                }
            }
            Err(err) => {
                error!(error = %err, routing_key, "trade message failed; dead-lettering");
                if let Err(nack_err) = delivery
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await
                {
                    error!(error = %nack_err, "failed to nack poisoned message");
                }
            }
        }
    }
}
