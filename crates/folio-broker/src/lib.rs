//! folio-broker
//!
//! One long-lived AMQP connection, explicitly constructed and injected into
//! whatever needs it — no ambient global. The manager lazily creates and
//! caches one channel per [`ChannelPurpose`], and a supervisor task reconnects
//! with capped exponential backoff when the connection drops. Unacknowledged
//! messages are redelivered by the broker once a consumer resubscribes, so
//! losing the connection is never a per-message error.

pub mod topology;

use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

pub const ENV_AMQP_URL: &str = "FOLIO_AMQP_URL";
pub const DEFAULT_AMQP_URL: &str = "amqp://127.0.0.1:5672/%2f";

/// Reconnect delay cap.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("no broker connection available")]
    NotConnected,

    #[error("failed to serialize message payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Logical role of a cached channel. A closed enum rather than a free-form
/// string, so a typo cannot silently mint a new channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelPurpose {
    Publisher,
    TradeConsumer,
}

impl ChannelPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelPurpose::Publisher => "publisher",
            ChannelPurpose::TradeConsumer => "consumer-trade-queue",
        }
    }
}

enum BrokerEvent {
    ConnectionLost,
}

#[derive(Default)]
struct ConnState {
    connection: Option<Connection>,
    channels: HashMap<ChannelPurpose, Channel>,
    connecting: bool,
    retry_count: u32,
    closed: bool,
}

struct Inner {
    url: String,
    state: Mutex<ConnState>,
    events: mpsc::UnboundedSender<BrokerEvent>,
}

/// Handle to the shared broker connection. Cheap to clone; all clones share
/// one connection and one channel cache.
#[derive(Clone)]
pub struct BrokerManager {
    inner: Arc<Inner>,
}

impl BrokerManager {
    /// Build the manager and spawn its reconnect supervisor.
    /// Must be called from within a Tokio runtime. No connection is opened
    /// until [`init`](Self::init) (or the first channel request).
    pub fn new(url: impl Into<String>) -> Self {
        let (events, mut rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            url: url.into(),
            state: Mutex::new(ConnState::default()),
            events,
        });

        // The supervisor holds only a weak handle: when the last manager
        // clone is dropped the sender side closes and the task ends.
        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(BrokerEvent::ConnectionLost) = rx.recv().await {
                // Collapse a burst of loss signals into one reconnect cycle.
                while rx.try_recv().is_ok() {}

                let Some(inner) = weak.upgrade() else { break };
                let manager = BrokerManager { inner };
                manager.reconnect_after_backoff().await;
            }
        });

        Self { inner }
    }

    /// Open the connection if needed. Idempotent: returns immediately when
    /// already connected or when a connect attempt is in flight. On failure
    /// the supervisor keeps retrying in the background; the error is returned
    /// so callers can treat it as a retryable infrastructure problem.
    pub async fn init(&self) -> Result<(), BrokerError> {
        {
            let mut st = self.inner.state.lock().await;
            if st.connection.is_some() || st.connecting {
                return Ok(());
            }
            st.connecting = true;
            st.closed = false;
        }

        let result = Connection::connect(&self.inner.url, ConnectionProperties::default()).await;

        let mut st = self.inner.state.lock().await;
        st.connecting = false;
        match result {
            Ok(connection) => {
                let events = self.inner.events.clone();
                connection.on_error(move |err| {
                    error!(error = %err, "broker connection error");
                    let _ = events.send(BrokerEvent::ConnectionLost);
                });
                st.retry_count = 0;
                st.connection = Some(connection);
                info!("broker connected");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed to connect to broker");
                let _ = self.inner.events.send(BrokerEvent::ConnectionLost);
                Err(BrokerError::Amqp(err))
            }
        }
    }

    /// Close channels and connection. A later `init` may reopen them.
    pub async fn shutdown(&self) {
        let (channels, connection) = {
            let mut st = self.inner.state.lock().await;
            st.closed = true;
            let channels: Vec<Channel> = st.channels.drain().map(|(_, ch)| ch).collect();
            (channels, st.connection.take())
        };

        for channel in channels {
            if let Err(err) = channel.close(200, "shutdown").await {
                debug!(error = %err, "channel close during shutdown");
            }
        }
        if let Some(connection) = connection {
            if let Err(err) = connection.close(200, "shutdown").await {
                debug!(error = %err, "connection close during shutdown");
            }
            info!("broker connection closed");
        }
    }

    /// Cached channel for a purpose, created on first use. A cached channel
    /// that has errored or closed since last use is evicted and replaced;
    /// the whole cache is discarded whenever the connection is lost.
    pub async fn get_or_create_channel(
        &self,
        purpose: ChannelPurpose,
    ) -> Result<Channel, BrokerError> {
        self.init().await?;

        let mut st = self.inner.state.lock().await;

        if let Some(channel) = st.channels.get(&purpose) {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
            debug!(purpose = purpose.as_str(), "evicting dead channel");
            st.channels.remove(&purpose);
        }

        let Some(connection) = st.connection.as_ref() else {
            return Err(BrokerError::NotConnected);
        };

        debug!(purpose = purpose.as_str(), "creating broker channel");
        let channel = connection.create_channel().await?;
        st.channels.insert(purpose, channel.clone());
        Ok(channel)
    }

    /// Publish one JSON message with persistent delivery, declaring the
    /// target exchange (durable topic) idempotently first.
    pub async fn publish<T: Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &T,
    ) -> Result<(), BrokerError> {
        let channel = self.get_or_create_channel(ChannelPurpose::Publisher).await?;

        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let payload = serde_json::to_vec(message)?;
        channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await?
            .await?;

        debug!(exchange, routing_key, bytes = payload.len(), "published message");
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        let st = self.inner.state.lock().await;
        st.connection
            .as_ref()
            .map(|c| c.status().connected())
            .unwrap_or(false)
    }

    /// Drop the dead connection and every cached channel, wait out the
    /// backoff, then try again. Each attempt bumps the retry counter; a
    /// successful connect resets it.
    async fn reconnect_after_backoff(&self) {
        let delay = {
            let mut st = self.inner.state.lock().await;
            if st.closed {
                return;
            }
            st.connection = None;
            st.channels.clear();
            backoff_delay(st.retry_count)
        };

        warn!(delay_secs = delay.as_secs(), "broker connection lost; reconnecting");
        tokio::time::sleep(delay).await;

        {
            let mut st = self.inner.state.lock().await;
            if st.closed {
                return;
            }
            st.retry_count += 1;
        }

        // A failed attempt emits another ConnectionLost, so the supervisor
        // loops with a longer delay until the broker comes back.
        if let Err(err) = self.init().await {
            warn!(error = %err, "reconnect attempt failed");
        }
    }
}

/// `min(30s, 2^retry_count · 1s)`.
fn backoff_delay(retry_count: u32) -> Duration {
    if retry_count >= 5 {
        MAX_BACKOFF
    } else {
        Duration::from_secs(1 << retry_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps_at_thirty_seconds() {
        let secs: Vec<u64> = (0..8).map(|n| backoff_delay(n).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn channel_purposes_have_distinct_names() {
        assert_ne!(
            ChannelPurpose::Publisher.as_str(),
            ChannelPurpose::TradeConsumer.as_str()
        );
    }
}
