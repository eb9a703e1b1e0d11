use std::time::Duration;

use folio_broker::{DEFAULT_AMQP_URL, ENV_AMQP_URL};

pub const ENV_SHUTDOWN_GRACE_SECS: &str = "FOLIO_SHUTDOWN_GRACE_SECS";

const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Worker settings sourced from the environment. The database URL is read
/// separately by `folio_db::connect_from_env`.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub amqp_url: String,
    /// How long an in-flight message may keep running after a shutdown
    /// signal before the worker is terminated anyway.
    pub shutdown_grace: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let amqp_url =
            std::env::var(ENV_AMQP_URL).unwrap_or_else(|_| DEFAULT_AMQP_URL.to_string());

        let grace_secs = std::env::var(ENV_SHUTDOWN_GRACE_SECS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS);

        Self {
            amqp_url,
            shutdown_grace: Duration::from_secs(grace_secs),
        }
    }
}
