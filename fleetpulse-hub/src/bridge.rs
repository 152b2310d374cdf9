//! Redis pub/sub subscriber feeding the ingestion pipeline
//!
//! One long-lived subscription to the configured topic. Each message goes
//! through the same pipeline as an HTTP push; failures are logged and the
//! message is discarded so one bad payload or write cannot stall the
//! subscription. Messages published while the subscriber is disconnected
//! are not replayed.

use fleetpulse_core::config::BrokerConfig;
use futures::StreamExt;
use redis::Client;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::ingest::{IngestError, IngestPipeline, IngestReceipt, IngestSource};

pub struct BrokerBridge {
    client: Client,
    topic: String,
    connect_timeout: Duration,
    initial_backoff_secs: u64,
    max_backoff_secs: u64,
    pipeline: IngestPipeline,
    cancel_token: CancellationToken,
}

impl BrokerBridge {
    /// Build a bridge; no connection is made until [`run`](Self::run)
    pub fn new(
        config: &BrokerConfig,
        pipeline: IngestPipeline,
        cancel_token: CancellationToken,
    ) -> Result<Self> {
        if config.topic.is_empty() {
            return Err(Error::Configuration("broker topic must not be empty".to_string()));
        }
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            topic: config.topic.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_seconds.max(1)),
            initial_backoff_secs: config.initial_backoff_seconds.max(1),
            max_backoff_secs: config
                .max_backoff_seconds
                .max(config.initial_backoff_seconds.max(1)),
            pipeline,
            cancel_token,
        })
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Subscribe and process messages until the cancellation token fires,
    /// reconnecting with exponential backoff in between.
    pub async fn run(self) {
        let mut backoff_secs = self.initial_backoff_secs;

        loop {
            if self.cancel_token.is_cancelled() {
                break;
            }

            match self.run_subscriber().await {
                SubscriberExit::Cancelled => break,
                SubscriberExit::Disconnected => {
                    // The server was reachable, so start over from the short delay
                    backoff_secs = self.initial_backoff_secs;
                    error!(
                        topic = %self.topic,
                        backoff_secs = backoff_secs,
                        "Broker subscription lost, reconnecting"
                    );
                }
                SubscriberExit::ConnectFailed(e) => {
                    error!(
                        topic = %self.topic,
                        error = %e,
                        backoff_secs = backoff_secs,
                        "Broker subscriber failed to connect, retrying after backoff"
                    );
                }
            }

            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                () = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
            }

            backoff_secs = (backoff_secs * 2).min(self.max_backoff_secs);
        }

        info!(topic = %self.topic, "Broker bridge stopped");
    }

    async fn run_subscriber(&self) -> SubscriberExit {
        let mut pubsub = match timeout(self.connect_timeout, self.client.get_async_pubsub()).await {
            Ok(Ok(ps)) => ps,
            Ok(Err(e)) => {
                return SubscriberExit::ConnectFailed(
                    anyhow::anyhow!(e).context("Failed to get Redis Pub/Sub connection"),
                );
            }
            Err(_) => {
                return SubscriberExit::ConnectFailed(anyhow::anyhow!(
                    "Timed out getting Redis Pub/Sub connection"
                ));
            }
        };

        match timeout(self.connect_timeout, pubsub.subscribe(self.topic.as_str())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return SubscriberExit::ConnectFailed(
                    anyhow::anyhow!(e).context(format!("Failed to subscribe to {}", self.topic)),
                );
            }
            Err(_) => {
                return SubscriberExit::ConnectFailed(anyhow::anyhow!(
                    "Timed out subscribing to {}",
                    self.topic
                ));
            }
        }

        info!(topic = %self.topic, "Broker subscriber connected");

        let mut stream = pubsub.on_message();
        loop {
            let msg = tokio::select! {
                () = self.cancel_token.cancelled() => return SubscriberExit::Cancelled,
                msg = stream.next() => msg,
            };
            let Some(msg) = msg else {
                return SubscriberExit::Disconnected;
            };

            // Failures are already logged and counted by the pipeline
            let _ = self.handle_message(msg.get_payload_bytes()).await;
        }
    }

    /// Process one broker message payload.
    ///
    /// Never retried: the outcome is returned for callers that want it, but
    /// the subscription loop moves on regardless.
    pub async fn handle_message(&self, payload: &[u8]) -> std::result::Result<IngestReceipt, IngestError> {
        let result = self
            .pipeline
            .ingest_bytes(IngestSource::Broker, payload, None)
            .await;

        match &result {
            Ok(receipt) => debug!(
                topic = %self.topic,
                vehicle_id = %receipt.vehicle_id,
                delivered = receipt.delivery.delivered,
                "Broker message ingested"
            ),
            Err(e) if e.is_client_error() => warn!(
                topic = %self.topic,
                error = %e,
                "Discarding invalid broker message"
            ),
            Err(e) => error!(
                topic = %self.topic,
                error = %e,
                "Discarding broker message that could not be stored"
            ),
        }

        result
    }
}

/// How one subscription attempt ended
enum SubscriberExit {
    /// Messages were flowing, then the stream ended
    Disconnected,
    /// Could not connect or subscribe; backoff keeps growing
    ConnectFailed(anyhow::Error),
    Cancelled,
}
