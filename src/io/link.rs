//! Ingestion link - durable bus subscription with bounded reconnection
//!
//! The link owns the bus transport, routes every inbound message through the
//! decoder and forwards decoded events to the ingestion task over a bounded
//! channel. The transport is polled continuously so the session keeps its
//! keepalive even when ingestion falls behind: events that do not fit in the
//! channel wait in a backlog of the same size, and anything beyond that is
//! dropped and counted. When the connection drops it backs off exponentially
//! and gives up after a fixed number of attempts; the caller decides what
//! happens then.

use crate::domain::{IngestError, PresenceEvent};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::decoder::{self, Channel, TopicRouter};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Raw message as delivered by the bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Publish/subscribe transport driven by the link
#[async_trait]
pub trait BusTransport: Send {
    /// Establish a session; resolves once the broker accepted it
    async fn connect(&mut self) -> Result<(), IngestError>;

    async fn subscribe(&mut self, topics: &[String]) -> Result<(), IngestError>;

    /// Next inbound message; `ConnectionLost` when the session drops
    async fn next_message(&mut self) -> Result<BusMessage, IngestError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    GaveUp,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Reconnecting { .. } => "reconnecting",
            LinkState::GaveUp => "gave_up",
        }
    }
}

/// Exponential backoff: first delay, multiplied each attempt, capped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub first_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            first_delay: Duration::from_secs(1),
            multiplier: 2,
            max_delay: Duration::from_secs(60),
            max_attempts: 12,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            first_delay: config.reconnect_first_delay(),
            multiplier: config.reconnect_multiplier(),
            max_delay: config.reconnect_max_delay(),
            max_attempts: config.reconnect_max_attempts(),
        }
    }

    /// Delay slept before each attempt, one item per attempt
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let multiplier = self.multiplier;
        let max_delay = self.max_delay;
        std::iter::successors(Some(self.first_delay.min(max_delay)), move |delay| {
            Some(delay.saturating_mul(multiplier).min(max_delay))
        })
        .take(self.max_attempts as usize)
    }
}

enum Resume {
    Connected,
    Shutdown,
}

/// Resolves once shutdown is requested; never resolves if the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Keeps the bus subscription alive and feeds the ingestion channel
pub struct LinkManager<T: BusTransport> {
    transport: T,
    router: TopicRouter,
    policy: ReconnectPolicy,
    event_tx: mpsc::Sender<PresenceEvent>,
    state_tx: watch::Sender<LinkState>,
    metrics: Arc<Metrics>,
}

impl<T: BusTransport> LinkManager<T> {
    pub fn new(
        transport: T,
        router: TopicRouter,
        policy: ReconnectPolicy,
        event_tx: mpsc::Sender<PresenceEvent>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self { transport, router, policy, event_tx, state_tx, metrics }
    }

    /// Observe state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    /// Run until shutdown, the event channel closes, or reconnection gives up
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), IngestError> {
        self.set_state(LinkState::Connecting);
        if let Err(e) = self.establish().await {
            warn!(error = %e, "link_connect_failed");
            self.set_state(LinkState::Disconnected);
            if let Resume::Shutdown = self.reconnect(&mut shutdown).await? {
                return Ok(());
            }
        }

        let mut backlog = VecDeque::new();
        let event_tx = self.event_tx.clone();
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => {
                    info!(pending = %backlog.len(), "link_shutdown");
                    self.set_state(LinkState::Disconnected);
                    return Ok(());
                }
                permit = event_tx.reserve(), if !backlog.is_empty() => {
                    match permit {
                        Ok(permit) => {
                            if let Some(event) = backlog.pop_front() {
                                permit.send(event);
                            }
                        }
                        Err(_) => {
                            for _ in 0..backlog.len() {
                                self.metrics.record_event_dropped();
                            }
                            warn!(pending = %backlog.len(), "event_channel_closed");
                            self.set_state(LinkState::Disconnected);
                            return Ok(());
                        }
                    }
                }
                result = self.transport.next_message() => {
                    match result {
                        Ok(message) => {
                            if let Some(event) = self.route(message) {
                                if !self.forward(event, &mut backlog) {
                                    self.set_state(LinkState::Disconnected);
                                    return Ok(());
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "link_connection_lost");
                            self.set_state(LinkState::Disconnected);
                            if let Resume::Shutdown = self.reconnect(&mut shutdown).await? {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    /// Connect and subscribe to every channel
    async fn establish(&mut self) -> Result<(), IngestError> {
        self.transport.connect().await?;
        let topics = self.router.topics();
        self.transport.subscribe(&topics).await?;
        self.set_state(LinkState::Connected);
        info!(topics = ?topics, "link_connected");
        Ok(())
    }

    /// Back off and retry until connected, shut down, or out of attempts
    async fn reconnect(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<Resume, IngestError> {
        let delays: Vec<Duration> = self.policy.delays().collect();
        for (index, delay) in delays.into_iter().enumerate() {
            let attempt = index as u32 + 1;
            self.set_state(LinkState::Reconnecting { attempt });
            info!(attempt = %attempt, delay_secs = %delay.as_secs_f64(), "link_reconnecting");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_requested(shutdown) => {
                    info!("link_shutdown_during_backoff");
                    self.set_state(LinkState::Disconnected);
                    return Ok(Resume::Shutdown);
                }
            }

            self.metrics.record_reconnect_attempt();
            match self.establish().await {
                Ok(()) => {
                    info!(attempt = %attempt, "link_reconnected");
                    return Ok(Resume::Connected);
                }
                Err(e) => {
                    warn!(attempt = %attempt, error = %e, "link_reconnect_failed");
                }
            }
        }

        let attempts = self.policy.max_attempts;
        self.set_state(LinkState::GaveUp);
        error!(attempts = %attempts, "link_gave_up");
        Err(IngestError::ReconnectExhausted { attempts })
    }

    /// Decode one message into an event for ingestion, if it carries one
    fn route(&self, message: BusMessage) -> Option<PresenceEvent> {
        self.metrics.record_message_received();

        let Some(channel) = self.router.classify(&message.topic) else {
            debug!(topic = %message.topic, "link_unrouted_topic");
            return None;
        };

        match decoder::decode(channel, &message.topic, &message.payload, Utc::now()) {
            Ok(Some(event)) => {
                debug!(topic = %message.topic, event = %event.as_str(), "presence_decoded");
                Some(event)
            }
            Ok(None) => {
                debug!(topic = %message.topic, channel = %Channel::as_str(&channel), "presence_ignored");
                None
            }
            Err(e) => {
                self.metrics.record_malformed_dropped();
                warn!(error = %e, "payload_dropped");
                None
            }
        }
    }

    /// Hand an event to ingestion without waiting; false once the channel is closed
    ///
    /// Order is kept: while the backlog is non-empty new events queue behind it.
    fn forward(&self, event: PresenceEvent, backlog: &mut VecDeque<PresenceEvent>) -> bool {
        let event = if backlog.is_empty() {
            match self.event_tx.try_send(event) {
                Ok(()) => return true,
                Err(TrySendError::Full(event)) => event,
                Err(TrySendError::Closed(_)) => {
                    self.metrics.record_event_dropped();
                    warn!("event_channel_closed");
                    return false;
                }
            }
        } else {
            event
        };

        if backlog.len() >= self.event_tx.max_capacity() {
            self.metrics.record_event_dropped();
            warn!(event = %event.as_str(), room_id = %event.room_id(), "event_backlog_full");
            return true;
        }
        backlog.push_back(event);
        true
    }

    fn set_state(&self, state: LinkState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous.as_str(), to = %state.as_str(), "link_state");
        }
    }
}
