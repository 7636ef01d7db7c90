//! MQTT transport for the ingestion link

use crate::domain::IngestError;
use crate::infra::config::Config;
use crate::io::link::{BusMessage, BusTransport};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Request queue depth between the client handle and the event loop
const REQUEST_CAPACITY: usize = 100;

/// rumqttc-backed bus session
///
/// Every `connect` builds a fresh client and event loop so that a dropped
/// session never carries state into the next one.
pub struct MqttTransport {
    options: MqttOptions,
    session: Option<(AsyncClient, EventLoop)>,
}

impl MqttTransport {
    pub fn new(config: &Config) -> Self {
        let client_id = config
            .mqtt_client_id()
            .map(str::to_string)
            .unwrap_or_else(|| format!("presence-stats-{}", Uuid::now_v7()));

        let mut options = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        options.set_keep_alive(Duration::from_secs(config.mqtt_keep_alive_secs()));
        options.set_clean_session(true);

        // Set credentials if configured
        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            options.set_credentials(username, password);
        }

        Self { options, session: None }
    }

    fn session(&mut self) -> Result<&mut (AsyncClient, EventLoop), IngestError> {
        self.session
            .as_mut()
            .ok_or_else(|| IngestError::ConnectionLost("not connected".to_string()))
    }
}

#[async_trait]
impl BusTransport for MqttTransport {
    async fn connect(&mut self) -> Result<(), IngestError> {
        self.session = None;
        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        let (host, port) = self.options.broker_address();

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(IngestError::ConnectionLost(format!("broker refused: {:?}", ack.code)));
                    }
                    info!(host = %host, port = %port, client_id = %self.options.client_id(), "mqtt_connected");
                    self.session = Some((client, eventloop));
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => return Err(IngestError::ConnectionLost(e.to_string())),
            }
        }
    }

    async fn subscribe(&mut self, topics: &[String]) -> Result<(), IngestError> {
        let (client, _) = self.session()?;
        for topic in topics {
            client
                .subscribe(topic.as_str(), QoS::AtMostOnce)
                .await
                .map_err(|e| IngestError::ConnectionLost(e.to_string()))?;
            debug!(topic = %topic, "mqtt_subscribe_queued");
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Result<BusMessage, IngestError> {
        let (_, eventloop) = self.session()?;
        let result = loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    break Ok(BusMessage { topic: publish.topic, payload: publish.payload });
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!(pkid = %ack.pkid, "mqtt_suback");
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    break Err(IngestError::ConnectionLost("broker sent disconnect".to_string()));
                }
                Ok(_) => {}
                Err(e) => break Err(IngestError::ConnectionLost(e.to_string())),
            }
        };

        if result.is_err() {
            self.session = None;
        }
        result
    }
}
