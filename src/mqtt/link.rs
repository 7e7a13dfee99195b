//! Seams between the session and the MQTT client library.
//!
//! [`BrokerLink`] is the receive half (the event loop), [`Publisher`] the send
//! half. The session only depends on these traits, so the reconnect logic can
//! be driven by an in-memory link in tests.

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use tracing::{debug, trace};

use super::{InboundMessage, TransportError};
use crate::config::ControllerConfig;

/// What one poll of the broker link produced.
#[derive(Debug)]
pub enum LinkEvent {
    /// The broker accepted a (re)connection.
    Connected { session_present: bool },
    /// A publish arrived on a subscribed topic.
    Message(InboundMessage),
    /// Protocol traffic with no meaning for the session (acks, pings, outgoing).
    Idle,
    /// Our DISCONNECT went out; the connection is closing.
    Closed,
}

#[async_trait]
pub trait BrokerLink: Send {
    /// Drives the connection until the next event.
    ///
    /// After an `Err` the next call starts a fresh connection attempt.
    async fn poll(&mut self) -> Result<LinkEvent, TransportError>;
}

/// Non-blocking outbound half of the connection.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), TransportError>;

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    fn disconnect(&self) -> Result<(), TransportError>;
}

pub struct RumqttLink {
    eventloop: EventLoop,
}

#[async_trait]
impl BrokerLink for RumqttLink {
    async fn poll(&mut self) -> Result<LinkEvent, TransportError> {
        match self.eventloop.poll().await? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    Ok(LinkEvent::Connected {
                        session_present: ack.session_present,
                    })
                } else {
                    Err(TransportError::Refused(format!("{:?}", ack.code)))
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                trace!("Publish on {} with {} bytes", publish.topic, publish.payload.len());
                Ok(LinkEvent::Message(InboundMessage::new(
                    publish.topic,
                    publish.payload.to_vec(),
                )))
            }
            Event::Incoming(Packet::Disconnect) => {
                debug!("Broker sent disconnect");
                Ok(LinkEvent::Idle)
            }
            Event::Outgoing(Outgoing::Disconnect) => Ok(LinkEvent::Closed),
            other => {
                trace!("Ignoring event: {:?}", other);
                Ok(LinkEvent::Idle)
            }
        }
    }
}

#[derive(Clone)]
pub struct RumqttPublisher {
    client: AsyncClient,
}

impl Publisher for RumqttPublisher {
    fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client.try_publish(topic, qos, false, payload)?;
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.client.try_subscribe(topic, qos)?;
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.client.try_disconnect()?;
        Ok(())
    }
}

pub fn mqtt_options(config: &ControllerConfig) -> MqttOptions {
    let broker = &config.broker;
    let mut options = MqttOptions::new(broker.client_id.clone(), broker.host.clone(), broker.port);
    options
        .set_keep_alive(config.keep_alive())
        .set_clean_session(broker.clean_session);

    if let Some(user) = &broker.username {
        options.set_credentials(user.clone(), broker.password.clone().unwrap_or_default());
    }

    options
}

/// Builds the rumqttc client pair. No network traffic happens until the link is polled.
pub fn rumqtt_pair(config: &ControllerConfig) -> (RumqttLink, RumqttPublisher) {
    let options = mqtt_options(config);
    debug!(
        "Creating MQTT client {} for {}:{}",
        config.broker.client_id, config.broker.host, config.broker.port
    );
    let (client, eventloop) = AsyncClient::new(options, config.broker.request_capacity);
    (RumqttLink { eventloop }, RumqttPublisher { client })
}
