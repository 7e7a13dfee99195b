#![allow(dead_code)]

use async_trait::async_trait;
use growstudio::config::ControllerConfig;
use growstudio::mqtt::{BrokerLink, ConnectionState, InboundMessage, LinkEvent, Publisher, TransportError};
use growstudio::reservoir::ReservoirController;
use parking_lot::Mutex;
use rumqttc::QoS;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub type Script = mpsc::UnboundedSender<Result<LinkEvent, TransportError>>;

/// Broker link fed from a channel. Once the script is empty it waits forever.
pub struct ChannelLink {
    events: mpsc::UnboundedReceiver<Result<LinkEvent, TransportError>>,
    polls: Arc<AtomicUsize>,
}

impl ChannelLink {
    pub fn new() -> (Self, Script, Arc<AtomicUsize>) {
        let (script, events) = mpsc::unbounded_channel();
        let polls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                events,
                polls: polls.clone(),
            },
            script,
            polls,
        )
    }
}

#[async_trait]
impl BrokerLink for ChannelLink {
    async fn poll(&mut self) -> Result<LinkEvent, TransportError> {
        match self.events.recv().await {
            Some(event) => {
                self.polls.fetch_add(1, Ordering::SeqCst);
                event
            }
            None => std::future::pending().await,
        }
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
    pub subscriptions: Mutex<Vec<String>>,
}

impl RecordingPublisher {
    pub fn requests(&self) -> Vec<Value> {
        self.published
            .lock()
            .iter()
            .map(|(_, payload)| serde_json::from_slice(payload).unwrap())
            .collect()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, topic: &str, _qos: QoS, payload: Vec<u8>) -> Result<(), TransportError> {
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }

    fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), TransportError> {
        self.subscriptions.lock().push(topic.to_string());
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub fn connected() -> Result<LinkEvent, TransportError> {
    Ok(LinkEvent::Connected {
        session_present: false,
    })
}

pub fn link_down() -> Result<LinkEvent, TransportError> {
    Err(TransportError::Link("connection refused".to_string()))
}

pub fn message(topic: &str, payload: &str) -> Result<LinkEvent, TransportError> {
    Ok(LinkEvent::Message(InboundMessage::new(
        topic,
        payload.as_bytes().to_vec(),
    )))
}

/// Default config with instant back-off.
pub fn fast_config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.backoff = growstudio::config::BackoffConfig::Fixed { delay_ms: 0 };
    config
}

pub struct Harness {
    pub controller: ReservoirController,
    pub script: Script,
    pub polls: Arc<AtomicUsize>,
    pub publisher: Arc<RecordingPublisher>,
}

pub fn harness(config: ControllerConfig) -> Harness {
    let (link, script, polls) = ChannelLink::new();
    let publisher = Arc::new(RecordingPublisher::default());
    let controller =
        ReservoirController::with_transport(config, Box::new(link), publisher.clone()).unwrap();
    Harness {
        controller,
        script,
        polls,
        publisher,
    }
}

pub async fn wait_for_polls(polls: &AtomicUsize, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while polls.load(Ordering::SeqCst) < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("link was not polled in time");
}

pub async fn wait_for_state(mut rx: watch::Receiver<ConnectionState>, state: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached in time")
        .expect("state channel closed");
}
