//! Transport session handle and its driver task.
//!
//! [`TransportSession`] is what the owner holds. `connect()` moves the
//! [`SessionDriver`] into a tokio task where it walks a typestate lifecycle:
//!
//! ```text
//! Idle ──start──► Running ──(cancelled | retry budget exhausted)──► Halted
//! ```
//!
//! While running, the driver polls the broker link, re-subscribes on every
//! connection, forwards publishes into the bounded inbound channel and
//! reports state through a watch channel and the registered observers.

use parking_lot::{Mutex, RwLock};
use rumqttc::QoS;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::link::{rumqtt_pair, BrokerLink, LinkEvent, Publisher};
use super::reconnect::{ConnectionState, ReconnectMachine, RetryPolicy, Step};
use super::{InboundMessage, TransportError};
use crate::config::{ConfigError, ControllerConfig, Topics};

const DISCONNECT_GRACE: Duration = Duration::from_millis(500);

/// Terminal failure reported once the retry budget is spent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionFailure {
    pub failed_attempts: u32,
    pub last_error: String,
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub topics: Topics,
    pub qos: QoS,
    pub retry: RetryPolicy,
    pub inbound_capacity: usize,
}

impl SessionSettings {
    pub fn from_config(config: &ControllerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            topics: config.topics.clone(),
            qos: config.qos()?,
            retry: RetryPolicy::from(config),
            inbound_capacity: config.inbound_capacity,
        })
    }
}

type Callback = Arc<dyn Fn() + Send + Sync>;
type MessageCallback = Arc<dyn Fn(&InboundMessage) + Send + Sync>;
type FatalCallback = Arc<dyn Fn(&SessionFailure) + Send + Sync>;

/// One slot per event; registering again replaces the previous observer.
#[derive(Default)]
pub struct Observers {
    message: Option<MessageCallback>,
    connected: Option<Callback>,
    connection_lost: Option<Callback>,
    fatal: Option<FatalCallback>,
}

/// Lifecycle marker of a [`SessionDriver`].
pub trait DriverState {}

#[derive(Debug, Clone)]
pub struct Idle;

#[derive(Debug, Clone)]
pub struct Running;

#[derive(Debug, Clone)]
pub struct Halted;

impl DriverState for Idle {}
impl DriverState for Running {}
impl DriverState for Halted {}

pub struct SessionDriver<S: DriverState> {
    link: Box<dyn BrokerLink>,
    publisher: Arc<dyn Publisher>,
    settings: SessionSettings,
    machine: ReconnectMachine,
    state_tx: watch::Sender<ConnectionState>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    observers: Arc<RwLock<Observers>>,
    extra_topics: Arc<RwLock<Vec<String>>>,
    failure: Arc<Mutex<Option<SessionFailure>>>,
    cancel: CancellationToken,
    marker: PhantomData<S>,
}

impl<S: DriverState> SessionDriver<S> {
    fn publish_state(&self, state: ConnectionState) {
        debug!("Connection state -> {}", state);
        self.state_tx.send_replace(state);
    }

    fn transition<N: DriverState>(self) -> SessionDriver<N> {
        SessionDriver {
            link: self.link,
            publisher: self.publisher,
            settings: self.settings,
            machine: self.machine,
            state_tx: self.state_tx,
            inbound_tx: self.inbound_tx,
            observers: self.observers,
            extra_topics: self.extra_topics,
            failure: self.failure,
            cancel: self.cancel,
            marker: PhantomData,
        }
    }
}

impl SessionDriver<Idle> {
    #[allow(clippy::too_many_arguments)]
    fn create(
        link: Box<dyn BrokerLink>,
        publisher: Arc<dyn Publisher>,
        settings: SessionSettings,
        state_tx: watch::Sender<ConnectionState>,
        inbound_tx: mpsc::Sender<InboundMessage>,
        observers: Arc<RwLock<Observers>>,
        extra_topics: Arc<RwLock<Vec<String>>>,
        failure: Arc<Mutex<Option<SessionFailure>>>,
        cancel: CancellationToken,
    ) -> Self {
        let machine = ReconnectMachine::new(settings.retry.clone());
        Self {
            link,
            publisher,
            settings,
            machine,
            state_tx,
            inbound_tx,
            observers,
            extra_topics,
            failure,
            cancel,
            marker: PhantomData,
        }
    }

    pub fn start(mut self) -> SessionDriver<Running> {
        let state = self.machine.begin_connect();
        info!(
            "Starting session driver (retry limit {})",
            self.settings.retry.limit
        );
        self.publish_state(state);
        self.transition()
    }
}

impl SessionDriver<Running> {
    /// Polls the link until cancelled or the retry budget is exhausted.
    pub async fn run(mut self) -> SessionDriver<Halted> {
        loop {
            let polled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                polled = self.link.poll() => Some(polled),
            };
            let Some(polled) = polled else {
                info!("Session driver cancelled");
                self.flush_disconnect().await;
                break;
            };

            match polled {
                Ok(LinkEvent::Connected { session_present }) => {
                    self.handle_connected(session_present)
                }
                Ok(LinkEvent::Message(msg)) => self.handle_message(msg),
                Ok(LinkEvent::Idle) => {}
                Ok(LinkEvent::Closed) => debug!("Link reported a closed connection"),
                Err(e) => {
                    if !self.handle_link_error(e).await {
                        break;
                    }
                }
            }
        }

        self.transition()
    }

    fn subscription_topics(&self) -> Vec<String> {
        let mut topics = vec![
            self.settings.topics.telemetry.clone(),
            self.settings.topics.response.clone(),
        ];
        for topic in self.extra_topics.read().iter() {
            if !topics.contains(topic) {
                topics.push(topic.clone());
            }
        }
        topics
    }

    fn handle_connected(&mut self, session_present: bool) {
        let state = self.machine.connected();
        info!("Connected to broker (session present: {})", session_present);

        for topic in self.subscription_topics() {
            match self.publisher.subscribe(&topic, self.settings.qos) {
                Ok(()) => debug!("Subscribed to {}", topic),
                Err(e) => error!("Failed to subscribe to {}: {}", topic, e),
            }
        }

        self.publish_state(state);

        let observer = self.observers.read().connected.clone();
        if let Some(observer) = observer {
            observer();
        }
    }

    fn handle_message(&mut self, msg: InboundMessage) {
        debug!("Received {}", msg);

        let observer = self.observers.read().message.clone();
        if let Some(observer) = observer {
            observer(&msg);
        }

        match self.inbound_tx.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!("Inbound queue full, dropping message on {}", msg.topic());
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Inbound queue closed, session owner is gone");
            }
        }
    }

    // false stops the driver
    async fn handle_link_error(&mut self, error: TransportError) -> bool {
        warn!("MQTT link error: {}", error);

        match self.machine.link_failed() {
            Step::ConnectionLost { delay } => {
                self.publish_state(ConnectionState::Lost);
                let observer = self.observers.read().connection_lost.clone();
                if let Some(observer) = observer {
                    observer();
                }

                let state = self.machine.begin_reconnect();
                self.publish_state(state);
                info!("Connection lost, reconnecting in {:?}", delay);
                wait_backoff(&self.cancel, delay).await
            }
            Step::Retry { attempt, delay } => {
                self.publish_state(ConnectionState::Reconnecting);
                info!(
                    "Connection attempt {}/{} in {:?}",
                    attempt, self.settings.retry.limit, delay
                );
                wait_backoff(&self.cancel, delay).await
            }
            Step::GiveUp { failed_attempts } => {
                error!(
                    "Giving up after {} failed connection attempts, last error: {}",
                    failed_attempts, error
                );
                let failure = SessionFailure {
                    failed_attempts,
                    last_error: error.to_string(),
                };
                *self.failure.lock() = Some(failure.clone());
                self.publish_state(ConnectionState::Fatal);

                let observer = self.observers.read().fatal.clone();
                if let Some(observer) = observer {
                    observer(&failure);
                }
                false
            }
        }
    }

    // keeps polling after a shutdown so the queued DISCONNECT reaches the broker
    async fn flush_disconnect(&mut self) {
        if self.machine.state() != ConnectionState::Connected {
            return;
        }

        let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
            loop {
                match self.link.poll().await {
                    Ok(LinkEvent::Closed) => return true,
                    Ok(LinkEvent::Message(msg)) => self.handle_message(msg),
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Link ended while disconnecting: {}", e);
                        return false;
                    }
                }
            }
        })
        .await;

        match flushed {
            Ok(true) => info!("Disconnected from broker"),
            Ok(false) => {}
            Err(_) => warn!("Broker disconnect not flushed within {:?}", DISCONNECT_GRACE),
        }
    }
}

// false when cancelled before the delay ran out
async fn wait_backoff(cancel: &CancellationToken, delay: Duration) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => {
            info!("Back-off interrupted by shutdown");
            false
        }
        _ = tokio::time::sleep(delay) => true,
    }
}

impl SessionDriver<Halted> {
    pub fn finish(self) -> Option<SessionFailure> {
        if self.machine.state() != ConnectionState::Fatal {
            self.publish_state(ConnectionState::Disconnected);
        }
        info!("Session driver halted in state {}", self.machine.state());
        self.failure.lock().clone()
    }
}

/// Owner-side handle of the broker connection.
pub struct TransportSession {
    settings: SessionSettings,
    publisher: Arc<dyn Publisher>,
    driver: Option<SessionDriver<Idle>>,
    state_rx: watch::Receiver<ConnectionState>,
    inbound_rx: mpsc::Receiver<InboundMessage>,
    observers: Arc<RwLock<Observers>>,
    extra_topics: Arc<RwLock<Vec<String>>>,
    failure: Arc<Mutex<Option<SessionFailure>>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Option<SessionFailure>>>,
}

impl TransportSession {
    pub fn new(
        settings: SessionSettings,
        link: Box<dyn BrokerLink>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (inbound_tx, inbound_rx) = mpsc::channel(settings.inbound_capacity.max(1));
        let observers = Arc::new(RwLock::new(Observers::default()));
        let extra_topics = Arc::new(RwLock::new(Vec::new()));
        let failure = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        let driver = SessionDriver::create(
            link,
            publisher.clone(),
            settings.clone(),
            state_tx,
            inbound_tx,
            observers.clone(),
            extra_topics.clone(),
            failure.clone(),
            cancel.clone(),
        );

        Self {
            settings,
            publisher,
            driver: Some(driver),
            state_rx,
            inbound_rx,
            observers,
            extra_topics,
            failure,
            cancel,
            task: None,
        }
    }

    /// Session backed by a rumqttc client built from the config.
    pub fn from_config(config: &ControllerConfig) -> Result<Self, ConfigError> {
        let settings = SessionSettings::from_config(config)?;
        let (link, publisher) = rumqtt_pair(config);
        Ok(Self::new(settings, Box::new(link), Arc::new(publisher)))
    }

    /// Spawns the driver task and returns immediately.
    ///
    /// Must be called from within a tokio runtime. The outcome is reported
    /// through [`Self::state`] and the observers.
    pub fn connect(&mut self) -> Result<(), TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::NoRuntime(e.to_string()))?;
        let driver = self.driver.take().ok_or(TransportError::AlreadyStarted)?;

        let running = driver.start();
        let task = runtime.spawn(async move { running.run().await.finish() });
        debug!("Session driver task spawned");
        self.task = Some(task);
        Ok(())
    }

    pub fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.publisher.publish(topic, self.settings.qos, payload)
    }

    /// Subscribes now and again after every reconnect.
    pub fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        {
            let mut topics = self.extra_topics.write();
            if !topics.iter().any(|t| t == topic) {
                topics.push(topic.to_string());
            }
        }
        self.publisher.subscribe(topic, self.settings.qos)
    }

    pub fn is_connected(&self) -> bool {
        *self.state_rx.borrow() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// A receiver for awaiting state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn failure(&self) -> Option<SessionFailure> {
        self.failure.lock().clone()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn topics(&self) -> &Topics {
        &self.settings.topics
    }

    /// Takes every message currently waiting in the inbound channel.
    pub fn drain_inbound(&mut self) -> Vec<InboundMessage> {
        let mut drained = Vec::new();
        while let Ok(msg) = self.inbound_rx.try_recv() {
            drained.push(msg);
        }
        drained
    }

    pub fn on_message<F>(&self, observer: F)
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.observers.write().message = Some(Arc::new(observer));
    }

    pub fn on_connected<F>(&self, observer: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.observers.write().connected = Some(Arc::new(observer));
    }

    /// Fires before any reconnect attempt is made.
    pub fn on_connection_lost<F>(&self, observer: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.observers.write().connection_lost = Some(Arc::new(observer));
    }

    /// Fires once when the retry budget is exhausted.
    pub fn on_fatal<F>(&self, observer: F)
    where
        F: Fn(&SessionFailure) + Send + Sync + 'static,
    {
        self.observers.write().fatal = Some(Arc::new(observer));
    }

    /// Stops the driver (including any back-off sleep) and disconnects.
    ///
    /// The DISCONNECT is queued first; a connected driver keeps polling the
    /// link for a short grace period so it actually goes out.
    pub fn shutdown(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        info!("Shutting down transport session");
        if self.task.is_some() {
            if let Err(e) = self.publisher.disconnect() {
                debug!("Disconnect request not queued: {}", e);
            }
        }
        self.cancel.cancel();
    }

    /// Waits for the driver task to end after a shutdown or fatal transition.
    pub async fn join(&mut self) -> Option<SessionFailure> {
        match self.task.take() {
            Some(task) => match task.await {
                Ok(failure) => failure,
                Err(e) => {
                    error!("Session driver task panicked: {}", e);
                    self.failure()
                }
            },
            None => self.failure(),
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
