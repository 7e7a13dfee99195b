//! The facade the panel talks to.
//!
//! Everything that mutates device state happens inside
//! [`ReservoirController::drain_and_route`], on the caller's thread. The
//! session driver only queues messages and reports connection changes.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::error_queue::{ErrorQueue, ReportedError};
use super::labels::DoserLabels;
use super::router::{RouteTarget, TelemetryUpdate, TopicRouter};
use super::telemetry::{TelemetryStore, EC, LIQUID_LEVEL, PH};
use crate::config::{ConfigError, ControllerConfig};
use crate::mqtt::{
    BrokerLink, ConnectionState, InboundMessage, Publisher, SessionFailure, SessionSettings,
    TransportError, TransportSession,
};
use crate::rpc::{RequestError, ResponseHandler, RpcCorrelator, RpcResponse};

/// Code of the locally generated error for a request that never got an answer.
pub const REQUEST_TIMED_OUT: i64 = -32000;

pub const METHOD_OPEN_VALVE: &str = "openValve";
pub const METHOD_CLOSE_VALVE: &str = "closeValve";
pub const METHOD_DOSE: &str = "dose";
pub const METHOD_RESET_DOSERS: &str = "resetDosers";
pub const METHOD_CALIBRATE_PH: &str = "calibratePHSensor";
pub const METHOD_CALIBRATE_EC: &str = "calibrateECSensor";
pub const METHOD_DOSERS_COUNT: &str = "dosersCount";

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// State that response handlers and the router write into.
#[derive(Debug)]
pub struct DeviceState {
    pub telemetry: TelemetryStore,
    pub errors: ErrorQueue,
    pub doser_count: Option<u32>,
}

impl DeviceState {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            telemetry: TelemetryStore::new(config.history_capacity),
            errors: ErrorQueue::new(config.freshness_window(), config.error_queue_capacity),
            doser_count: None,
        }
    }
}

// Route target for one drain pass.
struct Dispatch<'a> {
    correlator: &'a mut RpcCorrelator<DeviceState>,
    state: &'a mut DeviceState,
}

impl RouteTarget for Dispatch<'_> {
    fn on_telemetry(&mut self, update: TelemetryUpdate) {
        let telemetry = &mut self.state.telemetry;
        if let Some(ph) = update.ph {
            telemetry.record(PH, ph);
        }
        if let Some(ec) = update.ec {
            telemetry.record(EC, ec);
        }
        if let Some(level) = update.liquid_level {
            telemetry.set_discrete(LIQUID_LEVEL, level);
        }
    }

    fn on_response(&mut self, response: RpcResponse) {
        // surfaced whether or not anyone waits on this id
        if let Some(error) = &response.error {
            warn!(
                "Device reported error {} for request {}: {}",
                error.code, response.id, error.message
            );
            self.state.errors.push_at(
                error.code,
                error.message.clone(),
                error.data.clone(),
                Instant::now(),
            );
        }

        if !self.correlator.resolve(self.state, &response) {
            debug!("No pending handler for response id {}", response.id);
        }
    }
}

pub struct ReservoirController {
    config: ControllerConfig,
    session: TransportSession,
    router: TopicRouter,
    correlator: RpcCorrelator<DeviceState>,
    state: DeviceState,
    doser_labels: DoserLabels,
    valve_open: Option<bool>,
}

impl ReservoirController {
    /// Controller backed by a rumqttc connection. Call [`Self::connect`] to start it.
    pub fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        config.validate()?;
        let session = TransportSession::from_config(&config)?;
        Ok(Self::assemble(config, session))
    }

    /// Controller over a caller-provided broker link.
    pub fn with_transport(
        config: ControllerConfig,
        link: Box<dyn BrokerLink>,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        let settings = SessionSettings::from_config(&config)?;
        let session = TransportSession::new(settings, link, publisher);
        Ok(Self::assemble(config, session))
    }

    fn assemble(config: ControllerConfig, session: TransportSession) -> Self {
        Self {
            router: TopicRouter::new(&config.topics),
            correlator: RpcCorrelator::new(config.request_timeout()),
            state: DeviceState::new(&config),
            doser_labels: DoserLabels::new(),
            valve_open: None,
            session,
            config,
        }
    }

    pub fn connect(&mut self) -> Result<(), ControllerError> {
        info!(
            "Connecting to {}:{} as {}",
            self.config.broker.host, self.config.broker.port, self.config.broker.client_id
        );
        self.session.connect()?;
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.session.shutdown();
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn session(&self) -> &TransportSession {
        &self.session
    }

    fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), ControllerError> {
        self.correlator.send(&self.session, method, params, None)?;
        Ok(())
    }

    pub fn open_valve(&mut self) -> Result<(), ControllerError> {
        info!("Opening valve");
        self.notify(METHOD_OPEN_VALVE, None)?;
        self.valve_open = Some(true);
        Ok(())
    }

    pub fn close_valve(&mut self) -> Result<(), ControllerError> {
        info!("Closing valve");
        self.notify(METHOD_CLOSE_VALVE, None)?;
        self.valve_open = Some(false);
        Ok(())
    }

    pub fn dose(&mut self, doser_id: u32, amount: f64) -> Result<(), ControllerError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ControllerError::InvalidArgument(format!(
                "dose amount must be a positive number, got {}",
                amount
            )));
        }
        info!(
            "Dosing {} from {} ({})",
            amount,
            doser_id,
            self.doser_labels.display_name(doser_id)
        );
        self.notify(
            METHOD_DOSE,
            Some(json!({ "doserID": doser_id, "amount": amount })),
        )
    }

    pub fn reset_dosers(&mut self) -> Result<(), ControllerError> {
        info!("Resetting dosers");
        self.notify(METHOD_RESET_DOSERS, None)
    }

    pub fn calibrate_ph(&mut self, ph: f64) -> Result<(), ControllerError> {
        if !ph.is_finite() {
            return Err(ControllerError::InvalidArgument(format!(
                "calibration pH must be finite, got {}",
                ph
            )));
        }
        info!("Calibrating pH sensor at {:.2}", ph);
        self.notify(METHOD_CALIBRATE_PH, Some(json!({ "phValue": ph })))
    }

    pub fn calibrate_ec(&mut self, ec: f64) -> Result<(), ControllerError> {
        if !ec.is_finite() {
            return Err(ControllerError::InvalidArgument(format!(
                "calibration EC must be finite, got {}",
                ec
            )));
        }
        info!("Calibrating EC sensor at {:.2}", ec);
        self.notify(METHOD_CALIBRATE_EC, Some(json!({ "ecValue": ec })))
    }

    /// Asks the device how many dosers it has. The answer lands in [`Self::doser_count`].
    pub fn query_doser_count(&mut self) -> Result<i64, ControllerError> {
        let handler: ResponseHandler<DeviceState> =
            Box::new(|state: &mut DeviceState, response: &RpcResponse| {
                let count = response
                    .result
                    .as_ref()
                    .and_then(Value::as_u64)
                    .and_then(|n| u32::try_from(n).ok());
                match count {
                    Some(count) => {
                        info!("Device has {} dosers", count);
                        state.doser_count = Some(count);
                    }
                    None if response.error.is_none() => {
                        warn!("Unusable doser count in response: {:?}", response.result);
                    }
                    None => {}
                }
            });

        let id = self.correlator.send_with_id(
            &self.session,
            self.config.doser_count_request_id,
            METHOD_DOSERS_COUNT,
            None,
            Some(handler),
        )?;
        Ok(id)
    }

    /// Routes every queued message and expires overdue requests.
    ///
    /// Malformed messages are logged and skipped. Returns how many messages
    /// were taken off the inbound queue.
    pub fn drain_and_route(&mut self) -> usize {
        let messages = self.session.drain_inbound();
        let drained = messages.len();

        for msg in &messages {
            self.route(msg);
        }

        for expired in self.correlator.expire(Instant::now()) {
            warn!(
                "Request {} (id {}) got no response within {:?}",
                expired.method, expired.id, expired.age
            );
            self.state.errors.push(
                REQUEST_TIMED_OUT,
                format!("request timed out: {}", expired.method),
            );
        }

        drained
    }

    fn route(&mut self, msg: &InboundMessage) {
        let mut target = Dispatch {
            correlator: &mut self.correlator,
            state: &mut self.state,
        };
        if let Err(e) = self.router.route(msg, &mut target) {
            warn!("Dropping message: {}", e);
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn session_failure(&self) -> Option<SessionFailure> {
        self.session.failure()
    }

    pub fn telemetry(&self) -> &TelemetryStore {
        &self.state.telemetry
    }

    pub fn latest(&self, metric: &str) -> Option<f64> {
        self.state.telemetry.latest(metric)
    }

    pub fn history(&self, metric: &str) -> Vec<f64> {
        self.state.telemetry.history(metric)
    }

    pub fn discrete(&self, name: &str) -> Option<&str> {
        self.state.telemetry.discrete(name)
    }

    pub fn liquid_level(&self) -> Option<&str> {
        self.discrete(LIQUID_LEVEL)
    }

    pub fn doser_count(&self) -> Option<u32> {
        self.state.doser_count
    }

    /// Last valve command sent, if any. The device does not report it back.
    pub fn valve_open(&self) -> Option<bool> {
        self.valve_open
    }

    pub fn peek_fresh_error(&mut self) -> Option<&ReportedError> {
        self.state.errors.peek_fresh()
    }

    pub fn pending_errors(&self) -> usize {
        self.state.errors.len()
    }

    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    pub fn doser_labels(&self) -> &DoserLabels {
        &self.doser_labels
    }

    /// Swaps in a new label set and hands back the previous one.
    pub fn replace_doser_labels(&mut self, labels: DoserLabels) -> DoserLabels {
        std::mem::replace(&mut self.doser_labels, labels)
    }

    pub fn on_message<F>(&self, observer: F)
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.session.on_message(observer);
    }

    pub fn on_connected<F>(&self, observer: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.session.on_connected(observer);
    }

    pub fn on_connection_lost<F>(&self, observer: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.session.on_connection_lost(observer);
    }

    pub fn on_fatal<F>(&self, observer: F)
    where
        F: Fn(&SessionFailure) + Send + Sync + 'static,
    {
        self.session.on_fatal(observer);
    }
}
