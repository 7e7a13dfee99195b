//! # GrowStudio
//!
//! Control panel core for a hydroponics reservoir controller that speaks
//! JSON-RPC over MQTT.
//!
//! ```text
//! config       - ControllerConfig value object, TOML loading
//! mqtt         - TransportSession, reconnect machine, broker link seams
//! rpc          - request/response wire types and the correlator
//! reservoir    - telemetry, error queue, router and the controller facade
//! persistence  - doser labels and display preferences on disk
//! ui           - eframe panel over the controller
//! ```

pub mod config;
pub mod mqtt;
pub mod persistence;
pub mod reservoir;
pub mod rpc;
pub mod ui;

pub use config::ControllerConfig;
pub use reservoir::ReservoirController;
