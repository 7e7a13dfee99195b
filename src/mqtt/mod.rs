//! # MQTT Transport Session
//!
//! Owns the one logical connection to the broker and everything that keeps it
//! alive. The rest of the crate never touches rumqttc directly; it sees a
//! [`TransportSession`] with `connect`, `publish`, `subscribe`, connection
//! state, an inbound message channel and four lifecycle observers.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── message.rs    - InboundMessage handed from the I/O task to the owner
//! ├── link.rs       - BrokerLink / Publisher seams and their rumqttc implementations
//! ├── reconnect.rs  - ConnectionState and the bounded reconnect machine
//! └── session.rs    - TransportSession handle and the typestate driver task
//! ```
//!
//! ## Threading
//!
//! ```text
//!  rumqttc EventLoop ──► SessionDriver task ──try_send──► inbound channel ──► owner tick
//!                             │                                          (drain_inbound)
//!                             ├──► watch<ConnectionState>
//!                             └──► observers (connected / lost / fatal / message)
//! ```
//!
//! The driver never blocks on the owner and never touches application state.
//! Back-off sleeps run inside the driver and are cancelled by `shutdown()`.

pub mod link;
pub mod message;
pub mod reconnect;
pub mod session;

pub use link::{BrokerLink, LinkEvent, Publisher, RumqttLink, RumqttPublisher};
pub use message::InboundMessage;
pub use reconnect::{Backoff, ConnectionState, ReconnectMachine, RetryPolicy, Step};
pub use session::{SessionFailure, SessionSettings, TransportSession};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("Broker refused connection: {0}")]
    Refused(String),

    #[error("Client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Link failure: {0}")]
    Link(String),

    #[error("Session driver already started")]
    AlreadyStarted,

    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
}
