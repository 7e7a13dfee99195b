use chrono::{DateTime, Local};
use std::fmt;

/// A message taken off the broker connection, waiting to be routed.
///
/// Created inside the I/O task and moved through the inbound channel; it is
/// never mutated after construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    topic: String,
    payload: Vec<u8>,
    received_at: DateTime<Local>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Local::now(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn received_at(&self) -> DateTime<Local> {
        self.received_at
    }

    /// Lossy UTF-8 view of the payload, for diagnostics.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = self.payload_text();
        let preview: String = text.chars().take(48).collect();
        write!(
            f,
            "{} {} ({} bytes): {}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            self.payload.len(),
            preview
        )
    }
}
