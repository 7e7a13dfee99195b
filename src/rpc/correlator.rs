use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::message::{RpcRequest, RpcResponse};
use crate::mqtt::{TransportError, TransportSession};

/// Id used for requests nobody waits on.
pub const FIRE_AND_FORGET_ID: i64 = 0;

/// One-shot handler run against the owner's state when the response arrives.
pub type ResponseHandler<C> = Box<dyn FnOnce(&mut C, &RpcResponse) + Send>;

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to publish request: {0}")]
    Transport(#[from] TransportError),
}

/// Where encoded requests go.
pub trait RequestSink {
    fn publish_request(&self, payload: Vec<u8>) -> Result<(), TransportError>;
}

impl RequestSink for TransportSession {
    fn publish_request(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.publish(&self.topics().request, payload)
    }
}

struct PendingRequest<C> {
    method: String,
    issued_at: Instant,
    handler: ResponseHandler<C>,
}

/// A handler dropped by [`RpcCorrelator::expire`].
#[derive(Clone, Debug, PartialEq)]
pub struct ExpiredRequest {
    pub id: i64,
    pub method: String,
    pub age: Duration,
}

/// Matches responses to the handlers registered when the requests went out.
///
/// Registering a handler for an id that is still pending replaces the old
/// handler; the replaced one is dropped without running.
pub struct RpcCorrelator<C> {
    pending: HashMap<i64, PendingRequest<C>>,
    next_id: i64,
    timeout: Option<Duration>,
}

impl<C> RpcCorrelator<C> {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            pending: HashMap::new(),
            next_id: 1,
            timeout,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: i64) -> bool {
        self.pending.contains_key(&id)
    }

    /// Publishes a request, allocating an id when a handler is given.
    ///
    /// Without a handler the request goes out with id 0.
    pub fn send(
        &mut self,
        sink: &dyn RequestSink,
        method: &str,
        params: Option<Value>,
        handler: Option<ResponseHandler<C>>,
    ) -> Result<i64, RequestError> {
        let id = if handler.is_some() {
            self.allocate_id()
        } else {
            FIRE_AND_FORGET_ID
        };
        self.dispatch(sink, id, method, params, handler)
    }

    /// Publishes a request under a caller-chosen id.
    pub fn send_with_id(
        &mut self,
        sink: &dyn RequestSink,
        id: i64,
        method: &str,
        params: Option<Value>,
        handler: Option<ResponseHandler<C>>,
    ) -> Result<i64, RequestError> {
        self.dispatch(sink, id, method, params, handler)
    }

    fn dispatch(
        &mut self,
        sink: &dyn RequestSink,
        id: i64,
        method: &str,
        params: Option<Value>,
        handler: Option<ResponseHandler<C>>,
    ) -> Result<i64, RequestError> {
        let registered = handler.is_some();
        let displaced = handler.and_then(|handler| self.register(id, method, handler));

        let request = RpcRequest::new(id, method, params);
        let published = request
            .to_bytes()
            .map_err(RequestError::from)
            .and_then(|payload| sink.publish_request(payload).map_err(RequestError::from));

        match published {
            Ok(()) => {
                if let Some(replaced) = displaced {
                    warn!(
                        "Handler for id {} ({}) replaced by {} before a response arrived",
                        id, replaced.method, method
                    );
                }
                debug!("Sent {} with id {}", method, id);
                Ok(id)
            }
            Err(e) => {
                // the earlier request did go out, so its handler stays
                match displaced {
                    Some(previous) => {
                        self.pending.insert(id, previous);
                    }
                    None if registered => {
                        self.pending.remove(&id);
                    }
                    None => {}
                }
                warn!("Request {} (id {}) not sent: {}", method, id, e);
                Err(e)
            }
        }
    }

    fn register(
        &mut self,
        id: i64,
        method: &str,
        handler: ResponseHandler<C>,
    ) -> Option<PendingRequest<C>> {
        let entry = PendingRequest {
            method: method.to_string(),
            issued_at: Instant::now(),
            handler,
        };
        self.pending.insert(id, entry)
    }

    // starts at 1, skips 0 and anything still pending
    fn allocate_id(&mut self) -> i64 {
        loop {
            let id = self.next_id;
            self.next_id = match self.next_id.checked_add(1) {
                Some(next) => next,
                None => 1,
            };
            if id != FIRE_AND_FORGET_ID && !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// Runs and removes the handler for the response id. Returns whether one ran.
    pub fn resolve(&mut self, context: &mut C, response: &RpcResponse) -> bool {
        match self.pending.remove(&response.id) {
            Some(pending) => {
                debug!(
                    "Response for {} (id {}) after {:?}",
                    pending.method,
                    response.id,
                    pending.issued_at.elapsed()
                );
                (pending.handler)(context, response);
                true
            }
            None => false,
        }
    }

    /// Drops handlers older than the timeout, oldest id first.
    pub fn expire(&mut self, now: Instant) -> Vec<ExpiredRequest> {
        let Some(timeout) = self.timeout else {
            return Vec::new();
        };

        let mut expired_ids: Vec<i64> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.issued_at) >= timeout)
            .map(|(id, _)| *id)
            .collect();
        expired_ids.sort_unstable();

        expired_ids
            .into_iter()
            .filter_map(|id| {
                self.pending.remove(&id).map(|p| ExpiredRequest {
                    id,
                    method: p.method,
                    age: now.saturating_duration_since(p.issued_at),
                })
            })
            .collect()
    }
}
