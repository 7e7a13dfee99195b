use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::Topics;
use crate::mqtt::InboundMessage;
use crate::rpc::{ResponseError, RpcResponse};

/// Any subset of the fields the device pushes on the telemetry topic.
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TelemetryUpdate {
    pub ph: Option<f64>,
    pub ec: Option<f64>,
    #[serde(rename = "liquidLevel")]
    pub liquid_level: Option<String>,
}

impl TelemetryUpdate {
    /// Parses a telemetry object; arrays and scalars are rejected.
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let fields: Map<String, Value> = serde_json::from_slice(payload)?;
        serde_json::from_value(Value::Object(fields))
    }

    pub fn is_empty(&self) -> bool {
        self.ph.is_none() && self.ec.is_none() && self.liquid_level.is_none()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Malformed telemetry on {topic}: {source}")]
    Telemetry {
        topic: String,
        source: serde_json::Error,
    },

    #[error("Malformed response on {topic}: {source}")]
    Response {
        topic: String,
        source: ResponseError,
    },
}

/// Receives what the router extracted from a message.
pub trait RouteTarget {
    fn on_telemetry(&mut self, update: TelemetryUpdate);

    fn on_response(&mut self, response: RpcResponse);
}

#[derive(Clone, Debug, PartialEq)]
pub enum Route {
    Telemetry(TelemetryUpdate),
    Response(RpcResponse),
    Ignored,
}

/// Classifies inbound messages by exact topic match.
#[derive(Clone, Debug)]
pub struct TopicRouter {
    telemetry_topic: String,
    response_topic: String,
}

impl TopicRouter {
    pub fn new(topics: &Topics) -> Self {
        Self {
            telemetry_topic: topics.telemetry.clone(),
            response_topic: topics.response.clone(),
        }
    }

    /// Parses the payload according to its topic. Unknown topics are [`Route::Ignored`].
    pub fn classify(&self, msg: &InboundMessage) -> Result<Route, RouteError> {
        let topic = msg.topic();

        if topic == self.telemetry_topic {
            TelemetryUpdate::from_slice(msg.payload())
                .map(Route::Telemetry)
                .map_err(|source| RouteError::Telemetry {
                    topic: topic.to_string(),
                    source,
                })
        } else if topic == self.response_topic {
            RpcResponse::from_slice(msg.payload())
                .map(Route::Response)
                .map_err(|source| RouteError::Response {
                    topic: topic.to_string(),
                    source,
                })
        } else {
            debug!("Ignoring message on unknown topic {}", topic);
            Ok(Route::Ignored)
        }
    }

    /// Classifies and dispatches one message. Returns whether anything was dispatched.
    pub fn route<T: RouteTarget>(
        &self,
        msg: &InboundMessage,
        target: &mut T,
    ) -> Result<bool, RouteError> {
        match self.classify(msg)? {
            Route::Telemetry(update) => {
                target.on_telemetry(update);
                Ok(true)
            }
            Route::Response(response) => {
                target.on_response(response);
                Ok(true)
            }
            Route::Ignored => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Collected {
        telemetry: Vec<TelemetryUpdate>,
        responses: Vec<RpcResponse>,
    }

    impl RouteTarget for Collected {
        fn on_telemetry(&mut self, update: TelemetryUpdate) {
            self.telemetry.push(update);
        }

        fn on_response(&mut self, response: RpcResponse) {
            self.responses.push(response);
        }
    }

    fn router() -> TopicRouter {
        TopicRouter::new(&Topics::default())
    }

    #[test]
    fn telemetry_fields_are_optional() {
        let msg = InboundMessage::new(
            "ReservoirController/telemetry",
            br#"{"ph":6.2,"liquidLevel":"ok","uptime":17}"#.to_vec(),
        );
        assert_eq!(
            router().classify(&msg).unwrap(),
            Route::Telemetry(TelemetryUpdate {
                ph: Some(6.2),
                ec: None,
                liquid_level: Some("ok".to_string()),
            })
        );

        let empty = InboundMessage::new("ReservoirController/telemetry", b"{}".to_vec());
        match router().classify(&empty).unwrap() {
            Route::Telemetry(update) => assert!(update.is_empty()),
            other => panic!("unexpected route {:?}", other),
        }
    }

    #[test]
    fn wrong_field_type_is_malformed() {
        let msg = InboundMessage::new(
            "ReservoirController/telemetry",
            br#"{"ph":"acidic","ec":1.1}"#.to_vec(),
        );
        let mut target = Collected::default();
        assert!(matches!(
            router().route(&msg, &mut target),
            Err(RouteError::Telemetry { .. })
        ));
        assert!(target.telemetry.is_empty());
    }

    #[test]
    fn array_payloads_are_malformed() {
        let mut target = Collected::default();
        let telemetry =
            InboundMessage::new("ReservoirController/telemetry", br#"[6.1,1.2,"ok"]"#.to_vec());
        assert!(matches!(
            router().route(&telemetry, &mut target),
            Err(RouteError::Telemetry { .. })
        ));

        let response =
            InboundMessage::new("ReservoirController/rpc/response", b"[420,4,null]".to_vec());
        assert!(matches!(
            router().route(&response, &mut target),
            Err(RouteError::Response {
                source: ResponseError::Json(_),
                ..
            })
        ));
        assert!(target.telemetry.is_empty() && target.responses.is_empty());
    }

    #[test]
    fn responses_reach_the_target() {
        let msg = InboundMessage::new(
            "ReservoirController/rpc/response",
            br#"{"jsonrpc":"2.0","id":420,"result":4}"#.to_vec(),
        );
        let mut target = Collected::default();
        assert!(router().route(&msg, &mut target).unwrap());
        assert_eq!(target.responses[0].id, 420);
        assert_eq!(target.responses[0].result, Some(json!(4)));
    }

    #[test]
    fn response_without_id_is_malformed() {
        let msg = InboundMessage::new(
            "ReservoirController/rpc/response",
            br#"{"jsonrpc":"2.0","result":4}"#.to_vec(),
        );
        assert!(matches!(
            router().classify(&msg),
            Err(RouteError::Response {
                source: ResponseError::MissingId,
                ..
            })
        ));
    }

    #[test]
    fn unknown_topics_are_ignored() {
        let mut target = Collected::default();
        let msg = InboundMessage::new("ReservoirController/rpc/request", b"{}".to_vec());
        assert!(!router().route(&msg, &mut target).unwrap());
        // topic match is exact
        let msg = InboundMessage::new("reservoircontroller/telemetry", b"{}".to_vec());
        assert!(!router().route(&msg, &mut target).unwrap());
        assert!(target.telemetry.is_empty() && target.responses.is_empty());
    }
}
