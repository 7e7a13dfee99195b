use serde::Serialize;
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound request as it goes on the wire.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

const DEFAULT_ERROR_CODE: i64 = -1;
const DEFAULT_ERROR_MESSAGE: &str = "No message";

/// The `error` member of a response.
///
/// Devices are not strict about its shape: anything missing or of the wrong
/// type falls back to `-1` / `"No message"`, and a bare string is taken as
/// the message.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut fields) => Self {
                code: fields
                    .get("code")
                    .and_then(Value::as_i64)
                    .unwrap_or(DEFAULT_ERROR_CODE),
                message: match fields.remove("message") {
                    Some(Value::String(message)) => message,
                    Some(Value::Null) | None => DEFAULT_ERROR_MESSAGE.to_string(),
                    Some(other) => other.to_string(),
                },
                data: fields.remove("data").filter(|d| !d.is_null()),
            },
            Value::String(message) => Self {
                code: DEFAULT_ERROR_CODE,
                message,
                data: None,
            },
            other => Self {
                code: DEFAULT_ERROR_CODE,
                message: DEFAULT_ERROR_MESSAGE.to_string(),
                data: Some(other),
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("Response is not a JSON object: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Response has no integer id")]
    MissingId,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RpcResponse {
    pub id: i64,
    pub result: Option<Value>,
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    /// Parses a response object. Arrays and scalars are rejected, as is a
    /// missing or non-integer `id`.
    pub fn from_slice(payload: &[u8]) -> Result<Self, ResponseError> {
        let mut fields: Map<String, Value> = serde_json::from_slice(payload)?;
        let id = fields
            .get("id")
            .and_then(Value::as_i64)
            .ok_or(ResponseError::MissingId)?;

        Ok(Self {
            id,
            result: fields.remove("result").filter(|r| !r.is_null()),
            error: fields
                .remove("error")
                .filter(|e| !e.is_null())
                .map(RpcErrorObject::from_value),
        })
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_without_params_omits_the_field() {
        let bytes = RpcRequest::new(0, "openValve", None).to_bytes().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 0, "method": "openValve"}));
    }

    #[test]
    fn request_with_params() {
        let request = RpcRequest::new(7, "dose", Some(json!({"doserID": 2, "amount": 1.5})));
        let value: Value = serde_json::from_slice(&request.to_bytes().unwrap()).unwrap();
        assert_eq!(value["params"]["doserID"], 2);
        assert_eq!(value["params"]["amount"], 1.5);
    }

    #[test]
    fn result_response() {
        let response = RpcResponse::from_slice(br#"{"jsonrpc":"2.0","id":420,"result":4}"#).unwrap();
        assert_eq!(response.id, 420);
        assert_eq!(response.result, Some(json!(4)));
        assert!(!response.is_error());
    }

    #[test]
    fn error_members_fall_back_to_defaults() {
        let response =
            RpcResponse::from_slice(br#"{"jsonrpc":"2.0","id":3,"error":{}}"#).unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -1);
        assert_eq!(error.message, "No message");
        assert_eq!(error.data, None);

        let response = RpcResponse::from_slice(
            br#"{"id":3,"error":{"code":-32601,"message":"Method not found","data":"dose"}}"#,
        )
        .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
        assert_eq!(error.data, Some(json!("dose")));
    }

    #[test]
    fn loosely_shaped_errors_still_surface() {
        let response =
            RpcResponse::from_slice(br#"{"id":9,"error":{"code":"E42","message":"pump jammed"}}"#)
                .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -1);
        assert_eq!(error.message, "pump jammed");

        let response = RpcResponse::from_slice(br#"{"id":9,"error":"tank empty"}"#).unwrap();
        let error = response.error.unwrap();
        assert_eq!((error.code, error.message.as_str()), (-1, "tank empty"));

        let response = RpcResponse::from_slice(br#"{"id":9,"error":17}"#).unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.message, "No message");
        assert_eq!(error.data, Some(json!(17)));

        let response = RpcResponse::from_slice(br#"{"id":9,"result":1,"error":null}"#).unwrap();
        assert!(!response.is_error());
    }

    #[test]
    fn only_objects_are_responses() {
        let payloads: [&[u8]; 3] = [br#"[420,4,null]"#, b"420", br#""id""#];
        for payload in payloads {
            assert!(matches!(
                RpcResponse::from_slice(payload),
                Err(ResponseError::Json(_))
            ));
        }
    }

    #[test]
    fn response_without_integer_id_is_malformed() {
        let payloads: [&[u8]; 4] = [
            br#"{"jsonrpc":"2.0","result":4}"#,
            br#"{"id":null,"result":4}"#,
            br#"{"id":"420","result":4}"#,
            br#"{"id":4.5,"result":4}"#,
        ];
        for payload in payloads {
            assert!(matches!(
                RpcResponse::from_slice(payload),
                Err(ResponseError::MissingId)
            ));
        }
        assert!(matches!(
            RpcResponse::from_slice(b"not json"),
            Err(ResponseError::Json(_))
        ));
    }
}
