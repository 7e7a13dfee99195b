//! # JSON-RPC over MQTT
//!
//! Requests go out on the request topic as `{"jsonrpc":"2.0","id",...}`
//! documents; responses come back on the response topic and are matched to
//! their handler by id.
//!
//! ```text
//! rpc/
//! ├── message.rs     - RpcRequest / RpcResponse wire types
//! └── correlator.rs  - id allocation, pending handlers, timeouts
//! ```

pub mod correlator;
pub mod message;

pub use correlator::{
    ExpiredRequest, RequestError, RequestSink, ResponseHandler, RpcCorrelator, FIRE_AND_FORGET_ID,
};
pub use message::{ResponseError, RpcErrorObject, RpcRequest, RpcResponse};
