//! # Reservoir Controller
//!
//! Device-side state and the facade that ties it to the transport.
//!
//! ```text
//! reservoir/
//! ├── telemetry.rs    - bounded pH / EC history and discrete values
//! ├── error_queue.rs  - device errors with a freshness window
//! ├── labels.rs       - doser id to nutrient label mapping
//! ├── router.rs       - topic classification and payload parsing
//! └── controller.rs   - ReservoirController facade
//! ```
//!
//! ## Data flow
//!
//! ```text
//! TransportSession::drain_inbound ──► TopicRouter ──┬─► TelemetryStore
//!                                                   └─► RpcCorrelator ──► handler(DeviceState)
//!                                                         └─ error ──► ErrorQueue
//! ```

pub mod controller;
pub mod error_queue;
pub mod labels;
pub mod router;
pub mod telemetry;

pub use controller::{ControllerError, DeviceState, ReservoirController, REQUEST_TIMED_OUT};
pub use error_queue::{ErrorQueue, ReportedError};
pub use labels::{DoserLabel, DoserLabels};
pub use router::{Route, RouteError, RouteTarget, TelemetryUpdate, TopicRouter};
pub use telemetry::TelemetryStore;
