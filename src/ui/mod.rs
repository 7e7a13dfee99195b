//! # Reservoir Panel User Interface
//!
//! An eframe/egui window over [`crate::reservoir::ReservoirController`]. It is
//! a thin collaborator: every frame it calls `drain_and_route()`, then draws
//! from the controller's read accessors and turns button presses into
//! controller operations. No protocol state lives here.
//!
//! ## Layout
//!
//! ```text
//! ┌ Reservoir Controller ● connected ─────────────┐
//! │ Status         pH / EC with history, level    │
//! │ RPC interface  valve, dosing, calibration,    │
//! │                doser count, current error     │
//! │ Compact view / doser labels                   │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Calibration asks for confirmation in a modal before anything is sent.

pub mod common;
pub mod reservoir_panel;

pub use common::UiColors;
pub use reservoir_panel::ReservoirPanel;
