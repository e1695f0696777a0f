//! Threaded services around the control core.
//!
//! This module hosts everything that runs beside the control loop:
//! - `shared`: thread-safe access to the single [`BikeController`] with
//!   bounded lock waits
//! - `ftms`: the Bluetooth Fitness Machine Service adapter
//! - `fec`: the ANT+ FE-C broadcast adapter
//!
//! # Shared State Pattern
//!
//! All services share one controller instance via `SharedBikeState`:
//!
//! ```ignore
//! use std::sync::Arc;
//! use rs_bikez::services::{FtmsService, SharedBikeState};
//!
//! // Create single shared state
//! let state = Arc::new(SharedBikeState::new(controller));
//!
//! // Adapters push targets through the same state
//! let ftms = FtmsService::new(bike_data, control, status, Arc::clone(&state));
//! ```
//!
//! [`BikeController`]: crate::bike::BikeController

pub mod fec;
pub mod ftms;
pub mod shared;

pub use fec::*;
pub use ftms::*;
pub use shared::*;
