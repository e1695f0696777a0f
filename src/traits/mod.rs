//! Trait definitions for hardware abstraction and protocol seams.
//!
//! This module defines the core abstractions that allow rs-bikez to:
//! - Run against real UART/GPIO hardware or desktop mocks
//! - Drive the bike over any half-duplex transport implementation
//! - Push protocol payloads through any notification-capable link
//!
//! # Submodules
//!
//! - `hardware`: Serial transmit, bus direction pin, clock, delay, heartbeat
//! - `control`: The [`Transport`] capability the bike controller drives
//! - `telemetry`: Outbound notification sink and target intake
//!
//! # Hardware Abstraction
//!
//! The key hardware traits are:
//!
//! - [`SerialTx`]: Raw byte transmit on the bike's internal bus
//! - [`BusDirection`]: RS-485-style driver-enable pin
//! - [`Clock`]: Monotonic time source for `no_std` environments
//! - [`Delay`]: Blocking pause, used for broadcast pacing and retry spacing
//!
//! # Protocol Seams
//!
//! The adapters in [`crate::services`] never talk to a BLE/ANT stack
//! directly. They are constructed with a [`Notifier`] for outbound payloads
//! and a [`TargetSink`] for inbound target changes, so the same adapter
//! code runs under a real radio stack or a test harness.

pub mod control;
pub mod hardware;
pub mod telemetry;

pub use control::*;
pub use hardware::*;
pub use telemetry::*;
