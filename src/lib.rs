//! # rs-bikez
//!
//! A controller core for retrofit indoor exercise bikes: drives the
//! bike's internal motor boards over their half-duplex ASCII serial bus
//! and exposes the machine to trainer apps over Bluetooth FTMS and
//! ANT+ FE-C.
//!
//! ## Features
//!
//! - **Hardware abstraction**: Traits for the serial bus, timing, and
//!   notification channels, so the whole stack runs against mocks
//! - **Byte-exact bus codec**: The bike's Modbus-flavoured ASCII frames,
//!   checksums, and 7N2 bit stuffing
//! - **Half-duplex transport**: One transaction in flight, bounded waits,
//!   garbage-tolerant receive framing
//! - **Control core**: Calibration, the 500ms poll/adjust cycle, target
//!   mapping, and an empirical power model
//! - **Protocol adapters**: FTMS control point + telemetry, FE-C page
//!   broadcast schedule with inbound control pages
//!
//! ## Architecture
//!
//! The crate is structured to allow testing on desktop without hardware:
//!
//! - `traits` - Hardware and protocol-seam abstractions
//! - `modbus` - Frame codec for the internal serial bus
//! - `transport` - Half-duplex bus state machine (`std`)
//! - `bike` - The control core that ties everything together
//! - `buttons` - Debounce for the handlebar rockers
//! - `services` - Shared state and the FTMS/FE-C adapters (`std`)
//! - `hal` - Concrete implementations (mock for testing, std clock/delay)
//!
//! ## Example
//!
//! ```rust
//! use rs_bikez::{
//!     bike::{BikeController, BikeTargets},
//!     hal::MockTransport,
//! };
//!
//! // Create the control core against a mock bus
//! let mut bike = BikeController::new(MockTransport::new());
//! bike.initialize();
//!
//! // A trainer app asks for a 10% climb
//! bike.apply_targets(BikeTargets::grade(1000));
//!
//! // The next cycle pushes it to the boards
//! bike.run_cycle();
//! assert_eq!(bike.target_incline(), 40);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

extern crate alloc;

/// Control core: state, calibration, cycle, targets, power model.
pub mod bike;
/// Debounce for the handlebar adjustment buttons.
pub mod buttons;
/// Shared configuration for the bus, control loop, and adapters.
pub mod config;
/// Hardware abstraction layer with mock implementations for testing.
pub mod hal;
/// ASCII frame codec for the internal serial bus.
pub mod modbus;
/// Core traits for hardware abstraction and protocol seams.
pub mod traits;
/// Half-duplex bus transport and receive framing.
pub mod transport;

/// Shared state and the FTMS/FE-C protocol adapters.
#[cfg(feature = "std")]
pub mod services;

// Re-exports for convenience
pub use bike::{BikeController, BikeData, BikeTargets};
pub use buttons::{evaluate_button, Adjustment, ButtonDebouncer};
pub use modbus::{CodecError, CommandFrame, FunctionCode, NodeAddress, Reply};
pub use traits::{
    // Hardware
    BusDirection,
    Clock,
    Delay,
    Heartbeat,
    // Protocol seams
    Notifier,
    SerialTx,
    TargetSink,
    Transport,
};
pub use transport::{BusError, RxAccumulator, TransportError};

#[cfg(feature = "std")]
pub use transport::BusTransport;

// Config re-exports
pub use config::{BroadcastConfig, BusConfig, Config, ControlConfig, DeviceConfig};
