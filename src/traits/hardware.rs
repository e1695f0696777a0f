//! Hardware abstraction traits for the serial bus, timing, and status LED.
//!
//! This module defines the hardware interfaces that allow rs-bikez to
//! work across different platforms (embedded targets, desktop mocks, bench
//! simulators).
//!
//! # Key Traits
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`SerialTx`] | Raw frame transmit on the internal UART |
//! | [`BusDirection`] | Driver-enable pin for the half-duplex transceiver |
//! | [`Clock`] | Time source for `no_std` environments |
//! | [`Delay`] | Blocking millisecond pause |
//! | [`Heartbeat`] | Liveness LED toggled once per control cycle |
//!
//! # Implementation
//!
//! For testing and desktop development, use the mock implementations
//! from [`crate::hal::mock`]. A std-backed [`Clock`]/[`Delay`] pair lives
//! in [`crate::hal`] behind the `std` feature.

/// Raw byte transmit on the bike's internal serial bus.
///
/// The transport hands this an already-encoded, already-stuffed frame.
/// Completion is reported separately through the transport's tx-done
/// signal, mirroring a DMA/interrupt-driven UART: `write_frame` only has
/// to start the transfer.
///
/// # Implementation Notes
///
/// - Frames are at most [`FRAME_LEN`](crate::modbus::FRAME_LEN) bytes
/// - The bus runs at 38400 baud, so a frame is on the wire for ~4ms
pub trait SerialTx {
    /// Error type for transmit failures.
    type Error: core::fmt::Debug;

    /// Start transmitting the given bytes.
    fn write_frame(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;
}

/// Driver-enable control for the half-duplex bus transceiver.
///
/// The bike's internal bus shares one pair of wires; the controller must
/// assert the driver-enable pin before transmitting and release it before
/// any node can answer.
pub trait BusDirection {
    /// Assert (`true`) or release (`false`) the driver-enable pin.
    fn set_transmit(&mut self, enabled: bool);
}

/// Time source trait for `no_std` compatibility.
///
/// Provides monotonic time in milliseconds for debounce windows and
/// broadcast pacing. On desktop, this can wrap `std::time::Instant`. On
/// embedded, use a hardware timer.
///
/// # Example
///
/// ```rust
/// use rs_bikez::traits::Clock;
/// use rs_bikez::hal::MockClock;
///
/// let mut clock = MockClock::new();
/// assert_eq!(clock.now_ms(), 0);
///
/// clock.advance(100);
/// assert_eq!(clock.now_ms(), 100);
/// ```
pub trait Clock {
    /// Returns current time in milliseconds since an arbitrary epoch.
    ///
    /// Must be monotonically increasing.
    fn now_ms(&self) -> u64;
}

/// Blocking millisecond delay.
///
/// The control loop and the broadcast scheduler run on their own threads
/// and pace themselves with plain blocking sleeps.
pub trait Delay {
    /// Pause the calling thread for the specified number of milliseconds.
    fn delay_ms(&mut self, ms: u32);
}

/// Liveness indicator toggled once per control cycle.
///
/// On hardware this is an LED; on desktop it can log or count.
pub trait Heartbeat {
    /// Flip the indicator state.
    fn toggle(&mut self);
}
