//! Mock implementations for testing without hardware.
//!
//! This module provides test doubles for all hardware and protocol
//! traits, enabling development and testing on desktop without a bike
//! attached.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockTransport`] | [`Transport`] | Scripted bus replies, records frames |
//! | [`MockSerial`] | [`SerialTx`] | Captures transmitted bytes |
//! | [`MockDirection`] | [`BusDirection`] | Records driver-enable toggles |
//! | [`MockClock`] | [`Clock`] | Controllable time source |
//! | [`MockDelay`] | [`Delay`] | Records requested pauses |
//! | [`MockHeartbeat`] | [`Heartbeat`] | Counts toggles |
//! | [`MockNotifier`] | [`Notifier`] | Captures notification payloads |
//! | [`RecordingSink`] | [`TargetSink`] | Captures pushed targets |
//!
//! # Example
//!
//! ```rust
//! use rs_bikez::bike::BikeController;
//! use rs_bikez::hal::MockTransport;
//!
//! let mut bike = BikeController::new(MockTransport::new());
//! bike.initialize();
//!
//! // Every calibration frame was sent once (the mock always answers).
//! assert!(bike.transport().sent.len() >= 8);
//! ```
//!
//! [`Transport`]: crate::traits::Transport
//! [`SerialTx`]: crate::traits::SerialTx
//! [`BusDirection`]: crate::traits::BusDirection
//! [`Clock`]: crate::traits::Clock
//! [`Delay`]: crate::traits::Delay
//! [`Heartbeat`]: crate::traits::Heartbeat
//! [`Notifier`]: crate::traits::Notifier
//! [`TargetSink`]: crate::traits::TargetSink

extern crate alloc;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::bike::BikeTargets;
use crate::modbus::{CommandFrame, FunctionCode, NodeAddress, Reply};
use crate::traits::{
    BusDirection, Clock, Delay, Heartbeat, Notifier, SerialTx, TargetSink, Transport,
};
use crate::transport::{BusError, TransportError};

// ============================================================================
// Transport Mock
// ============================================================================

/// Mock bus transport.
///
/// Records every frame and pause. Replies come from the scripted queue
/// first; once it is empty the mock answers like an agreeable bike:
/// write frames get their ack, read frames get the configured register
/// value for the node. Set `fail_all` to make every transaction time
/// out.
#[derive(Debug, Default)]
pub struct MockTransport {
    /// Every frame passed to `send_and_await`, in order.
    pub sent: Vec<CommandFrame>,
    /// Every pause requested, in milliseconds.
    pub pauses: Vec<u32>,
    /// When true, every transaction fails with `RxTimeout`.
    pub fail_all: bool,
    /// Value returned for cadence reads.
    pub rpm_value: u16,
    /// Value returned for incline reads.
    pub incline_value: u16,
    scripted: Vec<Result<Reply, BusError>>,
}

impl MockTransport {
    /// Transport answering like a bike at rest on level ground.
    pub fn new() -> Self {
        Self {
            incline_value: crate::bike::LEVEL_INCLINE_REGISTER,
            ..Self::default()
        }
    }

    /// Queue a reply for the next transaction (FIFO, ahead of the
    /// auto-answer behavior).
    pub fn queue_reply(&mut self, reply: Result<Reply, BusError>) {
        self.scripted.push(reply);
    }

    /// Frames sent to one node, for targeted assertions.
    pub fn sent_to(&self, node: NodeAddress) -> Vec<CommandFrame> {
        self.sent
            .iter()
            .copied()
            .filter(|f| f.node == node)
            .collect()
    }
}

impl Transport for MockTransport {
    fn send_and_await(&mut self, frame: &CommandFrame) -> Result<Reply, BusError> {
        self.sent.push(*frame);
        if self.fail_all {
            return Err(TransportError::RxTimeout.into());
        }
        if !self.scripted.is_empty() {
            return self.scripted.remove(0);
        }
        match frame.function {
            FunctionCode::WriteHolding => Ok(Reply::WriteAck { node: frame.node }),
            FunctionCode::ReadHolding => Ok(Reply::Register {
                node: frame.node,
                value: match frame.node {
                    NodeAddress::Rpm => self.rpm_value,
                    NodeAddress::Incline => self.incline_value,
                    NodeAddress::Resistance => 0,
                },
            }),
            _ => Err(TransportError::RxTimeout.into()),
        }
    }

    fn pause_ms(&mut self, ms: u32) {
        self.pauses.push(ms);
    }
}

// ============================================================================
// Hardware Mocks
// ============================================================================

/// Mock serial transmitter recording every frame handed to it.
#[derive(Debug, Default)]
pub struct MockSerial {
    /// Raw bytes of each transmitted frame.
    pub written: Vec<Vec<u8>>,
    /// When true, `write_frame` fails.
    pub fail: bool,
}

impl MockSerial {
    /// Serial recorder that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SerialTx for MockSerial {
    type Error = ();

    fn write_frame(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.fail {
            return Err(());
        }
        self.written.push(bytes.to_vec());
        Ok(())
    }
}

/// Mock driver-enable pin recording every state change.
#[derive(Debug, Default)]
pub struct MockDirection {
    /// Every `set_transmit` argument, in order.
    pub states: Vec<bool>,
}

impl MockDirection {
    /// Direction pin recorder.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BusDirection for MockDirection {
    fn set_transmit(&mut self, enabled: bool) {
        self.states.push(enabled);
    }
}

/// Controllable time source for testing.
///
/// # Example
///
/// ```rust
/// use rs_bikez::hal::MockClock;
/// use rs_bikez::traits::Clock;
///
/// let mut clock = MockClock::new();
/// clock.advance(250);
/// assert_eq!(clock.now_ms(), 250);
/// ```
#[derive(Debug, Default)]
pub struct MockClock {
    now: u64,
}

impl MockClock {
    /// Clock frozen at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward.
    pub fn advance(&mut self, ms: u64) {
        self.now += ms;
    }

    /// Jump to an absolute time.
    pub fn set(&mut self, ms: u64) {
        self.now = ms;
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.now
    }
}

/// Delay that records instead of sleeping.
#[derive(Debug, Default)]
pub struct MockDelay {
    /// Every requested pause, in milliseconds.
    pub slept: Vec<u32>,
}

impl MockDelay {
    /// Delay recorder.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Delay for MockDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.slept.push(ms);
    }
}

/// Heartbeat that counts toggles.
#[derive(Debug, Default)]
pub struct MockHeartbeat {
    /// Number of toggles so far.
    pub toggles: u32,
}

impl MockHeartbeat {
    /// Heartbeat counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Heartbeat for MockHeartbeat {
    fn toggle(&mut self) {
        self.toggles += 1;
    }
}

// ============================================================================
// Protocol Mocks
// ============================================================================

/// Mock notification channel capturing every payload.
#[derive(Debug, Default)]
pub struct MockNotifier {
    /// Every notified payload, in order.
    pub sent: Vec<Vec<u8>>,
    /// When true, `notify` fails.
    pub fail: bool,
}

impl MockNotifier {
    /// Notifier that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Notifier for MockNotifier {
    type Error = ();

    fn notify(&mut self, payload: &[u8]) -> Result<(), Self::Error> {
        if self.fail {
            return Err(());
        }
        self.sent.push(payload.to_vec());
        Ok(())
    }
}

/// Target sink capturing every pushed target set.
#[derive(Debug, Default)]
pub struct RecordingSink {
    targets: RefCell<Vec<BikeTargets>>,
}

impl RecordingSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything pushed so far.
    pub fn targets(&self) -> Vec<BikeTargets> {
        self.targets.borrow().clone()
    }
}

impl TargetSink for RecordingSink {
    fn apply_targets(&self, targets: BikeTargets) {
        self.targets.borrow_mut().push(targets);
    }
}
