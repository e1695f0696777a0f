//! The transport capability the bike controller is built on.
//!
//! [`BikeController`](crate::bike::BikeController) is generic over a
//! [`Transport`], the same way it would be generic over a motor driver:
//! the controller owns the capability and calls it synchronously. The
//! production implementation is
//! [`BusTransport`](crate::transport::BusTransport); tests substitute a
//! scripted mock from [`crate::hal::mock`].

use crate::modbus::{CommandFrame, Reply};
use crate::transport::BusError;

/// A request/reply channel to the bike's motor boards.
///
/// One call is one complete bus transaction: encode, transmit, wait for
/// the node's answer. Implementations decide how waiting happens (condvar
/// against a UART interrupt, in-memory mock, etc.).
pub trait Transport {
    /// Send one command frame and block until its reply arrives or the
    /// transaction fails.
    fn send_and_await(&mut self, frame: &CommandFrame) -> Result<Reply, BusError>;

    /// Pause the control flow for `ms` milliseconds.
    ///
    /// Kept on the transport so retry spacing and startup settling use
    /// the same time base as the bus itself, and so tests can observe
    /// pauses without sleeping.
    fn pause_ms(&mut self, ms: u32);

    /// Send with a bounded number of retries.
    ///
    /// Performs `1 + retries` attempts, pausing `delay_ms` after each
    /// failure. Failures are logged, never propagated: the bike's boards
    /// drop frames routinely and the control loop just tries again next
    /// cycle. Returns `None` when every attempt failed.
    fn send_with_retries(
        &mut self,
        frame: &CommandFrame,
        retries: u16,
        delay_ms: u32,
    ) -> Option<Reply> {
        let attempts = u32::from(retries) + 1;
        for attempt in 1..=attempts {
            match self.send_and_await(frame) {
                Ok(reply) => return Some(reply),
                Err(err) => {
                    log::warn!(
                        "bus transaction failed (attempt {attempt}/{attempts}): {err}"
                    );
                }
            }
            self.pause_ms(delay_ms);
        }
        log::error!(
            "giving up on {:?} register 0x{:04X} after {attempts} attempts",
            frame.node,
            frame.address
        );
        None
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send_and_await(&mut self, frame: &CommandFrame) -> Result<Reply, BusError> {
        (**self).send_and_await(frame)
    }

    fn pause_ms(&mut self, ms: u32) {
        (**self).pause_ms(ms)
    }
}
