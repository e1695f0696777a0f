//! Protocol seam traits: outbound notifications and inbound targets.
//!
//! The FTMS and FE-C adapters are radio-stack agnostic. Whatever hosts
//! them (a BLE GATT server, a bench harness) provides a [`Notifier`] per
//! characteristic; whatever owns the bike state provides a [`TargetSink`].

use crate::bike::BikeTargets;

/// Outbound notification channel for one protocol characteristic.
///
/// Each adapter holds one notifier per characteristic it notifies on
/// (bike data, control responses, FE-C broadcasts). The payload is the
/// finished wire bytes; the notifier only delivers them.
pub trait Notifier {
    /// Error type for delivery failures.
    type Error: core::fmt::Debug;

    /// Deliver one notification payload.
    fn notify(&mut self, payload: &[u8]) -> Result<(), Self::Error>;
}

/// Intake for target changes arriving from a remote protocol.
///
/// Implemented by the shared bike state: adapters push a
/// [`BikeTargets`] and the next control cycle acts on it. Takes `&self`
/// because adapters and the control loop share the sink across threads.
pub trait TargetSink {
    /// Apply a target change to the bike.
    fn apply_targets(&self, targets: BikeTargets);
}
