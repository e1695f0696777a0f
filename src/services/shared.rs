//! Shared bike state for multi-threaded access.
//!
//! The control loop, the button interrupts, and both protocol adapters
//! all want at the same [`BikeController`]. They share it through
//! [`SharedBikeState`], an `Arc`-able wrapper whose lock waits are
//! bounded: a caller that cannot get the controller inside the window
//! logs and skips rather than stalling its thread. A missed button step
//! or one stale telemetry frame is harmless; a frozen broadcast thread
//! is not.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use rs_bikez::services::SharedBikeState;
//!
//! let state = Arc::new(SharedBikeState::new(controller));
//!
//! // Control loop thread
//! state.with_controller(|bike| bike.run_cycle());
//!
//! // Telemetry thread
//! if let Some(data) = state.snapshot() {
//!     ftms.notify_bike_data(&data);
//! }
//! ```

use std::sync::{Condvar, Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use crate::bike::{BikeController, BikeData, BikeTargets};
use crate::traits::{TargetSink, Transport};

/// Default bounded wait when contending for the controller.
pub const STATE_LOCK_TIMEOUT_MS: u64 = 50;

/// Thread-safe wrapper around the bike controller.
///
/// Wrap in `Arc` and clone the handle into every thread that needs the
/// bike. Also keeps the process start time so interrupt-ish callers can
/// timestamp events without their own clock.
pub struct SharedBikeState<T: Transport> {
    controller: Mutex<BikeController<T>>,
    start_time: Instant,
    lock_timeout_ms: u64,
}

impl<T: Transport> SharedBikeState<T> {
    /// Wrap a controller for shared access.
    pub fn new(controller: BikeController<T>) -> Self {
        Self {
            controller: Mutex::new(controller),
            start_time: Instant::now(),
            lock_timeout_ms: STATE_LOCK_TIMEOUT_MS,
        }
    }

    /// Override the bounded lock wait.
    pub fn with_lock_timeout_ms(mut self, ms: u64) -> Self {
        self.lock_timeout_ms = ms;
        self
    }

    /// Milliseconds since this state was created.
    pub fn now_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Run a closure against the controller under a bounded lock.
    ///
    /// Returns `None` (after logging) when the controller stayed busy for
    /// the whole window; callers treat that as "skip this tick".
    pub fn with_controller<R>(&self, f: impl FnOnce(&mut BikeController<T>) -> R) -> Option<R> {
        match bounded_lock(&self.controller, self.lock_timeout_ms) {
            Some(mut guard) => Some(f(&mut guard)),
            None => {
                log::warn!(
                    "bike state busy for {}ms, skipping access",
                    self.lock_timeout_ms
                );
                None
            }
        }
    }

    /// Snapshot the telemetry values, or `None` if the controller is busy.
    pub fn snapshot(&self) -> Option<BikeData> {
        self.with_controller(|bike| bike.data())
    }
}

impl<T: Transport> TargetSink for std::sync::Arc<SharedBikeState<T>> {
    fn apply_targets(&self, targets: BikeTargets) {
        if self
            .with_controller(|bike| bike.apply_targets(targets))
            .is_none()
        {
            log::warn!("dropped remote target change, bike state busy");
        }
    }
}

/// Try to take a mutex for up to `timeout_ms`, polling rather than
/// blocking so a wedged holder cannot take this thread down with it.
/// A poisoned lock is recovered; the bike state has no invariants the
/// next control cycle will not rebuild.
pub fn bounded_lock<T>(mutex: &Mutex<T>, timeout_ms: u64) -> Option<MutexGuard<'_, T>> {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        match mutex.try_lock() {
            Ok(guard) => return Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                if Instant::now() >= deadline {
                    return None;
                }
                thread::sleep(Duration::from_millis(1));
            }
        }
    }
}

/// A busy flag with a bounded wait, serializing control-point handling
/// against telemetry emission on the same characteristic.
///
/// [`enter`](Self::enter) returns `false` on timeout; callers log and
/// proceed anyway, mirroring the bounded-lock degrade policy.
pub struct BoundedGate {
    busy: Mutex<bool>,
    freed: Condvar,
}

impl Default for BoundedGate {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundedGate {
    /// A free gate.
    pub fn new() -> Self {
        Self {
            busy: Mutex::new(false),
            freed: Condvar::new(),
        }
    }

    /// Wait up to `timeout_ms` for the gate, then claim it regardless.
    /// Returns whether the gate was actually free.
    pub fn enter(&self, timeout_ms: u64) -> bool {
        let guard = self.busy.lock().unwrap_or_else(|p| p.into_inner());
        let (mut guard, timeout) = self
            .freed
            .wait_timeout_while(guard, Duration::from_millis(timeout_ms), |busy| *busy)
            .unwrap_or_else(|p| p.into_inner());
        *guard = true;
        !timeout.timed_out()
    }

    /// Release the gate.
    pub fn exit(&self) {
        *self.busy.lock().unwrap_or_else(|p| p.into_inner()) = false;
        self.freed.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::hal::MockTransport;

    fn shared() -> Arc<SharedBikeState<MockTransport>> {
        Arc::new(SharedBikeState::new(BikeController::new(
            MockTransport::new(),
        )))
    }

    #[test]
    fn with_controller_returns_closure_result() {
        let state = shared();
        let rpm = state.with_controller(|bike| bike.rpm());
        assert_eq!(rpm, Some(0));
    }

    #[test]
    fn snapshot_reflects_controller_state() {
        let state = shared();
        let data = state.snapshot().unwrap();
        assert_eq!(data.rpm, 0);
        assert_eq!(data.display_resistance, 1);
        assert_eq!(data.watts, 0);
    }

    #[test]
    fn target_sink_reaches_the_controller() {
        let state = shared();
        state.apply_targets(BikeTargets::grade(1000));
        assert_eq!(state.with_controller(|b| b.target_incline()), Some(40));
    }

    #[test]
    fn bounded_lock_gives_up_on_contended_mutex() {
        let mutex = Arc::new(Mutex::new(0u32));
        let guard = mutex.lock().unwrap();

        let start = Instant::now();
        assert!(bounded_lock(&mutex, 20).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
        drop(guard);

        assert!(bounded_lock(&mutex, 20).is_some());
    }

    #[test]
    fn gate_times_out_but_still_claims() {
        let gate = BoundedGate::new();
        assert!(gate.enter(10));
        // Second entry finds it busy and times out.
        assert!(!gate.enter(10));
        gate.exit();
        assert!(gate.enter(10));
    }
}
