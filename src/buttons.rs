//! Debounce for the handlebar adjustment buttons.
//!
//! The bike has two rocker pairs, incline up/down and resistance up/down,
//! wired to GPIO edge interrupts. Mechanical rockers chatter, so each pair
//! gets a [`ButtonDebouncer`]: the first edge opens a hold-off window and
//! is acted on immediately, further edges inside the window are ignored,
//! and when the window elapses the pin levels are sampled again so a
//! still-held rocker auto-repeats.
//!
//! Incline uses a 250ms window, resistance 750ms (the resistance motor
//! takes noticeably longer to move a step).

/// Hold-off window for the incline rocker.
pub const INCLINE_DEBOUNCE_MS: u64 = 250;

/// Hold-off window for the resistance rocker.
pub const RESISTANCE_DEBOUNCE_MS: u64 = 750;

/// Direction of a requested one-step adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    /// One step up.
    Increase,
    /// One step down.
    Decrease,
}

/// Interpret the two pin levels of a rocker pair.
///
/// Exactly one pressed means an adjustment in that direction; neither or
/// both pressed means no action.
pub fn evaluate_button(up_pressed: bool, down_pressed: bool) -> Option<Adjustment> {
    match (up_pressed, down_pressed) {
        (true, false) => Some(Adjustment::Increase),
        (false, true) => Some(Adjustment::Decrease),
        _ => None,
    }
}

/// Debounce state machine for one rocker pair.
///
/// Driven from two places: [`on_edge`](Self::on_edge) from the GPIO
/// interrupt path, and [`on_window_elapsed`](Self::on_window_elapsed)
/// from the periodic loop once the window may have expired. Both take the
/// current time explicitly so tests drive it with a fake clock.
#[derive(Debug, Clone)]
pub struct ButtonDebouncer {
    window_ms: u64,
    /// End of the current hold-off window, if one is open.
    armed_until: Option<u64>,
}

impl ButtonDebouncer {
    /// Debouncer with a custom hold-off window.
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            armed_until: None,
        }
    }

    /// Debouncer for the incline rocker.
    pub fn incline() -> Self {
        Self::new(INCLINE_DEBOUNCE_MS)
    }

    /// Debouncer for the resistance rocker.
    pub fn resistance() -> Self {
        Self::new(RESISTANCE_DEBOUNCE_MS)
    }

    /// Whether a hold-off window is open at `now_ms`.
    pub fn is_armed(&self, now_ms: u64) -> bool {
        self.armed_until.is_some_and(|until| now_ms < until)
    }

    /// Handle a press edge at `now_ms` with the given pin levels.
    ///
    /// Returns the adjustment to act on, or `None` when the edge fell
    /// inside an open window (chatter) or the levels cancel out.
    pub fn on_edge(&mut self, now_ms: u64, up_pressed: bool, down_pressed: bool) -> Option<Adjustment> {
        if self.is_armed(now_ms) {
            return None;
        }
        self.armed_until = Some(now_ms + self.window_ms);
        evaluate_button(up_pressed, down_pressed)
    }

    /// Re-sample the rocker once the window has elapsed.
    ///
    /// If the rocker is still held in one direction, returns that
    /// adjustment and opens a fresh window (auto-repeat). If released,
    /// disarms. Does nothing while the window is still open or when no
    /// window was armed.
    pub fn on_window_elapsed(
        &mut self,
        now_ms: u64,
        up_pressed: bool,
        down_pressed: bool,
    ) -> Option<Adjustment> {
        match self.armed_until {
            Some(until) if now_ms >= until => match evaluate_button(up_pressed, down_pressed) {
                Some(adjustment) => {
                    self.armed_until = Some(now_ms + self.window_ms);
                    Some(adjustment)
                }
                None => {
                    self.armed_until = None;
                    None
                }
            },
            _ => None,
        }
    }
}
