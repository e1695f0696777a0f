//! The bike control core: calibration, the poll/adjust cycle, target
//! mapping, and the empirical power model.
//!
//! [`BikeController`] owns a [`Transport`] to the motor boards and keeps
//! the canonical control state: last polled cadence and incline, the
//! rider-visible resistance level (1 to 22), and the two write frames it
//! keeps re-sending until the bike agrees with them. Everything external
//! (buttons, BLE control points) funnels into this state; one
//! [`run_cycle`](BikeController::run_cycle) call per period pushes it to
//! the hardware.
//!
//! # Units
//!
//! - Incline register: counts, 20 counts = 0 % grade, 2 counts per percent,
//!   valid range 0 to 60 (so -10 % to +20 %)
//! - Resistance register: counts, 15 to 190
//! - Display resistance: rider-visible level, 1 to 22
//! - Grade targets arrive in hundredths of a percent, resistance targets
//!   in half percent (FTMS resolution)

use crate::buttons::Adjustment;
use crate::modbus::{CommandFrame, NodeAddress, Reply};
use crate::traits::Transport;

/// Incline register value meaning 0 % grade.
pub const LEVEL_INCLINE_REGISTER: u16 = 0x0014;

/// Resistance register the bike boots into.
pub const INITIAL_RESISTANCE_REGISTER: u16 = 0x003A;

/// Incline target sentinel: leave incline alone.
pub const NO_INCLINE_CHANGE: i16 = 0x7FFF;

/// Resistance target sentinel: leave resistance alone.
pub const NO_RESISTANCE_CHANGE: u8 = 0xFF;

const INCLINE_REGISTER_MAX: u16 = 60;
const RESISTANCE_REGISTER_MIN: i32 = 15;
const RESISTANCE_REGISTER_MAX: i32 = 190;
const DISPLAY_RESISTANCE_MIN: u16 = 1;
const DISPLAY_RESISTANCE_MAX: u16 = 22;

const RPM_REQUEST: CommandFrame = CommandFrame::read_holding(NodeAddress::Rpm, 0x0002);
const INCLINE_REQUEST: CommandFrame = CommandFrame::read_holding(NodeAddress::Incline, 0x0002);

/// Board configuration writes issued once at startup, in order. The first
/// is retried hard because the resistance board is the slowest to boot.
const CALIBRATION: [(CommandFrame, u16, u32); 6] = [
    (
        CommandFrame::write_holding(NodeAddress::Resistance, 0x0007, 0x000F),
        50,
        200,
    ),
    (
        CommandFrame::write_holding(NodeAddress::Resistance, 0x0008, 0x00BE),
        5,
        50,
    ),
    (
        CommandFrame::write_holding(NodeAddress::Incline, 0x0006, 0x0000),
        5,
        50,
    ),
    (
        CommandFrame::write_holding(NodeAddress::Incline, 0x0007, 0x003C),
        5,
        50,
    ),
    (
        CommandFrame::write_holding(NodeAddress::Incline, 0x0009, 0x0014),
        5,
        50,
    ),
    (
        CommandFrame::write_holding(NodeAddress::Incline, 0x0008, 0x003C),
        5,
        50,
    ),
];

// Power curve fit, watts = (rpm poly) * (resistance poly) + offset, times
// rpm. Coefficients are empirical, from dyno runs against the stock head
// unit; constant term first.
const RPM_CURVE: [f32; 6] = [
    -8.063_578_66e6,
    -2.454_577_03e5,
    1.499_615_56e1,
    -6.487_784_5e-2,
    1.097_416_19e-4,
    3.160_502_29e-9,
];
const RESISTANCE_CURVE: [f32; 6] = [
    -1.003_975_36e-7,
    1.015_259_92e-8,
    -2.943_889_76e-10,
    3.486_573_32e-12,
    -1.979_405_19e-14,
    4.092_713_82e-17,
];
const TORQUE_OFFSET: f32 = 5.628_500_51e-2;

/// Target changes pushed in by a remote protocol.
///
/// Either field can be its sentinel to leave that axis untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BikeTargets {
    /// Grade in hundredths of a percent, or [`NO_INCLINE_CHANGE`].
    pub grade_hundredths: i16,
    /// Resistance in half percent (0 to 200), or [`NO_RESISTANCE_CHANGE`].
    pub resistance_half_pct: u8,
}

impl BikeTargets {
    /// Change neither axis.
    pub const UNCHANGED: Self = Self {
        grade_hundredths: NO_INCLINE_CHANGE,
        resistance_half_pct: NO_RESISTANCE_CHANGE,
    };

    /// Target only a grade.
    pub const fn grade(hundredths: i16) -> Self {
        Self {
            grade_hundredths: hundredths,
            resistance_half_pct: NO_RESISTANCE_CHANGE,
        }
    }

    /// Target only a resistance.
    pub const fn resistance(half_pct: u8) -> Self {
        Self {
            grade_hundredths: NO_INCLINE_CHANGE,
            resistance_half_pct: half_pct,
        }
    }
}

/// Snapshot of the control state for the telemetry adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BikeData {
    /// Rider-visible resistance level, 1 to 22.
    pub display_resistance: u16,
    /// Modeled rider power in watts.
    pub watts: u16,
    /// Last polled crank cadence.
    pub rpm: u16,
    /// Incline register value currently being commanded.
    pub target_incline: u16,
}

/// The control core. Generic over the bus [`Transport`] so the whole
/// control path runs against a mock in tests.
pub struct BikeController<T: Transport> {
    transport: T,
    rpm: u16,
    /// Incline register as last reported by the incline board.
    actual_incline: u16,
    display_resistance: u16,
    set_incline: CommandFrame,
    set_resistance: CommandFrame,
    /// Set once the first incline poll lands; until then the commanded
    /// incline is meaningless and the cycle must not chase it.
    incline_baseline: bool,
    startup_settle_ms: u32,
}

impl<T: Transport> BikeController<T> {
    /// Controller in its power-on state, resting at 0 % grade and level 1.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            rpm: 0,
            actual_incline: LEVEL_INCLINE_REGISTER,
            display_resistance: DISPLAY_RESISTANCE_MIN,
            set_incline: CommandFrame::write_holding(
                NodeAddress::Incline,
                0x0001,
                LEVEL_INCLINE_REGISTER,
            ),
            set_resistance: CommandFrame::write_holding(
                NodeAddress::Resistance,
                0x0005,
                INITIAL_RESISTANCE_REGISTER,
            ),
            incline_baseline: false,
            startup_settle_ms: 3000,
        }
    }

    /// Override the pre-calibration settle time (the boards take about
    /// three seconds to boot).
    pub fn with_startup_settle_ms(mut self, ms: u32) -> Self {
        self.startup_settle_ms = ms;
        self
    }

    /// One-time startup: wait for the boards, push the calibration
    /// writes, command the initial resistance, and take the incline
    /// baseline. Failures are logged and tolerated; the run cycle
    /// recovers whatever calibration missed.
    pub fn initialize(&mut self) {
        self.transport.pause_ms(self.startup_settle_ms);
        for (frame, retries, delay_ms) in CALIBRATION {
            self.transport.send_with_retries(&frame, retries, delay_ms);
        }
        let set_resistance = self.set_resistance;
        self.transport.send_with_retries(&set_resistance, 5, 50);
        if let Some(reply) = self.transport.send_with_retries(&INCLINE_REQUEST, 5, 50) {
            self.apply_reply(reply);
        }
    }

    /// One control cycle: poll cadence, chase the incline target if the
    /// board disagrees with it, and push the resistance register if the
    /// computed value changed.
    pub fn run_cycle(&mut self) {
        if let Some(reply) = self.transport.send_with_retries(&RPM_REQUEST, 0, 0) {
            self.apply_reply(reply);
        }

        if self.incline_baseline && self.actual_incline != self.set_incline.value {
            let set_incline = self.set_incline;
            self.transport.send_with_retries(&set_incline, 1, 50);
            if let Some(reply) = self.transport.send_with_retries(&INCLINE_REQUEST, 0, 50) {
                self.apply_reply(reply);
            }
        }

        self.update_resistance();
    }

    /// Fold a bus reply into the control state.
    ///
    /// Write acks carry no data. The first incline read doubles as the
    /// baseline: the commanded incline snaps to whatever the board
    /// reports so the bike does not lurch to a default on boot.
    pub fn apply_reply(&mut self, reply: Reply) {
        match reply {
            Reply::WriteAck { .. } => {}
            Reply::Register { node, value } => match node {
                NodeAddress::Rpm => self.rpm = value,
                NodeAddress::Incline => {
                    if !self.incline_baseline {
                        self.set_incline.value = value;
                        self.incline_baseline = true;
                    }
                    self.actual_incline = value;
                }
                NodeAddress::Resistance => {
                    log::warn!("unexpected register reply from resistance board: {value}");
                }
            },
        }
    }

    /// Map remote targets onto the incline register and display level.
    pub fn apply_targets(&mut self, targets: BikeTargets) {
        if targets.grade_hundredths != NO_INCLINE_CHANGE {
            let grade = i32::from(targets.grade_hundredths);
            let register = if grade >= 2000 {
                60
            } else if grade <= -1000 {
                0
            } else {
                let round_up = i32::from((grade + 1000) % 50 > 25);
                ((grade + 1000) / 50 + round_up) as u16
            };
            self.set_incline_register(register);
        }

        if targets.resistance_half_pct != NO_RESISTANCE_CHANGE {
            let resistance = u32::from(targets.resistance_half_pct);
            let level = if resistance >= 200 {
                22
            } else if resistance == 0 {
                1
            } else {
                let round_up = u32::from((resistance * 21) % 200 > 25);
                (1 + (resistance * 21) / 200 + round_up) as u16
            };
            self.set_display_resistance(level);
        }
    }

    /// One-step incline change from the handlebar buttons.
    pub fn adjust_incline(&mut self, adjustment: Adjustment) {
        match adjustment {
            Adjustment::Increase if self.set_incline.value < INCLINE_REGISTER_MAX => {
                self.set_incline.value += 1;
                log::info!("increasing incline to {}", self.set_incline.value);
            }
            Adjustment::Decrease if self.set_incline.value > 0 => {
                self.set_incline.value -= 1;
                log::info!("decreasing incline to {}", self.set_incline.value);
            }
            _ => {}
        }
    }

    /// One-step resistance change from the handlebar buttons.
    pub fn adjust_resistance(&mut self, adjustment: Adjustment) {
        match adjustment {
            Adjustment::Increase if self.display_resistance < DISPLAY_RESISTANCE_MAX => {
                self.display_resistance += 1;
                log::info!("increasing resistance to {}", self.display_resistance);
            }
            Adjustment::Decrease if self.display_resistance > DISPLAY_RESISTANCE_MIN => {
                self.display_resistance -= 1;
                log::info!("decreasing resistance to {}", self.display_resistance);
            }
            _ => {}
        }
    }

    /// The resistance register implied by the current display level and
    /// incline target: 5 counts per display step, 4 counts per percent of
    /// grade, clamped to the magnet's travel.
    pub fn resistance_register(&self) -> u16 {
        let mut register: i32 = 15;
        register += 5 * (i32::from(self.display_resistance) - 1);
        register += 4 * ((i32::from(self.set_incline.value) - 20) / 2);
        register.clamp(RESISTANCE_REGISTER_MIN, RESISTANCE_REGISTER_MAX) as u16
    }

    /// Modeled rider power from the fitted curve. Zero when stationary,
    /// never less than one watt while the cranks turn.
    pub fn watts(&self) -> u16 {
        if self.rpm == 0 {
            return 0;
        }
        let rpm = f32::from(self.rpm);
        let resistance = f32::from(self.set_resistance.value);
        let torque = horner(&RPM_CURVE, rpm) * horner(&RESISTANCE_CURVE, resistance) + TORQUE_OFFSET;
        let watts = torque * rpm;
        if watts < 1.0 {
            1
        } else {
            watts as u16
        }
    }

    /// Snapshot for the telemetry adapters.
    pub fn data(&self) -> BikeData {
        BikeData {
            display_resistance: self.display_resistance,
            watts: self.watts(),
            rpm: self.rpm,
            target_incline: self.set_incline.value,
        }
    }

    /// Last polled crank cadence.
    pub fn rpm(&self) -> u16 {
        self.rpm
    }

    /// Rider-visible resistance level, 1 to 22.
    pub fn display_resistance(&self) -> u16 {
        self.display_resistance
    }

    /// Incline register currently being commanded.
    pub fn target_incline(&self) -> u16 {
        self.set_incline.value
    }

    /// Incline register as last reported by the board.
    pub fn actual_incline(&self) -> u16 {
        self.actual_incline
    }

    /// Access the transport, mainly for inspecting mocks in tests.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn set_incline_register(&mut self, target: u16) {
        log::info!("setting incline register to {target}");
        self.set_incline.value = target.min(INCLINE_REGISTER_MAX);
    }

    fn set_display_resistance(&mut self, target: u16) {
        log::info!("setting resistance level to {target}");
        self.display_resistance = target.clamp(DISPLAY_RESISTANCE_MIN, DISPLAY_RESISTANCE_MAX);
    }

    fn update_resistance(&mut self) {
        let register = self.resistance_register();
        if self.set_resistance.value != register {
            self.set_resistance.value = register;
            log::info!("changing resistance magnitude to {register}");
            let set_resistance = self.set_resistance;
            self.transport.send_with_retries(&set_resistance, 3, 50);
        }
    }
}

/// Evaluate a polynomial given constant-term-first coefficients.
fn horner(coefficients: &[f32], x: f32) -> f32 {
    coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

#[cfg(test)]
mod tests {
    use super::*;

    // A transport that answers every frame like an agreeable bike.
    struct AutoAck {
        rpm: u16,
        incline: u16,
    }

    impl Transport for AutoAck {
        fn send_and_await(
            &mut self,
            frame: &CommandFrame,
        ) -> Result<Reply, crate::transport::BusError> {
            use crate::modbus::FunctionCode;
            match frame.function {
                FunctionCode::WriteHolding => Ok(Reply::WriteAck { node: frame.node }),
                _ => Ok(Reply::Register {
                    node: frame.node,
                    value: match frame.node {
                        NodeAddress::Rpm => self.rpm,
                        NodeAddress::Incline => self.incline,
                        NodeAddress::Resistance => 0,
                    },
                }),
            }
        }

        fn pause_ms(&mut self, _ms: u32) {}
    }

    fn controller() -> BikeController<AutoAck> {
        BikeController::new(AutoAck {
            rpm: 0,
            incline: LEVEL_INCLINE_REGISTER,
        })
    }

    #[test]
    fn horner_matches_direct_evaluation() {
        let coeffs = [2.0, -3.0, 0.5];
        let x = 4.0;
        let direct = 2.0 - 3.0 * x + 0.5 * x * x;
        assert!((horner(&coeffs, x) - direct).abs() < 1e-6);
    }

    #[test]
    fn resistance_register_baseline() {
        // Level 1, 0% grade: the floor.
        let c = controller();
        assert_eq!(c.resistance_register(), 15);
    }

    #[test]
    fn resistance_register_steps_per_level_and_grade() {
        let mut c = controller();
        c.set_display_resistance(3);
        assert_eq!(c.resistance_register(), 25);

        // +1% grade (2 counts) is worth 4 counts.
        c.set_incline_register(LEVEL_INCLINE_REGISTER + 2);
        assert_eq!(c.resistance_register(), 29);
    }

    #[test]
    fn resistance_register_clamps_both_ends() {
        let mut c = controller();
        c.set_display_resistance(1);
        c.set_incline_register(0);
        assert_eq!(c.resistance_register(), 15);

        c.set_display_resistance(22);
        c.set_incline_register(60);
        assert_eq!(c.resistance_register(), 190);
    }

    #[test]
    fn watts_zero_at_rest_and_at_least_one_moving() {
        let mut c = controller();
        assert_eq!(c.watts(), 0);

        c.apply_reply(Reply::Register {
            node: NodeAddress::Rpm,
            value: 60,
        });
        assert!(c.watts() >= 1);
    }

    #[test]
    fn grade_targets_map_to_incline_register() {
        let mut c = controller();

        c.apply_targets(BikeTargets::grade(2500));
        assert_eq!(c.target_incline(), 60);

        c.apply_targets(BikeTargets::grade(-1500));
        assert_eq!(c.target_incline(), 0);

        // +10.00% -> (1000 + 1000) / 50 = 40.
        c.apply_targets(BikeTargets::grade(1000));
        assert_eq!(c.target_incline(), 40);

        // Rounding: 1030 -> 2030/50 = 40 remainder 30 -> 41.
        c.apply_targets(BikeTargets::grade(1030));
        assert_eq!(c.target_incline(), 41);
    }

    #[test]
    fn resistance_targets_map_to_display_level() {
        let mut c = controller();

        c.apply_targets(BikeTargets::resistance(0));
        assert_eq!(c.display_resistance(), 1);

        c.apply_targets(BikeTargets::resistance(200));
        assert_eq!(c.display_resistance(), 22);

        // 50% -> 1 + (100 * 21) / 200 = 11, remainder 100 rounds up to 12.
        c.apply_targets(BikeTargets::resistance(100));
        assert_eq!(c.display_resistance(), 12);
    }

    #[test]
    fn sentinels_change_nothing() {
        let mut c = controller();
        c.apply_targets(BikeTargets::grade(1000));
        c.apply_targets(BikeTargets::resistance(100));
        let incline = c.target_incline();
        let level = c.display_resistance();

        c.apply_targets(BikeTargets::UNCHANGED);
        assert_eq!(c.target_incline(), incline);
        assert_eq!(c.display_resistance(), level);
    }

    #[test]
    fn button_adjustments_respect_bounds() {
        let mut c = controller();

        for _ in 0..100 {
            c.adjust_resistance(Adjustment::Increase);
        }
        assert_eq!(c.display_resistance(), 22);
        for _ in 0..100 {
            c.adjust_resistance(Adjustment::Decrease);
        }
        assert_eq!(c.display_resistance(), 1);

        for _ in 0..100 {
            c.adjust_incline(Adjustment::Increase);
        }
        assert_eq!(c.target_incline(), 60);
        for _ in 0..100 {
            c.adjust_incline(Adjustment::Decrease);
        }
        assert_eq!(c.target_incline(), 0);
    }

    #[test]
    fn first_incline_read_becomes_baseline() {
        let mut c = controller();
        assert!(!c.incline_baseline);

        c.apply_reply(Reply::Register {
            node: NodeAddress::Incline,
            value: 26,
        });
        assert_eq!(c.target_incline(), 26);
        assert_eq!(c.actual_incline(), 26);

        // Later reads track actual but leave the target alone.
        c.apply_reply(Reply::Register {
            node: NodeAddress::Incline,
            value: 30,
        });
        assert_eq!(c.target_incline(), 26);
        assert_eq!(c.actual_incline(), 30);
    }
}
