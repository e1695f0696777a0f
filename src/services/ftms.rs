//! Bluetooth FTMS (Fitness Machine Service) adapter.
//!
//! Speaks the byte-level FTMS protocol; a host GATT server delivers
//! control-point writes into [`FtmsService::handle_control_write`] and
//! carries the notifications this module builds. Three characteristics
//! are notified: indoor bike data (telemetry), the control point
//! (request responses), and machine status.
//!
//! A [`BoundedGate`] serializes control-point handling against telemetry
//! emission on the same link, with the usual degrade policy: on timeout,
//! log and proceed anyway.

use heapless::Vec;

use crate::bike::{BikeData, BikeTargets};
use crate::services::shared::BoundedGate;
use crate::traits::{Notifier, TargetSink};

/// Control point opcodes, and the response envelope.
pub mod opcode {
    /// Request Control.
    pub const REQUEST_CONTROL: u8 = 0x00;
    /// Reset.
    pub const RESET: u8 = 0x01;
    /// Set Target Inclination.
    pub const SET_TARGET_INCLINE: u8 = 0x03;
    /// Set Target Resistance Level.
    pub const SET_TARGET_RESISTANCE: u8 = 0x04;
    /// Start or Resume.
    pub const START: u8 = 0x07;
    /// Set Indoor Bike Simulation Parameters.
    pub const SET_SIM_PARAMS: u8 = 0x11;

    /// Response Code, opening every control point response.
    pub const RESPONSE: u8 = 0x80;
    /// Result code: success.
    pub const SUCCESS: u8 = 0x01;

    /// Machine status: started or resumed by the user.
    pub const STATUS_STARTED: u8 = 0x04;
}

/// Bounded wait on the control/telemetry gate.
pub const GATE_TIMEOUT_MS: u64 = 500;

/// Feature characteristic value: cadence and power measurement in the
/// machine features word, incline/resistance/simulation in the target
/// setting features word. Both words little endian.
pub const MACHINE_FEATURES: [u8; 8] = {
    let features: u32 = (1 << 1) | (1 << 14);
    let targets: u32 = (1 << 1) | (1 << 2) | (1 << 13);
    let f = features.to_le_bytes();
    let t = targets.to_le_bytes();
    [f[0], f[1], f[2], f[3], t[0], t[1], t[2], t[3]]
};

/// Supported inclination range: -10.0 % to +20.0 % in 0.5 % steps,
/// tenths of a percent, little endian.
pub const INCLINATION_RANGE: [u8; 6] = {
    let min = (-100i16).to_le_bytes();
    let max = 200i16.to_le_bytes();
    let step = 5i16.to_le_bytes();
    [min[0], min[1], max[0], max[1], step[0], step[1]]
};

/// Supported resistance range: levels 1 to 22 in steps of 1.
pub const RESISTANCE_RANGE: [u8; 3] = [1, 22, 1];

/// Indoor-bike-data flags: instantaneous cadence and power present.
const BIKE_DATA_FLAGS: u16 = (1 << 2) | (1 << 6);

/// Body of a Set Indoor Bike Simulation Parameters request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationParams {
    /// Wind speed in metres per second.
    pub wind_mps: i16,
    /// Grade in hundredths of a percent.
    pub grade_hundredths: i16,
    /// Rolling resistance coefficient, in 1e-4.
    pub crr: u8,
    /// Wind resistance coefficient, in 1/100 kg/m.
    pub cw: u8,
}

impl SimulationParams {
    /// Parse the 6-byte little-endian parameter block.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() != 6 {
            return None;
        }
        Some(Self {
            wind_mps: i16::from_le_bytes([raw[0], raw[1]]),
            grade_hundredths: i16::from_le_bytes([raw[2], raw[3]]),
            crr: raw[4],
            cw: raw[5],
        })
    }
}

/// The FTMS protocol adapter.
///
/// Generic over one [`Notifier`] type (the host supplies three instances,
/// one per notifying characteristic) and the [`TargetSink`] that reaches
/// the bike.
pub struct FtmsService<N: Notifier, S: TargetSink> {
    bike_data: N,
    control_point: N,
    machine_status: N,
    sink: S,
    gate: BoundedGate,
    bike_data_subscribed: bool,
    control_subscribed: bool,
    status_subscribed: bool,
}

impl<N: Notifier, S: TargetSink> FtmsService<N, S> {
    /// Adapter over three notifying characteristics and a target sink.
    pub fn new(bike_data: N, control_point: N, machine_status: N, sink: S) -> Self {
        Self {
            bike_data,
            control_point,
            machine_status,
            sink,
            gate: BoundedGate::new(),
            bike_data_subscribed: false,
            control_subscribed: false,
            status_subscribed: false,
        }
    }

    /// Client characteristic configuration changed on indoor bike data.
    pub fn set_bike_data_subscribed(&mut self, subscribed: bool) {
        log::info!("ftms bike data notifications {}", enabled(subscribed));
        self.bike_data_subscribed = subscribed;
    }

    /// Client characteristic configuration changed on the control point.
    pub fn set_control_subscribed(&mut self, subscribed: bool) {
        log::info!("ftms control point indications {}", enabled(subscribed));
        self.control_subscribed = subscribed;
    }

    /// Client characteristic configuration changed on machine status.
    pub fn set_status_subscribed(&mut self, subscribed: bool) {
        log::info!("ftms machine status notifications {}", enabled(subscribed));
        self.status_subscribed = subscribed;
    }

    /// Handle one control point write.
    ///
    /// Every recognized opcode is answered with a success response that
    /// echoes the request parameters. Only simulation parameters reach
    /// the bike (as a grade target); the start/reset/set opcodes are
    /// accepted so trainer apps proceed, but the bike needs nothing done
    /// for them.
    pub fn handle_control_write(&mut self, request: &[u8]) {
        let Some((&op, params)) = request.split_first() else {
            log::warn!("empty ftms control point write");
            return;
        };

        if !self.gate.enter(GATE_TIMEOUT_MS) {
            log::warn!("ftms gate busy, continuing anyway");
        }

        match op {
            opcode::REQUEST_CONTROL
            | opcode::RESET
            | opcode::SET_TARGET_INCLINE
            | opcode::SET_TARGET_RESISTANCE
            | opcode::START => {
                self.respond(op, params);
            }
            opcode::SET_SIM_PARAMS => match SimulationParams::parse(params) {
                Some(sim) => {
                    self.sink
                        .apply_targets(BikeTargets::grade(sim.grade_hundredths));
                    self.respond(op, params);
                }
                None => {
                    log::error!(
                        "wrong length for bike sim parameters: {} bytes",
                        params.len()
                    );
                }
            },
            unknown => {
                log::warn!("unknown ftms opcode 0x{unknown:02X}");
                self.respond(op, params);
            }
        }

        self.gate.exit();
    }

    /// Notify current telemetry on the indoor bike data characteristic.
    ///
    /// FTMS counts cadence in half revolutions; speed is not measured
    /// and notifies as zero.
    pub fn notify_bike_data(&mut self, data: &BikeData) {
        if !self.bike_data_subscribed {
            return;
        }
        if !self.gate.enter(GATE_TIMEOUT_MS) {
            log::warn!("ftms gate busy, continuing anyway");
        }

        let mut payload: Vec<u8, 8> = Vec::new();
        let _ = payload.extend_from_slice(&BIKE_DATA_FLAGS.to_le_bytes());
        let _ = payload.extend_from_slice(&0u16.to_le_bytes());
        let _ = payload.extend_from_slice(&(2 * data.rpm).to_le_bytes());
        let _ = payload.extend_from_slice(&(data.watts as i16).to_le_bytes());
        if let Err(err) = self.bike_data.notify(&payload) {
            log::warn!("ftms bike data notify failed: {err:?}");
        }

        self.gate.exit();
    }

    /// Notify "started by user" on the machine status characteristic.
    pub fn notify_status_started(&mut self) {
        if !self.status_subscribed {
            return;
        }
        if !self.gate.enter(GATE_TIMEOUT_MS) {
            log::warn!("ftms gate busy, continuing anyway");
        }
        if let Err(err) = self.machine_status.notify(&[opcode::STATUS_STARTED]) {
            log::warn!("ftms status notify failed: {err:?}");
        }
        self.gate.exit();
    }

    /// Access the target sink (mainly for tests).
    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn respond(&mut self, op: u8, params: &[u8]) {
        if !self.control_subscribed {
            log::error!("ftms control response dropped, indications not enabled");
            return;
        }
        let mut payload: Vec<u8, 20> = Vec::new();
        let _ = payload.push(opcode::RESPONSE);
        let _ = payload.push(op);
        let _ = payload.push(opcode::SUCCESS);
        if payload.extend_from_slice(params).is_err() {
            log::error!("oversized ftms request parameters, truncating response");
        }
        if let Err(err) = self.control_point.notify(&payload) {
            log::warn!("ftms control response notify failed: {err:?}");
        }
    }
}

fn enabled(on: bool) -> &'static str {
    if on {
        "enabled"
    } else {
        "disabled"
    }
}
