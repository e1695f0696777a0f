//! ANT+ FE-C (Fitness Equipment Control) adapter, tunneled over BLE.
//!
//! Outbound, this module broadcasts the FE-C data pages on a fixed
//! schedule through a [`Notifier`]; inbound, it accepts the control and
//! request pages a trainer app writes back. Every message is the 4-byte
//! ANT header (sync, payload length, broadcast type, channel), an 8-byte
//! data page, and a trailing XOR checksum.
//!
//! Control pages are acknowledged through the command status page: the
//! echo of the last command is always recorded even though none of the
//! FE-C control pages currently move the bike (trainer apps that matter
//! drive the bike over FTMS; FE-C is the legacy/telemetry path).

use heapless::Vec;

use crate::bike::BikeData;
use crate::config::{BroadcastConfig, DeviceConfig};
use crate::traits::{Clock, Delay, Notifier};

/// ANT sync byte opening every message.
pub const SYNC: u8 = 0xA4;

/// Broadcast-data message type.
pub const BROADCAST_TYPE: u8 = 0x4E;

/// Full message length: header, 8-byte page, checksum.
pub const MESSAGE_LEN: usize = 13;

const HEADER_LEN: usize = 4;
const IN_USE: u8 = 0x03;

/// FE-C data page numbers.
pub mod page {
    /// General FE data.
    pub const GENERAL_FE_DATA: u8 = 0x10;
    /// General settings.
    pub const GENERAL_SETTINGS: u8 = 0x11;
    /// Stationary bike specific data.
    pub const BIKE_DATA: u8 = 0x19;
    /// Basic resistance control.
    pub const BASIC_RESISTANCE: u8 = 0x30;
    /// Target power control.
    pub const TARGET_POWER: u8 = 0x31;
    /// Wind resistance simulation.
    pub const WIND_RESISTANCE: u8 = 0x32;
    /// Track resistance simulation.
    pub const TRACK_RESISTANCE: u8 = 0x33;
    /// FE capabilities.
    pub const FE_CAPABILITIES: u8 = 0x36;
    /// Request data page.
    pub const REQUEST_DATA_PAGE: u8 = 0x46;
    /// Command status.
    pub const COMMAND_STATUS: u8 = 0x47;
    /// Manufacturer identification.
    pub const MANUFACTURER_ID: u8 = 0x50;
    /// Product information.
    pub const PRODUCT_INFO: u8 = 0x51;
}

/// XOR of every byte; FE-C carries it as the trailing byte.
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, &b| acc ^ b)
}

/// Command status page state: the echo of the last control page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CommandStatus {
    last_command: u8,
    sequence: u8,
    status: u8,
    data: [u8; 4],
}

impl Default for CommandStatus {
    fn default() -> Self {
        // 0xFF in the id and sequence means no control page seen yet.
        Self {
            last_command: 0xFF,
            sequence: 0xFF,
            status: 0x00,
            data: [0; 4],
        }
    }
}

impl CommandStatus {
    fn record(&mut self, command: u8, data: [u8; 4]) {
        self.last_command = command;
        self.data = data;
        // Sequence wraps below 0xFF, which stays reserved for "none yet".
        self.sequence = if self.sequence == 0xFE {
            0x00
        } else {
            self.sequence.wrapping_add(1)
        };
    }
}

/// A pending request-data-page command. `count` is how many copies the
/// trainer app asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PageRequest {
    page: u8,
    count: u8,
}

/// The FE-C protocol adapter.
///
/// Run [`emit_cycle`](Self::emit_cycle) in a loop from a dedicated
/// thread; it paces itself through the injected [`Clock`] and [`Delay`].
/// Feed inbound writes into [`handle_write`](Self::handle_write) and push
/// fresh telemetry with [`update`](Self::update).
pub struct FecService<N: Notifier, C: Clock, D: Delay> {
    notifier: N,
    clock: C,
    delay: D,
    channel: u8,
    pacing_ms: u64,
    device: DeviceConfig,
    data: BikeData,
    /// Broadcast message counter driving the page schedule.
    counter: u32,
    pending: PageRequest,
    command_status: CommandStatus,
    last_send_ms: Option<u64>,
    subscribed: bool,
    // Accumulators the general and bike data pages roll forward.
    elapsed_quarter_s: u8,
    distance_m: u8,
    bike_events: u8,
    watts_total: u16,
}

impl<N: Notifier, C: Clock, D: Delay> FecService<N, C, D> {
    /// Adapter with the default broadcast and device configuration.
    pub fn new(notifier: N, clock: C, delay: D) -> Self {
        Self::with_config(notifier, clock, delay, BroadcastConfig::default(), DeviceConfig::default())
    }

    /// Adapter with explicit broadcast pacing and device identity.
    pub fn with_config(
        notifier: N,
        clock: C,
        delay: D,
        broadcast: BroadcastConfig,
        device: DeviceConfig,
    ) -> Self {
        Self {
            notifier,
            clock,
            delay,
            channel: broadcast.channel,
            pacing_ms: broadcast.pacing_ms,
            device,
            data: BikeData::default(),
            counter: 0,
            pending: PageRequest::default(),
            command_status: CommandStatus::default(),
            last_send_ms: None,
            subscribed: false,
            elapsed_quarter_s: 0,
            distance_m: 0,
            bike_events: 0,
            watts_total: 0,
        }
    }

    /// Client characteristic configuration changed on the broadcast
    /// characteristic.
    pub fn set_subscribed(&mut self, subscribed: bool) {
        log::info!(
            "fe-c notifications {}",
            if subscribed { "enabled" } else { "disabled" }
        );
        self.subscribed = subscribed;
    }

    /// Push a fresh telemetry snapshot; the next pages broadcast it.
    pub fn update(&mut self, data: BikeData) {
        self.data = data;
    }

    /// Handle one inbound FE-C message (header, page, checksum).
    pub fn handle_write(&mut self, msg: &[u8]) {
        let Some((&trailing, body)) = msg.split_last() else {
            log::warn!("empty fe-c write");
            return;
        };
        if xor_checksum(body) != trailing {
            log::error!("fe-c message received with bad checksum");
            return;
        }
        if msg.len() < HEADER_LEN + 2 {
            log::warn!("fe-c message length too short: {}", msg.len());
            return;
        }

        let payload = &msg[HEADER_LEN..msg.len() - 1];
        let pg = payload[0];
        // The control pages are all full-length.
        if is_control_page(pg) && payload.len() < 8 {
            log::warn!("fe-c page 0x{pg:02X} length too short: {}", msg.len());
            return;
        }

        match pg {
            page::BASIC_RESISTANCE => {
                log::warn!("basic resistance command received");
                self.command_status
                    .record(pg, [0xFF, 0xFF, 0xFF, payload[7]]);
            }
            page::TARGET_POWER => {
                log::warn!("target power command received");
                // Quarter-watt target, little endian.
                self.command_status
                    .record(pg, [0xFF, 0xFF, payload[6], payload[7]]);
            }
            page::WIND_RESISTANCE => {
                log::warn!("wind simulation command received");
                self.command_status
                    .record(pg, [0xFF, payload[5], payload[6], payload[7]]);
            }
            page::TRACK_RESISTANCE => {
                log::warn!("track simulation command received");
                self.command_status
                    .record(pg, [0xFF, payload[5], payload[6], payload[7]]);
            }
            page::REQUEST_DATA_PAGE => {
                if payload.len() < 8 {
                    log::warn!("data page request length too short: {}", msg.len());
                    return;
                }
                self.pending = PageRequest {
                    page: payload[6],
                    count: payload[5] & 0x7F,
                };
                log::info!("data page request: 0x{:02X}", self.pending.page);
            }
            unknown => {
                log::warn!("unknown fe-c data page: 0x{unknown:02X}");
            }
        }
    }

    /// Emit the next slot of the broadcast schedule.
    ///
    /// Requested pages are served first, then the rotation mandated by
    /// the FE-C minimum data page requirements:
    ///
    /// - general FE data twice in a row every 5th message
    /// - general settings at least once every 20 messages
    /// - manufacturer and product pages twice each every 132 messages
    /// - command status and capabilities only on request
    /// - stationary bike data in every remaining slot
    pub fn emit_cycle(&mut self) {
        if !self.subscribed {
            return;
        }
        self.counter += 1;

        for _ in 0..self.pending.count {
            match self.pending.page {
                0 => {}
                page::GENERAL_FE_DATA => self.send(Self::general_data_page),
                page::GENERAL_SETTINGS => self.send(Self::settings_page),
                page::BIKE_DATA => self.send(Self::bike_data_page),
                page::COMMAND_STATUS => self.send(Self::command_status_page),
                page::MANUFACTURER_ID => self.send(Self::manufacturer_page),
                page::PRODUCT_INFO => self.send(Self::product_page),
                page::FE_CAPABILITIES => self.send(Self::capabilities_page),
                unknown => log::warn!("unknown data page request: 0x{unknown:02X}"),
            }
        }
        self.pending = PageRequest::default();

        if self.counter % 132 == 0 {
            self.send(Self::manufacturer_page);
            self.counter += 1;
            self.send(Self::manufacturer_page);
            self.counter += 1;
            self.send(Self::product_page);
            self.counter += 1;
            self.send(Self::product_page);
        } else if self.counter % 20 == 2 {
            self.send(Self::settings_page);
        } else if self.counter % 5 == 0 {
            self.send(Self::general_data_page);
            self.counter += 1;
            self.send(Self::general_data_page);
        } else {
            self.send(Self::bike_data_page);
        }
    }

    /// Access the notifier (mainly for inspecting mocks in tests).
    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    fn send(&mut self, build: fn(&mut Self) -> [u8; MESSAGE_LEN]) {
        let msg = build(self);
        self.pace();
        if let Err(err) = self.notifier.notify(&msg) {
            log::error!("failed to transmit fe-c message: {err:?}");
        }
    }

    /// Enforce the minimum spacing between broadcasts.
    fn pace(&mut self) {
        let now = self.clock.now_ms();
        if let Some(last) = self.last_send_ms {
            let elapsed = now.saturating_sub(last);
            if elapsed < self.pacing_ms {
                self.delay.delay_ms((self.pacing_ms - elapsed) as u32);
            }
        }
        self.last_send_ms = Some(self.clock.now_ms());
    }

    fn message(&self, payload: [u8; 8]) -> [u8; MESSAGE_LEN] {
        let mut msg = [0u8; MESSAGE_LEN];
        msg[0] = SYNC;
        // Length counts the page and checksum, not the header.
        msg[1] = (MESSAGE_LEN - HEADER_LEN) as u8;
        msg[2] = BROADCAST_TYPE;
        msg[3] = self.channel;
        msg[4..12].copy_from_slice(&payload);
        msg[12] = xor_checksum(&msg[..12]);
        msg
    }

    fn general_data_page(&mut self) -> [u8; MESSAGE_LEN] {
        self.elapsed_quarter_s = self.elapsed_quarter_s.wrapping_add(5);
        self.distance_m = self.distance_m.wrapping_add(1);
        self.message([
            page::GENERAL_FE_DATA,
            25, // stationary bike
            self.elapsed_quarter_s,
            self.distance_m,
            0xFF, // speed not measured
            0xFF,
            0xFF, // no heart rate source
            IN_USE << 4,
        ])
    }

    fn settings_page(&mut self) -> [u8; MESSAGE_LEN] {
        let incline = 50 * (self.data.target_incline as i16 - 20);
        let incline_le = incline.to_le_bytes();
        let resistance = if self.data.display_resistance <= 1 {
            0
        } else {
            ((self.data.display_resistance - 1) * 200 / 21) as u8
        };
        self.message([
            page::GENERAL_SETTINGS,
            0xFF,
            0xFF,
            0xFF, // cycle length not applicable
            incline_le[0],
            incline_le[1],
            resistance,
            IN_USE << 4,
        ])
    }

    fn bike_data_page(&mut self) -> [u8; MESSAGE_LEN] {
        self.bike_events = self.bike_events.wrapping_add(1);
        self.watts_total = self.watts_total.wrapping_add(self.data.watts);
        let total_le = self.watts_total.to_le_bytes();
        // Instantaneous power is a 12-bit field sharing a word with the
        // trainer status nibble.
        let inst = self.data.watts & 0x0FFF;
        let inst_le = inst.to_le_bytes();
        self.message([
            page::BIKE_DATA,
            self.bike_events,
            self.data.rpm as u8,
            total_le[0],
            total_le[1],
            inst_le[0],
            inst_le[1],
            IN_USE << 4,
        ])
    }

    fn command_status_page(&mut self) -> [u8; MESSAGE_LEN] {
        let status = self.command_status;
        self.message([
            page::COMMAND_STATUS,
            status.last_command,
            status.sequence,
            status.status,
            status.data[0],
            status.data[1],
            status.data[2],
            status.data[3],
        ])
    }

    fn manufacturer_page(&mut self) -> [u8; MESSAGE_LEN] {
        let man_le = self.device.manufacturer_id.to_le_bytes();
        let model_le = self.device.model.to_le_bytes();
        self.message([
            page::MANUFACTURER_ID,
            0xFF,
            0xFF,
            self.device.hardware_rev,
            man_le[0],
            man_le[1],
            model_le[0],
            model_le[1],
        ])
    }

    fn product_page(&mut self) -> [u8; MESSAGE_LEN] {
        self.message([
            page::PRODUCT_INFO,
            0xFF,
            0xFF, // no supplemental revision
            self.device.software_rev,
            0xFF, // serial number not set
            0xFF,
            0xFF,
            0xFF,
        ])
    }

    fn capabilities_page(&mut self) -> [u8; MESSAGE_LEN] {
        // Basic resistance, target power, and simulation mode.
        const CAPABILITIES: u8 = 0x07;
        self.message([
            page::FE_CAPABILITIES,
            0xFF,
            0xFF,
            0xFF,
            0xFF,
            0xFF, // maximum resistance not reported
            0xFF,
            CAPABILITIES,
        ])
    }
}

/// Build an inbound FE-C write the way a trainer app does. Test and
/// simulator helper.
pub fn build_write(channel: u8, payload: [u8; 8]) -> Vec<u8, MESSAGE_LEN> {
    let mut msg: Vec<u8, MESSAGE_LEN> = Vec::new();
    let _ = msg.extend_from_slice(&[SYNC, (MESSAGE_LEN - HEADER_LEN) as u8, BROADCAST_TYPE, channel]);
    let _ = msg.extend_from_slice(&payload);
    let cks = xor_checksum(&msg);
    let _ = msg.push(cks);
    msg
}

fn is_control_page(pg: u8) -> bool {
    matches!(
        pg,
        page::BASIC_RESISTANCE | page::TARGET_POWER | page::WIND_RESISTANCE | page::TRACK_RESISTANCE
    )
}
