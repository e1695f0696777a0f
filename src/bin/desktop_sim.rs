//! Desktop bench simulator.
//!
//! Runs the full controller stack against a simulated set of motor
//! boards wired up over an in-process channel:
//! - the real [`BusTransport`] drives the simulated bus
//! - a peer thread plays the three boards (cadence, incline, resistance)
//! - FTMS and FE-C adapters print their notification payloads
//!
//! Partway through the run a trainer app "connects" and pushes a 5%
//! simulated grade through the FTMS control point, so the incline chase
//! and the FE-C settings page can be watched end to end.
//!
//! ```bash
//! cargo run --bin desktop_sim          # 20 control cycles
//! cargo run --bin desktop_sim -- 60    # longer ride
//! ```

use std::convert::Infallible;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use rs_bikez::config::Config;
use rs_bikez::hal::{SystemClock, ThreadDelay};
use rs_bikez::modbus::{self, CommandFrame, FunctionCode, NodeAddress};
use rs_bikez::services::{FecService, FtmsService, SharedBikeState};
use rs_bikez::traits::{BusDirection, Heartbeat, Notifier, SerialTx};
use rs_bikez::{BikeController, BusTransport};

/// Serial driver feeding the simulated boards over a channel.
struct SimSerial {
    tx: mpsc::Sender<Vec<u8>>,
}

impl SerialTx for SimSerial {
    type Error = mpsc::SendError<Vec<u8>>;

    fn write_frame(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        self.tx.send(bytes.to_vec())
    }
}

/// Driver-enable pin for a bus with no transceiver to direct.
struct SimDirection;

impl BusDirection for SimDirection {
    fn set_transmit(&mut self, _enabled: bool) {}
}

/// Notification channel that prints payloads instead of radioing them.
struct PrintNotifier {
    label: &'static str,
}

impl PrintNotifier {
    fn new(label: &'static str) -> Self {
        Self { label }
    }
}

impl Notifier for PrintNotifier {
    type Error = Infallible;

    fn notify(&mut self, payload: &[u8]) -> Result<(), Self::Error> {
        let hex: Vec<String> = payload.iter().map(|b| format!("{b:02X}")).collect();
        println!("  [{}] {}", self.label, hex.join(" "));
        Ok(())
    }
}

/// Liveness LED rendered as a spinner character.
struct ConsoleHeartbeat {
    lit: bool,
}

impl ConsoleHeartbeat {
    fn glyph(&self) -> char {
        if self.lit {
            '*'
        } else {
            '.'
        }
    }
}

impl Heartbeat for ConsoleHeartbeat {
    fn toggle(&mut self) {
        self.lit = !self.lit;
    }
}

/// The boards' side of the bus: register state plus a rider who pedals
/// harder as the ride goes on.
struct SimBoards {
    incline: u16,
    cadence_ticks: u32,
}

impl SimBoards {
    fn new() -> Self {
        Self {
            incline: 0x0014,
            cadence_ticks: 0,
        }
    }

    fn answer(&mut self, command: &CommandFrame) -> Option<Vec<u8>> {
        match command.function {
            // Writes are acknowledged by echoing the frame.
            FunctionCode::WriteHolding => {
                if command.node == NodeAddress::Incline && command.address == 0x0001 {
                    self.incline = command.value;
                }
                Some(command.encode().to_vec())
            }
            FunctionCode::ReadHolding => {
                let value = match command.node {
                    NodeAddress::Rpm => self.cadence(),
                    NodeAddress::Incline => self.incline,
                    NodeAddress::Resistance => 0,
                };
                Some(read_reply(command.node, value))
            }
            _ => None,
        }
    }

    /// Rider model: spin up over the first few polls, then hold ~80rpm.
    fn cadence(&mut self) -> u16 {
        self.cadence_ticks += 1;
        (self.cadence_ticks * 20).min(80) as u16
    }
}

/// Build a read reply the way a board does: node, function, byte count
/// 0x04, two registers with the value in the second, checksum, CRLF.
fn read_reply(node: NodeAddress, value: u16) -> Vec<u8> {
    let bytes = [
        node.as_u8(),
        0x03,
        0x04,
        0x00,
        0x00,
        (value >> 8) as u8,
        (value & 0xFF) as u8,
    ];
    let mut out = vec![modbus::FRAME_START];
    for b in bytes {
        out.extend_from_slice(format!("{b:02X}").as_bytes());
    }
    let cks = modbus::checksum(&out[1..]);
    out.extend_from_slice(format!("{cks:02X}").as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

fn main() -> anyhow::Result<()> {
    let cycles: u32 = std::env::args()
        .nth(1)
        .map(|arg| arg.parse())
        .transpose()?
        .unwrap_or(20);

    let config = Config::default();

    println!();
    println!("================================");
    println!("  rs-bikez bench simulator");
    println!("================================");
    println!();

    // =========================================================================
    // Simulated bus: real transport, channel serial, peer thread as boards
    // =========================================================================
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let bus = Arc::new(BusTransport::new(
        SimSerial { tx },
        SimDirection,
        config.bus.clone(),
    ));

    let peer_bus = Arc::clone(&bus);
    thread::spawn(move || {
        let mut boards = SimBoards::new();
        while let Ok(mut raw) = rx.recv() {
            peer_bus.complete_tx();
            modbus::unstuff_8n1(&mut raw);
            let Ok(command) = modbus::decode_command(&raw) else {
                continue;
            };
            if let Some(mut reply) = boards.answer(&command) {
                modbus::stuff_7n2(&mut reply);
                peer_bus.feed_rx(&reply);
            }
        }
    });
    println!("[OK] Bus up ({} baud equivalent)", config.bus.baud);

    // =========================================================================
    // Control core and shared state
    // =========================================================================
    // The simulated boards need no boot time.
    let controller = BikeController::new(Arc::clone(&bus)).with_startup_settle_ms(100);
    let state = Arc::new(SharedBikeState::new(controller));

    println!("Calibrating...");
    let _ = state.with_controller(|bike| bike.initialize());
    println!("[OK] Boards calibrated");

    // =========================================================================
    // Protocol adapters
    // =========================================================================
    let mut ftms = FtmsService::new(
        PrintNotifier::new("ftms/data"),
        PrintNotifier::new("ftms/control"),
        PrintNotifier::new("ftms/status"),
        Arc::clone(&state),
    );
    ftms.set_bike_data_subscribed(true);
    ftms.set_control_subscribed(true);
    ftms.set_status_subscribed(true);

    let mut fec = FecService::new(
        PrintNotifier::new("fec"),
        SystemClock::new(),
        ThreadDelay,
    );
    fec.set_subscribed(true);
    println!("[OK] FTMS and FE-C adapters attached");
    println!();

    // Trainer app takes the machine.
    ftms.handle_control_write(&[0x00]);
    ftms.handle_control_write(&[0x07]);
    ftms.notify_status_started();

    // =========================================================================
    // Ride loop
    // =========================================================================
    let mut heartbeat = ConsoleHeartbeat { lit: false };
    for cycle in 0..cycles {
        heartbeat.toggle();
        let _ = state.with_controller(|bike| bike.run_cycle());

        // A third of the way in, the app asks for a 5% climb.
        if cycle == cycles / 3 {
            println!("-- trainer app requests 5.00% grade --");
            let grade = 500i16.to_le_bytes();
            ftms.handle_control_write(&[0x11, 0x00, 0x00, grade[0], grade[1], 0x32, 0x33]);
        }

        if let Some(data) = state.snapshot() {
            println!(
                "{} cycle {cycle:>3}: {:>3} rpm  {:>3} W  incline reg {:>2}  level {:>2}",
                heartbeat.glyph(),
                data.rpm,
                data.watts,
                data.target_incline,
                data.display_resistance
            );
            ftms.notify_bike_data(&data);
            fec.update(data);
        }
        fec.emit_cycle();

        thread::sleep(Duration::from_millis(config.control.cycle_ms));
    }

    println!();
    println!("Ride over.");
    Ok(())
}
