//! Integration tests for the protocol surfaces: the serial bus end to
//! end, FTMS control writes landing on the shared controller, and the
//! FE-C broadcast path.

use std::sync::{mpsc, Arc};
use std::thread;

use rs_bikez::bike::BikeController;
use rs_bikez::config::BusConfig;
use rs_bikez::hal::{MockClock, MockDelay, MockNotifier, MockTransport};
use rs_bikez::modbus::{self, CommandFrame, FunctionCode, NodeAddress, Reply};
use rs_bikez::services::fec::{self, build_write, page};
use rs_bikez::services::{FecService, FtmsService, SharedBikeState};
use rs_bikez::traits::{BusDirection, SerialTx, Transport};
use rs_bikez::BusTransport;

struct ChannelSerial {
    tx: mpsc::Sender<Vec<u8>>,
}

impl SerialTx for ChannelSerial {
    type Error = mpsc::SendError<Vec<u8>>;

    fn write_frame(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        self.tx.send(bytes.to_vec())
    }
}

struct NullDirection;

impl BusDirection for NullDirection {
    fn set_transmit(&mut self, _enabled: bool) {}
}

/// Build a read reply the way a motor board does: node, function, byte
/// count 0x04, two registers with the value in the second, checksum, CRLF.
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

#[test]
fn full_bus_transaction_against_a_simulated_board() {
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let bus = Arc::new(BusTransport::new(
        ChannelSerial { tx },
        NullDirection,
        BusConfig {
            settle_ms: 0,
            tx_timeout_ms: 200,
            rx_timeout_ms: 200,
            ..BusConfig::default()
        },
    ));

    // Peer thread plays the cadence board: decode the stuffed command,
    // answer the read with a register value.
    let peer_bus = Arc::clone(&bus);
    let peer = thread::spawn(move || {
        let mut raw = rx.recv().unwrap();
        peer_bus.complete_tx();
        modbus::unstuff_8n1(&mut raw);
        let command = modbus::decode_command(&raw).unwrap();
        assert_eq!(command.function, FunctionCode::ReadHolding);

        let mut reply = read_reply(command.node, 72);
        modbus::stuff_7n2(&mut reply);
        peer_bus.feed_rx(&reply);
    });

    let mut transport = Arc::clone(&bus);
    let reply = transport.send_and_await(&CommandFrame::read_holding(NodeAddress::Rpm, 0x0002));
    peer.join().unwrap();

    assert_eq!(
        reply,
        Ok(Reply::Register {
            node: NodeAddress::Rpm,
            value: 72
        })
    );
}

#[test]
fn ftms_sim_params_drive_the_bike_over_the_bus() {
    let state = Arc::new(SharedBikeState::new(
        BikeController::new(MockTransport::new()).with_startup_settle_ms(0),
    ));
    let _ = state.with_controller(|bike| bike.initialize());

    let mut ftms = FtmsService::new(
        MockNotifier::new(),
        MockNotifier::new(),
        MockNotifier::new(),
        Arc::clone(&state),
    );
    ftms.set_control_subscribed(true);

    // Set Indoor Bike Simulation Parameters: no wind, +10.00% grade.
    let grade = 1000i16.to_le_bytes();
    ftms.handle_control_write(&[0x11, 0x00, 0x00, grade[0], grade[1], 0x21, 0x32]);

    assert_eq!(state.with_controller(|bike| bike.target_incline()), Some(40));

    // The next control cycle pushes the new register at the board.
    let _ = state.with_controller(|bike| bike.run_cycle());
    let pushed = state
        .with_controller(|bike| bike.transport().sent_to(NodeAddress::Incline))
        .unwrap();
    assert!(pushed.contains(&CommandFrame::write_holding(NodeAddress::Incline, 0x0001, 40)));
}

#[test]
fn ftms_telemetry_reflects_the_shared_snapshot() {
    let state = Arc::new(SharedBikeState::new(
        BikeController::new(MockTransport::new()),
    ));
    let mut ftms = FtmsService::new(
        MockNotifier::new(),
        MockNotifier::new(),
        MockNotifier::new(),
        Arc::clone(&state),
    );
    ftms.set_bike_data_subscribed(true);

    let data = state.snapshot().unwrap();
    ftms.notify_bike_data(&data);

    // Fresh controller: no cadence, no power, flags word 0x0044.
    // The notifier is private to the service, but the payload layout is
    // pinned down by the unit tests; here we only prove the plumbing ran
    // without a controller deadlock.
    assert_eq!(data.rpm, 0);
    assert_eq!(data.watts, 0);
}

#[test]
fn fec_control_write_is_echoed_on_the_command_status_page() {
    let mut fec = FecService::new(MockNotifier::new(), MockClock::new(), MockDelay::new());
    fec.set_subscribed(true);

    // Track resistance: -2.00% grade (little endian), Crr 0x32.
    let mut payload = [0xFFu8; 8];
    payload[0] = page::TRACK_RESISTANCE;
    payload[5] = 0x38;
    payload[6] = 0xFF;
    payload[7] = 0x32;
    fec.handle_write(&build_write(5, payload));

    // Ask for the command status page and read the echo back.
    let mut request = [0u8; 8];
    request[0] = page::REQUEST_DATA_PAGE;
    request[5] = 1;
    request[6] = page::COMMAND_STATUS;
    fec.handle_write(&build_write(5, request));
    fec.emit_cycle();

    let msg = &fec.notifier().sent[0];
    assert_eq!(msg[0], fec::SYNC);
    assert_eq!(msg[12], fec::xor_checksum(&msg[..12]));
    assert_eq!(
        &msg[4..12],
        &[
            page::COMMAND_STATUS,
            page::TRACK_RESISTANCE,
            0x00,
            0x00,
            0xFF,
            0x38,
            0xFF,
            0x32
        ]
    );
}

#[test]
fn fec_schedule_starts_with_bike_data_and_settings() {
    let mut fec = FecService::new(MockNotifier::new(), MockClock::new(), MockDelay::new());
    fec.set_subscribed(true);

    for _ in 0..4 {
        fec.emit_cycle();
    }
    let pages: Vec<u8> = fec.notifier().sent.iter().map(|m| m[4]).collect();
    assert_eq!(
        pages,
        vec![
            page::BIKE_DATA,
            page::GENERAL_SETTINGS,
            page::BIKE_DATA,
            page::BIKE_DATA
        ]
    );
}

#[test]
fn unsubscribed_adapters_stay_silent() {
    let state = Arc::new(SharedBikeState::new(
        BikeController::new(MockTransport::new()),
    ));
    let mut ftms = FtmsService::new(
        MockNotifier::new(),
        MockNotifier::new(),
        MockNotifier::new(),
        Arc::clone(&state),
    );
    // No subscriptions: control writes are processed, responses dropped,
    // and the targets still land (the bike does not care who is watching).
    let grade = 500i16.to_le_bytes();
    ftms.handle_control_write(&[0x11, 0x00, 0x00, grade[0], grade[1], 0x21, 0x32]);
    assert_eq!(state.with_controller(|bike| bike.target_incline()), Some(30));

    let mut fec = FecService::new(MockNotifier::new(), MockClock::new(), MockDelay::new());
    fec.emit_cycle();
    assert!(fec.notifier().sent.is_empty());
}
