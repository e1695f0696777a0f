//! Integration tests for the control core: calibration, the poll/adjust
//! cycle, retries, and the paths that feed it (buttons, remote targets).

use std::sync::Arc;

use rs_bikez::bike::{BikeController, BikeTargets, INITIAL_RESISTANCE_REGISTER};
use rs_bikez::buttons::ButtonDebouncer;
use rs_bikez::hal::MockTransport;
use rs_bikez::modbus::{CommandFrame, NodeAddress};
use rs_bikez::services::SharedBikeState;
use rs_bikez::traits::Transport;

fn calibration_frames() -> Vec<CommandFrame> {
    vec![
        CommandFrame::write_holding(NodeAddress::Resistance, 0x0007, 0x000F),
        CommandFrame::write_holding(NodeAddress::Resistance, 0x0008, 0x00BE),
        CommandFrame::write_holding(NodeAddress::Incline, 0x0006, 0x0000),
        CommandFrame::write_holding(NodeAddress::Incline, 0x0007, 0x003C),
        CommandFrame::write_holding(NodeAddress::Incline, 0x0009, 0x0014),
        CommandFrame::write_holding(NodeAddress::Incline, 0x0008, 0x003C),
    ]
}

#[test]
fn initialize_sends_the_full_calibration_sequence() {
    let mut bike = BikeController::new(MockTransport::new()).with_startup_settle_ms(3000);
    bike.initialize();

    let mut expected = calibration_frames();
    expected.push(CommandFrame::write_holding(
        NodeAddress::Resistance,
        0x0005,
        INITIAL_RESISTANCE_REGISTER,
    ));
    expected.push(CommandFrame::read_holding(NodeAddress::Incline, 0x0002));

    assert_eq!(bike.transport().sent, expected);
    // The boards get their boot settle before the first frame.
    assert_eq!(bike.transport().pauses[0], 3000);
}

#[test]
fn initialize_takes_the_incline_baseline() {
    let mut transport = MockTransport::new();
    transport.incline_value = 0x001E;
    let mut bike = BikeController::new(transport).with_startup_settle_ms(0);
    bike.initialize();

    assert_eq!(bike.actual_incline(), 0x001E);
    assert_eq!(bike.target_incline(), 0x001E);
}

#[test]
fn initialize_against_a_dead_bus_retries_every_frame() {
    let mut transport = MockTransport::new();
    transport.fail_all = true;
    let mut bike = BikeController::new(transport).with_startup_settle_ms(0);
    bike.initialize();

    // 51 attempts for the slow resistance board, 6 each for the other
    // five calibration writes, 6 for the initial resistance, 6 for the
    // baseline read.
    assert_eq!(bike.transport().sent.len(), 51 + 5 * 6 + 6 + 6);
}

#[test]
fn run_cycle_polls_cadence_and_pushes_resistance_once() {
    let mut bike = BikeController::new(MockTransport::new()).with_startup_settle_ms(0);
    bike.initialize();
    let after_init = bike.transport().sent.len();

    bike.run_cycle();
    let first_cycle = &bike.transport().sent[after_init..];
    assert_eq!(first_cycle[0], CommandFrame::read_holding(NodeAddress::Rpm, 0x0002));
    // Display level 1 at 0% maps to register 15, a change from the boot
    // value, so exactly one resistance write follows the poll.
    assert_eq!(
        first_cycle[1],
        CommandFrame::write_holding(NodeAddress::Resistance, 0x0005, 15)
    );
    assert_eq!(first_cycle.len(), 2);

    // Nothing changed: the next cycle is only the cadence poll.
    let before = bike.transport().sent.len();
    bike.run_cycle();
    assert_eq!(bike.transport().sent.len(), before + 1);
}

#[test]
fn run_cycle_chases_a_remote_incline_target() {
    let mut bike = BikeController::new(MockTransport::new()).with_startup_settle_ms(0);
    bike.initialize();

    // Trainer app asks for +10%: register 40. The board still reports 20.
    bike.apply_targets(BikeTargets::grade(1000));
    bike.run_cycle();

    let chase = CommandFrame::write_holding(NodeAddress::Incline, 0x0001, 40);
    let reread = CommandFrame::read_holding(NodeAddress::Incline, 0x0002);
    let incline_frames = bike.transport().sent_to(NodeAddress::Incline);
    assert_eq!(&incline_frames[incline_frames.len() - 2..], &[chase, reread]);

    // The mock board keeps reporting 20, so the next cycle chases again.
    bike.run_cycle();
    let incline_frames = bike.transport().sent_to(NodeAddress::Incline);
    assert_eq!(&incline_frames[incline_frames.len() - 2..], &[chase, reread]);
    assert_eq!(bike.actual_incline(), 20);
    assert_eq!(bike.target_incline(), 40);
}

#[test]
fn retry_wrapper_pauses_after_every_failure() {
    let mut transport = MockTransport::new();
    transport.fail_all = true;

    let frame = CommandFrame::read_holding(NodeAddress::Rpm, 0x0002);
    assert_eq!(transport.send_with_retries(&frame, 3, 10), None);
    assert_eq!(transport.sent.len(), 4);
    assert_eq!(transport.pauses, vec![10, 10, 10, 10]);
}

#[test]
fn button_steps_reach_the_shared_controller() {
    let state = Arc::new(SharedBikeState::new(
        BikeController::new(MockTransport::new()),
    ));

    let mut debouncer = ButtonDebouncer::incline();
    let now = state.now_ms();
    if let Some(adjustment) = debouncer.on_edge(now, true, false) {
        let _ = state.with_controller(|bike| bike.adjust_incline(adjustment));
    }

    // Chatter right behind the edge must not double-step.
    if let Some(adjustment) = debouncer.on_edge(now + 5, true, false) {
        let _ = state.with_controller(|bike| bike.adjust_incline(adjustment));
    }

    assert_eq!(state.with_controller(|bike| bike.target_incline()), Some(21));
}

#[test]
fn remote_resistance_target_moves_the_display_level() {
    let state = Arc::new(SharedBikeState::new(
        BikeController::new(MockTransport::new()),
    ));

    // 50% in FTMS half-percent units.
    use rs_bikez::traits::TargetSink;
    state.apply_targets(BikeTargets::resistance(100));

    assert_eq!(
        state.with_controller(|bike| bike.display_resistance()),
        Some(12)
    );
    // Level 12 at 0% grade: 15 + 5 * 11.
    assert_eq!(
        state.with_controller(|bike| bike.resistance_register()),
        Some(70)
    );
}
