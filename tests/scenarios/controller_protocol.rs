//! Test: wire protocol against the simulator and scripted firmware

use crate::helpers::*;
use stagescan::controller::{ControllerError, ControllerState, Dialect, MotionController};
use stagescan::core::{Axis, Waypoint};

const GRBL_BANNER: [&str; 2] = ["", "Grbl 1.1h ['$' for help]"];

fn logged(log: &stagescan::controller::simulator::CommandLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Grbl initialization writes one steps-per-unit register per motor after `G0`
#[tokio::test]
async fn test_grbl_calibration_lines() {
    let (mut controller, log) = simulated_controller(Dialect::Grbl, 1.0);
    controller.initialize(true).await.unwrap();

    assert_eq!(logged(&log), vec!["G0", "$100=1", "$101=1", "$102=1"]);
    assert_eq!(controller.state(), ControllerState::Ready);
}

#[tokio::test]
async fn test_marlin_has_no_calibration() {
    let (mut controller, log) = simulated_controller(Dialect::Marlin, 1.0);
    controller.initialize(true).await.unwrap();
    assert_eq!(logged(&log), vec!["G0"]);
}

#[tokio::test]
async fn test_wrong_banner_is_protocol_error() {
    let transport = ScriptedTransport::new(["", "Welcome to Smoothieware"]);
    let mut controller = scripted_controller(Dialect::Grbl, transport);

    let result = controller.initialize(true).await;

    assert!(matches!(result, Err(ControllerError::Protocol(_))));
    assert_eq!(controller.state(), ControllerState::Faulted);
}

#[tokio::test]
async fn test_missing_ack_times_out() {
    let transport = ScriptedTransport::new(GRBL_BANNER).hanging();
    let written = transport.written();
    let mut config = fast_config(Dialect::Grbl, &XYZ);
    config.ack_timeout_ms = 20;
    let mut controller = MotionController::new(config, Box::new(transport)).unwrap();

    let result = controller.initialize(true).await;

    assert!(matches!(result, Err(ControllerError::AckTimeout(_))));
    assert_eq!(written_lines(&written), vec!["G0"]);
}

#[tokio::test]
async fn test_undecodable_line() {
    let transport = ScriptedTransport::new(GRBL_BANNER).with_raw_line(&[0xff, 0xfe, b'\n']);
    let mut controller = scripted_controller(Dialect::Grbl, transport);

    let result = controller.initialize(true).await;

    match result {
        Err(ControllerError::Decode { raw, .. }) => assert_eq!(raw, vec![0xff, 0xfe, b'\n']),
        other => panic!("expected a decode error, got {:?}", other),
    }
}

/// Marlin answers M114 with two chatter lines before the report
#[tokio::test]
async fn test_marlin_position_skips_chatter() {
    let transport = ScriptedTransport::new([
        "start",
        "Marlin 2.1.2",
        "ok",
        "echo:busy: processing",
        "echo:M114",
        "X:1.500 Y:-2.000 Z:0.250 E:0.00 Count X:120 Y:-160 Z:20",
    ]);
    let written = transport.written();
    let mut controller = scripted_controller(Dialect::Marlin, transport);
    controller.initialize(true).await.unwrap();

    let position = controller.update_position().await.unwrap();

    assert_eq!(position.get(Axis::X), Some("1.500"));
    assert_eq!(position.get(Axis::Y), Some("-2.000"));
    assert_eq!(position.get(Axis::Z), Some("0.250"));
    assert_eq!(written_lines(&written), vec!["G0", "M114"]);
}

/// Grbl's status query is a single unterminated `?`
#[tokio::test]
async fn test_grbl_position_query() {
    let transport = ScriptedTransport::new(GRBL_BANNER)
        .with_raw_line(b"ok\r\n")
        .with_raw_line(b"ok\r\n")
        .with_raw_line(b"ok\r\n")
        .with_raw_line(b"ok\r\n")
        .with_raw_line(b"<Idle|MPos:1.000,2.000,3.000|FS:0,0>\r\n");
    let written = transport.written();
    let mut controller = scripted_controller(Dialect::Grbl, transport);
    controller.initialize(true).await.unwrap();

    let position = controller.update_position().await.unwrap();

    assert_eq!(position.get(Axis::Z), Some("3.000"));
    assert_eq!(written_lines(&written).last().map(String::as_str), Some("?"));
}

#[tokio::test]
async fn test_garbage_report_faults() {
    let transport = ScriptedTransport::new(["start", "Marlin 2.1.2", "ok", "a", "b", "no position here"]);
    let mut controller = scripted_controller(Dialect::Marlin, transport);
    controller.initialize(true).await.unwrap();

    let result = controller.update_position().await;

    assert!(matches!(result, Err(ControllerError::Protocol(_))));
    assert_eq!(controller.state(), ControllerState::Faulted);
}

#[tokio::test]
async fn test_move_command_and_convergence() {
    let (mut controller, log) = simulated_controller(Dialect::Grbl, 0.5);
    controller.initialize(true).await.unwrap();

    let target = Waypoint::new().with(Axis::X, 1.0).with(Axis::Y, 2.0);
    let distance = controller.move_to(&target).await.unwrap();

    assert_eq!(distance, 2.0);
    assert!(logged(&log).contains(&"G0 G90 G53 X1.000 Y2.000".to_string()));
    assert!(controller.position().matches(&target));
    assert_eq!(controller.position().get(Axis::Z), Some("0.000"));
}

#[tokio::test]
async fn test_stalled_stage_times_out() {
    let sim = stagescan::controller::SimulatedFirmware::new(Dialect::Grbl, &XYZ).with_speed(0.0);
    let mut config = fast_config(Dialect::Grbl, &XYZ);
    config.step_time_secs = 0.001;
    let mut controller = MotionController::new(config, Box::new(sim)).unwrap();
    controller.initialize(true).await.unwrap();

    let target = Waypoint::new().with(Axis::X, 1.0);
    let result = controller.move_to(&target).await;

    match result {
        Err(ControllerError::WaypointTimeout { target: reported, last_position, .. }) => {
            assert_eq!(reported, target);
            assert_eq!(last_position.get(Axis::X), Some("0.000"));
        }
        other => panic!("expected a waypoint timeout, got {:?}", other),
    }
    assert_eq!(controller.state(), ControllerState::Faulted);
}

#[tokio::test]
async fn test_grbl_jog() {
    let (mut controller, log) = simulated_controller(Dialect::Grbl, 1.0);
    controller.initialize(true).await.unwrap();

    let distance = controller.jog(Axis::X, 4).await.unwrap();

    assert_eq!(distance, 4.0);
    assert!(logged(&log).contains(&"$J=G91X4.0000F8000".to_string()));
    assert_eq!(controller.position().get(Axis::X), Some("4.000"));
    assert_eq!(controller.state(), ControllerState::Ready);
}

#[tokio::test]
async fn test_marlin_jog_switches_modes() {
    let (mut controller, log) = simulated_controller(Dialect::Marlin, 1.0);
    controller.initialize(true).await.unwrap();

    controller.jog(Axis::Y, -2).await.unwrap();

    let commands = logged(&log);
    let jog_start = commands.iter().position(|c| c == "G91").unwrap();
    assert_eq!(commands[jog_start + 1], "G0 Y-2.0000 F8000");
    assert_eq!(commands[jog_start + 2], "G90");
    assert_eq!(controller.position().get(Axis::Y), Some("-2.000"));
}

#[tokio::test]
async fn test_jog_unconfigured_axis() {
    let (mut controller, _) = simulated_controller(Dialect::Grbl, 1.0);
    controller.initialize(true).await.unwrap();
    assert!(matches!(
        controller.jog(Axis::W, 1).await,
        Err(ControllerError::ConfigValidation(_))
    ));
}

/// After a soft reset the session keeps working and the stage stays put
#[tokio::test]
async fn test_reset_then_move() {
    let (mut controller, _) = simulated_controller(Dialect::Grbl, 1.0);
    controller.initialize(true).await.unwrap();
    controller.move_to(&Waypoint::new().with(Axis::X, 2.0)).await.unwrap();

    controller.reset().await.unwrap();
    assert_eq!(controller.state(), ControllerState::Ready);

    let position = controller.update_position().await.unwrap();
    assert_eq!(position.get(Axis::X), Some("2.000"));

    controller.move_to(&Waypoint::new().with(Axis::X, 0.0)).await.unwrap();
    assert_eq!(controller.position().get(Axis::X), Some("0.000"));
}

#[tokio::test]
async fn test_home_zeroes_every_axis() {
    let (mut controller, _) = simulated_controller(Dialect::Marlin, 1.0);
    controller.initialize(true).await.unwrap();
    let target = Waypoint::new().with(Axis::X, 1.0).with(Axis::Y, 2.0).with(Axis::Z, 3.0);
    controller.move_to(&target).await.unwrap();

    let distance = controller.home().await.unwrap();

    assert_eq!(distance, 6.0);
    for axis in XYZ {
        assert_eq!(controller.position().get(axis), Some("0.000"));
    }
}
