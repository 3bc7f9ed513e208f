use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use plotter_api::handlers::Session;
use plotter_common::config::{AxisWiring, Boundaries, KinematicParams, MachineConfig, MachineType};
use plotter_common::error::PlotterError;
use plotter_core::machine::{CartesianKinematics, Machine};
use plotter_core::session::SketchSource;

fn sample_config() -> MachineConfig {
    MachineConfig {
        machine_type: MachineType::Cartesian,
        servo_gpio: 18,
        primary_axis: AxisWiring {
            gpio: vec![1, 2, 3, 4],
            limit_gpio: 5,
        },
        secondary_axis: AxisWiring {
            gpio: vec![6, 7, 8, 9],
            limit_gpio: 10,
        },
        steps_per_revolution: 2038,
        kinematic_params: KinematicParams::Cartesian {
            unit_per_revolution: 64.0,
        },
        step_delay_ms_rapid: 2.0,
        step_delay_ms_linear: 4.0,
        step_delay_ms_init: 10.0,
        acceleration_rate: 0.5,
        backlash_steps_primary: 0,
        backlash_steps_secondary: 0,
        min_pen_duty: 2.0,
        max_pen_duty: 12.0,
        pen_delay_ms_init: 10.0,
        pen_delay_ms_target: 2.0,
        pen_acceleration_rate: 0.3,
        x_min: 0.0,
        y_min: 0.0,
        x_max: 128.0,
        y_max: 131.5,
        user_boundaries: Boundaries::default(),
        reject_oob: false,
        max_queue_length: 5,
        active_timeout_ms: 30_000,
        user_data_root: None,
    }
}

fn fake_session() -> Session<CartesianKinematics> {
    let config = sample_config();
    let kinematics = CartesianKinematics {
        unit_per_revolution: 64.0,
    };
    let (primary_pins, _p) = plotter_api::sim::sim_axis_pins();
    let (secondary_pins, _s) = plotter_api::sim::sim_axis_pins();
    let driver = plotter_core::stepper::StepperDriver::new(
        plotter_core::stepper::StepperAxis::new(primary_pins, 0, 0.0),
        plotter_core::stepper::StepperAxis::new(secondary_pins, 0, 0.0),
    );
    let pen = Box::new(plotter_api::sim::SimPwmPin::new(2.0));
    let machine = Machine::new(kinematics, driver, pen, &config).unwrap();
    Session::new(Rc::new(RefCell::new(machine)))
}

#[test]
fn queue_gcode_appends_lines() {
    let session = fake_session();
    session.queue_gcode("G0 X1 Y1\nG0 X2 Y2").unwrap();
    assert_eq!(session.machine.borrow().gcode_queue.len(), 2);
}

#[test]
fn queue_gcode_rejects_when_over_capacity() {
    let session = fake_session();
    let err = session
        .queue_gcode("G0 X1 Y1\nG0 X2 Y2\nG0 X3 Y3\nG0 X4 Y4\nG0 X5 Y5\nG0 X6 Y6")
        .unwrap_err();
    assert!(matches!(err, PlotterError::Value(_)));
}

#[test]
fn set_paused_accepts_true_false_and_rejects_other() {
    let session = fake_session();
    session.set_paused("true").unwrap();
    assert!(session.machine.borrow().machine_paused);
    session.set_paused("false").unwrap();
    assert!(!session.machine.borrow().machine_paused);
    assert!(session.set_paused("maybe").is_err());
}

#[test]
fn stop_drains_queue_and_clears_pause() {
    let session = fake_session();
    session.queue_gcode("G0 X1 Y1").unwrap();
    session.set_paused("true").unwrap();
    let mut session = session;
    session.stop();
    assert_eq!(session.machine.borrow().gcode_queue.len(), 0);
    assert!(!session.machine.borrow().machine_paused);
}

#[test]
fn set_tiling_queues_grid_commands_and_scaling() {
    let session = fake_session();
    session.set_tiling(2).unwrap();
    let queue: Vec<String> = session.machine.borrow().gcode_queue.iter().cloned().collect();
    // 2x2 grid -> 4 WCS-set lines + one scaling line + one selector line
    assert_eq!(queue.len(), 6);
    assert!(queue[4].starts_with("G51 S0.5"));
}

#[test]
fn set_tiling_rejects_out_of_range_grid_size() {
    let session = fake_session();
    assert!(session.set_tiling(0).is_err());
    assert!(session.set_tiling(4).is_err());
}

#[test]
fn status_reflects_queue_and_position() {
    let session = fake_session();
    session.queue_gcode("G0 X1 Y1").unwrap();
    let status = session.status();
    assert_eq!(status.queue_size, 1);
    assert_eq!(status.positioning, "absolute");
    assert_eq!(status.coordinate_system, "G53");
}

struct EmptySketchSource;

impl SketchSource for EmptySketchSource {
    type Lines = futures_util::stream::Empty<io::Result<String>>;

    fn read_lines(&self, _name: &str) -> io::Result<Self::Lines> {
        Ok(futures_util::stream::empty())
    }

    fn list(&self) -> io::Result<Vec<String>> {
        Ok(vec!["demo.gcode".to_string()])
    }
}

#[tokio::test]
async fn play_rejects_unknown_sketch() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let mut session = fake_session();
            let source = Rc::new(EmptySketchSource);
            let err = session.play(source, "missing.gcode", &[]).unwrap_err();
            assert!(matches!(err, PlotterError::Value(_)));
        })
        .await;
}

#[tokio::test]
async fn play_spawns_session_marked_in_progress_until_drained() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let mut session = fake_session();
            let source = Rc::new(EmptySketchSource);
            session.play(source, "demo.gcode", &[]).unwrap();
            // Let the spawned task run to completion.
            tokio::task::yield_now().await;
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            assert_eq!(session.machine.borrow().gcode_queue.back().cloned(), Some("M104".to_string()));
        })
        .await;
}
