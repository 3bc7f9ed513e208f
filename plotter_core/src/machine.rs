//! Machine state and the generic motion planner.
//!
//! `Machine<K>` is generic over a [`Kinematics`] strategy rather than
//! using the original's class hierarchy (`CartesianPlotter`/`ScaraPlotter`
//! subclassing `MachineBase`) — the two implementations differ only in
//! `get_current_pos`/`get_step_differential`, so a capability trait plus a
//! generic planner avoids inheritance for two variants of one interface.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use plotter_common::config::{Boundaries, MachineConfig};
use plotter_common::error::PlotterError;
use plotter_common::kinematics;
use plotter_common::wcs::{CsTable, WcsId};

use crate::speed_ctrl::SpeedController;
use crate::stepper::StepperDriver;

/// Absolute/relative coordinate mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Positioning {
    Absolute,
    Relative,
}

/// Capability interface distinguishing Cartesian from SCARA machines. The
/// planner is generic over this rather than over a concrete machine type.
pub trait Kinematics {
    /// Current `(x, y)` position in machine units.
    fn get_current_pos(&self, driver: &StepperDriver, steps_per_revolution: i64) -> (f64, f64);

    /// Number of primary/secondary steps required to reach `(x, y)` from
    /// the current position.
    fn get_step_differential(
        &self,
        driver: &StepperDriver,
        steps_per_revolution: i64,
        x: f64,
        y: f64,
    ) -> Result<(i64, i64), PlotterError>;
}

/// Cartesian kinematics: steps map linearly to `unit_per_revolution`.
pub struct CartesianKinematics {
    pub unit_per_revolution: f64,
}

impl Kinematics for CartesianKinematics {
    fn get_current_pos(&self, driver: &StepperDriver, steps_per_revolution: i64) -> (f64, f64) {
        let x = (driver.primary.current_pos as f64 / steps_per_revolution as f64)
            * self.unit_per_revolution;
        let y = (driver.secondary.current_pos as f64 / steps_per_revolution as f64)
            * self.unit_per_revolution;
        (x, y)
    }

    fn get_step_differential(
        &self,
        driver: &StepperDriver,
        steps_per_revolution: i64,
        x: f64,
        y: f64,
    ) -> Result<(i64, i64), PlotterError> {
        let (cx, cy) = self.get_current_pos(driver, steps_per_revolution);
        let dx = (((x - cx) / self.unit_per_revolution) * steps_per_revolution as f64) as i64;
        let dy = (((y - cy) / self.unit_per_revolution) * steps_per_revolution as f64) as i64;
        Ok((dx, dy))
    }
}

/// SCARA kinematics: steps resolved through two-link inverse kinematics.
pub struct ScaraKinematics {
    pub radius_primary: f64,
    pub radius_secondary: f64,
}

impl ScaraKinematics {
    fn polar_primary(&self, driver: &StepperDriver, steps_per_revolution: i64) -> (f64, f64) {
        let angle = std::f64::consts::PI * 360.0
            * (driver.primary.current_pos as f64 / steps_per_revolution as f64)
            / 180.0;
        (self.radius_primary, angle)
    }

    fn polar_secondary(&self, driver: &StepperDriver, steps_per_revolution: i64) -> (f64, f64) {
        let angle = std::f64::consts::PI * 360.0
            * (driver.secondary.current_pos as f64 / steps_per_revolution as f64)
            / 180.0;
        (self.radius_secondary, angle)
    }
}

impl Kinematics for ScaraKinematics {
    fn get_current_pos(&self, driver: &StepperDriver, steps_per_revolution: i64) -> (f64, f64) {
        let (r1, theta1) = self.polar_primary(driver, steps_per_revolution);
        let (r2, theta2) = self.polar_secondary(driver, steps_per_revolution);
        let primary = kinematics::polar_to_cartesian(r1, theta1);
        let secondary = kinematics::polar_to_cartesian(r2, theta2);
        let secondary_rot = kinematics::rotate(secondary.0, secondary.1, theta1);
        (primary.0 + secondary_rot.0, primary.1 + secondary_rot.1)
    }

    fn get_step_differential(
        &self,
        driver: &StepperDriver,
        steps_per_revolution: i64,
        x: f64,
        y: f64,
    ) -> Result<(i64, i64), PlotterError> {
        let primary = self.polar_primary(driver, steps_per_revolution);
        let secondary = self.polar_secondary(driver, steps_per_revolution);
        let (angle_primary, angle_secondary) =
            kinematics::resolve_arm_angles(x, y, primary, secondary)?;
        Ok((
            kinematics::steps(angle_primary, steps_per_revolution),
            kinematics::steps(angle_secondary, steps_per_revolution),
        ))
    }
}

/// Append-only diagnostic log, each entry timestamped with
/// seconds-since-epoch, following the original's `f"{time()}: ..."`
/// prefix convention.
pub fn timestamped(message: impl AsRef<str>) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    format!("{now}: {}", message.as_ref())
}

/// Owns all mutable plotter state: hardware driver, kinematics strategy,
/// coordinate systems, queue and diagnostics.
pub struct Machine<K: Kinematics> {
    pub kinematics: K,
    pub driver: StepperDriver,
    pub pen: Box<dyn plotter_common::hal::PwmPin>,

    pub steps_per_revolution: i64,
    pub step_delay_ms_rapid: f64,
    pub step_delay_ms_linear: f64,
    pub step_delay_ms_init: f64,
    pub acceleration_rate: f64,

    pub min_pen_duty: f64,
    pub max_pen_duty: f64,
    pub pen_delay_ms_init: f64,
    pub pen_delay_ms_target: f64,
    pub pen_acceleration_rate: f64,

    pub global_boundaries: Boundaries,
    pub user_boundaries: Boundaries,
    pub reject_oob: bool,

    pub positioning: Positioning,
    pub cs_coordinates: CsTable,
    pub current_cs: WcsId,
    pub cs_scaling: f64,
    pub tile_grid_size: u8,
    pub current_tile_idx: u8,

    pub primary_speed_controller: SpeedController,
    pub secondary_speed_controller: SpeedController,

    pub max_queue_length: usize,
    pub gcode_queue: VecDeque<String>,
    pub additional_info: Vec<String>,

    pub activated: bool,
    pub active_timeout_ms: u64,
    pub machine_paused: bool,
    pub last_command_at: std::time::Instant,
}

impl<K: Kinematics> Machine<K> {
    pub fn new(
        kinematics: K,
        driver: StepperDriver,
        pen: Box<dyn plotter_common::hal::PwmPin>,
        config: &MachineConfig,
    ) -> Result<Self, PlotterError> {
        let primary_speed_controller = SpeedController::new(
            config.step_delay_ms_rapid,
            config.step_delay_ms_init,
            config.acceleration_rate,
        )?;
        let secondary_speed_controller = SpeedController::new(
            config.step_delay_ms_rapid,
            config.step_delay_ms_init,
            config.acceleration_rate,
        )?;

        Ok(Self {
            kinematics,
            driver,
            pen,
            steps_per_revolution: config.steps_per_revolution,
            step_delay_ms_rapid: config.step_delay_ms_rapid,
            step_delay_ms_linear: config.step_delay_ms_linear,
            step_delay_ms_init: config.step_delay_ms_init,
            acceleration_rate: config.acceleration_rate,
            min_pen_duty: config.min_pen_duty,
            max_pen_duty: config.max_pen_duty,
            pen_delay_ms_init: config.pen_delay_ms_init,
            pen_delay_ms_target: config.pen_delay_ms_target,
            pen_acceleration_rate: config.pen_acceleration_rate,
            global_boundaries: Boundaries {
                x_min: Some(config.x_min),
                y_min: Some(config.y_min),
                x_max: Some(config.x_max),
                y_max: Some(config.y_max),
            },
            user_boundaries: config.user_boundaries,
            reject_oob: config.reject_oob,
            positioning: Positioning::Absolute,
            cs_coordinates: CsTable::default(),
            current_cs: WcsId::G53,
            cs_scaling: 1.0,
            tile_grid_size: 3,
            current_tile_idx: 0,
            primary_speed_controller,
            secondary_speed_controller,
            max_queue_length: config.max_queue_length,
            gcode_queue: VecDeque::new(),
            additional_info: Vec::new(),
            activated: true,
            active_timeout_ms: config.active_timeout_ms,
            machine_paused: false,
            last_command_at: std::time::Instant::now(),
        })
    }

    pub fn current_pos(&self) -> (f64, f64) {
        self.kinematics
            .get_current_pos(&self.driver, self.steps_per_revolution)
    }

    pub fn log_diagnostic(&mut self, message: impl AsRef<str>) {
        self.additional_info.push(timestamped(message));
    }

    /// Set a work coordinate system's offset. `G53` is always pinned to
    /// `(0, 0)` by [`CsTable::set`].
    pub fn set_wcs(&mut self, id: WcsId, offset: (f64, f64)) {
        self.cs_coordinates.set(id, offset);
    }

    /// Raise/lower/prepare the pen by walking duty cycle toward a target
    /// position in `0..=100`.
    pub async fn position_pen(&mut self, target: i64) -> Result<(), PlotterError> {
        if !(0..=100).contains(&target) {
            return Err(PlotterError::Value(format!(
                "invalid target position: {target}"
            )));
        }

        let target_duty =
            self.min_pen_duty + (self.max_pen_duty - self.min_pen_duty) * target as f64 / 100.0;
        let current_duty = self.pen.duty_percent();

        if (current_duty - target_duty).abs() < f64::EPSILON {
            return Ok(());
        }

        let mut controller = SpeedController::new(
            self.pen_delay_ms_target,
            self.pen_delay_ms_init,
            self.pen_acceleration_rate,
        )?;
        let mut guard = controller.acquire();

        let step = if current_duty < target_duty { 1.0 } else { -1.0 };
        let mut duty = current_duty;
        loop {
            self.pen.set_duty_percent(duty)?;
            let remaining = (target_duty - duty).abs();
            guard.controller().update_speed(remaining, 1.0);
            guard.controller().control().await;
            if (duty - target_duty).abs() < f64::EPSILON {
                break;
            }
            duty += step;
            if (step > 0.0 && duty > target_duty) || (step < 0.0 && duty < target_duty) {
                duty = target_duty;
            }
        }
        Ok(())
    }

    pub async fn raise_tool(&mut self) -> Result<(), PlotterError> {
        self.position_pen(100).await
    }

    pub async fn lower_tool(&mut self) -> Result<(), PlotterError> {
        self.position_pen(0).await
    }

    pub async fn prepare_tool(&mut self) -> Result<(), PlotterError> {
        self.position_pen(50).await
    }

    /// Clamp or reject `(x, y)` against the configured boundaries.
    fn apply_boundaries(&self, x: f64, y: f64) -> Result<(f64, f64), PlotterError> {
        let gb = &self.global_boundaries;
        let out_of_global = x < gb.x_min.unwrap_or(f64::NEG_INFINITY)
            || y < gb.y_min.unwrap_or(f64::NEG_INFINITY)
            || x > gb.x_max.unwrap_or(f64::INFINITY)
            || y > gb.y_max.unwrap_or(f64::INFINITY);

        let ub = &self.user_boundaries;
        let out_of_user = ub.is_complete()
            && (x < ub.x_min.unwrap()
                || y < ub.y_min.unwrap()
                || x > ub.x_max.unwrap()
                || y > ub.y_max.unwrap());

        if !(out_of_global || out_of_user) {
            return Ok((x, y));
        }

        if self.reject_oob {
            return Err(PlotterError::OutOfBounds { x, y });
        }

        if ub.is_complete() {
            Ok((
                x.clamp(ub.x_min.unwrap(), ub.x_max.unwrap()),
                y.clamp(ub.y_min.unwrap(), ub.y_max.unwrap()),
            ))
        } else {
            Ok((
                x.clamp(gb.x_min.unwrap(), gb.x_max.unwrap()),
                y.clamp(gb.y_min.unwrap(), gb.y_max.unwrap()),
            ))
        }
    }

    /// Move to `(x, y)`, interleaving primary/secondary steps with
    /// Bresenham's algorithm under dual trapezoidal speed control.
    #[allow(clippy::too_many_arguments)]
    pub async fn move_to(
        &mut self,
        x: f64,
        y: f64,
        target_delay_ms: Option<f64>,
        init_delay_ms: Option<f64>,
        acceleration_rate: Option<f64>,
        junction_factor: f64,
        safe: bool,
    ) -> Result<(), PlotterError> {
        let target_delay_ms = target_delay_ms.unwrap_or(self.step_delay_ms_rapid);
        let init_delay_ms = init_delay_ms.unwrap_or(self.step_delay_ms_init);
        let acceleration_rate = acceleration_rate.unwrap_or(self.acceleration_rate);

        let (x, y) = if safe {
            self.apply_boundaries(x, y)?
        } else {
            (x, y)
        };

        let (dx, dy) =
            self.kinematics
                .get_step_differential(&self.driver, self.steps_per_revolution, x, y)?;
        if dx == 0 && dy == 0 {
            return Ok(());
        }

        let sx_backward = dx < 0;
        let sy_backward = dy < 0;
        let dx = dx.unsigned_abs() as i64;
        let dy = dy.unsigned_abs() as i64;

        let mut err = dx - dy;
        let mut remaining_x = dx;
        let mut remaining_y = dy;
        let x_dominant = dx >= dy;

        let mut primary_guard = self.primary_speed_controller.acquire();
        let mut secondary_guard = self.secondary_speed_controller.acquire();
        primary_guard.controller().update(
            Some(init_delay_ms),
            Some(target_delay_ms),
            Some(acceleration_rate),
        )?;
        secondary_guard.controller().update(
            Some(init_delay_ms),
            Some(target_delay_ms),
            Some(acceleration_rate),
        )?;

        while remaining_x > 0 || remaining_y > 0 {
            if safe
                && (self.driver.primary.limit_asserted()?
                    || self.driver.secondary.limit_asserted()?)
            {
                return Err(PlotterError::LimitSwitch(
                    "limit switch triggered".to_string(),
                ));
            }

            let e2 = 2 * err;

            if e2 > -dy && remaining_x > 0 {
                self.driver.primary.step(sx_backward).await.map_err(|e| {
                    PlotterError::LimitSwitch(format!("stepper I/O error: {e}"))
                })?;
                remaining_x -= 1;
                err -= dy;
            }

            if e2 < dx && remaining_y > 0 {
                self.driver.secondary.step(sy_backward).await.map_err(|e| {
                    PlotterError::LimitSwitch(format!("stepper I/O error: {e}"))
                })?;
                remaining_y -= 1;
                err += dx;
            }

            primary_guard
                .controller()
                .update_speed(remaining_x as f64, junction_factor);
            secondary_guard
                .controller()
                .update_speed(remaining_y as f64, junction_factor);

            if x_dominant {
                primary_guard.controller().control().await;
            } else {
                secondary_guard.controller().control().await;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plotter_common::hal::{AxisPins, DigitalInputPin, DigitalOutputPin, HalError, PwmPin};
    use plotter_common::config::{AxisWiring, KinematicParams, MachineType};
    use std::cell::Cell;
    use std::rc::Rc;

    struct FakeOut;
    impl DigitalOutputPin for FakeOut {
        fn write(&mut self, _high: bool) -> Result<(), HalError> {
            Ok(())
        }
    }
    struct FakeIn(Rc<Cell<bool>>);
    impl DigitalInputPin for FakeIn {
        fn read(&self) -> Result<bool, HalError> {
            Ok(self.0.get())
        }
    }
    struct FakePwm(f64);
    impl PwmPin for FakePwm {
        fn set_duty_percent(&mut self, duty: f64) -> Result<(), HalError> {
            self.0 = duty;
            Ok(())
        }
        fn duty_percent(&self) -> f64 {
            self.0
        }
    }

    fn fake_driver() -> StepperDriver {
        let coils = || -> [Box<dyn DigitalOutputPin>; 4] {
            [
                Box::new(FakeOut),
                Box::new(FakeOut),
                Box::new(FakeOut),
                Box::new(FakeOut),
            ]
        };
        let primary = crate::stepper::StepperAxis::new(
            AxisPins::new(coils(), Box::new(FakeIn(Rc::new(Cell::new(false))))),
            0,
            0.0,
        );
        let secondary = crate::stepper::StepperAxis::new(
            AxisPins::new(coils(), Box::new(FakeIn(Rc::new(Cell::new(false))))),
            0,
            0.0,
        );
        StepperDriver::new(primary, secondary)
    }

    fn sample_config() -> MachineConfig {
        MachineConfig {
            machine_type: MachineType::Cartesian,
            servo_gpio: 18,
            primary_axis: AxisWiring { gpio: vec![1, 2, 3, 4], limit_gpio: 5 },
            secondary_axis: AxisWiring { gpio: vec![6, 7, 8, 9], limit_gpio: 10 },
            steps_per_revolution: 2038,
            kinematic_params: KinematicParams::Cartesian { unit_per_revolution: 64.0 },
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
            max_queue_length: 100,
            active_timeout_ms: 30_000,
            user_data_root: None,
        }
    }

    fn fake_machine() -> Machine<CartesianKinematics> {
        let config = sample_config();
        let kinematics = CartesianKinematics {
            unit_per_revolution: 64.0,
        };
        Machine::new(kinematics, fake_driver(), Box::new(FakePwm(2.0)), &config).unwrap()
    }

    #[tokio::test]
    async fn pure_x_move_steps_primary_only() {
        let mut machine = fake_machine();
        machine.move_to(64.0, 0.0, None, None, None, 0.0, true).await.unwrap();
        assert_eq!(machine.driver.primary.current_pos, 2038);
        assert_eq!(machine.driver.secondary.current_pos, 0);
    }

    #[tokio::test]
    async fn boundary_clamp_without_reject() {
        let mut machine = fake_machine();
        machine.move_to(999.0, 0.0, None, None, None, 0.0, true).await.unwrap();
        assert_eq!(machine.driver.primary.current_pos, 2038);
        assert!(machine.additional_info.is_empty());
    }

    #[tokio::test]
    async fn out_of_bounds_rejected_when_configured() {
        let mut machine = fake_machine();
        machine.reject_oob = true;
        let err = machine
            .move_to(999.0, 0.0, None, None, None, 0.0, true)
            .await
            .unwrap_err();
        assert!(matches!(err, PlotterError::OutOfBounds { .. }));
        assert_eq!(machine.driver.primary.current_pos, 0);
    }

    #[tokio::test]
    async fn diagonal_move_steps_both_axes_equally() {
        let mut machine = fake_machine();
        machine.move_to(1.0, 1.0, None, None, None, 0.0, true).await.unwrap();
        assert_eq!(machine.driver.primary.current_pos, 31);
        assert_eq!(machine.driver.secondary.current_pos, 31);
    }

    #[test]
    fn g53_offset_cannot_be_changed() {
        let mut machine = fake_machine();
        machine.set_wcs(WcsId::G53, (5.0, 5.0));
        assert_eq!(machine.cs_coordinates.get(WcsId::G53), (0.0, 0.0));
    }
}
