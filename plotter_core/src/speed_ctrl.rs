//! Scoped, resettable trapezoidal delay generator.
//!
//! Acquisition is modeled as an RAII guard rather than a `__enter__`/
//! `__exit__` pair: [`SpeedController::acquire`] returns a
//! [`SpeedControllerGuard`] whose `Drop` clears the running flag on every
//! exit path, including early return or panic unwind.

use std::time::{Duration, Instant};

use plotter_common::error::ConfigError;

/// Per-axis trapezoidal delay generator.
#[derive(Debug, Clone)]
pub struct SpeedController {
    init_delay_ms: f64,
    target_delay_ms: f64,
    acceleration_rate: f64,
    acceleration_step_ms: f64,
    current_delay_ms: f64,
    previous_delay_ms: Option<f64>,
    last_step_at: Option<Instant>,
    running: bool,
}

impl SpeedController {
    /// Construct a new controller. `target_delay_ms` must be strictly less
    /// than `init_delay_ms`, and `acceleration_rate` must be in `(0, 1]`.
    pub fn new(
        target_delay_ms: f64,
        init_delay_ms: f64,
        acceleration_rate: f64,
    ) -> Result<Self, ConfigError> {
        if !(0.0 < acceleration_rate && acceleration_rate <= 1.0) {
            return Err(ConfigError::InvalidAccelerationRate(acceleration_rate));
        }
        if init_delay_ms <= target_delay_ms {
            return Err(ConfigError::InvalidDelayOrdering {
                target_delay_ms,
                init_delay_ms,
            });
        }

        Ok(Self {
            init_delay_ms,
            target_delay_ms,
            acceleration_rate,
            acceleration_step_ms: (init_delay_ms - target_delay_ms) * acceleration_rate,
            current_delay_ms: init_delay_ms,
            previous_delay_ms: None,
            last_step_at: None,
            running: false,
        })
    }

    /// Current delay, in milliseconds.
    pub fn delay_ms(&self) -> f64 {
        self.current_delay_ms
    }

    /// True while a [`SpeedControllerGuard`] is alive for this controller.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Acquire scoped use of this controller. The returned guard clears
    /// [`SpeedController::is_running`] back to `false` when dropped.
    pub fn acquire(&mut self) -> SpeedControllerGuard<'_> {
        self.running = true;
        SpeedControllerGuard { controller: self }
    }

    /// Recompute `acceleration_step_ms` from (optionally updated)
    /// parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NonPositiveAccelerationStep`] if the
    /// resulting step would be `<= 0`.
    pub fn update(
        &mut self,
        init_delay_ms: Option<f64>,
        target_delay_ms: Option<f64>,
        acceleration_rate: Option<f64>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = init_delay_ms {
            self.init_delay_ms = v;
        }
        if let Some(v) = target_delay_ms {
            self.target_delay_ms = v;
        }
        if let Some(v) = acceleration_rate {
            self.acceleration_rate = v;
        }

        let step = (self.init_delay_ms - self.target_delay_ms) * self.acceleration_rate;
        if step <= 0.0 {
            return Err(ConfigError::NonPositiveAccelerationStep {
                init_delay_ms: self.init_delay_ms,
                target_delay_ms: self.target_delay_ms,
                rate: self.acceleration_rate,
            });
        }
        self.acceleration_step_ms = step;
        Ok(())
    }

    /// Advance `current_delay_ms` one tick toward the junction-clamped
    /// target, given how many steps remain in the current move and a
    /// look-ahead junction factor in `[0, 1]`.
    pub fn update_speed(&mut self, remaining_steps: f64, junction_factor: f64) {
        let junction_factor = junction_factor.clamp(0.0, 1.0);
        let junction_delay_ms =
            self.target_delay_ms + (self.init_delay_ms - self.target_delay_ms) * (1.0 - junction_factor);

        let ramp_steps_needed = (junction_delay_ms - self.current_delay_ms) / self.acceleration_step_ms;

        if self.current_delay_ms < self.target_delay_ms || ramp_steps_needed >= remaining_steps {
            self.current_delay_ms =
                (self.current_delay_ms + self.acceleration_step_ms).min(junction_delay_ms);
        } else if self.current_delay_ms > self.target_delay_ms {
            self.current_delay_ms =
                (self.current_delay_ms - self.acceleration_step_ms).max(self.target_delay_ms);
        }
    }

    /// Suspend for the current delay, compensating for any overrun of the
    /// previous sleep.
    pub async fn control(&mut self) {
        let mut delay_override_ms = self.current_delay_ms;

        if let (Some(last_step_at), Some(previous_delay_ms)) =
            (self.last_step_at, self.previous_delay_ms)
        {
            let elapsed_ms = last_step_at.elapsed().as_secs_f64() * 1000.0;
            let overrun_ms = elapsed_ms - previous_delay_ms;
            if overrun_ms > 0.0 {
                delay_override_ms -= overrun_ms;
                if delay_override_ms < 0.0 {
                    tracing::warn!(delay_override_ms, "negative timing in speed controller");
                }
                delay_override_ms = delay_override_ms.max(0.0);
            }
        }

        self.last_step_at = Some(Instant::now());
        self.previous_delay_ms = Some(self.current_delay_ms);

        tokio::time::sleep(Duration::from_secs_f64(delay_override_ms / 1000.0)).await;
    }
}

/// RAII scope token returned by [`SpeedController::acquire`].
pub struct SpeedControllerGuard<'a> {
    controller: &'a mut SpeedController,
}

impl<'a> SpeedControllerGuard<'a> {
    pub fn controller(&mut self) -> &mut SpeedController {
        self.controller
    }
}

impl Drop for SpeedControllerGuard<'_> {
    fn drop(&mut self) {
        self.controller.running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_delay_ordering() {
        let err = SpeedController::new(10.0, 5.0, 0.5).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDelayOrdering { .. }));
    }

    #[test]
    fn rejects_out_of_range_acceleration_rate() {
        let err = SpeedController::new(2.0, 10.0, 1.5).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAccelerationRate(_)));
    }

    #[test]
    fn guard_clears_running_on_drop() {
        let mut controller = SpeedController::new(2.0, 10.0, 0.5).unwrap();
        {
            let _guard = controller.acquire();
            assert!(controller.is_running());
        }
        assert!(!controller.is_running());
    }

    #[test]
    fn update_speed_decelerates_near_end_of_move() {
        // acceleration_step_ms = (10.0 - 2.0) * 1.0 = 8.0. A junction_factor
        // of 0.0 demands a full stop at the corner (junction_delay_ms =
        // init_delay_ms = 10.0); with no steps left to ramp over, the single
        // step jumps current_delay_ms straight to 10.0.
        let mut controller = SpeedController::new(2.0, 10.0, 1.0).unwrap();
        controller.current_delay_ms = 2.0;
        controller.update_speed(0.0, 0.0);
        assert_eq!(controller.delay_ms(), 10.0);
    }

    #[test]
    fn update_speed_accelerates_with_many_remaining_steps() {
        let mut controller = SpeedController::new(2.0, 10.0, 0.5).unwrap();
        controller.update_speed(1000.0, 1.0);
        assert!(controller.delay_ms() < 10.0);
    }

    #[test]
    fn update_speed_clamps_junction_factor() {
        let mut controller = SpeedController::new(2.0, 10.0, 1.0).unwrap();
        controller.current_delay_ms = 2.0;
        controller.update_speed(0.0, 5.0);
        assert!(controller.delay_ms() <= 10.0);
    }

    #[test]
    fn update_rejects_nonpositive_acceleration_step() {
        let mut controller = SpeedController::new(2.0, 10.0, 0.5).unwrap();
        let err = controller
            .update(Some(5.0), Some(5.0), None)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::NonPositiveAccelerationStep { .. }
        ));
    }

    #[tokio::test]
    async fn control_sleeps_without_panicking_on_first_call() {
        let mut controller = SpeedController::new(1.0, 2.0, 1.0).unwrap();
        controller.control().await;
        assert!(controller.previous_delay_ms.is_some());
    }
}
