//! Homing, calibration and recovery routines.
//!
//! Each routine is a free async function over `&mut Machine<K>`, grounded
//! directly in `examples/original_source/.../routines.py`'s free-function
//! shape (the original never makes these methods of `MachineBase`).

use std::time::Instant;

use plotter_common::error::PlotterError;
use plotter_common::gcode::{Axis, Sign};

use crate::machine::{Kinematics, Machine};
use crate::speed_ctrl::SpeedController;

/// Home both axes against their limit switches, then back off until both
/// switches clear. Fails immediately if a switch is already asserted.
pub async fn home_cycle<K: Kinematics>(m: &mut Machine<K>) -> Result<(), PlotterError> {
    m.raise_tool().await?;

    if m.driver.primary.limit_asserted().unwrap_or(false)
        || m.driver.secondary.limit_asserted().unwrap_or(false)
    {
        return Err(PlotterError::LimitSwitch(
            "limit switch hit before homing cycle".to_string(),
        ));
    }

    {
        let mut controller =
            SpeedController::new(m.step_delay_ms_linear, m.step_delay_ms_init, m.acceleration_rate)?;
        let mut guard = controller.acquire();
        while !m.driver.primary.is_home().unwrap_or(false)
            || !m.driver.secondary.is_home().unwrap_or(false)
        {
            if !m.driver.primary.is_home().unwrap_or(false) {
                m.driver.primary.step(true).await.ok();
            }
            if !m.driver.secondary.is_home().unwrap_or(false) {
                m.driver.secondary.step(true).await.ok();
            }
            guard.controller().update_speed(f64::INFINITY, 1.0);
            guard.controller().control().await;
        }
    }

    {
        let mut controller =
            SpeedController::new(m.step_delay_ms_linear, m.step_delay_ms_init, m.acceleration_rate)?;
        let mut guard = controller.acquire();
        let mut offset_steps = 0i64;
        while m.driver.primary.limit_asserted().unwrap_or(false)
            || m.driver.secondary.limit_asserted().unwrap_or(false)
        {
            if offset_steps > m.steps_per_revolution {
                return Err(PlotterError::Value(
                    "limit switch error, cannot untrigger".to_string(),
                ));
            }
            if m.driver.primary.limit_asserted().unwrap_or(false) {
                m.driver.primary.step(false).await.ok();
            }
            if m.driver.secondary.limit_asserted().unwrap_or(false) {
                m.driver.secondary.step(false).await.ok();
            }
            offset_steps += 1;
            guard.controller().update_speed(f64::INFINITY, 1.0);
            guard.controller().control().await;
        }
    }

    m.driver.primary.current_pos = 0;
    m.driver.secondary.current_pos = 0;
    Ok(())
}

/// Home, drive both axes to their limits counting actual steps taken,
/// and compare against the expected `steps_per_revolution`.
pub async fn measure_step_loss<K: Kinematics>(m: &mut Machine<K>) -> Result<(), PlotterError> {
    let measure_offset = m.steps_per_revolution as f64;
    let expected_steps = m.steps_per_revolution;

    home_cycle(m).await?;
    m.move_to(
        measure_offset,
        measure_offset,
        Some(m.step_delay_ms_linear),
        Some(m.step_delay_ms_linear * 2.0),
        None,
        0.0,
        false,
    )
    .await?;

    let mut actual_steps_primary = 0i64;
    {
        let mut controller =
            SpeedController::new(m.step_delay_ms_rapid, m.step_delay_ms_init, m.acceleration_rate)?;
        let mut guard = controller.acquire();
        while !m.driver.primary.is_home().unwrap_or(false) {
            m.driver.primary.step(true).await.ok();
            guard.controller().update_speed(f64::INFINITY, 1.0);
            guard.controller().control().await;
            actual_steps_primary += 1;
        }
    }
    if actual_steps_primary != expected_steps {
        tracing::warn!(
            expected_steps,
            actual_steps_primary,
            "mismatch in expected vs measured steps during travel in primary axis"
        );
    }
    m.log_diagnostic(format!(
        "measured steps in primary axis: {actual_steps_primary} (expected: {expected_steps})"
    ));

    let mut actual_steps_secondary = 0i64;
    {
        let mut controller =
            SpeedController::new(m.step_delay_ms_rapid, m.step_delay_ms_init, m.acceleration_rate)?;
        let mut guard = controller.acquire();
        while !m.driver.secondary.is_home().unwrap_or(false) {
            m.driver.secondary.step(true).await.ok();
            guard.controller().update_speed(f64::INFINITY, 1.0);
            guard.controller().control().await;
            actual_steps_secondary += 1;
        }
    }
    if actual_steps_secondary != expected_steps {
        tracing::warn!(
            expected_steps,
            actual_steps_secondary,
            "mismatch in expected vs measured steps during travel in secondary axis"
        );
    }
    m.log_diagnostic(format!(
        "measured steps in secondary axis: {actual_steps_secondary} (expected: {expected_steps})"
    ));

    {
        let mut controller =
            SpeedController::new(m.step_delay_ms_linear, m.step_delay_ms_init, m.acceleration_rate)?;
        let mut guard = controller.acquire();
        while m.driver.primary.limit_asserted().unwrap_or(false)
            || m.driver.secondary.limit_asserted().unwrap_or(false)
        {
            if m.driver.primary.limit_asserted().unwrap_or(false) {
                m.driver.primary.step(false).await.ok();
            }
            if m.driver.secondary.limit_asserted().unwrap_or(false) {
                m.driver.secondary.step(false).await.ok();
            }
            guard.controller().update_speed(f64::INFINITY, 1.0);
            guard.controller().control().await;
        }
    }

    home_cycle(m).await
}

/// Home, drive both axes out to their limits counting steps, derive
/// `global_boundaries.{x,y}_max` from the measured travel, then back off
/// to the workspace center.
pub async fn measure_workspace<K: Kinematics>(m: &mut Machine<K>) -> Result<(), PlotterError> {
    home_cycle(m).await?;
    let target = m.steps_per_revolution as f64;
    m.move_to(
        target,
        target,
        Some(m.step_delay_ms_linear),
        Some(m.step_delay_ms_init),
        None,
        0.0,
        true,
    )
    .await?;

    let mut actual_steps_primary = m.steps_per_revolution;
    let mut actual_steps_secondary = m.steps_per_revolution;

    {
        let mut controller =
            SpeedController::new(m.step_delay_ms_linear, m.step_delay_ms_init, m.acceleration_rate)?;
        let mut guard = controller.acquire();
        while !m.driver.primary.limit_asserted().unwrap_or(false)
            || !m.driver.secondary.limit_asserted().unwrap_or(false)
        {
            if !m.driver.primary.limit_asserted().unwrap_or(false) {
                m.driver.primary.step(false).await.ok();
                actual_steps_primary += 1;
            }
            if !m.driver.secondary.limit_asserted().unwrap_or(false) {
                m.driver.secondary.step(false).await.ok();
                actual_steps_secondary += 1;
            }
            guard.controller().update_speed(f64::INFINITY, 1.0);
            guard.controller().control().await;
        }
    }

    {
        let mut controller =
            SpeedController::new(m.step_delay_ms_linear, m.step_delay_ms_init, m.acceleration_rate)?;
        let mut guard = controller.acquire();
        while m.driver.primary.limit_asserted().unwrap_or(false)
            || m.driver.secondary.limit_asserted().unwrap_or(false)
        {
            if m.driver.primary.limit_asserted().unwrap_or(false) {
                m.driver.primary.step(true).await.ok();
                actual_steps_primary -= 1;
            }
            if m.driver.secondary.limit_asserted().unwrap_or(false) {
                m.driver.secondary.step(true).await.ok();
                actual_steps_secondary -= 1;
            }
            guard.controller().update_speed(f64::INFINITY, 1.0);
            guard.controller().control().await;
        }
    }

    let steps_per_revolution = m.steps_per_revolution as f64;
    let primary_dimension = (actual_steps_primary as f64 / steps_per_revolution) * steps_per_revolution;
    let secondary_dimension =
        (actual_steps_secondary as f64 / steps_per_revolution) * steps_per_revolution;

    m.global_boundaries.x_max = Some(primary_dimension);
    m.global_boundaries.y_max = Some(secondary_dimension);

    m.log_diagnostic(format!(
        "measured workspace dimension in primary axis: {primary_dimension}mm"
    ));
    m.log_diagnostic(format!(
        "measured workspace dimension in secondary axis: {secondary_dimension}mm"
    ));

    m.move_to(
        primary_dimension / 2.0,
        secondary_dimension / 2.0,
        None,
        None,
        None,
        0.0,
        true,
    )
    .await
}

/// Time a move to the far corner of the workspace at both the rapid and
/// linear step delays, recording measured mm/s.
pub async fn measure_feedrate<K: Kinematics>(m: &mut Machine<K>) -> Result<(), PlotterError> {
    for delay_ms in [m.step_delay_ms_rapid, m.step_delay_ms_linear] {
        home_cycle(m).await?;

        let x_max = m.global_boundaries.x_max.unwrap_or(0.0);
        let y_max = m.global_boundaries.y_max.unwrap_or(0.0);

        let start = Instant::now();
        m.move_to(x_max, 0.0, Some(delay_ms), Some(delay_ms * 2.0), None, 0.0, true)
            .await?;
        let elapsed_s = start.elapsed().as_secs_f64();
        m.log_diagnostic(format!(
            "primary feedrate at {delay_ms}ms step delay: {}mm/s",
            x_max / elapsed_s.max(f64::EPSILON)
        ));

        let start = Instant::now();
        m.move_to(x_max, y_max, Some(delay_ms), Some(delay_ms * 2.0), None, 0.0, true)
            .await?;
        let elapsed_s = start.elapsed().as_secs_f64();
        m.log_diagnostic(format!(
            "secondary feedrate at {delay_ms}ms step delay: {}mm/s",
            x_max / elapsed_s.max(f64::EPSILON)
        ));
    }
    home_cycle(m).await
}

/// Nudge the named axis off its limit switch by 1.5 units. Re-homes on
/// success; restores the saved position and logs failure otherwise.
pub async fn unblock_limit<K: Kinematics>(
    m: &mut Machine<K>,
    axis: Axis,
    direction: Sign,
) -> Result<(), PlotterError> {
    if !m.driver.primary.limit_asserted().unwrap_or(false)
        && !m.driver.secondary.limit_asserted().unwrap_or(false)
    {
        return Ok(());
    }

    m.raise_tool().await?;

    let (current_x, current_y) = m.current_pos();
    let offset = if direction == Sign::Positive { 1.5 } else { -1.5 };

    match axis {
        Axis::X => {
            m.move_to(current_x + offset, current_y, None, None, None, 0.0, false)
                .await?
        }
        Axis::Y => {
            m.move_to(current_x, current_y + offset, None, None, None, 0.0, false)
                .await?
        }
    }

    if !m.driver.primary.limit_asserted().unwrap_or(false)
        && !m.driver.secondary.limit_asserted().unwrap_or(false)
    {
        home_cycle(m).await
    } else {
        m.move_to(current_x, current_y, None, None, None, 0.0, false)
            .await?;
        m.log_diagnostic("failed to unblock limit switches");
        Ok(())
    }
}

/// Raise the tool and move it clear of the workspace.
pub async fn eject_workspace<K: Kinematics>(m: &mut Machine<K>) -> Result<(), PlotterError> {
    m.raise_tool().await?;
    let x_max = m.global_boundaries.x_max.unwrap_or(0.0);
    let y_max = m.global_boundaries.y_max.unwrap_or(0.0);
    m.move_to(x_max / 2.0, y_max - 5.0, None, None, None, 0.0, true)
        .await
}
