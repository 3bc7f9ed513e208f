//! Unipolar four-coil stepper sequencing with directional backlash
//! compensation.
//!
//! Ported from `examples/original_source/.../stepper.py`'s `step_primary`/
//! `step_secondary` pair, generalized to a single `StepperAxis` driven
//! twice (once per physical axis) rather than duplicated per-axis
//! functions.

use std::time::Duration;

use plotter_common::hal::{AxisPins, HalError};

/// Coil-energization pattern of a four-wire unipolar stepper. Exactly the
/// four legal one-hot values — illegal phase values are unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    P1 = 1,
    P2 = 2,
    P4 = 4,
    P8 = 8,
}

impl Phase {
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Double the phase, wrapping `16 -> 1`.
    pub fn doubled(self) -> Phase {
        match self {
            Phase::P1 => Phase::P2,
            Phase::P2 => Phase::P4,
            Phase::P4 => Phase::P8,
            Phase::P8 => Phase::P1,
        }
    }

    /// Halve the phase, wrapping `1 -> 8`.
    pub fn halved(self) -> Phase {
        match self {
            Phase::P1 => Phase::P8,
            Phase::P2 => Phase::P1,
            Phase::P4 => Phase::P2,
            Phase::P8 => Phase::P4,
        }
    }
}

/// Direction of the most recent step on an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// One physical stepper axis: its pins, current phase, position counter
/// and backlash configuration.
pub struct StepperAxis {
    pins: AxisPins,
    phase: Phase,
    direction: Option<Direction>,
    pub current_pos: i64,
    backlash_steps: u32,
    backlash_delay_ms: f64,
}

impl StepperAxis {
    pub fn new(pins: AxisPins, backlash_steps: u32, backlash_delay_ms: f64) -> Self {
        Self {
            pins,
            phase: Phase::P1,
            direction: None,
            current_pos: 0,
            backlash_steps,
            backlash_delay_ms,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    pub fn limit_asserted(&self) -> Result<bool, HalError> {
        self.pins.limit_asserted()
    }

    /// This axis is "home": its limit switch is asserted and its last
    /// motion direction was backward.
    pub fn is_home(&self) -> Result<bool, HalError> {
        Ok(self.pins.limit_asserted()? && self.direction == Some(Direction::Backward))
    }

    /// Step this axis one phase transition in the requested direction,
    /// applying backlash compensation first if the direction reversed.
    pub async fn step(&mut self, backward: bool) -> Result<(), HalError> {
        let new_direction = if backward {
            Direction::Backward
        } else {
            Direction::Forward
        };

        let reversed = match self.direction {
            Some(Direction::Forward) => backward,
            Some(Direction::Backward) => !backward,
            None => false,
        };

        if self.backlash_steps > 0 && reversed {
            for _ in 0..self.backlash_steps {
                self.phase = if backward {
                    self.phase.halved()
                } else {
                    self.phase.doubled()
                };
                self.pins.write_phase_bits(self.phase.bits())?;
                tokio::time::sleep(Duration::from_secs_f64(self.backlash_delay_ms / 1000.0)).await;
            }
        }

        self.direction = Some(new_direction);

        self.phase = if backward {
            self.current_pos -= 1;
            self.phase.halved()
        } else {
            self.current_pos += 1;
            self.phase.doubled()
        };
        self.pins.write_phase_bits(self.phase.bits())
    }

    pub fn activate(&mut self) -> Result<(), HalError> {
        self.pins.write_phase_bits(self.phase.bits())
    }

    pub fn deactivate(&mut self) -> Result<(), HalError> {
        self.pins.deactivate()
    }
}

/// Owns both stepper axes plus the shared `activated` flag.
pub struct StepperDriver {
    pub primary: StepperAxis,
    pub secondary: StepperAxis,
    activated: bool,
}

impl StepperDriver {
    pub fn new(primary: StepperAxis, secondary: StepperAxis) -> Self {
        Self {
            primary,
            secondary,
            activated: false,
        }
    }

    /// Write the current phase to both axes' pins and mark the driver
    /// active.
    pub fn activate(&mut self) -> Result<(), HalError> {
        self.primary.activate()?;
        self.secondary.activate()?;
        self.activated = true;
        Ok(())
    }

    /// De-energize both axes' coils and mark the driver inactive.
    pub fn deactivate(&mut self) -> Result<(), HalError> {
        self.primary.deactivate()?;
        self.secondary.deactivate()?;
        self.activated = false;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.activated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    use plotter_common::hal::{DigitalInputPin, DigitalOutputPin};

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

    fn fake_axis(backlash: u32, limit: Rc<Cell<bool>>) -> StepperAxis {
        let coils: [Box<dyn DigitalOutputPin>; 4] = [
            Box::new(FakeOut),
            Box::new(FakeOut),
            Box::new(FakeOut),
            Box::new(FakeOut),
        ];
        StepperAxis::new(AxisPins::new(coils, Box::new(FakeIn(limit))), backlash, 0.0)
    }

    #[test]
    fn phase_doubles_and_wraps() {
        assert_eq!(Phase::P1.doubled(), Phase::P2);
        assert_eq!(Phase::P8.doubled(), Phase::P1);
    }

    #[test]
    fn phase_halves_and_wraps() {
        assert_eq!(Phase::P2.halved(), Phase::P1);
        assert_eq!(Phase::P1.halved(), Phase::P8);
    }

    #[tokio::test]
    async fn stepping_forward_increments_position() {
        let mut axis = fake_axis(0, Rc::new(Cell::new(false)));
        axis.step(false).await.unwrap();
        assert_eq!(axis.current_pos, 1);
        assert_eq!(axis.direction(), Some(Direction::Forward));
    }

    #[tokio::test]
    async fn stepping_backward_decrements_position() {
        let mut axis = fake_axis(0, Rc::new(Cell::new(false)));
        axis.step(true).await.unwrap();
        assert_eq!(axis.current_pos, -1);
        assert_eq!(axis.direction(), Some(Direction::Backward));
    }

    #[tokio::test]
    async fn backlash_steps_do_not_change_position() {
        let mut axis = fake_axis(3, Rc::new(Cell::new(false)));
        axis.step(false).await.unwrap();
        assert_eq!(axis.current_pos, 1);
        // Direction reversal triggers 3 backlash phase transitions.
        axis.step(true).await.unwrap();
        assert_eq!(axis.current_pos, 0);
    }

    #[tokio::test]
    async fn is_home_requires_limit_and_backward_direction() {
        let limit = Rc::new(Cell::new(true));
        let mut axis = fake_axis(0, limit.clone());
        assert!(!axis.is_home().unwrap());
        axis.step(true).await.unwrap();
        assert!(axis.is_home().unwrap());
    }
}
