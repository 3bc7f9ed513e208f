//! Simulation pin backend.
//!
//! Implements [`plotter_common::hal`]'s trait set entirely in memory, so
//! the loader binary and integration tests can drive a full `Machine`
//! without real GPIO. Limit switches are modeled as shared cells so a test
//! can assert one from outside the axis that owns it.

use std::cell::Cell;
use std::rc::Rc;

use plotter_common::hal::{AxisPins, DigitalInputPin, DigitalOutputPin, HalError, PwmPin};

/// An in-memory digital output pin; records its last-written level.
#[derive(Clone)]
pub struct SimOutputPin {
    level: Rc<Cell<bool>>,
}

impl SimOutputPin {
    pub fn new() -> Self {
        Self {
            level: Rc::new(Cell::new(false)),
        }
    }

    pub fn level(&self) -> bool {
        self.level.get()
    }
}

impl Default for SimOutputPin {
    fn default() -> Self {
        Self::new()
    }
}

impl DigitalOutputPin for SimOutputPin {
    fn write(&mut self, high: bool) -> Result<(), HalError> {
        self.level.set(high);
        Ok(())
    }
}

/// An in-memory digital input pin; its level is externally controllable
/// through a shared handle, modeling a limit switch a test can trigger.
#[derive(Clone)]
pub struct SimInputPin {
    level: Rc<Cell<bool>>,
}

impl SimInputPin {
    pub fn new() -> (Self, SimInputHandle) {
        let level = Rc::new(Cell::new(false));
        (
            Self {
                level: level.clone(),
            },
            SimInputHandle { level },
        )
    }
}

impl DigitalInputPin for SimInputPin {
    fn read(&self) -> Result<bool, HalError> {
        Ok(self.level.get())
    }
}

/// External handle to assert/clear a [`SimInputPin`].
#[derive(Clone)]
pub struct SimInputHandle {
    level: Rc<Cell<bool>>,
}

impl SimInputHandle {
    pub fn set(&self, asserted: bool) {
        self.level.set(asserted);
    }
}

/// An in-memory PWM pin, used for the pen servo; records the last duty
/// cycle written.
pub struct SimPwmPin {
    duty_percent: f64,
}

impl SimPwmPin {
    pub fn new(initial_duty_percent: f64) -> Self {
        Self {
            duty_percent: initial_duty_percent,
        }
    }
}

impl PwmPin for SimPwmPin {
    fn set_duty_percent(&mut self, duty: f64) -> Result<(), HalError> {
        self.duty_percent = duty;
        Ok(())
    }

    fn duty_percent(&self) -> f64 {
        self.duty_percent
    }
}

/// Build a simulated [`AxisPins`] bundle plus a handle to its limit
/// switch.
pub fn sim_axis_pins() -> (AxisPins, SimInputHandle) {
    let coils: [Box<dyn DigitalOutputPin>; 4] = [
        Box::new(SimOutputPin::new()),
        Box::new(SimOutputPin::new()),
        Box::new(SimOutputPin::new()),
        Box::new(SimOutputPin::new()),
    ];
    let (limit, handle) = SimInputPin::new();
    (AxisPins::new(coils, Box::new(limit)), handle)
}
