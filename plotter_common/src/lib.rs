//! Shared kinematics, G-code grammar, configuration, HAL traits and error
//! taxonomy for the plotter motion-control workspace. Pure/leaf crate: no
//! module here touches a queue, a clock, or a scheduler.

pub mod config;
pub mod error;
pub mod gcode;
pub mod hal;
pub mod kinematics;
pub mod wcs;

pub mod prelude {
    pub use crate::config::{AxisWiring, Boundaries, KinematicParams, MachineConfig, MachineType};
    pub use crate::error::{ConfigError, KinematicsError, PlotterError};
    pub use crate::gcode::{Axis, GcodeCommand, MotionMode, ParsedLine, PositioningMode, Sign};
    pub use crate::hal::{AxisPins, DigitalInputPin, DigitalOutputPin, HalError, PwmPin};
    pub use crate::wcs::{CsTable, WcsId};
}
