//! Error taxonomy shared across the plotter workspace.
//!
//! Mirrors the per-module `Error` enum convention used throughout the
//! control-unit crate this workspace is descended from: configuration
//! failures get their own nested enum (`ConfigError`), while the runtime
//! error kinds named by the specification are unified under
//! [`PlotterError`] so the dispatcher can match on a single type.

use thiserror::Error;

/// Errors raised while constructing or validating machine/speed-controller
/// configuration. Fatal at load time — never recovered from at runtime.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// `init_delay_ms` was not strictly greater than `target_delay_ms`.
    #[error("target delay ({target_delay_ms}ms) must be less than init delay ({init_delay_ms}ms)")]
    InvalidDelayOrdering {
        target_delay_ms: f64,
        init_delay_ms: f64,
    },

    /// `acceleration_rate` was not in `(0, 1]`.
    #[error("acceleration rate {0} is not in (0, 1]")]
    InvalidAccelerationRate(f64),

    /// Resulting `acceleration_step_ms` was <= 0 after an `update()`.
    #[error(
        "invalid acceleration delay: init={init_delay_ms}, target={target_delay_ms}, rate={rate}"
    )]
    NonPositiveAccelerationStep {
        init_delay_ms: f64,
        target_delay_ms: f64,
        rate: f64,
    },

    /// Axis pin list did not contain exactly four entries.
    #[error("exactly four GPIO pins are required per axis, got {0}")]
    WrongPinCount(usize),

    /// Unknown `machine_type` string in the JSON configuration.
    #[error("machine_type must be \"cartesian\" or \"scara\", got {0:?}")]
    UnknownMachineType(String),

    /// Boundary rectangle was malformed (`min > max`) or user boundaries
    /// exceeded global boundaries.
    #[error("{0}")]
    InvalidBoundaries(String),

    /// Failed to read or parse the configuration file.
    #[error("failed to load configuration: {0}")]
    Io(String),
}

/// Unified runtime error type, one variant per kind named in the
/// specification's error-handling design.
#[derive(Debug, Clone, Error)]
pub enum PlotterError {
    /// Invalid construction parameters. Fatal at load.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Invalid runtime input (unknown pause value, invalid tile index, pen
    /// target out of range, ...).
    #[error("invalid value: {0}")]
    Value(String),

    /// Motion target outside boundaries with `reject_oob` set.
    #[error("position out of boundary: ({x}, {y})")]
    OutOfBounds { x: f64, y: f64 },

    /// Singular SCARA inverse-kinematics configuration.
    #[error("kinematics error: {0}")]
    Kinematics(#[from] KinematicsError),

    /// A safe motion encountered an asserted limit switch, or homing could
    /// not clear one. Terminal for the dispatcher.
    #[error("limit switch fault: {0}")]
    LimitSwitch(String),

    /// An HTTP request arrived while a file session was in progress.
    #[error("busy")]
    ServerBusy,
}

/// Error raised by [`crate::kinematics::resolve_arm_angles`] when the
/// two-link geometry has no solution (`R = 0`).
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum KinematicsError {
    #[error("singular arm configuration: cannot resolve inverse kinematics")]
    SingularConfiguration,
}
