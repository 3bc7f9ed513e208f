//! Machine configuration: on-disk JSON schema, parsing and validation.
//!
//! Adapted from `evo_common::config::ConfigLoader`'s "parse, then validate"
//! contract — deserialize with `serde_json` instead of `toml` (the wire
//! format this specification names), keeping the same blanket-impl shape.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Rectangular boundary in machine units. Any field may be absent; an
/// absent field means "not constraining" for that bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Boundaries {
    pub x_min: Option<f64>,
    pub y_min: Option<f64>,
    pub x_max: Option<f64>,
    pub y_max: Option<f64>,
}

impl Boundaries {
    /// True when all four fields are set.
    pub fn is_complete(&self) -> bool {
        self.x_min.is_some() && self.y_min.is_some() && self.x_max.is_some() && self.y_max.is_some()
    }
}

/// GPIO wiring for one stepper axis: four coil pins plus a limit-switch
/// input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisWiring {
    pub gpio: Vec<u32>,
    pub limit_gpio: u32,
}

/// `machine_type` discriminant from the JSON configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineType {
    Cartesian,
    Scara,
}

/// Kinematic parameters, keyed by `machine_type`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KinematicParams {
    Cartesian { unit_per_revolution: f64 },
    Scara { radius_primary: f64, radius_secondary: f64 },
}

/// Full on-disk machine configuration, deserialized directly from the
/// configuration JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    pub machine_type: MachineType,

    pub servo_gpio: u32,
    pub primary_axis: AxisWiring,
    pub secondary_axis: AxisWiring,

    pub steps_per_revolution: i64,
    #[serde(flatten)]
    pub kinematic_params: KinematicParams,

    pub step_delay_ms_rapid: f64,
    pub step_delay_ms_linear: f64,
    pub step_delay_ms_init: f64,
    pub acceleration_rate: f64,
    pub backlash_steps_primary: u32,
    pub backlash_steps_secondary: u32,

    pub min_pen_duty: f64,
    pub max_pen_duty: f64,
    pub pen_delay_ms_init: f64,
    pub pen_delay_ms_target: f64,
    pub pen_acceleration_rate: f64,

    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
    #[serde(default)]
    pub user_boundaries: Boundaries,
    #[serde(default)]
    pub reject_oob: bool,

    #[serde(default = "default_max_queue_length")]
    pub max_queue_length: usize,
    #[serde(default = "default_active_timeout_ms")]
    pub active_timeout_ms: u64,
    #[serde(default)]
    pub user_data_root: Option<String>,
}

fn default_max_queue_length() -> usize {
    100
}

fn default_active_timeout_ms() -> u64 {
    30_000
}

impl MachineConfig {
    /// Validate cross-field invariants the JSON schema alone cannot express.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::WrongPinCount`] if either axis does not list
    ///   exactly four GPIO pins.
    /// - [`ConfigError::InvalidBoundaries`] if `x_min > x_max`, `y_min >
    ///   y_max`, or the user boundaries (when fully set) fall outside the
    ///   global boundaries.
    /// - [`ConfigError::InvalidAccelerationRate`] if `acceleration_rate`
    ///   is not in `(0, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.primary_axis.gpio.len() != 4 {
            return Err(ConfigError::WrongPinCount(self.primary_axis.gpio.len()));
        }
        if self.secondary_axis.gpio.len() != 4 {
            return Err(ConfigError::WrongPinCount(self.secondary_axis.gpio.len()));
        }

        if self.x_min > self.x_max {
            return Err(ConfigError::InvalidBoundaries(format!(
                "x_min ({}) must be <= x_max ({})",
                self.x_min, self.x_max
            )));
        }
        if self.y_min > self.y_max {
            return Err(ConfigError::InvalidBoundaries(format!(
                "y_min ({}) must be <= y_max ({})",
                self.y_min, self.y_max
            )));
        }

        if self.user_boundaries.is_complete() {
            let u = &self.user_boundaries;
            let (ux_min, uy_min, ux_max, uy_max) = (
                u.x_min.unwrap(),
                u.y_min.unwrap(),
                u.x_max.unwrap(),
                u.y_max.unwrap(),
            );
            if ux_min < self.x_min
                || uy_min < self.y_min
                || ux_max > self.x_max
                || uy_max > self.y_max
            {
                return Err(ConfigError::InvalidBoundaries(
                    "user boundaries must lie within global boundaries".into(),
                ));
            }
        }

        if !(0.0 < self.acceleration_rate && self.acceleration_rate <= 1.0) {
            return Err(ConfigError::InvalidAccelerationRate(self.acceleration_rate));
        }
        if !(0.0 < self.pen_acceleration_rate && self.pen_acceleration_rate <= 1.0) {
            return Err(ConfigError::InvalidAccelerationRate(
                self.pen_acceleration_rate,
            ));
        }

        if self.step_delay_ms_init <= self.step_delay_ms_rapid {
            return Err(ConfigError::InvalidDelayOrdering {
                target_delay_ms: self.step_delay_ms_rapid,
                init_delay_ms: self.step_delay_ms_init,
            });
        }
        if self.step_delay_ms_init <= self.step_delay_ms_linear {
            return Err(ConfigError::InvalidDelayOrdering {
                target_delay_ms: self.step_delay_ms_linear,
                init_delay_ms: self.step_delay_ms_init,
            });
        }

        match (&self.machine_type, &self.kinematic_params) {
            (MachineType::Cartesian, KinematicParams::Cartesian { .. }) => {}
            (MachineType::Scara, KinematicParams::Scara { .. }) => {}
            _ => {
                return Err(ConfigError::UnknownMachineType(format!(
                    "{:?} does not match supplied kinematic parameters",
                    self.machine_type
                )))
            }
        }

        Ok(())
    }
}

/// Parse-then-validate loader contract, mirrored from the teacher's
/// `ConfigLoader` trait but reading JSON.
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load and validate configuration from a JSON file on disk.
    fn load(path: &Path) -> Result<Self, ConfigError>;
}

impl ConfigLoader for MachineConfig {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: MachineConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::Io(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_json() -> &'static str {
        r#"{
            "machine_type": "cartesian",
            "servo_gpio": 18,
            "primary_axis": { "gpio": [1, 2, 3, 4], "limit_gpio": 5 },
            "secondary_axis": { "gpio": [6, 7, 8, 9], "limit_gpio": 10 },
            "steps_per_revolution": 2038,
            "unit_per_revolution": 64.0,
            "step_delay_ms_rapid": 2.0,
            "step_delay_ms_linear": 4.0,
            "step_delay_ms_init": 10.0,
            "acceleration_rate": 0.5,
            "backlash_steps_primary": 15,
            "backlash_steps_secondary": 0,
            "min_pen_duty": 2.0,
            "max_pen_duty": 12.0,
            "pen_delay_ms_init": 10.0,
            "pen_delay_ms_target": 2.0,
            "pen_acceleration_rate": 0.3,
            "x_min": 0.0,
            "y_min": 0.0,
            "x_max": 128.0,
            "y_max": 131.5,
            "reject_oob": false
        }"#
    }

    #[test]
    fn parses_and_validates_sample_config() {
        let config: MachineConfig = serde_json::from_str(sample_json()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_queue_length, 100);
        assert_eq!(config.active_timeout_ms, 30_000);
    }

    #[test]
    fn rejects_wrong_pin_count() {
        let mut value: serde_json::Value = serde_json::from_str(sample_json()).unwrap();
        value["primary_axis"]["gpio"] = serde_json::json!([1, 2, 3]);
        let config: MachineConfig = serde_json::from_value(value).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WrongPinCount(3))
        ));
    }

    #[test]
    fn rejects_inverted_boundaries() {
        let mut value: serde_json::Value = serde_json::from_str(sample_json()).unwrap();
        value["x_min"] = serde_json::json!(200.0);
        let config: MachineConfig = serde_json::from_value(value).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBoundaries(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_acceleration() {
        let mut value: serde_json::Value = serde_json::from_str(sample_json()).unwrap();
        value["acceleration_rate"] = serde_json::json!(1.5);
        let config: MachineConfig = serde_json::from_value(value).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAccelerationRate(_))
        ));
    }

    #[test]
    fn load_reads_and_validates_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_json().as_bytes()).unwrap();
        let config = MachineConfig::load(file.path()).unwrap();
        assert_eq!(config.machine_type, MachineType::Cartesian);
    }
}
