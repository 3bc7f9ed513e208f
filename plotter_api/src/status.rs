//! JSON status payload.
//!
//! One `#[derive(Serialize)]` struct for the shape `_plotter_status_clb`
//! hand-builds in `examples/original_source/.../http_api.py`, giving a
//! single source of truth instead of a loose `ujson.dumps({...})` call.

use serde::Serialize;

use plotter_common::wcs::WcsId;
use plotter_core::machine::{Kinematics, Machine, Positioning};

#[derive(Debug, Clone, Serialize)]
pub struct PlotterStatus {
    pub queue_size: usize,
    pub active: bool,
    pub paused: bool,
    pub limit_primary: bool,
    pub limit_secondary: bool,
    pub positioning: &'static str,
    pub x: f64,
    pub y: f64,
    pub coordinate_system: String,
    pub additional_info: Vec<String>,
}

impl PlotterStatus {
    pub fn from_machine<K: Kinematics>(m: &Machine<K>) -> Self {
        let (x, y) = m.current_pos();
        Self {
            queue_size: m.gcode_queue.len(),
            active: m.driver.is_active(),
            paused: m.machine_paused,
            limit_primary: m.driver.primary.limit_asserted().unwrap_or(false),
            limit_secondary: m.driver.secondary.limit_asserted().unwrap_or(false),
            positioning: match m.positioning {
                Positioning::Absolute => "absolute",
                Positioning::Relative => "relative",
            },
            x,
            y,
            coordinate_system: current_cs_name(m),
            additional_info: m.additional_info.clone(),
        }
    }
}

fn current_cs_name<K: Kinematics>(m: &Machine<K>) -> String {
    m.current_cs.to_string()
}

/// Return the ten work/machine coordinate system identifiers in the fixed
/// order `_plotter_set_tiling_clb`/`_plotter_switch_tile_clb` rely on
/// (`sorted(list(m.cs_coordinates.keys()))` in the original).
pub fn sorted_wcs_names() -> Vec<String> {
    WcsId::ALL.iter().map(|id| id.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_wcs_names_are_in_ascending_order() {
        let names = sorted_wcs_names();
        assert_eq!(names[0], "G53");
        assert_eq!(names[9], "G59.3");
    }
}
