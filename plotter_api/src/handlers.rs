//! HTTP callback functions and the session wrapper they operate on.
//!
//! Grounded in `examples/original_source/.../http_api.py`: each function
//! here is the Rust counterpart of one `_plotter_*_clb`/`_queue_gcode_req_clb`
//! callback, minus the `with_machine`/`_MachineContext` decorator dance —
//! Rust's ownership makes that global-singleton workaround unnecessary,
//! since a `Session` simply owns (or shares, via `Rc<RefCell<_>>`) its
//! `Machine` directly.

use std::cell::RefCell;
use std::rc::Rc;

use plotter_common::error::PlotterError;
use plotter_common::wcs::WcsId;
use plotter_core::machine::{Kinematics, Machine};
use plotter_core::session::{file_reader, SketchSource};

use crate::status::PlotterStatus;

/// Bundles a shared `Machine` with the one piece of state the original
/// tracked through its task manager: whether a file-playback session is
/// currently in flight.
pub struct Session<K: Kinematics> {
    pub machine: Rc<RefCell<Machine<K>>>,
    file_session: Option<tokio::task::JoinHandle<()>>,
}

impl<K: Kinematics + 'static> Session<K> {
    pub fn new(machine: Rc<RefCell<Machine<K>>>) -> Self {
        Self {
            machine,
            file_session: None,
        }
    }

    /// Mirrors the original's `is_session_in_progress` (`manage_task(...,
    /// "isbusy")`): true while a spawned file-reader task has not yet
    /// finished.
    pub fn is_session_in_progress(&self) -> bool {
        match &self.file_session {
            Some(handle) => !handle.is_finished(),
            None => false,
        }
    }

    /// Append newline-separated G-code commands to the queue.
    ///
    /// Mirrors `_queue_gcode_req_clb`.
    pub fn queue_gcode(&self, commands: &str) -> Result<(), PlotterError> {
        if self.is_session_in_progress() {
            return Err(PlotterError::ServerBusy);
        }
        let lines: Vec<&str> = commands.lines().collect();
        let mut m = self.machine.borrow_mut();
        if m.gcode_queue.len() + lines.len() > m.max_queue_length {
            return Err(PlotterError::Value(format!(
                "command queue length exceeded ({}), try again",
                m.max_queue_length
            )));
        }
        for line in lines {
            m.gcode_queue.push_back(line.to_string());
        }
        Ok(())
    }

    /// Mirrors `_plotter_status_clb`.
    pub fn status(&self) -> PlotterStatus {
        PlotterStatus::from_machine(&self.machine.borrow())
    }

    /// Mirrors `_plotter_pause_clb`.
    pub fn set_paused(&self, value: &str) -> Result<(), PlotterError> {
        match value.trim().to_lowercase().as_str() {
            "true" => {
                self.machine.borrow_mut().machine_paused = true;
                Ok(())
            }
            "false" => {
                self.machine.borrow_mut().machine_paused = false;
                Ok(())
            }
            _ => Err(PlotterError::Value(
                "invalid value: only true or false is accepted".to_string(),
            )),
        }
    }

    /// Mirrors `_plotter_stop_clb`: kill any in-flight file session, drain
    /// the queue, clear pause.
    pub fn stop(&mut self) {
        if let Some(handle) = self.file_session.take() {
            handle.abort();
        }
        let mut m = self.machine.borrow_mut();
        m.gcode_queue.clear();
        m.machine_paused = false;
    }

    /// Mirrors `_plotter_set_tiling_clb`: lay out an `n x n` tiling grid
    /// of work coordinate systems and queue the WCS-set commands for each
    /// tile plus the scaling factor and the first tile's selector.
    pub fn set_tiling(&self, grid_size: u8) -> Result<(), PlotterError> {
        if self.is_session_in_progress() {
            return Err(PlotterError::ServerBusy);
        }
        if !(1..=3).contains(&grid_size) {
            return Err(PlotterError::Value(
                "invalid value: grid_size must be in [1,3]".to_string(),
            ));
        }

        let mut m = self.machine.borrow_mut();
        m.tile_grid_size = grid_size;
        m.current_tile_idx = 1;

        let gb = &m.global_boundaries;
        let x_spacing = (gb.x_max.unwrap_or(0.0) - gb.x_min.unwrap_or(0.0)) / grid_size as f64;
        let y_spacing = (gb.y_max.unwrap_or(0.0) - gb.y_min.unwrap_or(0.0)) / grid_size as f64;
        let wcs_names = WcsId::ALL;

        for i in 0..grid_size {
            for j in 0..grid_size {
                let idx = i as usize * grid_size as usize + j as usize + 1;
                let id = wcs_names[idx];
                let x = x_spacing * j as f64;
                let y = y_spacing * (grid_size - 1 - i) as f64;
                m.gcode_queue.push_back(format!("{id} X{x} Y{y}"));
            }
        }

        m.gcode_queue
            .push_back(format!("G51 S{}", 1.0 / grid_size as f64));
        m.gcode_queue
            .push_back(wcs_names[m.current_tile_idx as usize].to_string());
        Ok(())
    }

    /// Mirrors `_plotter_switch_tile_clb`.
    pub fn switch_tile(&self, idx: Option<u8>) -> Result<(), PlotterError> {
        if self.is_session_in_progress() {
            return Err(PlotterError::ServerBusy);
        }

        let mut m = self.machine.borrow_mut();
        let tile_count = m.tile_grid_size as u32 * m.tile_grid_size as u32;

        let new_idx = match idx {
            None => ((m.current_tile_idx as u32 + 1) % (tile_count + 1)).max(1) as u8,
            Some(i) if (i as u32) <= tile_count => i,
            Some(_) => return Err(PlotterError::Value("invalid index".to_string())),
        };
        m.current_tile_idx = new_idx;

        let wcs_names = WcsId::ALL;
        m.gcode_queue
            .push_back(wcs_names[m.current_tile_idx as usize].to_string());
        Ok(())
    }

    /// Mirrors `_plotter_play_clb`: validate the requested sketch and
    /// workspace indices, then spawn the file-reader task.
    ///
    /// `workspace_indices` indexes into the sorted WCS name list exactly
    /// as the original does (`coordinate_systems[i]`).
    pub fn play<S>(
        &mut self,
        source: Rc<S>,
        sketch_name: &str,
        workspace_indices: &[u32],
    ) -> Result<(), PlotterError>
    where
        S: SketchSource + 'static,
    {
        if self.is_session_in_progress() {
            return Err(PlotterError::ServerBusy);
        }

        let sketch_name = sketch_name.rsplit('/').next().unwrap_or(sketch_name);
        let available = source
            .list()
            .map_err(|e| PlotterError::Value(e.to_string()))?;
        if !available.iter().any(|n| n == sketch_name) {
            return Err(PlotterError::Value(format!(
                "sketch does not exist: {sketch_name}"
            )));
        }

        let tile_count = self.machine.borrow().tile_grid_size as u32
            * self.machine.borrow().tile_grid_size as u32;
        if workspace_indices
            .iter()
            .any(|&i| i < 1 || i > tile_count)
        {
            return Err(PlotterError::Value("invalid workspace indices".to_string()));
        }
        let wcs_names = WcsId::ALL;
        let workspaces: Vec<WcsId> = workspace_indices
            .iter()
            .map(|&i| wcs_names[i as usize])
            .collect();

        self.spawn_file_reader(source, sketch_name.to_string(), workspaces);
        Ok(())
    }

    /// Mirrors `_plotter_test_clb`: unconditionally play a fixed routine
    /// file.
    pub fn test<S>(&mut self, source: Rc<S>) -> Result<(), PlotterError>
    where
        S: SketchSource + 'static,
    {
        if self.is_session_in_progress() {
            return Err(PlotterError::ServerBusy);
        }
        self.spawn_file_reader(source, "test_routine.gcode".to_string(), Vec::new());
        Ok(())
    }

    fn spawn_file_reader<S>(&mut self, source: Rc<S>, sketch_name: String, workspaces: Vec<WcsId>)
    where
        S: SketchSource + 'static,
    {
        let mut machine = self.machine.clone();
        let handle = tokio::task::spawn_local(async move {
            if let Err(e) = file_reader(&mut machine, source.as_ref(), &sketch_name, &workspaces).await
            {
                tracing::error!(error = %e, sketch = %sketch_name, "sketch playback error");
                machine.borrow_mut().log_diagnostic(e.to_string());
            }
        });
        self.file_session = Some(handle);
    }
}
