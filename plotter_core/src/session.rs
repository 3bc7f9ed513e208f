//! File-backed sketch sessions.
//!
//! Grounded in `examples/original_source/.../http_api.py`'s
//! `__file_reader`: streams a sketch file's lines onto the G-code queue,
//! backing off while the queue is full, prefixing each requested workspace
//! with its coordinate-system selector and appending `M104` (eject) once
//! the whole sketch has been queued.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};

use plotter_common::wcs::WcsId;

use crate::machine::{Kinematics, Machine};

/// A named source of sketch line streams. Exists as a trait seam so tests
/// (and, eventually, non-filesystem-backed deployments) don't need a real
/// directory on disk.
pub trait SketchSource {
    type Lines: Stream<Item = io::Result<String>> + Unpin;

    /// Open `name` and return a stream of its lines.
    fn read_lines(&self, name: &str) -> io::Result<Self::Lines>;

    /// List the names available in this source (used to validate a
    /// requested sketch name before queueing it).
    fn list(&self) -> io::Result<Vec<String>>;
}

/// Reads sketches from files under a fixed root directory.
pub struct FilesystemSketchSource {
    root: PathBuf,
}

impl FilesystemSketchSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// Stream adaptation of a `tokio::io::Lines` reader, built with
/// `futures_util::stream::unfold` rather than a hand-rolled `Stream` impl.
pub type FileLines = BoxStream<'static, io::Result<String>>;

fn lines_stream(lines: tokio::io::Lines<BufReader<tokio::fs::File>>) -> FileLines {
    stream::unfold(lines, |mut lines| async move {
        match lines.next_line().await {
            Ok(Some(line)) => Some((Ok(line), lines)),
            Ok(None) => None,
            Err(e) => Some((Err(e), lines)),
        }
    })
    .boxed()
}

impl SketchSource for FilesystemSketchSource {
    type Lines = FileLines;

    fn read_lines(&self, name: &str) -> io::Result<Self::Lines> {
        let path = self.path_for(name);
        let std_file = std::fs::File::open(&path)?;
        let file = tokio::fs::File::from_std(std_file);
        Ok(lines_stream(BufReader::new(file).lines()))
    }

    fn list(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

impl FilesystemSketchSource {
    fn path_for(&self, name: &str) -> PathBuf {
        // Only the final path component of a requested name is honored,
        // matching the original's `sketch_name.split("/")[-1]` guard
        // against path traversal via a crafted sketch name.
        let leaf = Path::new(name)
            .file_name()
            .map(|s| s.to_owned())
            .unwrap_or_else(|| name.into());
        self.root.join(leaf)
    }
}

/// Queue `name`'s lines onto `m.gcode_queue`, one workspace coordinate
/// system selector per entry in `workspaces` (or the machine's current
/// coordinate system if `workspaces` is empty), then append `M104`.
///
/// Backs off in 50ms increments whenever the queue is at capacity, exactly
/// as the original polls with `asleep(ms_period / 1000)`.
pub async fn file_reader<K: Kinematics, S: SketchSource>(
    m: &mut std::rc::Rc<std::cell::RefCell<Machine<K>>>,
    source: &S,
    sketch_name: &str,
    workspaces: &[WcsId],
) -> io::Result<()> {
    const POLL_MS: u64 = 50;

    let workspaces: Vec<WcsId> = if workspaces.is_empty() {
        vec![m.borrow().current_cs]
    } else {
        workspaces.to_vec()
    };

    for wcs in workspaces {
        wait_for_room(m, POLL_MS).await;
        m.borrow_mut().gcode_queue.push_back(wcs.to_string());

        let mut lines = source.read_lines(sketch_name)?;
        while let Some(line) = lines.next().await {
            let line = line?;
            wait_for_room(m, POLL_MS).await;
            m.borrow_mut().gcode_queue.push_back(line);
            tokio::time::sleep(Duration::from_millis(POLL_MS)).await;
        }
    }

    m.borrow_mut().gcode_queue.push_back("M104".to_string());
    Ok(())
}

async fn wait_for_room<K: Kinematics>(m: &std::rc::Rc<std::cell::RefCell<Machine<K>>>, poll_ms: u64) {
    loop {
        let (len, max) = {
            let m = m.borrow();
            (m.gcode_queue.len(), m.max_queue_length)
        };
        if len < max {
            return;
        }
        tokio::time::sleep(Duration::from_millis(poll_ms)).await;
    }
}
