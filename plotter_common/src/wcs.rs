//! Work-coordinate-system identifiers and offset table.
//!
//! The original firmware keeps `cs_coordinates` as a string-keyed map over
//! exactly ten fixed identifiers. Since the key set is closed and known at
//! compile time, it is expressed here as an enum plus a fixed-size array —
//! the same preference for fixed-size, index-addressed state the rest of
//! this workspace's ancestry uses for per-axis arrays.

use std::fmt;

/// One of the ten work/machine coordinate system identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WcsId {
    G53,
    G54,
    G55,
    G56,
    G57,
    G58,
    G59,
    G59_1,
    G59_2,
    G59_3,
}

impl WcsId {
    /// All ten identifiers, in the ascending order used for tiling layouts.
    pub const ALL: [WcsId; 10] = [
        WcsId::G53,
        WcsId::G54,
        WcsId::G55,
        WcsId::G56,
        WcsId::G57,
        WcsId::G58,
        WcsId::G59,
        WcsId::G59_1,
        WcsId::G59_2,
        WcsId::G59_3,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Parse the suffix captured after `G5` in the G-code grammar (e.g.
    /// `"3"`, `"9.1"`) into a [`WcsId`].
    pub fn from_suffix(suffix: &str) -> Option<WcsId> {
        match suffix {
            "3" => Some(WcsId::G53),
            "4" => Some(WcsId::G54),
            "5" => Some(WcsId::G55),
            "6" => Some(WcsId::G56),
            "7" => Some(WcsId::G57),
            "8" => Some(WcsId::G58),
            "9" => Some(WcsId::G59),
            "9.1" => Some(WcsId::G59_1),
            "9.2" => Some(WcsId::G59_2),
            "9.3" => Some(WcsId::G59_3),
            _ => None,
        }
    }
}

impl fmt::Display for WcsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WcsId::G53 => "G53",
            WcsId::G54 => "G54",
            WcsId::G55 => "G55",
            WcsId::G56 => "G56",
            WcsId::G57 => "G57",
            WcsId::G58 => "G58",
            WcsId::G59 => "G59",
            WcsId::G59_1 => "G59.1",
            WcsId::G59_2 => "G59.2",
            WcsId::G59_3 => "G59.3",
        };
        f.write_str(s)
    }
}

/// Offset table for all ten work coordinate systems. `G53` (the machine
/// coordinate system) is always pinned to `(0, 0)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CsTable {
    offsets: [(f64, f64); 10],
}

impl Default for CsTable {
    fn default() -> Self {
        Self {
            offsets: [(0.0, 0.0); 10],
        }
    }
}

impl CsTable {
    /// Current offset of the given coordinate system.
    pub fn get(&self, id: WcsId) -> (f64, f64) {
        self.offsets[id.index()]
    }

    /// Set the offset of a work coordinate system. Setting `G53`'s offset
    /// is a no-op — the machine CS is always `(0, 0)` per invariant.
    pub fn set(&mut self, id: WcsId, offset: (f64, f64)) {
        if id == WcsId::G53 {
            return;
        }
        self.offsets[id.index()] = offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn g53_is_always_origin() {
        let mut table = CsTable::default();
        table.set(WcsId::G53, (5.0, 5.0));
        assert_eq!(table.get(WcsId::G53), (0.0, 0.0));
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut table = CsTable::default();
        table.set(WcsId::G55, (12.0, -3.5));
        assert_eq!(table.get(WcsId::G55), (12.0, -3.5));
    }

    #[test]
    fn from_suffix_covers_all_ids() {
        for id in WcsId::ALL {
            let suffix = id.to_string();
            let suffix = suffix.strip_prefix("G5").unwrap();
            assert_eq!(WcsId::from_suffix(suffix), Some(id));
        }
    }
}
