//! Regex-based G-code/M-code classifier.
//!
//! Ported pattern-for-pattern from the original firmware's grammar (one
//! compiled regex per command kind, `examples/original_source/.../gcode.py`),
//! with the result expressed as a tagged enum rather than a bag of optional
//! match objects — but because a `G90`/`G91` positioning prefix can be
//! followed by an embedded motion command on the same line, the two slots
//! stay independent in [`ParsedLine`].

use regex::Regex;
use std::sync::OnceLock;

/// `G0` (rapid) or `G1` (linear) motion mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionMode {
    Rapid,
    Linear,
}

/// `G90` (absolute) or `G91` (relative) positioning mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositioningMode {
    Absolute,
    Relative,
}

/// Axis named by `M103`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

/// Direction named by `M103`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Positive,
    Negative,
}

/// A single recognized G-code/M-code command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GcodeCommand {
    Motion {
        mode: MotionMode,
        x: f64,
        y: f64,
    },
    Homing,
    ToolChange,
    MeasureWorkspace,
    MeasureStepLoss,
    MeasureFeedrate,
    UnblockLimit {
        axis: Axis,
        direction: Sign,
    },
    EjectWorkspace,
    WcsSet {
        id: crate::wcs::WcsId,
        x: f64,
        y: f64,
    },
    CsSelect {
        id: crate::wcs::WcsId,
    },
    ScalingOff,
    ScalingOn {
        factor: f64,
    },
}

/// Result of classifying one line of input. `positioning` and `command`
/// are independent: a line may carry both a `G90`/`G91` prefix and an
/// embedded motion command.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ParsedLine {
    pub positioning: Option<PositioningMode>,
    pub command: Option<GcodeCommand>,
}

impl ParsedLine {
    /// True when neither slot matched — the line is invalid G-code/M-code.
    pub fn is_invalid(&self) -> bool {
        self.positioning.is_none() && self.command.is_none()
    }
}

/// `\s*G[01]\s*[Xx](-?\d+(\.\d+)?)\s*[Yy](-?\d+(\.\d+)?)\s*$`, unanchored
/// at the start so it matches an embedded motion command trailing a
/// positioning prefix, exactly as the original's `search()`-based grammar
/// does.
fn motion_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\s*G(0|1)\s*X(-?\d+(?:\.\d+)?)\s*Y(-?\d+(?:\.\d+)?)\s*$").unwrap()
    })
}

fn positioning_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*G(90|91)\s*").unwrap())
}

fn homing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*G28\s*$").unwrap())
}

fn tool_change_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*M0?6\s*$").unwrap())
}

fn measure_workspace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*M100\s*$").unwrap())
}

fn measure_step_loss_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*M101\s*$").unwrap())
}

fn measure_feedrate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*M102\s*$").unwrap())
}

fn unblock_limit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*M103\s*([XY])\s*([+-])\s*$").unwrap())
}

fn eject_workspace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*M104\s*$").unwrap())
}

fn wcs_set_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*G5(4|5|6|7|8|9|9\.1|9\.2|9\.3)\s*X(-?\d+(?:\.\d+)?)\s*Y(-?\d+(?:\.\d+)?)\s*$")
            .unwrap()
    })
}

fn cs_select_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*G5(3|4|5|6|7|8|9|9\.1|9\.2|9\.3)\s*$").unwrap())
}

fn scaling_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*G5(0|1\s*S(\d+(?:\.\d+)?))\s*$").unwrap())
}

fn parse_motion(caps_line: &str) -> Option<GcodeCommand> {
    let caps = motion_re().captures(caps_line)?;
    let mode = if &caps[1] == "0" {
        MotionMode::Rapid
    } else {
        MotionMode::Linear
    };
    let x: f64 = caps[2].parse().ok()?;
    let y: f64 = caps[3].parse().ok()?;
    Some(GcodeCommand::Motion { mode, x, y })
}

/// Classify one line of G-code/M-code input.
pub fn parse_command(line: &str) -> ParsedLine {
    let positioning = positioning_re().captures(line).map(|caps| {
        if &caps[1] == "90" {
            PositioningMode::Absolute
        } else {
            PositioningMode::Relative
        }
    });

    let command = parse_motion(line)
        .or_else(|| homing_re().is_match(line).then_some(GcodeCommand::Homing))
        .or_else(|| {
            tool_change_re()
                .is_match(line)
                .then_some(GcodeCommand::ToolChange)
        })
        .or_else(|| {
            measure_workspace_re()
                .is_match(line)
                .then_some(GcodeCommand::MeasureWorkspace)
        })
        .or_else(|| {
            measure_step_loss_re()
                .is_match(line)
                .then_some(GcodeCommand::MeasureStepLoss)
        })
        .or_else(|| {
            measure_feedrate_re()
                .is_match(line)
                .then_some(GcodeCommand::MeasureFeedrate)
        })
        .or_else(|| {
            wcs_set_re().captures(line).and_then(|caps| {
                let id = crate::wcs::WcsId::from_suffix(&caps[1])?;
                let x: f64 = caps[2].parse().ok()?;
                let y: f64 = caps[3].parse().ok()?;
                Some(GcodeCommand::WcsSet { id, x, y })
            })
        })
        .or_else(|| {
            cs_select_re().captures(line).and_then(|caps| {
                crate::wcs::WcsId::from_suffix(&caps[1]).map(|id| GcodeCommand::CsSelect { id })
            })
        })
        .or_else(|| {
            scaling_re().captures(line).map(|caps| {
                if &caps[1] == "0" {
                    GcodeCommand::ScalingOff
                } else {
                    GcodeCommand::ScalingOn {
                        factor: caps[2].parse().unwrap_or(1.0),
                    }
                }
            })
        })
        .or_else(|| {
            unblock_limit_re().captures(line).map(|caps| {
                let axis = if caps[1].eq_ignore_ascii_case("x") {
                    Axis::X
                } else {
                    Axis::Y
                };
                let direction = if &caps[2] == "+" {
                    Sign::Positive
                } else {
                    Sign::Negative
                };
                GcodeCommand::UnblockLimit { axis, direction }
            })
        })
        .or_else(|| {
            eject_workspace_re()
                .is_match(line)
                .then_some(GcodeCommand::EjectWorkspace)
        });

    ParsedLine {
        positioning,
        command,
    }
}
