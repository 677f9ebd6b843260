//! Source-position references attached to instructions

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Multiplier applied to whole-line distances when searching for the nearest ref
const PER_LINE_DISTANCE: u32 = 1600;

/// A source span attached to an instruction, with breakpoint metadata
///
/// Refs are created by the compiler and shared by every closure compiled
/// from the same chunk. Only the breakpoint flag changes after compilation,
/// and only through the debugger hook.
#[derive(Debug)]
pub struct SourceRef {
    /// Id of the owning [`SourceCode`] in the script registry
    pub source_id: usize,
    pub from_line: u32,
    pub to_line: u32,
    pub from_col: u32,
    pub to_col: u32,
    /// Set for synthetic refs (e.g. implicit returns) that cannot hold breakpoints
    pub cannot_breakpoint: bool,
    breakpoint: AtomicBool,
}

impl SourceRef {
    #[must_use]
    pub fn new(source_id: usize, from_line: u32, from_col: u32, to_line: u32, to_col: u32) -> Self {
        Self {
            source_id,
            from_line,
            to_line,
            from_col,
            to_col,
            cannot_breakpoint: false,
            breakpoint: AtomicBool::new(false),
        }
    }

    /// Marks the ref as not eligible for breakpoints
    #[must_use]
    pub fn no_breakpoint(mut self) -> Self {
        self.cannot_breakpoint = true;
        self
    }

    /// Returns true if a breakpoint is set on this ref
    #[must_use]
    pub fn breakpoint(&self) -> bool {
        self.breakpoint.load(Ordering::Relaxed)
    }

    pub(crate) fn set_breakpoint(&self, value: bool) {
        self.breakpoint.store(value, Ordering::Relaxed);
    }

    /// Returns true if the given position lies inside this ref
    #[must_use]
    pub fn includes_location(&self, source_id: usize, line: u32, col: u32) -> bool {
        if source_id != self.source_id || line < self.from_line || line > self.to_line {
            return false;
        }
        if self.from_line == self.to_line {
            return col >= self.from_col && col <= self.to_col;
        }
        if line == self.from_line {
            return col >= self.from_col;
        }
        if line == self.to_line {
            return col <= self.to_col;
        }
        true
    }

    /// Heuristic distance between this ref and a position; `u32::MAX` for another source
    #[must_use]
    pub fn location_distance(&self, source_id: usize, line: u32, col: u32) -> u32 {
        if source_id != self.source_id {
            return u32::MAX;
        }

        if self.from_line == self.to_line {
            if line == self.from_line {
                if col < self.from_col {
                    self.from_col - col
                } else {
                    col.saturating_sub(self.to_col)
                }
            } else {
                line.abs_diff(self.from_line).saturating_mul(PER_LINE_DISTANCE)
            }
        } else if line == self.from_line {
            self.from_col.saturating_sub(col)
        } else if line == self.to_line {
            col.saturating_sub(self.to_col)
        } else if line > self.from_line && line < self.to_line {
            0
        } else if line < self.from_line {
            (self.from_line - line).saturating_mul(PER_LINE_DISTANCE)
        } else {
            (line - self.to_line).saturating_mul(PER_LINE_DISTANCE)
        }
    }

    /// Returns true if both refs start on the same source line
    #[must_use]
    pub fn same_line(&self, other: &SourceRef) -> bool {
        self.source_id == other.source_id && self.from_line == other.from_line
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]{}:{}-{}:{}",
            self.source_id, self.from_line, self.from_col, self.to_line, self.to_col
        )?;
        if self.breakpoint() {
            write!(f, " (bp)")?;
        }
        Ok(())
    }
}

/// A loaded chunk of source text and the refs compiled from it
#[derive(Debug)]
pub struct SourceCode {
    pub id: usize,
    pub name: String,
    pub code: String,
    pub refs: Vec<Arc<SourceRef>>,
}

impl SourceCode {
    #[must_use]
    pub fn new(id: usize, name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            code: code.into(),
            refs: Vec::new(),
        }
    }

    /// Returns the text of a 1-based line, if present
    #[must_use]
    pub fn line(&self, line: u32) -> Option<&str> {
        self.code.lines().nth((line as usize).checked_sub(1)?)
    }

    /// Refs currently holding a breakpoint
    #[must_use]
    pub fn breakpoints(&self) -> Vec<Arc<SourceRef>> {
        self.refs.iter().filter(|r| r.breakpoint()).cloned().collect()
    }

    /// Toggles, sets or clears the breakpoint at a position
    ///
    /// Refs containing the position are updated; if none does, the nearest
    /// breakpointable ref is used instead. `state` of `None` toggles.
    /// Returns false if no breakpointable ref exists.
    pub(crate) fn apply_breakpoint(&self, line: u32, col: u32, state: Option<bool>) -> bool {
        let apply = |r: &SourceRef| r.set_breakpoint(state.unwrap_or(!r.breakpoint()));

        let mut found = false;
        for r in self.refs.iter().filter(|r| !r.cannot_breakpoint) {
            if r.includes_location(self.id, line, col) {
                apply(r);
                found = true;
            }
        }
        if found {
            return true;
        }

        let nearest = self
            .refs
            .iter()
            .filter(|r| !r.cannot_breakpoint)
            .min_by_key(|r| r.location_distance(self.id, line, col));
        match nearest {
            Some(r) => {
                apply(r);
                true
            }
            None => false,
        }
    }

    /// Replaces all breakpoints with one per listed line
    pub(crate) fn reset_breakpoints(&self, lines: &[u32]) {
        for r in self.refs.iter().filter(|r| !r.cannot_breakpoint) {
            r.set_breakpoint(lines.contains(&r.from_line));
        }
    }
}
