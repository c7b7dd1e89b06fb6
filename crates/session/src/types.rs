//! Session identity and cursor types.
//!
//! Separating these from behavior keeps the bridge crates free of any
//! terminal-backend dependency.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Stable, globally unique identity of one terminal session.
///
/// Survives display-surface replacement (e.g. when the backing widget is
/// swapped during a split), so it is the only key safe to carry across
/// thread boundaries or hold inside broker callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of the live display surface currently backing a session.
///
/// Surfaces are replaced (never reused) when a session is re-pointed at a new
/// widget, so comparing surface ids detects replacement reliably.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceId(u64);

static NEXT_SURFACE: AtomicU64 = AtomicU64::new(1);

impl SurfaceId {
    /// Allocate a fresh, never-before-seen surface id.
    pub fn next() -> Self {
        Self(NEXT_SURFACE.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface-{}", self.0)
    }
}

/// Position in a session's output stream.
///
/// `row` counts completed output lines; `col` counts characters written on
/// the current (unterminated) line. Output between two cursor positions is
/// the text produced in that interval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CursorPosition {
    pub row: usize,
    pub col: usize,
}

impl CursorPosition {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Whole rows advanced since `earlier` (zero if the cursor moved
    /// backwards, e.g. after a screen reset).
    pub fn rows_since(&self, earlier: CursorPosition) -> usize {
        self.row.saturating_sub(earlier.row)
    }
}
