//! Terminal session collaborator seam.
//!
//! The bridge never talks to a terminal widget directly; it goes through the
//! `SessionHost` trait, keyed by stable session identity. This crate contains
//! the seam types plus `PtySessionHost`, a headless host that runs real local
//! shells over a PTY and exposes line-oriented output cursors.

pub mod host;
mod pty;
pub mod types;

pub use host::SessionHost;
pub use pty::PtySessionHost;
pub use types::{CursorPosition, SessionId, SurfaceId};
