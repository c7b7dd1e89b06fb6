//! The `SessionHost` trait — everything the bridge needs from a terminal.
//!
//! All methods are UI-context only: the host owns session and surface state
//! and must never be touched from a broker worker thread. Broker callbacks
//! carry a `SessionId` and get re-resolved through this trait when their
//! event is drained on the UI context.

use crate::types::{CursorPosition, SessionId, SurfaceId};
use anyhow::Result;
use collections::FxHashSet;

/// Terminal collaborator seam.
///
/// Session identity is the durable key everywhere; surfaces are transient and
/// may be replaced behind a session's back (split, widget swap). Callers must
/// treat a changed `active_surface` as a signal to rebind, not an error.
pub trait SessionHost {
    /// Identities of all currently open sessions.
    fn open_sessions(&self) -> FxHashSet<SessionId>;

    /// The surface currently backing `session`, if it is open.
    fn active_surface(&self, session: SessionId) -> Option<SurfaceId>;

    /// Current output cursor of `surface`, if the surface is live.
    fn cursor(&self, surface: SurfaceId) -> Option<CursorPosition>;

    /// Text produced on `surface` between `from` and the current cursor,
    /// together with the current cursor. Returns `None` if the surface is
    /// gone or `from` lies beyond the current cursor.
    fn read_output_since(
        &self,
        surface: SurfaceId,
        from: CursorPosition,
    ) -> Option<(String, CursorPosition)>;

    /// Feed `text` to the session as if the user had typed it.
    fn inject_input(&mut self, session: SessionId, text: &str) -> Result<()>;

    /// Route output-changed notifications for `session` while it is backed
    /// by `surface`. Rebinding to a new surface replaces the old binding.
    fn bind_output_watch(&mut self, session: SessionId, surface: SurfaceId);

    /// Stop routing output-changed notifications for `session`. No-op if
    /// there is no binding.
    fn unbind_output_watch(&mut self, session: SessionId);
}
