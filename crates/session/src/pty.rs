//! PTY-backed session host.
//!
//! Runs real local shells and exposes them through `SessionHost`. Each
//! session owns a reader thread that forwards raw PTY bytes over an mpsc
//! channel; the UI context drains those bytes with `pump()`, which folds them
//! into a line grid. Escape sequences are filtered out so cursors and output
//! deltas are defined over plain text lines, matching what a rendered
//! terminal would report.

use crate::host::SessionHost;
use crate::types::{CursorPosition, SessionId, SurfaceId};
use anyhow::{Context, Result};
use collections::{FxHashMap, FxHashSet, IndexMap};
use portable_pty::{native_pty_system, Child, CommandBuilder, PtyPair, PtySize};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

/// One spawned shell process plus its I/O plumbing.
///
/// Implements `Drop` to kill and reap the child so a closed session never
/// leaves a zombie behind.
struct PtyProcess {
    pair: PtyPair,
    writer: Box<dyn Write + Send>,
    output_rx: Receiver<Vec<u8>>,
    exited: Arc<AtomicBool>,
    child: Box<dyn Child + Send + Sync>,
    _reader_thread: thread::JoinHandle<()>,
}

impl PtyProcess {
    /// Spawn the user's default shell. Falls back to `/bin/sh` when `$SHELL`
    /// is unset, so headless bridges work in minimal containers too.
    fn spawn(rows: u16, cols: u16) -> Result<Self> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")?;

        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());

        let mut cmd = CommandBuilder::new(&shell);
        cmd.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .context("Failed to spawn shell")?;

        let writer = pair
            .master
            .take_writer()
            .context("Failed to get PTY writer")?;

        let mut reader = pair
            .master
            .try_clone_reader()
            .context("Failed to get PTY reader")?;

        let (output_tx, output_rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = mpsc::channel();

        let exited = Arc::new(AtomicBool::new(false));
        let exited_clone = exited.clone();

        let reader_thread = thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    // EOF and read errors both mean the shell is gone; the
                    // UI side notices through the exited flag, not the
                    // channel, so it can drain buffered output first.
                    Ok(0) => {
                        exited_clone.store(true, Ordering::SeqCst);
                        break;
                    }
                    Ok(n) => {
                        if output_tx.send(buf[..n].to_vec()).is_err() {
                            // Session closed on the UI side.
                            break;
                        }
                    }
                    Err(_) => {
                        exited_clone.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            pair,
            writer,
            output_rx,
            exited,
            child,
            _reader_thread: reader_thread,
        })
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Drain any pending output (non-blocking).
    fn drain(&self) -> Vec<Vec<u8>> {
        let mut output = Vec::new();
        while let Ok(data) = self.output_rx.try_recv() {
            output.push(data);
        }
        output
    }

    fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        self.pair
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to resize PTY")?;
        Ok(())
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        self.exited.store(true, Ordering::SeqCst);

        // Kill fails with ESRCH when the shell already exited on its own.
        if let Err(e) = self.child.kill() {
            tracing::debug!("Kill shell: {}", e);
        }

        // Reap it either way so no zombie outlives the session.
        if let Err(e) = self.child.wait() {
            tracing::debug!("Reap shell: {}", e);
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum ParseState {
    Ground,
    Esc,
    Csi,
    Osc,
    OscEsc,
}

/// Line-oriented view of a session's output.
///
/// Completed lines plus the current unterminated line. The cursor is
/// `(completed lines, chars on the partial line)`; escape sequences never
/// reach the grid, so cursor deltas measure visible text only.
struct LineGrid {
    lines: Vec<String>,
    partial: String,
    state: ParseState,
    carry: Vec<u8>,
}

impl LineGrid {
    fn new() -> Self {
        Self {
            lines: Vec::new(),
            partial: String::new(),
            state: ParseState::Ground,
            carry: Vec::new(),
        }
    }

    /// Fold raw PTY bytes into the grid. Returns true if any visible text
    /// (or a line break) was appended.
    fn feed(&mut self, bytes: &[u8]) -> bool {
        self.carry.extend_from_slice(bytes);

        let text = match std::str::from_utf8(&self.carry) {
            Ok(s) => {
                let s = s.to_string();
                self.carry.clear();
                s
            }
            Err(e) if e.error_len().is_none() && self.carry.len() - e.valid_up_to() <= 4 => {
                // Incomplete trailing codepoint; keep the tail for next feed.
                let valid = e.valid_up_to();
                let s = std::str::from_utf8(&self.carry[..valid])
                    .unwrap_or_default()
                    .to_string();
                self.carry.drain(..valid);
                s
            }
            Err(_) => {
                let s = String::from_utf8_lossy(&self.carry).into_owned();
                self.carry.clear();
                s
            }
        };

        let mut changed = false;
        for ch in text.chars() {
            match self.state {
                ParseState::Ground => match ch {
                    '\x1b' => self.state = ParseState::Esc,
                    '\n' => {
                        let line = std::mem::take(&mut self.partial);
                        self.lines.push(line);
                        changed = true;
                    }
                    '\r' => self.partial.clear(),
                    '\x08' => {
                        self.partial.pop();
                    }
                    c if c.is_control() && c != '\t' => {}
                    c => {
                        self.partial.push(c);
                        changed = true;
                    }
                },
                ParseState::Esc => {
                    self.state = match ch {
                        '[' => ParseState::Csi,
                        ']' => ParseState::Osc,
                        // Intermediate byte; the final byte follows.
                        '\x20'..='\x2f' => ParseState::Esc,
                        _ => ParseState::Ground,
                    };
                }
                ParseState::Csi => {
                    if ('\x40'..='\x7e').contains(&ch) {
                        self.state = ParseState::Ground;
                    }
                }
                ParseState::Osc => match ch {
                    '\x07' => self.state = ParseState::Ground,
                    '\x1b' => self.state = ParseState::OscEsc,
                    _ => {}
                },
                ParseState::OscEsc => {
                    self.state = if ch == '\\' {
                        ParseState::Ground
                    } else {
                        ParseState::Osc
                    };
                }
            }
        }
        changed
    }

    fn cursor(&self) -> CursorPosition {
        CursorPosition::new(self.lines.len(), self.partial.chars().count())
    }

    /// Text between `from` and the current cursor, with the current cursor.
    /// Completed lines keep their terminating `\n`.
    fn read_since(&self, from: CursorPosition) -> Option<(String, CursorPosition)> {
        let current = self.cursor();
        if from.row > current.row || (from.row == current.row && from.col > current.col) {
            return None;
        }

        let mut out = String::new();
        if from.row == current.row {
            out.extend(self.partial.chars().skip(from.col));
        } else {
            for (i, line) in self.lines[from.row..current.row].iter().enumerate() {
                if i == 0 {
                    out.extend(line.chars().skip(from.col));
                } else {
                    out.push_str(line);
                }
                out.push('\n');
            }
            out.push_str(&self.partial);
        }
        Some((out, current))
    }
}

struct PtySession {
    surface: SurfaceId,
    pty: PtyProcess,
    grid: LineGrid,
}

/// `SessionHost` backed by local PTY shells.
///
/// All methods must be called from the UI context; only the per-session
/// reader threads run elsewhere, and they touch nothing but their channel.
pub struct PtySessionHost {
    sessions: IndexMap<SessionId, PtySession>,
    watches: FxHashMap<SessionId, SurfaceId>,
}

impl PtySessionHost {
    pub fn new() -> Self {
        Self {
            sessions: IndexMap::default(),
            watches: FxHashMap::default(),
        }
    }

    /// Spawn a new shell session.
    pub fn spawn_shell(&mut self, rows: u16, cols: u16) -> Result<SessionId> {
        let session = SessionId::new();
        let surface = SurfaceId::next();
        let pty = PtyProcess::spawn(rows, cols)?;
        self.sessions.insert(
            session,
            PtySession {
                surface,
                pty,
                grid: LineGrid::new(),
            },
        );
        tracing::info!("Spawned shell session {} on {}", session, surface);
        Ok(session)
    }

    /// Close a session, killing its shell. Idempotent.
    pub fn close_session(&mut self, session: SessionId) {
        if self.sessions.shift_remove(&session).is_some() {
            tracing::info!("Closed session {}", session);
        }
        self.watches.remove(&session);
    }

    /// Swap the surface backing `session` for a fresh one, as a split or
    /// widget replacement would. The shell and its output history survive.
    pub fn replace_surface(&mut self, session: SessionId) -> Option<SurfaceId> {
        let entry = self.sessions.get_mut(&session)?;
        entry.surface = SurfaceId::next();
        tracing::debug!("Session {} re-pointed at {}", session, entry.surface);
        Some(entry.surface)
    }

    pub fn resize(&mut self, session: SessionId, rows: u16, cols: u16) -> Result<()> {
        match self.sessions.get(&session) {
            Some(entry) => entry.pty.resize(rows, cols),
            None => Ok(()),
        }
    }

    /// Whether the session's shell has exited (true for unknown sessions).
    pub fn has_exited(&self, session: SessionId) -> bool {
        self.sessions
            .get(&session)
            .map_or(true, |s| s.pty.has_exited())
    }

    /// Drain pending PTY output into the line grids. Returns the watched
    /// sessions that produced new output, in session creation order.
    pub fn pump(&mut self) -> Vec<SessionId> {
        let mut changed = Vec::new();
        for (id, entry) in self.sessions.iter_mut() {
            let mut any = false;
            for chunk in entry.pty.drain() {
                any |= entry.grid.feed(&chunk);
            }
            if any && self.watches.contains_key(id) {
                changed.push(*id);
            }
        }
        changed
    }
}

impl Default for PtySessionHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHost for PtySessionHost {
    fn open_sessions(&self) -> FxHashSet<SessionId> {
        self.sessions.keys().copied().collect()
    }

    fn active_surface(&self, session: SessionId) -> Option<SurfaceId> {
        self.sessions.get(&session).map(|s| s.surface)
    }

    fn cursor(&self, surface: SurfaceId) -> Option<CursorPosition> {
        self.sessions
            .values()
            .find(|s| s.surface == surface)
            .map(|s| s.grid.cursor())
    }

    fn read_output_since(
        &self,
        surface: SurfaceId,
        from: CursorPosition,
    ) -> Option<(String, CursorPosition)> {
        self.sessions
            .values()
            .find(|s| s.surface == surface)
            .and_then(|s| s.grid.read_since(from))
    }

    fn inject_input(&mut self, session: SessionId, text: &str) -> Result<()> {
        let entry = self
            .sessions
            .get_mut(&session)
            .with_context(|| format!("No open session {}", session))?;
        entry.pty.write(text.as_bytes())
    }

    fn bind_output_watch(&mut self, session: SessionId, surface: SurfaceId) {
        self.watches.insert(session, surface);
    }

    fn unbind_output_watch(&mut self, session: SessionId) {
        self.watches.remove(&session);
    }
}
