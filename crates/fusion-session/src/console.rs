//! Operator-facing display and key input.

use crate::{Result, SessionError};
use crossterm::{
    cursor::MoveToColumn,
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    style::Print,
    terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType},
};
use depth_camera::ColorMap;
use std::collections::VecDeque;
use std::io::{stdout, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

pub trait Console {
    /// Present the current reconstructed view.
    fn show(&mut self, view: &ColorMap) -> Result<()>;

    /// Wait at most `timeout` for a key press.
    fn poll_key(&mut self, timeout: Duration) -> Result<Option<char>>;
}

/// Raw-mode terminal with a one-line status display. The view itself can be
/// mirrored to a PNG for an external image viewer.
pub struct TerminalConsole {
    preview_path: Option<PathBuf>,
    frames: u64,
}

impl TerminalConsole {
    pub fn new(preview_path: Option<PathBuf>) -> Result<Self> {
        enable_raw_mode().map_err(|e| SessionError::Console(format!("raw mode: {e}")))?;
        let console = Self {
            preview_path,
            frames: 0,
        };
        let mut out = stdout();
        let _ = execute!(
            out,
            Print("keys: [a] save all  [p] save poses  [m] save mesh  [space] quit\r\n")
        );
        Ok(console)
    }
}

impl Drop for TerminalConsole {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!("terminal could not leave raw mode: {e}");
        }
        let _ = execute!(stdout(), Print("\r\n"));
    }
}

impl Console for TerminalConsole {
    fn show(&mut self, view: &ColorMap) -> Result<()> {
        self.frames += 1;
        let (w, h) = view.dimensions();
        let mut out = stdout();
        execute!(
            out,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(format!("frame {:>6}  view {w}x{h}", self.frames))
        )
        .map_err(|e| SessionError::Console(e.to_string()))?;
        out.flush()
            .map_err(|e| SessionError::Console(e.to_string()))?;

        if let Some(path) = &self.preview_path {
            // Best effort: a viewer may hold the file open.
            if let Err(e) = view.to_rgb_image().save(path) {
                debug!(path = %path.display(), "preview not written: {e}");
            }
        }
        Ok(())
    }

    fn poll_key(&mut self, timeout: Duration) -> Result<Option<char>> {
        let ready = event::poll(timeout).map_err(|e| SessionError::Console(e.to_string()))?;
        if !ready {
            return Ok(None);
        }
        match event::read().map_err(|e| SessionError::Console(e.to_string()))? {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
                {
                    // Ctrl-C leaves without saving.
                    return Ok(Some(' '));
                }
                match key.code {
                    KeyCode::Char(c) => Ok(Some(c)),
                    _ => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }
}

/// Feeds a fixed sequence of keys, one per poll. After the script runs out
/// every poll reports the discard key so a session always ends.
#[derive(Debug, Default)]
pub struct ScriptedConsole {
    keys: VecDeque<Option<char>>,
    shown: Vec<(u32, u32)>,
}

impl ScriptedConsole {
    pub fn new(keys: impl IntoIterator<Item = Option<char>>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            shown: Vec::new(),
        }
    }

    /// `n` polls without a key, then `key`.
    pub fn after(n: usize, key: char) -> Self {
        Self::new(std::iter::repeat(None).take(n).chain(Some(Some(key))))
    }

    /// Dimensions of every view presented so far.
    pub fn shown(&self) -> &[(u32, u32)] {
        &self.shown
    }
}

impl Console for ScriptedConsole {
    fn show(&mut self, view: &ColorMap) -> Result<()> {
        self.shown.push(view.dimensions());
        Ok(())
    }

    fn poll_key(&mut self, _timeout: Duration) -> Result<Option<char>> {
        Ok(self.keys.pop_front().unwrap_or(Some(' ')))
    }
}
