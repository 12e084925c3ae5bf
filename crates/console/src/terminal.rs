//! Local terminal mode management
//!
//! Raw mode is process-wide state. All toggling goes through
//! [`TerminalModeManager`], whose enter/exit calls are idempotent.

use crossterm::cursor::Show;
use crossterm::execute;
use crossterm::terminal::{self, Clear, ClearType, SetTitle};
use std::io::{self, IsTerminal, Write};
use tracing::{debug, warn};

const FALLBACK_SIZE: (u16, u16) = (80, 24);

/// Operations the console bridge needs from the local terminal
pub trait TerminalControl: Send {
    /// Switch to raw mode. No-op if already raw or not interactive.
    fn enter_raw(&mut self) -> io::Result<()>;

    /// Restore cooked mode. No-op if not raw.
    fn exit_raw(&mut self) -> io::Result<()>;

    fn set_title(&mut self, text: &str) -> io::Result<()>;

    fn reset_title(&mut self) -> io::Result<()>;

    fn clear_screen(&mut self) -> io::Result<()>;

    fn show_cursor(&mut self) -> io::Result<()>;

    /// Current `(cols, rows)`
    fn size(&self) -> (u16, u16);
}

/// Controls the process's own terminal
#[derive(Debug)]
pub struct TerminalModeManager {
    raw: bool,
    input_is_tty: bool,
    output_is_tty: bool,
}

impl TerminalModeManager {
    pub fn new() -> Self {
        Self {
            raw: false,
            input_is_tty: io::stdin().is_terminal(),
            output_is_tty: io::stdout().is_terminal(),
        }
    }

    /// Whether raw mode is currently enabled by this manager
    pub fn is_raw(&self) -> bool {
        self.raw
    }
}

impl Default for TerminalModeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalControl for TerminalModeManager {
    fn enter_raw(&mut self) -> io::Result<()> {
        if self.raw || !self.input_is_tty {
            return Ok(());
        }
        terminal::enable_raw_mode()?;
        self.raw = true;
        debug!("Entered raw mode");
        Ok(())
    }

    fn exit_raw(&mut self) -> io::Result<()> {
        if !self.raw {
            return Ok(());
        }
        terminal::disable_raw_mode()?;
        self.raw = false;
        debug!("Restored cooked mode");
        Ok(())
    }

    fn set_title(&mut self, text: &str) -> io::Result<()> {
        if !self.output_is_tty {
            return Ok(());
        }
        execute!(io::stdout(), SetTitle(text))
    }

    fn reset_title(&mut self) -> io::Result<()> {
        if !self.output_is_tty {
            return Ok(());
        }
        execute!(io::stdout(), SetTitle(""))
    }

    fn clear_screen(&mut self) -> io::Result<()> {
        if !self.output_is_tty {
            return Ok(());
        }
        let mut stdout = io::stdout();
        execute!(stdout, Clear(ClearType::All), crossterm::cursor::MoveTo(0, 0))?;
        stdout.flush()
    }

    fn show_cursor(&mut self) -> io::Result<()> {
        if !self.output_is_tty {
            return Ok(());
        }
        execute!(io::stdout(), Show)
    }

    fn size(&self) -> (u16, u16) {
        match terminal::size() {
            Ok((cols, rows)) if cols > 0 && rows > 0 => (cols, rows),
            _ => FALLBACK_SIZE,
        }
    }
}

impl Drop for TerminalModeManager {
    fn drop(&mut self) {
        if let Err(e) = self.exit_raw() {
            warn!("Failed to restore terminal mode: {}", e);
        }
    }
}
