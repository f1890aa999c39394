use crate::ui::Console;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, is_raw_mode_enabled};
use std::io::{self, IsTerminal, Write};
use tracing::{debug, warn};

pub const INTERRUPT_EXIT_CODE: i32 = 130;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GateKey {
    Submit,
    Interrupt,
    Other,
}

pub fn classify_key_byte(byte: u8) -> GateKey {
    match byte {
        b'\r' | b'\n' => GateKey::Submit,
        3 => GateKey::Interrupt,
        _ => GateKey::Other,
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GateOutcome {
    Continued,
    Interrupted,
    InputClosed,
    Skipped,
}

pub trait KeySource {
    /// Next keypress, or `None` once no more input can arrive.
    fn next_key(&mut self) -> io::Result<Option<GateKey>>;
}

/// Blocks until Enter or Ctrl+C; every other key is ignored.
pub fn wait_for_enter(keys: &mut impl KeySource) -> GateOutcome {
    loop {
        match keys.next_key() {
            Ok(Some(GateKey::Submit)) => return GateOutcome::Continued,
            Ok(Some(GateKey::Interrupt)) => return GateOutcome::Interrupted,
            Ok(Some(GateKey::Other)) => continue,
            Ok(None) => return GateOutcome::InputClosed,
            Err(error) => {
                warn!(%error, "failed to read keypress");
                return GateOutcome::InputClosed;
            }
        }
    }
}

/// Raw input mode for the lifetime of the guard; the prior mode is restored on drop.
pub struct RawModeGuard {
    was_enabled: bool,
}

impl RawModeGuard {
    pub fn acquire() -> io::Result<Self> {
        let was_enabled = is_raw_mode_enabled()?;
        if !was_enabled {
            enable_raw_mode()?;
        }
        Ok(Self { was_enabled })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if !self.was_enabled {
            let _ = disable_raw_mode();
        }
    }
}

pub struct TerminalKeys;

impl KeySource for TerminalKeys {
    fn next_key(&mut self) -> io::Result<Option<GateKey>> {
        loop {
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if let Some(gate_key) = classify_key_event(&key) {
                return Ok(Some(gate_key));
            }
        }
    }
}

/// Maps a decoded terminal key to a gate key; releases and repeats are skipped.
///
/// In raw mode a bare line feed arrives as Ctrl+J.
fn classify_key_event(key: &KeyEvent) -> Option<GateKey> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    let control = key.modifiers.contains(KeyModifiers::CONTROL);
    let gate_key = match key.code {
        KeyCode::Enter => GateKey::Submit,
        KeyCode::Char('j') if control => GateKey::Submit,
        KeyCode::Char('c') if control => GateKey::Interrupt,
        KeyCode::Char(ch) if ch.is_ascii() => classify_key_byte(ch as u8),
        _ => GateKey::Other,
    };
    Some(gate_key)
}

pub trait CompletionGate {
    fn wait<W: Write>(&mut self, console: &mut Console<W>) -> GateOutcome;
}

/// Holds control until the user presses Enter on the real terminal.
pub struct TerminalGate;

impl CompletionGate for TerminalGate {
    fn wait<W: Write>(&mut self, console: &mut Console<W>) -> GateOutcome {
        if !io::stdin().is_terminal() {
            debug!("stdin is not a terminal; skipping completion gate");
            return GateOutcome::Skipped;
        }

        console.blank();
        console.dim("Press Enter to continue (Ctrl+C to quit)…");

        let guard = match RawModeGuard::acquire() {
            Ok(guard) => guard,
            Err(error) => {
                warn!(%error, "could not enter raw mode; not waiting for keypress");
                return GateOutcome::Skipped;
            }
        };
        let outcome = wait_for_enter(&mut TerminalKeys);
        drop(guard);

        debug!(outcome = ?outcome, "completion gate resolved");
        if outcome == GateOutcome::Interrupted {
            std::process::exit(INTERRUPT_EXIT_CODE);
        }
        outcome
    }
}
