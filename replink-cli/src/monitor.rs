//! Interactive serial monitor.
//!
//! Two threads share the connection manager: a reader draining
//! `read_data` into the terminal, and the main thread forwarding raw-mode
//! keystrokes to the board. Control keys pass through to the REPL
//! (Ctrl-C interrupts the running program, Ctrl-D soft-resets), so the
//! monitor's own exit key is Ctrl-].

use std::io::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal;
use replink::{LinkManager, StreamDecoder, printable};

/// How long each read against the board waits before the loop re-checks
/// the stop flag.
const READ_SLICE: Duration = Duration::from_millis(50);

/// Run the monitor until the user presses Ctrl-].
pub(crate) fn run_monitor(quiet: bool, manager: &Arc<LinkManager>) -> Result<()> {
    if !quiet {
        let name = manager
            .connected_device()
            .map(|d| d.name)
            .unwrap_or_else(|| "board".to_string());
        eprintln!(
            "{} Monitoring {} ({} exits, Ctrl-C interrupts the board)",
            style("📡").cyan(),
            style(&name).green(),
            style("Ctrl-]").bold()
        );
    }

    let running = Arc::new(AtomicBool::new(true));

    // Reader thread: board → terminal.
    let reader_running = Arc::clone(&running);
    let reader_manager = Arc::clone(manager);
    let reader = thread::spawn(move || {
        let mut decoder = StreamDecoder::new();
        while reader_running.load(Ordering::Relaxed) {
            match reader_manager.read_data(READ_SLICE) {
                Ok(Some(data)) => {
                    let text = printable(&decoder.push(&data));
                    if !text.is_empty() {
                        print!("{text}");
                        std::io::stdout().flush().ok();
                    }
                },
                Ok(None) => {},
                Err(_) => break,
            }
        }
    });

    terminal::enable_raw_mode().context("failed to enable raw terminal mode")?;
    let _raw_guard = RawModeGuard;

    // Main thread: keyboard → board.
    while running.load(Ordering::Relaxed) {
        if !event::poll(READ_SLICE)? {
            continue;
        }
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event::read()?
        else {
            continue;
        };

        match (code, modifiers) {
            // Ctrl+]: leave the monitor.
            (KeyCode::Char(']'), KeyModifiers::CONTROL) => {
                running.store(false, Ordering::Relaxed);
            },
            // Control keys the REPL understands are forwarded, not handled.
            (KeyCode::Char(c @ ('a'..='z')), KeyModifiers::CONTROL) => {
                let byte = (c as u8) - b'a' + 1;
                let _ = manager.send_bytes(&[byte]);
            },
            (KeyCode::Enter, _) => {
                let _ = manager.send_bytes(b"\r\n");
            },
            (KeyCode::Char(c), KeyModifiers::NONE | KeyModifiers::SHIFT) => {
                let mut buf = [0u8; 4];
                let bytes = c.encode_utf8(&mut buf);
                let _ = manager.send_bytes(bytes.as_bytes());
            },
            (KeyCode::Backspace, _) => {
                let _ = manager.send_bytes(&[0x08]);
            },
            (KeyCode::Tab, _) => {
                let _ = manager.send_bytes(&[0x09]);
            },
            (KeyCode::Esc, _) => {
                let _ = manager.send_bytes(&[0x1B]);
            },
            _ => {},
        }
    }

    running.store(false, Ordering::Relaxed);
    let _ = reader.join();

    if !quiet {
        eprintln!("\r\n{} Monitor closed", style("👋").cyan());
    }
    Ok(())
}

/// RAII guard restoring the terminal mode on drop (including panics).
struct RawModeGuard;

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_key_byte_mapping() {
        // The mapping used for forwarded control keys: Ctrl-A..Ctrl-Z → 1..26.
        let byte = |c: char| (c as u8) - b'a' + 1;
        assert_eq!(byte('a'), 0x01); // raw-REPL entry
        assert_eq!(byte('c'), 0x03); // interrupt
        assert_eq!(byte('d'), 0x04); // execute / soft reset
        assert_eq!(byte('z'), 0x1A);
    }
}
