//! MicroPython raw-REPL upload sequence.
//!
//! The raw REPL is a byte-oriented execution mode: the interpreter accepts a
//! whole program as one block and runs it when it sees the execute byte. The
//! upload is fire-and-forget: nothing is read back, and success means every
//! write completed, not that the board confirmed execution. Callers wanting
//! to observe the program's output read the port afterwards.
//!
//! Sequence on the wire:
//!
//! ```text
//! 0x03 0x03   interrupt any running program (Ctrl-C twice)
//!   ~100 ms   let the interrupt land
//! 0x01        switch the interpreter into raw mode (Ctrl-A)
//!   ~100 ms   let the mode switch land
//! <source>    UTF-8 program text, unterminated
//! 0x04        end of input, execute (Ctrl-D)
//! ```
//!
//! A timeout or fault at any step aborts the remainder; no rollback is
//! attempted, so the board may be left sitting in raw mode when the execute
//! byte never went out.

use std::io::Write;
use std::thread;
use std::time::Duration;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::port::Port;

/// Ctrl-C, interrupts whatever the interpreter is running.
pub const INTERRUPT: u8 = 0x03;

/// Ctrl-A, enters raw mode.
pub const ENTER_RAW: u8 = 0x01;

/// Ctrl-D, marks end of input and triggers execution.
pub const EXECUTE: u8 = 0x04;

/// Pause after the interrupt bytes before switching modes.
pub const INTERRUPT_SETTLE: Duration = Duration::from_millis(100);

/// Pause after entering raw mode before sending the program.
pub const RAW_MODE_SETTLE: Duration = Duration::from_millis(100);

/// Write one protocol step, folding transport timeouts into
/// [`Error::Timeout`] with the step named in the message.
fn send_step(port: &mut dyn Port, bytes: &[u8], step: &str) -> Result<()> {
    trace!("raw-repl step '{step}': {} bytes", bytes.len());
    port.write_all(bytes)
        .and_then(|()| port.flush())
        .map_err(|e| Error::from_transport(step, e))
}

/// Interrupt any running program (Ctrl-C twice).
pub fn interrupt(port: &mut dyn Port) -> Result<()> {
    send_step(port, &[INTERRUPT, INTERRUPT], "interrupt running program")
}

/// Switch the interpreter into raw mode.
pub fn enter_raw_mode(port: &mut dyn Port) -> Result<()> {
    send_step(port, &[ENTER_RAW], "enter raw REPL")
}

/// Signal end of input and trigger execution of the buffered program.
pub fn execute(port: &mut dyn Port) -> Result<()> {
    send_step(port, &[EXECUTE], "trigger execution")
}

/// Push a program to the board and ask the interpreter to run it.
///
/// Blocks for at least the two settle pauses; run this off any
/// latency-sensitive thread.
pub fn upload_source(port: &mut dyn Port, source: &str) -> Result<()> {
    debug!(
        "uploading {} bytes of source to {}",
        source.len(),
        port.name()
    );

    interrupt(port)?;
    thread::sleep(INTERRUPT_SETTLE);

    enter_raw_mode(port)?;
    thread::sleep(RAW_MODE_SETTLE);

    send_step(port, source.as_bytes(), "send source text")?;
    execute(port)?;

    debug!("upload sequence complete");
    Ok(())
}
