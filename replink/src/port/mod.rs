//! Port abstraction for serial communication.
//!
//! The protocol layers never talk to the `serialport` crate directly; they
//! operate on the [`Port`] trait so the upload engine and connection manager
//! stay I/O-agnostic and testable against a scripted transport.
//!
//! ```text
//! +--------------------+
//! |  raw-REPL protocol |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |     Port trait     |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |  NativePort        |
//! |  (serialport)      |
//! +--------------------+
//! ```

pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Line speed the raw-REPL console runs at. Not configurable: MicroPython
/// consoles are provisioned at this rate.
pub const REPL_BAUD: u32 = 115_200;

/// Bound on every individual read/write against the transport.
pub const IO_TIMEOUT: Duration = Duration::from_millis(1000);

/// Serial line configuration.
///
/// [`SerialConfig::for_repl`] yields the fixed parameters the upload path
/// uses (115200 baud, 8 data bits, 1 stop bit, no parity); the struct stays
/// open for other line setups such as diagnostics at a different timeout.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
    /// Data bits.
    pub data_bits: DataBits,
    /// Parity.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
    /// Flow control.
    pub flow_control: FlowControl,
}

impl SerialConfig {
    /// Line configuration for talking to a MicroPython REPL.
    pub fn for_repl(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: REPL_BAUD,
            timeout: IO_TIMEOUT,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }

    /// Override the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

/// Unified port trait for serial communication.
///
/// Blocking semantics: reads and writes are bounded by the configured
/// timeout and report `std::io::ErrorKind::TimedOut` when it elapses.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete, then flush.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

pub use native::NativePort;
