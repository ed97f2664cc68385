//! Connection lifecycle management.
//!
//! [`LinkManager`] owns the single live connection. The port handle lives
//! behind one mutex together with the state flag and the device descriptor,
//! so the synchronous caller path (upload, send, read, disconnect) and the
//! asynchronous platform path (grant, detach) serialize on the same lock and
//! never observe a half-torn connection. Exactly one protocol exchange can
//! be in flight at a time because the exchange runs while the lock is held.
//!
//! Events are emitted after the lock is released; delivering an event never
//! re-enters the manager.

use std::io::{Read, Write};
use std::sync::Mutex;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use log::{debug, info, warn};

use crate::device::{DeviceInfo, TransportKind};
use crate::error::{Error, Result};
use crate::events::{EventBus, LinkEvent};
use crate::port::{IO_TIMEOUT, Port, native};
use crate::protocol::raw_repl;

/// Read buffer size for [`LinkManager::read_data`].
const READ_CHUNK: usize = 1024;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection exists.
    Disconnected,
    /// An open attempt is in progress.
    Connecting,
    /// A connection is established and usable.
    Connected,
}

struct LinkInner {
    state: LinkState,
    port: Option<Box<dyn Port>>,
    device: Option<DeviceInfo>,
}

/// Owner of the at-most-one live board connection.
pub struct LinkManager {
    inner: Mutex<LinkInner>,
    events: EventBus,
}

impl LinkManager {
    /// Create a manager with no connection.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LinkInner {
                state: LinkState::Disconnected,
                port: None,
                device: None,
            }),
            events: EventBus::new(),
        }
    }

    /// Register an observer for lifecycle and data events.
    pub fn subscribe(&self) -> Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        self.lock().state
    }

    /// Whether a connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Descriptor of the connected device, if any.
    pub fn connected_device(&self) -> Option<DeviceInfo> {
        self.lock().device.clone()
    }

    /// Open a connection to the given device with the fixed REPL line
    /// configuration.
    ///
    /// Any existing connection is torn down first (with its `Disconnected`
    /// notification), keeping the at-most-one invariant explicit. On failure
    /// the state returns to `Disconnected` and one `ConnectionError` is
    /// emitted.
    pub fn open(&self, device: &DeviceInfo) -> Result<()> {
        if device.transport != TransportKind::Serial {
            let err = Error::NoDriver(device.name.clone());
            self.events.emit(&LinkEvent::ConnectionError(err.to_string()));
            return Err(err);
        }

        let mut notifications = Vec::new();
        let result = {
            let mut inner = self.lock();

            if let Some(mut old) = inner.port.take() {
                if let Err(e) = old.close() {
                    warn!("closing previous connection failed: {e}");
                }
                inner.device = None;
                inner.state = LinkState::Disconnected;
                notifications.push(LinkEvent::Disconnected);
            }

            inner.state = LinkState::Connecting;
            debug!("opening {}", device.name);

            match native::open_repl_port(&device.name) {
                Ok(port) => {
                    inner.port = Some(Box::new(port));
                    inner.device = Some(device.clone());
                    inner.state = LinkState::Connected;
                    notifications.push(LinkEvent::Connected(device.clone()));
                    Ok(())
                },
                Err(e) => {
                    inner.state = LinkState::Disconnected;
                    notifications.push(LinkEvent::ConnectionError(e.to_string()));
                    Err(e)
                },
            }
        };

        for event in &notifications {
            self.events.emit(event);
        }
        if result.is_ok() {
            info!("connected to {}", device.name);
        }
        result
    }

    /// Adopt an already-open transport as the live connection.
    ///
    /// Same bookkeeping as [`LinkManager::open`] minus the physical open;
    /// used by tests and alternative transports.
    pub(crate) fn attach(&self, port: Box<dyn Port>, device: DeviceInfo) {
        let mut notifications = Vec::new();
        {
            let mut inner = self.lock();
            if let Some(mut old) = inner.port.take() {
                let _ = old.close();
                notifications.push(LinkEvent::Disconnected);
            }
            inner.port = Some(port);
            inner.device = Some(device.clone());
            inner.state = LinkState::Connected;
            notifications.push(LinkEvent::Connected(device));
        }
        for event in &notifications {
            self.events.emit(event);
        }
    }

    /// Close the connection if one exists.
    ///
    /// Idempotent: disconnecting while already disconnected does nothing and
    /// emits nothing.
    pub fn disconnect(&self) {
        let closed = {
            let mut inner = self.lock();
            match inner.port.take() {
                Some(mut port) => {
                    if let Err(e) = port.close() {
                        warn!("error while closing port: {e}");
                    }
                    inner.device = None;
                    inner.state = LinkState::Disconnected;
                    true
                },
                None => false,
            }
        };

        if closed {
            info!("disconnected");
            self.events.emit(&LinkEvent::Disconnected);
        }
    }

    /// Write raw bytes to the board.
    ///
    /// I/O faults are reported through the fan-out and returned, but the
    /// connection is left intact; the caller decides whether to disconnect.
    pub fn send_bytes(&self, data: &[u8]) -> Result<()> {
        let result = {
            let mut inner = self.lock();
            match inner.port.as_mut() {
                None => Err(Error::NotConnected),
                Some(port) => port
                    .write_all(data)
                    .and_then(|()| port.flush())
                    .map_err(|e| Error::from_transport("send data", e)),
            }
        };

        if let Err(e) = &result {
            self.events.emit(&LinkEvent::ConnectionError(e.to_string()));
        }
        result
    }

    /// Write a text line terminated with `\r\n`, the form the interactive
    /// REPL prompt expects.
    pub fn send_line(&self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(b"\r\n");
        self.send_bytes(&data)
    }

    /// Read whatever the board has sent, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time. Received bytes are
    /// also published as a `DataReceived` event so subscribers observe the
    /// same stream as the direct caller.
    pub fn read_data(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let result = {
            let mut inner = self.lock();
            match inner.port.as_mut() {
                None => Err(Error::NotConnected),
                Some(port) => {
                    port.set_timeout(timeout)?;
                    let mut buf = [0u8; READ_CHUNK];
                    let outcome = match port.read(&mut buf) {
                        Ok(0) => Ok(None),
                        Ok(n) => Ok(Some(buf[..n].to_vec())),
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
                        Err(e) => Err(Error::Io(e)),
                    };
                    // Writes stay bounded by the standard timeout.
                    port.set_timeout(IO_TIMEOUT)?;
                    outcome
                },
            }
        };

        match &result {
            Ok(Some(data)) => {
                self.events.emit(&LinkEvent::DataReceived(data.clone()));
            },
            Ok(None) => {},
            Err(e) => {
                self.events.emit(&LinkEvent::ConnectionError(e.to_string()));
            },
        }
        result
    }

    /// Push source text to the board through the raw-REPL sequence.
    ///
    /// Requires an established connection; otherwise fails with
    /// [`Error::NotConnected`] without touching any transport. A failed
    /// upload leaves the connection open; a stalled write does not imply
    /// the device is gone.
    ///
    /// Blocks for the protocol's settle pauses; call it off any
    /// latency-sensitive thread.
    pub fn upload(&self, source: &str) -> Result<()> {
        let result = {
            let mut inner = self.lock();
            match inner.port.as_mut() {
                None => Err(Error::NotConnected),
                Some(port) => raw_repl::upload_source(port.as_mut(), source),
            }
        };

        match &result {
            Ok(()) => info!("upload complete ({} bytes)", source.len()),
            Err(e) => self.events.emit(&LinkEvent::ConnectionError(e.to_string())),
        }
        result
    }

    /// Report a failure that happened outside the manager (e.g. a denied
    /// access request) through the same fan-out.
    pub(crate) fn report_error(&self, message: impl Into<String>) {
        self.events
            .emit(&LinkEvent::ConnectionError(message.into()));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LinkInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for LinkManager {
    fn default() -> Self {
        Self::new()
    }
}
