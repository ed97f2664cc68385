//! # replink
//!
//! A library for uploading MicroPython scripts to serial-attached boards.
//!
//! This crate provides the host side of a "write code, push it to the
//! board" workflow:
//!
//! - Discovery of serial-capable devices with USB classification
//! - Access brokering (bounded permission requests, detach handling)
//! - A single-connection lifecycle manager with typed event fan-out
//! - The raw-REPL upload protocol (interrupt, raw mode, source, execute)
//! - Named script projects on local storage
//!
//! The connection runs at the fixed MicroPython console configuration:
//! 115200 baud, 8 data bits, 1 stop bit, no parity.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use replink::{AccessBroker, AccessOutcome, AutoGrantAuthority, LinkManager};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let device = replink::auto_select_device()?;
//!
//!     let manager = Arc::new(LinkManager::new());
//!     let events = manager.subscribe();
//!
//!     let broker = AccessBroker::new(Arc::clone(&manager), Box::new(AutoGrantAuthority));
//!     if broker.request_access(&device) == AccessOutcome::Granted {
//!         // Connection events (including open failures) arrive here.
//!         let _ = events.recv()?;
//!     }
//!
//!     if manager.is_connected() {
//!         manager.upload("print('hello from replink')")?;
//!         manager.disconnect();
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access;
pub mod device;
pub mod error;
pub mod events;
pub mod link;
pub mod monitor;
pub mod port;
pub mod project;
pub mod protocol;

// Re-exports for convenience
pub use {
    access::{
        ACCESS_TIMEOUT, AccessAuthority, AccessBroker, AccessOutcome, AutoGrantAuthority,
        DetachWatcher, PlatformEvent,
    },
    device::{
        DeviceInfo, DeviceKind, TransportKind, auto_select_device, find_device_by_pattern,
        format_device_list, list_board_devices, list_devices,
    },
    error::{Error, Result},
    events::{EventBus, LinkEvent},
    link::{LinkManager, LinkState},
    monitor::{StreamDecoder, printable},
    port::{IO_TIMEOUT, NativePort, Port, REPL_BAUD, SerialConfig},
    project::{MAIN_FILE, Project, ProjectFile, ProjectStore},
};
