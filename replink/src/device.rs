//! Device discovery and classification.
//!
//! Enumerates serial-capable endpoints and classifies them by USB VID/PID so
//! callers can tell a MicroPython board (or the UART bridge in front of one)
//! from an unrelated serial port. Discovery is stateless: every call
//! re-queries the platform's current snapshot, and an empty machine yields an
//! empty list rather than an error.

use crate::error::{Error, Result};
use log::{debug, info, trace};

/// Transport type for discovered endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportKind {
    /// Serial transport (UART / USB CDC).
    Serial,
    /// Unknown or unclassified transport.
    Unknown,
}

/// Known USB device kinds commonly carrying a MicroPython interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceKind {
    /// MicroPython pyboard native USB.
    Pyboard,
    /// Raspberry Pi RP2 native USB (Pico and friends).
    Rp2,
    /// Espressif native USB-CDC (ESP32-S2/S3/C3...).
    Espressif,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232/FT2232/FT4232 USB-to-Serial converter.
    Ftdi,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs. An empty PID list matches any product of that
/// vendor.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (0xF055, &[0x9800, 0x9801, 0x9802], DeviceKind::Pyboard),
    (0x2E8A, &[], DeviceKind::Rp2),
    (0x303A, &[], DeviceKind::Espressif),
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        DeviceKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], DeviceKind::Cp210x),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        DeviceKind::Ftdi,
    ),
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], DeviceKind::Prolific),
];

impl DeviceKind {
    /// Classify a VID/PID combination.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, kind) in KNOWN_USB_DEVICES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *kind;
            }
        }
        Self::Unknown
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pyboard => "MicroPython pyboard",
            Self::Rp2 => "Raspberry Pi RP2",
            Self::Espressif => "Espressif USB-CDC",
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Check if this kind identifies the board itself rather than a generic
    /// UART bridge in front of it.
    pub fn is_native_board(&self) -> bool {
        matches!(self, Self::Pyboard | Self::Rp2 | Self::Espressif)
    }
}

/// Identifying attributes of an attachable device.
///
/// The endpoint `name` is the identity used throughout the library; the
/// remaining fields exist for display and matching. A `DeviceInfo` never
/// implies an open channel.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    /// Endpoint name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Transport type.
    pub transport: TransportKind,
    /// Classified device kind.
    pub kind: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DeviceInfo {
    /// Build a descriptor for an endpoint the platform did not enumerate,
    /// e.g. a port path the user typed by hand.
    pub fn unclassified(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Serial,
            kind: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    /// Check whether two descriptors refer to the same endpoint.
    pub fn same_endpoint(&self, other: &DeviceInfo) -> bool {
        self.name == other.name
    }

    /// Check if this endpoint is plausibly a MicroPython-capable board.
    pub fn is_likely_board(&self) -> bool {
        self.kind.is_known()
    }
}

/// Enumerate all attachable serial endpoints with USB metadata.
pub fn list_devices() -> Vec<DeviceInfo> {
    let mut result = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for port_info in ports {
                let mut device = DeviceInfo::unclassified(port_info.port_name.clone());

                if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                    device.vid = Some(usb_info.vid);
                    device.pid = Some(usb_info.pid);
                    device.manufacturer = usb_info.manufacturer;
                    device.product = usb_info.product;
                    device.serial = usb_info.serial_number;
                    device.kind = DeviceKind::from_vid_pid(usb_info.vid, usb_info.pid);

                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X}, Kind: {:?})",
                        port_info.port_name, usb_info.vid, usb_info.pid, device.kind
                    );
                }

                result.push(device);
            }
        },
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
        },
    }

    result
}

/// Enumerate endpoints that look like MicroPython-capable boards.
pub fn list_board_devices() -> Vec<DeviceInfo> {
    list_devices()
        .into_iter()
        .filter(DeviceInfo::is_likely_board)
        .collect()
}

/// Pick the single best upload candidate.
///
/// Native board USB wins over generic UART bridges, which win over anything
/// else that happens to be attached.
pub fn auto_select_device() -> Result<DeviceInfo> {
    let devices = list_devices();

    if let Some(device) = devices.iter().find(|d| d.kind.is_native_board()) {
        info!("Auto-selected {}: {}", device.kind.name(), device.name);
        return Ok(device.clone());
    }

    if let Some(device) = devices.iter().find(|d| d.kind.is_known()) {
        info!(
            "Auto-selected {} USB-UART bridge: {}",
            device.kind.name(),
            device.name
        );
        return Ok(device.clone());
    }

    if let Some(device) = devices.into_iter().next() {
        info!("Using first available port: {}", device.name);
        return Ok(device);
    }

    Err(Error::NoDriver("no serial devices attached".into()))
}

/// Find an endpoint whose name contains the given pattern.
pub fn find_device_by_pattern(pattern: &str) -> Result<DeviceInfo> {
    list_devices()
        .into_iter()
        .find(|d| d.name.contains(pattern))
        .ok_or_else(|| Error::NoDriver(format!("no serial device matching '{pattern}'")))
}

/// Format a list of devices for display.
pub fn format_device_list(devices: &[DeviceInfo]) -> Vec<String> {
    let mut result = Vec::new();

    for device in devices {
        let kind_info = if device.kind.is_known() {
            format!(" [{}]", device.kind.name())
        } else if let (Some(vid), Some(pid)) = (device.vid, device.pid) {
            format!(" [VID:{vid:04X} PID:{pid:04X}]")
        } else {
            String::new()
        };

        let product_info = device
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();

        result.push(format!("{}{}{}", device.name, kind_info, product_info));
    }

    result
}
