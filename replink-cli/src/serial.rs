//! Interactive serial device selection.
//!
//! Selection ladder: explicit `--port` → remembered port from config →
//! auto-detection over the live enumeration, preferring known boards and
//! prompting only when the choice is ambiguous. Non-interactive mode never
//! prompts: zero or multiple candidates are usage errors so scripts get a
//! deterministic exit code.

use std::cmp::Ordering;
use std::io::IsTerminal;

use anyhow::Result;
use console::style;
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use log::{debug, error, info};
use replink::{DeviceInfo, list_devices};

use crate::CliError;
use crate::config::Config;

/// Options for serial device selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// List all ports (including unknown types).
    pub list_all_ports: bool,
    /// Non-interactive mode (fail if ambiguous).
    pub non_interactive: bool,
    /// Force confirmation even for a single recognized port.
    pub confirm_port: bool,
}

/// Result of device selection.
#[derive(Debug)]
pub struct SelectedPort {
    /// The selected device.
    pub device: DeviceInfo,
    /// Whether it matched a known/configured device.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    // Selection failures map to exit code 2 so CI callers can branch on them.
    CliError::Usage(message.to_string()).into()
}

/// Select a serial device interactively or automatically.
pub fn select_device(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_device_by_name(port_name));
    }

    if let Some(port_name) = &config.port.serial {
        debug!("using port from config: {port_name}");
        return Ok(find_device_by_name(port_name));
    }

    let devices = list_devices();
    if devices.is_empty() {
        return Err(usage_err("no serial ports found; is the board plugged in?"));
    }

    let known: Vec<DeviceInfo> = devices
        .iter()
        .filter(|d| is_known_device(d, config))
        .cloned()
        .collect();

    let candidates = if options.list_all_ports || known.is_empty() {
        devices
    } else {
        known
    };

    if options.non_interactive {
        return select_non_interactive(candidates, config);
    }

    match candidates.len().cmp(&1) {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_interactive(candidates, config)
        },
        Ordering::Equal => {
            let device = candidates.into_iter().next().expect("one candidate");
            let is_known = is_known_device(&device, config);

            if is_known && !options.confirm_port {
                info!("auto-selected {} [{}]", device.name, device.kind.name());
                Ok(SelectedPort { device, is_known })
            } else {
                ensure_interactive_terminal()?;
                confirm_single_device(device, is_known)
            }
        },
        Ordering::Less => Err(usage_err("no serial ports available")),
    }
}

fn select_non_interactive(candidates: Vec<DeviceInfo>, config: &Config) -> Result<SelectedPort> {
    match candidates.len().cmp(&1) {
        Ordering::Equal => {
            let device = candidates.into_iter().next().expect("one candidate");
            Ok(SelectedPort {
                is_known: is_known_device(&device, config),
                device,
            })
        },
        Ordering::Greater => Err(usage_err(
            "multiple serial ports found; pick one with --port",
        )),
        Ordering::Less => Err(usage_err("no serial ports available")),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "interactive port selection needs a terminal; use --port or --non-interactive",
        ))
    }
}

/// Resolve an explicitly named port against the enumeration.
fn find_device_by_name(name: &str) -> SelectedPort {
    let devices = list_devices();

    if let Some(device) = devices
        .iter()
        .find(|d| d.name == name || d.name.eq_ignore_ascii_case(name))
    {
        return SelectedPort {
            device: device.clone(),
            is_known: device.kind.is_known(),
        };
    }

    // Not enumerated, but the user named it explicitly; take their word.
    SelectedPort {
        device: DeviceInfo::unclassified(name),
        is_known: false,
    }
}

/// Check if a device is known, either built-in or taught via config.
fn is_known_device(device: &DeviceInfo, config: &Config) -> bool {
    if device.kind.is_known() {
        return true;
    }

    if let (Some(vid), Some(pid)) = (device.vid, device.pid) {
        return config
            .port
            .usb_device
            .iter()
            .any(|entry| entry.matches(vid, pid));
    }

    false
}

fn device_label(device: &DeviceInfo, config: &Config) -> String {
    let name = if is_known_device(device, config) {
        style(&device.name).bold().to_string()
    } else {
        device.name.clone()
    };

    let kind_info = if device.kind.is_known() {
        format!(" [{}]", style(device.kind.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (device.vid, device.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = device
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{kind_info}{product}")
}

fn select_interactive(mut devices: Vec<DeviceInfo>, config: &Config) -> Result<SelectedPort> {
    eprintln!(
        "{} {} serial ports detected",
        style("ℹ").blue(),
        devices.len()
    );

    // Known boards first.
    devices.sort_by_key(|d| !is_known_device(d, config));

    let labels: Vec<String> = devices.iter().map(|d| device_label(d, config)).collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(|_| CliError::Usage("port selection prompt failed".to_string()))?;

    match selection {
        Some(index) => {
            let device = devices
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("invalid port index: {index}"))?;
            let is_known = is_known_device(&device, config);
            Ok(SelectedPort { device, is_known })
        },
        None => Err(CliError::Cancelled("port selection cancelled".to_string()).into()),
    }
}

fn confirm_single_device(device: DeviceInfo, is_known: bool) -> Result<SelectedPort> {
    let product = device
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}{product}?", device.name))
        .default(true)
        .interact_opt()
        .map_err(|_| CliError::Usage("confirmation prompt failed".to_string()))?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort { device, is_known })
    } else {
        Err(CliError::Cancelled("port selection cancelled".to_string()).into())
    }
}

/// Offer to remember an unrecognized device's USB IDs in the config.
pub fn ask_remember_device(device: &DeviceInfo, config: &mut Config) -> Result<()> {
    let (Some(vid), Some(pid)) = (device.vid, device.pid) else {
        return Ok(());
    };

    if config
        .port
        .usb_device
        .iter()
        .any(|entry| entry.matches(vid, pid))
    {
        return Ok(());
    }

    if !std::io::stdin().is_terminal() || !std::io::stderr().is_terminal() {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Remember this device for future sessions?")
        .default(false)
        .interact_opt()
        .unwrap_or(None)
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_usb_device(vid, pid) {
            error!("failed to save device configuration: {e}");
        }
    }

    Ok(())
}
