//! replink CLI - push MicroPython scripts to serial-attached boards.
//!
//! ## Features
//!
//! - Upload a script file or a stored project through the raw REPL
//! - Manage named script projects on local storage
//! - Interactive serial port selection with device classification
//! - Live serial monitor with keyboard passthrough
//! - Shell completion generation
//! - Environment variable support

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use replink::{
    AccessBroker, AccessOutcome, AutoGrantAuthority, DetachWatcher, LinkEvent, LinkManager,
    ProjectStore,
};

mod config;
mod monitor;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_device, select_device};

/// Set by the Ctrl-C handler; long-running loops poll it.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Error classes that map to specific exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or unusable environment (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// The user backed out of a prompt (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// replink - upload and run MicroPython scripts on serial-attached boards.
///
/// Environment variables:
///   REPLINK_PORT             - Default serial port
///   REPLINK_PROJECTS_DIR     - Where script projects are stored
///   REPLINK_NON_INTERACTIVE  - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "replink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "REPLINK_PORT")]
    port: Option<String>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "REPLINK_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// List all available ports (including unknown types).
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Directory where script projects are stored.
    #[arg(long, global = true, env = "REPLINK_PROJECTS_DIR", value_name = "DIR")]
    projects_dir: Option<PathBuf>,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Upload a script to the board and run it.
    Upload {
        /// Path to a Python source file.
        file: Option<PathBuf>,

        /// Upload a stored project's main.py instead of a file.
        #[arg(long, conflicts_with = "file")]
        project: Option<String>,

        /// Stay connected and print the board's output until Ctrl-C.
        #[arg(long)]
        watch: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Open an interactive serial monitor.
    Monitor,

    /// Manage stored script projects.
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Project management subcommands.
#[derive(Subcommand)]
enum ProjectCommands {
    /// List stored projects.
    List {
        /// Output project list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Create a project seeded with a starter program.
    New {
        /// Project name.
        name: String,
    },

    /// Print a project's main.py to stdout.
    Show {
        /// Project name.
        name: String,
    },

    /// Delete a project and all of its files.
    Delete {
        /// Project name.
        name: String,

        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
}

fn main() {
    match run() {
        Ok(()) => {},
        Err(err) => {
            match err.downcast_ref::<CliError>() {
                Some(CliError::Usage(msg)) => {
                    eprintln!("{} {msg}", style("Error:").red().bold());
                    std::process::exit(2);
                },
                Some(CliError::Cancelled(msg)) => {
                    eprintln!("{msg}");
                    std::process::exit(130);
                },
                None => {
                    eprintln!("{} {err:#}", style("Error:").red().bold());
                    std::process::exit(1);
                },
            }
        },
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!("replink v{}", env!("CARGO_PKG_VERSION"));

    let mut cfg = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Upload {
            file,
            project,
            watch,
        } => cmd_upload(&cli, &mut cfg, file.as_deref(), project.as_deref(), *watch),
        Commands::ListPorts { json } => {
            cmd_list_ports(*json);
            Ok(())
        },
        Commands::Monitor => cmd_monitor(&cli, &mut cfg),
        Commands::Project { command } => cmd_project(&cli, &cfg, command),
        Commands::Completions { shell } => {
            cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Resolve the serial device from CLI args, config, or interactive selection.
fn get_device(cli: &Cli, cfg: &mut Config) -> Result<replink::DeviceInfo> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_device(&options, cfg)?;

    if !selected.is_known && !cli.non_interactive {
        ask_remember_device(&selected.device, cfg)?;
    }

    Ok(selected.device)
}

fn projects_store(cli: &Cli, cfg: &Config) -> Result<ProjectStore> {
    let root = cfg.projects_root(cli.projects_dir.as_deref())?;
    Ok(ProjectStore::new(root))
}

/// Establish a connection through the access broker and wait for the
/// manager's verdict.
fn connect(
    manager: &Arc<LinkManager>,
    device: &replink::DeviceInfo,
) -> Result<AccessBroker> {
    let events = manager.subscribe();
    let broker = AccessBroker::new(Arc::clone(manager), Box::new(AutoGrantAuthority));

    match broker.request_access(device) {
        AccessOutcome::Granted => {},
        AccessOutcome::Denied => bail!("access to {} was denied", device.name),
        AccessOutcome::TimedOut => bail!("access request for {} went unanswered", device.name),
    }

    // The broker opens the connection; the fan-out tells us how it went.
    loop {
        match events.recv_timeout(Duration::from_secs(10)) {
            Ok(LinkEvent::Connected(_)) => return Ok(broker),
            Ok(LinkEvent::ConnectionError(msg)) => bail!("connection failed: {msg}"),
            Ok(_) => {},
            Err(_) => bail!("no connection result for {}", device.name),
        }
    }
}

fn spinner(quiet: bool, message: &str) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Upload command implementation.
fn cmd_upload(
    cli: &Cli,
    cfg: &mut Config,
    file: Option<&std::path::Path>,
    project: Option<&str>,
    watch: bool,
) -> Result<()> {
    let source = match (file, project) {
        (Some(path), None) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, Some(name)) => {
            let store = projects_store(cli, cfg)?;
            store
                .main_content(name)
                .with_context(|| format!("failed to load project '{name}'"))?
        },
        _ => {
            return Err(CliError::Usage(
                "provide a source file or --project NAME".to_string(),
            )
            .into());
        },
    };

    let device = get_device(cli, cfg)?;
    if !cli.quiet {
        eprintln!(
            "{} Using {} ({})",
            style("→").cyan(),
            style(&device.name).bold(),
            device.kind.name()
        );
    }

    let manager = Arc::new(LinkManager::new());
    let pb = spinner(cli.quiet, &format!("Connecting to {}", device.name));
    let result = connect(&manager, &device).and_then(|_broker| {
        pb.set_message(format!("Uploading {} bytes", source.len()));
        manager.upload(&source).map_err(Into::into)
    });
    pb.finish_and_clear();
    result?;

    if !cli.quiet {
        eprintln!("{} Program sent, board is running it", style("✓").green());
    }

    if watch {
        watch_output(cli, &manager)?;
    }

    manager.disconnect();
    Ok(())
}

/// Stream the board's output until Ctrl-C.
fn watch_output(cli: &Cli, manager: &Arc<LinkManager>) -> Result<()> {
    use std::io::Write as _;

    ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed))
        .context("failed to install Ctrl-C handler")?;

    if !cli.quiet {
        eprintln!("{}", style("Watching board output, Ctrl-C to stop").dim());
    }

    let mut decoder = replink::StreamDecoder::new();
    while !was_interrupted() {
        match manager.read_data(Duration::from_millis(200)) {
            Ok(Some(data)) => {
                let text = replink::printable(&decoder.push(&data));
                print!("{text}");
                std::io::stdout().flush().ok();
            },
            Ok(None) => {},
            Err(e) => bail!("lost the board while watching output: {e}"),
        }
    }
    Ok(())
}

/// List ports command implementation.
fn cmd_list_ports(json: bool) {
    let devices = replink::list_devices();

    if json {
        let entries: Vec<serde_json::Value> = devices
            .iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "kind": d.kind.name(),
                    "known": d.kind.is_known(),
                    "vid": d.vid,
                    "pid": d.pid,
                    "manufacturer": d.manufacturer,
                    "product": d.product,
                    "serial": d.serial,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).unwrap_or_default()
        );
        return;
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if devices.is_empty() {
        eprintln!("  {}", style("no serial ports found").dim());
        return;
    }

    for device in &devices {
        let kind_info = if device.kind.is_known() {
            format!(" [{}]", style(device.kind.name()).yellow())
        } else {
            String::new()
        };
        let vid_pid = if let (Some(vid), Some(pid)) = (device.vid, device.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = device
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{}{}{}",
            style("•").green(),
            style(&device.name).cyan(),
            kind_info,
            vid_pid,
            product
        );
    }

    if let Ok(best) = replink::auto_select_device() {
        eprintln!(
            "\n{} would auto-select {}",
            style("→").green().bold(),
            style(&best.name).cyan().bold()
        );
    }
}

/// Monitor command implementation.
fn cmd_monitor(cli: &Cli, cfg: &mut Config) -> Result<()> {
    let device = get_device(cli, cfg)?;
    let manager = Arc::new(LinkManager::new());

    let broker = AccessBroker::new(Arc::clone(&manager), Box::new(AutoGrantAuthority));
    let _watcher = DetachWatcher::spawn(broker.platform_handle());

    manager
        .open(&device)
        .with_context(|| format!("failed to open {}", device.name))?;

    let result = monitor::run_monitor(cli.quiet, &manager);
    manager.disconnect();
    result
}

/// Project command implementations.
fn cmd_project(cli: &Cli, cfg: &Config, command: &ProjectCommands) -> Result<()> {
    let store = projects_store(cli, cfg)?;

    match command {
        ProjectCommands::List { json } => {
            let projects = store.list()?;

            if *json {
                let entries: Vec<serde_json::Value> = projects
                    .iter()
                    .map(|p| {
                        serde_json::json!({
                            "name": p.name,
                            "path": p.path.display().to_string(),
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&entries).unwrap_or_default()
                );
                return Ok(());
            }

            if projects.is_empty() {
                eprintln!(
                    "No projects yet. Create one with {}",
                    style("replink project new NAME").cyan()
                );
            } else {
                for project in &projects {
                    println!("{}", project.name);
                }
            }
            Ok(())
        },
        ProjectCommands::New { name } => {
            let project = store.create(name)?;
            if !cli.quiet {
                eprintln!(
                    "{} Created project '{}' at {}",
                    style("✓").green(),
                    project.name,
                    style(project.path.display()).dim()
                );
            }
            Ok(())
        },
        ProjectCommands::Show { name } => {
            print!("{}", store.main_content(name)?);
            Ok(())
        },
        ProjectCommands::Delete { name, yes } => {
            store.get(name)?;

            if !yes {
                if cli.non_interactive {
                    return Err(CliError::Usage(
                        "deleting a project in non-interactive mode requires --yes".to_string(),
                    )
                    .into());
                }
                let confirmed = dialoguer::Confirm::new()
                    .with_prompt(format!("Delete project '{name}' and all of its files?"))
                    .default(false)
                    .interact()
                    .map_err(|_| CliError::Cancelled("deletion cancelled".to_string()))?;
                if !confirmed {
                    return Err(CliError::Cancelled("deletion cancelled".to_string()).into());
                }
            }

            store.delete(name)?;
            if !cli.quiet {
                eprintln!("{} Deleted project '{name}'", style("✓").green());
            }
            Ok(())
        },
    }
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_upload_file() {
        let cli = Cli::try_parse_from(["replink", "--port", "/dev/ttyACM0", "upload", "blink.py"])
            .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        if let Commands::Upload {
            file,
            project,
            watch,
        } = cli.command
        {
            assert_eq!(file.unwrap().to_str().unwrap(), "blink.py");
            assert!(project.is_none());
            assert!(!watch);
        } else {
            panic!("expected Upload command");
        }
    }

    #[test]
    fn test_cli_parse_upload_project_with_watch() {
        let cli =
            Cli::try_parse_from(["replink", "upload", "--project", "blinky", "--watch"]).unwrap();
        if let Commands::Upload { file, project, watch } = cli.command {
            assert!(file.is_none());
            assert_eq!(project.as_deref(), Some("blinky"));
            assert!(watch);
        } else {
            panic!("expected Upload command");
        }
    }

    #[test]
    fn test_cli_rejects_file_and_project_together() {
        let result =
            Cli::try_parse_from(["replink", "upload", "blink.py", "--project", "blinky"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parse_list_ports_json() {
        let cli = Cli::try_parse_from(["replink", "list-ports", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { json: true }));
    }

    #[test]
    fn test_cli_parse_project_subcommands() {
        let cli = Cli::try_parse_from(["replink", "project", "new", "blinky"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Project {
                command: ProjectCommands::New { .. }
            }
        ));

        let cli =
            Cli::try_parse_from(["replink", "project", "delete", "blinky", "--yes"]).unwrap();
        if let Commands::Project {
            command: ProjectCommands::Delete { name, yes },
        } = cli.command
        {
            assert_eq!(name, "blinky");
            assert!(yes);
        } else {
            panic!("expected Project delete command");
        }
    }

    #[test]
    fn test_cli_parse_monitor_and_completions() {
        assert!(matches!(
            Cli::try_parse_from(["replink", "monitor"]).unwrap().command,
            Commands::Monitor
        ));
        assert!(matches!(
            Cli::try_parse_from(["replink", "completions", "bash"])
                .unwrap()
                .command,
            Commands::Completions { .. }
        ));
    }

    #[test]
    fn test_cli_default_values() {
        let cli = Cli::try_parse_from(["replink", "list-ports"]).unwrap();
        assert!(cli.port.is_none());
        assert_eq!(cli.verbose, 0);
        assert!(!cli.quiet);
        assert!(!cli.non_interactive);
        assert!(!cli.confirm_port);
        assert!(!cli.list_all_ports);
        assert!(cli.projects_dir.is_none());
        assert!(cli.config_path.is_none());
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "replink",
            "--port",
            "COM3",
            "-vv",
            "--quiet",
            "--non-interactive",
            "--confirm-port",
            "--list-all-ports",
            "--projects-dir",
            "/tmp/projects",
            "--config",
            "/tmp/config.toml",
            "list-ports",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM3"));
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(cli.non_interactive);
        assert!(cli.confirm_port);
        assert!(cli.list_all_ports);
        assert_eq!(
            cli.projects_dir.unwrap().to_str().unwrap(),
            "/tmp/projects"
        );
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["replink"]).is_err());
    }
}
