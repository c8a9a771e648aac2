#![forbid(unsafe_code)]

mod config;
mod constants;
mod event_handler;
mod input;
mod ipc;
mod keys;
mod state_machine;
mod tray;
mod x11_utils;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use tracing::{Level as TraceLevel, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use config::{SettingChange, Store};
use event_handler::{AppEvent, Dispatcher};
use input::{KeyboardListener, MouseClickCapture};
use ipc::{ControlClient, ControlRequest, ControlResponse, ControlServer};
use x11_utils::X11Session;

/// Bind keyboard keys to screen positions and click them
#[derive(Debug, Parser)]
#[command(name = "keyclick", version, about)]
struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/keyclick/config.json)
    #[arg(long, global = true, env = constants::config::PATH_ENV)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run in the background, listening for bound keys (default)
    Run {
        /// Do not register a system tray icon
        #[arg(long)]
        no_tray: bool,
    },
    /// Print bindings and settings
    List,
    /// Remove the binding for a key
    Remove { key: String },
    /// Change one setting
    Set { name: String, value: String },
    /// Print the config file path
    Path,
}

fn init_logging() -> Result<()> {
    // Parse log level from environment variable
    let log_level = match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let config_path = cli.config.unwrap_or_else(config::default_path);

    match cli.command.unwrap_or(Command::Run { no_tray: false }) {
        Command::Run { no_tray } => run_daemon(config_path, no_tray),
        Command::List => {
            list(&Store::load(config_path));
            Ok(())
        }
        Command::Remove { key } => {
            let request = ControlRequest::RemoveBinding(keys::normalize(&key));
            if send_to_daemon(&request)? {
                return Ok(());
            }
            let mut store = Store::load(config_path);
            if store.remove(&key)? {
                println!("Removed mapping for \"{}\".", keys::normalize(&key));
            } else {
                println!("Key \"{}\" not found.", keys::normalize(&key));
            }
            Ok(())
        }
        Command::Set { name, value } => {
            let change = SettingChange::parse(&name, &value)?;
            if send_to_daemon(&ControlRequest::ChangeSetting(change.clone()))? {
                return Ok(());
            }
            let mut store = Store::load(config_path);
            store.apply(&change)?;
            println!("Setting \"{}\" updated to {}.", change.name(), change);
            Ok(())
        }
        Command::Path => {
            println!("{}", config_path.display());
            Ok(())
        }
    }
}

/// Hand an edit to a running daemon so it is not lost on the daemon's next
/// save. Returns `false` when no daemon is listening.
fn send_to_daemon(request: &ControlRequest) -> Result<bool> {
    let socket_path = ipc::default_socket_path()?;
    if !ipc::daemon_listening(&socket_path) {
        debug!(path = %socket_path.display(), "No running daemon, editing config file directly");
        return Ok(false);
    }

    let mut client = ControlClient::connect_to(&socket_path)?;
    match client.request(request)? {
        ControlResponse::Done(status) => {
            println!("{status}");
            Ok(true)
        }
        ControlResponse::Failed(reason) => {
            bail!("keyclick daemon did not apply the change: {reason}")
        }
    }
}

fn list(store: &Store) {
    println!("Config: {}", store.path().display());
    println!("Bindings:");
    if store.bindings().is_empty() {
        println!("  (none)");
    }
    for (key, point) in store.bindings() {
        println!("  {key} → {point}");
    }
    let settings = store.settings();
    println!("Settings:");
    println!("  restore_mouse_position = {}", settings.restore_mouse_position);
    println!("  require_foreground_window = {}", settings.require_foreground_window);
    println!("  target_window_title = {:?}", settings.target_window_title);
}

fn run_daemon(config_path: PathBuf, no_tray: bool) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting keyclick");

    let socket_path = ipc::default_socket_path()?;
    if ipc::daemon_listening(&socket_path) {
        bail!("keyclick is already running (control socket {})", socket_path.display());
    }

    let store = Store::load(config_path);
    let actuator = X11Session::connect()?;
    let locator = Arc::new(
        X11Session::connect().context("Failed to open X11 connection for pointer lookups")?,
    );

    // Every producer thread feeds this channel; the dispatcher drains it here
    let (event_tx, event_rx) = mpsc::channel();
    let capture = MouseClickCapture::new(event_tx.clone(), locator);
    let mut dispatcher = Dispatcher::new(store, actuator, capture);

    // Keyboard listener (optional - skip if permissions denied)
    let mut keyboard = KeyboardListener::new();
    if input::check_permissions() {
        match keyboard.start(event_tx.clone()) {
            Ok(()) => info!(enabled = true, "Keyboard listening enabled"),
            Err(e) => {
                error!(error = %e, "Failed to start keyboard listener");
                input::print_permission_error();
            }
        }
    } else {
        input::print_permission_error();
    }

    #[cfg(unix)]
    spawn_signal_handler(event_tx.clone())?;

    // CLI edits reach the dispatcher through here while the daemon runs
    let control = match ControlServer::bind_to(socket_path) {
        Ok(server) => match server.spawn(event_tx.clone()) {
            Ok(_) => {
                debug!(path = %server.path().display(), "Control socket thread started");
                Some(server)
            }
            Err(e) => {
                warn!(error = ?e, "Continuing without control socket");
                None
            }
        },
        Err(e) => {
            warn!(error = ?e, "Continuing without control socket");
            None
        }
    };

    let tray_thread = if no_tray {
        None
    } else {
        match tray::start_system_tray(event_tx.clone(), dispatcher.subscribe()) {
            Ok(handle) => {
                info!("System tray started");
                Some(handle)
            }
            Err(e) => {
                warn!(error = ?e, "Continuing without system tray");
                None
            }
        }
    };
    drop(event_tx);

    info!("keyclick running");
    dispatcher.run(&event_rx);
    debug!(state = %dispatcher.state(), "Event loop finished");

    keyboard.stop();
    // Dropping the dispatcher closes the tray's notification channel
    drop(dispatcher);
    if let Some(handle) = tray_thread {
        match handle.join() {
            Ok(()) => info!("System tray thread joined"),
            Err(err) => warn!("System tray thread panicked: {:?}", err),
        }
    }

    // Removes the socket file
    drop(control);

    info!("keyclick exiting");
    Ok(())
}

/// Translate SIGINT/SIGTERM into a quit intent
#[cfg(unix)]
fn spawn_signal_handler(events: Sender<AppEvent>) -> Result<()> {
    use signal_hook::consts::signal::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handler")?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            info!(
                signal = if sig == SIGTERM { "SIGTERM" } else { "SIGINT" },
                "Received signal - initiating graceful shutdown"
            );
            if events
                .send(AppEvent::Intent(event_handler::Intent::Quit))
                .is_err()
            {
                break;
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_command_is_none() {
        let cli = Cli::try_parse_from(["keyclick"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_set_command_arguments() {
        let cli = Cli::try_parse_from([
            "keyclick",
            "--config",
            "/tmp/k.json",
            "set",
            "restore_mouse_position",
            "false",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/k.json")));
        match cli.command {
            Some(Command::Set { name, value }) => {
                assert_eq!(name, "restore_mouse_position");
                assert_eq!(value, "false");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_run_no_tray_flag() {
        let cli = Cli::try_parse_from(["keyclick", "run", "--no-tray"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Run { no_tray: true })));
    }
}
