//! Global input capture via evdev
//!
//! Keyboard devices are read on one thread each and key-downs are forwarded
//! to the dispatcher. Click capture opens pointer devices only while a
//! binding is waiting for its coordinate.

use anyhow::{Context, Result};
use evdev::{Device, InputEvent, InputEventKind, Key};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread;
use tracing::{debug, error, info, warn};

use crate::config::Point;
use crate::constants::{input, paths, permissions};
use crate::event_handler::{AppEvent, ClickCapture};
use crate::keys;

/// Source of the absolute pointer position (evdev only reports relative motion)
pub trait PointerLocator: Send + Sync + 'static {
    fn pointer_position(&self) -> Result<Point>;
}

/// Open every event device accepted by `filter`
fn find_devices(kind: &str, filter: impl Fn(&Device) -> bool) -> Result<Vec<Device>> {
    info!(path = %paths::DEV_INPUT, kind, "Scanning for input devices...");

    let mut devices = Vec::new();

    for entry in std::fs::read_dir(paths::DEV_INPUT).with_context(|| {
        format!(
            "Failed to read {} - are you in the '{}' group?",
            paths::DEV_INPUT,
            permissions::INPUT_GROUP
        )
    })? {
        let entry = entry?;
        let path = entry.path();
        let is_event_node = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(paths::EVENT_DEVICE_PREFIX));
        if !is_event_node {
            continue;
        }

        match Device::open(&path) {
            Ok(device) if filter(&device) => {
                info!(
                    device_path = %path.display(),
                    name = ?device.name(),
                    kind,
                    "Found input device"
                );
                devices.push(device);
            }
            Ok(_) => {}
            Err(e) => debug!(device_path = %path.display(), error = %e, "Cannot open input device"),
        }
    }

    if devices.is_empty() {
        anyhow::bail!(
            "No {} device found. Ensure you're in '{}' group:\n\
             {}\n\
             Then log out and back in.",
            kind,
            permissions::INPUT_GROUP,
            permissions::ADD_TO_INPUT_GROUP
        )
    }

    info!(count = devices.len(), kind, "Listening on input device(s)");

    Ok(devices)
}

fn is_keyboard(device: &Device) -> bool {
    device
        .supported_keys()
        .is_some_and(|keys| keys.contains(Key::KEY_A))
}

fn is_pointer(device: &Device) -> bool {
    device
        .supported_keys()
        .is_some_and(|keys| keys.contains(Key::BTN_LEFT))
}

/// Normalized name for a key-down; `None` for releases, repeats and buttons
fn key_press_name(event: &InputEvent) -> Option<String> {
    match event.kind() {
        InputEventKind::Key(key) if !keys::is_button(key) => match event.value() {
            input::KEY_PRESS => Some(keys::key_name(key)),
            input::KEY_REPEAT | input::KEY_RELEASE => None,
            other => {
                debug!(key = ?key, value = other, "Unexpected key event value");
                None
            }
        },
        _ => None,
    }
}

fn is_left_press(event: &InputEvent) -> bool {
    event.kind() == InputEventKind::Key(Key::BTN_LEFT) && event.value() == input::KEY_PRESS
}

/// Handle on the background keyboard listener threads
pub struct KeyboardListener {
    /// Replaced on each start so threads from an earlier run stay stopped
    running: Arc<AtomicBool>,
}

impl Default for KeyboardListener {
    fn default() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl KeyboardListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn one listener thread per keyboard. No-op when already running.
    pub fn start(&mut self, sender: Sender<AppEvent>) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let devices = find_devices("keyboard", is_keyboard)?;
        let running = Arc::new(AtomicBool::new(true));

        for device in devices {
            let sender = sender.clone();
            let running = running.clone();
            thread::spawn(move || {
                info!(device = ?device.name(), "Keyboard listener started");
                if let Err(e) = listen_for_keys(device, &sender, &running) {
                    error!(error = %e, "Keyboard listener error");
                }
            });
        }

        self.running = running;
        Ok(())
    }

    /// Threads exit on their next wakeup; events read after this are dropped
    pub fn stop(&mut self) {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("Keyboard listener stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

fn listen_for_keys(
    mut device: Device,
    sender: &Sender<AppEvent>,
    running: &AtomicBool,
) -> Result<()> {
    loop {
        // Fetch events (blocks until available)
        let events = device.fetch_events().context("Failed to fetch events")?;

        for event in events {
            if !running.load(Ordering::Acquire) {
                return Ok(());
            }
            if let Some(name) = key_press_name(&event) {
                debug!(key = %name, "Key pressed");
                if sender.send(AppEvent::KeyPressed(name)).is_err() {
                    // Dispatcher is gone
                    return Ok(());
                }
            }
        }
    }
}

/// One-shot capture of the next left button press
pub struct MouseClickCapture<L> {
    sender: Sender<AppEvent>,
    locator: Arc<L>,
    /// Set while a capture is pending, cleared by whoever claims or cancels it
    active: Option<Arc<AtomicBool>>,
}

impl<L: PointerLocator> MouseClickCapture<L> {
    pub fn new(sender: Sender<AppEvent>, locator: Arc<L>) -> Self {
        Self {
            sender,
            locator,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.load(Ordering::Acquire))
    }
}

impl<L: PointerLocator> ClickCapture for MouseClickCapture<L> {
    fn start(&mut self) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }

        let devices = find_devices("pointer", is_pointer)?;
        let active = Arc::new(AtomicBool::new(true));

        for device in devices {
            let sender = self.sender.clone();
            let locator = self.locator.clone();
            let active = active.clone();
            thread::spawn(move || {
                debug!(device = ?device.name(), "Click capture started");
                if let Err(e) = wait_for_left_click(device, &sender, locator.as_ref(), &active) {
                    error!(error = %e, "Click capture error");
                }
            });
        }

        self.active = Some(active);
        info!("Waiting for left click");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(active) = self.active.take()
            && active.swap(false, Ordering::AcqRel)
        {
            info!("Click capture cancelled");
        }
    }
}

fn wait_for_left_click<L: PointerLocator>(
    mut device: Device,
    sender: &Sender<AppEvent>,
    locator: &L,
    active: &AtomicBool,
) -> Result<()> {
    loop {
        let events = device.fetch_events().context("Failed to fetch events")?;

        for event in events {
            if !active.load(Ordering::Acquire) {
                return Ok(());
            }
            if is_left_press(&event) && deliver_click(active, locator, sender) {
                return Ok(());
            }
        }
    }
}

/// Resolve the click position and claim the capture.
/// Returns `true` once the capture is finished (by this thread or another).
fn deliver_click<L: PointerLocator>(
    active: &AtomicBool,
    locator: &L,
    sender: &Sender<AppEvent>,
) -> bool {
    let point = match locator.pointer_position() {
        Ok(point) => point,
        Err(e) => {
            // Leave the capture unclaimed so the next press can retry
            error!(error = ?e, "Failed to read pointer position");
            return false;
        }
    };

    if !active.swap(false, Ordering::AcqRel) {
        return true;
    }

    info!(x = point.x, y = point.y, "Captured left click");
    if sender
        .send(AppEvent::MouseCaptured {
            x: point.x,
            y: point.y,
        })
        .is_err()
    {
        warn!("Dispatcher gone, dropping captured click");
    }
    true
}

/// Check if input devices are readable (user has input group permissions)
pub fn check_permissions() -> bool {
    std::fs::read_dir(paths::DEV_INPUT).is_ok()
}

/// Print helpful error message if permissions missing
pub fn print_permission_error() {
    error!(path = %paths::DEV_INPUT, "Cannot access input devices");
    error!(group = %permissions::INPUT_GROUP, "Key bindings require group membership");
    error!(command = %permissions::ADD_TO_INPUT_GROUP, "Add user to input group");
    error!("  Then log out and back in");
    warn!(continuing = true, "Continuing without keyboard listening...");
}
