//! System tray front end (D-Bus StatusNotifierItem)
//!
//! The tray keeps a copy of what it displays, updated from dispatcher
//! notifications, and turns menu activations into intents.

use anyhow::{Context, Result, anyhow};
use ksni::TrayMethods;
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::config::{Point, SettingChange, Settings};
use crate::constants::tray;
use crate::event_handler::{AppEvent, Intent, Notification};
use crate::state_machine::AppState;

pub struct KeyClickTray {
    events: Sender<AppEvent>,
    state: AppState,
    bindings: BTreeMap<String, Point>,
    settings: Settings,
    status: String,
}

impl KeyClickTray {
    pub fn new(events: Sender<AppEvent>) -> Self {
        Self {
            events,
            state: AppState::Normal,
            bindings: BTreeMap::new(),
            settings: Settings::default(),
            status: String::new(),
        }
    }

    /// Mirror a dispatcher notification
    pub fn apply(&mut self, notification: Notification) {
        match notification {
            Notification::StateChanged(state) => self.state = state,
            Notification::BindingsChanged(bindings) => self.bindings = bindings,
            Notification::SettingsChanged(settings) => self.settings = settings,
            Notification::Status(text) => self.status = text,
        }
    }

    fn send(&self, intent: Intent) {
        if self.events.send(AppEvent::Intent(intent)).is_err() {
            warn!("Dispatcher gone, dropping tray action");
        }
    }

    fn toggle_label(&self) -> &'static str {
        if self.state == AppState::Disabled {
            "Enable"
        } else {
            "Disable"
        }
    }
}

impl ksni::Tray for KeyClickTray {
    fn id(&self) -> String {
        tray::ID.into()
    }

    fn title(&self) -> String {
        format!("KeyClick: {}", self.state)
    }

    fn icon_name(&self) -> String {
        tray::ICON_NAME.into()
    }

    fn tool_tip(&self) -> ksni::ToolTip {
        let mut description = format!("{} binding(s)", self.bindings.len());
        if !self.status.is_empty() {
            description.push('\n');
            description.push_str(&self.status);
        }
        ksni::ToolTip {
            icon_name: tray::ICON_NAME.into(),
            icon_pixmap: vec![],
            title: format!("KeyClick: {}", self.state),
            description,
        }
    }

    fn category(&self) -> ksni::Category {
        ksni::Category::ApplicationStatus
    }

    fn status(&self) -> ksni::Status {
        match self.state {
            AppState::ConfigWaitKey | AppState::ConfigWaitClick => ksni::Status::NeedsAttention,
            AppState::Normal | AppState::Disabled => ksni::Status::Active,
        }
    }

    fn menu(&self) -> Vec<ksni::MenuItem<Self>> {
        use ksni::menu::*;

        let configuring = matches!(self.state, AppState::ConfigWaitKey | AppState::ConfigWaitClick);

        let remove_items: Vec<MenuItem<Self>> = if self.bindings.is_empty() {
            vec![
                StandardItem {
                    label: "No bindings".to_string(),
                    enabled: false,
                    ..Default::default()
                }
                .into(),
            ]
        } else {
            self.bindings
                .iter()
                .map(|(key, point)| {
                    let key = key.clone();
                    StandardItem {
                        label: format!("{key} → {point}"),
                        activate: Box::new(move |this: &mut Self| {
                            this.send(Intent::Remove(key.clone()));
                        }),
                        ..Default::default()
                    }
                    .into()
                })
                .collect()
        };

        vec![
            StandardItem {
                label: self.state.to_string(),
                enabled: false,
                ..Default::default()
            }
            .into(),
            MenuItem::Separator,
            StandardItem {
                label: "Add Key Binding".to_string(),
                icon_name: "list-add".into(),
                enabled: !configuring && self.state != AppState::Disabled,
                activate: Box::new(|this: &mut Self| {
                    this.send(Intent::StartConfigure);
                }),
                ..Default::default()
            }
            .into(),
            SubMenu {
                label: "Remove Binding".to_string(),
                icon_name: "list-remove".into(),
                submenu: remove_items,
                ..Default::default()
            }
            .into(),
            StandardItem {
                label: self.toggle_label().to_string(),
                enabled: !configuring,
                activate: Box::new(|this: &mut Self| {
                    this.send(Intent::ToggleEnabled);
                }),
                ..Default::default()
            }
            .into(),
            MenuItem::Separator,
            CheckmarkItem {
                label: "Restore Mouse Position".to_string(),
                checked: self.settings.restore_mouse_position,
                activate: Box::new(|this: &mut Self| {
                    let value = !this.settings.restore_mouse_position;
                    this.send(Intent::SettingChanged(SettingChange::RestoreMousePosition(value)));
                }),
                ..Default::default()
            }
            .into(),
            CheckmarkItem {
                label: format!("Require \"{}\" Focused", self.settings.target_window_title),
                checked: self.settings.require_foreground_window,
                activate: Box::new(|this: &mut Self| {
                    let value = !this.settings.require_foreground_window;
                    let change = SettingChange::RequireForegroundWindow(value);
                    this.send(Intent::SettingChanged(change));
                }),
                ..Default::default()
            }
            .into(),
            MenuItem::Separator,
            StandardItem {
                label: "Quit".to_string(),
                icon_name: "application-exit".into(),
                activate: Box::new(|this: &mut Self| {
                    this.send(Intent::Quit);
                }),
                ..Default::default()
            }
            .into(),
        ]
    }
}

/// Run the tray on its own thread until `notifications` disconnects.
/// Returns once the tray is registered, or an error if that fails.
pub fn start_system_tray(
    events: Sender<AppEvent>,
    notifications: Receiver<Notification>,
) -> Result<JoinHandle<()>> {
    let tray = KeyClickTray::new(events);
    let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
    let readiness = Readiness::new(ready_tx);
    let reporter = readiness.clone();

    info!("Spawning system tray runtime thread...");

    let tray_thread = thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                reporter.report(Err(anyhow!(
                    "Failed to create Tokio runtime for system tray: {e}"
                )));
                return;
            }
        };

        rt.block_on(async move {
            let handle = match tray.spawn().await {
                Ok(handle) => handle,
                Err(e) => {
                    reporter.report(Err(anyhow!("System tray error: {e}")));
                    return;
                }
            };
            if !reporter.report(Ok(())) {
                warn!("System tray registered after startup timeout, shutting it down");
                handle.shutdown().await;
                return;
            }
            info!("System tray spawned successfully");

            // Bridge the blocking notification channel into the runtime
            let (async_tx, mut async_rx) = tokio::sync::mpsc::unbounded_channel();
            thread::spawn(move || {
                for notification in notifications.iter() {
                    if async_tx.send(notification).is_err() {
                        break;
                    }
                }
            });

            while let Some(notification) = async_rx.recv().await {
                handle.update(|tray: &mut KeyClickTray| tray.apply(notification)).await;
            }

            info!("Dispatcher closed - shutting down system tray");
            handle.shutdown().await;
        });
    });

    match ready_rx.recv_timeout(tray::START_TIMEOUT) {
        Ok(result) => {
            result.context("System tray failed to start")?;
            Ok(tray_thread)
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            readiness.abandon();
            // A report may have landed between the timeout and abandoning
            match ready_rx.try_recv() {
                Ok(result) => {
                    result.context("System tray failed to start")?;
                    Ok(tray_thread)
                }
                Err(_) => Err(anyhow!("Timed out waiting for system tray to start")),
            }
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            let _ = tray_thread.join();
            Err(anyhow!("System tray thread exited before signaling readiness"))
        }
    }
}

/// Startup handoff from the tray thread. Once abandoned, later reports are
/// refused so a tray that registers too late knows to shut itself down.
#[derive(Clone)]
struct Readiness(Arc<Mutex<Option<Sender<Result<()>>>>>);

impl Readiness {
    fn new(tx: Sender<Result<()>>) -> Self {
        Self(Arc::new(Mutex::new(Some(tx))))
    }

    /// Returns `false` when nobody is waiting for the result any more
    fn report(&self, result: Result<()>) -> bool {
        let Ok(guard) = self.0.lock() else {
            return false;
        };
        match guard.as_ref().map(|tx| tx.send(result)) {
            Some(Ok(())) => true,
            Some(Err(err)) => {
                debug!("System tray readiness receiver dropped: {}", err);
                false
            }
            None => {
                debug!("System tray startup was abandoned");
                false
            }
        }
    }

    fn abandon(&self) {
        if let Ok(mut guard) = self.0.lock() {
            guard.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksni::Tray;
    use ksni::menu::MenuItem;

    fn tray() -> (KeyClickTray, Receiver<AppEvent>) {
        let (tx, rx) = mpsc::channel();
        (KeyClickTray::new(tx), rx)
    }

    fn activate(tray: &mut KeyClickTray, items: Vec<MenuItem<KeyClickTray>>, label: &str) -> bool {
        for item in items {
            match item {
                MenuItem::Standard(standard) if standard.label.contains(label) => {
                    (standard.activate)(tray);
                    return true;
                }
                MenuItem::Checkmark(check) if check.label.contains(label) => {
                    (check.activate)(tray);
                    return true;
                }
                MenuItem::SubMenu(sub) => {
                    if activate(tray, sub.submenu, label) {
                        return true;
                    }
                }
                _ => {}
            }
        }
        false
    }

    fn next_intent(rx: &Receiver<AppEvent>) -> Intent {
        match rx.try_recv().unwrap() {
            AppEvent::Intent(intent) => intent,
            other => panic!("expected an intent, got {other:?}"),
        }
    }

    fn activate_menu_item(tray: &mut KeyClickTray, label: &str) {
        let items = tray.menu();
        assert!(activate(tray, items, label), "Menu item '{label}' not found");
    }

    #[test]
    fn test_add_binding_sends_start_configure() {
        let (mut tray, rx) = tray();
        activate_menu_item(&mut tray, "Add Key Binding");
        assert_eq!(next_intent(&rx), Intent::StartConfigure);
    }

    #[test]
    fn test_quit_sends_quit() {
        let (mut tray, rx) = tray();
        activate_menu_item(&mut tray, "Quit");
        assert_eq!(next_intent(&rx), Intent::Quit);
    }

    #[test]
    fn test_toggle_label_follows_state() {
        let (mut tray, rx) = tray();
        assert_eq!(tray.toggle_label(), "Disable");
        tray.apply(Notification::StateChanged(AppState::Disabled));
        assert_eq!(tray.toggle_label(), "Enable");

        activate_menu_item(&mut tray, "Enable");
        assert_eq!(next_intent(&rx), Intent::ToggleEnabled);
    }

    #[test]
    fn test_checkmarks_send_inverted_setting() {
        let (mut tray, rx) = tray();
        activate_menu_item(&mut tray, "Restore Mouse Position");
        assert_eq!(
            next_intent(&rx),
            Intent::SettingChanged(SettingChange::RestoreMousePosition(false))
        );

        activate_menu_item(&mut tray, "Focused");
        assert_eq!(
            next_intent(&rx),
            Intent::SettingChanged(SettingChange::RequireForegroundWindow(true))
        );
    }

    #[test]
    fn test_remove_submenu_lists_bindings() {
        let (mut tray, rx) = tray();
        tray.apply(Notification::BindingsChanged(BTreeMap::from([
            ("f1".to_string(), Point::new(100, 200)),
            ("space".to_string(), Point::new(3, 4)),
        ])));

        activate_menu_item(&mut tray, "space → (3, 4)");

        assert_eq!(next_intent(&rx), Intent::Remove("space".into()));
    }

    #[test]
    fn test_readiness_refused_after_abandon() {
        let (tx, rx) = mpsc::channel();
        let readiness = Readiness::new(tx);
        let reporter = readiness.clone();

        assert!(reporter.report(Ok(())));
        readiness.abandon();

        assert!(!reporter.report(Ok(())));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_readiness_receiver_dropped() {
        let (tx, rx) = mpsc::channel();
        let readiness = Readiness::new(tx);
        drop(rx);

        assert!(!readiness.report(Ok(())));
    }

    #[test]
    fn test_title_shows_state_and_status() {
        let (mut tray, _rx) = tray();
        tray.apply(Notification::StateChanged(AppState::ConfigWaitKey));
        tray.apply(Notification::Status("Press the key you want to configure…".into()));

        assert_eq!(tray.title(), "KeyClick: CONFIG: press a key");
        assert!(tray.tool_tip().description.contains("Press the key"));
        assert!(matches!(tray.status(), ksni::Status::NeedsAttention));
    }
}
