//! Event dispatch
//!
//! All application state is owned by [`Dispatcher`] and only mutated on the
//! thread that calls [`Dispatcher::run`]. Listener, tray and signal threads
//! hand their events over an mpsc channel as [`AppEvent`]s.

use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::config::{Point, SettingChange, Settings, Store};
use crate::state_machine::{AppState, StateMachine};

/// Everything the dispatcher reacts to
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// Normalized key name of a key-down
    KeyPressed(String),
    /// The one-shot click capture saw a left press here
    MouseCaptured { x: i32, y: i32 },
    Intent(Intent),
    /// Intent from the control socket; the resulting status line is sent to `reply`
    Remote { intent: Intent, reply: Sender<String> },
}

/// User requests from the tray, CLI or signal handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    StartConfigure,
    Remove(String),
    ToggleEnabled,
    SettingChanged(SettingChange),
    Quit,
}

/// Outbound updates for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    StateChanged(AppState),
    BindingsChanged(BTreeMap<String, Point>),
    SettingsChanged(Settings),
    Status(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Performs the click for a bound key
pub trait Actuator {
    /// Move to `point`, left-click, and move back when `restore` is set
    fn click_at(&mut self, point: Point, restore: bool) -> Result<()>;

    /// Whether the focused window's title contains `title` (case-insensitive).
    /// Must return `true` when focus cannot be determined.
    fn is_window_focused(&mut self, title: &str) -> bool;
}

/// One-shot capture of the next left click, delivered as [`AppEvent::MouseCaptured`]
pub trait ClickCapture {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);
}

pub struct Dispatcher<A, C> {
    machine: StateMachine,
    store: Store,
    actuator: A,
    capture: C,
    /// Key captured in `ConfigWaitKey`, waiting for its coordinate
    pending_key: Option<String>,
    subscribers: Vec<Sender<Notification>>,
    /// Most recent status line, reported back to remote callers
    last_status: Option<String>,
}

impl<A: Actuator, C: ClickCapture> Dispatcher<A, C> {
    pub fn new(store: Store, actuator: A, capture: C) -> Self {
        Self {
            machine: StateMachine::new(),
            store,
            actuator,
            capture,
            pending_key: None,
            subscribers: Vec::new(),
            last_status: None,
        }
    }

    pub fn state(&self) -> AppState {
        self.machine.state()
    }

    #[cfg(test)]
    pub fn store(&self) -> &Store {
        &self.store
    }

    #[cfg(test)]
    pub fn pending_key(&self) -> Option<&str> {
        self.pending_key.as_deref()
    }

    /// Register an observer. It immediately receives the current state,
    /// bindings and settings.
    pub fn subscribe(&mut self) -> Receiver<Notification> {
        let (tx, rx) = mpsc::channel();
        for notification in [
            Notification::StateChanged(self.machine.state()),
            Notification::BindingsChanged(self.store.bindings().clone()),
            Notification::SettingsChanged(self.store.settings().clone()),
        ] {
            let _ = tx.send(notification);
        }
        self.subscribers.push(tx);
        rx
    }

    /// Process events until a quit intent arrives or every sender is gone
    pub fn run(&mut self, events: &Receiver<AppEvent>) {
        self.status("Ready: press a mapped key or add a new mapping.");
        for event in events.iter() {
            if self.handle(event) == Flow::Quit {
                return;
            }
        }
        warn!("All event senders dropped, leaving event loop");
        self.capture.stop();
    }

    pub fn handle(&mut self, event: AppEvent) -> Flow {
        debug!(event = ?event, state = ?self.machine.state(), "Handling event");
        match event {
            AppEvent::KeyPressed(key) => {
                self.on_key_pressed(&key);
            }
            AppEvent::MouseCaptured { x, y } => {
                self.on_mouse_captured(Point::new(x, y));
            }
            AppEvent::Intent(Intent::StartConfigure) => {
                self.start_configure();
            }
            AppEvent::Intent(Intent::Remove(key)) => {
                self.remove_binding(&key);
            }
            AppEvent::Intent(Intent::ToggleEnabled) => {
                self.toggle_enabled();
            }
            AppEvent::Intent(Intent::SettingChanged(change)) => {
                self.change_setting(&change);
            }
            AppEvent::Intent(Intent::Quit) => {
                info!("Quit requested");
                self.capture.stop();
                return Flow::Quit;
            }
            AppEvent::Remote { intent, reply } => {
                self.last_status = None;
                let flow = self.handle(AppEvent::Intent(intent));
                let status = self.last_status.take().unwrap_or_else(|| "Done.".to_string());
                if reply.send(status).is_err() {
                    debug!("Remote caller went away before the reply");
                }
                return flow;
            }
        }
        Flow::Continue
    }

    /// Route a key-down. Returns `true` when it produced a click.
    pub fn on_key_pressed(&mut self, key: &str) -> bool {
        match self.machine.state() {
            AppState::ConfigWaitKey => {
                self.capture_key(key);
                false
            }
            AppState::Normal => self.dispatch_key(key),
            AppState::ConfigWaitClick | AppState::Disabled => false,
        }
    }

    fn capture_key(&mut self, key: &str) {
        info!(key = %key, "Captured key for new binding");
        self.pending_key = Some(key.to_string());
        self.transition(AppState::ConfigWaitClick);

        if let Err(e) = self.capture.start() {
            error!(error = ?e, "Failed to start mouse click capture");
            self.status(format!("Mouse capture unavailable: {e}"));
            self.transition(AppState::Normal);
            return;
        }
        self.status(format!(
            "Key \"{key}\" captured. Now click on the target screen position."
        ));
    }

    fn dispatch_key(&mut self, key: &str) -> bool {
        let Some(point) = self.store.get(key) else {
            return false;
        };

        let settings = self.store.settings();
        let restore = settings.restore_mouse_position;
        if settings.require_foreground_window {
            let title = settings.target_window_title.clone();
            if !self.actuator.is_window_focused(&title) {
                debug!(key = %key, title = %title, "Target window not focused, skipping click");
                return false;
            }
        }

        match self.actuator.click_at(point, restore) {
            Ok(()) => {
                info!(key = %key, x = point.x, y = point.y, restore, "Executed click");
                self.status(format!("Executed click at {point} for key \"{key}\"."));
                true
            }
            Err(e) => {
                error!(key = %key, x = point.x, y = point.y, error = ?e, "Click failed");
                self.status(format!("Click for key \"{key}\" failed: {e}"));
                false
            }
        }
    }

    /// Commit the pending binding. Returns `true` when one was saved.
    pub fn on_mouse_captured(&mut self, point: Point) -> bool {
        if self.machine.state() != AppState::ConfigWaitClick {
            debug!(
                x = point.x,
                y = point.y,
                state = ?self.machine.state(),
                "Dropping stale mouse capture"
            );
            return false;
        }

        let committed = match self.pending_key.take() {
            Some(key) => {
                if let Err(e) = self.store.set(&key, point) {
                    error!(key = %key, error = ?e, "Failed to persist binding");
                }
                self.notify(Notification::BindingsChanged(self.store.bindings().clone()));
                self.status(format!("Mapping saved: \"{key}\" → {point}"));
                true
            }
            None => {
                warn!("Mouse captured with no pending key");
                false
            }
        };

        self.transition(AppState::Normal);
        committed
    }

    /// Enter the configuration flow. Returns `true` when now waiting for a key.
    pub fn start_configure(&mut self) -> bool {
        if self.machine.is_disabled() {
            self.status("Enable the system before adding keys.");
            return false;
        }
        if self.transition(AppState::ConfigWaitKey) {
            self.status("Press the key you want to configure…");
            return true;
        }
        false
    }

    /// Remove a binding in any state. Returns whether it existed.
    pub fn remove_binding(&mut self, key: &str) -> bool {
        if key.trim().is_empty() {
            self.status("Select a mapping to remove first.");
            return false;
        }

        let removed = match self.store.remove(key) {
            Ok(removed) => removed,
            Err(e) => {
                error!(key = %key, error = ?e, "Failed to persist binding removal");
                true
            }
        };

        if removed {
            info!(key = %key, "Removed binding");
            self.notify(Notification::BindingsChanged(self.store.bindings().clone()));
            self.status(format!("Removed mapping for \"{key}\"."));
        } else {
            self.status(format!("Key \"{key}\" not found."));
        }
        removed
    }

    /// Flip between `Normal` and `Disabled`; ignored while configuring
    pub fn toggle_enabled(&mut self) {
        if self.machine.is_config() {
            debug!(state = ?self.machine.state(), "Toggle ignored during configuration");
            return;
        }
        if self.machine.is_disabled() {
            self.transition(AppState::Normal);
            self.status("System enabled.");
        } else if self.machine.is_normal() {
            self.transition(AppState::Disabled);
            self.status("System disabled: no keys will trigger clicks.");
        }
    }

    pub fn change_setting(&mut self, change: &SettingChange) {
        if let Err(e) = self.store.apply(change) {
            error!(error = ?e, "Failed to persist setting");
        }
        info!(setting = change.name(), value = %change, "Setting updated");
        self.notify(Notification::SettingsChanged(self.store.settings().clone()));
        self.status(format!("Setting \"{}\" updated to {change}.", change.name()));
    }

    /// Validated transition with side effects: state-changed notification on
    /// actual change, pending key cleared on return to `Normal`, click capture
    /// stopped when leaving `ConfigWaitClick`.
    fn transition(&mut self, target: AppState) -> bool {
        let previous = self.machine.state();
        if !self.machine.transition(target) {
            debug!(from = ?previous, to = ?target, "Rejected state transition");
            return false;
        }
        if previous == target {
            return true;
        }

        info!(from = %previous, to = %target, "State changed");
        if target == AppState::Normal {
            self.pending_key = None;
        }
        if previous == AppState::ConfigWaitClick {
            self.capture.stop();
        }
        self.notify(Notification::StateChanged(target));
        true
    }

    fn status(&mut self, text: impl Into<String>) {
        let text = text.into();
        info!(status = %text);
        self.last_status = Some(text.clone());
        self.notify(Notification::Status(text));
    }

    fn notify(&mut self, notification: Notification) {
        self.subscribers
            .retain(|subscriber| subscriber.send(notification.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn parts(&self) -> (&A, &C) {
        (&self.actuator, &self.capture)
    }

    #[cfg(test)]
    pub(crate) fn parts_mut(&mut self) -> (&mut A, &mut C) {
        (&mut self.actuator, &mut self.capture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingActuator {
        clicks: Vec<(Point, bool)>,
        focus_queries: Vec<String>,
        unfocused: bool,
        fail: bool,
    }

    impl Actuator for RecordingActuator {
        fn click_at(&mut self, point: Point, restore: bool) -> Result<()> {
            if self.fail {
                return Err(anyhow!("no display"));
            }
            self.clicks.push((point, restore));
            Ok(())
        }

        fn is_window_focused(&mut self, title: &str) -> bool {
            self.focus_queries.push(title.to_string());
            !self.unfocused
        }
    }

    #[derive(Default)]
    struct RecordingCapture {
        starts: usize,
        stops: usize,
        fail: bool,
    }

    impl ClickCapture for RecordingCapture {
        fn start(&mut self) -> Result<()> {
            if self.fail {
                return Err(anyhow!("permission denied"));
            }
            self.starts += 1;
            Ok(())
        }

        fn stop(&mut self) {
            self.stops += 1;
        }
    }

    type TestDispatcher = Dispatcher<RecordingActuator, RecordingCapture>;

    fn dispatcher() -> (TempDir, TestDispatcher) {
        let dir = TempDir::new().unwrap();
        let store = Store::load(dir.path().join("config.json"));
        let dispatcher =
            Dispatcher::new(store, RecordingActuator::default(), RecordingCapture::default());
        (dir, dispatcher)
    }

    fn drain(rx: &Receiver<Notification>) -> Vec<Notification> {
        rx.try_iter().collect()
    }

    fn bind(dispatcher: &mut TestDispatcher, key: &str, x: i32, y: i32) {
        assert!(dispatcher.start_configure());
        dispatcher.on_key_pressed(key);
        assert!(dispatcher.on_mouse_captured(Point::new(x, y)));
    }

    #[test]
    fn test_bind_then_dispatch_scenario() {
        let (_dir, mut dispatcher) = dispatcher();

        dispatcher.handle(AppEvent::Intent(Intent::StartConfigure));
        assert_eq!(dispatcher.state(), AppState::ConfigWaitKey);
        dispatcher.handle(AppEvent::KeyPressed("f1".into()));
        assert_eq!(dispatcher.state(), AppState::ConfigWaitClick);
        dispatcher.handle(AppEvent::MouseCaptured { x: 100, y: 200 });
        assert_eq!(dispatcher.state(), AppState::Normal);

        dispatcher.handle(AppEvent::KeyPressed("f1".into()));

        let (actuator, _) = dispatcher.parts();
        assert_eq!(actuator.clicks, vec![(Point::new(100, 200), true)]);
        assert!(actuator.focus_queries.is_empty());
    }

    #[test]
    fn test_any_key_is_captured_in_wait_key() {
        for key in ["a", "space", "ctrl_l", "vk_113", "esc"] {
            let (_dir, mut dispatcher) = dispatcher();
            dispatcher.start_configure();

            assert!(!dispatcher.on_key_pressed(key));

            assert_eq!(dispatcher.state(), AppState::ConfigWaitClick);
            assert_eq!(dispatcher.pending_key(), Some(key));
            assert_eq!(dispatcher.parts().1.starts, 1);
        }
    }

    #[test]
    fn test_second_click_is_noop() {
        let (_dir, mut dispatcher) = dispatcher();
        bind(&mut dispatcher, "f1", 100, 200);
        assert_eq!(dispatcher.pending_key(), None);

        assert!(!dispatcher.on_mouse_captured(Point::new(5, 5)));

        assert_eq!(dispatcher.state(), AppState::Normal);
        assert_eq!(dispatcher.store().get("f1"), Some(Point::new(100, 200)));
        assert_eq!(dispatcher.store().bindings().len(), 1);
    }

    #[test]
    fn test_commit_stops_capture() {
        let (_dir, mut dispatcher) = dispatcher();
        bind(&mut dispatcher, "g", 1, 2);
        assert_eq!(dispatcher.parts().1.stops, 1);
    }

    #[test]
    fn test_stale_click_in_normal_is_dropped() {
        let (_dir, mut dispatcher) = dispatcher();
        let rx = dispatcher.subscribe();
        drain(&rx);

        assert!(!dispatcher.on_mouse_captured(Point::new(1, 1)));

        assert!(dispatcher.store().bindings().is_empty());
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_unmapped_key_is_ignored() {
        let (_dir, mut dispatcher) = dispatcher();
        let rx = dispatcher.subscribe();
        drain(&rx);

        assert!(!dispatcher.on_key_pressed("z"));

        assert!(dispatcher.parts().0.clicks.is_empty());
        assert_eq!(dispatcher.state(), AppState::Normal);
        assert!(drain(&rx).is_empty());
    }

    #[test]
    fn test_foreground_required_and_not_focused() {
        let (_dir, mut dispatcher) = dispatcher();
        bind(&mut dispatcher, "f1", 100, 200);
        dispatcher.change_setting(&SettingChange::RequireForegroundWindow(true));
        dispatcher.parts_mut().0.unfocused = true;

        assert!(!dispatcher.on_key_pressed("f1"));

        let (actuator, _) = dispatcher.parts();
        assert!(actuator.clicks.is_empty());
        assert_eq!(actuator.focus_queries, vec!["Valeton".to_string()]);
        assert_eq!(dispatcher.state(), AppState::Normal);
    }

    #[test]
    fn test_foreground_required_and_focused() {
        let (_dir, mut dispatcher) = dispatcher();
        bind(&mut dispatcher, "f1", 100, 200);
        dispatcher.change_setting(&SettingChange::RequireForegroundWindow(true));
        dispatcher.change_setting(&SettingChange::RestoreMousePosition(false));

        assert!(dispatcher.on_key_pressed("f1"));

        assert_eq!(dispatcher.parts().0.clicks, vec![(Point::new(100, 200), false)]);
    }

    #[test]
    fn test_keys_ignored_while_waiting_for_click_or_disabled() {
        let (_dir, mut dispatcher) = dispatcher();
        bind(&mut dispatcher, "f1", 100, 200);

        dispatcher.start_configure();
        dispatcher.on_key_pressed("a");
        assert!(!dispatcher.on_key_pressed("f1"));
        assert_eq!(dispatcher.pending_key(), Some("a"));
        assert_eq!(dispatcher.state(), AppState::ConfigWaitClick);
        dispatcher.on_mouse_captured(Point::new(0, 0));

        dispatcher.toggle_enabled();
        assert_eq!(dispatcher.state(), AppState::Disabled);
        assert!(!dispatcher.on_key_pressed("f1"));
        assert!(dispatcher.parts().0.clicks.is_empty());
    }

    #[test]
    fn test_start_configure_rejected_when_disabled() {
        let (_dir, mut dispatcher) = dispatcher();
        dispatcher.toggle_enabled();
        let rx = dispatcher.subscribe();
        drain(&rx);

        assert!(!dispatcher.start_configure());

        assert_eq!(dispatcher.state(), AppState::Disabled);
        assert_eq!(
            drain(&rx),
            vec![Notification::Status("Enable the system before adding keys.".into())]
        );
    }

    #[test]
    fn test_start_configure_while_waiting_for_click() {
        let (_dir, mut dispatcher) = dispatcher();
        dispatcher.start_configure();
        dispatcher.on_key_pressed("a");

        assert!(!dispatcher.start_configure());
        assert_eq!(dispatcher.state(), AppState::ConfigWaitClick);
    }

    #[test]
    fn test_toggle() {
        let (_dir, mut dispatcher) = dispatcher();
        dispatcher.toggle_enabled();
        assert_eq!(dispatcher.state(), AppState::Disabled);
        dispatcher.toggle_enabled();
        assert_eq!(dispatcher.state(), AppState::Normal);

        dispatcher.start_configure();
        dispatcher.toggle_enabled();
        assert_eq!(dispatcher.state(), AppState::ConfigWaitKey);

        dispatcher.on_key_pressed("a");
        dispatcher.toggle_enabled();
        assert_eq!(dispatcher.state(), AppState::ConfigWaitClick);
    }

    #[test]
    fn test_remove_in_any_state() {
        let (_dir, mut dispatcher) = dispatcher();
        bind(&mut dispatcher, "f1", 100, 200);
        dispatcher.toggle_enabled();

        assert!(dispatcher.remove_binding("f1"));
        assert!(!dispatcher.remove_binding("f1"));
        assert!(!dispatcher.remove_binding(""));
        assert_eq!(dispatcher.state(), AppState::Disabled);
        assert!(dispatcher.store().bindings().is_empty());
    }

    #[test]
    fn test_capture_failure_returns_to_normal() {
        let (_dir, mut dispatcher) = dispatcher();
        dispatcher.parts_mut().1.fail = true;
        dispatcher.start_configure();

        dispatcher.on_key_pressed("a");

        assert_eq!(dispatcher.state(), AppState::Normal);
        assert_eq!(dispatcher.pending_key(), None);
    }

    #[test]
    fn test_click_failure_leaves_state() {
        let (_dir, mut dispatcher) = dispatcher();
        bind(&mut dispatcher, "f1", 1, 1);
        dispatcher.parts_mut().0.fail = true;

        assert!(!dispatcher.on_key_pressed("f1"));
        assert_eq!(dispatcher.state(), AppState::Normal);
    }

    #[test]
    fn test_notifications_for_configure_flow() {
        let (_dir, mut dispatcher) = dispatcher();
        let rx = dispatcher.subscribe();
        let initial = drain(&rx);
        assert_eq!(initial[0], Notification::StateChanged(AppState::Normal));
        assert_eq!(initial[1], Notification::BindingsChanged(BTreeMap::new()));

        bind(&mut dispatcher, "f1", 100, 200);

        let states: Vec<AppState> = drain(&rx)
            .into_iter()
            .filter_map(|n| match n {
                Notification::StateChanged(state) => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![AppState::ConfigWaitKey, AppState::ConfigWaitClick, AppState::Normal]
        );
    }

    #[test]
    fn test_self_transition_does_not_notify() {
        let (_dir, mut dispatcher) = dispatcher();
        dispatcher.start_configure();
        let rx = dispatcher.subscribe();
        drain(&rx);

        assert!(dispatcher.start_configure());

        assert!(
            !drain(&rx)
                .iter()
                .any(|n| matches!(n, Notification::StateChanged(_)))
        );
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let (_dir, mut dispatcher) = dispatcher();
        drop(dispatcher.subscribe());
        let rx = dispatcher.subscribe();

        dispatcher.toggle_enabled();

        assert_eq!(dispatcher.subscribers.len(), 1);
        assert!(drain(&rx).contains(&Notification::StateChanged(AppState::Disabled)));
    }

    #[test]
    fn test_setting_change_keeps_state() {
        let (dir, mut dispatcher) = dispatcher();
        dispatcher.start_configure();

        dispatcher.handle(AppEvent::Intent(Intent::SettingChanged(
            SettingChange::TargetWindowTitle("Editor".into()),
        )));

        assert_eq!(dispatcher.state(), AppState::ConfigWaitKey);
        let reloaded = Store::load(dir.path().join("config.json"));
        assert_eq!(reloaded.settings().target_window_title, "Editor");
    }

    #[test]
    fn test_remote_intent_replies_with_status() {
        let (_dir, mut dispatcher) = dispatcher();
        bind(&mut dispatcher, "f1", 100, 200);
        let (reply_tx, reply_rx) = mpsc::channel();

        let flow = dispatcher.handle(AppEvent::Remote {
            intent: Intent::Remove("f1".into()),
            reply: reply_tx,
        });

        assert_eq!(flow, Flow::Continue);
        assert_eq!(reply_rx.try_recv().unwrap(), "Removed mapping for \"f1\".");
        assert!(!dispatcher.on_key_pressed("f1"));
        assert!(dispatcher.parts().0.clicks.is_empty());
    }

    #[test]
    fn test_remote_setting_change_survives_later_save() {
        let (dir, mut dispatcher) = dispatcher();
        let (reply_tx, reply_rx) = mpsc::channel();

        dispatcher.handle(AppEvent::Remote {
            intent: Intent::SettingChanged(SettingChange::TargetWindowTitle("Editor".into())),
            reply: reply_tx,
        });
        bind(&mut dispatcher, "f2", 1, 2);

        assert_eq!(
            reply_rx.try_recv().unwrap(),
            "Setting \"target_window_title\" updated to \"Editor\"."
        );
        let reloaded = Store::load(dir.path().join("config.json"));
        assert_eq!(reloaded.settings().target_window_title, "Editor");
        assert_eq!(reloaded.get("f2"), Some(Point::new(1, 2)));
    }

    #[test]
    fn test_run_stops_on_quit() {
        let (_dir, mut dispatcher) = dispatcher();
        let (tx, rx) = mpsc::channel();
        tx.send(AppEvent::Intent(Intent::StartConfigure)).unwrap();
        tx.send(AppEvent::Intent(Intent::Quit)).unwrap();
        tx.send(AppEvent::Intent(Intent::ToggleEnabled)).unwrap();

        dispatcher.run(&rx);

        assert_eq!(dispatcher.state(), AppState::ConfigWaitKey);
        assert_eq!(rx.try_iter().count(), 1);
    }
}
