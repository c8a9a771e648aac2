//! Application states and the transitions allowed between them

use std::fmt;

/// Exactly one is active at any time; every process starts in `Normal`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AppState {
    /// Listening for bound keys and clicking
    #[default]
    Normal,
    /// Waiting for the key to bind
    ConfigWaitKey,
    /// Waiting for the click that sets the coordinate
    ConfigWaitClick,
    /// Paused, bound keys do nothing
    Disabled,
}

impl AppState {
    /// States reachable from `self` in one step
    pub fn allowed_targets(self) -> &'static [AppState] {
        match self {
            AppState::Normal => &[AppState::ConfigWaitKey, AppState::Disabled],
            AppState::ConfigWaitKey => &[AppState::ConfigWaitClick, AppState::Normal],
            AppState::ConfigWaitClick => &[AppState::Normal],
            AppState::Disabled => &[AppState::Normal],
        }
    }

    pub fn can_transition_to(self, target: AppState) -> bool {
        self == target || self.allowed_targets().contains(&target)
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AppState::Normal => "NORMAL",
            AppState::ConfigWaitKey => "CONFIG: press a key",
            AppState::ConfigWaitClick => "CONFIG: click target",
            AppState::Disabled => "DISABLED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Default)]
pub struct StateMachine {
    state: AppState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    /// Attempt a transition.
    ///
    /// Moving to the current state is a successful no-op. Disallowed targets
    /// leave the state untouched and return `false`.
    pub fn transition(&mut self, target: AppState) -> bool {
        if !self.state.can_transition_to(target) {
            return false;
        }
        self.state = target;
        true
    }

    pub fn is_normal(&self) -> bool {
        self.state == AppState::Normal
    }

    pub fn is_config(&self) -> bool {
        matches!(self.state, AppState::ConfigWaitKey | AppState::ConfigWaitClick)
    }

    pub fn is_disabled(&self) -> bool {
        self.state == AppState::Disabled
    }

    #[cfg(test)]
    pub(crate) fn with_state(state: AppState) -> Self {
        Self { state }
    }
}
