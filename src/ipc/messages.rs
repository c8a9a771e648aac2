//! Control messages sent by CLI subcommands to a running daemon

use serde::{Deserialize, Serialize};

use crate::config::SettingChange;
use crate::event_handler::Intent;

/// Requests sent from the CLI to the daemon
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// Remove the binding for a key
    RemoveBinding(String),

    /// Change one setting
    ChangeSetting(SettingChange),
}

impl From<ControlRequest> for Intent {
    fn from(request: ControlRequest) -> Self {
        match request {
            ControlRequest::RemoveBinding(key) => Intent::Remove(key),
            ControlRequest::ChangeSetting(change) => Intent::SettingChanged(change),
        }
    }
}

/// Responses sent from the daemon back to the CLI
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    /// The dispatcher handled the request; carries its status line
    Done(String),

    /// The request never reached the dispatcher
    Failed(String),
}
