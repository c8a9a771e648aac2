//! Application-wide constants
//!
//! This module contains all magic numbers and string literals used throughout
//! the application, providing a single source of truth for constant values.

/// Input event constants (from evdev)
pub mod input {
    /// Key press event value
    pub const KEY_PRESS: i32 = 1;

    /// Key release event value
    pub const KEY_RELEASE: i32 = 0;

    /// Key repeat event value
    pub const KEY_REPEAT: i32 = 2;
}

/// Mouse button constants (X11 core protocol numbering)
pub mod mouse {
    /// Left mouse button number
    pub const BUTTON_LEFT: u8 = 1;
}

/// Filesystem paths
pub mod paths {
    /// Directory holding evdev input device nodes
    pub const DEV_INPUT: &str = "/dev/input";

    /// Prefix of evdev event device node names
    pub const EVENT_DEVICE_PREFIX: &str = "event";
}

/// Permission hints shown when input devices cannot be opened
pub mod permissions {
    /// Group granting read access to /dev/input
    pub const INPUT_GROUP: &str = "input";

    /// Command that adds the current user to the input group
    pub const ADD_TO_INPUT_GROUP: &str = "sudo usermod -aG input $USER";
}

/// Config file location and defaults
pub mod config {
    /// Directory under the XDG config dir
    pub const APP_DIR: &str = "keyclick";

    /// Config file name
    pub const FILENAME: &str = "config.json";

    /// Environment variable overriding the config file path
    pub const PATH_ENV: &str = "KEYCLICK_CONFIG";

    /// Window title matched when `require_foreground_window` is on
    pub const DEFAULT_TARGET_WINDOW_TITLE: &str = "Valeton";
}

/// System tray constants
pub mod tray {
    use std::time::Duration;

    /// D-Bus id of the tray item
    pub const ID: &str = "keyclick";

    /// Freedesktop icon name shown in the tray
    pub const ICON_NAME: &str = "input-mouse";

    /// How long to wait for the StatusNotifier host before giving up
    pub const START_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Control socket used by CLI subcommands to reach a running daemon
pub mod ipc {
    use std::time::Duration;

    /// Directory under `$XDG_RUNTIME_DIR` (or the cache dir)
    pub const SOCKET_DIR: &str = "keyclick";

    /// Socket file name
    pub const SOCKET_FILENAME: &str = "control.sock";

    /// Largest accepted message payload
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

    /// How long a connection waits for the dispatcher to answer
    pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
}
