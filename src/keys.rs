//! Canonical key names
//!
//! Every binding is stored under a lowercase name derived from the physical
//! key: `a`, `7`, `f1`, `space`, `ctrl_l`, ... Keys without a friendly name
//! fall back to `vk_<evdev code>` so they can still be bound.

use evdev::Key;

/// Canonical name for a physical key.
pub fn key_name(key: Key) -> String {
    match named(key) {
        Some(name) => name.to_string(),
        None => format!("vk_{}", key.code()),
    }
}

/// Canonicalize a user-entered key name (CLI, config edits).
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// True for mouse, joystick and gamepad buttons, which share the key code space.
pub fn is_button(key: Key) -> bool {
    let code = key.code();
    (Key::BTN_0.code()..=Key::BTN_GEAR_UP.code()).contains(&code)
        || (Key::BTN_DPAD_UP.code()..=Key::BTN_DPAD_RIGHT.code()).contains(&code)
        || (Key::BTN_TRIGGER_HAPPY1.code()..=Key::BTN_TRIGGER_HAPPY40.code()).contains(&code)
}

fn named(key: Key) -> Option<&'static str> {
    let name = match key {
        Key::KEY_A => "a",
        Key::KEY_B => "b",
        Key::KEY_C => "c",
        Key::KEY_D => "d",
        Key::KEY_E => "e",
        Key::KEY_F => "f",
        Key::KEY_G => "g",
        Key::KEY_H => "h",
        Key::KEY_I => "i",
        Key::KEY_J => "j",
        Key::KEY_K => "k",
        Key::KEY_L => "l",
        Key::KEY_M => "m",
        Key::KEY_N => "n",
        Key::KEY_O => "o",
        Key::KEY_P => "p",
        Key::KEY_Q => "q",
        Key::KEY_R => "r",
        Key::KEY_S => "s",
        Key::KEY_T => "t",
        Key::KEY_U => "u",
        Key::KEY_V => "v",
        Key::KEY_W => "w",
        Key::KEY_X => "x",
        Key::KEY_Y => "y",
        Key::KEY_Z => "z",

        Key::KEY_0 => "0",
        Key::KEY_1 => "1",
        Key::KEY_2 => "2",
        Key::KEY_3 => "3",
        Key::KEY_4 => "4",
        Key::KEY_5 => "5",
        Key::KEY_6 => "6",
        Key::KEY_7 => "7",
        Key::KEY_8 => "8",
        Key::KEY_9 => "9",

        // Unshifted US layout characters
        Key::KEY_MINUS => "-",
        Key::KEY_EQUAL => "=",
        Key::KEY_LEFTBRACE => "[",
        Key::KEY_RIGHTBRACE => "]",
        Key::KEY_BACKSLASH => "\\",
        Key::KEY_SEMICOLON => ";",
        Key::KEY_APOSTROPHE => "'",
        Key::KEY_GRAVE => "`",
        Key::KEY_COMMA => ",",
        Key::KEY_DOT => ".",
        Key::KEY_SLASH => "/",

        Key::KEY_F1 => "f1",
        Key::KEY_F2 => "f2",
        Key::KEY_F3 => "f3",
        Key::KEY_F4 => "f4",
        Key::KEY_F5 => "f5",
        Key::KEY_F6 => "f6",
        Key::KEY_F7 => "f7",
        Key::KEY_F8 => "f8",
        Key::KEY_F9 => "f9",
        Key::KEY_F10 => "f10",
        Key::KEY_F11 => "f11",
        Key::KEY_F12 => "f12",
        Key::KEY_F13 => "f13",
        Key::KEY_F14 => "f14",
        Key::KEY_F15 => "f15",
        Key::KEY_F16 => "f16",
        Key::KEY_F17 => "f17",
        Key::KEY_F18 => "f18",
        Key::KEY_F19 => "f19",
        Key::KEY_F20 => "f20",
        Key::KEY_F21 => "f21",
        Key::KEY_F22 => "f22",
        Key::KEY_F23 => "f23",
        Key::KEY_F24 => "f24",

        Key::KEY_SPACE => "space",
        Key::KEY_ENTER => "enter",
        Key::KEY_ESC => "esc",
        Key::KEY_TAB => "tab",
        Key::KEY_BACKSPACE => "backspace",
        Key::KEY_DELETE => "delete",
        Key::KEY_INSERT => "insert",
        Key::KEY_HOME => "home",
        Key::KEY_END => "end",
        Key::KEY_PAGEUP => "page_up",
        Key::KEY_PAGEDOWN => "page_down",
        Key::KEY_UP => "up",
        Key::KEY_DOWN => "down",
        Key::KEY_LEFT => "left",
        Key::KEY_RIGHT => "right",
        Key::KEY_CAPSLOCK => "caps_lock",
        Key::KEY_NUMLOCK => "num_lock",
        Key::KEY_SCROLLLOCK => "scroll_lock",
        Key::KEY_SYSRQ => "print_screen",
        Key::KEY_PAUSE => "pause",
        Key::KEY_COMPOSE => "menu",

        Key::KEY_LEFTCTRL => "ctrl_l",
        Key::KEY_RIGHTCTRL => "ctrl_r",
        Key::KEY_LEFTSHIFT => "shift_l",
        Key::KEY_RIGHTSHIFT => "shift_r",
        Key::KEY_LEFTALT => "alt_l",
        Key::KEY_RIGHTALT => "alt_gr",
        Key::KEY_LEFTMETA => "cmd",
        Key::KEY_RIGHTMETA => "cmd_r",

        Key::KEY_KP0 => "kp_0",
        Key::KEY_KP1 => "kp_1",
        Key::KEY_KP2 => "kp_2",
        Key::KEY_KP3 => "kp_3",
        Key::KEY_KP4 => "kp_4",
        Key::KEY_KP5 => "kp_5",
        Key::KEY_KP6 => "kp_6",
        Key::KEY_KP7 => "kp_7",
        Key::KEY_KP8 => "kp_8",
        Key::KEY_KP9 => "kp_9",
        Key::KEY_KPENTER => "kp_enter",
        Key::KEY_KPPLUS => "kp_plus",
        Key::KEY_KPMINUS => "kp_minus",
        Key::KEY_KPASTERISK => "kp_multiply",
        Key::KEY_KPSLASH => "kp_divide",
        Key::KEY_KPDOT => "kp_decimal",

        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters_and_digits() {
        assert_eq!(key_name(Key::KEY_A), "a");
        assert_eq!(key_name(Key::KEY_Z), "z");
        assert_eq!(key_name(Key::KEY_0), "0");
        assert_eq!(key_name(Key::KEY_9), "9");
    }

    #[test]
    fn test_named_keys() {
        assert_eq!(key_name(Key::KEY_F1), "f1");
        assert_eq!(key_name(Key::KEY_F12), "f12");
        assert_eq!(key_name(Key::KEY_SPACE), "space");
        assert_eq!(key_name(Key::KEY_PAGEDOWN), "page_down");
    }

    #[test]
    fn test_modifiers_are_side_specific() {
        assert_eq!(key_name(Key::KEY_LEFTCTRL), "ctrl_l");
        assert_eq!(key_name(Key::KEY_RIGHTCTRL), "ctrl_r");
        assert_ne!(key_name(Key::KEY_LEFTSHIFT), key_name(Key::KEY_RIGHTSHIFT));
    }

    #[test]
    fn test_unnamed_key_falls_back_to_code() {
        // KEY_MUTE (113) has no friendly name
        assert_eq!(key_name(Key::KEY_MUTE), "vk_113");
    }

    #[test]
    fn test_normalize_is_case_insensitive() {
        assert_eq!(normalize("  F1 "), "f1");
        assert_eq!(normalize("Ctrl_L"), "ctrl_l");
        assert_eq!(normalize("A"), key_name(Key::KEY_A));
    }

    #[test]
    fn test_is_button() {
        assert!(is_button(Key::BTN_LEFT));
        assert!(is_button(Key::BTN_RIGHT));
        assert!(is_button(Key::BTN_MIDDLE));
        assert!(is_button(Key::BTN_0));
        assert!(is_button(Key::BTN_9));
        assert!(!is_button(Key::KEY_ENTER));
        assert!(!is_button(Key::KEY_A));
        assert!(!is_button(Key::KEY_F24));
    }
}
