//! Symbolic key/button name table (§6 "Symbolic key names").
//!
//! Maps the human-readable names accepted in `config.ini` to the
//! `input_linux::Key` codes the router and virtual output deal in.
//! Unknown names are not an error here -- the caller decides whether a
//! disabled hotkey is fatal or just a warning (it is always a warning,
//! per spec).

use input_linux::Key;

/// Resolve a symbolic key/button name to its `input_linux::Key`.
///
/// Matching is case-sensitive and mirrors the names spec.md lists
/// verbatim: `F1..F12`, `m`, `n`, `p`, `space`, `esc`, `enter` for the
/// keyboard, and `LButton`/`RButton`/`MButton` for the mouse.
pub fn lookup(name: &str) -> Option<Key> {
    Some(match name {
        "F1" => Key::F1,
        "F2" => Key::F2,
        "F3" => Key::F3,
        "F4" => Key::F4,
        "F5" => Key::F5,
        "F6" => Key::F6,
        "F7" => Key::F7,
        "F8" => Key::F8,
        "F9" => Key::F9,
        "F10" => Key::F10,
        "F11" => Key::F11,
        "F12" => Key::F12,
        "m" => Key::M,
        "n" => Key::N,
        "p" => Key::P,
        "space" => Key::Space,
        "esc" => Key::Esc,
        "enter" => Key::Enter,
        "LButton" => Key::ButtonLeft,
        "RButton" => Key::ButtonRight,
        "MButton" => Key::ButtonMiddle,
        _ => return None,
    })
}

/// True if `key` is one of the three mouse buttons -- used by the
/// activation FSM to decide whether the tap-vs-hold overlay applies.
pub fn is_mouse_button(key: Key) -> bool {
    matches!(key, Key::ButtonLeft | Key::ButtonRight | Key::ButtonMiddle)
}
