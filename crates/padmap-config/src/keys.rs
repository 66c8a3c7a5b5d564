//! Key name table for the operator boundary
//!
//! Maps between human-readable key names and Linux input event key codes.
//! The engine itself only ever sees [`KeyCode`] values; the CLI converts in
//! both directions with these functions.

use crate::model::KeyCode;

/// Canonical name per key code, in code order. Kept to the keys a macro pad
/// or keyboard realistically reports.
const KEY_NAMES: &[(KeyCode, &str)] = &[
    (1, "Escape"),
    (2, "1"),
    (3, "2"),
    (4, "3"),
    (5, "4"),
    (6, "5"),
    (7, "6"),
    (8, "7"),
    (9, "8"),
    (10, "9"),
    (11, "0"),
    (12, "Minus"),
    (13, "Equal"),
    (14, "Backspace"),
    (15, "Tab"),
    (16, "Q"),
    (17, "W"),
    (18, "E"),
    (19, "R"),
    (20, "T"),
    (21, "Y"),
    (22, "U"),
    (23, "I"),
    (24, "O"),
    (25, "P"),
    (26, "LeftBrace"),
    (27, "RightBrace"),
    (28, "Enter"),
    (29, "LeftCtrl"),
    (30, "A"),
    (31, "S"),
    (32, "D"),
    (33, "F"),
    (34, "G"),
    (35, "H"),
    (36, "J"),
    (37, "K"),
    (38, "L"),
    (39, "Semicolon"),
    (40, "Apostrophe"),
    (41, "Grave"),
    (42, "LeftShift"),
    (43, "Backslash"),
    (44, "Z"),
    (45, "X"),
    (46, "C"),
    (47, "V"),
    (48, "B"),
    (49, "N"),
    (50, "M"),
    (51, "Comma"),
    (52, "Dot"),
    (53, "Slash"),
    (54, "RightShift"),
    (55, "KpAsterisk"),
    (56, "LeftAlt"),
    (57, "Space"),
    (58, "CapsLock"),
    (59, "F1"),
    (60, "F2"),
    (61, "F3"),
    (62, "F4"),
    (63, "F5"),
    (64, "F6"),
    (65, "F7"),
    (66, "F8"),
    (67, "F9"),
    (68, "F10"),
    (69, "NumLock"),
    (70, "ScrollLock"),
    (71, "Kp7"),
    (72, "Kp8"),
    (73, "Kp9"),
    (74, "KpMinus"),
    (75, "Kp4"),
    (76, "Kp5"),
    (77, "Kp6"),
    (78, "KpPlus"),
    (79, "Kp1"),
    (80, "Kp2"),
    (81, "Kp3"),
    (82, "Kp0"),
    (83, "KpDot"),
    (87, "F11"),
    (88, "F12"),
    (96, "KpEnter"),
    (97, "RightCtrl"),
    (98, "KpSlash"),
    (99, "SysRq"),
    (100, "RightAlt"),
    (102, "Home"),
    (103, "Up"),
    (104, "PageUp"),
    (105, "Left"),
    (106, "Right"),
    (107, "End"),
    (108, "Down"),
    (109, "PageDown"),
    (110, "Insert"),
    (111, "Delete"),
    (113, "Mute"),
    (114, "VolumeDown"),
    (115, "VolumeUp"),
    (119, "Pause"),
    (125, "LeftMeta"),
    (126, "RightMeta"),
    (127, "Compose"),
    (163, "NextSong"),
    (164, "PlayPause"),
    (165, "PreviousSong"),
    (166, "StopCd"),
    (183, "F13"),
    (184, "F14"),
    (185, "F15"),
    (186, "F16"),
    (187, "F17"),
    (188, "F18"),
    (189, "F19"),
    (190, "F20"),
    (191, "F21"),
    (192, "F22"),
    (193, "F23"),
    (194, "F24"),
];

/// Parse a key name into a key code.
///
/// Accepts the canonical names from the table (case-insensitive), a handful
/// of common aliases, and `KEY_*` / raw decimal forms as an escape hatch for
/// keys outside the table.
pub fn parse_key(name: &str) -> Option<KeyCode> {
    let trimmed = name.trim();
    let upper = trimmed.to_uppercase();

    // Aliases first
    let alias = match upper.as_str() {
        "ESC" => Some(1),
        "RETURN" => Some(28),
        "CTRL" | "LCTRL" | "LEFTCONTROL" => Some(29),
        "RCTRL" | "RIGHTCONTROL" => Some(97),
        "SHIFT" | "LSHIFT" => Some(42),
        "RSHIFT" => Some(54),
        "ALT" | "LALT" => Some(56),
        "RALT" | "ALTGR" => Some(100),
        "SUPER" | "META" | "WIN" | "LMETA" => Some(125),
        "RMETA" | "RWIN" => Some(126),
        "CAPS" | "CAPS_LOCK" => Some(58),
        "PGUP" => Some(104),
        "PGDN" | "PGDOWN" => Some(109),
        "INS" => Some(110),
        "DEL" => Some(111),
        "PRINTSCREEN" | "PRTSC" => Some(99),
        _ => None,
    };
    if alias.is_some() {
        return alias;
    }

    if let Some(code) = KEY_NAMES
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(trimmed))
        .map(|(c, _)| *c)
    {
        return Some(code);
    }

    // Escape hatches: "KEY_102" style or a bare decimal code.
    if let Some(rest) = upper.strip_prefix("KEY_") {
        if let Ok(code) = rest.parse::<KeyCode>() {
            return Some(code);
        }
        // KEY_<name> with a canonical name, e.g. KEY_CAPSLOCK
        return KEY_NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(rest))
            .map(|(c, _)| *c);
    }
    if let Ok(code) = trimmed.parse::<KeyCode>() {
        return Some(code);
    }

    tracing::debug!("unknown key name: {}", name);
    None
}

/// Canonical name for a key code, if it is in the table.
pub fn key_name(code: KeyCode) -> Option<&'static str> {
    KEY_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, n)| *n)
}

/// Display form for a key code: the canonical name, or `key:<code>` for
/// codes outside the table.
pub fn display_key(code: KeyCode) -> String {
    match key_name(code) {
        Some(name) => name.to_string(),
        None => format!("key:{}", code),
    }
}
