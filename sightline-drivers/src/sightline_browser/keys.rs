//! Key chord parsing for the `key` action.
//!
//! Models emit xdotool-style names (`Return`, `ctrl+a`, `Page_Down`); a
//! whitespace separated string is a sequence of chords pressed in order.
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyName {
    Enter,
    Tab,
    Backspace,
    Escape,
    Space,
    Delete,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    Control,
    Shift,
    Alt,
    Meta,
    F(u8),
    Char(char),
}

impl KeyName {
    pub fn parse(raw: &str) -> Option<KeyName> {
        let mut chars = raw.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Some(KeyName::Char(c));
        }

        let lower = raw.to_ascii_lowercase();
        let key = match lower.as_str() {
            "return" | "enter" | "kp_enter" => KeyName::Enter,
            "tab" => KeyName::Tab,
            "backspace" | "back_space" => KeyName::Backspace,
            "esc" | "escape" => KeyName::Escape,
            "space" => KeyName::Space,
            "delete" | "del" => KeyName::Delete,
            "insert" => KeyName::Insert,
            "home" => KeyName::Home,
            "end" => KeyName::End,
            "page_up" | "pageup" | "prior" => KeyName::PageUp,
            "page_down" | "pagedown" | "next" => KeyName::PageDown,
            "up" | "arrowup" => KeyName::ArrowUp,
            "down" | "arrowdown" => KeyName::ArrowDown,
            "left" | "arrowleft" => KeyName::ArrowLeft,
            "right" | "arrowright" => KeyName::ArrowRight,
            "ctrl" | "control" | "control_l" | "control_r" => KeyName::Control,
            "shift" | "shift_l" | "shift_r" => KeyName::Shift,
            "alt" | "option" | "alt_l" | "alt_r" => KeyName::Alt,
            "meta" | "super" | "cmd" | "command" | "super_l" => KeyName::Meta,
            "plus" => KeyName::Char('+'),
            "minus" => KeyName::Char('-'),
            f if f.starts_with('f') => {
                let n: u8 = f[1..].parse().ok()?;
                if (1..=12).contains(&n) {
                    KeyName::F(n)
                } else {
                    return None;
                }
            }
            _ => return None,
        };
        Some(key)
    }
}

/// Keys held together, pressed in order and released in reverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    pub keys: Vec<KeyName>,
}

impl KeyChord {
    /// Parse `"ctrl+shift+t"`-style input into one chord.
    pub fn parse(raw: &str) -> Result<KeyChord, String> {
        let keys = raw
            .split('+')
            .map(|part| {
                let part = part.trim();
                if part.is_empty() {
                    return Err(format!("empty key in {raw:?}"));
                }
                KeyName::parse(part).ok_or_else(|| format!("unknown key {part:?}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(KeyChord { keys })
    }

    /// Parse a whitespace separated sequence of chords.
    pub fn parse_sequence(raw: &str) -> Result<Vec<KeyChord>, String> {
        let chords = raw
            .split_whitespace()
            .map(KeyChord::parse)
            .collect::<Result<Vec<_>, _>>()?;
        if chords.is_empty() {
            return Err("no keys given".to_string());
        }
        Ok(chords)
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.keys.iter().map(|k| format!("{k:?}")).collect();
        f.write_str(&names.join("+"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modifier_chords() {
        let chord = KeyChord::parse("ctrl+Shift+t").unwrap();
        assert_eq!(
            chord.keys,
            vec![KeyName::Control, KeyName::Shift, KeyName::Char('t')]
        );
    }

    #[test]
    fn parses_xdotool_names_and_sequences() {
        let seq = KeyChord::parse_sequence("Return Page_Down F5").unwrap();
        assert_eq!(seq.len(), 3);
        assert_eq!(seq[0].keys, vec![KeyName::Enter]);
        assert_eq!(seq[1].keys, vec![KeyName::PageDown]);
        assert_eq!(seq[2].keys, vec![KeyName::F(5)]);
    }

    #[test]
    fn rejects_unknown_and_empty_keys() {
        assert!(KeyChord::parse("ctrl+").is_err());
        assert!(KeyChord::parse("hyper").is_err());
        assert!(KeyChord::parse("f13").is_err());
        assert!(KeyChord::parse_sequence("   ").is_err());
    }
}
