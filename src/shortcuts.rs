//! Key bindings, loaded from `shortcut.toml`.

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Every configurable binding. Missing sections fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Shortcuts {
    pub main: MainShortcuts,
    pub branding: BrandingShortcuts,
    pub input_box: InputBoxShortcuts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MainShortcuts {
    pub quit: Vec<String>,
    pub refresh: Vec<String>,
    pub new_property: Vec<String>,
    pub generate: Vec<String>,
    pub branding: Vec<String>,
    pub open_pdf: Vec<String>,
    pub down: Vec<String>,
    pub up: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrandingShortcuts {
    pub cancel: Vec<String>,
    pub save: Vec<String>,
    pub company_name: Vec<String>,
    pub logo_url: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputBoxShortcuts {
    pub confirm: Vec<String>,
    pub cancel: Vec<String>,
    pub backspace: Vec<String>,
    pub delete: Vec<String>,
    pub left: Vec<String>,
    pub right: Vec<String>,
    pub home: Vec<String>,
    pub end: Vec<String>,
    pub clear_line: Vec<String>,
}

impl Shortcuts {
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|k| k.to_string()).collect()
}

impl Default for MainShortcuts {
    fn default() -> Self {
        Self {
            quit: keys(&["q"]),
            refresh: keys(&["r"]),
            new_property: keys(&["n"]),
            generate: keys(&["g"]),
            branding: keys(&["b"]),
            open_pdf: keys(&["o"]),
            down: keys(&["Down", "j"]),
            up: keys(&["Up", "k"]),
        }
    }
}

impl Default for BrandingShortcuts {
    fn default() -> Self {
        Self {
            cancel: keys(&["Esc"]),
            save: keys(&["Enter"]),
            company_name: keys(&["c"]),
            logo_url: keys(&["l"]),
        }
    }
}

impl Default for InputBoxShortcuts {
    fn default() -> Self {
        Self {
            confirm: keys(&["Enter"]),
            cancel: keys(&["Esc"]),
            backspace: keys(&["Backspace"]),
            delete: keys(&["Delete"]),
            left: keys(&["Left"]),
            right: keys(&["Right"]),
            home: keys(&["Home"]),
            end: keys(&["End"]),
            clear_line: keys(&["Ctrl+u"]),
        }
    }
}

/// True if `key` matches any of the binding strings.
pub fn matches_shortcut(key: &KeyEvent, bindings: &[String]) -> bool {
    bindings.iter().any(|b| matches_single(key, b))
}

/// Match one binding such as `q`, `Enter` or `Ctrl+u`.
fn matches_single(key: &KeyEvent, binding: &str) -> bool {
    let (mods, name) = match binding.rsplit_once('+') {
        Some((mods, name)) if !name.is_empty() => (mods, name),
        _ => ("", binding),
    };

    let mut expected = KeyModifiers::empty();
    for m in mods.split('+').filter(|m| !m.is_empty()) {
        expected |= match m.to_ascii_lowercase().as_str() {
            "ctrl" => KeyModifiers::CONTROL,
            "alt" => KeyModifiers::ALT,
            "shift" => KeyModifiers::SHIFT,
            _ => return false,
        };
    }
    // Terminals report uppercase letters with SHIFT set.
    let actual = match key.code {
        KeyCode::Char(c) if c.is_ascii_uppercase() => key.modifiers.difference(KeyModifiers::SHIFT),
        _ => key.modifiers,
    };
    if actual != expected {
        return false;
    }

    let code = match name.to_ascii_lowercase().as_str() {
        "enter" => KeyCode::Enter,
        "esc" => KeyCode::Esc,
        "tab" => KeyCode::Tab,
        "backspace" => KeyCode::Backspace,
        "delete" => KeyCode::Delete,
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        _ => {
            let mut chars = name.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => KeyCode::Char(c),
                _ => return false,
            }
        }
    };
    key.code == code
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::empty())
    }

    #[test]
    fn plain_characters_and_named_keys() {
        assert!(matches_shortcut(&key(KeyCode::Char('g')), &keys(&["g"])));
        assert!(!matches_shortcut(&key(KeyCode::Char('g')), &keys(&["G"])));
        assert!(matches_shortcut(&key(KeyCode::Enter), &keys(&["enter"])));
        assert!(!matches_shortcut(&key(KeyCode::Esc), &keys(&["Enter"])));
    }

    #[test]
    fn modifiers_must_match_exactly() {
        let ctrl_u = KeyEvent::new(KeyCode::Char('u'), KeyModifiers::CONTROL);
        assert!(matches_shortcut(&ctrl_u, &keys(&["Ctrl+u"])));
        assert!(!matches_shortcut(&ctrl_u, &keys(&["u"])));
        assert!(!matches_shortcut(&key(KeyCode::Char('u')), &keys(&["Ctrl+u"])));
        assert!(!matches_shortcut(&ctrl_u, &keys(&["Hyper+u"])));
    }

    #[test]
    fn plus_key_itself_can_be_bound() {
        assert!(matches_shortcut(&key(KeyCode::Char('+')), &keys(&["+"])));
    }

    #[test]
    fn uppercase_letters_ignore_shift() {
        let shifted = KeyEvent::new(KeyCode::Char('R'), KeyModifiers::SHIFT);
        assert!(matches_shortcut(&shifted, &keys(&["R"])));
    }

    #[test]
    fn any_alternative_matches() {
        let bindings = MainShortcuts::default().down;
        assert!(matches_shortcut(&key(KeyCode::Down), &bindings));
        assert!(matches_shortcut(&key(KeyCode::Char('j')), &bindings));
        assert!(!matches_shortcut(&key(KeyCode::Char('k')), &bindings));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let sc: Shortcuts = toml::from_str(
            r#"
            [main]
            generate = ["G", "Ctrl+g"]
            "#,
        )
        .unwrap();
        assert_eq!(sc.main.generate, keys(&["G", "Ctrl+g"]));
        assert_eq!(sc.main.quit, keys(&["q"]));
        assert_eq!(sc.branding.save, keys(&["Enter"]));
    }
}
