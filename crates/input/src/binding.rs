use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::action::{Action, ToolMode};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("empty key chord")]
    Empty,
    #[error("unknown key `{0}`")]
    UnknownKey(String),
    #[error("unknown modifier `{0}`")]
    UnknownModifier(String),
    #[error("`{0}` is not a bindable action")]
    UnknownAction(String),
}

/// Platform-neutral key names. Window layers translate their own key codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Char(char),
    Escape,
    Delete,
    Tab,
    Space,
}

impl FromStr for Key {
    type Err = BindingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let key = match lower.as_str() {
            "escape" | "esc" => Self::Escape,
            "delete" | "del" => Self::Delete,
            "tab" => Self::Tab,
            "space" => Self::Space,
            _ => {
                let mut chars = lower.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_alphanumeric() => Self::Char(c),
                    _ => return Err(BindingError::UnknownKey(s.to_string())),
                }
            }
        };
        Ok(key)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Char(c) => write!(f, "{c}"),
            Self::Escape => f.write_str("escape"),
            Self::Delete => f.write_str("delete"),
            Self::Tab => f.write_str("tab"),
            Self::Space => f.write_str("space"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Modifiers {
    pub ctrl: bool,
    pub shift: bool,
}

/// A key plus modifiers, written `ctrl+shift+z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyChord {
    pub key: Key,
    pub modifiers: Modifiers,
}

impl KeyChord {
    pub fn plain(key: Key) -> Self {
        Self {
            key,
            modifiers: Modifiers::default(),
        }
    }

    pub fn ctrl(key: Key) -> Self {
        Self {
            key,
            modifiers: Modifiers {
                ctrl: true,
                shift: false,
            },
        }
    }
}

impl FromStr for KeyChord {
    type Err = BindingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts: Vec<&str> = s.split('+').map(str::trim).collect();
        let key = parts.pop().filter(|k| !k.is_empty()).ok_or(BindingError::Empty)?;
        let mut modifiers = Modifiers::default();
        for part in parts {
            match part.to_ascii_lowercase().as_str() {
                "ctrl" | "cmd" => modifiers.ctrl = true,
                "shift" => modifiers.shift = true,
                _ => return Err(BindingError::UnknownModifier(part.to_string())),
            }
        }
        Ok(Self {
            key: key.parse()?,
            modifiers,
        })
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.modifiers.ctrl {
            f.write_str("ctrl+")?;
        }
        if self.modifiers.shift {
            f.write_str("shift+")?;
        }
        write!(f, "{}", self.key)
    }
}

/// Parse the bindable (argument-free) actions by name.
fn parse_action(name: &str) -> Result<Action, BindingError> {
    let action = match name {
        "translate" => Action::SetTool(ToolMode::Translate),
        "rotate" => Action::SetTool(ToolMode::Rotate),
        "scale" => Action::SetTool(ToolMode::Scale),
        "toggle_space" => Action::ToggleSpace,
        "toggle_pivot" => Action::TogglePivot,
        "toggle_snap" => Action::ToggleSnap,
        "focus" => Action::FocusSelection,
        "cancel_drag" => Action::CancelDrag,
        "select_all" => Action::SelectAll,
        "deselect" => Action::Deselect,
        "delete" => Action::DeleteSelection,
        "undo" => Action::Undo,
        "redo" => Action::Redo,
        _ => return Err(BindingError::UnknownAction(name.to_string())),
    };
    Ok(action)
}

/// Key chord to action table.
#[derive(Debug, Clone, PartialEq)]
pub struct Bindings {
    map: BTreeMap<KeyChord, Action>,
}

/// Serialized form: `{ "ctrl+z": "undo", ... }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BindingTable(pub BTreeMap<String, String>);

impl Default for Bindings {
    fn default() -> Self {
        let mut map = BTreeMap::new();
        map.insert(KeyChord::plain(Key::Char('w')), Action::SetTool(ToolMode::Translate));
        map.insert(KeyChord::plain(Key::Char('e')), Action::SetTool(ToolMode::Rotate));
        map.insert(KeyChord::plain(Key::Char('r')), Action::SetTool(ToolMode::Scale));
        map.insert(KeyChord::plain(Key::Char('x')), Action::ToggleSpace);
        map.insert(KeyChord::plain(Key::Char('p')), Action::TogglePivot);
        map.insert(KeyChord::plain(Key::Char('f')), Action::FocusSelection);
        map.insert(KeyChord::plain(Key::Tab), Action::ToggleSnap);
        map.insert(KeyChord::plain(Key::Escape), Action::CancelDrag);
        map.insert(KeyChord::plain(Key::Delete), Action::DeleteSelection);
        map.insert(KeyChord::ctrl(Key::Char('a')), Action::SelectAll);
        map.insert(KeyChord::ctrl(Key::Char('d')), Action::Deselect);
        map.insert(KeyChord::ctrl(Key::Char('z')), Action::Undo);
        map.insert(KeyChord::ctrl(Key::Char('y')), Action::Redo);
        map.insert(
            KeyChord {
                key: Key::Char('z'),
                modifiers: Modifiers {
                    ctrl: true,
                    shift: true,
                },
            },
            Action::Redo,
        );
        Self { map }
    }
}

impl Bindings {
    pub fn empty() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// Defaults overridden by `table`. Later entries replace earlier
    /// bindings for the same chord.
    pub fn with_overrides(table: &BindingTable) -> Result<Self, BindingError> {
        let mut bindings = Self::default();
        for (chord, action) in &table.0 {
            bindings.bind(chord.parse()?, parse_action(action)?);
        }
        Ok(bindings)
    }

    pub fn bind(&mut self, chord: KeyChord, action: Action) -> Option<Action> {
        let previous = self.map.insert(chord, action);
        if let Some(previous) = &previous {
            tracing::debug!(%chord, ?previous, "binding replaced");
        }
        previous
    }

    /// Action for a pressed chord; `Noop` when unbound.
    pub fn resolve(&self, chord: KeyChord) -> Action {
        self.map.get(&chord).cloned().unwrap_or(Action::Noop)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KeyChord, &Action)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chords_parse_and_print() {
        let chord: KeyChord = "Ctrl+Shift+Z".parse().unwrap();
        assert_eq!(chord.key, Key::Char('z'));
        assert!(chord.modifiers.ctrl && chord.modifiers.shift);
        assert_eq!(chord.to_string(), "ctrl+shift+z");
        assert_eq!("esc".parse::<KeyChord>().unwrap(), KeyChord::plain(Key::Escape));
    }

    #[test]
    fn bad_chords_are_rejected() {
        assert_eq!("".parse::<KeyChord>(), Err(BindingError::Empty));
        assert_eq!("ctrl+".parse::<KeyChord>(), Err(BindingError::Empty));
        assert!(matches!("alt+q".parse::<KeyChord>(), Err(BindingError::UnknownModifier(_))));
        assert!(matches!("f13".parse::<KeyChord>(), Err(BindingError::UnknownKey(_))));
    }

    #[test]
    fn defaults_cover_the_gizmo_tools() {
        let bindings = Bindings::default();
        assert_eq!(
            bindings.resolve(KeyChord::plain(Key::Char('e'))),
            Action::SetTool(ToolMode::Rotate)
        );
        assert_eq!(bindings.resolve(KeyChord::ctrl(Key::Char('z'))), Action::Undo);
        assert_eq!(bindings.resolve(KeyChord::plain(Key::Escape)), Action::CancelDrag);
        assert_eq!(bindings.resolve(KeyChord::plain(Key::Char('q'))), Action::Noop);
    }

    #[test]
    fn overrides_from_yaml() {
        let table: BindingTable = serde_yaml::from_str("\"g\": translate\n\"w\": focus\n").unwrap();
        let bindings = Bindings::with_overrides(&table).unwrap();
        assert_eq!(
            bindings.resolve(KeyChord::plain(Key::Char('g'))),
            Action::SetTool(ToolMode::Translate)
        );
        assert_eq!(bindings.resolve(KeyChord::plain(Key::Char('w'))), Action::FocusSelection);
        assert_eq!(bindings.len(), Bindings::default().len() + 1);

        let bad = BindingTable(BTreeMap::from([("k".to_string(), "explode".to_string())]));
        assert_eq!(
            Bindings::with_overrides(&bad),
            Err(BindingError::UnknownAction("explode".to_string()))
        );
    }
}
