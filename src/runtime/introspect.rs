//! Frame and locals inspection for the step recorder.
//!
//! All inspection goes through the engine's own `debug.getinfo` and
//! `debug.getlocal`, captured into the registry by the environment builder
//! before the `debug` global is removed. Levels follow the engine's
//! convention: level 1 is whatever was running when the hook fired.

use crate::config::types::LocalBinding;
use crate::runtime::environment::{GETINFO_KEY, GETLOCAL_KEY, TOSTRING_KEY};
use crate::runtime::render::render_value;
use mlua::{Function, Lua, Table, Value};

/// Frames walked before giving up on finding the main chunk
const MAX_FRAME_DEPTH: i64 = 256;

/// Locals enumerated per frame
const MAX_LOCALS: i64 = 200;

/// Name shown for the main chunk
pub const MAIN_FRAME: &str = "<main>";

/// One activation record as reported by `getinfo(level, "nSl")`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub what: String,
    pub source: String,
    pub name: Option<String>,
    pub line_defined: i64,
    pub current_line: i64,
}

impl Frame {
    pub fn is_native(&self) -> bool {
        self.what == "C"
    }

    pub fn is_main(&self) -> bool {
        self.what == "main"
    }

    /// Display name used in call stacks
    pub fn display_name(&self) -> String {
        if self.is_main() {
            return MAIN_FRAME.to_string();
        }
        match (&self.name, self.is_native()) {
            (Some(name), _) => name.clone(),
            (None, true) => "[C]".to_string(),
            (None, false) => format!("<anonymous:{}>", self.line_defined),
        }
    }
}

/// Captured debug functions, valid for one engine instance
pub struct Introspection {
    getinfo: Function,
    getlocal: Function,
    tostring: Function,
}

impl Introspection {
    pub fn fetch(lua: &Lua) -> mlua::Result<Self> {
        Ok(Self {
            getinfo: lua.named_registry_value(GETINFO_KEY)?,
            getlocal: lua.named_registry_value(GETLOCAL_KEY)?,
            tostring: lua.named_registry_value(TOSTRING_KEY)?,
        })
    }

    /// Frame at `level`, or None past the top of the stack
    pub fn frame(&self, level: i64) -> mlua::Result<Option<Frame>> {
        let info: Option<Table> = self.getinfo.call((level, "nSl"))?;
        let Some(info) = info else {
            return Ok(None);
        };
        let what: Option<String> = info.get("what")?;
        let source: Option<String> = info.get("source")?;
        let line_defined: Option<i64> = info.get("linedefined")?;
        let current_line: Option<i64> = info.get("currentline")?;
        Ok(Some(Frame {
            what: what.unwrap_or_default(),
            source: source.unwrap_or_default(),
            name: info.get("name")?,
            line_defined: line_defined.unwrap_or(-1),
            current_line: current_line.unwrap_or(-1),
        }))
    }

    /// First Lua frame at or above level 1
    pub fn base_level(&self) -> mlua::Result<Option<(i64, Frame)>> {
        for level in 1..=MAX_FRAME_DEPTH {
            match self.frame(level)? {
                None => return Ok(None),
                Some(frame) if !frame.is_native() => return Ok(Some((level, frame))),
                Some(_) => continue,
            }
        }
        Ok(None)
    }

    /// Function names from `base` outward to the main chunk, outermost first
    pub fn call_stack(&self, base: i64) -> mlua::Result<Vec<String>> {
        let mut names = Vec::new();
        for level in base..base + MAX_FRAME_DEPTH {
            let Some(frame) = self.frame(level)? else {
                break;
            };
            names.push(frame.display_name());
            if frame.is_main() {
                break;
            }
        }
        names.reverse();
        if names.is_empty() {
            names.push(MAIN_FRAME.to_string());
        }
        Ok(names)
    }

    /// Named locals of the frame at `level`, rendered for display
    pub fn locals(&self, level: i64, max_value_chars: usize) -> mlua::Result<Vec<LocalBinding>> {
        let mut bindings: Vec<LocalBinding> = Vec::new();
        for index in 1..=MAX_LOCALS {
            let (name, value): (Option<String>, Value) = self.getlocal.call((level, index))?;
            let Some(name) = name else {
                break;
            };
            if !is_identifier(&name) {
                continue;
            }
            let value = render_value(&self.tostring, value, max_value_chars)?;
            // A later slot with the same name shadows the earlier one
            match bindings.iter_mut().find(|binding| binding.name == name) {
                Some(existing) => existing.value = value,
                None => bindings.push(LocalBinding { name, value }),
            }
        }
        Ok(bindings)
    }
}

/// Learner-visible local names; skips engine temporaries like `(for state)`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("x"));
        assert!(is_identifier("_tmp1"));
        assert!(!is_identifier("(for state)"));
        assert!(!is_identifier("(temporary)"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_frame_display_names() {
        let mut frame = Frame {
            what: "main".into(),
            source: "=learner".into(),
            name: None,
            line_defined: 0,
            current_line: 3,
        };
        assert_eq!(frame.display_name(), MAIN_FRAME);

        frame.what = "Lua".into();
        frame.line_defined = 7;
        assert_eq!(frame.display_name(), "<anonymous:7>");

        frame.name = Some("add".into());
        assert_eq!(frame.display_name(), "add");

        frame.what = "C".into();
        frame.name = None;
        assert_eq!(frame.display_name(), "[C]");
    }
}
