/// Engine-native value rendering
/// Values are stringified by the engine's own `tostring`, captured before the
/// learner environment is built, so output matches what Lua itself prints.
use crate::config::types::{RenderedValue, TypeTag, VALUE_TRUNCATION_MARKER};
use mlua::{Function, Value};

/// Stringify one value through the captured `tostring`
pub fn coerce(tostring: &Function, value: Value) -> mlua::Result<String> {
    let rendered: mlua::String = tostring.call(value)?;
    Ok(String::from(rendered.to_string_lossy()))
}

/// Cut `text` to `max_chars` characters, marking the cut
pub fn truncate_value(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            let mut truncated = text[..cut].to_string();
            truncated.push_str(VALUE_TRUNCATION_MARKER);
            truncated
        }
        None => text,
    }
}

/// Render a value for a step snapshot
pub fn render_value(
    tostring: &Function,
    value: Value,
    max_chars: usize,
) -> mlua::Result<RenderedValue> {
    let type_tag = TypeTag::from_type_name(value.type_name());
    let rendered = truncate_value(coerce(tostring, value)?, max_chars);
    Ok(RenderedValue { type_tag, rendered })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::Lua;

    fn tostring(lua: &Lua) -> Function {
        lua.globals().get("tostring").unwrap()
    }

    #[test]
    fn test_truncate_value() {
        assert_eq!(truncate_value("abc".into(), 3), "abc");
        assert_eq!(
            truncate_value("abcdef".into(), 3),
            format!("abc{}", VALUE_TRUNCATION_MARKER)
        );
        // Counts characters, not bytes
        assert_eq!(
            truncate_value("ééé".into(), 2),
            format!("éé{}", VALUE_TRUNCATION_MARKER)
        );
    }

    #[test]
    fn test_engine_coercion() {
        let lua = Lua::new();
        let f = tostring(&lua);
        assert_eq!(coerce(&f, Value::Nil).unwrap(), "nil");
        assert_eq!(coerce(&f, Value::Boolean(true)).unwrap(), "true");
        assert_eq!(coerce(&f, Value::Integer(42)).unwrap(), "42");
        assert_eq!(coerce(&f, Value::Number(1.5)).unwrap(), "1.5");
        assert_eq!(coerce(&f, Value::Number(3.0)).unwrap(), "3.0");
    }

    #[test]
    fn test_render_tags_and_addresses() {
        let lua = Lua::new();
        let f = tostring(&lua);

        let table = Value::Table(lua.create_table().unwrap());
        let rendered = render_value(&f, table, 1000).unwrap();
        assert_eq!(rendered.type_tag, TypeTag::Table);
        assert!(rendered.rendered.starts_with("table: "));

        let text = Value::String(lua.create_string("hello").unwrap());
        let rendered = render_value(&f, text, 2).unwrap();
        assert_eq!(rendered.type_tag, TypeTag::String);
        assert_eq!(rendered.rendered, format!("he{}", VALUE_TRUNCATION_MARKER));

        let number = render_value(&f, Value::Integer(7), 10).unwrap();
        assert_eq!(number.type_tag, TypeTag::Number);
    }
}
