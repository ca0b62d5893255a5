//! Front-matter handling.
//!
//! A document may open with a YAML block delimited by `---` lines. The block
//! is excluded from chunk content and its values are flattened into plain
//! text for property indexing.

use std::collections::BTreeMap;

use serde_yaml::Value;

use crate::{document::PropertyValue, error::Result};

/// Arrays nested deeper than this are not flattened.
pub const MAX_FLATTEN_DEPTH: usize = 3;

/// Only the first elements of an array are flattened.
pub const MAX_ARRAY_ITEMS: usize = 32;

/// Bound on YAML nesting converted into [`PropertyValue`]s.
const MAX_VALUE_DEPTH: usize = 8;

/// A document body with its front-matter separated out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split<'a> {
    /// The YAML text between the delimiters, if a block was present.
    pub yaml: Option<&'a str>,
    /// The remaining body.
    pub body: &'a str,
    /// Byte offset of `body` inside the original text.
    pub body_offset: usize,
}

/// Separate a leading `---` delimited block from the rest of the text.
///
/// An unterminated block is treated as ordinary body text.
pub fn split(text: &str) -> Split<'_> {
    let no_front_matter = Split {
        yaml: None,
        body: text,
        body_offset: 0,
    };

    let text_no_bom = text.strip_prefix('\u{feff}').unwrap_or(text);
    let bom_len = text.len() - text_no_bom.len();

    let Some(first_line_end) = text_no_bom.find('\n') else {
        return no_front_matter;
    };
    if text_no_bom[..first_line_end].trim_end() != "---" {
        return no_front_matter;
    }

    let yaml_start = first_line_end + 1;
    let mut cursor = yaml_start;
    while cursor <= text_no_bom.len() {
        let rest = &text_no_bom[cursor..];
        let line_end = rest.find('\n').map(|i| cursor + i);
        let line_stop = line_end.unwrap_or(text_no_bom.len());
        let trimmed = text_no_bom[cursor..line_stop].trim_end();
        if trimmed == "---" || trimmed == "..." {
            let body_start =
                line_end.map(|i| i + 1).unwrap_or(text_no_bom.len());
            return Split {
                yaml: Some(&text_no_bom[yaml_start..cursor]),
                body: &text_no_bom[body_start..],
                body_offset: bom_len + body_start,
            };
        }
        match line_end {
            Some(end) => cursor = end + 1,
            None => break,
        }
    }

    no_front_matter
}

/// Parse a YAML front-matter block into properties.
///
/// Null values are dropped. A block that is not a mapping yields no
/// properties.
pub fn parse_properties(
    yaml: &str,
) -> Result<BTreeMap<String, PropertyValue>> {
    if yaml.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let value: Value = serde_yaml::from_str(yaml)?;
    let Value::Mapping(mapping) = value else {
        return Ok(BTreeMap::new());
    };

    let mut properties = BTreeMap::new();
    for (key, value) in mapping {
        let Some(key) = key_text(&key) else { continue };
        if let Some(value) = convert(value, 0) {
            properties.insert(key, value);
        }
    }
    Ok(properties)
}

fn key_text(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn convert(value: Value, depth: usize) -> Option<PropertyValue> {
    if depth > MAX_VALUE_DEPTH {
        return None;
    }
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(PropertyValue::Bool(b)),
        Value::Number(n) => n.as_f64().map(PropertyValue::Number),
        Value::String(s) if looks_like_date(&s) => {
            Some(PropertyValue::Date(s))
        }
        Value::String(s) => Some(PropertyValue::String(s)),
        Value::Sequence(items) => Some(PropertyValue::Array(
            items
                .into_iter()
                .filter_map(|item| convert(item, depth + 1))
                .collect(),
        )),
        Value::Mapping(mapping) => {
            let mut object = BTreeMap::new();
            for (key, value) in mapping {
                let Some(key) = key_text(&key) else { continue };
                if let Some(value) = convert(value, depth + 1) {
                    object.insert(key, value);
                }
            }
            Some(PropertyValue::Object(object))
        }
        Value::Tagged(tagged) => convert(tagged.value, depth),
    }
}

/// `YYYY-MM-DD`, optionally followed by a time component.
fn looks_like_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() >= 10
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(u8::is_ascii_digit)
        && (bytes.len() == 10 || matches!(bytes[10], b'T' | b' '))
}

/// One indexable property value.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatProperty {
    pub key: String,
    pub text: String,
    /// Boolean or numeric literal.
    pub literal: bool,
}

/// Flatten properties into indexable text values.
///
/// Primitives are emitted directly and arrays of primitives element by
/// element, up to [`MAX_FLATTEN_DEPTH`] levels and [`MAX_ARRAY_ITEMS`]
/// elements per array. Objects are always skipped. The traversal uses an
/// explicit stack so its cost is bounded by those limits alone.
pub fn flatten(
    properties: &BTreeMap<String, PropertyValue>,
) -> Vec<FlatProperty> {
    let mut out = Vec::new();
    let mut stack: Vec<(&str, &PropertyValue, usize)> = properties
        .iter()
        .rev()
        .map(|(key, value)| (key.as_str(), value, 0))
        .collect();

    while let Some((key, value, depth)) = stack.pop() {
        match value {
            PropertyValue::Object(_) => {}
            PropertyValue::Array(items) => {
                if depth >= MAX_FLATTEN_DEPTH {
                    continue;
                }
                for item in items.iter().take(MAX_ARRAY_ITEMS).rev() {
                    stack.push((key, item, depth + 1));
                }
            }
            primitive => {
                if let Some(text) = primitive.as_text()
                    && !text.trim().is_empty()
                {
                    out.push(FlatProperty {
                        key: key.to_string(),
                        text,
                        literal: primitive.is_literal(),
                    });
                }
            }
        }
    }

    out
}

/// Tags declared in front-matter under `tags` or `tag`, either as a list or
/// as a comma/space separated string. Leading `#` is stripped.
pub fn declared_tags(
    properties: &BTreeMap<String, PropertyValue>,
) -> Vec<String> {
    let mut tags = Vec::new();
    for key in ["tags", "tag"] {
        let Some(value) = properties.get(key) else { continue };
        let mut push = |raw: &str| {
            for part in raw.split([',', ' ']) {
                let tag = part.trim().trim_start_matches('#');
                if !tag.is_empty() {
                    tags.push(tag.to_string());
                }
            }
        };
        match value {
            PropertyValue::Array(items) => {
                for item in items.iter().take(MAX_ARRAY_ITEMS) {
                    if let Some(text) = item.as_text() {
                        push(&text);
                    }
                }
            }
            other => {
                if let Some(text) = other.as_text() {
                    push(&text);
                }
            }
        }
    }
    tags
}
