use serde_json::{Map, Value};

use crate::{Document, Row, TransformError};

/// Default for [`Expander::with_max_index`].
pub const MAX_ARRAY_INDEX: usize = u16::MAX as usize;

/// Rebuilds nested structure from flat keys such as `geo.coordinates.0`.
///
/// Keys without the separator are kept in place. Path roots that do not
/// already exist are appended after them, in the order their first key
/// appears. A purely numeric segment creates an array when it is the first
/// thing written under a new container.
///
/// Array indices above `max_index` (65535 unless changed) fail with
/// [`TransformError::Expand`], since the array is padded up to the index.
#[derive(Debug, Clone)]
pub struct Expander {
    separator: String,
    max_index: usize,
}

impl Expander {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            max_index: MAX_ARRAY_INDEX,
        }
    }

    pub fn with_max_index(mut self, max_index: usize) -> Self {
        self.max_index = max_index;
        self
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub fn max_index(&self) -> usize {
        self.max_index
    }

    pub fn expand(&self, flat: Row) -> Result<Document, TransformError> {
        let sep = self.separator.as_str();
        if sep.is_empty() || !flat.keys().any(|k| k.contains(sep)) {
            return Ok(flat);
        }

        let mut out = Map::with_capacity(flat.len());
        let mut paths = Vec::new();
        for (key, value) in flat {
            if key.contains(sep) {
                paths.push((key, value));
            } else {
                out.insert(key, value);
            }
        }

        for (key, value) in paths {
            let segments: Vec<&str> = key.split(sep).collect();
            fill(&mut out, &segments, value, &key, self.max_index)?;
        }
        Ok(out)
    }
}

fn fill(
    out: &mut Document,
    segments: &[&str],
    value: Value,
    key: &str,
    max_index: usize,
) -> Result<(), TransformError> {
    let Some((root, rest)) = segments.split_first() else {
        return Ok(());
    };

    let mut slot = out.entry(root.to_string()).or_insert(Value::Null);
    let mut parent = *root;
    for segment in rest {
        if slot.is_null() {
            *slot = if is_index(segment) {
                Value::Array(Vec::new())
            } else {
                Value::Object(Map::new())
            };
        }
        if !(slot.is_object() || slot.is_array()) {
            if is_empty_container(&value) {
                return Ok(());
            }
            return Err(TransformError::Expand {
                key: key.to_string(),
                reason: format!("trying to redefine `{}` which is a {}", parent, kind(slot)),
            });
        }
        slot = child(slot, segment, key, max_index)?;
        parent = *segment;
    }

    if is_non_empty_container(slot) {
        if is_empty_container(&value) {
            return Ok(());
        }
        return Err(TransformError::Expand {
            key: key.to_string(),
            reason: format!("trying to redefine non-empty `{}`", parent),
        });
    }
    *slot = value;
    Ok(())
}

fn child<'a>(
    container: &'a mut Value,
    segment: &str,
    key: &str,
    max_index: usize,
) -> Result<&'a mut Value, TransformError> {
    match container {
        Value::Object(map) => Ok(map.entry(segment.to_string()).or_insert(Value::Null)),
        Value::Array(items) => {
            let index = segment
                .parse::<usize>()
                .ok()
                .filter(|_| is_index(segment))
                .ok_or_else(|| TransformError::Expand {
                    key: key.to_string(),
                    reason: format!("`{}` is not an array index", segment),
                })?;
            if index > max_index {
                return Err(TransformError::Expand {
                    key: key.to_string(),
                    reason: format!("array index {} exceeds {}", index, max_index),
                });
            }
            if items.len() <= index {
                items.resize(index + 1, Value::Null);
            }
            Ok(&mut items[index])
        }
        other => Err(TransformError::Expand {
            key: key.to_string(),
            reason: format!("cannot descend into a {}", kind(other)),
        }),
    }
}

fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn is_non_empty_container(value: &Value) -> bool {
    (value.is_object() || value.is_array()) && !is_empty_container(value)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Convenience wrapper around [`Expander::expand`].
pub fn expand(flat: Row, separator: &str) -> Result<Document, TransformError> {
    Expander::new(separator).expand(flat)
}
