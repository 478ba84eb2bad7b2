use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::{Row, TransformError};

lazy_static! {
    static ref BOOL_PATTERN: Regex = Regex::new(r"(?i-u)^(false|true)$").expect("valid boolean pattern");
}

/// A field-level rewrite rule.
///
/// `modify` inspects `row[key]` and returns `Ok(true)` once it has claimed the
/// field, after deleting or replacing it in place. `Ok(false)` hands the field
/// to the next modifier in the chain. The key may already be gone if an
/// earlier field's modifier removed it.
pub trait Modifier: Send + Sync {
    fn modify(&self, row: &mut Row, key: &str) -> Result<bool, TransformError>;
}

impl<F> Modifier for F
where
    F: Fn(&mut Row, &str) -> Result<bool, TransformError> + Send + Sync,
{
    fn modify(&self, row: &mut Row, key: &str) -> Result<bool, TransformError> {
        self(row, key)
    }
}

/// Drops fields whose value is `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveNull;

impl Modifier for RemoveNull {
    fn modify(&self, row: &mut Row, key: &str) -> Result<bool, TransformError> {
        if matches!(row.get(key), Some(Value::Null)) {
            row.shift_remove(key);
            return Ok(true);
        }
        Ok(false)
    }
}

/// Rewrites the strings `"true"` / `"false"` (any ASCII case) to booleans.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvertTrueFalse;

impl Modifier for ConvertTrueFalse {
    fn modify(&self, row: &mut Row, key: &str) -> Result<bool, TransformError> {
        let Some(value) = row.get_mut(key) else {
            return Ok(false);
        };
        let flag = match value {
            Value::String(s) if BOOL_PATTERN.is_match(s) => s.eq_ignore_ascii_case("true"),
            _ => return Ok(false),
        };
        *value = Value::Bool(flag);
        Ok(true)
    }
}

/// Ordered, first-match-wins list of modifiers. Fixed once built.
#[derive(Clone, Default)]
pub struct ModifierChain {
    modifiers: Vec<Arc<dyn Modifier>>,
}

impl ModifierChain {
    /// User modifiers run first, then null removal (unless nulls are kept),
    /// then boolean coercion (if enabled).
    pub fn new(user: Vec<Arc<dyn Modifier>>, keep_nulls: bool, convert_true_false: bool) -> Self {
        let mut modifiers = user;
        if !keep_nulls {
            modifiers.push(Arc::new(RemoveNull));
        }
        if convert_true_false {
            modifiers.push(Arc::new(ConvertTrueFalse));
        }
        Self { modifiers }
    }

    pub fn len(&self) -> usize {
        self.modifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modifiers.is_empty()
    }

    /// Runs one pass over every field present when the call starts.
    ///
    /// The key list is snapshotted up front so deletions made by a modifier
    /// never change which of the original fields get visited. On error the
    /// row keeps whatever mutations were already applied.
    pub fn apply(&self, row: &mut Row) -> Result<(), TransformError> {
        if self.modifiers.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = row.keys().cloned().collect();
        for key in &keys {
            for modifier in &self.modifiers {
                if modifier.modify(row, key)? {
                    break;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ModifierChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModifierChain")
            .field("len", &self.modifiers.len())
            .finish()
    }
}
