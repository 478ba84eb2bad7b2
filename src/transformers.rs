use tracing::{debug, instrument};

use crate::{Document, Expander, ModifierChain, Row};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("Modifier failed on `{key}`: {message}")]
    Modifier { key: String, message: String },
    #[error("Cannot expand `{key}`: {reason}")]
    Expand { key: String, reason: String },
}

impl TransformError {
    /// Shorthand for user modifiers that need to reject a field.
    pub fn modifier(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Modifier {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// The row-to-document core shared by push and pull delivery.
#[derive(Debug, Clone)]
pub struct RowTransformer {
    chain: ModifierChain,
    expander: Option<Expander>,
}

impl RowTransformer {
    pub fn new(chain: ModifierChain, expander: Option<Expander>) -> Self {
        Self { chain, expander }
    }

    pub fn chain(&self) -> &ModifierChain {
        &self.chain
    }

    pub fn expander(&self) -> Option<&Expander> {
        self.expander.as_ref()
    }

    /// Runs the modifier chain, then expansion if enabled.
    ///
    /// The row is consumed either way; a row that fails is dropped together
    /// with any partial edits.
    #[instrument(level = "trace", skip_all, fields(columns = row.len()))]
    pub fn transform(&self, mut row: Row) -> Result<Document, TransformError> {
        let result = self.chain.apply(&mut row).and_then(|()| match &self.expander {
            Some(expander) => expander.expand(row),
            None => Ok(row),
        });
        if let Err(e) = &result {
            debug!("Row transformation failed: {}", e);
        }
        result
    }
}
