//! # Prompt templates
//!
//! The answering step "stuffs" every retrieved segment into one prompt. A
//! [`ChatTemplate`] holds the two message bodies:
//!
//! - `system_prompt` must contain `{context}`, replaced by the retrieved segment
//!   texts joined with `document_separator`;
//! - `user_prompt` must contain `{question}`, replaced by the user's query.
//!
//! The built-in template is used unless `template_path` in the config points at a
//! YAML file:
//!
//! ```yaml
//! system_prompt: |
//!   Answer only from the context below.
//!   ----------------
//!   {context}
//! user_prompt: "{question}"
//! document_separator: "\n\n"
//! ```

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::document::Segment;
use crate::error::QaError;

const CONTEXT_SLOT: &str = "{context}";
const QUESTION_SLOT: &str = "{question}";

/// The rendered messages sent to the chat model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// A reusable prompt template.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ChatTemplate {
    /// System message; `{context}` is replaced by the retrieved text.
    pub system_prompt: String,

    /// User message; `{question}` is replaced by the query.
    pub user_prompt: String,

    /// Placed between consecutive segments inside `{context}`.
    pub document_separator: String,
}

impl Default for ChatTemplate {
    fn default() -> Self {
        Self {
            system_prompt: "Use the following pieces of context to answer the user's question. \n\
If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\
----------------\n\
{context}"
                .to_string(),
            user_prompt: QUESTION_SLOT.to_string(),
            document_separator: "\n\n".to_string(),
        }
    }
}

impl ChatTemplate {
    /// Substitute the retrieved segments and the question.
    pub fn render(&self, question: &str, segments: &[Segment]) -> Prompt {
        let context = segments
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join(&self.document_separator);

        Prompt {
            system: self.system_prompt.replace(CONTEXT_SLOT, &context),
            user: self.user_prompt.replace(QUESTION_SLOT, question),
        }
    }

    fn check(&self) -> Result<(), QaError> {
        if !self.system_prompt.contains(CONTEXT_SLOT) {
            return Err(QaError::Configuration(format!(
                "template system_prompt must contain {CONTEXT_SLOT}"
            )));
        }
        if !self.user_prompt.contains(QUESTION_SLOT) {
            return Err(QaError::Configuration(format!(
                "template user_prompt must contain {QUESTION_SLOT}"
            )));
        }
        Ok(())
    }
}

/// Load a template from a YAML file.
///
/// ### Errors
/// [`QaError::Configuration`] if the file cannot be read, parsed, or lacks one of
/// the `{context}` / `{question}` slots.
pub fn load_template(path: &Path) -> Result<ChatTemplate, QaError> {
    tracing::info!("Loading template: {}", path.display());

    let content = fs::read_to_string(path)
        .map_err(|e| QaError::Configuration(format!("cannot read {}: {e}", path.display())))?;
    let template: ChatTemplate = serde_yaml::from_str(&content)
        .map_err(|e| QaError::Configuration(format!("cannot parse {}: {e}", path.display())))?;
    template.check()?;
    Ok(template)
}
