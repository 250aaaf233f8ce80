//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the `DocQaConfig` struct, which holds the configuration parameters,
//! and a `load_config` function to load the configuration from a YAML file.
//!
//! Every field has a default, so a config file only needs to name what it changes:
//!
//! ```yaml
//! api_key: "sk-..."
//! pdf_path: "./docs/einvoice.pdf"
//! model: "gpt-3.5-turbo"
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use docqa::config::load_config;
//!
//! let config = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config.pdf_path);
//! ```

use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

use tracing::debug;

use crate::error::QaError;

/// Key values that ship in example configs and must never reach a provider.
const PLACEHOLDER_KEYS: &[&str] = &["CHANGEME", "YOUR_OPENAI_API_KEY"];

/// Represents the application's configuration.
///
/// The credential lives here and is handed to the provider clients by reference;
/// nothing is written into the process environment.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct DocQaConfig {
    /// The API key used to authenticate requests to the provider.
    pub api_key: String,

    /// The base URL of the OpenAI-compatible API.
    pub api_base: String,

    /// Chat model used to synthesize answers.
    pub model: String,

    /// Sampling temperature for the chat model.
    pub temperature: f32,

    /// Model used for segment and query embeddings.
    pub embedding_model: String,

    /// Maximum number of texts per embeddings request.
    pub embedding_batch_size: usize,

    /// Longest input (in cl100k tokens) the embedding model accepts.
    pub embedding_ctx_length: usize,

    /// The PDF answered over.
    pub pdf_path: PathBuf,

    /// Directory holding the persisted index, used when `persist_index` is set.
    pub vector_store_path: PathBuf,

    /// Save the index after building it and reuse it on the next start.
    pub persist_index: bool,

    /// Number of segments retrieved per query.
    pub top_k: usize,

    /// Pages longer than this many characters are split further.
    pub max_segment_chars: usize,

    /// Characters shared between consecutive splits of one page.
    pub segment_overlap: usize,

    /// Per-request timeout for provider calls.
    pub request_timeout_secs: u64,

    /// Attempts made for a provider call that fails at the transport level.
    pub max_retries: u32,

    /// Address the web UI binds to.
    pub bind: String,

    // Page chrome
    pub page_title: String,
    pub page_icon: String,
    pub intro: String,

    /// Optional YAML prompt template replacing the built-in one.
    pub template_path: Option<PathBuf>,
}

impl Default for DocQaConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            embedding_model: "text-embedding-ada-002".to_string(),
            embedding_batch_size: 1000,
            embedding_ctx_length: 8191,
            pdf_path: PathBuf::from("./docs/einvoice.pdf"),
            vector_store_path: PathBuf::from("./vector_store"),
            persist_index: false,
            top_k: 4,
            max_segment_chars: 4000,
            segment_overlap: 200,
            request_timeout_secs: 120,
            max_retries: 3,
            bind: "127.0.0.1:8501".to_string(),
            page_title: "E-Invoice Assistant (Hotel Edition)".to_string(),
            page_icon: "🧾".to_string(),
            intro: DEFAULT_INTRO.to_string(),
            template_path: None,
        }
    }
}

const DEFAULT_INTRO: &str = "Ask anything about the Malaysian e-invoicing system (MyInvois). \
The assistant pulls the relevant passages out of the document and answers from them.

For example:
- How do I handle guests who do not ask for an invoice?
- What are the requirements for a consolidated invoice?
- What is the TIN format?";

impl DocQaConfig {
    /// Check the settings that would otherwise fail late, deep inside a provider call.
    ///
    /// # Errors
    /// Returns [`QaError::Configuration`] naming the first offending field.
    pub fn validate(&self) -> Result<(), QaError> {
        let key = self.api_key.trim();
        if key.is_empty() || PLACEHOLDER_KEYS.contains(&key) {
            return Err(QaError::Configuration(
                "api_key is not set; put it in config.yaml or export OPENAI_API_KEY".to_string(),
            ));
        }
        if self.top_k == 0 {
            return Err(QaError::Configuration("top_k must be at least 1".to_string()));
        }
        if self.embedding_batch_size == 0 {
            return Err(QaError::Configuration(
                "embedding_batch_size must be at least 1".to_string(),
            ));
        }
        if self.embedding_ctx_length == 0 {
            return Err(QaError::Configuration(
                "embedding_ctx_length must be at least 1".to_string(),
            ));
        }
        if self.max_segment_chars == 0 || self.segment_overlap >= self.max_segment_chars {
            return Err(QaError::Configuration(format!(
                "segment_overlap ({}) must be smaller than max_segment_chars ({})",
                self.segment_overlap, self.max_segment_chars
            )));
        }
        Ok(())
    }

    /// Where the persisted index snapshot is written.
    pub fn index_file(&self) -> PathBuf {
        self.vector_store_path.join("index.bin")
    }
}

/// Loads the application's configuration from a YAML file.
///
/// # Errors
/// [`QaError::Configuration`] if the file cannot be read or parsed.
pub fn load_config(file: &str) -> Result<DocQaConfig, QaError> {
    debug!("Loading config from: {}", file);
    let content = fs::read_to_string(file)
        .map_err(|e| QaError::Configuration(format!("cannot read {file}: {e}")))?;
    let config: DocQaConfig = serde_yaml::from_str(&content)
        .map_err(|e| QaError::Configuration(format!("cannot parse {file}: {e}")))?;
    Ok(config)
}
