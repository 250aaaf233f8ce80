//! # docqa (library root)
//!
//! Question answering over a single PDF with retrieval-augmented generation.
//!
//! The document is loaded once, split into segments, embedded and indexed; every
//! question is then embedded, matched against the index, and answered by a chat
//! model from the retrieved segments only.
//!
//! ## Modules
//! - [`document`]: PDF loading and segment splitting.
//! - [`embeddings`]: the embedding provider.
//! - [`vector_store`]: the exact similarity index and its on-disk snapshot.
//! - [`api`]: client construction, retries, and the chat model.
//! - [`template`]: the prompt that stuffs retrieved segments.
//! - [`pipeline`]: the memoized retrieval pipeline and application context.
//! - [`render`], [`pretty`]: page and terminal presentation of answers.
//! - [`server`]: the web UI.
//! - [`commands`], [`config`], [`error`]: CLI, settings, and the error type.

use directories::ProjectDirs;

pub mod api;
pub mod commands;
pub mod config;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod pipeline;
pub mod pretty;
pub mod render;
pub mod server;
pub mod template;
pub mod vector_store;

use crate::error::QaError;

/// Return the per-platform configuration directory used by docqa.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "awful-sec", "docqa")`, e.g. `~/.config/docqa` on Linux.
///
/// The directory is **not** created by this function.
///
/// # Errors
/// [`QaError::Configuration`] if the platform configuration directory cannot be
/// determined.
///
/// # Examples
/// ```rust
/// let cfg = docqa::config_dir().expect("has a config dir");
/// println!("config at {}", cfg.display());
/// ```
pub fn config_dir() -> Result<std::path::PathBuf, QaError> {
    let proj_dirs = ProjectDirs::from("com", "awful-sec", "docqa")
        .ok_or_else(|| QaError::Configuration("Unable to determine config directory".to_string()))?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
