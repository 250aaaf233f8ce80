//! Error taxonomy shared by the loader, the providers, the index and the UI.
//!
//! Every fallible operation in the crate returns [`QaError`]. The variants map
//! onto the failure classes an operator cares about:
//!
//! - [`QaError::Configuration`]: bad or missing settings, fatal at startup.
//! - [`QaError::DocumentLoad`]: the source PDF cannot be read or yields no text.
//! - [`QaError::Provider`]: the embedding or chat provider failed; carries a
//!   [`ProviderErrorKind`] so callers can decide whether to retry.
//! - [`QaError::Index`]: the similarity index rejected a vector or a persisted
//!   snapshot could not be decoded.
//! - [`QaError::Render`]: the page template failed to compile or render.

use std::fmt;

use async_openai::error::OpenAIError;
use thiserror::Error;

/// Coarse classification of provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Credentials were missing, invalid, or revoked.
    Authentication,
    /// Rate limit or quota exhausted.
    RateLimit,
    /// Transport-level failure (connect, timeout, reset).
    Network,
    /// The provider answered but refused or mangled the request.
    Rejected,
}

impl ProviderErrorKind {
    /// Only transport failures are worth another attempt.
    pub fn is_transient(self) -> bool {
        matches!(self, ProviderErrorKind::Network)
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProviderErrorKind::Authentication => "authentication",
            ProviderErrorKind::RateLimit => "rate limit",
            ProviderErrorKind::Network => "network",
            ProviderErrorKind::Rejected => "rejected",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum QaError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to load document: {0}")]
    DocumentLoad(String),

    #[error("provider error ({kind}): {message}")]
    Provider {
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("index error: {0}")]
    Index(String),

    #[error("render error: {0}")]
    Render(String),
}

impl QaError {
    pub fn provider(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        QaError::Provider {
            kind,
            message: message.into(),
        }
    }

    /// Whether the failure is a transport hiccup that a bounded retry may fix.
    pub fn is_transient(&self) -> bool {
        match self {
            QaError::Provider { kind, .. } => kind.is_transient(),
            _ => false,
        }
    }
}

impl From<OpenAIError> for QaError {
    fn from(err: OpenAIError) -> Self {
        match err {
            OpenAIError::Reqwest(e) => QaError::provider(ProviderErrorKind::Network, e.to_string()),
            OpenAIError::ApiError(api) => {
                let code = api.code.clone().unwrap_or_default();
                let kind_hint = api.r#type.clone().unwrap_or_default();
                let kind = if code == "invalid_api_key"
                    || kind_hint == "authentication_error"
                    || api.message.contains("API key")
                {
                    ProviderErrorKind::Authentication
                } else if code == "rate_limit_exceeded"
                    || code == "insufficient_quota"
                    || kind_hint == "insufficient_quota"
                {
                    ProviderErrorKind::RateLimit
                } else {
                    ProviderErrorKind::Rejected
                };
                QaError::provider(kind, api.message)
            }
            OpenAIError::InvalidArgument(msg) => QaError::Configuration(msg),
            other => QaError::provider(ProviderErrorKind::Rejected, other.to_string()),
        }
    }
}

impl From<std::io::Error> for QaError {
    fn from(err: std::io::Error) -> Self {
        QaError::DocumentLoad(err.to_string())
    }
}
