//! # API Module
//!
//! Client construction and chat completion against an OpenAI-compatible API.
//!
//! The credential and endpoint come from [`DocQaConfig`] and are handed to
//! [`create_client`] explicitly. Calls that fail at the transport level are
//! retried a bounded number of times by [`with_retry`]; authentication errors and
//! rejected requests are returned immediately.
//!
//! # Example
//!
//! ```no_run
//! use docqa::api::{ChatModel, OpenAiChat};
//! use docqa::config::DocQaConfig;
//! use docqa::template::Prompt;
//!
//! # async fn run() -> Result<(), docqa::error::QaError> {
//! let config = DocQaConfig { api_key: "sk-...".into(), ..DocQaConfig::default() };
//! let chat = OpenAiChat::new(&config)?;
//! let prompt = Prompt { system: "Be brief.".into(), user: "Hello?".into() };
//! println!("{}", chat.complete(&prompt).await?);
//! # Ok(()) }
//! ```

use std::future::Future;
use std::time::Duration;

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::DocQaConfig;
use crate::error::{ProviderErrorKind, QaError};
use crate::template::Prompt;

/// Delay before the first retry; doubled for every further attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Creates a new OpenAI API client from configuration.
///
/// The underlying HTTP client carries the configured per-request timeout.
///
/// # Errors
/// [`QaError::Configuration`] if the HTTP client cannot be built.
pub fn create_client(config: &DocQaConfig) -> Result<Client<OpenAIConfig>, QaError> {
    let openai_config = OpenAIConfig::new()
        .with_api_key(config.api_key.clone())
        .with_api_base(config.api_base.clone());
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .map_err(|e| QaError::Configuration(format!("cannot build HTTP client: {e}")))?;
    debug!("Client created for {}", config.api_base);
    Ok(Client::with_config(openai_config).with_http_client(http_client))
}

/// Run `op` up to `max_attempts` times while it fails with a transient error.
///
/// Waits [`RETRY_BASE_DELAY`] after the first failure and doubles the wait after
/// each subsequent one.
pub async fn with_retry<T, F, Fut>(max_attempts: u32, label: &str, mut op: F) -> Result<T, QaError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, QaError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                warn!(
                    "{} failed ({}), attempt {}/{}; retrying in {:?}",
                    label, err, attempt, max_attempts, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// A hosted chat model that turns a prompt into answer text.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, QaError>;
}

/// [`ChatModel`] backed by the `/chat/completions` endpoint.
pub struct OpenAiChat {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAiChat {
    pub fn new(config: &DocQaConfig) -> Result<Self, QaError> {
        Ok(Self {
            client: create_client(config)?,
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, prompt: &Prompt) -> Result<String, QaError> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(prompt.system.clone())
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt.user.clone())
                .build()?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .temperature(self.temperature)
            .messages(messages)
            .build()?;

        debug!("Sending chat request to {}", self.model);

        let client = &self.client;
        let response = with_retry(self.max_retries, "chat completion", || {
            let request = request.clone();
            async move { client.chat().create(request).await.map_err(QaError::from) }
        })
        .await?;

        if response.choices.is_empty() {
            return Err(QaError::provider(
                ProviderErrorKind::Rejected,
                "chat completion returned no choices",
            ));
        }

        let answer = response
            .choices
            .into_iter()
            .filter_map(|choice| choice.message.content)
            .collect::<Vec<_>>()
            .join("");

        Ok(answer)
    }
}
