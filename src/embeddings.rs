//! # Embeddings
//!
//! Maps text to vectors through an OpenAI-compatible `/embeddings` endpoint.
//!
//! [`OpenAiEmbedder::embed_documents`] sends texts in batches of
//! `embedding_batch_size` and returns vectors in input order. A text longer than
//! the model's context (`embedding_ctx_length`, counted with the `cl100k_base`
//! tokenizer) is cut into windows that each fit; the window vectors are averaged,
//! weighted by token count, and L2-normalized into one vector for the text.

use async_openai::{Client, config::OpenAIConfig, types::CreateEmbeddingRequestArgs};
use async_trait::async_trait;
use tiktoken_rs::{CoreBPE, cl100k_base};
use tracing::{debug, info};

use crate::api::{create_client, with_retry};
use crate::config::DocQaConfig;
use crate::error::{ProviderErrorKind, QaError};

/// Something that turns text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed many texts; the output has one vector per input, in order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, QaError>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, QaError>;

    /// Identifies the vector space; persisted indexes are only reused for the same model.
    fn model_name(&self) -> &str;
}

/// [`Embedder`] backed by the `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    /// cl100k tokenizer, built once per embedder.
    bpe: CoreBPE,
    model: String,
    batch_size: usize,
    ctx_length: usize,
    max_retries: u32,
}

/// One request input: a whole text or one window of a long text.
#[derive(Debug, Clone, PartialEq)]
struct Window {
    owner: usize,
    text: String,
    tokens: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &DocQaConfig) -> Result<Self, QaError> {
        let bpe = cl100k_base()
            .map_err(|e| QaError::Configuration(format!("cannot load cl100k tokenizer: {e}")))?;
        Ok(Self {
            client: create_client(config)?,
            bpe,
            model: config.embedding_model.clone(),
            batch_size: config.embedding_batch_size.max(1),
            ctx_length: config.embedding_ctx_length.max(1),
            max_retries: config.max_retries,
        })
    }

    async fn request_batch(&self, inputs: Vec<String>) -> Result<Vec<Vec<f32>>, QaError> {
        let expected = inputs.len();
        let request = CreateEmbeddingRequestArgs::default()
            .model(self.model.clone())
            .input(inputs)
            .build()?;

        let client = &self.client;
        let response = with_retry(self.max_retries, "embeddings", || {
            let request = request.clone();
            async move { client.embeddings().create(request).await.map_err(QaError::from) }
        })
        .await?;

        let mut data = response.data;
        if data.len() != expected {
            return Err(QaError::provider(
                ProviderErrorKind::Rejected,
                format!("asked for {expected} embeddings, got {}", data.len()),
            ));
        }
        data.sort_by_key(|e| e.index);
        Ok(data.into_iter().map(|e| e.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, QaError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let windows = split_into_windows(&self.bpe, texts, self.ctx_length);
        info!(
            "Embedding {} texts ({} request inputs) with {}",
            texts.len(),
            windows.len(),
            self.model
        );

        let mut vectors = Vec::with_capacity(windows.len());
        for (n, batch) in windows.chunks(self.batch_size).enumerate() {
            debug!("Embedding batch {} ({} inputs)", n + 1, batch.len());
            let inputs = batch.iter().map(|w| w.text.clone()).collect();
            vectors.extend(self.request_batch(inputs).await?);
        }

        Ok(combine_windows(texts.len(), &windows, vectors))
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, QaError> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            QaError::provider(ProviderErrorKind::Rejected, "no embedding returned for query")
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Break every text into request inputs that fit the model's context.
fn split_into_windows(bpe: &CoreBPE, texts: &[String], ctx_length: usize) -> Vec<Window> {
    let mut windows = Vec::with_capacity(texts.len());
    for (owner, text) in texts.iter().enumerate() {
        for (text, tokens) in context_windows(bpe, text, ctx_length) {
            windows.push(Window {
                owner,
                text,
                tokens,
            });
        }
    }
    windows
}

/// Cut `text` into evenly sized character windows of at most `ctx_length` tokens.
fn context_windows(bpe: &CoreBPE, text: &str, ctx_length: usize) -> Vec<(String, usize)> {
    let count = |s: &str| bpe.encode_with_special_tokens(s).len();

    let total = count(text);
    if total <= ctx_length {
        return vec![(text.to_string(), total)];
    }

    let chars: Vec<char> = text.chars().collect();
    let mut parts = total.div_ceil(ctx_length);
    loop {
        let size = chars.len().div_ceil(parts).max(1);
        let windows: Vec<(String, usize)> = chars
            .chunks(size)
            .map(|chunk| {
                let s: String = chunk.iter().collect();
                let n = count(&s);
                (s, n)
            })
            .collect();
        if size == 1 || windows.iter().all(|(_, n)| *n <= ctx_length) {
            return windows;
        }
        parts += 1;
    }
}

/// Fold window vectors back into one vector per original text.
fn combine_windows(text_count: usize, windows: &[Window], vectors: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
    let mut grouped: Vec<Vec<(Vec<f32>, usize)>> = vec![Vec::new(); text_count];
    for (window, vector) in windows.iter().zip(vectors) {
        grouped[window.owner].push((vector, window.tokens));
    }

    grouped
        .into_iter()
        .map(|mut parts| {
            if parts.len() == 1 {
                return parts.remove(0).0;
            }
            weighted_average(&parts)
        })
        .collect()
}

fn weighted_average(parts: &[(Vec<f32>, usize)]) -> Vec<f32> {
    let dim = parts.first().map(|(v, _)| v.len()).unwrap_or(0);
    let total_weight: f32 = parts.iter().map(|(_, w)| *w as f32).sum::<f32>().max(1.0);

    let mut average = vec![0f32; dim];
    for (vector, weight) in parts {
        for (acc, x) in average.iter_mut().zip(vector) {
            *acc += x * (*weight as f32) / total_weight;
        }
    }

    let norm = average.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        average.iter_mut().for_each(|x| *x /= norm);
    }
    average
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn mock_config(api_base: String) -> DocQaConfig {
        DocQaConfig {
            api_key: "mock_api_key".to_string(),
            api_base,
            embedding_model: "mock-embedding".to_string(),
            max_retries: 1,
            ..DocQaConfig::default()
        }
    }

    fn embedding_body(vectors: &[(u32, [f32; 2])]) -> serde_json::Value {
        json!({
            "object": "list",
            "data": vectors.iter().map(|(i, v)| json!({
                "object": "embedding",
                "index": i,
                "embedding": v,
            })).collect::<Vec<_>>(),
            "model": "mock-embedding",
            "usage": {"prompt_tokens": 4, "total_tokens": 4}
        })
    }

    #[test]
    fn test_short_text_is_single_window() {
        let bpe = cl100k_base().unwrap();
        let windows = context_windows(&bpe, "What is the TIN format?", 8191);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].0, "What is the TIN format?");
    }

    #[test]
    fn test_long_text_is_cut_to_context() {
        let bpe = cl100k_base().unwrap();
        let text = "invoice number and tax identification ".repeat(40);
        let windows = context_windows(&bpe, &text, 16);
        assert!(windows.len() > 1);
        assert!(windows.iter().all(|(_, n)| *n <= 16));
        let rebuilt: String = windows.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_windows_are_averaged_and_normalized() {
        let windows = vec![
            Window { owner: 0, text: "a".into(), tokens: 1 },
            Window { owner: 0, text: "b".into(), tokens: 1 },
            Window { owner: 1, text: "c".into(), tokens: 3 },
        ];
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]];
        let combined = combine_windows(2, &windows, vectors);

        assert_eq!(combined.len(), 2);
        let expected = 1.0 / 2f32.sqrt();
        assert!((combined[0][0] - expected).abs() < 1e-6);
        assert!((combined[0][1] - expected).abs() < 1e-6);
        // single-window texts pass through untouched
        assert_eq!(combined[1], vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn test_queries_reuse_the_loaded_tokenizer() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(200).json_body(embedding_body(&[(0, [0.6, 0.8])]));
            })
            .await;

        let embedder = OpenAiEmbedder::new(&mock_config(server.base_url())).unwrap();
        let windows = split_into_windows(&embedder.bpe, &["What is the TIN format?".to_string()], 8191);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].tokens, embedder.bpe.encode_with_special_tokens("What is the TIN format?").len());

        for _ in 0..3 {
            assert_eq!(embedder.embed_query("What is the TIN format?").await.unwrap(), vec![0.6, 0.8]);
        }
        mock.assert_calls_async(3).await;
    }

    #[tokio::test]
    async fn test_embed_documents_orders_by_index() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(200)
                    .json_body(embedding_body(&[(1, [0.0, 1.0]), (0, [1.0, 0.0])]));
            })
            .await;

        let embedder = OpenAiEmbedder::new(&mock_config(server.base_url())).unwrap();
        let vectors = embedder
            .embed_documents(&["page one".to_string(), "page two".to_string()])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_embed_documents_batches_requests() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(200).json_body(embedding_body(&[(0, [1.0, 0.0])]));
            })
            .await;

        let config = DocQaConfig {
            embedding_batch_size: 1,
            ..mock_config(server.base_url())
        };
        let embedder = OpenAiEmbedder::new(&config).unwrap();
        let texts: Vec<String> = (1..=3).map(|i| format!("page {i}")).collect();
        let vectors = embedder.embed_documents(&texts).await.unwrap();

        mock.assert_calls_async(3).await;
        assert_eq!(vectors.len(), 3);
    }

    #[tokio::test]
    async fn test_count_mismatch_is_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(200).json_body(embedding_body(&[(0, [1.0, 0.0])]));
            })
            .await;

        let embedder = OpenAiEmbedder::new(&mock_config(server.base_url())).unwrap();
        let err = embedder
            .embed_documents(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QaError::Provider {
                kind: ProviderErrorKind::Rejected,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_key_is_authentication_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(401).json_body(json!({
                    "error": {
                        "message": "Incorrect API key provided",
                        "type": "invalid_request_error",
                        "param": null,
                        "code": "invalid_api_key"
                    }
                }));
            })
            .await;

        let embedder = OpenAiEmbedder::new(&mock_config(server.base_url())).unwrap();
        let err = embedder.embed_query("hello").await.unwrap_err();
        assert!(matches!(
            err,
            QaError::Provider {
                kind: ProviderErrorKind::Authentication,
                ..
            }
        ));
    }
}
