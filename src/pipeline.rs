//! # Retrieval pipeline
//!
//! [`QaPipeline`] is the retrieval-augmented answering object: it embeds a query,
//! fetches the nearest segments from the [`VectorStore`], stuffs them into the
//! prompt and asks the chat model.
//!
//! [`AppContext`] owns the collaborators and the memoized pipeline. The first
//! call to [`AppContext::pipeline`] runs the initializer (load, split, embed,
//! index, bind); every later call, including concurrent ones racing the first,
//! gets the same `Arc<QaPipeline>`. A failed initialization leaves the slot
//! empty, so the context never reports ready on a half-built index.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::api::{ChatModel, OpenAiChat};
use crate::config::DocQaConfig;
use crate::document::{DocumentLoader, PdfLoader, Segment};
use crate::embeddings::{Embedder, OpenAiEmbedder};
use crate::error::QaError;
use crate::template::{ChatTemplate, load_template};
use crate::vector_store::{IndexSnapshot, VectorStore, fingerprint_file};

/// Answer text plus the segments it was grounded on, in retrieval order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerResult {
    pub answer: String,
    pub source_documents: Vec<Segment>,
}

/// Where a built index is saved to and reloaded from.
#[derive(Debug, Clone)]
pub struct Persistence {
    pub index_file: PathBuf,
    pub source_file: PathBuf,
}

/// The bound retrieval-augmented answering object.
pub struct QaPipeline {
    store: VectorStore,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    template: ChatTemplate,
    top_k: usize,
}

impl QaPipeline {
    /// Run the initializer: load and split the document, embed every segment,
    /// build the index and bind it to the chat model.
    ///
    /// With `persistence`, a snapshot built from the same file and embedding
    /// model is reused instead of re-embedding, and a fresh build is saved.
    pub async fn build(
        loader: &dyn DocumentLoader,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        template: ChatTemplate,
        top_k: usize,
        persistence: Option<&Persistence>,
    ) -> Result<Self, QaError> {
        let fingerprint = match persistence {
            Some(p) => Some(fingerprint_file(&p.source_file)?),
            None => None,
        };

        let reused = match (persistence, fingerprint.as_deref()) {
            (Some(p), Some(fp)) => IndexSnapshot::load_matching(&p.index_file, fp, embedder.model_name()),
            _ => None,
        };

        let store = match reused {
            Some(store) => store,
            None => {
                let store = Self::index_document(loader, embedder.as_ref()).await?;
                if let (Some(p), Some(fp)) = (persistence, fingerprint) {
                    let snapshot =
                        IndexSnapshot::new(fp, embedder.model_name().to_string(), store.clone());
                    if let Err(e) = snapshot.save(&p.index_file) {
                        warn!("Keeping index in memory only: {}", e);
                    }
                }
                store
            }
        };

        info!("Pipeline ready: {} segments indexed, top_k = {}", store.len(), top_k);
        Ok(Self {
            store,
            embedder,
            chat,
            template,
            top_k,
        })
    }

    async fn index_document(
        loader: &dyn DocumentLoader,
        embedder: &dyn Embedder,
    ) -> Result<VectorStore, QaError> {
        let segments = loader.load().await?;
        let texts: Vec<String> = segments.iter().map(|s| s.content.clone()).collect();
        let vectors = embedder.embed_documents(&texts).await?;
        if vectors.len() != segments.len() {
            return Err(QaError::Index(format!(
                "{} segments but {} embeddings",
                segments.len(),
                vectors.len()
            )));
        }
        VectorStore::from_pairs(segments.into_iter().zip(vectors).collect())
    }

    /// Answer one query from the indexed document.
    pub async fn ask(&self, query: &str) -> Result<AnswerResult, QaError> {
        let vector = self.embedder.embed_query(query).await?;
        let source_documents = self.store.search(&vector, self.top_k)?;
        debug!(
            "Retrieved segments {:?}",
            source_documents.iter().map(|s| s.position).collect::<Vec<_>>()
        );

        let prompt = self.template.render(query, &source_documents);
        let answer = self.chat.complete(&prompt).await?;

        Ok(AnswerResult {
            answer,
            source_documents,
        })
    }

    pub fn segment_count(&self) -> usize {
        self.store.len()
    }
}

/// Process-wide application state: configuration, collaborators, and the
/// one-time pipeline slot.
pub struct AppContext {
    config: DocQaConfig,
    loader: Arc<dyn DocumentLoader>,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    template: ChatTemplate,
    pipeline: OnceCell<Arc<QaPipeline>>,
}

impl AppContext {
    /// Wire the production collaborators from configuration.
    ///
    /// # Errors
    /// [`QaError::Configuration`] if the config fails validation or the prompt
    /// template cannot be loaded.
    pub fn from_config(config: DocQaConfig) -> Result<Self, QaError> {
        config.validate()?;

        let loader = PdfLoader::new(
            config.pdf_path.clone(),
            config.max_segment_chars,
            config.segment_overlap,
        );
        let embedder = OpenAiEmbedder::new(&config)?;
        let chat = OpenAiChat::new(&config)?;
        let template = match &config.template_path {
            Some(path) => load_template(path)?,
            None => ChatTemplate::default(),
        };

        Ok(Self::new(
            config,
            Arc::new(loader),
            Arc::new(embedder),
            Arc::new(chat),
            template,
        ))
    }

    pub fn new(
        config: DocQaConfig,
        loader: Arc<dyn DocumentLoader>,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        template: ChatTemplate,
    ) -> Self {
        Self {
            config,
            loader,
            embedder,
            chat,
            template,
            pipeline: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &DocQaConfig {
        &self.config
    }

    /// The memoized pipeline, built on first access.
    pub async fn pipeline(&self) -> Result<Arc<QaPipeline>, QaError> {
        self.pipeline
            .get_or_try_init(|| async {
                info!("Initializing QA pipeline for {}", self.config.pdf_path.display());
                let persistence = self.config.persist_index.then(|| Persistence {
                    index_file: self.config.index_file(),
                    source_file: self.config.pdf_path.clone(),
                });
                let pipeline = QaPipeline::build(
                    self.loader.as_ref(),
                    Arc::clone(&self.embedder),
                    Arc::clone(&self.chat),
                    self.template.clone(),
                    self.config.top_k,
                    persistence.as_ref(),
                )
                .await?;
                Ok::<_, QaError>(Arc::new(pipeline))
            })
            .await
            .cloned()
    }

    /// Build the pipeline and confirm that a matching snapshot is on disk.
    ///
    /// Serving keeps working when the snapshot cannot be written; this is the
    /// path that reports it.
    ///
    /// # Errors
    /// [`QaError::Configuration`] if persistence is off, [`QaError::Index`] if no
    /// snapshot for the current document and embedding model could be read back.
    pub async fn write_index(&self) -> Result<usize, QaError> {
        if !self.config.persist_index {
            return Err(QaError::Configuration(
                "index requires persist_index: true in the config".to_string(),
            ));
        }

        let pipeline = self.pipeline().await?;
        let index_file = self.config.index_file();
        let fingerprint = fingerprint_file(&self.config.pdf_path)?;
        match IndexSnapshot::load_matching(&index_file, &fingerprint, self.embedder.model_name()) {
            Some(_) => Ok(pipeline.segment_count()),
            None => Err(QaError::Index(format!(
                "index was built but not saved to {}",
                index_file.display()
            ))),
        }
    }

    /// Whether the pipeline has been built successfully.
    pub fn is_ready(&self) -> bool {
        self.pipeline.initialized()
    }
}
