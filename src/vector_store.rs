//! # VectorStore
//!
//! In-memory similarity index over document segments.
//!
//! The index is flat: every query is compared against every stored vector by
//! Euclidean distance, so results are exact and deterministic. A single PDF
//! produces at most a few thousand segments, well within brute-force range.
//!
//! ## Responsibilities
//! - **Indexing**: holds `(Segment, Vec<f32>)` pairs of one fixed dimension.
//! - **Search**: returns the `top_k` closest segments, nearest first, ties broken
//!   by insertion order.
//! - **Persistence** (optional): [`IndexSnapshot`] writes the pairs with
//!   `bincode`, tagged with the embedding model and a blake3 fingerprint of the
//!   source file so that a stale snapshot is never reused.
//!
//! ## Quick Example
//! ```
//! use docqa::vector_store::VectorStore;
//! use docqa::document::Segment;
//!
//! let seg = |text: &str, position| Segment {
//!     content: text.to_string(), position, page: 1, source: "doc.pdf".into(),
//! };
//! let store = VectorStore::from_pairs(vec![
//!     (seg("near", 0), vec![0.0, 0.0]),
//!     (seg("far", 1), vec![5.0, 5.0]),
//! ]).unwrap();
//! let hits = store.search(&[0.1, 0.0], 1).unwrap();
//! assert_eq!(hits[0].content, "near");
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::document::Segment;
use crate::error::QaError;

/// Flat nearest-neighbour index over document segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorStore {
    /// Dimensionality of every stored vector.
    dimension: usize,
    segments: Vec<Segment>,
    vectors: Vec<Vec<f32>>,
}

impl VectorStore {
    /// Build the index from `(segment, vector)` pairs.
    ///
    /// # Errors
    /// [`QaError::Index`] if the pairs are empty or the vectors disagree on dimension.
    pub fn from_pairs(pairs: Vec<(Segment, Vec<f32>)>) -> Result<Self, QaError> {
        let dimension = match pairs.first() {
            Some((_, v)) if !v.is_empty() => v.len(),
            Some(_) => return Err(QaError::Index("embedding vectors are empty".to_string())),
            None => return Err(QaError::Index("no segments to index".to_string())),
        };

        let mut segments = Vec::with_capacity(pairs.len());
        let mut vectors = Vec::with_capacity(pairs.len());
        for (segment, vector) in pairs {
            if vector.len() != dimension {
                return Err(QaError::Index(format!(
                    "dimension mismatch: segment {} has {} values, expected {}",
                    segment.position,
                    vector.len(),
                    dimension
                )));
            }
            segments.push(segment);
            vectors.push(vector);
        }

        debug!("Built index of {} vectors ({}-d)", vectors.len(), dimension);
        Ok(Self {
            dimension,
            segments,
            vectors,
        })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Query the index for the `top_k` segments nearest to `vector`.
    ///
    /// # Errors
    /// `QaError::Index` if `vector` does not match the indexed dimension.
    pub fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<Segment>, QaError> {
        if vector.len() != self.dimension {
            return Err(QaError::Index(format!(
                "dimension mismatch: query has {} values, index has {}",
                vector.len(),
                self.dimension
            )));
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, Self::calc_euclidean_distance(vector, v)))
            .collect();
        // stable sort keeps insertion order among equal distances
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(i, _)| self.segments[i].clone())
            .collect())
    }

    /// Euclidean distance: `sqrt(Σ (a[i] - b[i])^2)` over the shared length.
    pub fn calc_euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// On-disk form of a built index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// blake3 hex digest of the source document bytes.
    pub fingerprint: String,
    /// Embedding model that produced the vectors.
    pub embedding_model: String,
    /// RFC 3339 creation time.
    pub created_at: String,
    pub store: VectorStore,
}

impl IndexSnapshot {
    pub fn new(fingerprint: String, embedding_model: String, store: VectorStore) -> Self {
        Self {
            fingerprint,
            embedding_model,
            created_at: chrono::Utc::now().to_rfc3339(),
            store,
        }
    }

    /// Write the snapshot, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<(), QaError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| QaError::Index(format!("cannot create {}: {e}", parent.display())))?;
        }
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| QaError::Index(format!("cannot encode index: {e}")))?;
        fs::write(path, bytes)
            .map_err(|e| QaError::Index(format!("cannot write {}: {e}", path.display())))?;
        info!("Saved index ({} segments) to {}", self.store.len(), path.display());
        Ok(())
    }

    /// Read a snapshot back.
    pub fn load(path: &Path) -> Result<Self, QaError> {
        let bytes = fs::read(path)
            .map_err(|e| QaError::Index(format!("cannot read {}: {e}", path.display())))?;
        let (snapshot, _) =
            bincode::serde::decode_from_slice::<Self, _>(&bytes, bincode::config::standard())
                .map_err(|e| QaError::Index(format!("cannot decode {}: {e}", path.display())))?;
        Ok(snapshot)
    }

    /// Reuse a snapshot at `path` only if it was built from the same document
    /// with the same embedding model. Missing, corrupt, or stale snapshots yield `None`.
    pub fn load_matching(path: &Path, fingerprint: &str, embedding_model: &str) -> Option<VectorStore> {
        if !path.exists() {
            return None;
        }
        match Self::load(path) {
            Ok(snapshot)
                if snapshot.fingerprint == fingerprint
                    && snapshot.embedding_model == embedding_model =>
            {
                info!(
                    "Reusing index from {} (built {})",
                    path.display(),
                    snapshot.created_at
                );
                Some(snapshot.store)
            }
            Ok(_) => {
                info!("Index at {} is stale, rebuilding", path.display());
                None
            }
            Err(e) => {
                warn!("Ignoring unreadable index: {}", e);
                None
            }
        }
    }
}

/// blake3 digest of a file's bytes, hex encoded.
pub fn fingerprint_file(path: &Path) -> Result<String, QaError> {
    let bytes = fs::read(path)
        .map_err(|e| QaError::DocumentLoad(format!("{}: {e}", path.display())))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn segment(content: &str, position: usize) -> Segment {
        Segment {
            content: content.to_string(),
            position,
            page: position + 1,
            source: PathBuf::from("einvoice.pdf"),
        }
    }

    fn store() -> VectorStore {
        VectorStore::from_pairs(vec![
            (segment("origin", 0), vec![0.0, 0.0]),
            (segment("east", 1), vec![1.0, 0.0]),
            (segment("far", 2), vec![10.0, 10.0]),
            (segment("east twin", 3), vec![1.0, 0.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_search_orders_by_distance() {
        let hits = store().search(&[0.9, 0.0], 3).unwrap();
        let names: Vec<_> = hits.iter().map(|s| s.content.as_str()).collect();
        assert_eq!(names, vec!["east", "east twin", "origin"]);
    }

    #[test]
    fn test_search_caps_at_index_size() {
        let hits = store().search(&[0.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 4);
        assert_eq!(hits[3].content, "far");
    }

    #[test]
    fn test_search_rejects_wrong_dimension() {
        assert!(matches!(
            store().search(&[0.0, 0.0, 0.0], 1),
            Err(QaError::Index(_))
        ));
    }

    #[test]
    fn test_from_pairs_rejects_mixed_dimensions() {
        let result = VectorStore::from_pairs(vec![
            (segment("a", 0), vec![0.0, 0.0]),
            (segment("b", 1), vec![0.0]),
        ]);
        assert!(matches!(result, Err(QaError::Index(_))));
        assert!(VectorStore::from_pairs(Vec::new()).is_err());
    }

    #[test]
    fn test_euclidean_distance() {
        let d = VectorStore::calc_euclidean_distance(&[0.0, 3.0], &[4.0, 0.0]);
        assert!((d - 5.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_snapshot_reused_only_when_matching() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store").join("index.bin");

        IndexSnapshot::new("abc".into(), "ada".into(), store())
            .save(&path)
            .unwrap();

        assert_eq!(IndexSnapshot::load_matching(&path, "abc", "ada"), Some(store()));
        assert_eq!(IndexSnapshot::load_matching(&path, "def", "ada"), None);
        assert_eq!(IndexSnapshot::load_matching(&path, "abc", "other"), None);
    }

    #[test]
    fn test_corrupt_snapshot_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.bin");
        fs::write(&path, b"not an index").unwrap();

        assert!(IndexSnapshot::load(&path).is_err());
        assert_eq!(IndexSnapshot::load_matching(&path, "abc", "ada"), None);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        fs::write(&path, b"version one").unwrap();
        let first = fingerprint_file(&path).unwrap();
        fs::write(&path, b"version two").unwrap();
        let second = fingerprint_file(&path).unwrap();

        assert_ne!(first, second);
        assert_eq!(first.len(), 64);
        assert!(fingerprint_file(&dir.path().join("missing.pdf")).is_err());
    }
}
