//! Read-only nearest-neighbour index over document chunk embeddings.
//!
//! On disk an index is a directory holding `manifest.json` and `chunks.jsonl`
//! (one [`DocumentChunk`] per line). The manifest pins the embedding model, the vector
//! dimension, the chunk count and a blake3 checksum of the chunk file; [`VectorIndex::load`]
//! refuses any directory where these disagree.

mod manifest;
pub mod similarity;

use std::fmt;
use std::io::Write as _;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

pub use self::manifest::{CHUNKS_FILE, FORMAT_VERSION, IndexManifest, MANIFEST_FILE};
use self::manifest::checksum;
use crate::error::IndexError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub u64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: ChunkId,
    pub source: String,
    pub chunk_index: usize,
    pub content: String,
    pub embedding: Vec<f32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

pub struct VectorIndex {
    manifest: IndexManifest,
    chunks: Vec<DocumentChunk>,
}

impl fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorIndex")
            .field("embedding_model", &self.manifest.embedding_model)
            .field("dimension", &self.manifest.dimension)
            .field("chunks", &self.chunks.len())
            .finish_non_exhaustive()
    }
}

impl VectorIndex {
    /// Build an in-memory index. Embeddings are L2-normalised on the way in.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Empty`] for no chunks, or [`IndexError::DimensionMismatch`]
    /// if the chunks disagree on vector length.
    pub fn from_chunks(
        embedding_model: impl Into<String>,
        mut chunks: Vec<DocumentChunk>,
    ) -> Result<Self, IndexError> {
        let dimension = chunks.first().ok_or(IndexError::Empty)?.embedding.len();
        for chunk in &mut chunks {
            if chunk.embedding.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    actual: chunk.embedding.len(),
                });
            }
            similarity::normalize(&mut chunk.embedding);
        }

        Ok(Self {
            manifest: IndexManifest {
                format_version: FORMAT_VERSION,
                embedding_model: embedding_model.into(),
                dimension,
                chunk_count: chunks.len(),
                checksum: String::new(),
                created_at: Utc::now(),
            },
            chunks,
        })
    }

    /// Load and verify an index directory.
    ///
    /// # Errors
    ///
    /// Returns an error if either file is missing or unreadable, or if the manifest
    /// version, checksum, chunk count or vector dimension do not match the data.
    pub fn load(dir: &Path) -> Result<Self, IndexError> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest_bytes =
            std::fs::read(&manifest_path).map_err(|e| IndexError::io(&manifest_path, e))?;
        let manifest: IndexManifest =
            serde_json::from_slice(&manifest_bytes).map_err(|source| IndexError::Manifest {
                path: manifest_path.clone(),
                source,
            })?;

        if manifest.format_version != FORMAT_VERSION {
            return Err(IndexError::UnsupportedVersion(manifest.format_version));
        }

        let chunks_path = dir.join(CHUNKS_FILE);
        let data = std::fs::read(&chunks_path).map_err(|e| IndexError::io(&chunks_path, e))?;

        let actual = checksum(&data);
        if actual != manifest.checksum {
            return Err(IndexError::ChecksumMismatch {
                expected: manifest.checksum,
                actual,
            });
        }

        let text = String::from_utf8_lossy(&data);
        let mut chunks = Vec::with_capacity(manifest.chunk_count);
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let mut chunk: DocumentChunk =
                serde_json::from_str(line).map_err(|source| IndexError::Json {
                    path: chunks_path.clone(),
                    line: i + 1,
                    source,
                })?;
            if chunk.embedding.len() != manifest.dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: manifest.dimension,
                    actual: chunk.embedding.len(),
                });
            }
            similarity::normalize(&mut chunk.embedding);
            chunks.push(chunk);
        }

        if chunks.len() != manifest.chunk_count {
            return Err(IndexError::ChunkCountMismatch {
                expected: manifest.chunk_count,
                actual: chunks.len(),
            });
        }
        if chunks.is_empty() {
            return Err(IndexError::Empty);
        }

        tracing::info!(
            path = %dir.display(),
            chunks = chunks.len(),
            dimension = manifest.dimension,
            model = %manifest.embedding_model,
            "vector index loaded"
        );

        Ok(Self { manifest, chunks })
    }

    /// Write the index to `dir`, creating it if needed. The manifest is written last.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or either file cannot be written.
    pub fn save(&mut self, dir: &Path) -> Result<(), IndexError> {
        std::fs::create_dir_all(dir).map_err(|e| IndexError::io(dir, e))?;

        let mut data = Vec::new();
        for (i, chunk) in self.chunks.iter().enumerate() {
            serde_json::to_writer(&mut data, chunk).map_err(|source| IndexError::Json {
                path: dir.join(CHUNKS_FILE),
                line: i + 1,
                source,
            })?;
            data.push(b'\n');
        }

        self.manifest.checksum = checksum(&data);
        self.manifest.chunk_count = self.chunks.len();

        let chunks_path = dir.join(CHUNKS_FILE);
        write_atomic(&chunks_path, &data)?;

        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest_bytes = serde_json::to_vec_pretty(&self.manifest).map_err(|source| {
            IndexError::Manifest {
                path: manifest_path.clone(),
                source,
            }
        })?;
        write_atomic(&manifest_path, &manifest_bytes)?;

        tracing::info!(path = %dir.display(), chunks = self.chunks.len(), "vector index saved");
        Ok(())
    }

    /// Top-`k` chunks by cosine similarity, highest first.
    ///
    /// Equal scores are ordered by ascending [`ChunkId`], so results are reproducible.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DimensionMismatch`] if the query length differs from the
    /// index dimension.
    pub fn similarity_search(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        if query.len() != self.manifest.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.manifest.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut query = query.to_vec();
        similarity::normalize(&mut query);

        let mut scored: Vec<(f32, &DocumentChunk)> = self
            .chunks
            .iter()
            .map(|c| (similarity::dot(&query, &c.embedding), c))
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| sb.total_cmp(sa).then_with(|| a.id.cmp(&b.id)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, chunk)| ScoredChunk {
                chunk: chunk.clone(),
                score,
            })
            .collect())
    }

    /// Fail unless the index was built with `configured` embedding model.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ModelMismatch`] when the names differ.
    pub fn ensure_model(&self, configured: &str) -> Result<(), IndexError> {
        if self.manifest.embedding_model == configured {
            Ok(())
        } else {
            Err(IndexError::ModelMismatch {
                index: self.manifest.embedding_model.clone(),
                configured: configured.to_owned(),
            })
        }
    }

    #[must_use]
    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.manifest.dimension
    }

    #[must_use]
    pub fn embedding_model(&self) -> &str {
        &self.manifest.embedding_model
    }

    #[must_use]
    pub fn chunks(&self) -> &[DocumentChunk] {
        &self.chunks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let tmp = path.with_extension("tmp");
    let mut file = std::fs::File::create(&tmp).map_err(|e| IndexError::io(&tmp, e))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|e| IndexError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| IndexError::io(path, e))
}
