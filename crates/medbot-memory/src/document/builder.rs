use std::path::{Path, PathBuf};

use medbot_llm::Embedder;

use super::loader::SUPPORTED_EXTENSIONS;
use super::{DocumentError, TextLoader, TextSplitter};
use crate::index::{ChunkId, DocumentChunk, VectorIndex};

/// Turns a directory of text documents into a [`VectorIndex`].
pub struct IndexBuilder<'a, E> {
    embedder: &'a E,
    splitter: TextSplitter,
    loader: TextLoader,
}

impl<'a, E: Embedder> IndexBuilder<'a, E> {
    #[must_use]
    pub fn new(embedder: &'a E, splitter: TextSplitter) -> Self {
        Self {
            embedder,
            splitter,
            loader: TextLoader::default(),
        }
    }

    /// Load, split and embed every supported file under `docs_dir`.
    ///
    /// Files are visited in sorted path order and chunk ids are assigned sequentially,
    /// so rebuilding from the same documents yields the same ids.
    ///
    /// # Errors
    ///
    /// Returns an error if no documents are found, a file cannot be read, an embedding
    /// call fails, or the resulting chunks disagree on vector dimension.
    pub async fn build(&self, docs_dir: &Path) -> Result<VectorIndex, DocumentError> {
        let files = discover(docs_dir)?;
        if files.is_empty() {
            return Err(DocumentError::NoDocuments(docs_dir.to_path_buf()));
        }
        tracing::info!(dir = %docs_dir.display(), files = files.len(), "building vector index");

        let mut chunks = Vec::new();
        for path in &files {
            let document = self.loader.load(docs_dir, path).await?;
            let pieces = self.splitter.split(&document);
            if pieces.is_empty() {
                tracing::warn!(source = %document.source, "document has no text, skipping");
                continue;
            }

            for piece in pieces {
                let embedding = self.embedder.embed(&piece.content).await.map_err(|error| {
                    DocumentError::Embedding {
                        source_name: piece.source.clone(),
                        chunk_index: piece.chunk_index,
                        error,
                    }
                })?;
                chunks.push(DocumentChunk {
                    id: ChunkId(chunks.len() as u64),
                    source: piece.source,
                    chunk_index: piece.chunk_index,
                    content: piece.content,
                    embedding,
                });
            }
            tracing::debug!(
                source = %document.source,
                total_chunks = chunks.len(),
                "document embedded"
            );
        }

        let index = VectorIndex::from_chunks(self.embedder.model_name(), chunks)?;
        tracing::info!(
            chunks = index.len(),
            dimension = index.dimension(),
            model = %index.embedding_model(),
            "vector index built"
        );
        Ok(index)
    }

    /// [`Self::build`] followed by [`VectorIndex::save`] into `out_dir`.
    ///
    /// # Errors
    ///
    /// Returns any build error, or an error if the index cannot be written.
    pub async fn build_and_save(
        &self,
        docs_dir: &Path,
        out_dir: &Path,
    ) -> Result<VectorIndex, DocumentError> {
        let mut index = self.build(docs_dir).await?;
        index.save(out_dir)?;
        Ok(index)
    }
}

/// Every `**/*.{txt,md,markdown}` file under `dir`, sorted and deduplicated.
///
/// # Errors
///
/// Returns an error if `dir` is not a readable directory.
pub fn discover(dir: &Path) -> Result<Vec<PathBuf>, DocumentError> {
    if !dir.is_dir() {
        return Err(DocumentError::Io {
            path: dir.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        });
    }

    let root = glob::Pattern::escape(&dir.to_string_lossy());
    let mut files = Vec::new();
    for ext in SUPPORTED_EXTENSIONS {
        for entry in glob::glob(&format!("{root}/**/*.{ext}"))? {
            let path = entry?;
            if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}
