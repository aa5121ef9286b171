use std::path::Path;

use super::{DEFAULT_MAX_FILE_SIZE, Document, DocumentError};

pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

pub struct TextLoader {
    pub max_file_size: u64,
}

impl Default for TextLoader {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl TextLoader {
    /// Read a UTF-8 text file. `root` is stripped from the path to form the source label.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, too large or not valid UTF-8.
    pub async fn load(&self, root: &Path, path: &Path) -> Result<Document, DocumentError> {
        let io_err = |source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        };

        let meta = tokio::fs::metadata(path).await.map_err(io_err)?;
        if meta.len() > self.max_file_size {
            return Err(DocumentError::FileTooLarge {
                path: path.to_path_buf(),
                size: meta.len(),
            });
        }

        let content = tokio::fs::read_to_string(path).await.map_err(io_err)?;
        let content_type = match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
            "md" | "markdown" => "text/markdown",
            _ => "text/plain",
        };
        let source = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        Ok(Document {
            source,
            content_type,
            content,
        })
    }
}
