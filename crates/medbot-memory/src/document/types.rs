#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Path relative to the documents root, used as the chunk source label.
    pub source: String,
    pub content_type: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub source: String,
    pub chunk_index: usize,
    pub content: String,
}
