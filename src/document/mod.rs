mod chunker;
mod loader;

pub use chunker::{Chunk, Chunks, TextSplitter, TextWindows};
pub use loader::{extract_document, ContentFilter, WebLoader};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DocumentMetadata {
    pub source: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
}

/// Filtered text of one fetched web page. Lives only until it is chunked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub page_content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(page_content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: DocumentMetadata {
                source: source.into(),
                ..Default::default()
            },
        }
    }
}
