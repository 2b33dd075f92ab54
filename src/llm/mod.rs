pub mod chat;
pub mod embeddings;
pub mod pipeline;
pub mod prompt;

pub use chat::ChatClient;
pub use embeddings::EmbeddingGenerator;
pub use pipeline::{Pipeline, QueryState, Stage};
pub use prompt::PromptTemplate;
