pub mod openai;

pub use openai::{OpenAIEmbeddingProvider, OpenAIProvider};
