pub mod groq;
pub mod hashing;
pub mod huggingface;
pub mod openai;
pub mod traits;
pub mod utils;

pub use hashing::HashingProvider;
pub use traits::{ChatMessage, CompletionProvider, EmbeddingProvider, Role};
pub use utils::RetryPolicy;
