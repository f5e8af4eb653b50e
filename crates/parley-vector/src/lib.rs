//! Parley vector crate - embedding services, cosine similarity, an in-memory
//! vector index, and the FAQ knowledge base built on top of it.

pub mod embedding;
pub mod faq;
pub mod index;
pub mod similarity;

pub use embedding::{
    DynEmbeddingService, EmbeddingService, LexicalEmbedding, MockEmbedding, OnnxEmbeddingService,
};
pub use faq::{FaqEntry, FaqKnowledgeBase};
pub use index::{SearchHit, VectorIndex};
pub use similarity::cosine_similarity;
