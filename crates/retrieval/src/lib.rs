//! `docent-retrieval`: chunking, embedding, and nearest-neighbour lookup
//! over ingested documents.

pub mod adapter;
pub mod chunker;
pub mod index;

pub use adapter::{IndexOutcome, RetrievalIndex, RetrievedChunk};
pub use chunker::chunk_text;
pub use index::{ChunkMetadata, IndexEntry, InMemoryVectorIndex, ScoredEntry, VectorIndex};
