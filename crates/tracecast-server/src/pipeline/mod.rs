//! Runtime event ingestion.

pub mod assembler;
pub mod ingest;

pub use assembler::ChunkAssembler;
pub use ingest::Pipeline;
