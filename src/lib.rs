pub mod chunking;
pub mod config;
pub mod database;
pub mod document;
pub mod embeddings;
pub mod gemini;
pub mod ingest;
pub mod local_store;
pub mod query_store;
pub mod rag;
