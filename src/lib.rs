pub mod captions;
pub mod cli;
pub mod collection;
pub mod config;
pub mod dataset;
pub mod embedding;
pub mod error;
pub mod history;
pub mod index;
pub mod metadata;
mod metrics;
pub mod retrieval;
mod server;
pub mod utils;

pub use collection::{Collection, SharedCollection};
pub use config::Opts;
pub use dataset::{DatasetManager, UploadedFile};
pub use embedding::{Embedder, Embedding};
pub use error::{Error, Result};
pub use history::{HistoryLog, QueryRecord, QueryType};
pub use index::FlatIndex;
pub use metadata::MetadataStore;
pub use retrieval::{RetrievalService, SearchHit};
