pub mod qdrant;

pub use qdrant::{CollectionSettings, QdrantStore};
