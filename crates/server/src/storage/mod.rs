// Storage backends: key-partitioned table store, blob store, and job queue

pub mod blob_store;
pub mod queue;
pub mod table_store;

pub use blob_store::BlobStore;
pub use queue::{JobQueue, QueueMessage};
pub use table_store::{TableEntity, TableStore};
