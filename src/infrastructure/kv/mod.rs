//! Key-value persistence: JSON documents under the data root.

mod file_store;

pub use file_store::FileKvStore;
