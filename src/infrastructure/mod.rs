//! Infrastructure adapters: configuration, persistence, vectors, logging.

pub mod config;
pub mod kv;
pub mod logging;
pub mod vector;
