//! # krbgate Storage
//!
//! Storage abstraction used to read the backend's persisted records.
//!
//! The host owns the real storage engine; krbgate only consumes the
//! [`StorageBackend`] trait. [`MemoryBackend`] backs the development
//! server and the test suites.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod memory;

pub use backend::{StorageBackend, StorageExt};
pub use error::StorageError;
pub use memory::MemoryBackend;
