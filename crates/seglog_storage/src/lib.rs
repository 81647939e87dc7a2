//! # seglog storage
//!
//! Byte-store backends underneath the seglog segment store.
//!
//! Backends are **opaque byte stores**: they append, read back and make
//! bytes durable. They know nothing about records, checksums or indexes;
//! `seglog_core` owns every on-disk format.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral logs
//! - [`FileBackend`] - Persistent storage through OS file APIs, optionally
//!   opened read-only for sealed segments
//!
//! ## Example
//!
//! ```rust
//! use seglog_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"record bytes").unwrap();
//! assert_eq!(backend.read_at(offset, 6).unwrap(), b"record");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
