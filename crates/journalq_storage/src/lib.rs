//! # journalq storage
//!
//! Sequential file abstraction for the journalq message journal.
//!
//! This crate provides the lowest-level storage layer. Files are **opaque
//! byte stores** with an explicit open/close lifecycle, append-only writes
//! with an optional durability guarantee, and random-access reads.
//!
//! ## Design Principles
//!
//! - Files are simple byte stores (write, read, sync, truncate)
//! - No knowledge of journal records, segment headers or transactions
//! - Must be `Send + Sync`; all methods take `&self`
//! - I/O failures are surfaced, never retried
//!
//! ## Available Factories
//!
//! - [`DirectoryFactory`] - OS files inside one directory
//! - [`InMemoryFactory`] - for tests, with fault injection
//!
//! ## Example
//!
//! ```rust
//! use journalq_storage::{InMemoryFactory, SequentialFileFactory};
//!
//! let factory = InMemoryFactory::new();
//! let file = factory.create_file("journal-1.jrn").unwrap();
//! file.open().unwrap();
//! let offset = file.write(b"hello world", true).unwrap();
//! assert_eq!(&file.read_at(offset, 11).unwrap(), b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod directory;
mod error;
mod memory;
mod sequential;

pub use directory::{DirectoryFactory, DirectoryFile};
pub use error::{StorageError, StorageResult};
pub use memory::{InMemoryFactory, InMemoryFile};
pub use sequential::{SequentialFile, SequentialFileFactory};
