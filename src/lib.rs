//! # Biscuit - Exact Substring Index
//!
//! Biscuit is a database index access method for deterministic, exact
//! substring containment search over text columns. Column values are
//! decomposed into fixed-length byte windows whose occurrences (row,
//! column, byte offset) are recorded in posting lists; queries decompose
//! a pattern the same way and intersect the lists with offset
//! consistency, so results are exact, never probabilistic.
//!
//! ## Architecture
//!
//! - [`index`] - Tokenization, postings storage, build/maintenance,
//!   persistence, and the concurrent [`Biscuit`] handle
//! - [`query`] - Predicate planning and execution
//! - [`host`] - The [`Heap`] boundary to the owning database, plus
//!   cancellation
//! - [`error`] - The error taxonomy shared by every operation
//! - [`utils`] - Byte-level encoding for the on-disk image
//!
//! ## Quick Start
//!
//! ```
//! use biscuit::{Biscuit, MemoryHeap, Predicate, WindowConfig};
//!
//! let mut heap = MemoryHeap::new();
//! heap.push_row(vec![Some("banana".to_string())]);
//! heap.push_row(vec![Some("cherry".to_string())]);
//!
//! let index = Biscuit::build(WindowConfig::default(), &heap, None).unwrap();
//! let rows = index
//!     .search(&Predicate::contains(0, "nan"), &heap, None)
//!     .unwrap();
//! assert_eq!(rows, vec![0]);
//! ```

pub mod error;
pub mod host;
pub mod index;
pub mod query;
pub mod utils;

pub use error::{IndexError, Result};
pub use host::{CancelToken, Heap, MemoryHeap};
pub use index::handle::Biscuit;
pub use index::types::{IndexStats, WindowConfig};
pub use query::predicate::Predicate;
