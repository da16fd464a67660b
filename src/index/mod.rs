pub mod builder;
pub mod handle;
pub mod persist;
pub mod store;
pub mod tokenizer;
pub mod types;

pub use builder::{build, BulkBuilder, Index};
pub use handle::Biscuit;
pub use types::*;
