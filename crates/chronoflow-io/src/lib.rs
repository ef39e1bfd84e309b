#![forbid(unsafe_code)]
//! chronoflow-io: the storage side of a query.
//!
//! - [`StorageReader`]: read interface answered with a stream of frames.
//! - [`Predicate`]: storage predicate tree, converted from filter expressions.
//! - [`MemoryStorage`]: in-process implementation used by tests and embedders.

pub mod error;
pub mod frame;
pub mod memory;
pub mod predicate;
pub mod reader;

pub use error::{Result, StorageError};
pub use frame::{Frame, Points};
pub use memory::MemoryStorage;
pub use predicate::{Comparison, Literal, LogicalOperator, Node, Predicate};
pub use reader::{AggregateType, FrameStream, ReadSpec, StorageReader};
