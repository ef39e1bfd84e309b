#![forbid(unsafe_code)]
//! chronoflow-block: the unit of data exchanged between transformations.
//!
//! A [`Block`] is an immutable, refcounted, bounded and tagged table. It is
//! produced by a [`BlockBuilder`], whose column storage is accounted against
//! a [`chronoflow_mem::Allocator`]. Common tag columns store one value for
//! every row.

pub mod block;
pub mod builder;
pub mod column;
pub mod format;
pub mod helpers;

pub use block::{Block, BlockKey, BlockMetadata};
pub use builder::BlockBuilder;
pub use column::ColumnData;
pub use helpers::{col_idx, time_idx, value_idx, ColMap};
