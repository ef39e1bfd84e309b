#![forbid(unsafe_code)]
//! chronoflow-mem: hard memory accounting for column storage.
//!
//! Every column buffer grow in the block crate goes through an [`Allocator`]
//! reservation, so exceeding the limit fails the owning query and leaves
//! other queries untouched.

pub mod allocator;
pub mod error;

pub use allocator::{Allocator, Reservation};
pub use error::{Error, Result};
