//! Query file loaders.

pub mod yaml;
