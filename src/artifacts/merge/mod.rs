//! Merge-base resolution
//!
//! - `bca_finder`: best common ancestors of two commits

pub mod bca_finder;
