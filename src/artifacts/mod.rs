//! Git data structures and history algorithms
//!
//! This module contains the types and algorithms the indexer is built from:
//!
//! - `database`: Database entry types
//! - `diff`: Tree diffing
//! - `errors`: Error types shared by the store and the indexer
//! - `indexer`: Pull request indexing, single and batched
//! - `log`: Commit history traversal
//! - `merge`: Merge-base resolution
//! - `objects`: Git object types (blob, tree, commit)
//! - `pulls`: Pull request records and sources

pub mod database;
pub mod diff;
pub mod errors;
pub mod indexer;
pub mod log;
pub mod merge;
pub mod objects;
pub mod pulls;

#[cfg(test)]
pub(crate) mod testing;
