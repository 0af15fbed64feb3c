//! Tree comparison
//!
//! - `tree_diff`: recursive tree-level diff reporting which files were added,
//!   deleted or modified between two trees
//!
//! Only paths are compared; file contents are never loaded.

pub mod tree_diff;
