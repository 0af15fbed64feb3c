//! Plumbing commands (low-level history queries)
//!
//! Plumbing commands expose the building blocks of the indexer one at a time.
//! They're primarily used for scripting and for checking a single pull request
//! by hand.
//!
//! ## Commands
//!
//! - `merge-base`: Best common ancestor of two commits
//! - `rev-list`: Commits between a commit and one of its ancestors
//! - `diff-tree`: Paths changed between two commits or trees

pub mod diff_tree;
pub mod merge_base;
pub mod rev_list;
