//! Command implementations
//!
//! Commands are organized into two categories following Git's architecture:
//!
//! - `plumbing`: Low-level queries over the commit graph (merge-base, rev-list, diff-tree)
//! - `porcelain`: The pull request indexing workflow built on top of them
//!
//! Every command is a method on [`Repository`](crate::areas::repository::Repository)
//! writing its output to the repository's writer.

pub mod plumbing;
pub mod porcelain;
