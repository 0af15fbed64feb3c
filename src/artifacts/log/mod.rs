//! Commit history traversal
//!
//! - `rev_list`: lazy walk of the commits between a start commit and one of
//!   its ancestors, the equivalent of `git rev-list target..start`
//!
//! ## Algorithm
//!
//! The walk uses a priority queue ordered by commit timestamp, so children are
//! always produced before their parents. Commits reachable from the target are
//! painted uninteresting and never produced, which keeps merged side branches
//! from dragging the walk down to the root commits.

pub mod rev_list;
