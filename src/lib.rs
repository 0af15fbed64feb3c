//! Pull request indexing over a local git object store
//!
//! Given a cloned repository and a list of pull requests, find for each pull
//! request the set of files it changes relative to the commit it was forked
//! from.
//!
//! - `areas`: The object store (loose objects, packs) and the repository handle
//! - `artifacts`: Git objects and the history algorithms built on them
//! - `commands`: CLI command implementations

pub mod areas;
pub mod artifacts;
pub mod commands;
