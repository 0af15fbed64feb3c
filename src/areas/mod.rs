//! Storage components
//!
//! This module contains the pieces that read a local repository:
//!
//! - `database`: Object database for blobs, trees, and commits (loose objects)
//! - `pack`: Packfile and pack index reader
//! - `object_store`: The store abstraction the history algorithms run against
//! - `repository`: Locates and opens a repository on disk

pub mod database;
pub mod object_store;
pub mod pack;
pub mod repository;
