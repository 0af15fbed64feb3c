//! Pull requests and where they come from
//!
//! - `pull_request`: the pull request record annotated by the indexer
//! - `source`: loading pull request lists (JSON files or stdin)

pub mod pull_request;
pub mod source;
