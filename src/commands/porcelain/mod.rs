//! Porcelain commands (user-facing operations)
//!
//! ## Commands
//!
//! - `index`: Annotate a list of pull requests with the files they change

pub mod index;
