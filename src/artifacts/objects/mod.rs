//! Git object types and operations
//!
//! Git stores all content as objects identified by SHA-1 hashes. The indexer reads three:
//!
//! - **Blob**: File content (raw bytes)
//! - **Tree**: Directory listing (names, modes, and object IDs)
//! - **Commit**: Snapshot with metadata (tree, parent commits, author, message)
//!
//! All objects implement serialization/deserialization for the Git object format:
//! `<type> <size>\0<content>`

pub mod blob;
pub mod commit;
pub mod entry_mode;
pub mod object;
pub mod object_id;
pub mod object_type;
pub mod tree;

/// Length of a SHA-1 hash in hexadecimal format
pub const OBJECT_ID_LENGTH: usize = 40;

/// Length of a SHA-1 hash in raw bytes
pub const RAW_OBJECT_ID_LENGTH: usize = 20;
