//! Git blob object
//!
//! Blobs store file content. They contain only the raw file data,
//! without any metadata like filename or permissions (those are stored in trees).
//!
//! ## Format
//!
//! On disk: `blob <size>\0<content>`

use crate::artifacts::objects::object::{Object, Packable, Unpackable, with_header};
use crate::artifacts::objects::object_type::ObjectType;
use bytes::Bytes;
use derive_new::new;
use std::io::BufRead;

/// Git blob object representing file content
#[derive(Debug, Clone, new)]
pub struct Blob {
    content: Bytes,
}

impl Blob {
    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

impl From<&str> for Blob {
    fn from(content: &str) -> Self {
        Blob::new(Bytes::copy_from_slice(content.as_bytes()))
    }
}

impl Packable for Blob {
    fn serialize(&self) -> anyhow::Result<Bytes> {
        with_header(self.object_type(), &self.content)
    }
}

impl Unpackable for Blob {
    fn deserialize(reader: impl BufRead) -> anyhow::Result<Self> {
        // the header has already been read
        let content = reader
            .bytes()
            .collect::<Result<Vec<u8>, std::io::Error>>()?;

        Ok(Self::new(content.into()))
    }
}

impl Object for Blob {
    fn object_type(&self) -> ObjectType {
        ObjectType::Blob
    }

    fn display(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}
