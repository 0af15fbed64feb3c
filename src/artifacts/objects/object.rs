use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use anyhow::Result;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use std::io::{BufRead, Write};
use std::path::PathBuf;

pub trait Packable {
    fn serialize(&self) -> Result<Bytes>;
}

pub trait Unpackable {
    fn deserialize(reader: impl BufRead) -> Result<Self>
    where
        Self: Sized;
}

pub trait Object: Packable {
    fn object_type(&self) -> ObjectType;

    fn display(&self) -> String;

    fn object_id(&self) -> Result<ObjectId> {
        let content = self.serialize()?;
        let mut hasher = Sha1::new();
        hasher.update(&content);

        let oid = hasher.finalize();
        ObjectId::try_parse(format!("{oid:x}"))
    }

    fn object_path(&self) -> Result<PathBuf> {
        Ok(self.object_id()?.to_path())
    }
}

/// Prefix `content` with the `<type> <size>\0` header every object is hashed with
pub fn with_header(object_type: ObjectType, content: &[u8]) -> Result<Bytes> {
    let mut object_bytes = Vec::with_capacity(content.len() + 32);
    let header = format!("{} {}\0", object_type.as_str(), content.len());
    object_bytes.write_all(header.as_bytes())?;
    object_bytes.write_all(content)?;

    Ok(Bytes::from(object_bytes))
}
