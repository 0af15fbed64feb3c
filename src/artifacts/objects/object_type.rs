use std::io::BufRead;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectType {
    pub fn as_str(&self) -> &str {
        match self {
            ObjectType::Blob => "blob",
            ObjectType::Tree => "tree",
            ObjectType::Commit => "commit",
            ObjectType::Tag => "tag",
        }
    }

    /// Read the `<type> <size>\0` header of a loose object, leaving the
    /// reader positioned at the start of the content.
    pub fn parse_object_type(data_reader: &mut impl BufRead) -> anyhow::Result<ObjectType> {
        let mut object_type = Vec::new();
        data_reader.read_until(b' ', &mut object_type)?;

        let object_type = String::from_utf8(object_type)?;
        let object_type = object_type.trim();

        // skip the size part
        let mut size = Vec::new();
        data_reader.read_until(b'\0', &mut size)?;

        ObjectType::try_from(object_type)
    }

    /// Map the 3-bit type code of a packfile entry header
    pub fn from_pack_code(code: u8) -> Option<ObjectType> {
        match code {
            1 => Some(ObjectType::Commit),
            2 => Some(ObjectType::Tree),
            3 => Some(ObjectType::Blob),
            4 => Some(ObjectType::Tag),
            _ => None,
        }
    }
}

impl TryFrom<&str> for ObjectType {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> anyhow::Result<Self> {
        match value {
            "blob" => Ok(ObjectType::Blob),
            "tree" => Ok(ObjectType::Tree),
            "commit" => Ok(ObjectType::Commit),
            "tag" => Ok(ObjectType::Tag),
            _ => Err(anyhow::anyhow!("Invalid object type {value}")),
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
