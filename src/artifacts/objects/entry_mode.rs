//! Tree entry modes
//!
//! Trees record a mode for every entry. Only a handful of values are valid:
//!
//! ```text
//! 100644  regular file
//! 100755  executable file
//! 120000  symbolic link
//!  40000  directory (sub-tree)
//! 160000  submodule commit (gitlink)
//! ```

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EntryMode {
    #[default]
    Regular,
    Executable,
    Symlink,
    Directory,
    Gitlink,
}

impl EntryMode {
    pub fn from_octal_str(mode: &str) -> anyhow::Result<Self> {
        let mode = u32::from_str_radix(mode, 8)
            .map_err(|_| anyhow::anyhow!("Invalid entry mode {mode}"))?;

        Self::try_from(mode)
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            EntryMode::Regular => 0o100644,
            EntryMode::Executable => 0o100755,
            EntryMode::Symlink => 0o120000,
            EntryMode::Directory => 0o40000,
            EntryMode::Gitlink => 0o160000,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EntryMode::Regular => "100644",
            EntryMode::Executable => "100755",
            EntryMode::Symlink => "120000",
            EntryMode::Directory => "040000",
            EntryMode::Gitlink => "160000",
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, EntryMode::Directory)
    }
}

impl TryFrom<u32> for EntryMode {
    type Error = anyhow::Error;

    fn try_from(mode: u32) -> anyhow::Result<Self> {
        match mode {
            0o100644 => Ok(EntryMode::Regular),
            // old repositories may carry group-writable blobs
            0o100664 => Ok(EntryMode::Regular),
            0o100755 => Ok(EntryMode::Executable),
            0o120000 => Ok(EntryMode::Symlink),
            0o40000 => Ok(EntryMode::Directory),
            0o160000 => Ok(EntryMode::Gitlink),
            _ => Err(anyhow::anyhow!("Invalid entry mode {mode:o}")),
        }
    }
}
