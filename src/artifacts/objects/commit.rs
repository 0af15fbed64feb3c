//! Git commit object
//!
//! Commits represent snapshots of the repository at specific points in time.
//! They contain:
//! - A tree object ID (directory snapshot)
//! - Parent commit ID(s) (for history)
//! - Author and committer information
//! - Commit message
//!
//! ## Format
//!
//! On disk:
//! ```text
//! commit <size>\0
//! tree <tree-sha>
//! parent <parent-sha>
//! author <name> <email> <timestamp> <timezone>
//! committer <name> <email> <timestamp> <timezone>
//! [other headers, e.g. gpgsig, possibly spanning continuation lines]
//!
//! <commit message>
//! ```

use crate::artifacts::objects::object::{Object, Packable, Unpackable, with_header};
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;
use anyhow::Context;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::io::BufRead;

/// Author or committer information
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Author {
    name: String,
    email: String,
    timestamp: DateTime<FixedOffset>,
}

impl Author {
    pub fn new(name: String, email: String, timestamp: DateTime<FixedOffset>) -> Self {
        Author {
            name,
            email,
            timestamp,
        }
    }

    /// "Name <email@example.com>"
    pub fn display_name(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }

    /// "Name <email> timestamp timezone", as written in the object
    pub fn display(&self) -> String {
        format!(
            "{} <{}> {} {}",
            self.name,
            self.email,
            self.timestamp.timestamp(),
            self.timestamp.format("%z")
        )
    }

    pub fn timestamp(&self) -> DateTime<FixedOffset> {
        self.timestamp
    }
}

impl TryFrom<&str> for Author {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // Format: "name <email> timestamp timezone"
        // Split from right to get timezone and timestamp first
        let parts: Vec<&str> = value.rsplitn(3, ' ').collect();
        if parts.len() < 3 {
            return Err(anyhow::anyhow!("Invalid author format"));
        }

        let timezone = parts[0];
        let timestamp = parts[1]
            .parse::<i64>()
            .map_err(|_| anyhow::anyhow!("Invalid timestamp"))?;
        let name_email_part = parts[2];

        let email_start = name_email_part
            .find('<')
            .ok_or_else(|| anyhow::anyhow!("Invalid author format: missing '<'"))?;
        let email_end = name_email_part
            .rfind('>')
            .ok_or_else(|| anyhow::anyhow!("Invalid author format: missing '>'"))?;
        if email_end < email_start {
            return Err(anyhow::anyhow!("Invalid author format: misplaced '>'"));
        }

        let name = name_email_part[..email_start].trim().to_string();
        let email = name_email_part[email_start + 1..email_end].to_string();

        let datetime = DateTime::from_timestamp(timestamp, 0)
            .ok_or_else(|| anyhow::anyhow!("Invalid timestamp"))?
            .with_timezone(&parse_timezone(timezone));

        Ok(Author {
            name,
            email,
            timestamp: datetime,
        })
    }
}

/// Parse a `+hhmm` / `-hhmm` offset; malformed offsets (which real
/// histories do contain) fall back to UTC.
fn parse_timezone(timezone: &str) -> FixedOffset {
    let utc = Utc.fix();

    let (sign, digits) = match timezone.split_at_checked(1) {
        Some(("+", digits)) => (1, digits),
        Some(("-", digits)) => (-1, digits),
        _ => return utc,
    };
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return utc;
    }

    let hours = digits[..2].parse::<i32>().unwrap_or_default();
    let minutes = digits[2..].parse::<i32>().unwrap_or_default();

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).unwrap_or(utc)
}

/// The part of a commit the history algorithms need
///
/// Identified by its own hash; owns the parent hashes rather than pointing at
/// parent snapshots, so the commit graph is only ever navigated through a store.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CommitSnapshot {
    /// The commit's object ID
    pub oid: ObjectId,
    /// Parent IDs, empty for a root commit
    pub parents: Vec<ObjectId>,
    /// Root tree of the snapshot
    pub tree_oid: ObjectId,
    /// Committer timestamp, orders traversal frontiers
    pub timestamp: DateTime<FixedOffset>,
}

impl CommitSnapshot {
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

impl PartialOrd for CommitSnapshot {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CommitSnapshot {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.oid.cmp(&other.oid))
    }
}

/// Git commit object
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Commit {
    /// Parent commit IDs (empty for initial commit, multiple for merge commits)
    parents: Vec<ObjectId>,
    /// Tree object ID representing the directory snapshot
    tree_oid: ObjectId,
    author: Author,
    committer: Author,
    message: String,
}

impl Commit {
    pub fn new(
        parents: Vec<ObjectId>,
        tree_oid: ObjectId,
        author: Author,
        committer: Author,
        message: String,
    ) -> Self {
        Commit {
            parents,
            tree_oid,
            author,
            committer,
            message,
        }
    }

    /// First line of the commit message
    pub fn short_message(&self) -> String {
        self.message.lines().next().unwrap_or("").to_string()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn tree_oid(&self) -> &ObjectId {
        &self.tree_oid
    }

    pub fn parents(&self) -> &[ObjectId] {
        &self.parents
    }

    pub fn author(&self) -> &Author {
        &self.author
    }

    pub fn committer(&self) -> &Author {
        &self.committer
    }

    /// Strip the commit down to its graph data
    pub fn into_snapshot(self, oid: ObjectId) -> CommitSnapshot {
        CommitSnapshot {
            oid,
            timestamp: self.committer.timestamp(),
            parents: self.parents,
            tree_oid: self.tree_oid,
        }
    }

    fn content_lines(&self) -> Vec<String> {
        let mut lines = vec![];

        lines.push(format!("tree {}", self.tree_oid.as_ref()));
        for parent in &self.parents {
            lines.push(format!("parent {}", parent.as_ref()));
        }
        lines.push(format!("author {}", self.author.display()));
        lines.push(format!("committer {}", self.committer.display()));
        lines.push(String::new());
        lines.push(self.message.to_string());

        lines
    }
}

impl Packable for Commit {
    fn serialize(&self) -> anyhow::Result<Bytes> {
        let object_content = self.content_lines().join("\n");

        with_header(self.object_type(), object_content.as_bytes())
    }
}

impl Unpackable for Commit {
    fn deserialize(reader: impl BufRead) -> anyhow::Result<Self> {
        let content = reader
            .bytes()
            .collect::<Result<Vec<u8>, std::io::Error>>()?;

        // messages may carry a legacy encoding, headers are always ASCII
        let content = String::from_utf8_lossy(&content);
        let (headers, message) = content
            .split_once("\n\n")
            .unwrap_or((content.as_ref(), ""));

        let mut tree_oid = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;

        for line in headers.lines() {
            // continuation of a multi-line header such as gpgsig
            if line.starts_with(' ') {
                continue;
            }

            let (key, value) = line.split_once(' ').unwrap_or((line, ""));
            match key {
                "tree" => tree_oid = Some(ObjectId::try_parse(value.to_string())?),
                "parent" => parents.push(ObjectId::try_parse(value.to_string())?),
                "author" => author = Some(Author::try_from(value)?),
                "committer" => committer = Some(Author::try_from(value)?),
                _ => {}
            }
        }

        let tree_oid = tree_oid.context("Invalid commit object: missing tree line")?;
        let author = author.context("Invalid commit object: missing author line")?;
        let committer = committer.unwrap_or_else(|| author.clone());

        Ok(Self::new(
            parents,
            tree_oid,
            author,
            committer,
            message.to_string(),
        ))
    }
}

impl Object for Commit {
    fn object_type(&self) -> ObjectType {
        ObjectType::Commit
    }

    fn display(&self) -> String {
        self.content_lines().join("\n")
    }
}
