use crate::artifacts::objects::object_id::ObjectId;
use serde::{Deserialize, Serialize};

/// A pull request as listed by the hosting service
///
/// `files` stays unset until the indexer fills it with the sorted paths changed
/// between the merge base and `head`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    pub head: ObjectId,
    pub base: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
}

impl PullRequest {
    pub fn new(number: u64, head: ObjectId, base: ObjectId) -> Self {
        PullRequest {
            number,
            title: String::new(),
            author: String::new(),
            head,
            base,
            files: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn is_indexed(&self) -> bool {
        self.files.is_some()
    }

    pub fn files(&self) -> &[String] {
        self.files.as_deref().unwrap_or_default()
    }

    /// Web address of the pull request for an `owner/name` repository slug
    pub fn link(&self, slug: &str) -> String {
        format!("https://github.com/{}/pull/{}", slug.trim_matches('/'), self.number)
    }
}
