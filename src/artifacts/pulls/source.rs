use crate::artifacts::pulls::pull_request::PullRequest;
use anyhow::Context;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Supplies the pull requests of one indexing batch
///
/// Lists are fetched once per batch; the indexer never asks again.
pub trait PullRequestSource {
    fn pull_requests(&mut self) -> anyhow::Result<Vec<PullRequest>>;
}

impl PullRequestSource for Vec<PullRequest> {
    fn pull_requests(&mut self) -> anyhow::Result<Vec<PullRequest>> {
        let pulls = std::mem::take(self);
        ensure_unique_numbers(&pulls)?;

        Ok(pulls)
    }
}

/// JSON array of pull requests read from a file, or from stdin for `-`
#[derive(Debug, Clone)]
pub enum JsonPullRequestSource {
    File(PathBuf),
    Stdin,
}

impl JsonPullRequestSource {
    pub fn from_arg(arg: &Path) -> Self {
        if arg == Path::new("-") {
            JsonPullRequestSource::Stdin
        } else {
            JsonPullRequestSource::File(arg.to_path_buf())
        }
    }

    fn read_to_string(&self) -> anyhow::Result<String> {
        match self {
            JsonPullRequestSource::File(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Unable to read pull requests from {}", path.display())),
            JsonPullRequestSource::Stdin => {
                let mut content = String::new();
                std::io::stdin()
                    .read_to_string(&mut content)
                    .context("Unable to read pull requests from stdin")?;
                Ok(content)
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            JsonPullRequestSource::File(path) => path.display().to_string(),
            JsonPullRequestSource::Stdin => "stdin".to_string(),
        }
    }
}

impl PullRequestSource for JsonPullRequestSource {
    fn pull_requests(&mut self) -> anyhow::Result<Vec<PullRequest>> {
        let content = self.read_to_string()?;
        let pulls = parse_pull_requests(&content)
            .with_context(|| format!("Invalid pull request list in {}", self.describe()))?;

        tracing::debug!("loaded {} pull request(s) from {}", pulls.len(), self.describe());

        Ok(pulls)
    }
}

pub fn parse_pull_requests(content: &str) -> anyhow::Result<Vec<PullRequest>> {
    let pulls = serde_json::from_str::<Vec<PullRequest>>(content)?;
    ensure_unique_numbers(&pulls)?;

    Ok(pulls)
}

fn ensure_unique_numbers(pulls: &[PullRequest]) -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for pull in pulls {
        if !seen.insert(pull.number) {
            anyhow::bail!("pull request #{} is listed more than once", pull.number);
        }
    }

    Ok(())
}
