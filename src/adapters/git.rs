//! Source control through the system git binary

use crate::adapters::{AdapterError, CommandRunner, SourceControl};
use async_trait::async_trait;
use tracing::{debug, info};

/// Git repository accessed through `git` subprocesses
#[derive(Debug, Clone)]
pub struct GitCli {
    runner: CommandRunner,
}

impl GitCli {
    /// Open the repository at `repo_path` using the `git` binary at `git`
    pub fn new(git: impl Into<String>, repo_path: impl Into<String>) -> Self {
        Self {
            runner: CommandRunner::new(git, 120).with_workdir(repo_path),
        }
    }
}

/// Extract tag names from `git ls-remote --tags` output, dropping peeled
/// `^{}` entries
fn parse_ls_remote_tags(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|r| r.strip_prefix("refs/tags/"))
        .filter(|t| !t.ends_with("^{}"))
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl SourceControl for GitCli {
    async fn list_tags(&self) -> Result<Vec<String>, AdapterError> {
        let output = self.runner.run(["tag", "--list"]).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn remote_tags(&self, remote: &str) -> Result<Vec<String>, AdapterError> {
        let output = self.runner.run(["ls-remote", "--tags", remote]).await?;
        let tags = parse_ls_remote_tags(&output.stdout);
        debug!("Remote {} has {} tags", remote, tags.len());
        Ok(tags)
    }

    async fn is_working_tree_clean(&self) -> Result<bool, AdapterError> {
        let output = self.runner.run(["status", "--porcelain"]).await?;
        Ok(output.stdout.trim().is_empty())
    }

    async fn head_commit(&self) -> Result<String, AdapterError> {
        let output = self.runner.run(["rev-parse", "HEAD"]).await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn create_annotated_tag(&self, tag: &str, target: &str, message: &str) -> Result<(), AdapterError> {
        match self.runner.run(["tag", "-a", tag, target, "-m", message]).await {
            Ok(_) => {
                info!("Created tag {} at {}", tag, target);
                Ok(())
            }
            Err(AdapterError::CommandFailed { stderr, .. }) if stderr.contains("already exists") => {
                Err(AdapterError::AlreadyExists(tag.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn push_tag(&self, remote: &str, tag: &str) -> Result<(), AdapterError> {
        let refspec = format!("refs/tags/{}", tag);
        self.runner.run(["push", remote, refspec.as_str()]).await?;
        info!("Pushed tag {} to {}", tag, remote);
        Ok(())
    }

    async fn delete_local_tag(&self, tag: &str) -> Result<(), AdapterError> {
        self.runner.run(["tag", "-d", tag]).await?;
        info!("Deleted local tag {}", tag);
        Ok(())
    }
}
