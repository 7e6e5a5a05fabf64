//! Source checkout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracedeck_shared::{StepLog, TraceDeckError};
use tracing::info;

use crate::runner::{ProcessError, ProcessRunner};

/// Key-based credentials for a private repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshAuth {
    pub user: String,
    pub private_key: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("private key not found: {}", .0.display())]
    MissingKey(PathBuf),

    #[error("clone of {url} failed: {source}")]
    Clone {
        url: String,
        #[source]
        source: ProcessError,
    },
}

impl FetchError {
    /// Progress output captured before the failure.
    pub fn log(&self) -> StepLog {
        match self {
            Self::Clone { source, .. } => source.output().map(|o| o.log()).unwrap_or_default(),
            Self::MissingKey(_) => StepLog::default(),
        }
    }
}

impl From<FetchError> for TraceDeckError {
    fn from(e: FetchError) -> Self {
        TraceDeckError::Fetch(e.to_string())
    }
}

/// Checks out a repository into a fresh directory.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Clone `url` into `target_dir`, which must not exist yet. An empty
    /// `branch` means the remote's default branch.
    async fn fetch(
        &self,
        auth: Option<&SshAuth>,
        url: &str,
        target_dir: &Path,
        branch: &str,
    ) -> Result<StepLog, FetchError>;
}

/// [`SourceFetcher`] that shells out to the `git` CLI.
pub struct GitFetcher {
    git: String,
    runner: Arc<dyn ProcessRunner>,
}

impl GitFetcher {
    pub fn new(git: impl Into<String>, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            git: git.into(),
            runner,
        }
    }

    /// Arguments for `git clone`.
    pub fn clone_args(
        auth: Option<&SshAuth>,
        url: &str,
        target_dir: &Path,
        branch: &str,
    ) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(auth) = auth {
            args.push("-c".to_string());
            args.push(format!(
                "core.sshCommand=ssh -i {} -l {} -o IdentitiesOnly=yes",
                auth.private_key.display(),
                auth.user
            ));
        }
        args.extend(["clone".to_string(), "--progress".to_string()]);
        if !branch.is_empty() {
            args.extend([
                "--branch".to_string(),
                branch.to_string(),
                "--single-branch".to_string(),
            ]);
        }
        args.push(url.to_string());
        args.push(target_dir.display().to_string());
        args
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(
        &self,
        auth: Option<&SshAuth>,
        url: &str,
        target_dir: &Path,
        branch: &str,
    ) -> Result<StepLog, FetchError> {
        if let Some(auth) = auth {
            if !auth.private_key.exists() {
                return Err(FetchError::MissingKey(auth.private_key.clone()));
            }
        }

        // git creates the target itself; run from its parent.
        let parent = target_dir.parent().unwrap_or(Path::new("."));
        let args = Self::clone_args(auth, url, target_dir, branch);
        info!(url, branch, dir = %target_dir.display(), "cloning");

        let output = self
            .runner
            .run(parent, &self.git, &args)
            .await
            .map_err(|source| FetchError::Clone {
                url: url.to_string(),
                source,
            })?;
        Ok(output.log())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_clone_args() {
        let args = GitFetcher::clone_args(
            None,
            "https://example.com/demo.git",
            Path::new("/tmp/tracedeck/demo-1"),
            "",
        );
        assert_eq!(
            args,
            [
                "clone",
                "--progress",
                "https://example.com/demo.git",
                "/tmp/tracedeck/demo-1"
            ]
        );
    }

    #[test]
    fn private_branch_clone_args() {
        let auth = SshAuth {
            user: "git".into(),
            private_key: PathBuf::from("/home/ci/.ssh/id_ed25519"),
        };
        let args = GitFetcher::clone_args(
            Some(&auth),
            "git@example.com:demo.git",
            Path::new("/tmp/w"),
            "main",
        );
        assert_eq!(args[0], "-c");
        assert_eq!(
            args[1],
            "core.sshCommand=ssh -i /home/ci/.ssh/id_ed25519 -l git -o IdentitiesOnly=yes"
        );
        assert_eq!(
            &args[2..],
            [
                "clone",
                "--progress",
                "--branch",
                "main",
                "--single-branch",
                "git@example.com:demo.git",
                "/tmp/w"
            ]
        );
    }

    #[tokio::test]
    async fn missing_key_fails_before_cloning() {
        let fetcher = GitFetcher::new("git", Arc::new(crate::runner::TokioProcessRunner));
        let auth = SshAuth {
            user: "git".into(),
            private_key: PathBuf::from("/nonexistent/key"),
        };
        let err = fetcher
            .fetch(Some(&auth), "git@example.com:demo.git", Path::new("/tmp/x"), "")
            .await
            .expect_err("should fail");
        assert!(matches!(err, FetchError::MissingKey(_)));
    }
}
