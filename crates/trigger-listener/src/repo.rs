// Git clone workspace shared by the repository-mutating commands.
// Repository mutation through the git CLI is not safely concurrent, so one
// coarse lock serializes clone, fetch, push and ref-delete process-wide.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::process::Command as GitCommand;
use tokio::sync::Mutex;

/// Derive the clone directory name from a staging URI:
/// `git@github.com:org/repo.git` -> `repo`.
pub fn clone_dir(uri: &str) -> Result<String> {
    let parts: Vec<&str> = uri.split('/').collect();
    if parts.len() != 2 {
        bail!("unable to derive clone directory from {uri}");
    }
    let name: Vec<&str> = parts[1].split('.').collect();
    if name.len() != 2 {
        bail!("unable to derive clone directory from {uri}");
    }
    Ok(name[0].to_string())
}

/// Derive the CircleCI project from a staging URI:
/// `git@github.com:org/repo.git` -> `org/repo`.
pub fn circle_project(uri: &str) -> Result<String> {
    let parts: Vec<&str> = uri.split(':').collect();
    if parts.len() != 2 {
        bail!("unable to derive CircleCI project from {uri}");
    }
    let project: Vec<&str> = parts[1].split('.').collect();
    if project.len() != 2 {
        bail!("unable to derive CircleCI project from {uri}");
    }
    Ok(project[0].to_string())
}

/// Explicit resource handle for the clone workspace: a temp directory that
/// holds one clone per repository plus the lock guarding all mutation.
/// Passed by `Arc` to the commands that need it; the directory is removed
/// when the workspace is dropped.
pub struct GitWorkspace {
    base: TempDir,
    lock: Mutex<()>,
}

impl GitWorkspace {
    pub fn new() -> Result<Self> {
        let base = tempfile::Builder::new()
            .prefix("buildtrigger")
            .tempdir()
            .context("cannot create temp directory for clone workspace")?;
        Ok(Self {
            base,
            lock: Mutex::new(()),
        })
    }

    pub fn base_path(&self) -> &Path {
        self.base.path()
    }

    /// Clone `uri` into the workspace unless its directory already exists.
    pub async fn ensure_clone(&self, uri: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let repo_dir = self.base.path().join(clone_dir(uri)?);
        if repo_dir.exists() {
            return Ok(());
        }
        run_git(self.base.path(), &["clone", uri])
            .await
            .with_context(|| format!("cannot clone repository {uri}"))?;
        if !repo_dir.exists() {
            bail!("clone of {uri} did not produce {}", repo_dir.display());
        }
        Ok(())
    }

    /// Fetch all remotes, refs and tags in an existing clone.
    pub async fn fetch_all(&self, repo_name: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let repo_dir = self.repo_dir(repo_name)?;
        run_git(&repo_dir, &["fetch", "--all", "-a", "-v", "--tags"])
            .await
            .with_context(|| format!("cannot update repository {repo_name}"))
    }

    /// Force-push `refspec` to origin.
    pub async fn force_push(&self, repo_name: &str, refspec: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let repo_dir = self.repo_dir(repo_name)?;
        run_git(&repo_dir, &["push", "--force", "origin", refspec])
            .await
            .with_context(|| format!("cannot push {refspec} in repository {repo_name}"))
    }

    /// Delete a remote branch or tag on origin.
    pub async fn delete_remote_ref(&self, repo_name: &str, ref_name: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let repo_dir = self.repo_dir(repo_name)?;
        let refspec = format!(":{ref_name}");
        run_git(&repo_dir, &["push", "origin", &refspec])
            .await
            .with_context(|| format!("cannot delete {ref_name} in repository {repo_name}"))
    }

    fn repo_dir(&self, repo_name: &str) -> Result<PathBuf> {
        let dir = self.base.path().join(repo_name);
        if !dir.exists() {
            bail!("repository directory {} does not exist", dir.display());
        }
        Ok(dir)
    }
}

/// Run a git command, failing with its combined output on a non-zero exit.
async fn run_git(dir: &Path, args: &[&str]) -> Result<()> {
    tracing::debug!(dir = %dir.display(), ?args, "Running git");
    let output = GitCommand::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .context("cannot spawn git")?;

    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    if !output.status.success() {
        bail!(
            "git {} failed ({}): {}",
            args.join(" "),
            output.status,
            combined.trim()
        );
    }
    if !combined.trim().is_empty() {
        tracing::debug!("git output: {}", combined.trim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_dir_takes_the_repo_name() {
        assert_eq!(
            clone_dir("git@github.com:signalfx/arepo.git").unwrap(),
            "arepo"
        );
    }

    #[test]
    fn clone_dir_rejects_unexpected_shapes() {
        assert!(clone_dir("no-slashes-here").is_err());
        assert!(clone_dir("a/b/c").is_err());
        assert!(clone_dir("git@github.com:org/repo").is_err());
    }

    #[test]
    fn circle_project_takes_org_and_repo() {
        assert_eq!(
            circle_project("git@github.com:signalfx/arepo.git").unwrap(),
            "signalfx/arepo"
        );
    }

    #[test]
    fn circle_project_rejects_unexpected_shapes() {
        assert!(circle_project("no-colon").is_err());
        assert!(circle_project("a:b:c").is_err());
        assert!(circle_project("git@github.com:org/repo").is_err());
    }

    #[test]
    fn workspace_owns_a_temp_directory() {
        let workspace = GitWorkspace::new().unwrap();
        assert!(workspace.base_path().exists());
    }
}
