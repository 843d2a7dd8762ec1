//! Revision materialization and build.
//!
//! The materializer turns a revision into a runnable artifact inside a side
//! directory. Source control and the build toolchain are opaque external
//! commands; each one runs under a deadline so a hung command fails the
//! stage instead of blocking transitions forever.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sideswap_core::Revision;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

/// Produces a built artifact for a revision inside a directory.
#[async_trait]
pub trait Materializer: Send + Sync {
    /// Check `revision` out into the (empty) directory `dir`.
    async fn materialize(&self, revision: &Revision, dir: &Path) -> Result<()>;

    /// Build the artifact inside `dir`.
    async fn build(&self, dir: &Path) -> Result<()>;
}

/// Materializes from a GitHub repository with the `git` CLI and builds with
/// a configured command.
pub struct GitMaterializer {
    repo_url: String,
    build_command: Vec<String>,
    command_timeout: Duration,
}

impl GitMaterializer {
    pub fn new(
        repo_url: impl Into<String>,
        build_command: Vec<String>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            repo_url: repo_url.into(),
            build_command,
            command_timeout,
        }
    }

    /// Clone URL for an `owner/name` repository on GitHub.
    pub fn github_url(repo: &str) -> String {
        format!("https://github.com/{}", repo)
    }
}

#[async_trait]
impl Materializer for GitMaterializer {
    async fn materialize(&self, revision: &Revision, dir: &Path) -> Result<()> {
        info!(
            "Materializing {} from {} into {}",
            revision.short(),
            self.repo_url,
            dir.display()
        );

        let steps: [&[&str]; 4] = [
            &["clone", self.repo_url.as_str(), "."],
            &["fetch"],
            &["reset", "--hard", revision.as_str()],
            &["clean", "-f", "-d", "-x"],
        ];

        for args in steps {
            run_step(dir, "git", args, self.command_timeout).await?;
        }

        Ok(())
    }

    async fn build(&self, dir: &Path) -> Result<()> {
        let (program, args) = self
            .build_command
            .split_first()
            .ok_or_else(|| anyhow!("Build command is empty"))?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        info!(
            "Building in {}: {}",
            dir.display(),
            self.build_command.join(" ")
        );

        run_step(dir, program, &args, self.command_timeout).await
    }
}

/// Run one external command in `dir`, failing if it exits unsuccessfully or
/// outlives `timeout`. Output goes to our own stdout/stderr.
pub async fn run_step(dir: &Path, program: &str, args: &[&str], timeout: Duration) -> Result<()> {
    let description = format!("{} {}", program, args.join(" ")).trim_end().to_string();

    let mut child = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start `{}`", description))?;

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status.with_context(|| format!("Failed to wait for `{}`", description))?,
        Err(_) => {
            // Dropping the child would kill it too, but reap it explicitly
            let _ = child.kill().await;
            return Err(anyhow!(
                "`{}` timed out after {}s",
                description,
                timeout.as_secs_f64()
            ));
        }
    };

    if !status.success() {
        return Err(anyhow!("`{}` failed with {}", description, status));
    }

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_step_succeeds() {
        let temp_dir = tempfile::tempdir().unwrap();
        run_step(temp_dir.path(), "true", &[], Duration::from_secs(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_step_reports_failure_status() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = run_step(temp_dir.path(), "false", &[], Duration::from_secs(10))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("`false` failed"), "{}", err);
    }

    #[tokio::test]
    async fn test_run_step_times_out_hung_command() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = run_step(temp_dir.path(), "sleep", &["30"], Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("timed out"), "{}", err);
    }

    #[tokio::test]
    async fn test_run_step_missing_program() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = run_step(
            temp_dir.path(),
            "definitely-not-a-real-program-12345",
            &[],
            Duration::from_secs(10),
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_build_runs_in_side_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let materializer = GitMaterializer::new(
            "https://example.invalid/repo",
            vec!["sh".into(), "-c".into(), "echo built > artifact".into()],
            Duration::from_secs(10),
        );

        materializer.build(temp_dir.path()).await.unwrap();

        let contents = std::fs::read_to_string(temp_dir.path().join("artifact")).unwrap();
        assert_eq!(contents.trim(), "built");
    }

    #[tokio::test]
    async fn test_build_with_empty_command_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let materializer =
            GitMaterializer::new("https://example.invalid/repo", vec![], Duration::from_secs(10));

        assert!(materializer.build(temp_dir.path()).await.is_err());
    }

    #[test]
    fn test_github_url() {
        assert_eq!(
            GitMaterializer::github_url("owner/repo"),
            "https://github.com/owner/repo"
        );
    }
}
