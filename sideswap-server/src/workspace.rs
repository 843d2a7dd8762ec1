//! On-disk layout of the two sides.
//!
//! Each side gets its own directory `<root>/<artifact>/<label>` and its own
//! port `<base_port> + <label>`. Both are pure functions of the label.

use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::state_machine::SideLabel;

/// Host the sides bind to and the redirect table points at.
pub const SIDE_HOST: &str = "localhost";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideLayout {
    root: PathBuf,
    base_port: u16,
}

impl SideLayout {
    /// `work_root` is the temporary-files root; directories are keyed by
    /// `artifact_name` underneath it.
    pub fn new(work_root: impl AsRef<Path>, artifact_name: &str, base_port: u16) -> Self {
        Self {
            root: work_root.as_ref().join(artifact_name),
            base_port,
        }
    }

    pub fn dir(&self, side: SideLabel) -> PathBuf {
        self.root.join(side.number().to_string())
    }

    pub fn port(&self, side: SideLabel) -> u16 {
        self.base_port + side.number()
    }
}

/// Make `dir` an empty directory, wiping anything a previous cycle left.
pub async fn prepare_directory(dir: &Path) -> Result<()> {
    remove_directory(dir).await?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create side directory {}", dir.display()))
}

/// Recursively remove `dir`. Removing a directory that is already gone succeeds.
pub async fn remove_directory(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove directory {}", dir.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_keyed_by_artifact_and_side() {
        let layout = SideLayout::new("/tmp", "myapp", 8080);

        assert_eq!(layout.dir(SideLabel::One), PathBuf::from("/tmp/myapp/1"));
        assert_eq!(layout.dir(SideLabel::Two), PathBuf::from("/tmp/myapp/2"));
        assert_eq!(layout.port(SideLabel::One), 8081);
        assert_eq!(layout.port(SideLabel::Two), 8082);
    }

    #[test]
    fn test_sides_never_share_directory_or_port() {
        let layout = SideLayout::new("/var/tmp", "svc", 9000);

        assert_ne!(layout.dir(SideLabel::One), layout.dir(SideLabel::Two));
        assert_ne!(layout.port(SideLabel::One), layout.port(SideLabel::Two));
    }

    #[tokio::test]
    async fn test_prepare_directory_wipes_stale_contents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("svc").join("2");
        tokio::fs::create_dir_all(dir.join("nested")).await.unwrap();
        tokio::fs::write(dir.join("nested").join("stale.txt"), b"old")
            .await
            .unwrap();

        prepare_directory(&dir).await.unwrap();

        assert!(dir.is_dir());
        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prepare_directory_creates_missing_parents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("a").join("b").join("1");

        prepare_directory(&dir).await.unwrap();

        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn test_remove_missing_directory_succeeds() {
        let temp_dir = tempfile::tempdir().unwrap();
        remove_directory(&temp_dir.path().join("never-created"))
            .await
            .unwrap();
    }
}
