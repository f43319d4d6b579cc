//! Local-directory sandbox.
//!
//! Implements the sandbox capability over a directory on disk. Listing walks
//! the tree with gitignore support; oversized and binary files are listed
//! with their content withheld so the manifest still knows they exist.

use anyhow::{Context, Result};
use async_trait::async_trait;
use ignore::WalkBuilder;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::manifest::SourceFile;

use super::{CommandOutput, Sandbox};

/// Maximum file size whose content is read into a manifest (1MB).
pub const MAX_READABLE_FILE_SIZE: u64 = 1024 * 1024;

/// Sandbox rooted at a local project directory.
pub struct LocalSandbox {
    root: PathBuf,
}

impl LocalSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a relative path against the root, rejecting traversal.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if relative.is_absolute() {
            anyhow::bail!("Absolute path not allowed: {}", path);
        }
        for component in relative.components() {
            if matches!(component, Component::ParentDir) {
                anyhow::bail!("Path escapes project root: {}", path);
            }
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        tokio::fs::write(&full, content)
            .await
            .with_context(|| format!("Failed to write {}", full.display()))
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        tokio::fs::remove_file(&full)
            .await
            .with_context(|| format!("Failed to delete {}", full.display()))
    }

    async fn list_files(&self) -> Result<Vec<SourceFile>> {
        let root = self.root.clone();
        // The ignore walker is synchronous; push it off the async runtime.
        let files = tokio::task::spawn_blocking(move || list_files_blocking(&root))
            .await
            .context("File listing task panicked")??;
        Ok(files)
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput> {
        debug!("Running command in {}: {}", self.root.display(), command);
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .output()
            .await
            .with_context(|| format!("Failed to run command: {}", command))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

fn list_files_blocking(root: &Path) -> Result<Vec<SourceFile>> {
    let mut files = Vec::new();

    let mut builder = WalkBuilder::new(root);
    builder.standard_filters(true);
    builder.git_ignore(true);
    builder.follow_links(false);

    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error walking directory: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                warn!("Failed to get metadata for {}: {}", path.display(), e);
                continue;
            }
        };

        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let relative = match path.strip_prefix(root) {
            Ok(p) => p.to_string_lossy().replace('\\', "/"),
            Err(_) => {
                warn!("Failed to get relative path for {}", path.display());
                continue;
            }
        };

        let content = if metadata.len() > MAX_READABLE_FILE_SIZE {
            debug!(
                "Withholding content of large file ({} bytes): {}",
                metadata.len(),
                relative
            );
            None
        } else {
            match std::fs::read(path) {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => Some(text),
                    Err(_) => {
                        debug!("Withholding content of binary file: {}", relative);
                        None
                    }
                },
                Err(e) => {
                    warn!("Failed to read {}: {}", relative, e);
                    continue;
                }
            }
        };

        files.push(SourceFile {
            path: relative,
            content,
            size: metadata.len(),
            mtime,
        });
    }

    debug!("Listed {} files under {}", files.len(), root.display());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_list_delete_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let sandbox = LocalSandbox::new(tmp.path());

        sandbox
            .write_file("src/App.tsx", "export default function App() {}")
            .await
            .unwrap();

        let files = sandbox.list_files().await.unwrap();
        let app = files.iter().find(|f| f.path == "src/App.tsx").unwrap();
        assert_eq!(
            app.content.as_deref(),
            Some("export default function App() {}")
        );

        sandbox.delete_file("src/App.tsx").await.unwrap();
        let files = sandbox.list_files().await.unwrap();
        assert!(!files.iter().any(|f| f.path == "src/App.tsx"));
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let tmp = TempDir::new().unwrap();
        let sandbox = LocalSandbox::new(tmp.path());
        assert!(sandbox.write_file("../escape.txt", "x").await.is_err());
        assert!(sandbox.write_file("/etc/passwd", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_binary_content_withheld() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("blob.bin"), [0xff, 0xfe, 0x00, 0x01]).unwrap();
        let sandbox = LocalSandbox::new(tmp.path());

        let files = sandbox.list_files().await.unwrap();
        let blob = files.iter().find(|f| f.path == "blob.bin").unwrap();
        assert!(blob.content.is_none());
        assert_eq!(blob.size, 4);
    }

    #[tokio::test]
    async fn test_run_command_captures_output() {
        let tmp = TempDir::new().unwrap();
        let sandbox = LocalSandbox::new(tmp.path());
        let output = sandbox.run_command("echo hi && exit 0").await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hi");

        let output = sandbox.run_command("exit 3").await.unwrap();
        assert_eq!(output.exit_code, 3);
    }
}
