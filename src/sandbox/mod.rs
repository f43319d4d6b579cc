//! Sandbox capability.
//!
//! The engine never touches the project's files or shell directly; it goes
//! through this capability so the same pipeline runs against a local
//! directory, a remote sandbox, or an in-memory fake in tests.

mod local;
#[cfg(test)]
pub(crate) mod testing;

pub use local::LocalSandbox;

use anyhow::Result;
use async_trait::async_trait;

use crate::manifest::SourceFile;

/// Output of a shell command run inside the sandbox.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// File and shell access rooted at one project.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Write a file, creating parent directories as needed.
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;

    /// Delete a file. Deleting a missing file is an error.
    async fn delete_file(&self, path: &str) -> Result<()>;

    /// List project files for a manifest snapshot. Content is withheld for
    /// binary and oversized files.
    async fn list_files(&self) -> Result<Vec<SourceFile>>;

    /// Run a shell command in the project root.
    async fn run_command(&self, command: &str) -> Result<CommandOutput>;
}
