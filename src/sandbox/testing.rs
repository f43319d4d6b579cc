//! In-memory sandbox for tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::manifest::SourceFile;

use super::{CommandOutput, Sandbox};

/// Sandbox backed by an in-memory file map.
///
/// Commands are recorded rather than executed; tests assert on the recorded
/// list. Flipping `fail_commands` or `unavailable` simulates install
/// failures and a dead sandbox.
#[derive(Default)]
pub struct MemorySandbox {
    files: Mutex<BTreeMap<String, String>>,
    commands: Mutex<Vec<String>>,
    mtime_counter: AtomicU64,
    pub fail_commands: AtomicBool,
    pub unavailable: AtomicBool,
}

impl MemorySandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let sandbox = Self::new();
        {
            let mut map = sandbox.files.lock().unwrap();
            for (path, content) in files {
                map.insert((*path).to_string(), (*content).to_string());
            }
        }
        sandbox
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn set_unavailable(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("sandbox connection lost");
        }
        Ok(())
    }
}

#[async_trait]
impl Sandbox for MemorySandbox {
    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.check_available()?;
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.check_available()?;
        match self.files.lock().unwrap().remove(path) {
            Some(_) => Ok(()),
            None => anyhow::bail!("no such file: {}", path),
        }
    }

    async fn list_files(&self) -> Result<Vec<SourceFile>> {
        self.check_available()?;
        let mtime = self.mtime_counter.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .map(|(path, content)| SourceFile {
                path: path.clone(),
                content: Some(content.clone()),
                size: content.len() as u64,
                mtime,
            })
            .collect())
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput> {
        self.check_available()?;
        self.commands.lock().unwrap().push(command.to_string());
        if self.fail_commands.load(Ordering::SeqCst) {
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: "simulated failure".to_string(),
                exit_code: 1,
            })
        } else {
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            })
        }
    }
}
