//! Incremental parsing of streamed file operations.
//!
//! The completion output carries file operations between explicit markers:
//!
//! ```text
//! <file path="src/App.tsx" action="replace">
//! ...complete file content...
//! </file>
//! <delete path="src/old.css"/>
//! ```
//!
//! Chunks arrive with arbitrary boundaries — a marker can be split anywhere —
//! so the parser buffers bytes and only interprets complete lines. A stream
//! that ends while a file block is still open is a truncation; the partial
//! content is surfaced separately and never treated as a finished operation.

use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// File-level action parsed from generated output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpAction {
    Create,
    Replace,
    Delete,
}

impl OpAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpAction::Create => "create",
            OpAction::Replace => "replace",
            OpAction::Delete => "delete",
        }
    }
}

/// One parsed file operation.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeOperation {
    pub path: String,
    pub action: OpAction,
    pub content: String,
}

/// A file block the stream ended inside of.
#[derive(Debug, Clone)]
pub struct TruncatedOperation {
    pub path: String,
    pub action: OpAction,
    pub partial_content: String,
}

fn file_open_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^<file\s+path="([^"]+)"(?:\s+action="(create|replace)")?\s*>$"#)
            .expect("file-open regex")
    })
}

fn delete_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^<delete\s+path="([^"]+)"\s*/>$"#).expect("delete regex"))
}

#[derive(Debug)]
struct OpenBlock {
    path: String,
    action: OpAction,
    content: String,
}

/// Line-buffered incremental parser for streamed operations.
#[derive(Debug, Default)]
pub struct StreamParser {
    buffer: String,
    open: Option<OpenBlock>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk; returns operations completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<CodeOperation> {
        self.buffer.push_str(chunk);
        let mut completed = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);
            if let Some(op) = self.process_line(&line) {
                completed.push(op);
            }
        }
        completed
    }

    /// Signal end of stream. Any unterminated trailing line is processed as
    /// a final line; an open block at that point is a truncation.
    pub fn finish(mut self) -> (Vec<CodeOperation>, Option<TruncatedOperation>) {
        let mut completed = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            if let Some(op) = self.process_line(&line) {
                completed.push(op);
            }
        }

        let truncated = self.open.take().map(|block| {
            debug!(
                "Stream ended inside file block for {} ({} bytes received)",
                block.path,
                block.content.len()
            );
            TruncatedOperation {
                path: block.path,
                action: block.action,
                partial_content: block.content,
            }
        });

        (completed, truncated)
    }

    fn process_line(&mut self, line: &str) -> Option<CodeOperation> {
        let trimmed = line.trim();

        if let Some(mut block) = self.open.take() {
            if trimmed == "</file>" {
                return Some(CodeOperation {
                    path: block.path,
                    action: block.action,
                    content: block.content,
                });
            }
            block.content.push_str(line);
            block.content.push('\n');
            self.open = Some(block);
            return None;
        }

        if let Some(caps) = file_open_regex().captures(trimmed) {
            let action = match caps.get(2).map(|m| m.as_str()) {
                Some("create") => OpAction::Create,
                _ => OpAction::Replace,
            };
            // Paths are kept raw here; safety validation and normalization
            // happen in the engine, which must see what was actually emitted.
            self.open = Some(OpenBlock {
                path: caps[1].to_string(),
                action,
                content: String::new(),
            });
            return None;
        }

        if let Some(caps) = delete_regex().captures(trimmed) {
            return Some(CodeOperation {
                path: caps[1].to_string(),
                action: OpAction::Delete,
                content: String::new(),
            });
        }

        // Anything outside a block that is not a marker is prose; ignore it.
        None
    }
}
