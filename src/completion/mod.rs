//! Completion capability.
//!
//! The engine treats text generation as an external capability: something
//! that accepts a prompt and a token budget and returns a finite, lazy,
//! non-restartable sequence of text chunks. Provider selection is a pure
//! function of the model identifier, resolved once per turn.

mod http;
#[cfg(test)]
pub(crate) mod testing;

pub use http::HttpCompletion;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

/// A finite lazy sequence of completion text chunks.
///
/// Chunk boundaries are arbitrary: a chunk may split a line, a marker, or a
/// UTF-8-safe portion of a word. Consumers must buffer accordingly.
pub type ChunkStream = BoxStream<'static, Result<String>>;

/// Streaming text-completion capability.
#[async_trait]
pub trait Completion: Send + Sync {
    /// Start a completion stream. The stream is finite and cannot be
    /// restarted; a retry means a brand-new call.
    async fn stream(&self, prompt: &str, model_id: &str, max_tokens: usize)
        -> Result<ChunkStream>;
}

/// Completion provider variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Streaming HTTP endpoint (the production provider).
    Http,
    /// Scripted in-process provider, selected by `mock:`-prefixed model ids.
    Mock,
}

/// Resolve a model identifier to its provider variant.
///
/// Pure function: the same id always maps to the same variant.
pub fn resolve_provider(model_id: &str) -> ProviderKind {
    if model_id.starts_with("mock:") {
        ProviderKind::Mock
    } else {
        ProviderKind::Http
    }
}

/// Drain a chunk stream into one string.
pub async fn collect_stream(mut stream: ChunkStream) -> Result<String> {
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&chunk?);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_provider() {
        assert_eq!(resolve_provider("mock:classifier"), ProviderKind::Mock);
        assert_eq!(resolve_provider("sonnet-large"), ProviderKind::Http);
        assert_eq!(resolve_provider(""), ProviderKind::Http);
    }

    #[tokio::test]
    async fn test_collect_stream() {
        let stream: ChunkStream = Box::pin(futures_util::stream::iter(vec![
            Ok("hello ".to_string()),
            Ok("world".to_string()),
        ]));
        assert_eq!(collect_stream(stream).await.unwrap(), "hello world");
    }
}
