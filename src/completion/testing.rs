//! Scripted completion provider for tests.
//!
//! Plays back canned responses in call order, with control over chunk
//! boundaries so tests can split markers mid-line the way a real transport
//! does. When the script runs out the last response repeats.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{ChunkStream, Completion};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Yield these chunks, then end the stream.
    Chunks(Vec<String>),
    /// Yield these chunks, then fail the stream.
    ChunksThenError(Vec<String>, String),
    /// Never yield anything; the stream stays pending forever.
    Stall,
    /// Fail the call itself before a stream opens.
    CallError(String),
}

pub struct ScriptedCompletion {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    last: Mutex<Option<ScriptedResponse>>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Single whole-text response, repeated for every call.
    pub fn replying(text: &str) -> Self {
        Self::new(vec![ScriptedResponse::Chunks(vec![text.to_string()])])
    }

    /// Number of stream calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn next_response(&self) -> ScriptedResponse {
        let mut queue = self.responses.lock().unwrap();
        match queue.pop_front() {
            Some(response) => {
                *self.last.lock().unwrap() = Some(response.clone());
                response
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(ScriptedResponse::Chunks(Vec::new())),
        }
    }
}

#[async_trait]
impl Completion for ScriptedCompletion {
    async fn stream(
        &self,
        prompt: &str,
        _model_id: &str,
        _max_tokens: usize,
    ) -> Result<ChunkStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        match self.next_response() {
            ScriptedResponse::Chunks(chunks) => Ok(Box::pin(futures_util::stream::iter(
                chunks.into_iter().map(Ok).collect::<Vec<_>>(),
            ))),
            ScriptedResponse::ChunksThenError(chunks, message) => {
                let mut items: Vec<Result<String>> = chunks.into_iter().map(Ok).collect();
                items.push(Err(anyhow::anyhow!(message)));
                Ok(Box::pin(futures_util::stream::iter(items)))
            }
            ScriptedResponse::Stall => Ok(Box::pin(futures_util::stream::pending())),
            ScriptedResponse::CallError(message) => Err(anyhow::anyhow!(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::collect_stream;

    #[tokio::test]
    async fn test_replies_repeat() {
        let scripted = ScriptedCompletion::replying("hello");
        for _ in 0..3 {
            let stream = scripted.stream("p", "mock:any", 16).await.unwrap();
            assert_eq!(collect_stream(stream).await.unwrap(), "hello");
        }
        assert_eq!(scripted.calls(), 3);
    }

    #[tokio::test]
    async fn test_ordered_responses() {
        let scripted = ScriptedCompletion::new(vec![
            ScriptedResponse::Chunks(vec!["first".into()]),
            ScriptedResponse::Chunks(vec!["second".into()]),
        ]);
        let a = collect_stream(scripted.stream("p", "m", 1).await.unwrap())
            .await
            .unwrap();
        let b = collect_stream(scripted.stream("p", "m", 1).await.unwrap())
            .await
            .unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("first", "second"));
    }

    #[tokio::test]
    async fn test_chunks_then_error() {
        let scripted = ScriptedCompletion::new(vec![ScriptedResponse::ChunksThenError(
            vec!["partial".into()],
            "transport dropped".into(),
        )]);
        let result = collect_stream(scripted.stream("p", "m", 1).await.unwrap()).await;
        assert!(result.is_err());
    }
}
