use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Completion, CompletionRequest, LanguageModel, TextStream};
use crate::context::RunContext;
use crate::error::LlmError;

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<Completion, LlmError> + Send + Sync>;

enum Script {
    Queue(Mutex<VecDeque<Result<Completion, LlmError>>>),
    Func(Responder),
}

/// Deterministic `LanguageModel` for tests and demos.
///
/// Answers either from a queue of canned completions or from a closure over
/// the request. Every request is recorded. Streaming calls split the answer
/// into word chunks.
pub struct ScriptedModel {
    script: Script,
    requests: Mutex<Vec<CompletionRequest>>,
    complete_calls: AtomicUsize,
    streaming_calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new(completions: impl IntoIterator<Item = Completion>) -> Self {
        Self::with_results(completions.into_iter().map(Ok))
    }

    pub fn with_results(results: impl IntoIterator<Item = Result<Completion, LlmError>>) -> Self {
        Self::build(Script::Queue(Mutex::new(results.into_iter().collect())))
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<Completion, LlmError> + Send + Sync + 'static,
    {
        Self::build(Script::Func(Box::new(f)))
    }

    fn build(script: Script) -> Self {
        Self {
            script,
            requests: Mutex::new(Vec::new()),
            complete_calls: AtomicUsize::new(0),
            streaming_calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Total calls, streaming included.
    pub fn call_count(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst) + self.streaming_calls.load(Ordering::SeqCst)
    }

    pub fn streaming_calls(&self) -> usize {
        self.streaming_calls.load(Ordering::SeqCst)
    }

    async fn answer(&self, ctx: &RunContext, request: CompletionRequest) -> Result<Completion, LlmError> {
        if let Some(delay) = self.delay {
            ctx.guard(tokio::time::sleep(delay))
                .await
                .ok_or(LlmError::Cancelled)?;
        }
        if ctx.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        let result = match &self.script {
            Script::Queue(queue) => queue
                .lock()
                .map_err(|_| LlmError::Provider("script lock poisoned".into()))?
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::InvalidResponse("script exhausted".into()))),
            Script::Func(f) => f(&request),
        };
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        result
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        ctx: &RunContext,
        request: CompletionRequest,
    ) -> Result<Completion, LlmError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(ctx, request).await
    }

    async fn complete_streaming(
        &self,
        ctx: &RunContext,
        request: CompletionRequest,
    ) -> Result<TextStream, LlmError> {
        self.streaming_calls.fetch_add(1, Ordering::SeqCst);
        let text = self.answer(ctx, request).await?.content;
        let chunks: Vec<Result<String, LlmError>> =
            text.split_inclusive(' ').map(|c| Ok(c.to_string())).collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}
