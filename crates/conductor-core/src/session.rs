use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::agent::Agent;
use crate::context::{RunContext, SessionMeta};
use crate::error::SessionError;
use crate::history::{ChatMessage, MessageHistory};
use crate::llm::LanguageModel;
use crate::memory::Memory;
use crate::response::{Response, ResponseKind};
use crate::storage::Storage;

const OUTPUT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the user message.
    Idle,
    Running,
    Closed,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Closed,
        }
    }
}

/// Shared collaborators a session runs with.
#[derive(Clone)]
pub struct SessionParts {
    pub agent: Arc<Agent>,
    pub model: Arc<dyn LanguageModel>,
    pub memory: Arc<dyn Memory>,
    pub storage: Arc<dyn Storage>,
    /// Stored conversations replayed before the new message.
    pub history_window: usize,
}

/// One conversation turn: a single user message in, a stream of responses
/// out, always finishing with exactly one `End`.
pub struct Session {
    ctx: RunContext,
    input: Mutex<Option<oneshot::Sender<String>>>,
    output: tokio::sync::Mutex<mpsc::Receiver<Response>>,
    state: Arc<AtomicU8>,
    closed: AtomicBool,
}

impl Session {
    /// Spawn the session task. Cancelling `parent` cancels the session.
    pub fn start(parent: &CancellationToken, meta: SessionMeta, parts: SessionParts) -> Self {
        let ctx = RunContext::new(meta, parent.child_token());
        let (input_tx, input_rx) = oneshot::channel();
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_BUFFER);
        let state = Arc::new(AtomicU8::new(SessionState::Idle as u8));

        let span = info_span!(
            "session",
            session_id = %ctx.session_id(),
            customer_id = %ctx.customer_id()
        );
        tokio::spawn(
            run(ctx.clone(), parts, input_rx, output_tx, state.clone()).instrument(span),
        );

        Self {
            ctx,
            input: Mutex::new(Some(input_tx)),
            output: tokio::sync::Mutex::new(output_rx),
            state,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        self.ctx.session_id()
    }

    pub fn meta(&self) -> &SessionMeta {
        self.ctx.meta()
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Deliver the user message. Only the first call is accepted.
    pub fn send(&self, text: impl Into<String>) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) || self.ctx.is_cancelled() {
            return Err(SessionError::Closed);
        }
        let sender = self
            .input
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
            .ok_or(SessionError::AlreadyStarted)?;
        sender.send(text.into()).map_err(|_| SessionError::Closed)?;
        mark_running(&self.state);
        Ok(())
    }

    /// Next response, or `None` once `End` has been consumed.
    pub async fn next(&self) -> Option<Response> {
        self.output.lock().await.recv().await
    }

    /// Stop the session. Safe to call repeatedly and from any task.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Closing session {}", self.id());
        self.ctx.cancel();
        self.state
            .store(SessionState::Closed as u8, Ordering::SeqCst);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.ctx.cancel();
    }
}

/// Idle -> Running. A closed session stays closed.
fn mark_running(state: &AtomicU8) {
    let _ = state.compare_exchange(
        SessionState::Idle as u8,
        SessionState::Running as u8,
        Ordering::SeqCst,
        Ordering::SeqCst,
    );
}

async fn run(
    ctx: RunContext,
    parts: SessionParts,
    input: oneshot::Receiver<String>,
    output: mpsc::Sender<Response>,
    state: Arc<AtomicU8>,
) {
    info!("Session started");
    let message = tokio::select! {
        biased;
        _ = ctx.token().cancelled() => None,
        received = input => received.ok(),
    };

    match message {
        Some(text) => {
            mark_running(&state);
            process(&ctx, &parts, text, &output).await;
        }
        None => info!("Session closed before a message arrived"),
    }

    let _ = output.send(Response::end()).await;
    state.store(SessionState::Closed as u8, Ordering::SeqCst);
    info!("Session finished");
}

async fn process(ctx: &RunContext, parts: &SessionParts, text: String, output: &mpsc::Sender<Response>) {
    let meta = ctx.meta();

    let mut history = if parts.history_window > 0 {
        match parts
            .storage
            .get_conversations(meta, parts.history_window, 0)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!("Failed to load conversation history: {e:#}");
                MessageHistory::new()
            }
        }
    } else {
        MessageHistory::new()
    };
    history.push(ChatMessage::user(text.clone()));

    if let Err(e) = parts.storage.create_conversation(meta, &text).await {
        warn!("Failed to store user message: {e:#}");
    }

    let memory = match parts.memory.retrieve(ctx).await {
        Ok(block) => block,
        Err(e) => {
            warn!("Failed to retrieve memory: {e:#}");
            let _ = output
                .send(Response::error("Error occurred: failed to retrieve memory"))
                .await;
            return;
        }
    };

    let mut responses = parts
        .agent
        .run(ctx.clone(), parts.model.clone(), history, Arc::new(memory));

    let mut answer = String::new();
    let mut succeeded = true;
    loop {
        let response = tokio::select! {
            biased;
            _ = ctx.token().cancelled() => {
                info!("Session cancelled while running");
                succeeded = false;
                break;
            }
            response = responses.recv() => response,
        };
        let Some(response) = response else { break };

        if response.kind == ResponseKind::PartialText {
            answer.push_str(&response.content);
        }
        let failed = response.kind == ResponseKind::Error;
        if output.send(response).await.is_err() {
            debug!("Session consumer went away");
            succeeded = false;
            break;
        }
        if failed {
            succeeded = false;
            break;
        }
    }

    if succeeded {
        if let Err(e) = parts.storage.finish_conversation(meta, &answer).await {
            warn!("Failed to store answer: {e:#}");
        }
    }
}
