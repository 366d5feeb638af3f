use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// Progress note, e.g. a tool's status message.
    Status,
    /// A chunk of the final answer.
    PartialText,
    /// Terminal marker. Always the last response of a session.
    End,
    InputRequest,
    Error,
}

/// Branch of the run that produced a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Agent,
    Skill(String),
}

/// One event on a session's output stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub kind: ResponseKind,
    pub content: String,
    pub origin: Origin,
}

impl Response {
    pub fn new(kind: ResponseKind, content: impl Into<String>, origin: Origin) -> Self {
        Self {
            kind,
            content: content.into(),
            origin,
        }
    }

    pub fn status(content: impl Into<String>) -> Self {
        Self::new(ResponseKind::Status, content, Origin::Agent)
    }

    pub fn partial(content: impl Into<String>) -> Self {
        Self::new(ResponseKind::PartialText, content, Origin::Agent)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(ResponseKind::Error, content, Origin::Agent)
    }

    pub fn end() -> Self {
        Self::new(ResponseKind::End, "", Origin::Agent)
    }

    pub fn is_end(&self) -> bool {
        self.kind == ResponseKind::End
    }
}

/// Sending half of a run's response stream, tagged with its origin.
///
/// Send failures mean the consumer went away; they are ignored and the run
/// notices through cancellation instead.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Response>,
    origin: Origin,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<Response>) -> Self {
        Self {
            tx,
            origin: Origin::Agent,
        }
    }

    pub fn for_skill(&self, name: &str) -> Self {
        Self {
            tx: self.tx.clone(),
            origin: Origin::Skill(name.to_string()),
        }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub async fn emit(&self, kind: ResponseKind, content: impl Into<String>) {
        let _ = self
            .tx
            .send(Response::new(kind, content, self.origin.clone()))
            .await;
    }

    pub async fn status(&self, content: impl Into<String>) {
        self.emit(ResponseKind::Status, content).await;
    }

    pub async fn partial(&self, content: impl Into<String>) {
        self.emit(ResponseKind::PartialText, content).await;
    }

    pub async fn error(&self, content: impl Into<String>) {
        self.emit(ResponseKind::Error, content).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skill_sink_tags_origin() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = EventSink::new(tx);
        sink.status("thinking").await;
        sink.for_skill("Census").partial("42").await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.origin, Origin::Agent);
        assert_eq!(first.kind, ResponseKind::Status);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.origin, Origin::Skill("Census".into()));
        assert_eq!(second.content, "42");
    }

    #[tokio::test]
    async fn closed_receiver_is_ignored() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        EventSink::new(tx).error("nobody listening").await;
    }
}
