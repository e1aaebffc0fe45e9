// src/api/http/ask.rs
// POST /ask — accepts a question for a conversation thread and streams the
// workflow's event protocol back as server-sent events. Translating a
// typed event enum into wire frames this way mirrors the teacher's
// `api::ws::chat::unified_handler` channel-to-wire loop; here it's SSE
// rather than a duplex socket because spec.md §4.7/§6 specifies a
// long-lived HTTP response, not a WebSocket.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::api::error::ApiError;
use crate::event::WorkflowEvent;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub input: AskInput,
    pub conversation: ConversationRef,
}

#[derive(Debug, Deserialize)]
pub struct AskInput {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ConversationRef {
    pub id: String,
    #[allow(dead_code)]
    pub user_id: String,
    #[allow(dead_code)]
    pub company_id: String,
}

fn validate(req: &AskRequest) -> Result<(), ApiError> {
    let len = req.input.message.chars().count();
    if len == 0 || len > 2000 {
        return Err(ApiError::InvalidMessageLength);
    }
    if req.conversation.id.trim().is_empty() {
        return Err(ApiError::MissingConversationId);
    }
    Ok(())
}

/// Cancels the workflow's token when the SSE stream is dropped — either
/// because the client disconnected mid-stream or because the stream ran
/// to completion. A cancel after completion is a harmless no-op; a cancel
/// mid-stream lets the workflow engine abort at its next suspension point
/// without writing a checkpoint, per spec.md §5.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

pub async fn ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    validate(&req)?;

    let (tx, mut rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();
    let guard = CancelOnDrop(cancel.clone());

    let workflow = state.workflow.clone();
    let conversation_id = req.conversation.id.clone();
    let question = req.input.message.clone();
    let run_cancel = cancel.clone();
    let error_tx = tx.clone();

    crate::metrics::stream_opened();
    tokio::spawn(async move {
        if let Err(e) = workflow.run(&conversation_id, &question, run_cancel, tx).await {
            error!("workflow run failed: {e}");
            let _ = error_tx.send(WorkflowEvent::Error { error: e.to_string() }).await;
        }
        crate::metrics::stream_closed();
    });

    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(event) = rx.recv().await {
            let is_terminal = event.is_terminal();
            let sse_event = Event::default()
                .json_data(&event)
                .unwrap_or_else(|_| Event::default().data("{\"type\":\"error\",\"error\":\"failed to encode event\"}"));
            yield Ok(sse_event);
            if is_terminal {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(message: &str, conversation_id: &str) -> AskRequest {
        AskRequest {
            input: AskInput { message: message.to_string() },
            conversation: ConversationRef {
                id: conversation_id.to_string(),
                user_id: "u".to_string(),
                company_id: "c".to_string(),
            },
        }
    }

    #[test]
    fn rejects_empty_message() {
        assert!(matches!(validate(&req("", "t1")), Err(ApiError::InvalidMessageLength)));
    }

    #[test]
    fn rejects_oversized_message() {
        let long = "a".repeat(2001);
        assert!(matches!(validate(&req(&long, "t1")), Err(ApiError::InvalidMessageLength)));
    }

    #[test]
    fn rejects_missing_conversation_id() {
        assert!(matches!(validate(&req("hello", "")), Err(ApiError::MissingConversationId)));
    }

    #[test]
    fn accepts_well_formed_request() {
        assert!(validate(&req("How many technicians are active?", "t1")).is_ok());
    }
}
