// src/workflow/mod.rs
// The classify -> dispatch -> finalize state machine. A plain enum and a
// match-driven loop, not a graph framework or a dyn-dispatched node trait
// — the same composition style as the teacher's
// `operations::engine::OperationEngine::run_operation`, which threads an
// `mpsc::Sender<Event>` through a handful of concrete steps rather than
// walking a generic graph.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backends::{AdapterError, GeneralBackend, RagBackend, SqlBackend};
use crate::classifier::TaskClassifier;
use crate::config::backends::BackendsConfig;
use crate::conversation::{ConversationStore, Message, Role, WorkflowState};
use crate::event::{BackendTool, Channel, CompletionStats, Route, WorkflowEvent};
use crate::query_memory::QueryResult;

/// How many of the most recent messages the classifier sees, per spec.md
/// §4.5 ("the last up-to-four messages of dialogue").
const CLASSIFIER_HISTORY_WINDOW: usize = 4;

/// Render messages oldest-first as `role: content` lines, keeping only the
/// last `limit` of them.
fn format_message_history(messages: &[Message], limit: usize) -> String {
    let start = messages.len().saturating_sub(limit);
    messages[start..]
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn timer_route(state: &WorkflowState) -> &'static str {
    state.last_route.map(|r| r.as_str()).unwrap_or("unrouted")
}

/// The state machine's current node. `Classify` is always first;
/// `Dispatch` fans out to whichever backend the classifier picked;
/// `Finalize` is only visited when the configured finalize pass-through
/// is enabled.
enum NextStep {
    Classify,
    Dispatch(Route),
    Finalize { answer_text: String },
    Done,
}

pub struct WorkflowEngine {
    sql: Arc<dyn SqlBackend>,
    rag: Arc<dyn RagBackend>,
    general: Arc<dyn GeneralBackend>,
    classifier: Arc<TaskClassifier>,
    store: Arc<ConversationStore>,
    config: BackendsConfig,
    query_result_memory_capacity: usize,
    followup_max_context_tokens: usize,
    max_conversation_messages: usize,
}

impl WorkflowEngine {
    pub fn new(
        sql: Arc<dyn SqlBackend>,
        rag: Arc<dyn RagBackend>,
        general: Arc<dyn GeneralBackend>,
        classifier: Arc<TaskClassifier>,
        store: Arc<ConversationStore>,
        config: BackendsConfig,
        query_result_memory_capacity: usize,
    ) -> Self {
        Self::with_context_budget(
            sql,
            rag,
            general,
            classifier,
            store,
            config,
            query_result_memory_capacity,
            1500,
        )
    }

    pub fn with_context_budget(
        sql: Arc<dyn SqlBackend>,
        rag: Arc<dyn RagBackend>,
        general: Arc<dyn GeneralBackend>,
        classifier: Arc<TaskClassifier>,
        store: Arc<ConversationStore>,
        config: BackendsConfig,
        query_result_memory_capacity: usize,
        followup_max_context_tokens: usize,
    ) -> Self {
        Self::with_history_limit(
            sql,
            rag,
            general,
            classifier,
            store,
            config,
            query_result_memory_capacity,
            followup_max_context_tokens,
            50,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_history_limit(
        sql: Arc<dyn SqlBackend>,
        rag: Arc<dyn RagBackend>,
        general: Arc<dyn GeneralBackend>,
        classifier: Arc<TaskClassifier>,
        store: Arc<ConversationStore>,
        config: BackendsConfig,
        query_result_memory_capacity: usize,
        followup_max_context_tokens: usize,
        max_conversation_messages: usize,
    ) -> Self {
        Self {
            sql,
            rag,
            general,
            classifier,
            store,
            config,
            query_result_memory_capacity,
            followup_max_context_tokens,
            max_conversation_messages,
        }
    }

    /// Run one question through the engine, emitting events on `tx` as it
    /// goes. `cancel` is checked before every suspension point (each
    /// backend `.await`); a cancellation aborts without writing a
    /// checkpoint and without sending `Complete`.
    pub async fn run(
        &self,
        conversation_id: &str,
        question: &str,
        cancel: CancellationToken,
        tx: mpsc::Sender<WorkflowEvent>,
    ) -> anyhow::Result<()> {
        let _guard = self.store.lock_thread(conversation_id).await;

        self.store.append_message(conversation_id, Role::User, question).await?;

        let mut state = self
            .store
            .get_checkpoint(conversation_id)
            .await?
            .unwrap_or_else(|| WorkflowState::new(conversation_id, self.query_result_memory_capacity));

        let history = self.store.list_messages(conversation_id, self.max_conversation_messages).await?;
        // Drop the question just appended above — it's passed to adapters
        // separately and would otherwise appear twice in their prompts.
        let prior_history = &history[..history.len().saturating_sub(1)];
        let history_context = format_message_history(prior_history, self.max_conversation_messages);
        let recent_messages = format_message_history(prior_history, CLASSIFIER_HISTORY_WINDOW);

        let memory_context = state.query_result_memory.format_context(
            self.query_result_memory_capacity,
            self.followup_max_context_tokens,
            true,
        );
        let classifier_context = match (recent_messages.is_empty(), memory_context.is_empty()) {
            (true, _) => memory_context.clone(),
            (false, true) => recent_messages,
            (false, false) => format!("{recent_messages}\n\n{memory_context}"),
        };

        let mut step = NextStep::Classify;
        let mut stats = CompletionStats::default();
        let mut answer_text = String::new();
        let mut outcome = "success";
        let mut timer = crate::metrics::RequestTimer::new();

        // When pass-through is on, `finalize` is the single point that is
        // allowed to emit Final-channel tokens — the executor below only
        // captures the chosen backend's answer text (and still relays its
        // Reasoning-channel tokens as they arrive). This is what keeps the
        // per-channel concatenation in spec.md §4.1 true: without it, the
        // dispatch step would stream the answer once and `finalize` would
        // stream a reworded copy of the same text a second time.
        let emit_final_at_dispatch = !self.config.finalize_passthrough;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            step = match step {
                NextStep::Classify => {
                    let previous_route = state.last_route;
                    let route = self.classifier.classify(question, &classifier_context, previous_route).await;
                    state.last_route = Some(route);
                    timer.set_route(route.as_str());
                    if tx.send(WorkflowEvent::RouteDecision { route }).await.is_err() {
                        return Ok(());
                    }
                    NextStep::Dispatch(route)
                }
                NextStep::Dispatch(route) => {
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                    let result = self
                        .dispatch(
                            route,
                            question,
                            &memory_context,
                            &history_context,
                            &mut state,
                            &mut stats,
                            &tx,
                            &cancel,
                            emit_final_at_dispatch,
                        )
                        .await;
                    // Per spec.md §4.6/§7: an adapter failure is user-visible
                    // text, not a fatal `error` event — the workflow still
                    // reaches `finalize` and persists a checkpoint. The
                    // `error` event is reserved for infrastructural failures
                    // (store unreachable), which propagate out of `run` via
                    // `?` before this match is ever reached.
                    match result {
                        Ok(text) => {
                            answer_text = text;
                            if self.config.finalize_passthrough {
                                NextStep::Finalize { answer_text: answer_text.clone() }
                            } else {
                                NextStep::Done
                            }
                        }
                        Err(e) => {
                            outcome = "adapter_error";
                            let message = format!("Sorry, I ran into a problem answering that: {e}");
                            if emit_final_at_dispatch {
                                let _ = tx
                                    .send(WorkflowEvent::Token { channel: Channel::Final, content: message.clone() })
                                    .await;
                                stats.final_tokens += estimated_tokens(&message);
                                stats.tokens += estimated_tokens(&message);
                            }
                            answer_text = message.clone();
                            if self.config.finalize_passthrough {
                                NextStep::Finalize { answer_text: message }
                            } else {
                                NextStep::Done
                            }
                        }
                    }
                }
                NextStep::Finalize { answer_text } => {
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                    // The pass-through call itself is an adapter call like any
                    // other: if it fails, fall back to streaming the already
                    // computed answer verbatim rather than aborting the whole
                    // request with a fatal `error` event over one extra hop.
                    if let Err(e) = self.finalize(question, &answer_text, &tx, &cancel, &mut stats).await {
                        tracing::warn!("finalize pass-through failed, streaming raw answer: {e}");
                        let _ = tx
                            .send(WorkflowEvent::Token { channel: Channel::Final, content: answer_text.clone() })
                            .await;
                        stats.final_tokens += estimated_tokens(&answer_text);
                        stats.tokens += estimated_tokens(&answer_text);
                    }
                    NextStep::Done
                }
                NextStep::Done => break,
            };
        }

        self.store.append_message(conversation_id, Role::Assistant, &answer_text).await?;
        state.updated_at = chrono::Utc::now();
        self.store.put_checkpoint(&state).await?;

        crate::metrics::record_request(timer_route(&state), outcome);
        crate::metrics::record_tokens(stats.reasoning_tokens as u64, stats.final_tokens as u64);
        let _ = tx.send(WorkflowEvent::Complete { stats }).await;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        route: Route,
        question: &str,
        memory_context: &str,
        history_context: &str,
        state: &mut WorkflowState,
        stats: &mut CompletionStats,
        tx: &mpsc::Sender<WorkflowEvent>,
        cancel: &CancellationToken,
        emit_final: bool,
    ) -> Result<String, AdapterError> {
        match route {
            Route::Sql => {
                let _ = tx.send(WorkflowEvent::ToolStart { tool: BackendTool::new("sql_agent") }).await;
                if !self.config.enable_sql_agent {
                    return self
                        .canned_disabled_message(tx, "🔧 SQL Agent is not enabled for this deployment.", emit_final)
                        .await;
                }
                let answer = self.sql.answer(question, memory_context).await?;
                state.query_result_memory.push(QueryResult::new(
                    question,
                    answer.rows,
                    Some(answer.sql),
                    answer.tables_used,
                ));
                self.drain_stream(answer.stream, tx, cancel, stats, emit_final).await
            }
            Route::Rag => {
                let _ = tx.send(WorkflowEvent::ToolStart { tool: BackendTool::new("rag_agent") }).await;
                if !self.config.enable_rag_agent {
                    return self
                        .canned_disabled_message(tx, "🔧 RAG Agent is not enabled for this deployment.", emit_final)
                        .await;
                }
                let answer = self.rag.answer(question, memory_context).await?;
                let _ = answer.tables_used;
                self.drain_stream(answer.stream, tx, cancel, stats, emit_final).await
            }
            Route::General => {
                let _ = tx.send(WorkflowEvent::ToolStart { tool: BackendTool::new("general_agent") }).await;
                let stream = self.general.answer(question, history_context).await?;
                self.drain_stream(stream, tx, cancel, stats, emit_final).await
            }
        }
    }

    /// A disabled backend short-circuits with a canned answer rather than
    /// calling the backend or falling through to another route, per
    /// spec.md §4.6/§7. The message is only sent as a Final-channel token
    /// here when `finalize` isn't going to stream it itself afterward.
    async fn canned_disabled_message(
        &self,
        tx: &mpsc::Sender<WorkflowEvent>,
        message: &str,
        emit_final: bool,
    ) -> Result<String, AdapterError> {
        if emit_final {
            let _ = tx
                .send(WorkflowEvent::Token { channel: Channel::Final, content: message.to_string() })
                .await;
        }
        Ok(message.to_string())
    }

    /// Drains a backend's token stream, always accumulating the Final-channel
    /// text it carries so the caller can persist/finalize it, but only
    /// forwarding Final-channel tokens to `tx` (and counting them in `stats`)
    /// when `emit_final` is set. Reasoning-channel tokens are always
    /// forwarded and counted — they're the intermediate narration, never
    /// re-streamed by `finalize`.
    async fn drain_stream(
        &self,
        mut stream: crate::backends::TokenStream,
        tx: &mpsc::Sender<WorkflowEvent>,
        cancel: &CancellationToken,
        stats: &mut CompletionStats,
        emit_final: bool,
    ) -> Result<String, AdapterError> {
        let mut answer_text = String::new();
        while let Some(item) = stream.next().await {
            if cancel.is_cancelled() {
                break;
            }
            let token = item?;
            match token.channel {
                Channel::Final => {
                    answer_text.push_str(&token.content);
                    if !emit_final {
                        continue;
                    }
                    let estimated = estimated_tokens(&token.content);
                    stats.final_tokens += estimated;
                    stats.tokens += estimated;
                    if tx
                        .send(WorkflowEvent::Token { channel: token.channel, content: token.content })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Channel::Reasoning => {
                    let estimated = estimated_tokens(&token.content);
                    stats.reasoning_tokens += estimated;
                    stats.tokens += estimated;
                    if tx
                        .send(WorkflowEvent::Token { channel: token.channel, content: token.content })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
        Ok(answer_text)
    }

    /// Re-prompts the general model with a true identity instruction so the
    /// text it streams back matches the chosen backend's answer exactly,
    /// per spec.md §4.6 ("return exactly the following"). This is the only
    /// place Final-channel tokens are emitted when pass-through is enabled.
    async fn finalize(
        &self,
        question: &str,
        answer_text: &str,
        tx: &mpsc::Sender<WorkflowEvent>,
        cancel: &CancellationToken,
        stats: &mut CompletionStats,
    ) -> Result<(), AdapterError> {
        let prompt = format!(
            "Return the following answer exactly as provided, with no rewording, summarizing, or additions.\n\nQuestion: {question}\n\nAnswer: {answer_text}"
        );
        let stream = self.general.answer(&prompt, "").await?;
        self.drain_stream(stream, tx, cancel, stats, true).await?;
        Ok(())
    }
}

/// Same "~4 chars per token" heuristic `query_memory`'s context budget
/// uses, applied here to approximate `CompletionStats` without a real
/// tokenizer dependency.
fn estimated_tokens(content: &str) -> usize {
    (content.len() / 4).max(if content.is_empty() { 0 } else { 1 })
}
