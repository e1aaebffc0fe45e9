// src/classifier/mod.rs
// Three-way routing decision: sql | rag | general. Cheap rule checks run
// first (business-entity vocabulary match, document-keyword match); only
// an ambiguous question reaches the LLM. This mirrors the teacher's
// `llm::router::TaskClassifier` — a deterministic, stubbed-LLM-testable
// gate in front of an expensive call — generalized from a two-tier
// fast/voice/thinker split to a three-way backend split, and the
// `simple_mode` cheap-heuristic-before-LLM idiom from
// `operations::engine::simple_mode`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::warn;

use crate::backends::openai_client::OpenAiClient;
use crate::event::Route;

/// Documents/manuals/policy vocabulary that suggests a RAG lookup over a
/// data lookup. Not exhaustive — just cheap enough to skip the LLM call
/// for the obvious cases.
const RAG_KEYWORDS: &[&str] = &[
    "document", "policy", "manual", "according to", "report says", "handbook", "guideline",
];

/// "How do I use the system" phrasing, per spec.md §4.5 rule 2 — and,
/// since rule 1 excludes it, checked before the vocabulary match so a
/// question like "how do I edit a customer?" routes to rag even though
/// "customer" is in the vocabulary.
const USAGE_PHRASES: &[&str] = &[
    "how do i", "how to", "steps to", "what permissions", "how can i", "how does one",
];

/// Referential demonstratives that mark a question as a follow-up to a
/// prior SQL result, per spec.md §4.5 rule 3.
const REFERENTIAL_PHRASES: &[&str] =
    &["that", "those", "the above", "from before", "this one", "these"];

#[async_trait]
pub trait ClassifierLlm: Send + Sync {
    async fn classify_reply(&self, prompt: &str) -> anyhow::Result<String>;
}

#[async_trait]
impl ClassifierLlm for OpenAiClient {
    async fn classify_reply(&self, prompt: &str) -> anyhow::Result<String> {
        self.complete(CLASSIFIER_SYSTEM_PROMPT, prompt)
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))
    }
}

const CLASSIFIER_SYSTEM_PROMPT: &str = "Classify the user's question into exactly one of: \
sql, rag, general. Reply with that single word and nothing else. \
Use \"sql\" when the question asks about structured records, counts, totals, or filters over \
known data entities. Use \"rag\" when the question asks about document or policy content. \
Use \"general\" for anything else, including greetings, opinions, or ambiguous questions.";

#[derive(Debug, Default)]
pub struct ClassifierStats {
    pub sql: u64,
    pub rag: u64,
    pub general: u64,
    pub llm_fallbacks: u64,
}

pub struct TaskClassifier {
    /// Business-entity vocabulary derived once from the join graph at
    /// startup and reused for the life of the process.
    vocabulary: Arc<Vec<String>>,
    llm: Arc<dyn ClassifierLlm>,
    counts: RwLock<ClassifierStats>,
    requests: AtomicU64,
}

impl TaskClassifier {
    pub fn new(vocabulary: Vec<String>, llm: Arc<dyn ClassifierLlm>) -> Self {
        Self {
            vocabulary: Arc::new(vocabulary),
            llm,
            counts: RwLock::new(ClassifierStats::default()),
            requests: AtomicU64::new(0),
        }
    }

    /// `previous_route` is the route the conversation's last turn took
    /// (from `WorkflowState::last_route`), used to detect a follow-up
    /// question referring back to a prior SQL result (spec.md §4.5 rule 3).
    pub async fn classify(&self, question: &str, context: &str, previous_route: Option<Route>) -> Route {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let lowered = question.to_lowercase();

        // Rule 2 first (and rule 1's exclusion): usage-shaped questions
        // never route to sql even when they mention a business entity.
        if Self::is_usage_phrasing(&lowered) {
            self.record(Route::Rag);
            return Route::Rag;
        }

        // Rule 1: a bare business-entity mention.
        if self.mentions_business_entity(&lowered) {
            self.record(Route::Sql);
            return Route::Sql;
        }

        // Rule 3: a referential follow-up to a prior SQL result.
        if previous_route == Some(Route::Sql) && Self::is_referential_followup(&lowered) {
            self.record(Route::Sql);
            return Route::Sql;
        }

        if RAG_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
            self.record(Route::Rag);
            return Route::Rag;
        }

        self.counts.write().unwrap().llm_fallbacks += 1;
        let route = self.classify_via_llm(question, context, previous_route).await;
        self.record(route);
        route
    }

    fn is_usage_phrasing(lowered_question: &str) -> bool {
        USAGE_PHRASES.iter().any(|p| lowered_question.contains(p))
    }

    fn is_referential_followup(lowered_question: &str) -> bool {
        REFERENTIAL_PHRASES.iter().any(|p| lowered_question.contains(p))
    }

    fn mentions_business_entity(&self, lowered_question: &str) -> bool {
        self.vocabulary.iter().any(|term| !term.is_empty() && lowered_question.contains(term.as_str()))
    }

    async fn classify_via_llm(&self, question: &str, context: &str, previous_route: Option<Route>) -> Route {
        let mut prompt = String::new();
        if let Some(route) = previous_route {
            prompt.push_str(&format!("Previous turn routed to: {}\n", route.as_str()));
        }
        if !context.is_empty() {
            prompt.push_str(&format!("Context:\n{context}\n\n"));
        }
        prompt.push_str(&format!("Question: {question}"));

        match self.llm.classify_reply(&prompt).await {
            Ok(reply) => match reply.trim().to_lowercase().as_str() {
                "sql" => Route::Sql,
                "rag" => Route::Rag,
                "general" => Route::General,
                other => {
                    warn!("classifier received unrecognized reply {:?}, defaulting to general", other);
                    Route::General
                }
            },
            Err(e) => {
                warn!("classifier LLM call failed ({e}), defaulting to general");
                Route::General
            }
        }
    }

    fn record(&self, route: Route) {
        let mut counts = self.counts.write().unwrap();
        match route {
            Route::Sql => counts.sql += 1,
            Route::Rag => counts.rag += 1,
            Route::General => counts.general += 1,
        }
    }

    pub fn summary(&self) -> String {
        let counts = self.counts.read().unwrap();
        format!(
            "requests={} sql={} rag={} general={} llm_fallbacks={}",
            self.requests.load(Ordering::Relaxed),
            counts.sql,
            counts.rag,
            counts.general,
            counts.llm_fallbacks
        )
    }

    pub fn reset_stats(&self) {
        *self.counts.write().unwrap() = ClassifierStats::default();
        self.requests.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockLlm {
        reply: Mutex<String>,
    }

    #[async_trait]
    impl ClassifierLlm for MockLlm {
        async fn classify_reply(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.reply.lock().unwrap().clone())
        }
    }

    fn classifier(reply: &str) -> TaskClassifier {
        TaskClassifier::new(
            vec!["customers".to_string(), "orders".to_string()],
            Arc::new(MockLlm { reply: Mutex::new(reply.to_string()) }),
        )
    }

    #[tokio::test]
    async fn routes_to_sql_on_vocabulary_match() {
        let classifier = classifier("general");
        let route = classifier.classify("how many customers do we have?", "", None).await;
        assert_eq!(route, Route::Sql);
    }

    #[tokio::test]
    async fn routes_to_rag_on_keyword_match() {
        let classifier = classifier("general");
        let route =
            classifier.classify("what does the policy document say about refunds?", "", None).await;
        assert_eq!(route, Route::Rag);
    }

    #[tokio::test]
    async fn usage_phrasing_routes_to_rag_even_with_entity_mention() {
        let classifier = classifier("general");
        let route = classifier.classify("how do I edit a customer record?", "", None).await;
        assert_eq!(route, Route::Rag);
    }

    #[tokio::test]
    async fn referential_followup_after_sql_routes_to_sql() {
        let classifier = classifier("general");
        let route = classifier
            .classify("show me the questions for that inspection", "", Some(Route::Sql))
            .await;
        assert_eq!(route, Route::Sql);
    }

    #[tokio::test]
    async fn referential_phrasing_without_prior_sql_falls_through() {
        let classifier = classifier("rag");
        let route = classifier.classify("what about that one?", "", Some(Route::General)).await;
        assert_eq!(route, Route::Rag);
    }

    #[tokio::test]
    async fn falls_through_to_llm_when_ambiguous() {
        let classifier = classifier("rag");
        let route = classifier.classify("tell me something interesting", "", None).await;
        assert_eq!(route, Route::Rag);
    }

    #[tokio::test]
    async fn anomalous_llm_reply_defaults_to_general() {
        let classifier = classifier("I'm not sure, maybe sql?");
        let route = classifier.classify("tell me something interesting", "", None).await;
        assert_eq!(route, Route::General);
    }

    #[tokio::test]
    async fn stats_track_routing_decisions() {
        let classifier = classifier("general");
        classifier.classify("how many customers?", "", None).await;
        classifier.classify("hello there", "", None).await;
        assert!(classifier.summary().contains("sql=1"));
        assert!(classifier.summary().contains("general=1"));
    }
}
