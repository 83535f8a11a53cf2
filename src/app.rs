//! Orchestration of a conversation turn.
//!
//! `App::handle_turn` is the entire surface the front ends call: it
//! routes a message through feedback resolution or the matcher, falls
//! back to the generative provider on a weak match, and converts every
//! encoder/provider failure into a user-facing reply at this boundary.

use crate::{
    classify::classify,
    feedback::{is_affirmative, ConversationSession, PendingFallback},
    generative::{build_prompt, Generator, ProviderError},
    knowledge::{KnowledgeBase, KnowledgeEntry},
    semantic::{matcher, Decision, Encoder},
};
use std::sync::Arc;

const REPLY_LEARNED: &str = "Thank you! I have added this to my knowledge base.";
const REPLY_DECLINED: &str = "Thank you for your feedback. I will not add this to my knowledge base.";
const REPLY_NOT_SAVED: &str =
    "I couldn't save that answer to my knowledge base, so nothing was changed. Please try again later.";
const REPLY_NOT_SEARCHABLE: &str =
    "The answer was saved, but I couldn't refresh my knowledge base. It will become searchable after a restart.";
const REPLY_PROVIDER_DISABLED: &str =
    "I'm sorry, my generative model is not configured. Please set a valid GOOGLE_API_KEY.";
const REPLY_PROVIDER_FAILED: &str =
    "I'm sorry, something went wrong while generating an answer. Please try again later.";
const REPLY_MATCH_FAILED: &str =
    "I'm sorry, I couldn't process that question right now. Please try again later.";
const FEEDBACK_PROMPT: &str = "Are you satisfied with this response? (Yes/No)";

pub struct App {
    kb: KnowledgeBase,
    encoder: Arc<dyn Encoder>,
    generator: Box<dyn Generator>,
    threshold: f32,
    affirmative: Vec<String>,
}

impl App {
    pub fn new(
        kb: KnowledgeBase,
        encoder: Arc<dyn Encoder>,
        generator: Box<dyn Generator>,
        threshold: f32,
        affirmative: Vec<String>,
    ) -> Self {
        App {
            kb,
            encoder,
            generator,
            threshold,
            affirmative,
        }
    }

    pub fn kb(&self) -> &KnowledgeBase {
        &self.kb
    }

    /// The first configured affirmative token. Front ends that collect
    /// a structured yes/no resolve a confirmation through this, so the
    /// verdict stays inside the configured set.
    pub fn affirmative_token(&self) -> &str {
        self.affirmative.first().map(String::as_str).unwrap_or("yes")
    }

    /// Process one user turn and produce the reply text.
    ///
    /// While the session awaits feedback the message is consumed as a
    /// yes/no verdict, never re-matched against the knowledge base.
    pub fn handle_turn(&self, session: &mut ConversationSession, user_text: &str) -> String {
        let user_text = user_text.trim();
        if user_text.is_empty() {
            return String::new();
        }

        // take_pending resets the session to idle before we evaluate
        if let Some(pending) = session.take_pending() {
            return self.resolve_feedback(pending, user_text);
        }

        self.answer(session, user_text)
    }

    fn resolve_feedback(&self, pending: PendingFallback, message: &str) -> String {
        if !is_affirmative(message, &self.affirmative) {
            log::debug!("fallback answer declined for {:?}", pending.question);
            return REPLY_DECLINED.to_string();
        }

        let entry = KnowledgeEntry {
            question: pending.question,
            response_content: pending.content,
            response_type: pending.kind,
            explanation: pending.explanation,
        };

        if let Err(err) = self.kb.append(&entry) {
            log::error!("failed to persist new knowledge entry: {err}");
            return REPLY_NOT_SAVED.to_string();
        }

        // the entry is durable; a reload failure must not be masked
        if let Err(err) = self.kb.reload() {
            log::error!("knowledge base reload failed after append: {err}");
            return REPLY_NOT_SEARCHABLE.to_string();
        }

        log::info!(
            "learned new entry {:?}, knowledge base now has {} entries",
            entry.question,
            self.kb.len()
        );
        REPLY_LEARNED.to_string()
    }

    fn answer(&self, session: &mut ConversationSession, query: &str) -> String {
        let snapshot = self.kb.snapshot();

        let result =
            match matcher::match_query(self.encoder.as_ref(), query, &snapshot.vectors, self.threshold) {
                Ok(result) => result,
                Err(err) => {
                    log::error!("matching failed: {err}");
                    return REPLY_MATCH_FAILED.to_string();
                }
            };

        match result.decision {
            Decision::Confident => {
                let entry = &snapshot.entries[result.best_index];
                log::debug!(
                    "confident match {:?} (score {:.4})",
                    entry.question,
                    result.best_score
                );
                format_entry(entry)
            }
            Decision::Fallback => {
                // diagnostics only; the weak match is never rendered
                log::debug!(
                    "no confident match for {query:?} (best {:?} scored {:.4}, threshold {})",
                    snapshot.entries[result.best_index].question,
                    result.best_score,
                    self.threshold
                );
                self.fallback(session, query)
            }
        }
    }

    fn fallback(&self, session: &mut ConversationSession, query: &str) -> String {
        let raw_text = match self.generator.generate(&build_prompt(query)) {
            Ok(text) => text,
            Err(ProviderError::Disabled) => {
                log::warn!("fallback requested but generative model is disabled");
                return REPLY_PROVIDER_DISABLED.to_string();
            }
            Err(err) => {
                log::error!("generative provider failed: {err}");
                return REPLY_PROVIDER_FAILED.to_string();
            }
        };

        let classified = classify(&raw_text);

        let mut reply = classified.content.clone();
        if !classified.explanation.is_empty() {
            reply.push_str("\n\nExplanation:\n");
            reply.push_str(&classified.explanation);
        }
        reply.push_str("\n\n");
        reply.push_str(FEEDBACK_PROMPT);

        session.stage(PendingFallback {
            question: query.to_string(),
            content: classified.content,
            kind: classified.kind,
            explanation: classified.explanation,
        });

        reply
    }
}

fn format_entry(entry: &KnowledgeEntry) -> String {
    match entry.response_type {
        crate::knowledge::ResponseKind::Code => {
            let mut reply = format!(
                "Here's the code you requested:\n\n{}",
                entry.response_content
            );
            if !entry.explanation.is_empty() {
                reply.push_str("\n\nExplanation:\n");
                reply.push_str(&entry.explanation);
            }
            reply
        }
        crate::knowledge::ResponseKind::Text => entry.response_content.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::SessionState;
    use crate::knowledge::tests::{write_kb, StubEncoder};
    use crate::knowledge::ResponseKind;
    use std::sync::Mutex;

    struct StubGenerator {
        response: Result<&'static str, ()>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl StubGenerator {
        fn answering(response: &'static str) -> Self {
            StubGenerator {
                response: Ok(response),
                calls: Arc::new(Mutex::new(vec![])),
            }
        }

        fn failing() -> Self {
            StubGenerator {
                response: Err(()),
                calls: Arc::new(Mutex::new(vec![])),
            }
        }

        fn call_log(&self) -> Arc<Mutex<Vec<String>>> {
            self.calls.clone()
        }
    }

    impl Generator for StubGenerator {
        fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
            self.calls.lock().unwrap().push(prompt.to_string());
            match self.response {
                Ok(text) => Ok(text.to_string()),
                Err(()) => Err(ProviderError::Disabled),
            }
        }
    }

    fn test_app(dir: &tempfile::TempDir, generator: StubGenerator) -> App {
        let path = write_kb(
            dir.path(),
            "how do I print in python,print(\"hi\"),code,uses the print builtin\nwhat is rust,a systems language,text,\n",
        );
        let kb = KnowledgeBase::load(&path, Arc::new(StubEncoder)).unwrap();
        App::new(
            kb,
            Arc::new(StubEncoder),
            Box::new(generator),
            0.8,
            vec!["yes".to_string(), "y".to_string()],
        )
    }

    #[test]
    fn test_confident_match_returns_stored_entry() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir, StubGenerator::failing());
        let mut session = ConversationSession::new();

        let reply = app.handle_turn(&mut session, "how do I print in python");
        assert!(reply.contains("Here's the code you requested:"));
        assert!(reply.contains("print(\"hi\")"));
        assert!(reply.contains("Explanation:\nuses the print builtin"));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_text_entry_returned_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir, StubGenerator::failing());
        let mut session = ConversationSession::new();

        let reply = app.handle_turn(&mut session, "what is rust");
        assert_eq!(reply, "a systems language");
    }

    #[test]
    fn test_fallback_stages_pending_and_prompts() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(
            &dir,
            StubGenerator::answering("```python\nimport this\n```\n[Explanation]zen[/Explanation]"),
        );
        let mut session = ConversationSession::new();

        let reply = app.handle_turn(&mut session, "what is the zen of python");
        assert!(reply.contains("import this"));
        assert!(reply.contains("Explanation:\nzen"));
        assert!(reply.contains("Are you satisfied with this response?"));
        assert!(session.is_awaiting_feedback());
    }

    #[test]
    fn test_affirmative_feedback_grows_store_by_one() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir, StubGenerator::answering("an answer"));
        let mut session = ConversationSession::new();

        let before = app.kb().len();
        app.handle_turn(&mut session, "something unknown");
        let reply = app.handle_turn(&mut session, "yes");

        assert_eq!(reply, REPLY_LEARNED);
        assert_eq!(app.kb().len(), before + 1);
        assert_eq!(session.state(), SessionState::Idle);

        let snapshot = app.kb().snapshot();
        let learned = snapshot.entries.last().unwrap();
        assert_eq!(learned.question, "something unknown");
        assert_eq!(learned.response_content, "an answer");
        assert_eq!(learned.response_type, ResponseKind::Text);
    }

    #[test]
    fn test_negative_feedback_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir, StubGenerator::answering("an answer"));
        let mut session = ConversationSession::new();

        let before = app.kb().len();
        app.handle_turn(&mut session, "something unknown");
        let reply = app.handle_turn(&mut session, "no thanks");

        assert_eq!(reply, REPLY_DECLINED);
        assert_eq!(app.kb().len(), before);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_awaiting_feedback_never_rematches() {
        let dir = tempfile::tempdir().unwrap();
        let generator = StubGenerator::answering("an answer");
        let calls = generator.call_log();
        let app = test_app(&dir, generator);
        let mut session = ConversationSession::new();

        let before = app.kb().len();
        app.handle_turn(&mut session, "something unknown");

        // looks like a question, but while awaiting feedback it is a verdict
        let reply = app.handle_turn(&mut session, "what is rust");
        assert_eq!(reply, REPLY_DECLINED);
        assert_eq!(app.kb().len(), before);
        assert_eq!(session.state(), SessionState::Idle);

        // the feedback turn never reached the generator
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_provider_failure_does_not_await_feedback() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir, StubGenerator::failing());
        let mut session = ConversationSession::new();

        let reply = app.handle_turn(&mut session, "something unknown");
        assert_eq!(reply, REPLY_PROVIDER_DISABLED);
        assert_eq!(session.state(), SessionState::Idle);

        // the next message is treated as a fresh question, not feedback
        let reply = app.handle_turn(&mut session, "what is rust");
        assert_eq!(reply, "a systems language");
    }

    #[test]
    fn test_empty_input_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir, StubGenerator::failing());
        let mut session = ConversationSession::new();

        assert_eq!(app.handle_turn(&mut session, "   "), "");
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_prompt_sent_to_generator_has_instructions() {
        let dir = tempfile::tempdir().unwrap();
        let generator = StubGenerator::answering("an answer");
        let calls = generator.call_log();
        let app = test_app(&dir, generator);
        let mut session = ConversationSession::new();

        app.handle_turn(&mut session, "something unknown");

        let calls = calls.lock().unwrap();
        assert!(calls[0].starts_with("something unknown"));
        assert!(calls[0].contains("[Explanation]"));
    }

    #[test]
    fn test_affirmative_token_confirms_without_english_yes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_kb(dir.path(), "what is rust,a systems language,text,\n");
        let kb = KnowledgeBase::load(&path, Arc::new(StubEncoder)).unwrap();
        let app = App::new(
            kb,
            Arc::new(StubEncoder),
            Box::new(StubGenerator::answering("an answer")),
            0.8,
            vec!["បាទ".to_string()],
        );
        let mut session = ConversationSession::new();

        let before = app.kb().len();
        app.handle_turn(&mut session, "something unknown");

        assert_eq!(app.affirmative_token(), "បាទ");
        let reply = app.handle_turn(&mut session, app.affirmative_token());
        assert_eq!(reply, REPLY_LEARNED);
        assert_eq!(app.kb().len(), before + 1);
    }

    #[test]
    fn test_learned_entry_answerable_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(&dir, StubGenerator::answering("a learned answer"));
        let mut session = ConversationSession::new();

        // StubEncoder maps every unknown string to the same vector, so
        // once learned, the same question matches with score 1.0
        app.handle_turn(&mut session, "something unknown");
        app.handle_turn(&mut session, "yes");

        let reply = app.handle_turn(&mut session, "something unknown");
        assert_eq!(reply, "a learned answer");
        assert_eq!(session.state(), SessionState::Idle);
    }
}
