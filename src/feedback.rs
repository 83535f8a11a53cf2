//! Per-session feedback state.
//!
//! A session is either idle or waiting for a yes/no verdict on the last
//! generated fallback answer. While waiting, the next message is always
//! interpreted as feedback and never re-matched as a new question, so at
//! most one outstanding decision can drive at most one store mutation.

use crate::knowledge::ResponseKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingFeedback,
}

/// The fallback answer staged for confirmation. At most one per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFallback {
    pub question: String,
    pub content: String,
    pub kind: ResponseKind,
    pub explanation: String,
}

/// One independent conversation. Owned exclusively by the task handling
/// that conversation's turns.
#[derive(Debug, Default)]
pub struct ConversationSession {
    state: SessionState,
    pending: Option<PendingFallback>,
}

impl ConversationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_awaiting_feedback(&self) -> bool {
        self.state == SessionState::AwaitingFeedback
    }

    /// Stage a fallback answer and start waiting for feedback.
    pub fn stage(&mut self, pending: PendingFallback) {
        self.pending = Some(pending);
        self.state = SessionState::AwaitingFeedback;
    }

    /// Consume the staged answer, resetting the session to idle before
    /// the caller evaluates the feedback. A crash mid-evaluation can
    /// then never leave the session stuck awaiting feedback.
    pub fn take_pending(&mut self) -> Option<PendingFallback> {
        self.state = SessionState::Idle;
        self.pending.take()
    }
}

/// Whether `message` counts as a "yes", compared case-insensitively
/// against the configured affirmative tokens.
pub fn is_affirmative(message: &str, tokens: &[String]) -> bool {
    let message = message.trim().to_lowercase();
    tokens.iter().any(|token| token.to_lowercase() == message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> PendingFallback {
        PendingFallback {
            question: "how do I sort a vec".to_string(),
            content: "v.sort();".to_string(),
            kind: ResponseKind::Code,
            explanation: "sort is in-place".to_string(),
        }
    }

    fn tokens() -> Vec<String> {
        ["yes", "y", "បាទ", "ចាស"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_new_session_is_idle() {
        let session = ConversationSession::new();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.is_awaiting_feedback());
    }

    #[test]
    fn test_stage_transitions_to_awaiting() {
        let mut session = ConversationSession::new();
        session.stage(pending());
        assert!(session.is_awaiting_feedback());
    }

    #[test]
    fn test_take_pending_resets_to_idle() {
        let mut session = ConversationSession::new();
        session.stage(pending());

        let taken = session.take_pending();
        assert_eq!(taken, Some(pending()));
        assert_eq!(session.state(), SessionState::Idle);

        // a second take finds nothing
        assert_eq!(session.take_pending(), None);
    }

    #[test]
    fn test_take_pending_on_idle_session() {
        let mut session = ConversationSession::new();
        assert_eq!(session.take_pending(), None);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_affirmative_matching() {
        let tokens = tokens();
        assert!(is_affirmative("yes", &tokens));
        assert!(is_affirmative("YES", &tokens));
        assert!(is_affirmative("  Y ", &tokens));
        assert!(is_affirmative("បាទ", &tokens));
        assert!(!is_affirmative("no", &tokens));
        assert!(!is_affirmative("yes please", &tokens));
        assert!(!is_affirmative("", &tokens));
    }
}
