//! End-to-end session flows through the public API.
//!
//! Generation is replaced by a scripted client so the pedagogy can be checked
//! turn by turn: placement, teaching, recall, completion and persistence.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use revision_core::{
    ActionType, AgentPhase, CombinedAgent, RevisionController, RevisionPolicy, SessionState,
    absorb_generated_reply, initialize_session,
    llm_client::{ChatMessage, CompletionClient},
    types::EvalResult,
};

/// Replays canned completions in order and counts calls.
#[derive(Default)]
struct ScriptedClient {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<usize>,
}

impl ScriptedClient {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, _system_directive: String, _context: Vec<ChatMessage>) -> Result<String> {
        *self.calls.lock().unwrap() += 1;
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("script exhausted"))
    }
}

struct Harness {
    controller: RevisionController,
    state: Option<SessionState>,
}

impl Harness {
    fn new(client: Arc<ScriptedClient>) -> Self {
        Self {
            controller: RevisionController::new(client, RevisionPolicy::default()),
            state: Some(initialize_session("session-1", "student-1", Some("quadratics".into()), Some("Quadratics".into()))),
        }
    }

    /// Runs a turn, then absorbs `tutor_reply` as the generated text.
    async fn turn(&mut self, message: &str, tutor_reply: &str) -> (ActionType, AgentPhase, bool) {
        let state = self.state.take().unwrap();
        let outcome = self.controller.process_turn(message, state, None, "Maths").await;
        let mut state = outcome.updated_state;
        absorb_generated_reply(&mut state, tutor_reply);
        self.state = Some(state);
        (outcome.action, outcome.updated_phase, outcome.advance_topic)
    }

    fn state(&self) -> &SessionState {
        self.state.as_ref().unwrap()
    }
}

#[tokio::test]
async fn full_session_from_placement_to_close() {
    let client = ScriptedClient::new(&[]);
    let mut h = Harness::new(client.clone());

    // Placement: three diagnostic questions, answers are not graded.
    let (action, phase, _) = h.turn("hi", "Hello! Which topics have you covered so far?").await;
    assert_eq!((action, phase), (ActionType::DiagnosticQuestion, AgentPhase::CurriculumDiagnostic));

    let (action, _, _) = h
        .turn("algebra and graphs", "Thanks, noted. Can you solve 2x + 3 = 11?\n[[ANSWER: x = 4]]")
        .await;
    assert_eq!(action, ActionType::DiagnosticQuestion);

    let (action, _, _) = h
        .turn("x = 4", "Thanks, noted. How confident are you with quadratics?")
        .await;
    assert_eq!(action, ActionType::DiagnosticQuestion);
    assert_eq!(h.state().diagnostic_questions_asked(), 3);
    assert_eq!(h.state().attempts, 0);
    assert!(!h.state().is_position_confirmed());

    // Gate opens.
    let (action, phase, _) = h
        .turn("not very", "Let's start. Solve x^2 - 5x + 6 = 0?\n[[ANSWER: x = 2, x = 3]]")
        .await;
    assert_eq!((action, phase), (ActionType::InitialQuestion, AgentPhase::KnowledgeIngestion));
    assert!(h.state().is_position_confirmed());
    assert_eq!(h.state().attempts, 0);

    // Partial then complete multi-root answer.
    let (action, phase, _) = h
        .turn("x = 2", "Good start, there is one more root. Solve x^2 - 5x + 6 = 0?")
        .await;
    assert_eq!((action, phase), (ActionType::RetryWithHint, AgentPhase::ActiveRevision));
    assert_eq!(h.state().expected_answer_hint.as_deref(), Some("x = 2, x = 3"));

    let (action, _, _) = h
        .turn("x=3 and x=2", "Spot on. Solve (x - 1)(x - 4) = 0?\n[[ANSWER: x = 1, x = 4]]")
        .await;
    assert_eq!(action, ActionType::ExtendDifficulty);
    assert_eq!(h.state().correct_streak, 1);

    // Mastery, then a passed recall check.
    let (action, phase, advance) = h
        .turn("4 and 1", "Brilliant. Without notes: what is 7 x 8?\n[[ANSWER: 56]]")
        .await;
    assert_eq!((action, phase), (ActionType::ConfirmMastery, AgentPhase::RecallCheck));
    assert!(!advance);

    let (_, _, advance) = h.turn("56", "Great recall. Which topic next?").await;
    assert!(advance);
    h.state.as_mut().unwrap().change_topic("circles", "Circle theorems");
    assert_eq!(h.state().attempts, 0);

    // Learner ends the session.
    let (action, phase, _) = h
        .turn("I'm done", "Today you secured quadratics. Next time: circle theorems.")
        .await;
    assert_eq!((action, phase), (ActionType::RunCompletionReview, AgentPhase::CompletionReview));
    assert!(!h.state().has_open_question());

    let (action, phase, _) = h.turn("bye", "Thanks for revising. See you soon.").await;
    assert_eq!((action, phase), (ActionType::CloseSession, AgentPhase::SessionClose));

    // Placement answers skip the evaluator; taught answers match the hidden answer.
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn repeated_failure_reaches_panic_recovery() {
    let incorrect = r#"{"result":"incorrect","confidence":"high","error_type":"recall_gap"}"#;
    let client = ScriptedClient::new(&[incorrect, incorrect, incorrect]);
    let mut h = Harness::new(client);
    h.state.as_mut().unwrap().confirm_curriculum_position();

    let (action, _, _) = h
        .turn("", "What is the formula for the area of a circle?\n[[ANSWER: pi r squared]]")
        .await;
    assert_eq!(action, ActionType::InitialQuestion);

    let (a1, _, _) = h.turn("2 pi r", "Not quite. What is the formula for the area of a circle?").await;
    let (a2, _, _) = h.turn("pi d", "Have another think. What is the formula for the area of a circle?").await;
    let (a3, phase, _) = h.turn("r squared", "That's okay. Let's slow down. What is r x r when r is 3?").await;

    assert_eq!(a1, ActionType::RetryWithHint);
    assert_eq!(a2, ActionType::RetryWithHint);
    assert_eq!((a3, phase), (ActionType::RecoverConfidence, AgentPhase::PanicRecovery));
    assert_eq!(h.state().attempts, 3);
    assert_eq!(h.state().last_evaluation.map(|e| e.result), Some(EvalResult::Incorrect));
}

#[tokio::test]
async fn session_resumes_from_persisted_json() {
    let client = ScriptedClient::new(&[]);
    let mut h = Harness::new(client);
    h.turn("hi", "Hello! Which topics have you covered so far?").await;

    let json = serde_json::to_string(h.state()).unwrap();
    let restored: SessionState = serde_json::from_str(&json).unwrap();
    assert_eq!(&restored, h.state());
    assert_eq!(restored.phase(), AgentPhase::CurriculumDiagnostic);
    assert_eq!(
        restored.current_question.as_deref(),
        Some("Which topics have you covered so far?")
    );
}

#[tokio::test]
async fn all_topics_secure_triggers_review() {
    let client = ScriptedClient::new(&[]);
    let mut h = Harness::new(client.clone());
    h.state.as_mut().unwrap().confirm_curriculum_position();
    h.state.as_mut().unwrap().topics_secure = true;

    let (action, phase, _) = h.turn("", "Great session today.").await;
    assert_eq!((action, phase), (ActionType::RunCompletionReview, AgentPhase::CompletionReview));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn combined_agent_runs_placement_then_teaching() {
    let client = ScriptedClient::new(&[
        "```EVALUATION\n{\"result\":\"unknown\",\"confidence\":\"low\",\"error_type\":null}\n```\n```TUTOR\nHello! Which topics have you covered?\n```",
        "```TUTOR\nLet's begin. What is 3 squared?\n[[ANSWER: 9]]\n```",
        "```EVALUATION\n{\"result\":\"correct\",\"confidence\":\"high\",\"error_type\":null,\"claimed_action\":\"EXTEND_DIFFICULTY\"}\n```\n```TUTOR\nYes! What is 4 cubed?\n[[ANSWER: 64]]\n```",
    ]);
    let policy = RevisionPolicy {
        min_diagnostic_questions: 1,
        ..RevisionPolicy::default()
    };
    let agent = CombinedAgent::new(client.clone(), policy);

    let state = initialize_session("s-2", "student-2", None, Some("Powers".into()));
    let turn = agent.respond("hi", state, None, "Maths", &[]).await;
    assert_eq!(turn.action, ActionType::DiagnosticQuestion);

    let turn = agent
        .respond("indices", turn.updated_state, None, "Maths", &[])
        .await;
    assert_eq!(turn.action, ActionType::InitialQuestion);
    assert_eq!(turn.updated_phase, AgentPhase::KnowledgeIngestion);
    assert_eq!(turn.updated_state.expected_answer_hint.as_deref(), Some("9"));

    let turn = agent.respond("9", turn.updated_state, None, "Maths", &[]).await;
    assert_eq!(turn.action, ActionType::ExtendDifficulty);
    assert_eq!(turn.updated_phase, AgentPhase::ActiveRevision);
    assert_eq!(turn.reply, "Yes! What is 4 cubed?");
    assert_eq!(client.calls(), 3);
}
