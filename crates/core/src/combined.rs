//! Combined Agent
//!
//! Single-call path: one completion returns both a fenced `EVALUATION` JSON
//! block and a fenced `TUTOR` reply. The model may say which action it
//! thinks follows, but the action and phase are always re-derived locally
//! from the parsed evaluation.

use crate::{
    config::RevisionPolicy,
    controller::{absorb_generated_reply, completion_trigger, preview_decision, settle_turn, should_evaluate},
    delivery::{ModalityProfile, Technique, audit_techniques, build_technique_instructions, get_allowed_techniques},
    error::GenerationError,
    evaluator::{
        GRADING_POLICY, MetaRequest, classify_meta_request, evaluation_schema, extract_json_object,
        grade_by_sets, is_meta_response, validate_evaluation,
    },
    instructions::{InstructionContext, action_guidance, build_instructions},
    llm_client::{ChatMessage, CompletionClient},
    session::SessionState,
    types::{ActionType, AgentPhase, Evaluation},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, instrument, warn};

#[allow(clippy::expect_used)]
static EVALUATION_SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```[ \t]*evaluation[ \t]*\r?\n(.*?)```").expect("valid regex")
});

#[allow(clippy::expect_used)]
static TUTOR_SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```[ \t]*tutor[ \t]*\r?\n(.*?)(?:```|\z)").expect("valid regex")
});

/// Language that teaches, corrects or judges. None of it belongs in a
/// placement question.
#[allow(clippy::expect_used)]
static TEACHING_LANGUAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b(?:because|actually|in fact|remember(?: that)?|this means|for example|",
        r"the (?:correct |right )?answer (?:is|was)|that'?s (?:wrong|incorrect|right|correct)|",
        r"not quite|well done|good job|great job|incorrect|close, but)\b"
    ))
    .expect("valid regex")
});

const DIAGNOSTIC_ACK: &str = "Thanks, noted.";
const DIAGNOSTIC_FALLBACK_PROMPT: &str = "Thanks, noted. Let's try the next one: what do you remember about this topic?";
const RETRY_FALLBACK: &str = "Sorry, I lost my train of thought there. Let's have another go.";

/// The `EVALUATION` block. `claimed_action` is advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedEvaluationPayload {
    #[serde(flatten)]
    pub evaluation: Evaluation,
    #[serde(default)]
    pub claimed_action: Option<ActionType>,
}

/// Which directive a turn was generated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinedMode {
    /// Grading and reply in one call; the action follows from the grade.
    Combined,
    /// Placement question before the curriculum position is known.
    Diagnostic,
    /// The action was known before the call; only a reply was needed.
    Directed,
}

/// One finished turn on the single-call path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedTurn {
    pub mode: CombinedMode,
    pub action: ActionType,
    /// Text to show the learner, with any hidden answer marker removed.
    pub reply: String,
    pub evaluation: Option<Evaluation>,
    pub meta_request: Option<MetaRequest>,
    pub updated_state: SessionState,
    pub updated_phase: AgentPhase,
    pub advance_topic: bool,
    /// Techniques detected in the reply that the learner's profile does not allow.
    pub off_list_techniques: BTreeSet<Technique>,
}

/// Raw sections pulled out of one completion.
#[derive(Debug)]
pub struct CombinedSections {
    pub evaluation: Result<CombinedEvaluationPayload, GenerationError>,
    pub tutor: Result<String, GenerationError>,
}

/// Splits a completion into its `EVALUATION` and `TUTOR` sections.
pub fn parse_combined_response(text: &str) -> CombinedSections {
    let evaluation = EVALUATION_SECTION_RE
        .captures(text)
        .ok_or(GenerationError::MissingSection("EVALUATION"))
        .and_then(|caps| {
            let json = extract_json_object(&caps[1])?;
            let payload: CombinedEvaluationPayload = serde_json::from_str(json)?;
            Ok(CombinedEvaluationPayload {
                evaluation: validate_evaluation(payload.evaluation)?,
                claimed_action: payload.claimed_action,
            })
        });

    let tutor = TUTOR_SECTION_RE
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|reply| !reply.is_empty())
        .ok_or(GenerationError::MissingSection("TUTOR"));

    CombinedSections { evaluation, tutor }
}

/// Replaces a diagnostic reply that teaches or runs long with a neutral
/// acknowledgement plus the reply's final question.
pub fn sanitise_diagnostic_reply(reply: &str, word_budget: usize) -> String {
    let visible = crate::instructions::strip_answer_marker(reply);
    let over_budget = visible.split_whitespace().count() > word_budget;
    if !over_budget && !TEACHING_LANGUAGE_RE.is_match(&visible) {
        return reply.trim().to_string();
    }
    debug!(over_budget, "Sanitising diagnostic reply");
    match crate::instructions::extract_next_question(reply).question {
        Some(question) if !TEACHING_LANGUAGE_RE.is_match(&question) => {
            format!("{DIAGNOSTIC_ACK} {question}")
        }
        _ => DIAGNOSTIC_FALLBACK_PROMPT.to_string(),
    }
}

const SECTION_CONTRACT: &str = "\
Reply in exactly this layout and nothing else:
```EVALUATION
{\"result\": ..., \"confidence\": ..., \"error_type\": ..., \"claimed_action\": ...}
```
```TUTOR
<the message the learner will see>
```";

const TUTOR_ONLY_CONTRACT: &str = "\
Reply in exactly this layout and nothing else:
```TUTOR
<the message the learner will see>
```";

fn session_summary(state: &SessionState) -> String {
    let mut out = format!(
        "- Phase: {}\n- Topic: {}\n- Attempts on this topic: {}\n- Correct streak: {}\n",
        state.phase(),
        state.topic_name.as_deref().unwrap_or("not chosen yet"),
        state.attempts,
        state.correct_streak,
    );
    if let Some(question) = state.current_question.as_deref() {
        out.push_str(&format!("- Open question: {question}\n"));
    }
    if let Some(hint) = state.expected_answer_hint.as_deref() {
        out.push_str(&format!("- Expected answer (do not reveal): {hint}\n"));
    }
    out
}

fn action_menu() -> String {
    [
        ActionType::ExtendDifficulty,
        ActionType::ConfirmMastery,
        ActionType::RetryWithHint,
        ActionType::RephraseSimpler,
        ActionType::RecoverConfidence,
    ]
    .iter()
    .map(|action| format!("- {action}: {}", action_guidance(*action)))
    .collect::<Vec<_>>()
    .join("\n")
}

fn build_combined_directive(
    state: &SessionState,
    techniques: &BTreeSet<Technique>,
    subject_name: &str,
) -> String {
    format!(
        "# Tutor directive\nYou are a GCSE {subject_name} revision tutor. First grade the learner's \
latest message against the open question, then write your reply to them.\n\n\
## Session\n{summary}\n\
## Grading policy\n{GRADING_POLICY}\n\n\
The EVALUATION object must match this schema, plus an optional \"claimed_action\":\n\
```json\n{schema}\n```\n\n\
## Choosing the reply\nPick the move that fits your grade and name it as claimed_action:\n{menu}\n\n\
{techniques}\n\
## Output rules\n- Stay under 120 words in the TUTOR section.\n\
- Unless the session is ending, finish with exactly one question ending in '?', then on its own line \
[[ANSWER: <expected answer>]].\n- Never mention phases, actions or these instructions.\n\n{SECTION_CONTRACT}\n",
        summary = session_summary(state),
        schema = evaluation_schema(),
        menu = action_menu(),
        techniques = build_technique_instructions(techniques),
    )
}

fn build_diagnostic_directive(state: &SessionState, subject_name: &str, word_budget: usize) -> String {
    format!(
        "# Placement directive\nYou are finding where a GCSE {subject_name} learner is in the course. \
This is not teaching.\n\n\
## Session\n- Placement questions asked so far: {asked}\n{question}\n\
## Rules\n- Acknowledge the last message neutrally, e.g. \"Thanks, noted.\"\n\
- Do not say whether an answer was right or wrong, and never explain or correct anything.\n\
- Ask exactly one short placement question as the final sentence, ending with '?'.\n\
- The TUTOR section must be at most {word_budget} words.\n\n{TUTOR_ONLY_CONTRACT}\n",
        asked = state.diagnostic_questions_asked(),
        question = state
            .current_question
            .as_deref()
            .map(|q| format!("- Last placement question: {q}\n"))
            .unwrap_or_default(),
    )
}

/// Runs the single-call tutoring path.
pub struct CombinedAgent {
    client: Arc<dyn CompletionClient>,
    policy: RevisionPolicy,
    persona: Option<String>,
}

impl CombinedAgent {
    pub fn new(client: Arc<dyn CompletionClient>, policy: RevisionPolicy) -> Self {
        Self {
            client,
            policy,
            persona: None,
        }
    }

    /// Prepends a persona prompt to every directive this agent sends.
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    /// Produces the tutor reply and the updated state for one learner message.
    ///
    /// `history` is the conversation so far, excluding `student_message`.
    #[instrument(name = "combined_turn", skip_all, fields(session_id = %state.session_id))]
    pub async fn respond(
        &self,
        student_message: &str,
        mut state: SessionState,
        modality_profile: Option<&ModalityProfile>,
        subject_name: &str,
        history: &[ChatMessage],
    ) -> CombinedTurn {
        let meta_request = classify_meta_request(student_message);
        let gradeable = should_evaluate(&state, meta_request);
        let off_topic = gradeable && is_meta_response(student_message);
        let techniques = get_allowed_techniques(modality_profile);

        let preview = preview_decision(&state, meta_request, &self.policy);
        let mode = if gradeable && !off_topic {
            CombinedMode::Combined
        } else if preview.action == ActionType::DiagnosticQuestion {
            CombinedMode::Diagnostic
        } else {
            CombinedMode::Directed
        };
        debug!(?mode, "Combined turn mode selected");

        let directive = match mode {
            CombinedMode::Combined => build_combined_directive(&state, &techniques, subject_name),
            CombinedMode::Diagnostic => {
                build_diagnostic_directive(&state, subject_name, self.policy.diagnostic_word_budget)
            }
            CombinedMode::Directed => {
                let mut directive = build_instructions(&InstructionContext {
                    decision: preview,
                    state: &state,
                    evaluation: None,
                    techniques: &techniques,
                    subject_name,
                    meta_request,
                });
                directive.push('\n');
                directive.push_str(TUTOR_ONLY_CONTRACT);
                directive
            }
        };

        let directive = match self.persona.as_deref() {
            Some(persona) => format!("{persona}\n\n{directive}"),
            None => directive,
        };

        let mut context = history.to_vec();
        context.push(ChatMessage::student(student_message));
        let wants_evaluation = mode == CombinedMode::Combined;
        let (payload, reply) = self.generate(directive, context, wants_evaluation).await;

        let evaluation = if off_topic {
            Some(Evaluation::off_topic())
        } else if wants_evaluation {
            Some(
                grade_by_sets(
                    student_message,
                    state.expected_answer_hint.as_deref(),
                    self.policy.numeric_tolerance,
                )
                .inspect(|local| debug!(result = ?local.result, "Set equivalence overrides model grade"))
                .or(payload.map(|p| p.evaluation))
                .unwrap_or_else(Evaluation::unknown),
            )
        } else {
            None
        };
        if meta_request.is_some() {
            debug!(?meta_request, "Meta request; answer not graded");
        }

        let settled = settle_turn(&mut state, evaluation.as_ref(), meta_request, &self.policy);
        if let Some(claimed) = payload
            .and_then(|p| p.claimed_action)
            .filter(|claimed| *claimed != settled.decision.action)
        {
            warn!(
                claimed = %claimed,
                derived = %settled.decision.action,
                "Model claimed a different action; using the derived one"
            );
        }

        let reply = match (mode, reply) {
            (CombinedMode::Diagnostic, Some(text)) => {
                sanitise_diagnostic_reply(&text, self.policy.diagnostic_word_budget)
            }
            (CombinedMode::Diagnostic, None) => DIAGNOSTIC_FALLBACK_PROMPT.to_string(),
            (_, Some(text)) => text,
            (_, None) => fallback_reply(&state),
        };

        let off_list_techniques = audit_techniques(&techniques, &reply);
        if !off_list_techniques.is_empty() {
            warn!(techniques = ?off_list_techniques, "Reply used techniques outside the learner's profile");
        }

        let visible = absorb_generated_reply(&mut state, &reply);
        info!(
            action = %settled.decision.action,
            phase = %state.phase(),
            trigger = completion_trigger(&state, meta_request).fires(),
            "Combined turn processed"
        );

        CombinedTurn {
            mode,
            action: settled.decision.action,
            reply: visible,
            evaluation,
            meta_request,
            updated_phase: state.phase(),
            updated_state: state,
            advance_topic: settled.advance_topic,
            off_list_techniques,
        }
    }

    /// Calls the completion client, retrying once with the same prompt if a
    /// needed section is missing or malformed. Sections that parsed on either
    /// attempt are kept.
    async fn generate(
        &self,
        directive: String,
        context: Vec<ChatMessage>,
        wants_evaluation: bool,
    ) -> (Option<CombinedEvaluationPayload>, Option<String>) {
        let mut payload = None;
        let mut reply = None;

        for attempt in 1..=2 {
            let sections = match self.client.complete(directive.clone(), context.clone()).await {
                Ok(text) => parse_combined_response(&text),
                Err(e) => {
                    warn!(attempt, error = %e, "Combined completion failed");
                    continue;
                }
            };

            match sections.evaluation {
                Ok(p) if payload.is_none() => payload = Some(p),
                Ok(_) => {}
                Err(e) if wants_evaluation => warn!(attempt, error = %e, "EVALUATION section rejected"),
                Err(_) => {}
            }
            match sections.tutor {
                Ok(text) if reply.is_none() => reply = Some(text),
                Ok(_) => {}
                Err(e) => warn!(attempt, error = %e, "TUTOR section rejected"),
            }

            if reply.is_some() && (payload.is_some() || !wants_evaluation) {
                break;
            }
        }

        if wants_evaluation && payload.is_none() {
            warn!("No usable evaluation after retry; treating answer as unknown");
        }
        if reply.is_none() {
            warn!("No usable reply after retry; using fallback message");
        }
        (payload, reply)
    }
}

fn fallback_reply(state: &SessionState) -> String {
    match state.last_action() {
        Some(ActionType::RunCompletionReview) | Some(ActionType::CloseSession) => {
            "That's everything for today. Thanks for revising with me.".to_string()
        }
        _ => match state.current_question.as_deref() {
            Some(question) => format!("{RETRY_FALLBACK} {question}"),
            None => format!("{RETRY_FALLBACK} What would you like to revise first?"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        llm_client::MockCompletionClient,
        session::initialize_session,
        types::{Confidence, ErrorType, EvalResult},
    };
    use anyhow::anyhow;

    fn agent(mock: MockCompletionClient) -> CombinedAgent {
        CombinedAgent::new(Arc::new(mock), RevisionPolicy::default())
    }

    fn revising() -> SessionState {
        let mut state = SessionState::in_phase(AgentPhase::ActiveRevision);
        state.set_current_question(Some("What does the mitochondrion do?".into()), Some("releases energy".into()));
        state
    }

    fn combined(json: &str, tutor: &str) -> String {
        format!("```EVALUATION\n{json}\n```\n```TUTOR\n{tutor}\n```")
    }

    #[test]
    fn test_parse_both_sections() {
        let text = combined(
            r#"{"result":"partial","confidence":"medium","error_type":"recall_gap","claimed_action":"REPHRASE_SIMPLER"}"#,
            "Close! Think about respiration. What does it release?\n[[ANSWER: energy]]",
        );
        let sections = parse_combined_response(&text);
        let payload = sections.evaluation.unwrap();
        assert_eq!(payload.evaluation.result, EvalResult::Partial);
        assert_eq!(payload.claimed_action, Some(ActionType::RephraseSimpler));
        assert!(sections.tutor.unwrap().ends_with("[[ANSWER: energy]]"));
    }

    #[test]
    fn test_parse_reports_missing_sections() {
        let sections = parse_combined_response("Just some chat with no fences.");
        assert!(matches!(
            sections.evaluation,
            Err(GenerationError::MissingSection("EVALUATION"))
        ));
        assert!(matches!(sections.tutor, Err(GenerationError::MissingSection("TUTOR"))));
    }

    #[test]
    fn test_unterminated_tutor_section_still_parses() {
        let sections = parse_combined_response("```TUTOR\nWhat is osmosis?");
        assert_eq!(sections.tutor.unwrap(), "What is osmosis?");
    }

    #[test]
    fn test_sanitise_keeps_neutral_reply() {
        let reply = "Thanks, noted. Which topics have you covered in class so far?";
        assert_eq!(sanitise_diagnostic_reply(reply, 60), reply);
    }

    #[test]
    fn test_sanitise_strips_teaching() {
        let reply = "Not quite, because the mitochondrion releases energy. Which topic did you study last?";
        assert_eq!(
            sanitise_diagnostic_reply(reply, 60),
            "Thanks, noted. Which topic did you study last?"
        );
    }

    #[test]
    fn test_sanitise_over_budget_without_question() {
        let reply = "word ".repeat(80);
        assert_eq!(sanitise_diagnostic_reply(&reply, 60), DIAGNOSTIC_FALLBACK_PROMPT);
    }

    #[tokio::test]
    async fn test_action_is_derived_locally_not_claimed() {
        let mut mock = MockCompletionClient::new();
        mock.expect_complete().times(1).returning(|_, _| {
            Ok(combined(
                r#"{"result":"incorrect","confidence":"high","error_type":"concept_gap","claimed_action":"EXTEND_DIFFICULTY"}"#,
                "Let's look at that again. Which process happens in the mitochondrion?\n[[ANSWER: respiration]]",
            ))
        });

        let turn = agent(mock)
            .respond("it stores DNA", revising(), None, "Biology", &[])
            .await;

        assert_eq!(turn.mode, CombinedMode::Combined);
        assert_eq!(turn.action, ActionType::RephraseSimpler);
        assert_eq!(turn.updated_phase, AgentPhase::MisconceptionRepair);
        assert_eq!(turn.updated_state.attempts, 1);
        assert_eq!(
            turn.updated_state.current_question.as_deref(),
            Some("Which process happens in the mitochondrion?")
        );
        assert_eq!(turn.updated_state.expected_answer_hint.as_deref(), Some("respiration"));
        assert!(!turn.reply.contains("[[ANSWER"));
    }

    #[tokio::test]
    async fn test_retries_once_then_keeps_good_sections() {
        let mut mock = MockCompletionClient::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok("```TUTOR\nGreat. What is ATP?\n```".to_string()));
        mock.expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(combined(
                    r#"{"result":"correct","confidence":"high","error_type":null}"#,
                    "Different wording. What is glucose?",
                ))
            });

        let turn = agent(mock)
            .respond("it releases energy", revising(), None, "Biology", &[])
            .await;

        assert_eq!(turn.evaluation, Some(Evaluation::correct(Confidence::High)));
        assert_eq!(turn.action, ActionType::ExtendDifficulty);
        assert_eq!(turn.reply, "Great. What is ATP?");
    }

    #[tokio::test]
    async fn test_two_failures_fall_back_to_unknown_and_retry_message() {
        let mut mock = MockCompletionClient::new();
        mock.expect_complete()
            .times(2)
            .returning(|_, _| Err(anyhow!("timeout")));

        let turn = agent(mock)
            .respond("it releases energy", revising(), None, "Biology", &[])
            .await;

        assert_eq!(turn.evaluation, Some(Evaluation::unknown()));
        assert_eq!(turn.action, ActionType::AwaitResponse);
        assert_eq!(turn.updated_state.attempts, 0);
        assert!(turn.reply.starts_with(RETRY_FALLBACK));
        assert_eq!(
            turn.updated_state.current_question.as_deref(),
            Some("What does the mitochondrion do?")
        );
    }

    #[tokio::test]
    async fn test_diagnostic_mode_sanitises_teaching_reply() {
        let mut mock = MockCompletionClient::new();
        mock.expect_complete()
            .times(1)
            .withf(|directive, _| {
                directive.contains("# Placement directive") && !directive.contains("```EVALUATION")
            })
            .returning(|_, _| {
                Ok(combined(
                    r#"{"result":"unknown","confidence":"low","error_type":null}"#,
                    "Good job! Remember that cells have organelles. Which science topics have you finished?",
                ))
            });

        let state = initialize_session("s-1", "student-1", None, None);
        let turn = agent(mock).respond("hi", state, None, "Biology", &[]).await;

        assert_eq!(turn.mode, CombinedMode::Diagnostic);
        assert_eq!(turn.action, ActionType::DiagnosticQuestion);
        assert_eq!(turn.reply, "Thanks, noted. Which science topics have you finished?");
        assert_eq!(turn.updated_state.diagnostic_questions_asked(), 1);
        assert!(turn.evaluation.is_none());
    }

    #[tokio::test]
    async fn test_placement_answer_is_not_graded() {
        let mut mock = MockCompletionClient::new();
        mock.expect_complete()
            .times(1)
            .returning(|_, _| Ok("```TUTOR\nThanks, noted. How confident are you with cells?\n```".to_string()));

        let mut state = initialize_session("s-1", "student-1", None, None);
        state
            .apply_decision(
                crate::types::Decision::new(ActionType::DiagnosticQuestion, AgentPhase::CurriculumDiagnostic),
                &RevisionPolicy::default(),
            )
            .unwrap();
        state.set_current_question(Some("Which topics have you covered?".into()), None);
        let turn = agent(mock).respond("cells and enzymes", state, None, "Biology", &[]).await;

        assert_eq!(turn.mode, CombinedMode::Diagnostic);
        assert!(turn.evaluation.is_none());
        assert_eq!(turn.updated_state.diagnostic_questions_asked(), 2);
    }

    #[tokio::test]
    async fn test_small_talk_on_open_question_is_off_topic() {
        let mut mock = MockCompletionClient::new();
        mock.expect_complete()
            .times(1)
            .withf(|directive, _| directive.contains("AWAIT_RESPONSE"))
            .returning(|_, _| Ok("```TUTOR\nNo problem. What does the mitochondrion do?\n```".to_string()));

        let turn = agent(mock).respond("thanks", revising(), None, "Biology", &[]).await;

        assert_eq!(turn.mode, CombinedMode::Directed);
        assert_eq!(turn.evaluation, Some(Evaluation::off_topic()));
        assert_eq!(turn.action, ActionType::AwaitResponse);
        assert_eq!(turn.updated_state.attempts, 0);
        assert_eq!(
            turn.updated_state.expected_answer_hint.as_deref(),
            Some("releases energy")
        );
    }

    #[tokio::test]
    async fn test_completion_request_uses_directed_mode() {
        let mut mock = MockCompletionClient::new();
        mock.expect_complete()
            .times(1)
            .withf(|directive, _| directive.contains("RUN_COMPLETION_REVIEW"))
            .returning(|_, _| Ok("```TUTOR\nToday we covered cell biology. Well done.\n```".to_string()));

        let turn = agent(mock)
            .respond("I'm done", revising(), None, "Biology", &[])
            .await;

        assert_eq!(turn.mode, CombinedMode::Directed);
        assert_eq!(turn.action, ActionType::RunCompletionReview);
        assert_eq!(turn.updated_phase, AgentPhase::CompletionReview);
        assert!(!turn.updated_state.has_open_question());
    }

    #[tokio::test]
    async fn test_off_profile_techniques_are_reported() {
        let mut mock = MockCompletionClient::new();
        mock.expect_complete().times(1).returning(|_, _| {
            Ok(combined(
                r#"{"result":"partial","confidence":"medium","error_type":"exam_technique"}"#,
                "Picture a tiny power station inside the cell. Can you name the process it runs?",
            ))
        });

        let turn = agent(mock)
            .respond("energy stuff", revising(), None, "Biology", &[])
            .await;

        assert_eq!(turn.action, ActionType::RetryWithHint);
        assert_eq!(turn.evaluation.map(|e| e.error_type), Some(Some(ErrorType::ExamTechnique)));
        assert!(turn.off_list_techniques.contains(&Technique::Imagery));
    }

    #[tokio::test]
    async fn test_persona_prefixes_directive() {
        let mut mock = MockCompletionClient::new();
        mock.expect_complete()
            .times(1)
            .withf(|directive, context| {
                directive.starts_with("You are Sam, a calm tutor.")
                    && context.last() == Some(&ChatMessage::student("skip"))
                    && context.len() == 2
            })
            .returning(|_, _| Ok("```TUTOR\nNo problem. What is diffusion?\n```".to_string()));

        let history = [ChatMessage::tutor("What does the mitochondrion do?")];
        let turn = agent(mock)
            .with_persona("You are Sam, a calm tutor.")
            .respond("skip", revising(), None, "Biology", &history)
            .await;

        assert_eq!(turn.action, ActionType::InitialQuestion);
        assert_eq!(turn.updated_state.current_question.as_deref(), Some("What is diffusion?"));
        assert_eq!(turn.updated_state.expected_answer_hint, None);
    }
}
