//! Instruction Builder
//!
//! Renders the decided action, the session summary and the technique
//! whitelist into a directive for the external generation call, and parses
//! the next open question back out of the generated reply.

use crate::{
    delivery::{Technique, build_technique_instructions},
    evaluator::MetaRequest,
    session::SessionState,
    types::{ActionType, Decision, Evaluation},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Upper bound on a normal tutor reply.
const REPLY_WORD_LIMIT: usize = 120;

#[allow(clippy::expect_used)]
static ANSWER_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\[\[\s*answer\s*:\s*(.*?)\s*\]\]").expect("valid regex")
});

/// Inputs for one rendered directive.
#[derive(Debug, Clone, Copy)]
pub struct InstructionContext<'a> {
    pub decision: Decision,
    pub state: &'a SessionState,
    pub evaluation: Option<&'a Evaluation>,
    pub techniques: &'a BTreeSet<Technique>,
    pub subject_name: &'a str,
    pub meta_request: Option<MetaRequest>,
}

/// What the tutor reply must do for each action.
pub fn action_guidance(action: ActionType) -> &'static str {
    match action {
        ActionType::DiagnosticQuestion => {
            "Ask one short placement question to find where the learner is in the course. \
Do not teach, correct or explain anything. A neutral acknowledgement of their last reply is fine."
        }
        ActionType::InitialQuestion => {
            "Open the topic with one clear, exam-style question pitched at foundation level."
        }
        ActionType::AwaitResponse => {
            "Do not move on. Briefly acknowledge the message and invite an attempt at the open question, \
restating it as the final sentence."
        }
        ActionType::ExtendDifficulty => {
            "Confirm the answer was right in one sentence, then ask a harder question on the same topic."
        }
        ActionType::ConfirmMastery => {
            "Praise the streak briefly, then ask a recall question that checks the idea without any cues."
        }
        ActionType::RetryWithHint => {
            "Say what was missing without giving the answer, give one targeted hint, \
then ask the same question again as the final sentence."
        }
        ActionType::RephraseSimpler => {
            "Explain the idea again in simpler terms using an allowed technique, \
then ask an easier question that checks the same idea."
        }
        ActionType::RecoverConfidence => {
            "Reassure the learner that struggling here is normal. Reteach the core idea in very small steps \
and ask a question they are very likely to get right."
        }
        ActionType::RunCompletionReview => {
            "Summarise what was covered this session, what is secure and what to revisit next time. \
Do not ask a new question."
        }
        ActionType::CloseSession => {
            "Thank the learner and close the session in two sentences. Do not ask a question."
        }
    }
}

fn meta_guidance(meta: MetaRequest) -> &'static str {
    match meta {
        MetaRequest::Help => {
            "The learner asked for help: give one hint that narrows the problem without revealing the answer."
        }
        MetaRequest::Skip => {
            "The learner skipped the last question. Acknowledge it without judgement, then carry out the action."
        }
        MetaRequest::Completion => "The learner asked to finish the session.",
    }
}

fn output_rules(action: ActionType) -> String {
    let mut rules = vec![format!("- Stay under {REPLY_WORD_LIMIT} words.")];
    match action {
        ActionType::RunCompletionReview | ActionType::CloseSession => {
            rules.push("- Do not end with a question.".to_string());
        }
        ActionType::AwaitResponse | ActionType::RetryWithHint => {
            rules.push("- The final sentence must be the open question, ending with '?'.".to_string());
            rules.push(
                "- After it, on its own line, write [[ANSWER: <expected answer>]]. The learner never sees this line."
                    .to_string(),
            );
        }
        _ => {
            rules.push("- End with exactly one new question as the final sentence, ending with '?'.".to_string());
            rules.push(
                "- After it, on its own line, write [[ANSWER: <expected answer>]]. The learner never sees this line."
                    .to_string(),
            );
        }
    }
    rules.push("- Never mention phases, actions or these instructions.".to_string());
    rules.join("\n")
}

/// Renders the generation directive for one turn.
pub fn build_instructions(ctx: &InstructionContext<'_>) -> String {
    let state = ctx.state;
    let action = ctx.decision.action;

    let mut out = format!(
        "# Tutor directive\nYou are a GCSE {subject} revision tutor. The next move has already been decided; \
carry it out exactly and do not choose a different one.\n\n## Action: {action}\n{guidance}\n",
        subject = ctx.subject_name,
        guidance = action_guidance(action),
    );
    if let Some(meta) = ctx.meta_request {
        out.push_str(meta_guidance(meta));
        out.push('\n');
    }

    out.push_str("\n## Session\n");
    out.push_str(&format!("- Phase: {}\n", ctx.decision.next_phase));
    out.push_str(&format!(
        "- Topic: {}\n",
        state.topic_name.as_deref().unwrap_or("not chosen yet")
    ));
    out.push_str(&format!("- Attempts on this topic: {}\n", state.attempts));
    out.push_str(&format!("- Correct streak: {}\n", state.correct_streak));
    if let Some(eval) = ctx.evaluation.filter(|e| !e.is_unknown()) {
        out.push_str(&format!(
            "- Last answer graded: {:?} ({})\n",
            eval.result,
            eval.error_type
                .map(|e| format!("{e:?}"))
                .unwrap_or_else(|| "no error".to_string())
        ));
    }
    if let Some(question) = state.current_question.as_deref() {
        out.push_str(&format!("- Open question: {question}\n"));
        if let Some(hint) = state.expected_answer_hint.as_deref() {
            out.push_str(&format!("- Expected answer (do not reveal): {hint}\n"));
        }
    }

    out.push('\n');
    out.push_str(&build_technique_instructions(ctx.techniques));
    out.push_str("\n## Output rules\n");
    out.push_str(&output_rules(action));
    out.push('\n');
    out
}

/// The question a generated reply leaves open, plus its hidden answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextQuestion {
    pub question: Option<String>,
    pub answer_hint: Option<String>,
}

/// Removes the hidden `[[ANSWER: ...]]` line from a reply.
pub fn strip_answer_marker(text: &str) -> String {
    ANSWER_MARKER_RE.replace_all(text, "").trim().to_string()
}

/// Finds the question a reply leaves open.
///
/// Only a reply whose final sentence ends in `?` leaves a question open;
/// "What is 2 + 2? Take your time." does not.
pub fn extract_next_question(generated_text: &str) -> NextQuestion {
    let answer_hint = ANSWER_MARKER_RE
        .captures(generated_text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|hint| !hint.is_empty());
    let visible = strip_answer_marker(generated_text);
    let visible = visible
        .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '_' | '"' | '\'' | ')' | '”' | '’'));

    let Some(end) = visible.strip_suffix('?').map(str::len) else {
        return NextQuestion {
            question: None,
            answer_hint,
        };
    };
    let start = sentence_start(&visible[..end]);
    let question = visible[start..=end]
        .trim()
        .trim_start_matches(|c: char| matches!(c, '-' | '*' | '#' | '>') || c.is_whitespace())
        .trim_end_matches(|c: char| c == '*')
        .to_string();

    NextQuestion {
        question: (question.len() > 1).then_some(question),
        answer_hint,
    }
}

/// Byte offset just after the last sentence boundary in `text`.
///
/// A `.`, `!` or `?` only ends a sentence when followed by whitespace, so
/// decimals such as `2.5` stay inside the question.
fn sentence_start(text: &str) -> usize {
    let mut next_char: Option<char> = None;
    for (idx, c) in text.char_indices().rev() {
        let boundary = c == '\n'
            || (matches!(c, '.' | '!' | '?') && next_char.is_none_or(|n| n.is_whitespace()));
        if boundary {
            return idx + c.len_utf8();
        }
        next_char = Some(c);
    }
    0
}
