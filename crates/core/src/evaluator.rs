//! Evaluator
//!
//! Classifies a student answer against the open question. Meta messages and
//! missing context short-circuit without a completion call; set-comparable
//! maths answers are graded locally; everything else goes through one
//! constrained completion whose only permitted output is the evaluation JSON.

use crate::{
    error::GenerationError,
    llm_client::{ChatMessage, CompletionClient},
    normaliser::{check_answer, contains_math_expression, is_numeric_answer},
    types::{Confidence, ErrorType, EvalResult, Evaluation},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, instrument, warn};

/// Longest message (in words) still treated as a help, skip or completion request.
const META_REQUEST_MAX_WORDS: usize = 8;

#[allow(clippy::expect_used)]
static SMALL_TALK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:",
        r"(?:hi|hello|hey|hiya|yo|good (?:morning|afternoon|evening))(?: there)?",
        r"|(?:thanks|thank you|thx|ty|cheers|ta)(?: (?:so much|a lot|very much))?",
        r"|ok|okay|k|kk|cool|alright|got it|nice|great",
        r"|idk|i don't know|i dont know|dunno|no idea|not sure|i'm not sure|im not sure|no clue",
        r")$"
    ))
    .expect("valid regex")
});

// Request patterns match the whole cleaned message, or for skip and
// completion its opening words.
#[allow(clippy::expect_used)]
static HELP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:please |so |um |ok(?:ay)?,? )?(?:",
        r"(?:can|could|may) (?:i|you) (?:please )?(?:have|get|give me) (?:a |another |some |more )?(?:help|hint|clue)",
        r"|(?:i need|i want|i'd like|give me|need) (?:a |another |some |more )?(?:help|hint|clue)",
        r"|(?:a |another |some )?(?:help|hint|clue)",
        r"|help me",
        r"|(?:i'?m|i am) stuck|stuck",
        r"|(?:can you |could you |please )?explain (?:it|this|that)(?: again)?",
        r"|i don'?t (?:get|understand)(?: it| this| that)?",
        r")(?: please| again| pls)*$"
    ))
    .expect("valid regex")
});

#[allow(clippy::expect_used)]
static SKIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:please |ok(?:ay)?,? |um )?",
        r"(?:(?:can|could|shall) (?:we|i) (?:please )?|let'?s |i want to |i'd like to )?(?:",
        r"skip\b",
        r"|pass(?: on (?:this|that)(?: one)?)?(?: please)?$",
        r"|move on(?: please| now)*$",
        r"|(?:have |get |try |do )?(?:the )?next (?:one|question)(?: please)?$",
        r"|(?:have |get |try |do )?(?:another|a different) (?:one|question)(?: please)?$",
        r")"
    ))
    .expect("valid regex")
});

#[allow(clippy::expect_used)]
static COMPLETION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:ok(?:ay)?,? |right,? )?(?:",
        r"(?:i'?m|i am) (?:done|finished)\b",
        r"|that'?s (?:enough|all)(?: for (?:now|today))?$",
        r"|(?:can we |let'?s |i want to |i'd like to |please )?(?:finish|end|stop|wrap (?:it )?up)",
        r"(?: (?:the|this) session| here| now| for (?:now|today)| please)*$",
        r")"
    ))
    .expect("valid regex")
});

/// A request about the session itself rather than an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaRequest {
    Help,
    Skip,
    Completion,
}

fn clean_message(message: &str) -> String {
    message
        .to_lowercase()
        .replace(['’', '‘'], "'")
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '!' | '.' | '?' | ','))
        .to_string()
}

fn is_short(cleaned: &str) -> bool {
    cleaned.split_whitespace().count() <= META_REQUEST_MAX_WORDS
}

pub fn is_help_request(message: &str) -> bool {
    let cleaned = clean_message(message);
    is_short(&cleaned) && HELP_RE.is_match(&cleaned)
}

pub fn is_skip_request(message: &str) -> bool {
    let cleaned = clean_message(message);
    is_short(&cleaned) && SKIP_RE.is_match(&cleaned)
}

pub fn is_completion_request(message: &str) -> bool {
    let cleaned = clean_message(message);
    is_short(&cleaned) && COMPLETION_RE.is_match(&cleaned)
}

/// Completion wins over skip, and skip over help.
pub fn classify_meta_request(message: &str) -> Option<MetaRequest> {
    if is_completion_request(message) {
        Some(MetaRequest::Completion)
    } else if is_skip_request(message) {
        Some(MetaRequest::Skip)
    } else if is_help_request(message) {
        Some(MetaRequest::Help)
    } else {
        None
    }
}

/// Greetings, thanks, bare acknowledgements, "idk" and session requests.
pub fn is_meta_response(message: &str) -> bool {
    let cleaned = clean_message(message);
    cleaned.is_empty() || SMALL_TALK_RE.is_match(&cleaned) || classify_meta_request(message).is_some()
}

/// Everything the evaluator needs to grade one answer.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationRequest<'a> {
    pub student_answer: &'a str,
    pub current_question: Option<&'a str>,
    pub expected_answer_hint: Option<&'a str>,
    pub topic_name: Option<&'a str>,
}

/// Grades answers through an injected completion client.
pub struct Evaluator {
    client: Arc<dyn CompletionClient>,
    numeric_tolerance: f64,
}

impl Evaluator {
    pub fn new(client: Arc<dyn CompletionClient>, numeric_tolerance: f64) -> Self {
        Self {
            client,
            numeric_tolerance,
        }
    }

    /// Classifies an answer. Never fails: any problem yields `unknown`.
    #[instrument(name = "evaluate_answer", skip_all)]
    pub async fn evaluate_answer(&self, request: EvaluationRequest<'_>) -> Evaluation {
        let Some(question) = request.current_question.filter(|q| !q.trim().is_empty()) else {
            debug!("No open question; skipping evaluation");
            return Evaluation::unknown();
        };

        if is_meta_response(request.student_answer) {
            debug!("Meta response; not graded");
            return Evaluation::off_topic();
        }

        if let Some(evaluation) = grade_by_sets(
            request.student_answer,
            request.expected_answer_hint,
            self.numeric_tolerance,
        ) {
            info!(result = ?evaluation.result, "Graded locally by set equivalence");
            return evaluation;
        }

        let directive = build_evaluation_directive(question, &request);
        let context = vec![ChatMessage::student(request.student_answer)];
        for attempt in 1..=2 {
            let outcome = self
                .client
                .complete(directive.clone(), context.clone())
                .await
                .map_err(|e| GenerationError::Completion(e.to_string()))
                .and_then(|text| parse_evaluation(&text));
            match outcome {
                Ok(evaluation) => {
                    info!(result = ?evaluation.result, confidence = ?evaluation.confidence, "Answer evaluated");
                    return evaluation;
                }
                Err(e) => warn!(attempt, error = %e, "Evaluation output rejected"),
            }
        }
        warn!("Evaluation failed twice; falling back to unknown");
        Evaluation::unknown()
    }
}

/// Deterministic grading for numeric or algebraic expected answers.
///
/// Only complete or partial matches are decided here; a mismatch may still
/// be an equivalent form, so it is left to the completion call.
pub(crate) fn grade_by_sets(
    student_answer: &str,
    expected_answer_hint: Option<&str>,
    tolerance: f64,
) -> Option<Evaluation> {
    let expected = expected_answer_hint?.trim();
    if expected.is_empty() || !(contains_math_expression(expected) || is_numeric_answer(expected)) {
        return None;
    }
    match check_answer(student_answer, expected, tolerance) {
        EvalResult::Correct => Some(Evaluation::correct(Confidence::High)),
        EvalResult::Partial => Some(Evaluation::new(
            EvalResult::Partial,
            Confidence::High,
            Some(ErrorType::ExamTechnique),
        )),
        EvalResult::Incorrect | EvalResult::Unknown => None,
    }
}

pub(crate) fn evaluation_schema() -> String {
    let schema = schemars::schema_for!(Evaluation);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

pub(crate) const GRADING_POLICY: &str = "\
- Missing key terms: partial.
- Incorrect definition: incorrect.
- Correct idea with a weak explanation: partial.
- If you are unsure between two grades, choose the lower one.
- Multi-root or multi-form algebraic answers are graded by set equivalence: order, \
phrasing and `x =` prefixes do not matter, and extra correct values are not penalised.
- error_type must be null when result is \"correct\"; for partial or incorrect pick the \
closest of recall_gap, concept_gap, confusion, exam_technique, guessing.";

fn build_evaluation_directive(question: &str, request: &EvaluationRequest<'_>) -> String {
    format!(
        "You grade GCSE revision answers. You do not teach and you do not chat.\n\n\
# Question\n{question}\n\n\
# Expected answer (hint)\n{hint}\n\n\
# Topic\n{topic}\n\n\
# Grading policy\n{GRADING_POLICY}\n\n\
# Output\nReply with exactly one JSON object and nothing else. It must match this schema:\n\
```json\n{schema}\n```",
        hint = request.expected_answer_hint.unwrap_or("(none provided)"),
        topic = request.topic_name.unwrap_or("(unspecified)"),
        schema = evaluation_schema(),
    )
}

/// Returns the outermost `{...}` span of a completion.
pub(crate) fn extract_json_object(text: &str) -> Result<&str, GenerationError> {
    let start = text.find('{').ok_or(GenerationError::MissingJson)?;
    let end = text.rfind('}').ok_or(GenerationError::MissingJson)?;
    if end < start {
        return Err(GenerationError::MissingJson);
    }
    Ok(&text[start..=end])
}

/// Enforces the cross-field rules serde cannot express.
pub(crate) fn validate_evaluation(mut evaluation: Evaluation) -> Result<Evaluation, GenerationError> {
    if evaluation.error_type == Some(ErrorType::OffTopic) && !evaluation.is_unknown() {
        return Err(GenerationError::Inconsistent(
            "off_topic is only valid for an unknown result".to_string(),
        ));
    }
    if matches!(evaluation.result, EvalResult::Partial | EvalResult::Incorrect)
        && evaluation.error_type.is_none()
    {
        return Err(GenerationError::Inconsistent(format!(
            "{:?} result needs an error_type",
            evaluation.result
        )));
    }
    if evaluation.is_correct() && evaluation.error_type.is_some() {
        debug!("Dropping error_type from a correct evaluation");
        evaluation.error_type = None;
    }
    Ok(evaluation)
}

/// Decodes and validates an evaluation from raw completion text.
pub fn parse_evaluation(text: &str) -> Result<Evaluation, GenerationError> {
    let json = extract_json_object(text)?;
    let evaluation: Evaluation = serde_json::from_str(json)?;
    validate_evaluation(evaluation)
}
