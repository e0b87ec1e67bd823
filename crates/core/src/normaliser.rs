//! Answer Normaliser
//!
//! Canonicalises free-text answers into order-independent sets so that
//! `"x = 2 or x = 3"`, `"x=3 and x=2"` and `"I think it's 2, 3"` compare equal.

use crate::types::EvalResult;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Hedges and lead-ins a student wraps around an answer.
#[allow(clippy::expect_used)]
static FILLER_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?:i think|i believe|i guess|i reckon|i got|my answer is|the answers? (?:is|are)|answers?|maybe|perhaps|um+|erm+|uh+|well|so|it's|it is|its|that's|that is|is it)\b[\s,:]*)+",
    )
    .expect("valid regex")
});

/// Trailing checks like "right?" or "I think".
#[allow(clippy::expect_used)]
static FILLER_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:[\s,]*(?:\bright\s*\?|\bcorrect\s*\?|\bis that right|\bam i right|\bi think|\bmaybe|[?.!]))+$",
    )
    .expect("valid regex")
});

/// Separators between the values of a multi-valued answer.
#[allow(clippy::expect_used)]
static SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*(?:[,;&]|\band\b|\bor\b|\bwith\b)\s*").expect("valid regex")
});

/// A leading `variable =` assignment.
#[allow(clippy::expect_used)]
static ASSIGNMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*\s*=\s*").expect("valid regex"));

#[allow(clippy::expect_used)]
static FRACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(-?\d+(?:\.\d+)?)\s*/\s*(-?\d+(?:\.\d+)?)$").expect("valid regex")
});

#[allow(clippy::expect_used)]
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

#[allow(clippy::expect_used)]
static MATH_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // variable assignment: x = 3, y=-2
        r"\b[a-z]\s*=\s*[-+(]?\s*[\d(a-z]",
        // arithmetic between operands
        r"[\d)]\s*[-+*×÷]\s*[\d(a-z]|\b[a-z]\s*[-+*×÷]\s*[\d(]",
        // literal fraction
        r"\d+\s*/\s*\d+",
        // roots
        r"sqrt|√|\broots?\b",
        // exponents
        r"\^|\*\*|[²³]",
        // coefficient next to a variable: 3x, 2y
        r"\b\d+[a-z]\b",
        // plus-or-minus
        r"±|\+/-",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Separator words that can never be a value on their own.
const SEPARATOR_WORDS: [&str; 3] = ["and", "or", "with"];

/// Canonicalises an answer into a deduplicated set of comparable tokens.
pub fn normalise_to_set(answer: &str) -> BTreeSet<String> {
    let lowered = answer.to_lowercase().replace(['’', '‘'], "'");
    let stripped = strip_fillers(lowered.trim());

    let mut values = BTreeSet::new();
    for raw in SEPARATOR_RE.split(&stripped) {
        for value in expand_plus_minus(&clean_token(raw)) {
            if !value.is_empty() && !SEPARATOR_WORDS.contains(&value.as_str()) {
                values.insert(value);
            }
        }
    }
    values
}

fn strip_fillers(text: &str) -> String {
    let without_prefix = FILLER_PREFIX_RE.replace(text, "");
    FILLER_SUFFIX_RE
        .replace(without_prefix.trim(), "")
        .trim()
        .to_string()
}

/// Cleans one token until nothing more changes, so normalised output is a
/// fixed point of normalisation.
fn clean_token(raw: &str) -> String {
    let mut token = raw.trim().to_string();
    for _ in 0..8 {
        let next = clean_once(&token);
        if next == token {
            break;
        }
        token = next;
    }
    token
}

fn clean_once(token: &str) -> String {
    let unquoted = token
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`'))
        .trim();
    let unfilled = strip_fillers(unquoted);
    let unassigned = ASSIGNMENT_RE.replace(&unfilled, "");
    let collapsed = WHITESPACE_RE.replace_all(unassigned.trim(), " ").to_string();
    fraction_to_decimal(&collapsed).unwrap_or(collapsed)
}

fn fraction_to_decimal(token: &str) -> Option<String> {
    let caps = FRACTION_RE.captures(token)?;
    let numerator: f64 = caps[1].parse().ok()?;
    let denominator: f64 = caps[2].parse().ok()?;
    if denominator == 0.0 {
        return None;
    }
    Some(format_number(numerator / denominator))
}

/// Renders a float without a trailing `.0` for whole numbers.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn expand_plus_minus(token: &str) -> Vec<String> {
    let rest = token
        .strip_prefix('±')
        .or_else(|| token.strip_prefix("+/-"))
        .map(str::trim);
    match rest {
        Some(value) if !value.is_empty() => {
            let value = clean_token(value);
            vec![value.clone(), format!("-{}", value)]
        }
        _ => vec![token.to_string()],
    }
}

/// Compares two normalised sets.
///
/// Extra student values are never penalised: covering every expected value
/// is `Correct`, covering some is `Partial`.
pub fn validate_normalised_answer(
    student: &BTreeSet<String>,
    expected: &BTreeSet<String>,
) -> EvalResult {
    if student.is_empty() || expected.is_empty() {
        return EvalResult::Incorrect;
    }
    let matched = expected.intersection(student).count();
    classify_coverage(matched, expected.len())
}

/// Like [`validate_normalised_answer`] but numeric values match when they are
/// within `tolerance` of each other.
pub fn validate_with_tolerance(
    student: &BTreeSet<String>,
    expected: &BTreeSet<String>,
    tolerance: f64,
) -> EvalResult {
    if student.is_empty() || expected.is_empty() {
        return EvalResult::Incorrect;
    }
    let student_numbers: Vec<f64> = student.iter().filter_map(|s| parse_number(s)).collect();
    let matched = expected
        .iter()
        .filter(|value| {
            student.contains(*value)
                || parse_number(value).is_some_and(|target| {
                    student_numbers
                        .iter()
                        .any(|candidate| (candidate - target).abs() <= tolerance)
                })
        })
        .count();
    classify_coverage(matched, expected.len())
}

/// Normalises both sides and compares them with a numeric tolerance.
pub fn check_answer(student: &str, expected: &str, tolerance: f64) -> EvalResult {
    validate_with_tolerance(
        &normalise_to_set(student),
        &normalise_to_set(expected),
        tolerance,
    )
}

fn classify_coverage(matched: usize, expected: usize) -> EvalResult {
    if matched == expected {
        EvalResult::Correct
    } else if matched > 0 {
        EvalResult::Partial
    } else {
        EvalResult::Incorrect
    }
}

fn parse_number(token: &str) -> Option<f64> {
    token
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Heuristic: does the text look like a mathematical answer?
pub fn contains_math_expression(text: &str) -> bool {
    let lowered = text.to_lowercase();
    MATH_PATTERNS.iter().any(|re| re.is_match(&lowered))
}

/// True when every value of the normalised answer is a number.
pub fn is_numeric_answer(answer: &str) -> bool {
    let values = normalise_to_set(answer);
    !values.is_empty() && values.iter().all(|v| parse_number(v).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_multi_root_phrasings_normalise_equally() {
        let expected = set(&["2", "3"]);
        for answer in [
            "x = 2 or x = 3",
            "x=3 and x=2",
            "I think it's 2, 3",
            "3; 2",
            "x = 2 & x = 3",
            "the answers are 3 and 2 right?",
            "'2', \"3\"",
            "4/2 or 6/2",
        ] {
            assert_eq!(normalise_to_set(answer), expected, "{answer}");
        }
    }

    #[test]
    fn test_fraction_becomes_decimal() {
        assert_eq!(normalise_to_set("x = 1/2"), set(&["0.5"]));
        assert_eq!(normalise_to_set("-3/4"), set(&["-0.75"]));
        assert_eq!(normalise_to_set("1/0"), set(&["1/0"]));
    }

    #[test]
    fn test_whitespace_and_case() {
        assert_eq!(
            normalise_to_set("  Chlorophyll   A  "),
            set(&["chlorophyll a"])
        );
    }

    #[test]
    fn test_plus_minus_expands() {
        assert_eq!(normalise_to_set("x = ±4"), set(&["4", "-4"]));
    }

    #[test]
    fn test_empty_tokens_are_dropped() {
        assert!(normalise_to_set("").is_empty());
        assert!(normalise_to_set(" , ; and ").is_empty());
        assert_eq!(normalise_to_set("2,,3,"), set(&["2", "3"]));
    }

    #[test]
    fn test_normalisation_is_idempotent() {
        for answer in [
            "x = 2 or x = 3",
            "I think it's 1/3",
            "so the answer is 'osmosis' right?",
            "x = ±4 with y = 7",
            "mitochondria and the nucleus",
            "  Well, um, 12.5 ",
        ] {
            let once = normalise_to_set(answer);
            let joined = once.iter().cloned().collect::<Vec<_>>().join(", ");
            assert_eq!(normalise_to_set(&joined), once, "{answer}");
        }
    }

    #[test]
    fn test_validate_sets() {
        let expected = set(&["2", "3"]);
        assert_eq!(
            validate_normalised_answer(&set(&["3", "2"]), &expected),
            EvalResult::Correct
        );
        assert_eq!(
            validate_normalised_answer(&set(&["2", "3", "4"]), &expected),
            EvalResult::Correct
        );
        assert_eq!(
            validate_normalised_answer(&set(&["2"]), &expected),
            EvalResult::Partial
        );
        assert_eq!(
            validate_normalised_answer(&set(&["5"]), &expected),
            EvalResult::Incorrect
        );
        assert_eq!(
            validate_normalised_answer(&BTreeSet::new(), &expected),
            EvalResult::Incorrect
        );
        assert_eq!(
            validate_normalised_answer(&set(&["2"]), &BTreeSet::new()),
            EvalResult::Incorrect
        );
    }

    #[test]
    fn test_partial_then_complete() {
        let expected = normalise_to_set("x = 2, x = 3");
        assert_eq!(
            validate_normalised_answer(&normalise_to_set("x = 2"), &expected),
            EvalResult::Partial
        );
        assert_eq!(
            validate_normalised_answer(&normalise_to_set("x = 2 and x = 3"), &expected),
            EvalResult::Correct
        );
    }

    #[test]
    fn test_tolerance_matching() {
        let expected = set(&["0.333", "2"]);
        assert_eq!(
            validate_with_tolerance(&normalise_to_set("1/3 and 2"), &expected, 0.001),
            EvalResult::Correct
        );
        assert_eq!(
            validate_with_tolerance(&normalise_to_set("0.34, 2"), &expected, 0.001),
            EvalResult::Partial
        );
        assert_eq!(check_answer("x = 3.1416", "3.14159", 0.001), EvalResult::Correct);
        assert_eq!(check_answer("photosynthesis", "photosynthesis", 0.001), EvalResult::Correct);
        assert_eq!(check_answer("3.2", "3.14159", 0.001), EvalResult::Incorrect);
    }

    #[test]
    fn test_contains_math_expression() {
        assert!(contains_math_expression("x = 4"));
        assert!(contains_math_expression("3 + 5"));
        assert!(contains_math_expression("3/4"));
        assert!(contains_math_expression("sqrt(16)"));
        assert!(contains_math_expression("x^2"));
        assert!(contains_math_expression("2x"));
        assert!(!contains_math_expression("photosynthesis happens in leaves"));
        assert!(!contains_math_expression("the mitochondria"));
    }

    #[test]
    fn test_is_numeric_answer() {
        assert!(is_numeric_answer("2, 3"));
        assert!(is_numeric_answer("x = 1/2"));
        assert!(!is_numeric_answer("osmosis"));
        assert!(!is_numeric_answer(""));
    }
}
