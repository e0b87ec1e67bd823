//! Delivery Technique Mapper
//!
//! Turns a learner's modality profile into a whitelist of explanation
//! techniques the tutor reply may use, and audits replies after the fact.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

/// Learner preference weights, as supplied by the profiling collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModalityProfile {
    pub visual: f64,
    pub auditory: f64,
    pub read_write: f64,
    pub kinesthetic: f64,
    pub primary_styles: Vec<String>,
    pub is_multimodal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Visual,
    Auditory,
    ReadWrite,
    Kinesthetic,
}

impl Modality {
    /// Parses the loose labels found in profiles ("Read/Write", "kinaesthetic", ...).
    pub fn from_label(label: &str) -> Option<Self> {
        let key: String = label
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect();
        match key.as_str() {
            "visual" | "v" => Some(Modality::Visual),
            "auditory" | "aural" | "a" => Some(Modality::Auditory),
            "readwrite" | "reading" | "readingwriting" | "r" => Some(Modality::ReadWrite),
            "kinesthetic" | "kinaesthetic" | "k" => Some(Modality::Kinesthetic),
            _ => None,
        }
    }

    pub fn techniques(&self) -> &'static [Technique] {
        match self {
            Modality::Visual => &[
                Technique::Imagery,
                Technique::Diagram,
                Technique::ColourCoding,
                Technique::Flowchart,
            ],
            Modality::Auditory => &[
                Technique::VerbalExplanation,
                Technique::Mnemonic,
                Technique::Rhyme,
                Technique::Discussion,
            ],
            Modality::ReadWrite => &[
                Technique::Definition,
                Technique::Flashcard,
                Technique::BulletSummary,
                Technique::StepSequence,
            ],
            Modality::Kinesthetic => &[
                Technique::WorkedExample,
                Technique::RealWorldExample,
                Technique::PracticalTask,
                Technique::StepSequence,
            ],
        }
    }
}

/// A whitelisted explanation style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    Imagery,
    Diagram,
    ColourCoding,
    Flowchart,
    VerbalExplanation,
    Mnemonic,
    Rhyme,
    Discussion,
    Definition,
    Flashcard,
    BulletSummary,
    StepSequence,
    WorkedExample,
    RealWorldExample,
    PracticalTask,
}

impl Technique {
    pub const ALL: [Technique; 15] = [
        Technique::Imagery,
        Technique::Diagram,
        Technique::ColourCoding,
        Technique::Flowchart,
        Technique::VerbalExplanation,
        Technique::Mnemonic,
        Technique::Rhyme,
        Technique::Discussion,
        Technique::Definition,
        Technique::Flashcard,
        Technique::BulletSummary,
        Technique::StepSequence,
        Technique::WorkedExample,
        Technique::RealWorldExample,
        Technique::PracticalTask,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Technique::Imagery => "imagery",
            Technique::Diagram => "diagram",
            Technique::ColourCoding => "colour_coding",
            Technique::Flowchart => "flowchart",
            Technique::VerbalExplanation => "verbal_explanation",
            Technique::Mnemonic => "mnemonic",
            Technique::Rhyme => "rhyme",
            Technique::Discussion => "discussion",
            Technique::Definition => "definition",
            Technique::Flashcard => "flashcard",
            Technique::BulletSummary => "bullet_summary",
            Technique::StepSequence => "step_sequence",
            Technique::WorkedExample => "worked_example",
            Technique::RealWorldExample => "real_world_example",
            Technique::PracticalTask => "practical_task",
        }
    }

    /// How the technique should be used when it is allowed.
    pub fn guidance(&self) -> &'static str {
        match self {
            Technique::Imagery => "ask the learner to picture a vivid scene that carries the idea",
            Technique::Diagram => "describe a simple labelled diagram in words",
            Technique::ColourCoding => "suggest colours to separate the parts being compared",
            Technique::Flowchart => "lay the process out as boxes joined by arrows",
            Technique::VerbalExplanation => "explain conversationally, as if speaking aloud",
            Technique::Mnemonic => "offer a short memory hook or acronym",
            Technique::Rhyme => "use a short rhyme or rhythm to fix a fact",
            Technique::Discussion => "ask the learner to explain it back in their own words",
            Technique::Definition => "state the precise definition in one sentence",
            Technique::Flashcard => "present a one-line question and answer pair",
            Technique::BulletSummary => "summarise the key points as a short bullet list",
            Technique::StepSequence => "break the method into numbered steps",
            Technique::WorkedExample => "walk through one concrete worked example",
            Technique::RealWorldExample => "tie the idea to an everyday situation",
            Technique::PracticalTask => "give a small hands-on task the learner can do now",
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Used when no profile is known or none of its labels are recognised.
pub const BASELINE_TECHNIQUES: [Technique; 3] = [
    Technique::Definition,
    Technique::Flashcard,
    Technique::StepSequence,
];

/// Union of the techniques for every primary modality in the profile.
pub fn get_allowed_techniques(profile: Option<&ModalityProfile>) -> BTreeSet<Technique> {
    let allowed: BTreeSet<Technique> = profile
        .map(|p| {
            p.primary_styles
                .iter()
                .filter_map(|label| Modality::from_label(label))
                .flat_map(|m| m.techniques().iter().copied())
                .collect()
        })
        .unwrap_or_default();

    if allowed.is_empty() {
        BASELINE_TECHNIQUES.into_iter().collect()
    } else {
        allowed
    }
}

/// Renders the allow/forbid list for a generation directive.
pub fn build_technique_instructions(techniques: &BTreeSet<Technique>) -> String {
    let mut out = String::from("## Delivery techniques\nALLOWED (use only these):\n");
    for technique in techniques {
        out.push_str(&format!("- {}: {}\n", technique, technique.guidance()));
    }
    let forbidden: Vec<&str> = Technique::ALL
        .iter()
        .filter(|t| !techniques.contains(*t))
        .map(|t| t.as_str())
        .collect();
    if !forbidden.is_empty() {
        out.push_str("FORBIDDEN (never use):\n");
        for name in forbidden {
            out.push_str(&format!("- {}\n", name));
        }
    }
    out
}

#[allow(clippy::expect_used)]
static TECHNIQUE_CUES: LazyLock<Vec<(Technique, Regex)>> = LazyLock::new(|| {
    [
        (Technique::Imagery, r"\b(?:imagine|picture (?:this|a|the)|visuali[sz]e)\b"),
        (Technique::Diagram, r"\b(?:diagram|sketch|label(?:led|ed)?)\b"),
        (Technique::ColourCoding, r"\b(?:colou?r[- ]cod\w*|highlight (?:in|with)|in (?:red|blue|green|yellow))\b"),
        (Technique::Flowchart, r"\bflow ?chart\b|->|→"),
        (Technique::Mnemonic, r"\b(?:mnemonic|acronym|remember it as|stands for)\b"),
        (Technique::Rhyme, r"\b(?:rhyme|rhymes|sing it)\b"),
        (Technique::Discussion, r"\b(?:in your own words|explain (?:it )?back to me|what do you think)\b"),
        (Technique::Definition, r"\b(?:is defined as|definition|means that|refers to)\b"),
        (Technique::Flashcard, r"(?m)^\s*(?:q:|front:)|\bflashcard\b"),
        (Technique::BulletSummary, r"(?m)^\s*[-*•]\s+\S"),
        (Technique::StepSequence, r"(?m)^\s*(?:step\s*\d|\d+[.)]\s)|\bfirst,.*\bthen\b"),
        (Technique::WorkedExample, r"\b(?:worked example|let's work through|for example, if)\b"),
        (Technique::RealWorldExample, r"\b(?:in real life|everyday|like when you|think about when)\b"),
        (Technique::PracticalTask, r"\b(?:try this|grab a|have a go at|use your hands|on paper)\b"),
        (Technique::VerbalExplanation, r"\b(?:say it out loud|read it aloud|listen)\b"),
    ]
    .into_iter()
    .map(|(t, p)| (t, Regex::new(&format!("(?i){p}")).expect("valid regex")))
    .collect()
});

/// Best-effort lexical guess at which techniques a reply used.
pub fn detect_used_techniques(response_text: &str) -> BTreeSet<Technique> {
    TECHNIQUE_CUES
        .iter()
        .filter(|(_, re)| re.is_match(response_text))
        .map(|(t, _)| *t)
        .collect()
}

/// Techniques detected in a reply that were not on the whitelist.
pub fn audit_techniques(allowed: &BTreeSet<Technique>, response_text: &str) -> BTreeSet<Technique> {
    detect_used_techniques(response_text)
        .difference(allowed)
        .copied()
        .collect()
}
