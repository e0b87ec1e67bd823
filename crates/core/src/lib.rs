//! Revision session control for an AI-driven GCSE revision tutor.
//!
//! Every pedagogical decision is made deterministically here. Generative
//! completions are used only to grade answers and to phrase replies, and
//! nothing they return can move the session between phases.

pub mod combined;
pub mod config;
pub mod controller;
pub mod decision;
pub mod delivery;
pub mod error;
pub mod evaluator;
pub mod instructions;
pub mod llm_client;
pub mod normaliser;
pub mod session;
pub mod types;

pub use combined::{CombinedAgent, CombinedTurn};
pub use config::{Config, RevisionPolicy};
pub use controller::{RevisionController, TurnOutcome, absorb_generated_reply};
pub use decision::{determine_next_action, is_action_allowed_in_phase};
pub use instructions::{extract_next_question, strip_answer_marker};
pub use session::{SessionState, initialize_session};
pub use types::{ActionType, AgentPhase, Decision, Evaluation};
