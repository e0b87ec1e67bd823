//! Terminal front end for the revision tutor.
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Building the completion client and the persona prompt.
//! 3. Restoring or starting a session.
//! 4. Running a line-based conversation until the session closes.

use anyhow::{Context, Result};
use async_openai::config::OpenAIConfig;
use clap::Parser;
use revision_core::{
    ActionType, AgentPhase, CombinedAgent, RevisionController, SessionState, absorb_generated_reply,
    config::Config,
    delivery::ModalityProfile,
    initialize_session,
    llm_client::{ChatMessage, CompletionClient, OpenAICompatibleClient},
};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

/// Conversation lines kept as context for each completion call.
const HISTORY_LIMIT: usize = 12;

#[derive(Parser)]
#[command(name = "tutor")]
#[command(about = "GCSE revision tutor in the terminal", version)]
struct Args {
    /// Subject being revised, e.g. "Maths" or "Biology"
    #[arg(long, default_value = "Maths")]
    subject: String,

    /// Topic to start on
    #[arg(long)]
    topic: Option<String>,

    /// Identifier for the starting topic (defaults to the topic name)
    #[arg(long)]
    topic_id: Option<String>,

    /// Student identifier stored in the session
    #[arg(long, default_value = "student")]
    student: String,

    /// JSON file the session is restored from and saved to after each turn
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Use one completion per turn for grading and reply
    #[arg(long)]
    combined: bool,

    /// Preferred learning styles, comma separated (visual, auditory, read_write, kinesthetic)
    #[arg(long, value_delimiter = ',')]
    styles: Vec<String>,

    /// Skip the placement questions; the learner's position is already known
    #[arg(long)]
    position_known: bool,
}

/// A helper function to load prompts from a directory.
fn load_prompts(prompts_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in fs::read_dir(prompts_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

fn load_or_start_session(args: &Args) -> Result<SessionState> {
    if let Some(path) = args.state_file.as_deref().filter(|p| p.exists()) {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read session from {}", path.display()))?;
        let state: SessionState = serde_json::from_str(&raw).context("Session file is not a valid session")?;
        info!(session_id = %state.session_id, phase = %state.phase(), "Session restored");
        return Ok(state);
    }

    let topic_id = args.topic_id.clone().or_else(|| args.topic.clone());
    let mut state = initialize_session(
        uuid::Uuid::new_v4().to_string(),
        args.student.clone(),
        topic_id,
        args.topic.clone(),
    );
    if args.position_known {
        state.confirm_curriculum_position();
    }
    info!(session_id = %state.session_id, "New session started");
    Ok(state)
}

fn save_session(path: Option<&Path>, state: &SessionState) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let json = serde_json::to_string_pretty(state)?;
    fs::write(path, json).with_context(|| format!("Failed to save session to {}", path.display()))
}

/// Runs one turn and returns the text to show plus the new state.
async fn run_turn(
    tutor: &Tutor,
    message: &str,
    state: SessionState,
    history: &[ChatMessage],
) -> (String, SessionState, bool) {
    match tutor {
        Tutor::TwoCall {
            controller,
            client,
            persona,
            subject,
            profile,
        } => {
            let outcome = controller
                .process_turn(message, state, profile.as_ref(), subject)
                .await;
            let directive = format!("{persona}\n\n{}", outcome.instructions);
            let mut context = history.to_vec();
            if !message.trim().is_empty() {
                context.push(ChatMessage::student(message));
            }
            let generated = match client.complete(directive, context).await {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, "Reply generation failed");
                    "Sorry, something went wrong on my side. Could you say that again?".to_string()
                }
            };
            let mut state = outcome.updated_state;
            let shown = absorb_generated_reply(&mut state, &generated);
            (shown, state, outcome.advance_topic)
        }
        Tutor::Combined {
            agent,
            subject,
            profile,
        } => {
            let turn = agent
                .respond(message, state, profile.as_ref(), subject, history)
                .await;
            (turn.reply, turn.updated_state, turn.advance_topic)
        }
    }
}

enum Tutor {
    TwoCall {
        controller: RevisionController,
        client: Arc<dyn CompletionClient>,
        persona: String,
        subject: String,
        profile: Option<ModalityProfile>,
    },
    Combined {
        agent: CombinedAgent,
        subject: String,
        profile: Option<ModalityProfile>,
    },
}

/// Handles `/` commands. Returns `false` when the loop should stop.
fn handle_command(command: &str, state: &mut SessionState) -> bool {
    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    match name {
        "/quit" | "/exit" => return false,
        "/topic" if !rest.trim().is_empty() => {
            let topic = rest.trim();
            state.change_topic(topic.to_lowercase().replace(' ', "-"), topic);
            println!("(switched topic to {topic})");
        }
        "/secure" => {
            state.topics_secure = true;
            println!("(all topics marked secure)");
        }
        "/state" => match serde_json::to_string_pretty(state) {
            Ok(json) => println!("{json}"),
            Err(e) => warn!(error = %e, "Could not render session"),
        },
        _ => println!("(commands: /topic <name>, /secure, /state, /quit)"),
    }
    true
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!("Configuration loaded. Initializing tutor...");

    // --- 3. Initialize Shared Services ---
    let prompts = load_prompts(&config.prompts_path).context("Failed to load prompts")?;
    let persona = prompts
        .get("tutor_persona")
        .context("tutor_persona.md not found in prompts directory")?
        .clone();

    let api_key = config
        .api_key()
        .context("No API key configured for the selected provider")?;
    let openai_config = OpenAIConfig::new()
        .with_api_key(api_key)
        .with_api_base(config.provider.api_base());
    let client: Arc<dyn CompletionClient> = Arc::new(OpenAICompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
        config.generation_timeout,
    ));

    let profile = (!args.styles.is_empty()).then(|| ModalityProfile {
        primary_styles: args.styles.clone(),
        is_multimodal: args.styles.len() > 1,
        ..Default::default()
    });

    let tutor = if args.combined {
        Tutor::Combined {
            agent: CombinedAgent::new(client, config.policy.clone()).with_persona(persona),
            subject: args.subject.clone(),
            profile,
        }
    } else {
        Tutor::TwoCall {
            controller: RevisionController::new(client.clone(), config.policy.clone()),
            client,
            persona,
            subject: args.subject.clone(),
            profile,
        }
    };

    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        combined = args.combined,
        "Tutor configured. Starting session..."
    );

    // --- 4. Run the Conversation ---
    let mut state = load_or_start_session(&args)?;
    let mut history: Vec<ChatMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut message = String::new();

    loop {
        let (reply, next_state, advance_topic) = run_turn(&tutor, &message, state, &history).await;
        state = next_state;
        println!("\ntutor> {reply}\n");

        if !message.trim().is_empty() {
            history.push(ChatMessage::student(message.clone()));
        }
        history.push(ChatMessage::tutor(reply));
        if history.len() > HISTORY_LIMIT {
            history.drain(..history.len() - HISTORY_LIMIT);
        }

        save_session(args.state_file.as_deref(), &state)?;

        if advance_topic {
            println!("(this topic looks secure: use /topic <name> to move on, or /secure to finish)");
        }
        if state.phase() == AgentPhase::SessionClose
            || state.last_action() == Some(ActionType::CloseSession)
        {
            info!("Session closed");
            break;
        }

        message = loop {
            let Some(line) = lines.next_line().await? else {
                info!("Input closed");
                return Ok(());
            };
            let line = line.trim().to_string();
            if !line.starts_with('/') {
                break line;
            }
            if !handle_command(&line, &mut state) {
                save_session(args.state_file.as_deref(), &state)?;
                return Ok(());
            }
        };
    }

    Ok(())
}
