use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Defines the supported backends for the completion client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
}

impl Provider {
    /// Base URL of the provider's OpenAI-compatible chat completions API.
    pub fn api_base(&self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com/v1/",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }
}

/// Pedagogical thresholds used by the decision engine and the combined agent.
#[derive(Clone, Debug, PartialEq)]
pub struct RevisionPolicy {
    /// Diagnostic questions asked before teaching may begin.
    pub min_diagnostic_questions: u32,
    /// Attempts after which any incorrect answer forces panic recovery.
    pub panic_attempt_threshold: u32,
    /// Attempts after which a guessed answer forces panic recovery.
    pub guessing_attempt_threshold: u32,
    /// Correct streak needed before mastery is confirmed.
    pub mastery_streak: u32,
    /// Hard word limit for a diagnostic-mode reply.
    pub diagnostic_word_budget: usize,
    /// Absolute tolerance for numeric answer matching.
    pub numeric_tolerance: f64,
}

impl Default for RevisionPolicy {
    fn default() -> Self {
        Self {
            min_diagnostic_questions: 3,
            panic_attempt_threshold: 3,
            guessing_attempt_threshold: 2,
            mastery_streak: 2,
            diagnostic_word_budget: 60,
            numeric_tolerance: 0.001,
        }
    }
}

impl RevisionPolicy {
    /// Loads the policy, overriding defaults with any `RSC_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            min_diagnostic_questions: env_or(
                "RSC_MIN_DIAGNOSTIC_QUESTIONS",
                defaults.min_diagnostic_questions,
            )?,
            panic_attempt_threshold: env_or("RSC_PANIC_ATTEMPTS", defaults.panic_attempt_threshold)?,
            guessing_attempt_threshold: env_or(
                "RSC_GUESSING_ATTEMPTS",
                defaults.guessing_attempt_threshold,
            )?,
            mastery_streak: env_or("RSC_MASTERY_STREAK", defaults.mastery_streak)?,
            diagnostic_word_budget: env_or(
                "RSC_DIAGNOSTIC_WORD_BUDGET",
                defaults.diagnostic_word_budget,
            )?,
            numeric_tolerance: env_or("RSC_NUMERIC_TOLERANCE", defaults.numeric_tolerance)?,
        })
    }
}

fn env_or<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub chat_model: String,
    pub log_level: Level,
    pub generation_timeout: Duration,
    pub prompts_path: PathBuf,
    pub policy: RevisionPolicy,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let provider_str = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "gemini" => Provider::Gemini,
            _ => Provider::OpenAI,
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();

        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let generation_timeout = Duration::from_secs(env_or("GENERATION_TIMEOUT_SECS", 30u64)?);

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        match provider {
            Provider::OpenAI => {
                if openai_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
                    ));
                }
            }
            Provider::Gemini => {
                if gemini_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "GEMINI_API_KEY must be set for 'gemini' provider".to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            provider,
            openai_api_key,
            gemini_api_key,
            chat_model,
            log_level,
            generation_timeout,
            prompts_path,
            policy: RevisionPolicy::from_env()?,
        })
    }

    /// API key for the selected provider.
    pub fn api_key(&self) -> Option<&str> {
        match self.provider {
            Provider::OpenAI => self.openai_api_key.as_deref(),
            Provider::Gemini => self.gemini_api_key.as_deref(),
        }
    }
}
