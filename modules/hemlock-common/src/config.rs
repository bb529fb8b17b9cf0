use std::env;

use tracing::info;

/// Pipeline configuration loaded from environment variables.
///
/// No component reads the environment directly; each stage receives this
/// value at construction time.
#[derive(Debug, Clone)]
pub struct Config {
    // Generation service (OpenAI-compatible)
    pub api_key: String,
    pub api_base_url: String,
    pub model: String,
    pub temperature: f32,

    // Generation constraints
    pub max_poison_words: usize,
    pub max_cross_refs: usize,

    // Orchestration
    pub min_success_rate: f64,
    pub stage_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            api_key: required_env("HEMLOCK_API_KEY"),
            api_base_url: env::var("HEMLOCK_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model: env::var("HEMLOCK_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            temperature: env::var("HEMLOCK_TEMPERATURE")
                .unwrap_or_else(|_| "0.7".to_string())
                .parse()
                .expect("HEMLOCK_TEMPERATURE must be a number"),
            max_poison_words: env::var("MAX_POISON_WORDS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .expect("MAX_POISON_WORDS must be a number"),
            max_cross_refs: env::var("MAX_CROSS_REFS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .expect("MAX_CROSS_REFS must be a number"),
            min_success_rate: env::var("MIN_SUCCESS_RATE")
                .unwrap_or_else(|_| "0.5".to_string())
                .parse()
                .expect("MIN_SUCCESS_RATE must be a number"),
            stage_timeout_secs: env::var("STAGE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .expect("STAGE_TIMEOUT_SECS must be a number"),
        }
    }

    /// Log everything except the API key.
    pub fn log_redacted(&self) {
        info!(
            api_base_url = self.api_base_url.as_str(),
            model = self.model.as_str(),
            temperature = self.temperature,
            max_poison_words = self.max_poison_words,
            max_cross_refs = self.max_cross_refs,
            min_success_rate = self.min_success_rate,
            stage_timeout_secs = self.stage_timeout_secs,
            "Configuration loaded"
        );
    }

    /// A config for tests: no API key, permissive thresholds.
    pub fn for_tests() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: String::new(),
            model: "test-model".to_string(),
            temperature: 0.0,
            max_poison_words: 300,
            max_cross_refs: 2,
            min_success_rate: 0.5,
            stage_timeout_secs: 30,
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
