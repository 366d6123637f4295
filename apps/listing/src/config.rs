use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::generation::escalation::DEFAULT_ESCALATION_ATTEMPT;
use crate::llm_client::{LlmSettings, Provider};
use crate::translation::TranslationProvider;

/// Job configuration loaded from environment variables.
/// Startup fails if a required variable is missing or a number does not parse.
#[derive(Debug, Clone)]
pub struct Config {
    pub llm_provider: Provider,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_api_key: String,
    pub reasoning_model: Option<String>,
    pub escalation_enabled: bool,
    pub escalation_attempt: u32,
    pub translation: TranslationConfig,
    pub source_lang: String,
    pub target_lang: String,
    pub char_tolerance: usize,
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub rules_dir: PathBuf,
    pub output_dir: PathBuf,
    pub candidates: usize,
    pub log_json: bool,
    pub verbose_prompts: bool,
    pub rust_log: String,
}

#[derive(Debug, Clone)]
pub struct TranslationConfig {
    pub provider: TranslationProvider,
    /// Empty means the provider default.
    pub base_url: String,
    /// Chat translation model; empty means the generation model.
    pub model: String,
    /// Empty means reuse `LLM_API_KEY` (chat) or fail (DeepL).
    pub api_key: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let llm_provider = parse_or(&var, "LLM_PROVIDER", Provider::DeepSeek)?;
        let llm_model = var("LLM_MODEL").unwrap_or_else(|| llm_provider.default_model().to_string());
        let reasoning_model = var("LLM_REASONING_MODEL")
            .or_else(|| llm_provider.default_reasoning_model().map(str::to_string));

        let translation = TranslationConfig {
            provider: parse_or(&var, "TRANSLATION_PROVIDER", TranslationProvider::None)?,
            base_url: var("TRANSLATION_BASE_URL").unwrap_or_default(),
            model: var("TRANSLATION_MODEL").unwrap_or_default(),
            api_key: var("TRANSLATION_API_KEY").unwrap_or_default(),
        };

        Ok(Config {
            llm_base_url: var("LLM_BASE_URL")
                .unwrap_or_else(|| llm_provider.default_base_url().to_string()),
            llm_api_key: require(&var, "LLM_API_KEY")?,
            llm_model,
            llm_provider,
            reasoning_model,
            escalation_enabled: parse_bool(&var, "ESCALATION_ENABLED", true)?,
            escalation_attempt: parse_or(&var, "ESCALATION_ATTEMPT", DEFAULT_ESCALATION_ATTEMPT)?,
            translation,
            source_lang: var("SOURCE_LANG").unwrap_or_else(|| "en".to_string()),
            target_lang: var("TARGET_LANG").unwrap_or_else(|| "zh".to_string()),
            char_tolerance: parse_or(&var, "CHAR_TOLERANCE", 20)?,
            max_retries: parse_or(&var, "MAX_RETRIES", 3)?,
            request_timeout: Duration::from_secs(parse_or(&var, "REQUEST_TIMEOUT_SEC", 300)?),
            rules_dir: var("RULES_DIR").unwrap_or_else(|| "rules".to_string()).into(),
            output_dir: var("OUTPUT_DIR").unwrap_or_else(|| ".".to_string()).into(),
            candidates: parse_or::<usize>(&var, "CANDIDATES", 1)?.max(1),
            log_json: var("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
            verbose_prompts: parse_bool(&var, "VERBOSE_PROMPTS", false)?,
            rust_log: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }

    pub fn bilingual(&self) -> bool {
        self.translation.provider != TranslationProvider::None
    }

    pub fn llm_settings(&self) -> LlmSettings {
        LlmSettings {
            provider: self.llm_provider,
            base_url: self.llm_base_url.clone(),
            api_key: self.llm_api_key.clone(),
            timeout: self.request_timeout,
            verbose: self.verbose_prompts,
        }
    }
}

fn require(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow!("{key} has an invalid value {raw:?}: {e}")),
    }
}

fn parse_bool(var: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match var(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(anyhow!("{key} must be a boolean, got {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("LLM_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.llm_provider, Provider::DeepSeek);
        assert_eq!(config.llm_model, "deepseek-chat");
        assert_eq!(config.reasoning_model.as_deref(), Some("deepseek-reasoner"));
        assert_eq!(config.char_tolerance, 20);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.escalation_attempt, 3);
        assert_eq!(config.request_timeout, Duration::from_secs(300));
        assert_eq!(config.candidates, 1);
        assert!(config.escalation_enabled);
        assert!(!config.bilingual());
        assert_eq!(config.rules_dir, PathBuf::from("rules"));
    }

    #[test]
    fn test_missing_api_key_is_error() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("LLM_API_KEY"));
    }

    #[test]
    fn test_invalid_number_names_variable() {
        let err = Config::from_lookup(lookup(&[
            ("LLM_API_KEY", "sk-test"),
            ("MAX_RETRIES", "three"),
        ]))
        .unwrap_err();
        assert!(err.to_string().starts_with("MAX_RETRIES has an invalid value"));
    }

    #[test]
    fn test_claude_has_no_reasoning_default() {
        let config = Config::from_lookup(lookup(&[
            ("LLM_API_KEY", "sk-test"),
            ("LLM_PROVIDER", "claude"),
            ("TRANSLATION_PROVIDER", "chat"),
            ("LOG_FORMAT", "JSON"),
        ]))
        .unwrap();
        assert_eq!(config.reasoning_model, None);
        assert!(config.bilingual());
        assert!(config.log_json);
        assert_eq!(config.llm_base_url, "https://api.anthropic.com");
    }
}
