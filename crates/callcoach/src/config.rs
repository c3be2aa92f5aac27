//! Explicit configuration for oracle calls and training runs.
//!
//! [`OracleConfig`] describes how the model is called; [`TrainerConfig`]
//! describes how a training run is shaped. Both are plain values built with
//! `Default` plus `with_*` methods and passed in by the caller; nothing in the
//! core reads process-wide state except [`OracleConfig::from_env`].

use crate::api::retry::RetryConfig;
use crate::prompts::CallContext;
use crate::simulation::DEFAULT_MAX_TURNS;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ── OracleConfig ───────────────────────────────────────────────────

/// How [`OpenRouterOracle`](crate::oracle::OpenRouterOracle) calls the model.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleConfig {
    /// Model identifier. Default: [`DEFAULT_MODEL`](crate::DEFAULT_MODEL).
    pub model: String,
    /// Sampling temperature. Default: `0.4`.
    pub temperature: f32,
    /// Maximum tokens per completion. Default: `1024`.
    pub max_tokens: u32,
    /// Deadline for a single call, retries excluded. Default: 60 s.
    pub timeout: Duration,
    /// Retry policy for transient failures. Default: no retries.
    pub retry: RetryConfig,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            model: crate::DEFAULT_MODEL.to_string(),
            temperature: 0.4,
            max_tokens: 1024,
            timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }
}

impl OracleConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Defaults overridden by `CALLCOACH_MODEL`, `CALLCOACH_TEMPERATURE`,
    /// `CALLCOACH_TIMEOUT_SECS` and `CALLCOACH_MAX_RETRIES`.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut config = Self::default();
        if let Some(model) = lookup("CALLCOACH_MODEL").filter(|m| !m.trim().is_empty()) {
            config.model = model.trim().to_string();
        }
        if let Some(raw) = lookup("CALLCOACH_TEMPERATURE") {
            config.temperature = parse_var("CALLCOACH_TEMPERATURE", &raw)?;
        }
        if let Some(raw) = lookup("CALLCOACH_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(parse_var("CALLCOACH_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = lookup("CALLCOACH_MAX_RETRIES") {
            config.retry.max_retries = parse_var("CALLCOACH_MAX_RETRIES", &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject values no backend would accept.
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("model must not be empty".into());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                self.temperature
            ));
        }
        if self.timeout.is_zero() {
            return Err("timeout must be greater than zero".into());
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T, String>
where
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| format!("{key}={raw:?} is not valid: {e}"))
}

// ── TrainerConfig ──────────────────────────────────────────────────

/// What happens to sibling personas when one persona's pipeline fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Cancel every other in-flight pipeline at the first failure.
    #[default]
    AbortRun,
    /// Let the other personas run to completion so their results are kept
    /// in the partial outcomes.
    FinishSiblings,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::AbortRun => f.write_str("abort-run"),
            FailurePolicy::FinishSiblings => f.write_str("finish-siblings"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "abort-run" | "abort" => Ok(FailurePolicy::AbortRun),
            "finish-siblings" | "finish" => Ok(FailurePolicy::FinishSiblings),
            other => Err(format!(
                "unknown failure policy {other:?} (expected abort-run or finish-siblings)"
            )),
        }
    }
}

/// Shape of a training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerConfig {
    /// Persona turns per simulation when the request does not say.
    /// Default: `8`.
    pub max_turns: u32,
    /// Persona pipelines running at once. Default: `4`.
    pub concurrency: usize,
    pub failure_policy: FailurePolicy,
    /// Placeholder values for the agent instructions and greeting. `None`
    /// leaves the templates untouched.
    pub call_context: Option<CallContext>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            concurrency: 4,
            failure_policy: FailurePolicy::AbortRun,
            call_context: None,
        }
    }
}

impl TrainerConfig {
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Values below 1 are raised to 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_call_context(mut self, context: CallContext) -> Self {
        self.call_context = Some(context);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn oracle_defaults() {
        let config = OracleConfig::default();
        assert_eq!(config.model, crate::DEFAULT_MODEL);
        assert!((config.temperature - 0.4).abs() < f32::EPSILON);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.retry.max_retries, 0);
    }

    #[test]
    fn from_lookup_applies_overrides() {
        let config = OracleConfig::from_lookup(lookup_from(&[
            ("CALLCOACH_MODEL", "anthropic/claude-3.5-haiku"),
            ("CALLCOACH_TEMPERATURE", "0.9"),
            ("CALLCOACH_TIMEOUT_SECS", "15"),
            ("CALLCOACH_MAX_RETRIES", "3"),
        ]))
        .unwrap();
        assert_eq!(config.model, "anthropic/claude-3.5-haiku");
        assert!((config.temperature - 0.9).abs() < f32::EPSILON);
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn from_lookup_without_variables_is_default() {
        let config = OracleConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, OracleConfig::default());
    }

    #[test]
    fn from_lookup_rejects_garbage() {
        let err = OracleConfig::from_lookup(lookup_from(&[("CALLCOACH_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.contains("CALLCOACH_TIMEOUT_SECS"));

        let err = OracleConfig::from_lookup(lookup_from(&[("CALLCOACH_TEMPERATURE", "7")]))
            .unwrap_err();
        assert!(err.contains("temperature"));
    }

    #[test]
    fn trainer_defaults_and_builders() {
        let config = TrainerConfig::default();
        assert_eq!(config.max_turns, 8);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.failure_policy, FailurePolicy::AbortRun);
        assert!(config.call_context.is_none());

        let config = TrainerConfig::default()
            .with_concurrency(0)
            .with_failure_policy(FailurePolicy::FinishSiblings);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.failure_policy, FailurePolicy::FinishSiblings);
    }

    #[test]
    fn failure_policy_parses_cli_spellings() {
        assert_eq!("abort-run".parse(), Ok(FailurePolicy::AbortRun));
        assert_eq!("FINISH_SIBLINGS".parse(), Ok(FailurePolicy::FinishSiblings));
        assert!("sometimes".parse::<FailurePolicy>().is_err());
        assert_eq!(FailurePolicy::FinishSiblings.to_string(), "finish-siblings");
    }
}
