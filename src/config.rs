//! Process configuration from environment variables

use crate::llm::{OpenAiConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::runtime::RunLimits;
use crate::session::DEFAULT_EMIT_BUFFER;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is not set")]
    Missing { var: &'static str },
    #[error("Invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// SQLite file; `None` keeps conversations in memory
    pub db_path: Option<PathBuf>,
    pub emit_buffer: usize,
    pub limits: RunLimits,
    pub request_timeout: Duration,
}

impl Config {
    /// Read configuration from the process environment. Call
    /// `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        Ok(Self {
            api_key: get("OPENAI_API_KEY"),
            base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: get("ORCHESTRA_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            db_path: get("ORCHESTRA_DB_PATH").map(PathBuf::from),
            emit_buffer: parse_positive("ORCHESTRA_EMIT_BUFFER", get("ORCHESTRA_EMIT_BUFFER"), DEFAULT_EMIT_BUFFER)?,
            limits: RunLimits {
                max_model_calls: parse_positive(
                    "ORCHESTRA_MAX_MODEL_CALLS",
                    get("ORCHESTRA_MAX_MODEL_CALLS"),
                    RunLimits::default().max_model_calls,
                )?,
            },
            request_timeout: Duration::from_secs(parse_positive(
                "ORCHESTRA_REQUEST_TIMEOUT_SECS",
                get("ORCHESTRA_REQUEST_TIMEOUT_SECS"),
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
        })
    }

    /// Provider settings; fails when no API key is configured
    pub fn openai(&self) -> Result<OpenAiConfig, ConfigError> {
        let api_key = self
            .api_key
            .clone()
            .ok_or(ConfigError::Missing { var: "OPENAI_API_KEY" })?;
        Ok(OpenAiConfig::new(api_key)
            .with_base_url(self.base_url.clone())
            .with_model(self.model.clone())
            .with_timeout(self.request_timeout))
    }
}

fn parse_positive<N>(var: &'static str, raw: Option<String>, default: N) -> Result<N, ConfigError>
where
    N: FromStr + PartialOrd + Default,
    N::Err: std::fmt::Display,
{
    let Some(raw) = raw else {
        return Ok(default);
    };
    let invalid = |reason: String| ConfigError::Invalid {
        var,
        value: raw.clone(),
        reason,
    };
    let value = raw.trim().parse::<N>().map_err(|e| invalid(e.to_string()))?;
    if value <= N::default() {
        return Err(invalid("must be at least 1".to_string()));
    }
    Ok(value)
}
