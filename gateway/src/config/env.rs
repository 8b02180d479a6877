//! Environment variable loading.
//!
//! `.env` values are loaded into the process environment by `main` before
//! this runs, so real environment variables always win over the file.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::{ConfigError, ServerConfig, TlsConfig};
use crate::config::call::CallConfig;
use crate::core::provider::ProviderKind;

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value: raw,
            }),
        None => Ok(None),
    }
}

fn parse_bool(name: &str) -> Result<Option<bool>, ConfigError> {
    match var(name) {
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                name: name.to_string(),
                value: raw,
            }),
        },
        None => Ok(None),
    }
}

pub(crate) fn parse_provider(name: &str, raw: &str) -> Result<ProviderKind, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "realtime" | "openai" | "openai_realtime" => Ok(ProviderKind::Realtime),
        "sequential" | "pipeline" => Ok(ProviderKind::Sequential),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: raw.to_string(),
        }),
    }
}

/// Build a configuration from the environment, with defaults for anything unset.
pub(crate) fn load() -> Result<ServerConfig, ConfigError> {
    let tls = if parse_bool("TLS_ENABLED")?.unwrap_or(false) {
        let cert_path = var("TLS_CERT_PATH").ok_or_else(|| {
            ConfigError::Invalid("TLS_ENABLED requires TLS_CERT_PATH".to_string())
        })?;
        let key_path = var("TLS_KEY_PATH").ok_or_else(|| {
            ConfigError::Invalid("TLS_ENABLED requires TLS_KEY_PATH".to_string())
        })?;
        Some(TlsConfig {
            cert_path: PathBuf::from(cert_path),
            key_path: PathBuf::from(key_path),
        })
    } else {
        None
    };

    let provider = match var("AI_PROVIDER") {
        Some(raw) => parse_provider("AI_PROVIDER", &raw)?,
        None => ProviderKind::default(),
    };

    let mut call = CallConfig::default();
    if let Some(v) = parse("SILENCE_TIMEOUT_SECS")? {
        call.silence_timeout_secs = v;
    }
    if let Some(v) = parse("MAX_CALL_DURATION_SECS")? {
        call.max_call_duration_secs = v;
    }
    if let Some(v) = parse("PROMPT_TIMEOUT_MS")? {
        call.prompt_timeout_ms = v;
    }
    if let Some(v) = parse("COLLABORATOR_TIMEOUT_MS")? {
        call.collaborator_timeout_ms = v;
    }
    if let Some(v) = parse_bool("BARGE_IN_ON_SPEECH_STARTED")? {
        call.barge_in_on_speech_started = v;
    }
    if let Some(phrases) = var("GOODBYE_PHRASES") {
        call.goodbye_phrases = phrases
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
    }

    Ok(ServerConfig {
        host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
        port: parse("PORT")?.unwrap_or(3001),
        tls,
        provider,
        openai_api_key: var("OPENAI_API_KEY"),
        openai_base_url: var("OPENAI_BASE_URL"),
        realtime_url: var("OPENAI_REALTIME_URL"),
        realtime_model: var("OPENAI_REALTIME_MODEL"),
        realtime_audio_format: var("OPENAI_REALTIME_AUDIO_FORMAT"),
        stt_model: var("OPENAI_STT_MODEL"),
        chat_model: var("OPENAI_CHAT_MODEL"),
        tts_model: var("OPENAI_TTS_MODEL"),
        default_voice: var("ASSISTANT_VOICE"),
        collaborator_url: var("COLLABORATOR_URL"),
        collaborator_api_key: var("COLLABORATOR_API_KEY"),
        static_instructions: var("ASSISTANT_INSTRUCTIONS"),
        static_language: var("ASSISTANT_LANGUAGE"),
        recordings_dir: var("RECORDINGS_DIR").map(PathBuf::from),
        call,
    })
}
