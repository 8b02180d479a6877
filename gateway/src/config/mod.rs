//! Configuration module for the CallBridge gateway
//!
//! Server configuration comes from `.env` files, environment variables and an
//! optional YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `call`: per-call timing rules and phrase lists
//! - `env`: environment variable loading
//! - `yaml`: YAML configuration file loading
//!
//! # Example
//! ```rust,no_run
//! use callbridge_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod call;
mod env;
mod yaml;

pub use call::{
    CallConfig, CallYaml, DEFAULT_APOLOGY_PROMPT, DEFAULT_FALLBACK_LINE, DEFAULT_GOODBYE_PHRASES,
    DEFAULT_GREETING_DIRECTIVE,
};
pub use yaml::YamlConfig;

use crate::core::provider::openai::{
    OpenAIRealtimeAudioFormat, OpenAIRealtimeConfig, OpenAIRealtimeModel, OpenAIRealtimeVoice,
};
use crate::core::provider::{OpenAIHttpConfig, ProviderKind, SequentialConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Everything needed to run the gateway:
/// - listener settings (host, port, TLS)
/// - AI backend selection, models and credentials
/// - collaborator service location
/// - recording directory
/// - per-call tunables ([`CallConfig`])
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,

    /// Which backend family serves calls
    pub provider: ProviderKind,
    pub openai_api_key: Option<String>,
    /// Base URL for the HTTP APIs used by the sequential pipeline
    pub openai_base_url: Option<String>,
    /// Realtime WebSocket endpoint override
    pub realtime_url: Option<String>,
    pub realtime_model: Option<String>,
    /// `pcm16` or `g711_ulaw`
    pub realtime_audio_format: Option<String>,
    pub stt_model: Option<String>,
    pub chat_model: Option<String>,
    pub tts_model: Option<String>,
    /// Voice used when the call instructions name none
    pub default_voice: Option<String>,

    /// Base URL of the prompt, lead, completion and post-call services.
    /// When unset, static instructions and logging sinks are used.
    pub collaborator_url: Option<String>,
    pub collaborator_api_key: Option<String>,
    pub static_instructions: Option<String>,
    pub static_language: Option<String>,

    /// Where call recordings are written (disabled when unset)
    pub recordings_dir: Option<PathBuf>,

    pub call: CallConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            tls: None,
            provider: ProviderKind::default(),
            openai_api_key: None,
            openai_base_url: None,
            realtime_url: None,
            realtime_model: None,
            realtime_audio_format: None,
            stt_model: None,
            chat_model: None,
            tts_model: None,
            default_voice: None,
            collaborator_url: None,
            collaborator_api_key: None,
            static_instructions: None,
            static_language: None,
            recordings_dir: None,
            call: CallConfig::default(),
        }
    }
}

/// Zeroize secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.collaborator_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = env::load()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base.
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, an environment
    /// variable is malformed, or the merged configuration fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;
        let mut config = env::load()?;
        yaml_config.apply(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.call.nominal_fps == 0 {
            return Err(ConfigError::Invalid("call.nominal_fps must be positive".into()));
        }
        if self.call.ceiling_ratio < 1.0 {
            return Err(ConfigError::Invalid(
                "call.ceiling_ratio must be at least 1.0".into(),
            ));
        }
        if self.call.outbound_queue_frames == 0 {
            return Err(ConfigError::Invalid(
                "call.outbound_queue_frames must be positive".into(),
            ));
        }
        if self.call.goodbye_phrases.iter().all(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "call.goodbye_phrases must contain at least one phrase".into(),
            ));
        }
        Ok(())
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    fn api_key(&self) -> String {
        self.openai_api_key.clone().unwrap_or_default()
    }

    /// Settings for the realtime adapter, with VAD taken from the call rules.
    pub fn realtime_config(&self) -> OpenAIRealtimeConfig {
        let mut config = OpenAIRealtimeConfig {
            api_key: self.api_key(),
            ..Default::default()
        };
        if let Some(url) = &self.realtime_url {
            config.url = url.clone();
        }
        if let Some(model) = &self.realtime_model {
            config.model = OpenAIRealtimeModel::from_str_or_default(model);
        }
        if let Some(format) = &self.realtime_audio_format {
            config.audio_format = OpenAIRealtimeAudioFormat::parse_lenient(format);
        }
        if let Some(voice) = &self.default_voice {
            config.default_voice = OpenAIRealtimeVoice::from_str_or_default(voice);
        }
        config.vad_threshold = self.call.vad_threshold;
        config.vad_prefix_padding_ms = self.call.vad_prefix_padding_ms;
        config.vad_silence_duration_ms = self.call.vad_silence_duration_ms;
        config.response_ack_timeout = self.call.response_ack_timeout();
        config.cancel_ack_timeout = self.call.response_policy().cancel_ack_timeout;
        config
    }

    /// HTTP settings for the sequential pipeline.
    pub fn openai_http_config(&self) -> OpenAIHttpConfig {
        let mut config = OpenAIHttpConfig {
            api_key: self.api_key(),
            ..Default::default()
        };
        if let Some(base_url) = &self.openai_base_url {
            config.base_url = base_url.clone();
        }
        if let Some(model) = &self.stt_model {
            config.stt_model = model.clone();
        }
        if let Some(model) = &self.chat_model {
            config.chat_model = model.clone();
        }
        if let Some(model) = &self.tts_model {
            config.tts_model = model.clone();
        }
        config
    }

    pub fn sequential_config(&self) -> SequentialConfig {
        let mut config = SequentialConfig::default();
        if let Some(voice) = &self.default_voice {
            config.default_voice = voice.clone();
        }
        config
    }
}
