use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::call::CallYaml;
use super::env::parse_provider;
use super::{ConfigError, ServerConfig, TlsConfig};

/// Complete YAML configuration structure
///
/// All fields are optional. Values present here override the environment.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///   tls:
///     enabled: true
///     cert_path: "/etc/callbridge/cert.pem"
///     key_path: "/etc/callbridge/key.pem"
///
/// provider:
///   kind: "realtime"          # or "sequential"
///   openai_api_key: "sk-..."
///   realtime_model: "gpt-4o-realtime-preview"
///   realtime_audio_format: "pcm16"
///   chat_model: "gpt-4o-mini"
///   voice: "alloy"
///
/// collaborators:
///   url: "https://crm.example.com/api"
///   api_key: "crm-key"
///
/// assistant:
///   instructions: "You answer the phone for Acme Plumbing."
///   language: "he"
///
/// recording:
///   dir: "/var/lib/callbridge/recordings"
///
/// call:
///   silence_timeout_secs: 20
///   goodbye_phrases: ["goodbye", "bye"]
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub provider: Option<ProviderYaml>,
    pub collaborators: Option<CollaboratorsYaml>,
    pub assistant: Option<AssistantYaml>,
    pub recording: Option<RecordingYaml>,
    pub call: Option<CallYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// AI backend selection and credentials
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProviderYaml {
    pub kind: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub realtime_url: Option<String>,
    pub realtime_model: Option<String>,
    pub realtime_audio_format: Option<String>,
    pub stt_model: Option<String>,
    pub chat_model: Option<String>,
    pub tts_model: Option<String>,
    pub voice: Option<String>,
}

/// Prompt, lead, completion and post-call services
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CollaboratorsYaml {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// Static instructions used when no prompt service is configured
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AssistantYaml {
    pub instructions: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RecordingYaml {
    pub dir: Option<String>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Apply every value present in the file on top of `config`.
    pub fn apply(self, config: &mut ServerConfig) -> Result<(), ConfigError> {
        if let Some(server) = self.server {
            if let Some(host) = server.host {
                config.host = host;
            }
            if let Some(port) = server.port {
                config.port = port;
            }
            if let Some(tls) = server.tls {
                match tls.enabled {
                    Some(false) => config.tls = None,
                    Some(true) => {
                        let (Some(cert_path), Some(key_path)) = (tls.cert_path, tls.key_path)
                        else {
                            return Err(ConfigError::Invalid(
                                "server.tls.enabled requires cert_path and key_path".to_string(),
                            ));
                        };
                        config.tls = Some(TlsConfig {
                            cert_path: PathBuf::from(cert_path),
                            key_path: PathBuf::from(key_path),
                        });
                    }
                    None => {}
                }
            }
        }

        if let Some(provider) = self.provider {
            if let Some(kind) = provider.kind {
                config.provider = parse_provider("provider.kind", &kind)?;
            }
            set(&mut config.openai_api_key, provider.openai_api_key);
            set(&mut config.openai_base_url, provider.openai_base_url);
            set(&mut config.realtime_url, provider.realtime_url);
            set(&mut config.realtime_model, provider.realtime_model);
            set(&mut config.realtime_audio_format, provider.realtime_audio_format);
            set(&mut config.stt_model, provider.stt_model);
            set(&mut config.chat_model, provider.chat_model);
            set(&mut config.tts_model, provider.tts_model);
            set(&mut config.default_voice, provider.voice);
        }

        if let Some(collaborators) = self.collaborators {
            set(&mut config.collaborator_url, collaborators.url);
            set(&mut config.collaborator_api_key, collaborators.api_key);
        }

        if let Some(assistant) = self.assistant {
            set(&mut config.static_instructions, assistant.instructions);
            set(&mut config.static_language, assistant.language);
        }

        if let Some(dir) = self.recording.and_then(|r| r.dir) {
            config.recordings_dir = Some(PathBuf::from(dir));
        }

        if let Some(call) = self.call {
            call.apply(&mut config.call);
        }
        Ok(())
    }
}

fn set(target: &mut Option<String>, value: Option<String>) {
    if value.is_some() {
        *target = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080

provider:
  kind: "sequential"
  openai_api_key: "sk-yaml"
  chat_model: "gpt-4o"

collaborators:
  url: "http://crm.local"

assistant:
  instructions: "Be brief."
  language: "he"

recording:
  dir: "/tmp/recordings"

call:
  silence_timeout_secs: 45
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(
            config.server.as_ref().unwrap().host,
            Some("127.0.0.1".to_string())
        );
        assert_eq!(config.server.as_ref().unwrap().port, Some(8080));
        let provider = config.provider.as_ref().unwrap();
        assert_eq!(provider.kind.as_deref(), Some("sequential"));
        assert_eq!(provider.openai_api_key.as_deref(), Some("sk-yaml"));
        assert_eq!(
            config.collaborators.as_ref().unwrap().url.as_deref(),
            Some("http://crm.local")
        );
        assert_eq!(
            config.assistant.as_ref().unwrap().language.as_deref(),
            Some("he")
        );
        assert_eq!(
            config.call.as_ref().unwrap().silence_timeout_secs,
            Some(45)
        );
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.server.is_none());
        assert!(config.provider.is_none());
        assert!(config.call.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        fs::write(&config_path, "server:\n  host: \"localhost\"\n  port: 3000\n").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        assert_eq!(
            config.server.as_ref().unwrap().host,
            Some("localhost".to_string())
        );
        assert_eq!(config.server.as_ref().unwrap().port, Some(3000));
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/config.yaml");
        let result = YamlConfig::from_file(&path);

        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");

        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }

    #[test]
    fn test_unknown_provider_kind_rejected() {
        let yaml: YamlConfig = serde_yaml::from_str("provider:\n  kind: \"carrier-pigeon\"\n").unwrap();
        let mut config = ServerConfig::default();
        let err = yaml.apply(&mut config).unwrap_err();
        assert!(err.to_string().contains("provider.kind"));
    }

    #[test]
    fn test_tls_requires_paths() {
        let yaml: YamlConfig =
            serde_yaml::from_str("server:\n  tls:\n    enabled: true\n    cert_path: \"/c.pem\"\n")
                .unwrap();
        let mut config = ServerConfig::default();
        assert!(yaml.apply(&mut config).is_err());
    }
}
