//! Shared application state.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::ServerConfig;
use crate::core::call::{CallServices, GoodbyeDetector};
use crate::core::collaborators::{
    AllowAllGate, CallInstructions, CollaboratorError, CompletionGate, HttpCompletionGate,
    HttpEndpoint, HttpLeadStore, HttpPostCallSink, HttpPromptProvider, LeadStore,
    LoggingLeadStore, LoggingPostCallSink, PostCallSink, PromptProvider, StaticPromptProvider,
};
use crate::core::provider::{
    OpenAIRealtimeProvider, ProviderError, ProviderKind, SequentialProvider, VoiceProvider,
};
use crate::core::registry::CallRegistry;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("AI provider setup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Collaborator setup failed: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Invalid goodbye phrases: {0}")]
    GoodbyePhrases(#[from] regex::Error),
}

/// Everything a handler needs: the call services and the registry behind them.
pub struct AppState {
    pub config: ServerConfig,
    pub services: CallServices,
}

impl AppState {
    /// Build the provider and collaborators described by `config`.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, StateError> {
        let provider: Arc<dyn VoiceProvider> = match config.provider {
            ProviderKind::Realtime => {
                Arc::new(OpenAIRealtimeProvider::new(config.realtime_config())?)
            }
            ProviderKind::Sequential => Arc::new(SequentialProvider::openai(
                config.sequential_config(),
                config.openai_http_config(),
            )?),
        };
        info!(provider = %provider.kind(), "AI provider configured");

        let services = match &config.collaborator_url {
            Some(url) => {
                let endpoint = HttpEndpoint::new(
                    url.clone(),
                    config.collaborator_api_key.clone(),
                    config.call.collaborator_timeout(),
                )?;
                info!(url = %url, "Using HTTP collaborators");
                Self::services(
                    &config,
                    provider,
                    Arc::new(HttpPromptProvider::new(endpoint.clone())),
                    Arc::new(HttpLeadStore::new(endpoint.clone())),
                    Arc::new(HttpCompletionGate::new(endpoint.clone())),
                    Arc::new(HttpPostCallSink::new(endpoint)),
                )?
            }
            None => {
                let mut instructions = CallInstructions::default();
                if let Some(text) = &config.static_instructions {
                    instructions.compact_instructions = text.clone();
                }
                instructions.language = config.static_language.clone();
                info!("No collaborator URL configured, using static instructions");
                Self::services(
                    &config,
                    provider,
                    Arc::new(StaticPromptProvider::new(instructions)),
                    Arc::new(LoggingLeadStore),
                    Arc::new(AllowAllGate),
                    Arc::new(LoggingPostCallSink),
                )?
            }
        };

        Ok(Arc::new(Self { config, services }))
    }

    fn services(
        config: &ServerConfig,
        provider: Arc<dyn VoiceProvider>,
        prompts: Arc<dyn PromptProvider>,
        leads: Arc<dyn LeadStore>,
        completion_gate: Arc<dyn CompletionGate>,
        post_call: Arc<dyn PostCallSink>,
    ) -> Result<CallServices, StateError> {
        Ok(CallServices {
            config: Arc::new(config.call.clone()),
            provider,
            registry: Arc::new(CallRegistry::new()),
            prompts,
            leads,
            completion_gate,
            post_call,
            goodbye: Arc::new(GoodbyeDetector::new(config.call.goodbye_phrases.as_slice())?),
            recordings_dir: config.recordings_dir.clone(),
        })
    }

    /// State around prebuilt services, for embedding and tests.
    pub fn with_services(config: ServerConfig, services: CallServices) -> Arc<Self> {
        Arc::new(Self { config, services })
    }

    pub fn registry(&self) -> &CallRegistry {
        &self.services.registry
    }
}
