//! Conversational AI backends.
//!
//! Every backend implements [`VoiceProvider`]; a started call talks to a boxed
//! [`ProviderSession`] and consumes a stream of [`ProviderEvent`]s.
//!
//! # Supported Providers
//!
//! - **OpenAI Realtime** - full duplex audio over one WebSocket
//! - **Sequential** - local segmentation, then STT, chat and TTS over HTTP

pub mod base;
pub mod openai;
pub mod sequential;
#[cfg(test)]
pub(crate) mod testing;

pub use base::{
    CancelOutcome, ErrorKind, PROVIDER_EVENT_CAPACITY, ProviderError, ProviderEvent, ProviderKind,
    ProviderResult, ProviderSession, ProviderSessionConfig, TranscriptRole, VoiceProvider,
};
pub use openai::{OpenAIRealtimeConfig, OpenAIRealtimeProvider};
pub use sequential::{OpenAIHttpConfig, SequentialConfig, SequentialProvider};
