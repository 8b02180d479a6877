pub mod audio;
pub mod call;
pub mod collaborators;
pub mod provider;
pub mod registry;
pub mod response;
pub mod turn;

pub use audio::{AudioFrame, FrameScheduler};
pub use call::{CallInput, CallOutput, CallServices, CallStart, CallSummary, run_call};
pub use provider::{ProviderEvent, ProviderKind, ProviderSession, VoiceProvider};
pub use registry::CallRegistry;
