//! External collaborators of a call.
//!
//! The gateway does not own business data. It asks a prompt service for call
//! instructions, records the caller in a lead store, checks a completion gate
//! before hanging up on a goodbye, and hands finished calls to a post-call sink.
//! Each collaborator is a trait with an HTTP implementation and a local one for
//! deployments without that service.

mod http;

pub use http::{HttpCompletionGate, HttpEndpoint, HttpLeadStore, HttpPostCallSink, HttpPromptProvider};

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::call::{Direction, HangupReason};

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

// =============================================================================
// Types
// =============================================================================

/// Whether the required-fields check may block a goodbye hangup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredFieldsPolicy {
    /// The prompt asks for the fields; hanging up is not blocked
    #[default]
    PromptOnly,
    /// The completion gate must approve before a goodbye hangup
    Enforced,
}

fn default_true() -> bool {
    true
}

/// Per-business call instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallInstructions {
    /// Short prompt used for the greeting so the first turn starts fast
    pub compact_instructions: String,
    /// Complete prompt installed after the first turn
    #[serde(default)]
    pub full_instructions: String,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub required_fields_policy: RequiredFieldsPolicy,
    #[serde(default = "default_true")]
    pub goodbye_hangup_enabled: bool,
}

impl Default for CallInstructions {
    fn default() -> Self {
        Self {
            compact_instructions: "You are a helpful phone assistant. Keep answers short."
                .to_string(),
            full_instructions: String::new(),
            voice_id: None,
            language: None,
            required_fields_policy: RequiredFieldsPolicy::default(),
            goodbye_hangup_enabled: true,
        }
    }
}

/// Identity of a call as seen by collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallInfo {
    pub call_id: String,
    pub business_id: String,
    pub direction: Direction,
    pub caller: Option<String>,
    pub callee: Option<String>,
}

/// Hand-off record for offline processing of a finished call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostCallRecord {
    pub call_id: String,
    pub business_id: String,
    pub recording_ref: Option<String>,
    pub duration_secs: f64,
    pub direction: Direction,
    pub hangup_reason: HangupReason,
}

// =============================================================================
// Traits
// =============================================================================

#[async_trait]
pub trait PromptProvider: Send + Sync {
    async fn get_instructions(
        &self,
        business_id: &str,
        direction: Direction,
    ) -> CollaboratorResult<CallInstructions>;
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Create or update the lead keyed by `phone`. Returns its id.
    async fn upsert_by_phone(
        &self,
        phone: &str,
        call_id: &str,
        fields: &HashMap<String, String>,
    ) -> CollaboratorResult<String>;
}

/// External "required fields captured" predicate.
#[async_trait]
pub trait CompletionGate: Send + Sync {
    async fn allows_goodbye_hangup(
        &self,
        call: &CallInfo,
        policy: RequiredFieldsPolicy,
    ) -> CollaboratorResult<bool>;
}

#[async_trait]
pub trait PostCallSink: Send + Sync {
    async fn submit(&self, record: &PostCallRecord) -> CollaboratorResult<()>;
}

// =============================================================================
// Local implementations
// =============================================================================

/// Serves the same instructions for every business.
#[derive(Debug, Clone, Default)]
pub struct StaticPromptProvider {
    instructions: CallInstructions,
}

impl StaticPromptProvider {
    pub fn new(instructions: CallInstructions) -> Self {
        Self { instructions }
    }
}

#[async_trait]
impl PromptProvider for StaticPromptProvider {
    async fn get_instructions(
        &self,
        _business_id: &str,
        _direction: Direction,
    ) -> CollaboratorResult<CallInstructions> {
        Ok(self.instructions.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoggingLeadStore;

#[async_trait]
impl LeadStore for LoggingLeadStore {
    async fn upsert_by_phone(
        &self,
        phone: &str,
        call_id: &str,
        fields: &HashMap<String, String>,
    ) -> CollaboratorResult<String> {
        debug!(call_id, phone, fields = fields.len(), "Lead upsert (no store configured)");
        // the phone number is the only key there is
        Ok(phone.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct AllowAllGate;

#[async_trait]
impl CompletionGate for AllowAllGate {
    async fn allows_goodbye_hangup(
        &self,
        _call: &CallInfo,
        _policy: RequiredFieldsPolicy,
    ) -> CollaboratorResult<bool> {
        Ok(true)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoggingPostCallSink;

#[async_trait]
impl PostCallSink for LoggingPostCallSink {
    async fn submit(&self, record: &PostCallRecord) -> CollaboratorResult<()> {
        info!(
            call_id = %record.call_id,
            business_id = %record.business_id,
            duration_secs = record.duration_secs,
            hangup_reason = %record.hangup_reason,
            recording = record.recording_ref.as_deref().unwrap_or("-"),
            "Post-call record"
        );
        Ok(())
    }
}
