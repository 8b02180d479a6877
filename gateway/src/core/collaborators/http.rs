//! HTTP implementations of the call collaborators.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    CallInfo, CallInstructions, CollaboratorError, CollaboratorResult, CompletionGate, LeadStore,
    PostCallRecord, PostCallSink, PromptProvider, RequiredFieldsPolicy,
};
use crate::core::call::Direction;

/// Base URL, credentials and client shared by the HTTP collaborators.
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpEndpoint {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> CollaboratorResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Request(format!("Failed to build client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.get(self.url(path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.post(self.url(path)))
    }

    async fn send(builder: RequestBuilder) -> CollaboratorResult<Response> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CollaboratorError::Request(format!("Request timed out: {e}"))
            } else {
                CollaboratorError::Request(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

// =============================================================================
// Prompt provider
// =============================================================================

/// `GET {base}/instructions?business_id=..&direction=..`
#[derive(Debug, Clone)]
pub struct HttpPromptProvider {
    endpoint: HttpEndpoint,
}

impl HttpPromptProvider {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl PromptProvider for HttpPromptProvider {
    async fn get_instructions(
        &self,
        business_id: &str,
        direction: Direction,
    ) -> CollaboratorResult<CallInstructions> {
        let request = self
            .endpoint
            .get("instructions")
            .query(&[("business_id", business_id), ("direction", direction.as_str())]);
        let response = HttpEndpoint::send(request).await?;
        response
            .json::<CallInstructions>()
            .await
            .map_err(|e| CollaboratorError::Decode(e.to_string()))
    }
}

// =============================================================================
// Lead store
// =============================================================================

#[derive(Debug, Deserialize)]
struct LeadUpsertResponse {
    lead_id: String,
}

/// `POST {base}/leads/upsert` answering `{"lead_id": ".."}`
#[derive(Debug, Clone)]
pub struct HttpLeadStore {
    endpoint: HttpEndpoint,
}

impl HttpLeadStore {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl LeadStore for HttpLeadStore {
    async fn upsert_by_phone(
        &self,
        phone: &str,
        call_id: &str,
        fields: &HashMap<String, String>,
    ) -> CollaboratorResult<String> {
        let body = json!({
            "phone": phone,
            "call_id": call_id,
            "fields": fields,
        });
        let response = HttpEndpoint::send(self.endpoint.post("leads/upsert").json(&body)).await?;
        let upserted = response
            .json::<LeadUpsertResponse>()
            .await
            .map_err(|e| CollaboratorError::Decode(e.to_string()))?;
        Ok(upserted.lead_id)
    }
}

// =============================================================================
// Completion gate
// =============================================================================

#[derive(Debug, Serialize)]
struct CompletionCheckRequest<'a> {
    call_id: &'a str,
    business_id: &'a str,
    direction: Direction,
    policy: RequiredFieldsPolicy,
}

#[derive(Debug, Deserialize)]
struct CompletionCheckResponse {
    allowed: bool,
}

/// `POST {base}/completion-check` answering `{"allowed": bool}`
#[derive(Debug, Clone)]
pub struct HttpCompletionGate {
    endpoint: HttpEndpoint,
}

impl HttpCompletionGate {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl CompletionGate for HttpCompletionGate {
    async fn allows_goodbye_hangup(
        &self,
        call: &CallInfo,
        policy: RequiredFieldsPolicy,
    ) -> CollaboratorResult<bool> {
        let body = CompletionCheckRequest {
            call_id: &call.call_id,
            business_id: &call.business_id,
            direction: call.direction,
            policy,
        };
        let response =
            HttpEndpoint::send(self.endpoint.post("completion-check").json(&body)).await?;
        let decision = response
            .json::<CompletionCheckResponse>()
            .await
            .map_err(|e| CollaboratorError::Decode(e.to_string()))?;
        Ok(decision.allowed)
    }
}

// =============================================================================
// Post-call sink
// =============================================================================

/// `POST {base}/post-call` with the [`PostCallRecord`] as JSON
#[derive(Debug, Clone)]
pub struct HttpPostCallSink {
    endpoint: HttpEndpoint,
}

impl HttpPostCallSink {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl PostCallSink for HttpPostCallSink {
    async fn submit(&self, record: &PostCallRecord) -> CollaboratorResult<()> {
        HttpEndpoint::send(self.endpoint.post("post-call").json(record)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_joining() {
        let endpoint =
            HttpEndpoint::new("http://prompts.local/api/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(
            endpoint.url("/instructions"),
            "http://prompts.local/api/instructions"
        );
        assert_eq!(endpoint.url("post-call"), "http://prompts.local/api/post-call");
    }
}
