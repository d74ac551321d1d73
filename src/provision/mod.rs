// SPDX-License-Identifier: MIT
//! Provisioning workflow — five sequential control-plane calls per run.
//!
//! One workflow instance drives one provisioning request from a display name
//! to a fetched client configuration. Steps run strictly in order; each owns
//! its attempt budget (see [`StepPolicies`]) and classifies its own responses,
//! so eventual-consistency lag retries while real rejections abort.
//!
//! # State machine
//!
//! ```text
//! Created ──► PollingActive ──► EnablingPlatform ──► RegisteringClient ──► FetchingConfig ──► Completed
//!    │              │                  │                     │                    │
//!    ▼              ▼                  ▼                     ▼                    ▼
//! FailedCreate  FailedTimeout    FailedEnable         FailedRegister        FailedConfig
//! ```
//!
//! Cancellation can land the run in `Cancelled` from any suspension point;
//! an in-flight HTTP call always completes first. Terminal states are
//! immutable and there is no rollback: a run that fails after Create leaves
//! the project behind, and the report carries its id for manual cleanup.

pub mod project_id;

pub use project_id::{
    validate_display_name, NameError, ProjectId, MAX_DISPLAY_NAME_LEN, MAX_PROJECT_ID_LEN,
};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::control_plane::{error_message, ApiRequest, ApiResult, ControlPlane, Endpoints};
use crate::retry::{run_attempts, CancelToken, RetryPolicy, StageOutcome, StepFailure};

// ─── States ───────────────────────────────────────────────────────────────────

/// Position of a run in the provisioning state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Created,
    PollingActive,
    EnablingPlatform,
    RegisteringClient,
    FetchingConfig,
    Completed,
    FailedCreate,
    FailedTimeout,
    FailedEnable,
    FailedRegister,
    FailedConfig,
    Cancelled,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            WorkflowState::Created
                | WorkflowState::PollingActive
                | WorkflowState::EnablingPlatform
                | WorkflowState::RegisteringClient
                | WorkflowState::FetchingConfig
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, WorkflowState::Completed)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowState::Created => "created",
            WorkflowState::PollingActive => "polling_active",
            WorkflowState::EnablingPlatform => "enabling_platform",
            WorkflowState::RegisteringClient => "registering_client",
            WorkflowState::FetchingConfig => "fetching_config",
            WorkflowState::Completed => "completed",
            WorkflowState::FailedCreate => "failed_create",
            WorkflowState::FailedTimeout => "failed_timeout",
            WorkflowState::FailedEnable => "failed_enable",
            WorkflowState::FailedRegister => "failed_register",
            WorkflowState::FailedConfig => "failed_config",
            WorkflowState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ─── Policies ─────────────────────────────────────────────────────────────────

/// Per-step attempt budgets and settle delays.
///
/// The defaults encode the control plane's observed propagation behavior;
/// they are compiled in rather than configurable so every deployment retries
/// the same way.
#[derive(Debug, Clone)]
pub struct StepPolicies {
    /// Project creation — a single attempt, the call is not idempotent.
    pub create: RetryPolicy,
    /// Settle time between creation and the first status poll.
    pub post_create_settle: Duration,
    /// Lifecycle polling until the project reports ACTIVE.
    pub poll_active: RetryPolicy,
    /// Platform enablement.
    pub enable: RetryPolicy,
    /// Settle time between enablement and client registration.
    pub post_enable_settle: Duration,
    /// Client registration; only 404s (propagation lag) retry.
    pub register: RetryPolicy,
    /// Configuration fetch — single attempt, re-invocable via the gateway.
    pub fetch_config: RetryPolicy,
}

impl Default for StepPolicies {
    fn default() -> Self {
        Self {
            create: RetryPolicy::once(),
            post_create_settle: Duration::from_secs(5),
            poll_active: RetryPolicy::new(10, Duration::from_secs(5)),
            enable: RetryPolicy::new(5, Duration::from_secs(2)),
            post_enable_settle: Duration::from_secs(10),
            register: RetryPolicy::new(5, Duration::from_secs(5)),
            fetch_config: RetryPolicy::once(),
        }
    }
}

impl StepPolicies {
    /// Production budgets with millisecond delays — for tests.
    pub fn instant() -> Self {
        let defaults = Self::default();
        Self {
            create: defaults.create,
            post_create_settle: Duration::ZERO,
            poll_active: RetryPolicy::instant(defaults.poll_active.max_attempts),
            enable: RetryPolicy::instant(defaults.enable.max_attempts),
            post_enable_settle: Duration::ZERO,
            register: RetryPolicy::instant(defaults.register.max_attempts),
            fetch_config: defaults.fetch_config,
        }
    }
}

// ─── Request / report ─────────────────────────────────────────────────────────

/// What the caller supplies to start a run.
#[derive(Clone)]
pub struct ProvisionRequest {
    pub display_name: String,
    /// End-user bearer credential, forwarded to every control-plane call.
    pub access_token: String,
}

impl fmt::Debug for ProvisionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionRequest")
            .field("display_name", &self.display_name)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Terminal summary of one provisioning run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionReport {
    pub state: WorkflowState,
    pub project_id: ProjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_config: Option<serde_json::Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProvisionReport {
    pub fn succeeded(&self) -> bool {
        self.state.is_success()
    }
}

// ─── Active-run registry ──────────────────────────────────────────────────────

/// Cancel tokens of in-flight runs, keyed by project id.
///
/// Exists only so the gateway's cancel endpoint can reach a running
/// workflow; finished runs are removed immediately.
#[derive(Debug, Default)]
pub struct RunRegistry {
    active: Mutex<HashMap<String, CancelToken>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, project_id: &ProjectId, token: CancelToken) {
        self.lock().insert(project_id.as_str().to_string(), token);
    }

    pub fn deregister(&self, project_id: &ProjectId) {
        self.lock().remove(project_id.as_str());
    }

    /// Trip the cancel token of an active run. Returns `false` when no run
    /// with that id is in flight.
    pub fn cancel(&self, project_id: &str) -> bool {
        match self.lock().get(project_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Project ids of runs currently in flight, sorted for stable output.
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancelToken>> {
        // Nothing panics while holding this lock; recover the map anyway.
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ─── Workflow ─────────────────────────────────────────────────────────────────

/// Drives the five-step provisioning sequence against a [`ControlPlane`].
#[derive(Clone)]
pub struct ProvisioningWorkflow {
    control: Arc<dyn ControlPlane>,
    endpoints: Endpoints,
    policies: StepPolicies,
}

impl ProvisioningWorkflow {
    pub fn new(control: Arc<dyn ControlPlane>, endpoints: Endpoints, policies: StepPolicies) -> Self {
        Self {
            control,
            endpoints,
            policies,
        }
    }

    /// Run the machine to a terminal state.
    ///
    /// `Err` means the display name failed validation and no control-plane
    /// call was made; `Ok` always carries a terminal report. The project id
    /// is derived once, up front, and reused by every step.
    pub async fn run(
        &self,
        request: &ProvisionRequest,
        cancel: &CancelToken,
    ) -> Result<ProvisionReport, NameError> {
        let project_id = ProjectId::now(&request.display_name)?;
        Ok(self.run_with_id(project_id, request, cancel).await)
    }

    /// Run with a pre-derived project id.
    ///
    /// The gateway derives the id before spawning so it can file the run's
    /// cancel token under it; derivation already validated the name, so this
    /// path is infallible and always reaches a terminal report.
    pub async fn run_with_id(
        &self,
        project_id: ProjectId,
        request: &ProvisionRequest,
        cancel: &CancelToken,
    ) -> ProvisionReport {
        let bearer = request.access_token.clone();
        info!(project_id = %project_id, name = %request.display_name, "provisioning run started");

        // Create.
        let create_body = json!({
            "projectId": project_id.as_str(),
            "name": request.display_name,
        });
        let url = self.endpoints.create_project();
        let bearer2 = bearer.clone();
        if let Err(failure) = self
            .step(&self.policies.create, cancel, classify_create, move |_| {
                ApiRequest::post(url.clone(), bearer2.clone(), create_body.clone())
            })
            .await
        {
            return self.conclude(WorkflowState::FailedCreate, project_id, None, failure);
        }

        // The resource API acknowledges creation before the project is
        // visible to reads; give it a head start, then poll.
        info!(project_id = %project_id, state = %WorkflowState::PollingActive, "project created — waiting for ACTIVE");
        if let Err(failure) = self.settle(self.policies.post_create_settle, cancel).await {
            return self.conclude(WorkflowState::FailedTimeout, project_id, None, failure);
        }

        let url = self.endpoints.project_status(project_id.as_str());
        let bearer2 = bearer.clone();
        if let Err(failure) = self
            .step(&self.policies.poll_active, cancel, classify_poll, move |_| {
                ApiRequest::get(url.clone(), bearer2.clone())
            })
            .await
        {
            return self.conclude(WorkflowState::FailedTimeout, project_id, None, failure);
        }

        // Enable the Nimbus platform.
        info!(project_id = %project_id, state = %WorkflowState::EnablingPlatform, "project active — enabling platform");
        let url = self.endpoints.enable_platform(project_id.as_str());
        let bearer2 = bearer.clone();
        if let Err(failure) = self
            .step(&self.policies.enable, cancel, classify_enable, move |_| {
                ApiRequest::post(url.clone(), bearer2.clone(), json!({}))
            })
            .await
        {
            return self.conclude(WorkflowState::FailedEnable, project_id, None, failure);
        }

        // Register the client app. Enablement propagates slowly, hence the
        // settle delay and the 404-only retry in the classifier.
        info!(project_id = %project_id, state = %WorkflowState::RegisteringClient, "platform enabled — registering client");
        if let Err(failure) = self.settle(self.policies.post_enable_settle, cancel).await {
            return self.conclude(WorkflowState::FailedRegister, project_id, None, failure);
        }

        let url = self.endpoints.register_client(project_id.as_str());
        let bearer2 = bearer.clone();
        let register_body = json!({ "displayName": request.display_name });
        let client_id = match self
            .step(&self.policies.register, cancel, classify_register, move |_| {
                ApiRequest::post(url.clone(), bearer2.clone(), register_body.clone())
            })
            .await
        {
            Ok(client_id) => client_id,
            Err(failure) => {
                return self.conclude(WorkflowState::FailedRegister, project_id, None, failure);
            }
        };

        // Fetch the generated client configuration.
        info!(project_id = %project_id, client_id = %client_id, state = %WorkflowState::FetchingConfig, "client registered — fetching config");
        let url = self.endpoints.client_config(project_id.as_str(), &client_id);
        let bearer2 = bearer.clone();
        let config = match self
            .step(&self.policies.fetch_config, cancel, classify_fetch, move |_| {
                ApiRequest::get(url.clone(), bearer2.clone())
            })
            .await
        {
            Ok(config) => config,
            Err(failure) => {
                return self.conclude(
                    WorkflowState::FailedConfig,
                    project_id,
                    Some(client_id),
                    failure,
                );
            }
        };

        info!(project_id = %project_id, client_id = %client_id, "provisioning run completed");
        ProvisionReport {
            state: WorkflowState::Completed,
            project_id,
            client_id: Some(client_id),
            client_config: Some(config),
            error: None,
        }
    }

    /// Run one step under its policy, cloning owned data into each attempt.
    async fn step<T, B>(
        &self,
        policy: &RetryPolicy,
        cancel: &CancelToken,
        classify: fn(ApiResult) -> StageOutcome<T>,
        build: B,
    ) -> Result<T, StepFailure>
    where
        B: Fn(u32) -> ApiRequest,
    {
        let control = Arc::clone(&self.control);
        run_attempts(policy, cancel, move |attempt| {
            let control = Arc::clone(&control);
            let req = build(attempt);
            async move { classify(control.call(req).await) }
        })
        .await
    }

    /// Cancellation-aware settle delay between steps.
    async fn settle(&self, delay: Duration, cancel: &CancelToken) -> Result<(), StepFailure> {
        if cancel.is_cancelled() {
            return Err(StepFailure::Cancelled);
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if cancel.is_cancelled() {
            return Err(StepFailure::Cancelled);
        }
        Ok(())
    }

    fn conclude(
        &self,
        state: WorkflowState,
        project_id: ProjectId,
        client_id: Option<String>,
        failure: StepFailure,
    ) -> ProvisionReport {
        let state = if matches!(failure, StepFailure::Cancelled) {
            WorkflowState::Cancelled
        } else {
            state
        };
        warn!(
            project_id = %project_id,
            state = %state,
            reason = failure.reason(),
            "provisioning run failed"
        );
        ProvisionReport {
            state,
            project_id,
            client_id,
            client_config: None,
            error: Some(failure.reason().to_string()),
        }
    }
}

// ─── Per-step response classification ─────────────────────────────────────────

fn classify_create(result: ApiResult) -> StageOutcome<Value> {
    match result {
        ApiResult::Ok(body) => StageOutcome::Success(body),
        ApiResult::Http { status, body } => {
            StageOutcome::Fatal(format!("HTTP {status}: {}", error_message(&body)))
        }
        ApiResult::Transport(e) => StageOutcome::Fatal(format!("transport error: {e}")),
    }
}

/// Anything short of ACTIVE keeps polling; errors here are always lag.
fn classify_poll(result: ApiResult) -> StageOutcome<Value> {
    match result {
        ApiResult::Ok(body) => {
            let lifecycle = body
                .get("lifecycleState")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN");
            if lifecycle == "ACTIVE" {
                StageOutcome::Success(body)
            } else {
                StageOutcome::Retryable(format!("lifecycle state is {lifecycle}"))
            }
        }
        ApiResult::Http { status, body } => {
            StageOutcome::Retryable(format!("HTTP {status}: {}", error_message(&body)))
        }
        ApiResult::Transport(e) => StageOutcome::Retryable(format!("transport error: {e}")),
    }
}

fn classify_enable(result: ApiResult) -> StageOutcome<Value> {
    match result {
        ApiResult::Ok(body) => StageOutcome::Success(body),
        ApiResult::Http { status, body } => {
            StageOutcome::Retryable(format!("HTTP {status}: {}", error_message(&body)))
        }
        ApiResult::Transport(e) => StageOutcome::Retryable(format!("transport error: {e}")),
    }
}

/// A 404 means enablement has not propagated yet; any other rejection is
/// real and aborts with the control plane's body intact. Success carries
/// the extracted client id; nothing downstream re-parses the body.
fn classify_register(result: ApiResult) -> StageOutcome<String> {
    match result {
        ApiResult::Ok(body) => match body.get("clientId").and_then(Value::as_str) {
            Some(id) => StageOutcome::Success(id.to_string()),
            None => {
                StageOutcome::Retryable("registration accepted but no clientId yet".to_string())
            }
        },
        ApiResult::Http { status: 404, body } => {
            StageOutcome::Retryable(format!("HTTP 404: {}", error_message(&body)))
        }
        ApiResult::Http { status, body } => {
            StageOutcome::Fatal(format!("HTTP {status}: {}", error_message(&body)))
        }
        ApiResult::Transport(e) => StageOutcome::Retryable(format!("transport error: {e}")),
    }
}

fn classify_fetch(result: ApiResult) -> StageOutcome<serde_json::Map<String, Value>> {
    match result {
        ApiResult::Ok(Value::Object(map)) => StageOutcome::Success(map),
        ApiResult::Ok(_) => StageOutcome::Fatal("configuration body was not a JSON object".into()),
        ApiResult::Http { status, body } => {
            StageOutcome::Fatal(format!("HTTP {status}: {}", error_message(&body)))
        }
        ApiResult::Transport(e) => StageOutcome::Fatal(format!("transport error: {e}")),
    }
}
