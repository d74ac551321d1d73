pub mod assembler;
pub mod config;
pub mod control_plane;
pub mod identity;
pub mod provision;
pub mod rest;
pub mod retry;
pub mod storage;

use std::sync::Arc;

use config::HostConfig;
use control_plane::{ControlPlane, Endpoints};
use provision::{RunRegistry, StepPolicies};
use storage::Storage;

/// Shared application state passed to every REST handler and provisioning task.
pub struct AppContext {
    pub config: Arc<HostConfig>,
    pub storage: Arc<Storage>,
    /// Control-plane transport. Production wires in the HTTP client; tests
    /// swap in a scripted implementation.
    pub control: Arc<dyn ControlPlane>,
    /// URL builders for the resource and platform APIs.
    pub endpoints: Endpoints,
    /// Per-step attempt budgets shared by every run this daemon starts.
    pub policies: StepPolicies,
    /// Cancel tokens of in-flight provisioning runs, keyed by project id.
    pub runs: RunRegistry,
    /// Stable host identity from the settings table.
    pub host_id: String,
    pub started_at: std::time::Instant,
}
