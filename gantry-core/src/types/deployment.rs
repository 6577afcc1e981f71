//! Deployment lifecycle types.
//!
//! A [`Deployment`] tracks one (host, stack) pairing through the lifecycle
//! `planning → validating → pulling_image → creating → starting → running`,
//! with `failed`, `rolled_back`, and `partial` as the off-ramps. Status moves
//! only through [`Deployment::transition`], which checks a fixed table.
//!
//! [`Commitment`] is the rollback latch: once a resource exists in the host
//! runtime the deployment is committed and automatic rollback is permanently
//! off. The type has no uncommit operation, so an illegal reset does not
//! typecheck.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tracing::warn;
use uuid::Uuid;

/// Lifecycle status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Planning,
    Validating,
    PullingImage,
    Creating,
    Starting,
    Running,
    /// Some services of a multi-service stack succeeded and others failed.
    Partial,
    Failed,
    RolledBack,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Planning => "planning",
            DeploymentStatus::Validating => "validating",
            DeploymentStatus::PullingImage => "pulling_image",
            DeploymentStatus::Creating => "creating",
            DeploymentStatus::Starting => "starting",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Partial => "partial",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planning" => Some(DeploymentStatus::Planning),
            "validating" => Some(DeploymentStatus::Validating),
            "pulling_image" => Some(DeploymentStatus::PullingImage),
            "creating" => Some(DeploymentStatus::Creating),
            "starting" => Some(DeploymentStatus::Starting),
            "running" => Some(DeploymentStatus::Running),
            "partial" => Some(DeploymentStatus::Partial),
            "failed" => Some(DeploymentStatus::Failed),
            "rolled_back" => Some(DeploymentStatus::RolledBack),
            _ => None,
        }
    }

    /// Terminal per execution. All terminal states are legal redeploy
    /// re-entry points (re-entering at `validating`).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Running
                | DeploymentStatus::Partial
                | DeploymentStatus::Failed
                | DeploymentStatus::RolledBack
        )
    }

    /// States between creation and a terminal outcome.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Planning
                | DeploymentStatus::Validating
                | DeploymentStatus::PullingImage
                | DeploymentStatus::Creating
                | DeploymentStatus::Starting
        )
    }

    /// Fixed transition table. Anything not listed here is refused.
    pub fn can_transition(from: DeploymentStatus, to: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        match (from, to) {
            (Planning, Validating) => true,
            (Validating, PullingImage) => true,
            (PullingImage, Creating) => true,
            (Creating, Starting) => true,
            (Starting, Running) => true,
            (Starting, Partial) => true,
            // failed is reachable from any in-progress state
            (f, Failed) if f.is_in_progress() => true,
            // rolled_back only from failed
            (Failed, RolledBack) => true,
            // every terminal state re-enters at validating on redeploy
            (f, Validating) if f.is_terminal() => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One-way rollback latch.
///
/// Set at the instant the first resource is created in the host runtime.
/// There is deliberately no inverse of [`Commitment::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    #[default]
    Uncommitted,
    Committed,
}

impl Commitment {
    pub fn commit(&mut self) {
        *self = Commitment::Committed;
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Commitment::Committed)
    }
}

/// One deployment of a stack onto a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Composite identity: `{host_id}-{8 hex}`.
    pub id: String,

    /// Target host.
    pub host_id: String,

    /// Name of the stack in stack storage.
    pub stack_name: String,

    pub status: DeploymentStatus,

    /// Overall progress, 0–100.
    pub progress: u8,

    /// Human-readable stage text.
    pub stage: String,

    /// Human-readable error text on failure.
    pub error: Option<String>,

    /// Rollback latch, set at the commitment point.
    pub commitment: Commitment,

    /// Whether a pre-commitment failure triggers automatic rollback.
    pub rollback_on_failure: bool,

    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub completed_at: Option<SystemTime>,
}

impl Deployment {
    /// Create a new deployment in `planning`.
    pub fn new(host_id: &str, stack_name: &str, rollback_on_failure: bool) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{}-{}", host_id, &suffix[..8]),
            host_id: host_id.to_string(),
            stack_name: stack_name.to_string(),
            status: DeploymentStatus::Planning,
            progress: 0,
            stage: String::new(),
            error: None,
            commitment: Commitment::Uncommitted,
            rollback_on_failure,
            created_at: SystemTime::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply a status transition if the table allows it.
    ///
    /// Returns false (and leaves status unchanged) on an illegal transition.
    /// Stamps `started_at` when leaving `planning` and `completed_at` when
    /// entering a terminal state.
    pub fn transition(&mut self, to: DeploymentStatus) -> bool {
        if !DeploymentStatus::can_transition(self.status, to) {
            warn!(
                deployment_id = %self.id,
                from = %self.status,
                to = %to,
                "Refusing illegal deployment status transition"
            );
            return false;
        }

        if self.status == DeploymentStatus::Planning && self.started_at.is_none() {
            self.started_at = Some(SystemTime::now());
        }
        if to.is_terminal() {
            self.completed_at = Some(SystemTime::now());
        } else if self.status.is_terminal() {
            // redeploy re-entry: the previous outcome no longer applies
            self.completed_at = None;
            self.error = None;
            self.progress = 0;
            self.started_at = Some(SystemTime::now());
        }

        self.status = to;
        true
    }

    /// Latch the commitment point. Idempotent; never reverts.
    pub fn mark_committed(&mut self) {
        self.commitment.commit();
    }

    /// Whether automatic rollback may run right now.
    ///
    /// Requires a failed status, the policy flag, and that no host resource
    /// has been committed. After the commitment point, rollback stays off
    /// regardless of status or policy.
    pub fn rollback_permitted(&self) -> bool {
        self.status == DeploymentStatus::Failed
            && self.rollback_on_failure
            && !self.commitment.is_committed()
    }

    /// Update progress and stage text, clamping to 0–100.
    pub fn set_progress(&mut self, percent: u8, stage: impl Into<String>) {
        self.progress = percent.min(100);
        self.stage = stage.into();
    }
}

/// Link from a deployment to a created container.
///
/// Rows for one deployment are always replaced as a whole set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentContainer {
    pub deployment_id: String,
    /// 12-character short container id.
    pub container_id: String,
    /// Service name within the stack; None for single containers.
    pub service_name: Option<String>,
}

/// Durable, deployment-independent record of a managed container.
///
/// A weak association keyed by (host, container); survives deletion of the
/// Deployment row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentMetadata {
    pub host_id: String,
    /// 12-character short container id.
    pub container_id: String,
    pub managed: bool,
    pub deployment_id: Option<String>,
    pub service_name: Option<String>,
}

impl DeploymentMetadata {
    /// Composite key disambiguating containers across hosts.
    pub fn composite_key(&self) -> String {
        format!("{}:{}", self.host_id, self.container_id)
    }
}
