//! Deployment plan types and progress estimation.

use gantry_core::types::{ContainerPlan, NetworkAttachment, NetworkPlan, VolumePlan};
use std::collections::HashMap;

/// Per-service execution stages and their progress weights.
///
/// One service's progress splits 40/20/20/20 across pull, create, start,
/// and health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStage {
    Pull,
    Create,
    Start,
    Health,
}

impl ServiceStage {
    pub fn weight(&self) -> u8 {
        match self {
            ServiceStage::Pull => 40,
            ServiceStage::Create => 20,
            ServiceStage::Start => 20,
            ServiceStage::Health => 20,
        }
    }

    /// Cumulative service progress once this stage has completed.
    pub fn completed_percent(&self) -> u8 {
        match self {
            ServiceStage::Pull => 40,
            ServiceStage::Create => 60,
            ServiceStage::Start => 80,
            ServiceStage::Health => 100,
        }
    }
}

/// Overall stack progress: the mean of per-service progress figures.
///
/// Monotonic as long as individual figures only move forward, which the
/// executor guarantees by setting them to stage-completion values.
pub fn overall_progress(per_service: &HashMap<String, u8>, total_services: usize) -> u8 {
    if total_services == 0 {
        return 100;
    }
    let sum: u32 = per_service.values().map(|p| u32::from(*p)).sum();
    (sum / total_services as u32).min(100) as u8
}

/// One service's scheduled work.
#[derive(Debug, Clone)]
pub struct ServiceStep {
    pub service: String,
    pub plan: ContainerPlan,
    /// Networks attached with explicit post-create connect calls.
    pub connects: Vec<NetworkAttachment>,
}

impl ServiceStep {
    pub fn has_healthcheck(&self) -> bool {
        self.plan.healthcheck.is_some()
    }
}

/// Ordered operation plan for one stack deployment.
#[derive(Debug, Clone)]
pub struct DeployPlan {
    pub project: String,

    /// Networks scheduled before services. External ones are validated to
    /// exist, never created.
    pub networks: Vec<NetworkPlan>,

    /// Named volumes scheduled before services. External ones are validated
    /// to exist, never created.
    pub volumes: Vec<VolumePlan>,

    /// Services grouped into dependency waves; a wave's services may be
    /// created concurrently, waves execute strictly in order.
    pub waves: Vec<Vec<ServiceStep>>,

    pub start_order: Vec<String>,
    pub stop_order: Vec<String>,
}

impl DeployPlan {
    pub fn total_services(&self) -> usize {
        self.waves.iter().map(|w| w.len()).sum()
    }

    pub fn service_step(&self, service: &str) -> Option<&ServiceStep> {
        self.waves.iter().flatten().find(|s| s.service == service)
    }

    /// Structural inverse of this plan for teardown.
    ///
    /// Containers go in stop order; only non-external resources are listed
    /// for removal.
    pub fn teardown(&self) -> TeardownPlan {
        let container_names = self
            .stop_order
            .iter()
            .filter_map(|service| {
                self.service_step(service).map(|step| step.plan.name.clone())
            })
            .collect();

        TeardownPlan {
            container_names,
            networks: self.networks.iter().filter(|n| !n.external).cloned().collect(),
            volumes: self.volumes.iter().filter(|v| !v.external).cloned().collect(),
        }
    }
}

/// Inverse plan: what to remove, in which order.
#[derive(Debug, Clone)]
pub struct TeardownPlan {
    /// Container names in stop order (reverse of creation).
    pub container_names: Vec<String>,
    pub networks: Vec<NetworkPlan>,
    pub volumes: Vec<VolumePlan>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_weights_sum_to_hundred() {
        let total: u8 = [ServiceStage::Pull, ServiceStage::Create, ServiceStage::Start,
            ServiceStage::Health]
            .iter()
            .map(|s| s.weight())
            .sum();
        assert_eq!(total, 100);
        assert_eq!(ServiceStage::Health.completed_percent(), 100);
    }

    #[test]
    fn test_overall_progress_scales_by_service_count() {
        let mut per_service = HashMap::new();
        per_service.insert("a".to_string(), 100u8);
        per_service.insert("b".to_string(), 0u8);
        assert_eq!(overall_progress(&per_service, 2), 50);

        per_service.insert("b".to_string(), ServiceStage::Pull.completed_percent());
        assert_eq!(overall_progress(&per_service, 2), 70);
    }

    #[test]
    fn test_overall_progress_is_monotonic_across_stages() {
        let mut per_service: HashMap<String, u8> = HashMap::new();
        per_service.insert("a".to_string(), 0);
        per_service.insert("b".to_string(), 0);

        let mut last = 0;
        for stage in
            [ServiceStage::Pull, ServiceStage::Create, ServiceStage::Start, ServiceStage::Health]
        {
            for name in ["a", "b"] {
                per_service.insert(name.to_string(), stage.completed_percent());
                let now = overall_progress(&per_service, 2);
                assert!(now >= last, "progress went backwards: {} -> {}", last, now);
                last = now;
            }
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn test_empty_stack_is_complete() {
        assert_eq!(overall_progress(&HashMap::new(), 0), 100);
    }
}
