//! Deployment executor.
//!
//! Sequences validation, the security gate, orchestration, and host
//! execution for one deployment, persisting progress after every change and
//! broadcasting it. Direct hosts run the plan locally; agent hosts get the
//! whole compose text in one round trip and report back through
//! asynchronous events.

use crate::orchestrator::{
    overall_progress, DeployPlan, ServiceStage, ServiceStep, StackOrchestrator,
};
use gantry_core::agent::{AgentCommand, AgentEvent, DeployComposePayload};
use gantry_core::compose::StackValidator;
use gantry_core::error::{GantryError, Result};
use gantry_core::events::DeploymentBroadcast;
use gantry_core::hosts::{ConnectorFactory, HostConnector};
use gantry_core::security::PolicyEngine;
use gantry_core::stacks::StackStore;
use gantry_core::state::StateManager;
use gantry_core::types::{
    Deployment, DeploymentContainer, DeploymentMetadata, DeploymentStatus, Host, HostConnection,
};
use gantry_core::Config;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Grace period when stopping containers during rollback.
const ROLLBACK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one service within a deployment.
#[derive(Debug, Clone)]
struct ServiceOutcome {
    service: String,
    container_id: Option<String>,
    error: Option<String>,
}

impl ServiceOutcome {
    fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Top-level deployment coordinator.
pub struct DeploymentExecutor {
    state: Arc<StateManager>,
    stacks: Arc<StackStore>,
    events: DeploymentBroadcast,
    connectors: Arc<ConnectorFactory>,
    config: Config,
}

impl DeploymentExecutor {
    pub fn new(
        state: Arc<StateManager>,
        stacks: Arc<StackStore>,
        events: DeploymentBroadcast,
        connectors: Arc<ConnectorFactory>,
        config: Config,
    ) -> Self {
        Self { state, stacks, events, connectors, config }
    }

    /// Create a deployment record for (host, stack) and execute it.
    #[instrument(skip(self, host), fields(host_id = %host.id, stack = %stack_name))]
    pub async fn deploy(&self, host: &Host, stack_name: &str) -> Result<Deployment> {
        let deployment =
            Deployment::new(&host.id, stack_name, self.config.rollback_on_failure);
        self.state.insert_deployment(&deployment).await?;
        self.events.publish_deployment(&deployment);

        self.execute(host, &deployment.id).await
    }

    /// Execute (or re-execute) a persisted deployment.
    ///
    /// The storage lease guarantees one execution in flight per deployment
    /// id, across processes. The whole run is bounded by the configured
    /// deployment timeout; expiry marks the deployment failed and evaluates
    /// rollback.
    #[instrument(skip(self, host), fields(deployment_id = %deployment_id))]
    pub async fn execute(&self, host: &Host, deployment_id: &str) -> Result<Deployment> {
        let mut deployment = self.state.get_deployment(deployment_id).await?;

        if !self.state.acquire_execution_lease(deployment_id).await? {
            return Err(GantryError::ExecutionInFlight {
                deployment_id: deployment_id.to_string(),
            });
        }

        let result = tokio::time::timeout(
            self.config.deployment_timeout(),
            self.execute_inner(host, &mut deployment),
        )
        .await;

        match result {
            Ok(Ok(())) => {
                metrics::counter!("gantry_deployments_total", "outcome" => "ok").increment(1);
            }
            Ok(Err(e)) => {
                metrics::counter!("gantry_deployments_total", "outcome" => "error")
                    .increment(1);
                self.fail(host, &mut deployment, render_error(&e)).await;
            }
            Err(_) => {
                metrics::counter!("gantry_deployments_total", "outcome" => "timeout")
                    .increment(1);
                let minutes = self.config.deployment_timeout_minutes;
                self.fail(
                    host,
                    &mut deployment,
                    render_error(&GantryError::DeploymentTimeout { minutes }),
                )
                .await;
            }
        }

        self.state.release_execution_lease(deployment_id).await?;
        self.state.get_deployment(deployment_id).await
    }

    async fn execute_inner(&self, host: &Host, deployment: &mut Deployment) -> Result<()> {
        if !deployment.transition(DeploymentStatus::Validating) {
            return Err(GantryError::Internal(format!(
                "Deployment {} cannot start from status {}",
                deployment.id, deployment.status
            )));
        }
        deployment.set_progress(5, "validating stack");
        self.persist(deployment).await?;

        let (compose_text, env_text) = self.stacks.read(&deployment.stack_name).await?;
        let variables = parse_env_text(env_text.as_deref());
        let stack = StackValidator::validate(&compose_text, &variables)?;
        let plan = StackOrchestrator::plan(&stack, &deployment.stack_name)?;

        match &host.connection {
            HostConnection::Agent { agent_id } => {
                // Port occupancy on the remote host is unknown here; the
                // audit still gates everything configuration-borne.
                self.security_gate(&plan, &[])?;
                self.run_agent(agent_id, deployment, &compose_text, &variables).await
            }
            _ => self.run_direct(host, deployment, plan).await,
        }
    }

    // ========================
    // Direct path
    // ========================

    async fn run_direct(
        &self,
        host: &Host,
        deployment: &mut Deployment,
        plan: DeployPlan,
    ) -> Result<()> {
        let connector = self.connectors.connector_for(host).await?;
        connector.ping().await?;

        // Port occupancy is advisory audit input; an unreachable listing
        // must not fail the audit itself.
        let ports_in_use = match connector.ports_in_use().await {
            Ok(ports) => ports,
            Err(e) => {
                warn!(error = %e, "Could not list host ports; auditing without them");
                Vec::new()
            }
        };
        self.security_gate(&plan, &ports_in_use)?;

        self.ensure_resources(&connector, &plan).await?;

        let total = plan.total_services();
        let mut per_service: HashMap<String, u8> = HashMap::new();

        // Pull phase
        if !deployment.transition(DeploymentStatus::PullingImage) {
            return Err(GantryError::Internal("illegal transition to pulling".into()));
        }
        for step in plan.waves.iter().flatten() {
            deployment.set_progress(
                overall_progress(&per_service, total),
                format!("pulling {}", step.plan.image),
            );
            self.persist(deployment).await?;

            connector.pull_image(&step.plan.image, None, None).await?;
            per_service
                .insert(step.service.clone(), ServiceStage::Pull.completed_percent());
        }

        // Create phase: wave by wave, concurrently within a wave. Containers
        // exist on the host after this but have not run yet, so a failure
        // here still rolls the created set back.
        if !deployment.transition(DeploymentStatus::Creating) {
            return Err(GantryError::Internal("illegal transition to creating".into()));
        }
        deployment.set_progress(overall_progress(&per_service, total), "creating containers");
        self.persist(deployment).await?;

        let mut created: Vec<(ServiceStep, String)> = Vec::new();
        for wave in &plan.waves {
            let results = futures::future::join_all(wave.iter().map(|step| {
                let connector = connector.clone();
                async move {
                    let id = connector.create_container(&step.plan).await?;
                    for attachment in &step.connects {
                        connector.connect_network(&id, attachment).await?;
                    }
                    Ok::<_, GantryError>((step.clone(), id))
                }
            }))
            .await;

            for result in results {
                match result {
                    Ok((step, container_id)) => {
                        info!(
                            service = %step.service,
                            container_id = %container_id,
                            "Container created"
                        );
                        per_service.insert(
                            step.service.clone(),
                            ServiceStage::Create.completed_percent(),
                        );
                        created.push((step, container_id));
                    }
                    Err(e) => {
                        self.rollback_created(&connector, deployment, &created).await;
                        return Err(e);
                    }
                }
            }

            deployment
                .set_progress(overall_progress(&per_service, total), "creating containers");
            self.persist(deployment).await?;
        }

        // Commitment point: the whole container set is real now. Links and
        // metadata land in one transaction; from here on containers may
        // start and accumulate state, so rollback is off for good.
        deployment.mark_committed();
        self.record_created(deployment, &created).await?;

        // Start phase: waves again, so dependencies are up before dependents.
        if !deployment.transition(DeploymentStatus::Starting) {
            return Err(GantryError::Internal("illegal transition to starting".into()));
        }
        self.persist(deployment).await?;

        let mut outcomes: Vec<ServiceOutcome> = Vec::new();
        for wave in &plan.waves {
            let wave_results = futures::future::join_all(wave.iter().map(|step| {
                let connector = connector.clone();
                let health_timeout = self.config.health_timeout();
                let container_id = created
                    .iter()
                    .find(|(s, _)| s.service == step.service)
                    .map(|(_, id)| id.clone());
                async move {
                    let Some(container_id) = container_id else {
                        return ServiceOutcome {
                            service: step.service.clone(),
                            container_id: None,
                            error: Some("container was never created".to_string()),
                        };
                    };

                    let result = start_and_settle(
                        connector.as_ref(),
                        &container_id,
                        step.has_healthcheck(),
                        health_timeout,
                    )
                    .await;

                    let error = match result {
                        Ok(()) => None,
                        Err(e) => Some(
                            describe_service_failure(connector.as_ref(), &container_id, &e)
                                .await,
                        ),
                    };

                    ServiceOutcome {
                        service: step.service.clone(),
                        container_id: Some(container_id),
                        error,
                    }
                }
            }))
            .await;

            for outcome in &wave_results {
                let stage = if outcome.succeeded() {
                    ServiceStage::Health.completed_percent()
                } else {
                    ServiceStage::Start.completed_percent()
                };
                per_service.insert(outcome.service.clone(), stage);
            }
            deployment
                .set_progress(overall_progress(&per_service, total), "starting services");
            self.persist(deployment).await?;

            outcomes.extend(wave_results);
        }

        self.settle_outcome(deployment, &outcomes).await
    }

    /// Audit every service plan; abort when any critical violation exists.
    fn security_gate(&self, plan: &DeployPlan, ports_in_use: &[u16]) -> Result<()> {
        let mut all = Vec::new();
        for step in plan.waves.iter().flatten() {
            let violations = PolicyEngine::audit(&step.plan, ports_in_use);
            for violation in &violations {
                if violation.severity < gantry_core::security::Severity::Critical {
                    info!(service = %step.service, %violation, "Security advisory");
                }
            }
            all.extend(violations);
        }

        if PolicyEngine::blocks(&all) {
            metrics::counter!("gantry_security_blocks_total").increment(1);
            return Err(GantryError::SecurityBlocked { violations: all });
        }
        Ok(())
    }

    /// Create non-external networks and volumes; verify external ones exist.
    async fn ensure_resources(
        &self,
        connector: &Arc<dyn HostConnector>,
        plan: &DeployPlan,
    ) -> Result<()> {
        let existing_networks = connector.list_networks().await?;
        for network in &plan.networks {
            if network.external {
                if !existing_networks.contains(&network.name) {
                    return Err(GantryError::ExternalNetworkMissing {
                        network: network.name.clone(),
                    });
                }
            } else if !existing_networks.contains(&network.name) {
                connector.create_network(network).await?;
            }
        }

        let existing_volumes = connector.list_volumes().await?;
        for volume in &plan.volumes {
            if volume.external {
                if !existing_volumes.contains(&volume.name) {
                    return Err(GantryError::ExternalVolumeMissing {
                        volume: volume.name.clone(),
                    });
                }
            } else if !existing_volumes.contains(&volume.name) {
                connector.create_volume(volume).await?;
            }
        }

        Ok(())
    }

    /// Persist the commitment: container set plus metadata, one transaction.
    async fn record_created(
        &self,
        deployment: &Deployment,
        created: &[(ServiceStep, String)],
    ) -> Result<()> {
        let containers: Vec<DeploymentContainer> = created
            .iter()
            .map(|(step, id)| DeploymentContainer {
                deployment_id: deployment.id.clone(),
                container_id: id.clone(),
                service_name: Some(step.service.clone()),
            })
            .collect();

        let metadata: Vec<DeploymentMetadata> = created
            .iter()
            .map(|(step, id)| DeploymentMetadata {
                host_id: deployment.host_id.clone(),
                container_id: id.clone(),
                managed: true,
                deployment_id: Some(deployment.id.clone()),
                service_name: Some(step.service.clone()),
            })
            .collect();

        self.state.record_commitment(&deployment.id, &containers, &metadata).await
    }

    /// Translate per-service outcomes into the deployment's terminal state.
    async fn settle_outcome(
        &self,
        deployment: &mut Deployment,
        outcomes: &[ServiceOutcome],
    ) -> Result<()> {
        let failed: Vec<&ServiceOutcome> =
            outcomes.iter().filter(|o| !o.succeeded()).collect();

        if failed.is_empty() {
            deployment.transition(DeploymentStatus::Running);
            deployment.set_progress(100, "running");
            deployment.error = None;
            self.persist(deployment).await?;
            info!(deployment_id = %deployment.id, "Deployment running");
            return Ok(());
        }

        if failed.len() == outcomes.len() {
            // Nothing came up; this is a plain failure.
            return Err(GantryError::HostOperation {
                operation: "start".to_string(),
                reason: enumerate_outcomes(outcomes),
            });
        }

        // Mixed outcome: keep what works, report what does not.
        deployment.transition(DeploymentStatus::Partial);
        deployment.set_progress(overall_percent_of(outcomes), "partially running");
        deployment.error = Some(enumerate_outcomes(outcomes));
        self.persist(deployment).await?;
        warn!(
            deployment_id = %deployment.id,
            failed = failed.len(),
            total = outcomes.len(),
            "Deployment partially succeeded"
        );
        Ok(())
    }

    // ========================
    // Agent path
    // ========================

    /// Hand the whole compose text to the agent in one round trip, then
    /// track asynchronous progress and completion events.
    async fn run_agent(
        &self,
        agent_id: &str,
        deployment: &mut Deployment,
        compose_text: &str,
        variables: &HashMap<String, String>,
    ) -> Result<()> {
        let client = self.connectors.agent_client(agent_id).await?;
        let mut events = client.watch_deployment(&deployment.id).await;

        let payload = DeployComposePayload {
            deployment_id: deployment.id.clone(),
            project_name: deployment.stack_name.clone(),
            compose_content: compose_text.to_string(),
            environment: variables.clone(),
            action: "up".to_string(),
            profiles: Vec::new(),
            wait_for_healthy: true,
            health_timeout: self.config.health_timeout_seconds,
            registry_credentials: None,
        };

        // Command acceptance; completion arrives as events below.
        let accept = client.request(AgentCommand::DeployCompose(payload)).await;
        if let Err(e) = accept {
            client.unwatch_deployment(&deployment.id).await;
            return Err(e);
        }

        loop {
            match events.recv().await {
                Some(AgentEvent::DeployProgress { stage, message, .. }) => {
                    if let Some(status) = agent_stage_status(&stage) {
                        self.advance_to(deployment, status);
                    }
                    if stage == "creating" {
                        // The agent has begun materializing resources.
                        deployment.mark_committed();
                    }
                    deployment.set_progress(agent_stage_percent(&stage), message);
                    self.persist(deployment).await?;
                }
                Some(AgentEvent::DeployComplete {
                    success,
                    partial_success,
                    services,
                    failed_services,
                    error,
                    ..
                }) => {
                    client.unwatch_deployment(&deployment.id).await;
                    deployment.mark_committed();
                    self.record_agent_services(deployment, &services).await?;

                    if success {
                        self.advance_to(deployment, DeploymentStatus::Running);
                        deployment.set_progress(100, "running");
                        deployment.error = None;
                        self.persist(deployment).await?;
                        return Ok(());
                    }

                    if partial_success {
                        self.advance_to(deployment, DeploymentStatus::Starting);
                        deployment.transition(DeploymentStatus::Partial);
                        deployment.set_progress(deployment.progress, "partially running");
                        deployment.error = Some(format!(
                            "failed services: [{}]{}",
                            failed_services.join(", "),
                            error.map(|e| format!("; {}", e)).unwrap_or_default()
                        ));
                        self.persist(deployment).await?;
                        return Ok(());
                    }

                    return Err(GantryError::AgentCommand {
                        command: "deploy_compose".to_string(),
                        reason: error.unwrap_or_else(|| "deployment failed".to_string()),
                    });
                }
                None => {
                    // Channel closed before completion: the agent is gone.
                    // Failing now beats waiting out the global timeout.
                    client.unwatch_deployment(&deployment.id).await;
                    return Err(GantryError::AgentUnavailable {
                        agent_id: agent_id.to_string(),
                    });
                }
            }
        }
    }

    /// Record the containers an agent deployment reported.
    async fn record_agent_services(
        &self,
        deployment: &Deployment,
        services: &HashMap<String, String>,
    ) -> Result<()> {
        if services.is_empty() {
            return Ok(());
        }

        let mut names: Vec<&String> = services.keys().collect();
        names.sort();

        let containers: Vec<DeploymentContainer> = names
            .iter()
            .map(|name| DeploymentContainer {
                deployment_id: deployment.id.clone(),
                container_id: gantry_core::hosts::short_id(&services[*name]),
                service_name: Some((*name).clone()),
            })
            .collect();
        let metadata: Vec<DeploymentMetadata> = containers
            .iter()
            .map(|c| DeploymentMetadata {
                host_id: deployment.host_id.clone(),
                container_id: c.container_id.clone(),
                managed: true,
                deployment_id: Some(deployment.id.clone()),
                service_name: c.service_name.clone(),
            })
            .collect();

        self.state.record_commitment(&deployment.id, &containers, &metadata).await
    }

    /// Walk the linear lifecycle up to `target`, skipping stages the agent
    /// did not report.
    fn advance_to(&self, deployment: &mut Deployment, target: DeploymentStatus) {
        const CHAIN: [DeploymentStatus; 5] = [
            DeploymentStatus::Validating,
            DeploymentStatus::PullingImage,
            DeploymentStatus::Creating,
            DeploymentStatus::Starting,
            DeploymentStatus::Running,
        ];

        let Some(target_idx) = CHAIN.iter().position(|s| *s == target) else {
            return;
        };
        let current_idx = CHAIN.iter().position(|s| *s == deployment.status);

        if let Some(current_idx) = current_idx {
            for status in CHAIN.iter().skip(current_idx + 1).take(target_idx.saturating_sub(current_idx)) {
                deployment.transition(*status);
            }
        }
    }

    // ========================
    // Failure handling
    // ========================

    /// Mark the deployment failed, then evaluate rollback.
    async fn fail(&self, host: &Host, deployment: &mut Deployment, error_text: String) {
        error!(deployment_id = %deployment.id, error = %error_text, "Deployment failed");

        if deployment.transition(DeploymentStatus::Failed) {
            deployment.stage = "failed".to_string();
        }
        deployment.error = Some(error_text);
        if let Err(e) = self.persist(deployment).await {
            error!(deployment_id = %deployment.id, error = %e, "Could not persist failure");
        }

        if !deployment.rollback_permitted() {
            if deployment.commitment.is_committed() {
                info!(
                    deployment_id = %deployment.id,
                    "Rollback suppressed: deployment is committed"
                );
            }
            return;
        }

        // Anything linked in storage is fair game pre-commitment (e.g. a
        // crash-recovered execution); with nothing linked there is nothing
        // to roll back and the deployment simply stays failed.
        let linked = match self.state.containers_for(&deployment.id).await {
            Ok(linked) => linked,
            Err(e) => {
                warn!(deployment_id = %deployment.id, error = %e, "Could not list linked containers");
                return;
            }
        };
        if linked.is_empty() {
            return;
        }

        match self.connectors.connector_for(host).await {
            Ok(connector) => {
                let ids: Vec<String> =
                    linked.iter().map(|c| c.container_id.clone()).collect();
                self.remove_in_reverse(&connector, &ids).await;
                if let Err(e) = self.state.replace_containers(&deployment.id, &[]).await {
                    warn!(deployment_id = %deployment.id, error = %e, "Could not clear container links");
                }
                self.finish_rollback(deployment).await;
            }
            Err(e) => {
                warn!(deployment_id = %deployment.id, error = %e, "No connector for rollback");
            }
        }
    }

    /// Roll back containers created during this execution, before any links
    /// were committed. Marks the deployment failed first so the transition
    /// into rolled_back is legal, then destroys the created set in reverse
    /// creation order.
    async fn rollback_created(
        &self,
        connector: &Arc<dyn HostConnector>,
        deployment: &mut Deployment,
        created: &[(ServiceStep, String)],
    ) {
        deployment.transition(DeploymentStatus::Failed);
        if !deployment.rollback_permitted() {
            return;
        }

        let ids: Vec<String> = created.iter().map(|(_, id)| id.clone()).collect();
        self.remove_in_reverse(connector, &ids).await;
        self.finish_rollback(deployment).await;
    }

    /// Stop and force-remove containers in reverse creation order.
    async fn remove_in_reverse(&self, connector: &Arc<dyn HostConnector>, ids: &[String]) {
        metrics::counter!("gantry_rollbacks_total").increment(1);
        warn!(count = ids.len(), "Rolling back created containers");

        for container_id in ids.iter().rev() {
            if let Err(e) =
                connector.stop_container(container_id, ROLLBACK_STOP_TIMEOUT).await
            {
                warn!(container_id = %container_id, error = %e, "Stop during rollback failed");
            }
            if let Err(e) = connector.remove_container(container_id, true).await {
                warn!(container_id = %container_id, error = %e, "Remove during rollback failed");
            }
        }
    }

    async fn finish_rollback(&self, deployment: &mut Deployment) {
        deployment.transition(DeploymentStatus::RolledBack);
        deployment.stage = "rolled back".to_string();
        if let Err(e) = self.persist(deployment).await {
            warn!(deployment_id = %deployment.id, error = %e, "Could not persist rollback");
        }
        info!(deployment_id = %deployment.id, "Rollback complete");
    }

    /// Persist the deployment and broadcast its new state.
    async fn persist(&self, deployment: &Deployment) -> Result<()> {
        self.state.update_deployment(deployment).await?;
        self.events.publish_deployment(deployment);
        Ok(())
    }
}

/// Start one container and wait for it to settle.
async fn start_and_settle(
    connector: &dyn HostConnector,
    container_id: &str,
    has_healthcheck: bool,
    health_timeout: Duration,
) -> Result<()> {
    connector.start_container(container_id).await?;

    let healthy =
        connector.wait_healthy(container_id, has_healthcheck, health_timeout).await?;
    if !healthy {
        return Err(GantryError::HostOperation {
            operation: "wait_healthy".to_string(),
            reason: "container did not become healthy".to_string(),
        });
    }
    Ok(())
}

/// Describe a service failure, attaching the tail of the container's logs
/// when the backend can produce it.
async fn describe_service_failure(
    connector: &dyn HostConnector,
    container_id: &str,
    error: &GantryError,
) -> String {
    let rendered = render_error(error);
    match connector.container_logs(container_id, 5).await {
        Ok(logs) if !logs.trim().is_empty() => {
            format!("{} (last log lines: {})", rendered, logs.trim().replace('\n', " | "))
        }
        _ => rendered,
    }
}

/// Render an error for the deployment row: human-readable, never a raw
/// internal dump.
fn render_error(error: &GantryError) -> String {
    match error {
        GantryError::SecurityBlocked { violations } => {
            let lines: Vec<String> = violations
                .iter()
                .filter(|v| v.severity == gantry_core::security::Severity::Critical)
                .map(|v| v.to_string())
                .collect();
            format!("blocked by security policy: {}", lines.join("; "))
        }
        other => other.to_string(),
    }
}

/// Enumerate per-service outcomes for the deployment's error text.
fn enumerate_outcomes(outcomes: &[ServiceOutcome]) -> String {
    let mut parts: Vec<String> = outcomes
        .iter()
        .map(|o| match &o.error {
            None => format!("{}: ok", o.service),
            Some(e) => format!("{}: failed: {}", o.service, e),
        })
        .collect();
    parts.sort();
    parts.join("; ")
}

fn overall_percent_of(outcomes: &[ServiceOutcome]) -> u8 {
    if outcomes.is_empty() {
        return 100;
    }
    let ok = outcomes.iter().filter(|o| o.succeeded()).count();
    ((ok * 100) / outcomes.len()) as u8
}

/// Parse `.env` text into a substitution map. Lines are `KEY=value`;
/// blanks and `#` comments are skipped.
fn parse_env_text(env_text: Option<&str>) -> HashMap<String, String> {
    let mut variables = HashMap::new();
    let Some(text) = env_text else {
        return variables;
    };

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            variables.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    variables
}

/// Map agent progress stages onto lifecycle states.
fn agent_stage_status(stage: &str) -> Option<DeploymentStatus> {
    match stage {
        "pulling" => Some(DeploymentStatus::PullingImage),
        "creating" => Some(DeploymentStatus::Creating),
        "starting" => Some(DeploymentStatus::Starting),
        _ => None,
    }
}

/// Coarse progress figure per agent stage.
fn agent_stage_percent(stage: &str) -> u8 {
    match stage {
        "validating" => 10,
        "pulling" => 35,
        "creating" => 60,
        "starting" => 80,
        "healthcheck" => 90,
        _ => 50,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_text() {
        let vars = parse_env_text(Some("TAG=1.27\n# comment\n\nMODE = prod\nBROKEN\n"));
        assert_eq!(vars.get("TAG"), Some(&"1.27".to_string()));
        assert_eq!(vars.get("MODE"), Some(&"prod".to_string()));
        assert_eq!(vars.len(), 2);
        assert!(parse_env_text(None).is_empty());
    }

    #[test]
    fn test_enumerate_outcomes() {
        let outcomes = vec![
            ServiceOutcome {
                service: "web".to_string(),
                container_id: Some("aaa".to_string()),
                error: None,
            },
            ServiceOutcome {
                service: "worker".to_string(),
                container_id: Some("bbb".to_string()),
                error: Some("exited with code 1".to_string()),
            },
        ];
        let text = enumerate_outcomes(&outcomes);
        assert!(text.contains("web: ok"));
        assert!(text.contains("worker: failed: exited with code 1"));
    }

    #[test]
    fn test_agent_stage_mapping() {
        assert_eq!(agent_stage_status("pulling"), Some(DeploymentStatus::PullingImage));
        assert_eq!(agent_stage_status("starting"), Some(DeploymentStatus::Starting));
        assert_eq!(agent_stage_status("weird"), None);
        assert!(agent_stage_percent("starting") > agent_stage_percent("pulling"));
    }

    #[test]
    fn test_render_error_summarizes_security_block() {
        use gantry_core::security::{Severity, SecurityViolation};
        let err = GantryError::SecurityBlocked {
            violations: vec![
                SecurityViolation::new(Severity::Critical, "privileged", "privileged mode"),
                SecurityViolation::new(Severity::Low, "image", "unpinned"),
            ],
        };
        let text = render_error(&err);
        assert!(text.contains("privileged"));
        assert!(!text.contains("unpinned"));
    }
}
