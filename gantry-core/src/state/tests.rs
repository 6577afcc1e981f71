use crate::error::GantryError;
use crate::state::StateManager;
use crate::types::{Deployment, DeploymentContainer, DeploymentMetadata, DeploymentStatus};

fn deployment(host: &str, stack: &str) -> Deployment {
    Deployment::new(host, stack, true)
}

#[tokio::test]
async fn test_state_manager_init() {
    let manager = StateManager::new_in_memory().await.unwrap();
    drop(manager);
}

#[tokio::test]
async fn test_insert_and_get_deployment() {
    let manager = StateManager::new_in_memory().await.unwrap();

    let d = deployment("host-1", "web");
    manager.insert_deployment(&d).await.unwrap();

    let retrieved = manager.get_deployment(&d.id).await.unwrap();
    assert_eq!(retrieved.id, d.id);
    assert_eq!(retrieved.host_id, "host-1");
    assert_eq!(retrieved.stack_name, "web");
    assert_eq!(retrieved.status, DeploymentStatus::Planning);
    assert!(!retrieved.commitment.is_committed());
    assert!(retrieved.rollback_on_failure);
}

#[tokio::test]
async fn test_get_missing_deployment() {
    let manager = StateManager::new_in_memory().await.unwrap();
    let err = manager.get_deployment("nope").await.unwrap_err();
    assert!(matches!(err, GantryError::DeploymentNotFound { .. }));
}

#[tokio::test]
async fn test_update_deployment_lifecycle_columns() {
    let manager = StateManager::new_in_memory().await.unwrap();

    let mut d = deployment("host-1", "web");
    manager.insert_deployment(&d).await.unwrap();

    d.transition(DeploymentStatus::Validating);
    d.set_progress(35, "pulling nginx:1.27");
    d.mark_committed();
    manager.update_deployment(&d).await.unwrap();

    let retrieved = manager.get_deployment(&d.id).await.unwrap();
    assert_eq!(retrieved.status, DeploymentStatus::Validating);
    assert_eq!(retrieved.progress, 35);
    assert_eq!(retrieved.stage, "pulling nginx:1.27");
    assert!(retrieved.commitment.is_committed());
    assert!(retrieved.started_at.is_some());
}

#[tokio::test]
async fn test_list_deployments_for_host() {
    let manager = StateManager::new_in_memory().await.unwrap();

    for (host, stack) in [("host-1", "web"), ("host-1", "db"), ("host-2", "web")] {
        manager.insert_deployment(&deployment(host, stack)).await.unwrap();
    }

    assert_eq!(manager.list_deployments().await.unwrap().len(), 3);
    assert_eq!(manager.list_deployments_for_host("host-1").await.unwrap().len(), 2);
    assert_eq!(manager.list_deployments_for_host("host-2").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_execution_lease_is_exclusive() {
    let manager = StateManager::new_in_memory().await.unwrap();

    let d = deployment("host-1", "web");
    manager.insert_deployment(&d).await.unwrap();

    assert!(manager.acquire_execution_lease(&d.id).await.unwrap());
    assert!(!manager.acquire_execution_lease(&d.id).await.unwrap());

    manager.release_execution_lease(&d.id).await.unwrap();
    assert!(manager.acquire_execution_lease(&d.id).await.unwrap());
}

#[tokio::test]
async fn test_containers_replaced_as_whole_set() {
    let manager = StateManager::new_in_memory().await.unwrap();

    let d = deployment("host-1", "web");
    manager.insert_deployment(&d).await.unwrap();

    let first = vec![
        DeploymentContainer {
            deployment_id: d.id.clone(),
            container_id: "aaaaaaaaaaaa".to_string(),
            service_name: Some("web".to_string()),
        },
        DeploymentContainer {
            deployment_id: d.id.clone(),
            container_id: "bbbbbbbbbbbb".to_string(),
            service_name: Some("db".to_string()),
        },
    ];
    manager.replace_containers(&d.id, &first).await.unwrap();

    let listed = manager.containers_for(&d.id).await.unwrap();
    assert_eq!(listed.len(), 2);
    // Creation order preserved
    assert_eq!(listed[0].container_id, "aaaaaaaaaaaa");
    assert_eq!(listed[1].container_id, "bbbbbbbbbbbb");

    // Redeploy replaces the set atomically, never partially
    let second = vec![DeploymentContainer {
        deployment_id: d.id.clone(),
        container_id: "cccccccccccc".to_string(),
        service_name: Some("web".to_string()),
    }];
    manager.replace_containers(&d.id, &second).await.unwrap();

    let listed = manager.containers_for(&d.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].container_id, "cccccccccccc");
}

#[tokio::test]
async fn test_record_commitment_sets_flag_and_rows_together() {
    let manager = StateManager::new_in_memory().await.unwrap();

    let d = deployment("host-1", "web");
    manager.insert_deployment(&d).await.unwrap();

    let containers = vec![DeploymentContainer {
        deployment_id: d.id.clone(),
        container_id: "aaaaaaaaaaaa".to_string(),
        service_name: Some("web".to_string()),
    }];
    let metadata = vec![DeploymentMetadata {
        host_id: "host-1".to_string(),
        container_id: "aaaaaaaaaaaa".to_string(),
        managed: true,
        deployment_id: Some(d.id.clone()),
        service_name: Some("web".to_string()),
    }];

    manager.record_commitment(&d.id, &containers, &metadata).await.unwrap();

    let retrieved = manager.get_deployment(&d.id).await.unwrap();
    assert!(retrieved.commitment.is_committed());
    assert_eq!(manager.containers_for(&d.id).await.unwrap().len(), 1);
    let meta = manager.get_metadata("host-1", "aaaaaaaaaaaa").await.unwrap().unwrap();
    assert!(meta.managed);
    assert_eq!(meta.deployment_id.as_deref(), Some(d.id.as_str()));
}

#[tokio::test]
async fn test_metadata_survives_deployment_deletion() {
    let manager = StateManager::new_in_memory().await.unwrap();

    let d = deployment("host-1", "web");
    manager.insert_deployment(&d).await.unwrap();

    let containers = vec![DeploymentContainer {
        deployment_id: d.id.clone(),
        container_id: "aaaaaaaaaaaa".to_string(),
        service_name: Some("web".to_string()),
    }];
    let metadata = vec![DeploymentMetadata {
        host_id: "host-1".to_string(),
        container_id: "aaaaaaaaaaaa".to_string(),
        managed: true,
        deployment_id: Some(d.id.clone()),
        service_name: Some("web".to_string()),
    }];
    manager.record_commitment(&d.id, &containers, &metadata).await.unwrap();

    manager.delete_deployment(&d.id).await.unwrap();

    // Container links cascade away with the row
    assert!(manager.containers_for(&d.id).await.unwrap().is_empty());
    // The weak metadata association stays
    let meta = manager.get_metadata("host-1", "aaaaaaaaaaaa").await.unwrap();
    assert!(meta.is_some());
}

#[tokio::test]
async fn test_metadata_upsert_overwrites() {
    let manager = StateManager::new_in_memory().await.unwrap();

    let mut entry = DeploymentMetadata {
        host_id: "host-1".to_string(),
        container_id: "aaaaaaaaaaaa".to_string(),
        managed: true,
        deployment_id: Some("d-1".to_string()),
        service_name: Some("web".to_string()),
    };
    manager.upsert_metadata(&entry).await.unwrap();

    entry.deployment_id = Some("d-2".to_string());
    manager.upsert_metadata(&entry).await.unwrap();

    let meta = manager.get_metadata("host-1", "aaaaaaaaaaaa").await.unwrap().unwrap();
    assert_eq!(meta.deployment_id.as_deref(), Some("d-2"));

    assert_eq!(manager.metadata_for_deployment("d-2").await.unwrap().len(), 1);
    assert!(manager.metadata_for_deployment("d-1").await.unwrap().is_empty());
}
