//! Core metric registration.

use metrics::describe_counter;

/// Register descriptions for the counters Gantry emits.
pub fn register_core_metrics() {
    describe_counter!(
        "gantry_db_errors_total",
        "Database operation failures, labeled by operation"
    );
    describe_counter!(
        "gantry_host_errors_total",
        "Host backend operation failures, labeled by backend"
    );
    describe_counter!(
        "gantry_deployments_total",
        "Deployment executions, labeled by outcome"
    );
    describe_counter!(
        "gantry_rollbacks_total",
        "Automatic rollback attempts"
    );
    describe_counter!(
        "gantry_security_blocks_total",
        "Deployments blocked by critical security violations"
    );
}
