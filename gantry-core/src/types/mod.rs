//! Shared domain types.

pub mod container;
pub mod deployment;
pub mod host;

pub use container::{
    BindMount, ContainerPlan, ContainerStatus, DeviceMapping, HealthcheckSpec, NamedVolumeMount,
    NetworkAttachment, NetworkPlan, PortBinding, Protocol, PullProgress, RegistryAuth,
    RestartPolicy, VolumePlan,
};
pub use deployment::{
    Commitment, Deployment, DeploymentContainer, DeploymentMetadata, DeploymentStatus,
};
pub use host::{Host, HostConnection, TlsPaths};
