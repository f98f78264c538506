//! Cluster resource API.
//!
//! The sandbox lifecycle only needs three pod calls, expressed by [`PodApi`].
//! [`KubeClient`] implements them over HTTPS and also owns the HTTP/1.1 client
//! used to upgrade exec connections.

mod client;
mod pod;

pub use client::KubeClient;
pub use pod::{
    Container, HostPathVolumeSource, ObjectMeta, Pod, PodCondition, PodPhase, PodSpec, PodStatus,
    SecurityContext, Status, StatusCause, StatusDetails, Volume, VolumeMount,
};

use async_trait::async_trait;

use crate::error::ClusterError;

/// Pod operations used by the sandbox lifecycle.
#[async_trait]
pub trait PodApi: Send + Sync {
    /// Submits a pod manifest. Does not wait for scheduling.
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ClusterError>;

    /// Reads the current state of a pod.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError>;

    /// Deletes a pod. A pod that is already gone is not an error.
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
}
