//! Opaque handles returned by provisioners.
//!
//! Downstream provisioners receive upstream resources only through these
//! immutable identifiers, never through shared mutable objects.

use deckhand_core::ResourceId;
use serde::{Deserialize, Serialize};

macro_rules! handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(ResourceId);

            impl $name {
                pub(crate) fn new(id: ResourceId) -> Self {
                    Self(id)
                }

                pub fn id(&self) -> &ResourceId {
                    &self.0
                }
            }
        )*
    };
}

handle!(
    /// Virtual network.
    VpcHandle,
    /// Traffic-control group.
    SecurityGroupHandle,
    /// Subnet group hosting the database.
    SubnetGroupHandle,
    /// Managed database cluster.
    ClusterHandle,
    /// Credential secret of the database cluster.
    SecretHandle,
    /// Migration function.
    FunctionHandle,
    /// Run-once migration trigger.
    TriggerHandle,
    /// Container cluster.
    ComputeClusterHandle,
    /// Auto-scaling capacity group.
    CapacityGroupHandle,
    /// Task definition of the application workload.
    TaskDefinitionHandle,
    /// Scheduled application service.
    ServiceHandle,
    /// Public load balancer.
    LoadBalancerHandle,
    /// Target group in front of the service.
    TargetGroupHandle,
    /// HTTPS listener.
    ListenerHandle,
);
