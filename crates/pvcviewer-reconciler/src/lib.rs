//! PVC Viewer Reconciler - The charm's reconciliation logic
//!
//! Components run in dependency order on every Juju event:
//! leadership gate, Kubernetes resources, service mesh, then the workload
//! service in the Pebble-managed container. Each reports a `Status`; the
//! chain publishes the worst one.

pub mod certs;
pub mod chain;
pub mod charm;
pub mod component;
pub mod error;
pub mod kubernetes;
pub mod leadership;
pub mod mesh;
pub mod metrics;
pub mod resources;
pub mod templates;
pub mod workload;

// Re-export commonly used types
pub use certs::CertificateBundle;
pub use chain::{ChainReport, ComponentStatus, ReconcilerChain};
pub use charm::{Charm, CharmConfig, Collaborators};
pub use component::Component;
pub use error::{ReconcileError, Result};
pub use kubernetes::{KubernetesResources, KubernetesResourcesConfig};
pub use leadership::LeadershipGate;
pub use mesh::{GatewayMetadata, ServiceMesh, ServiceMeshConfig};
pub use metrics::MetricsEndpointProvider;
pub use resources::{ApplyOutcome, ResourceHandler};
pub use workload::{WorkloadPlan, WorkloadService, WorkloadServiceConfig};
