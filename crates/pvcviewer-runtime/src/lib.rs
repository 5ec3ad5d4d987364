// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod api_client;
pub mod command;
pub mod error;
pub mod hook_tools;
pub mod mock;
pub mod pebble;
pub mod traits;
pub mod types;

// Re-export primary types
pub use error::{FailureClass, Result, RuntimeError};
pub use traits::{ClusterClient, UnitContext, WorkloadContainer};
pub use types::{Layer, Relation, ServiceInfo, ServiceSpec, ServiceState, Startup};

// Re-export collaborator implementations
pub use api_client::{ApiClient, ApiClientConfig};
pub use hook_tools::HookTools;
pub use mock::{MockCluster, MockContainer, MockUnit};
pub use pebble::PebbleClient;
