use crate::error::Result;
use async_trait::async_trait;
use pvcviewer_core::Status;

/// A unit of reconciliation logic registered with the `ReconcilerChain`
///
/// The chain only calls `reconcile` when every dependency reported Active
/// in the same pass, so implementations never check upstream state.
#[async_trait]
pub trait Component: Send + Sync {
    /// Unique name, used for dependency edges and status messages
    fn name(&self) -> &str;

    /// Converge observed state to desired state. Must be idempotent.
    async fn reconcile(&self) -> Result<()>;

    /// Current health, evaluated after `reconcile`
    async fn status(&self) -> Status;

    /// Tear down what `reconcile` created
    async fn remove(&self) -> Result<()> {
        Ok(())
    }
}
