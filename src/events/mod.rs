//! Kubernetes events about bindings.
//!
//! Events are observability only: the binding's status stays the single source of truth,
//! and a failure to emit an event never fails a reconciliation.

pub mod types;

mod recorder;

pub use recorder::EventRecorder;
pub use types::BindingEventReason;
pub use types::EventData;
pub use types::EventType;

use async_trait::async_trait;

use crate::binding::ServiceBinding;
use crate::error::Result;

#[async_trait]
pub trait EmitEvent: Send + Sync {
    /// Try to emit an event, returning any errors.
    async fn try_emit(&self, binding: &ServiceBinding, event: EventData) -> Result<()>;

    /// Emit an event, logging but not propagating errors.
    async fn emit(&self, binding: &ServiceBinding, event: EventData) {
        let reason = event.reason;
        if let Err(e) = self.try_emit(binding, event).await {
            tracing::warn!(error = %e, reason = %reason, "Failed to emit event");
        }
    }
}

/// Drops every event, for deployments that don't want them.
pub struct NoopEventRecorder;

#[async_trait]
impl EmitEvent for NoopEventRecorder {
    async fn try_emit(&self, _binding: &ServiceBinding, _event: EventData) -> Result<()> {
        Ok(())
    }
}
