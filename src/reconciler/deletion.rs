use kube::runtime::controller::Action;

use super::BindingReconciler;
use crate::binding::BindingIdentity;
use crate::binding::BindingState;
use crate::binding::ServiceBinding;
use crate::error::Result;
use crate::events::BindingEventReason;
use crate::events::EmitEvent;
use crate::events::EventData;
use crate::k8s::BindingStore;
use crate::target::Operation;
use crate::ObserveGeneration;

impl<S, E> BindingReconciler<S, E>
where
    S: BindingStore,
    E: EmitEvent,
{
    /// Tears down the binding's sub-resources and releases the finalizer.
    ///
    /// Whether the infrastructure is gone and whether the unbind succeeded are tracked
    /// separately: the finalizer goes once either holds, so a stuck unbind can't block cleanup
    /// of resources that are already deleted. Retries stop once the unbind is `failed`.
    #[tracing::instrument(name = "binding.deletion", skip_all, fields(binding = %identity.binding_id))]
    pub(super) async fn handle_deletion(
        &self,
        mut binding: ServiceBinding,
        identity: &BindingIdentity,
    ) -> Result<Action> {
        let finalizer = &self.settings.finalizer;
        if !binding.has_finalizer(finalizer) {
            tracing::debug!("Finalizer already released, waiting for garbage collection");
            return Ok(Action::await_change());
        }

        let target = self.collaborators.resolver.resolve(identity).await?;

        let remaining = match self.collaborators.applier.delete(&target, binding.applied_refs()).await {
            Ok(remaining) => remaining,
            Err(failure) => {
                tracing::warn!(
                    error = %failure.source,
                    remaining = failure.progress.len(),
                    "Failed to delete some sub-resources"
                );
                failure.progress
            }
        };

        let outcome = self
            .collaborators
            .evaluator
            .evaluate(&target, identity, Operation::Unbind)
            .await?;

        let mut status = binding.status.take().unwrap_or_default();
        status.state = Some(outcome.state);
        status.error = outcome.error.clone();
        status.crds = remaining.clone();
        status.with_observed_gen(&binding.metadata);
        binding.status = Some(status);

        let release = outcome.state == BindingState::Succeeded || remaining.is_empty();

        let mut stored = self.store.update_status(&binding).await?;

        if outcome.state == BindingState::Failed {
            let message = outcome.error.clone().unwrap_or_else(|| "Unbind failed".to_owned());
            self.events
                .emit(
                    &stored,
                    EventData::warning(BindingEventReason::UnbindFailed, message)
                        .with_action(Operation::Unbind.to_string()),
                )
                .await;
        }

        if release {
            stored.remove_finalizer(finalizer);
            let released = self.store.update(&stored).await?;
            tracing::info!(remaining = remaining.len(), state = %outcome.state, "Finalizer removed");

            self.events
                .emit(
                    &released,
                    EventData::normal(
                        BindingEventReason::FinalizerRemoved,
                        format!("Removed finalizer {finalizer}, {} sub-resources remain", remaining.len()),
                    ),
                )
                .await;
        }

        if !remaining.is_empty() && outcome.state != BindingState::Failed {
            tracing::debug!(remaining = remaining.len(), "Sub-resources still being deleted");
            return Ok(self.retry());
        }

        Ok(Action::await_change())
    }
}
