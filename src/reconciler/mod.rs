//! The binding reconciliation loop.
//!
//! One call to [BindingReconciler::reconcile] is one convergence pass for one binding. A pass
//! is level-triggered: it reads the binding fresh, decides from what it finds, and can be
//! repeated any number of times. Every write goes through the store's optimistic concurrency,
//! so overlapping passes degrade into conflicts and retries rather than lost updates.

mod convergence;
mod deletion;


use std::sync::Arc;

use kube::runtime::controller::Action;

use crate::binding::BindingIdentity;
use crate::binding::BindingState;
use crate::binding::ServiceBinding;
use crate::config::Settings;
use crate::error::Result;
use crate::events::BindingEventReason;
use crate::events::EmitEvent;
use crate::events::EventData;
use crate::k8s::BindingStore;
use crate::target::ApplyResources;
use crate::target::EvaluateOutcome;
use crate::target::PlanResources;
use crate::target::ResolveCluster;

/// The collaborators a reconciler dispatches work to.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn ResolveCluster>,
    pub planner: Arc<dyn PlanResources>,
    pub applier: Arc<dyn ApplyResources>,
    pub evaluator: Arc<dyn EvaluateOutcome>,
}

pub struct BindingReconciler<S, E>
where
    S: BindingStore,
    E: EmitEvent,
{
    store: S,
    events: E,
    collaborators: Collaborators,
    settings: Settings,
}

impl<S, E> BindingReconciler<S, E>
where
    S: BindingStore,
    E: EmitEvent,
{
    pub fn new(store: S, events: E, collaborators: Collaborators, settings: Settings) -> Self {
        BindingReconciler {
            store,
            events,
            collaborators,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Runs one pass for the binding `namespace/name`.
    ///
    /// `Ok(Action::await_change())` means nothing is left to do until something changes,
    /// `Ok(Action::requeue(..))` asks for another pass after partial progress. Errors abort the
    /// pass without having written a guessed status; whether they are worth retrying is told
    /// by [crate::error::Error::is_transient].
    #[tracing::instrument(name = "binding.reconcile", skip(self))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action> {
        let Some(binding) = self.store.get(namespace, name).await? else {
            // deleted and garbage collected in the meantime
            tracing::debug!("Binding not found, nothing to reconcile");
            return Ok(Action::await_change());
        };
        let identity = BindingIdentity::try_from(&binding)?;

        if binding.is_being_deleted() {
            return self.handle_deletion(binding, &identity).await;
        }

        if !binding.has_finalizer(&self.settings.finalizer) {
            return Ok(self.add_finalizer(binding).await);
        }

        let binding = self.sync_state_label(binding).await?;
        self.converge(&binding, &identity).await
    }

    /// Adds the finalizer and asks for another pass, whether the write went through or not.
    async fn add_finalizer(&self, mut binding: ServiceBinding) -> Action {
        binding.add_finalizer(&self.settings.finalizer);

        match self.store.update(&binding).await {
            Ok(updated) => {
                tracing::info!(finalizer = %self.settings.finalizer, "Finalizer added");
                let message = format!("Added finalizer {}", self.settings.finalizer);
                self.events
                    .emit(&updated, EventData::normal(BindingEventReason::FinalizerAdded, message))
                    .await;
            }
            Err(error) => {
                tracing::warn!(%error, "Failed to add finalizer, retrying");
            }
        }

        self.retry()
    }

    /// Rewrites a stale `in_queue`/`update` label to `succeeded` once the status says so.
    ///
    /// The label only exists for external observers, nothing here ever reads it back as input.
    async fn sync_state_label(&self, mut binding: ServiceBinding) -> Result<ServiceBinding> {
        let stale = matches!(
            binding.state_label().map(str::parse::<BindingState>),
            Some(Ok(BindingState::InQueue | BindingState::Update))
        );
        if !stale || binding.state() != BindingState::Succeeded {
            return Ok(binding);
        }

        binding.set_state_label(BindingState::Succeeded);
        let updated = self.store.update(&binding).await?;
        tracing::info!("State label updated to succeeded");

        Ok(updated)
    }

    fn retry(&self) -> Action {
        Action::requeue(self.settings.retry_after())
    }
}
