use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::api::DynamicObject;
use kube::api::ObjectMeta;
use kube::runtime::controller::Action;

use super::BindingReconciler;
use crate::binding::BindingIdentity;
use crate::binding::BindingResponse;
use crate::binding::BindingState;
use crate::binding::ServiceBinding;
use crate::binding::SubResourceRef;
use crate::binding::RESPONSE_KEY;
use crate::error::Error;
use crate::error::Result;
use crate::events::BindingEventReason;
use crate::events::EmitEvent;
use crate::events::EventData;
use crate::k8s::BindingStore;
use crate::ownership::set_owner_reference;
use crate::target::Operation;
use crate::target::Outcome;
use crate::ObserveGeneration;
use crate::TryResource;

impl<S, E> BindingReconciler<S, E>
where
    S: BindingStore,
    E: EmitEvent,
{
    /// Plans and applies the binding's sub-resources, then records the result.
    ///
    /// A failing apply doesn't abort the pass: whatever was applied is still recorded and the
    /// binding is retried.
    #[tracing::instrument(name = "binding.converge", skip_all, fields(binding = %identity.binding_id))]
    pub(super) async fn converge(&self, binding: &ServiceBinding, identity: &BindingIdentity) -> Result<Action> {
        let mut desired = self.collaborators.planner.plan(identity, Operation::Bind).await?;
        // owned before they exist, so anything created before a later failure is still collected
        set_owner_reference(binding, &mut desired)?;

        let target = self.collaborators.resolver.resolve(identity).await?;

        let (applied, retry) = match self
            .collaborators
            .applier
            .apply(&target, desired, binding.applied_refs())
            .await
        {
            Ok(applied) => (Some(applied), false),
            Err(failure) => {
                tracing::warn!(error = %failure.source, cluster = %target.name(), "Failed to apply sub-resources");
                self.events
                    .emit(
                        binding,
                        EventData::warning(BindingEventReason::ApplyFailed, failure.source.to_string())
                            .with_action(Operation::Bind.to_string()),
                    )
                    .await;
                (failure.progress, true)
            }
        };

        self.materialize_status(identity, applied.as_deref()).await?;

        if retry {
            return Ok(self.retry());
        }
        Ok(Action::await_change())
    }

    /// Translates an applied set and the bind outcome into the binding's status.
    ///
    /// Runs against a freshly read binding and does nothing once its state is terminal, which
    /// makes issuing the credential secret a one-shot. `applied == None` leaves the recorded
    /// sub-resources untouched.
    #[tracing::instrument(name = "binding.materialize_status", skip_all, fields(binding = %identity.binding_id))]
    pub(super) async fn materialize_status(
        &self,
        identity: &BindingIdentity,
        applied: Option<&[DynamicObject]>,
    ) -> Result<()> {
        let target = self.collaborators.resolver.resolve(identity).await?;

        let crds: Option<Vec<SubResourceRef>> =
            applied.map(|objects| objects.iter().map(SubResourceRef::from).collect());

        let outcome = self
            .collaborators
            .evaluator
            .evaluate(&target, identity, Operation::Bind)
            .await?;

        let Some(mut binding) = self.store.get(&identity.namespace, &identity.binding_id).await? else {
            tracing::debug!("Binding vanished before its status could be written");
            return Ok(());
        };

        let current = binding.state();
        if current.is_terminal() {
            tracing::debug!(state = %current, "Binding already terminal, status left untouched");
            return Ok(());
        }

        let mut status = binding.status.take().unwrap_or_default();
        status.error = None;
        match outcome.state {
            BindingState::Succeeded => {
                let secret_ref = self.issue_credential(&binding, &outcome).await?;
                status.response = Some(BindingResponse {
                    secret_ref: Some(secret_ref),
                });
            }
            BindingState::Failed => {
                status.error = outcome.error.clone();
            }
            _ => {}
        }
        status.state = Some(outcome.state);
        if let Some(crds) = crds {
            status.crds = crds;
        }
        status.with_observed_gen(&binding.metadata);
        binding.status = Some(status);

        let stored = self.store.update_status(&binding).await?;
        tracing::info!(state = %outcome.state, "Binding status updated");

        if outcome.state == BindingState::Failed {
            let message = outcome.error.unwrap_or_else(|| "Bind failed".to_owned());
            self.events
                .emit(
                    &stored,
                    EventData::warning(BindingEventReason::BindFailed, message)
                        .with_action(Operation::Bind.to_string()),
                )
                .await;
        }

        Ok(())
    }

    /// Creates the credential secret and returns its name.
    ///
    /// A secret left behind by an earlier pass whose status write failed counts as issued, as
    /// long as this binding controls it.
    async fn issue_credential(&self, binding: &ServiceBinding, outcome: &Outcome) -> Result<String> {
        let secret = self.credential_secret(binding, outcome.response.clone().unwrap_or_default())?;
        let name = secret.try_name()?.to_owned();

        match self.store.create_secret(&secret).await {
            Ok(()) => {
                tracing::info!(secret = %name, "Credential secret created");
                self.events
                    .emit(
                        binding,
                        EventData::normal(BindingEventReason::CredentialIssued, format!("Created secret {name}")),
                    )
                    .await;
            }
            Err(Error::AlreadyExists(_)) => {
                self.verify_credential_owner(binding, &name).await?;
                tracing::info!(secret = %name, "Credential secret already exists");
            }
            Err(error) => return Err(error),
        }

        Ok(name)
    }

    /// Fails unless the existing secret `name` is controlled by `binding`.
    ///
    /// A secret with the same name can outlive an earlier binding until the garbage collector
    /// removes it, the error is transient so the next pass issues a fresh one.
    async fn verify_credential_owner(&self, binding: &ServiceBinding, name: &str) -> Result<()> {
        let existing = self.store.get_secret(&binding.try_namespace()?, name).await?;

        let uid = binding.metadata.uid.as_deref();
        let controlled = existing
            .as_ref()
            .and_then(|secret| secret.metadata.owner_references.as_ref())
            .is_some_and(|references| {
                references
                    .iter()
                    .any(|reference| reference.controller == Some(true) && Some(reference.uid.as_str()) == uid)
            });

        if !controlled {
            tracing::warn!(secret = %name, "Credential secret exists but belongs to another owner");
            return Err(Error::CredentialConflict(name.to_owned()));
        }

        Ok(())
    }

    fn credential_secret(&self, binding: &ServiceBinding, response: String) -> Result<Secret> {
        let mut secret = Secret {
            metadata: ObjectMeta {
                name: Some(self.settings.credential_name(binding.try_name()?)),
                namespace: Some(binding.try_namespace()?),
                ..Default::default()
            },
            string_data: Some(BTreeMap::from([(RESPONSE_KEY.to_owned(), response)])),
            ..Default::default()
        };
        set_owner_reference(binding, std::slice::from_mut(&mut secret))?;

        Ok(secret)
    }
}
