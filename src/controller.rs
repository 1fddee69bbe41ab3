//! Hooks the [BindingReconciler] into the `kube-rs` controller runtime.
//!
//! The controller watches `SFServiceBinding` objects and every configured owned kind, so a change
//! to a sub-resource triggers a pass for the binding controlling it.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use kube::api::DynamicObject;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config;
use kube::runtime::Controller;
use kube::Api;
use kube::Client;

use crate::binding::ServiceBinding;
use crate::error::Error;
use crate::error::Result;
use crate::events::EmitEvent;
use crate::k8s::BindingStore;
use crate::reconciler::BindingReconciler;
use crate::TryResource;

/// Result of a single reconciliation as reported by the controller runtime.
type ReconciliationResult<RE, QE> =
    std::result::Result<(ObjectRef<ServiceBinding>, Action), kube::runtime::controller::Error<RE, QE>>;

pub struct BindingController<S, E>
where
    S: BindingStore,
    E: EmitEvent,
{
    client: Client,
    reconciler: Arc<BindingReconciler<S, E>>,
}

impl<S, E> BindingController<S, E>
where
    S: BindingStore + 'static,
    E: EmitEvent + 'static,
{
    pub fn new(client: Client, reconciler: BindingReconciler<S, E>) -> Self {
        BindingController {
            client,
            reconciler: Arc::new(reconciler),
        }
    }

    /// Runs the reconciliation loop until the controller's watches end or `shutdown` resolves.
    ///
    /// Reconciliations of different bindings run concurrently up to `settings.concurrency`, the
    /// runtime never reconciles the same binding twice at the same time.
    pub async fn run<G>(self, shutdown: Option<G>)
    where
        G: Future<Output = ()> + Send + Sync + 'static,
    {
        let settings = self.reconciler.settings();
        let limit = settings.concurrency;

        let mut controller = Controller::new(self.bindings_api(), Config::default());
        for owned in &settings.owned_kinds {
            let resource = owned.api_resource();
            tracing::info!(kind = %resource.kind, api_version = %resource.api_version, "Watching owned kind");
            controller = controller.owns_with(
                Api::<DynamicObject>::all_with(self.client.clone(), &resource),
                resource,
                Config::default(),
            );
        }
        if let Some(trigger) = shutdown {
            controller = controller.graceful_shutdown_on(trigger);
        }

        controller
            .run(Self::reconcile, Self::error_policy, self.reconciler.clone())
            .for_each_concurrent(limit, Self::handle_reconciliation_result)
            .await;

        tracing::info!("Binding controller stopped");
    }

    fn bindings_api(&self) -> Api<ServiceBinding> {
        match self.reconciler.settings().namespaces.as_slice() {
            [namespace] => Api::namespaced(self.client.clone(), namespace),
            _ => Api::all(self.client.clone()),
        }
    }

    async fn reconcile(binding: Arc<ServiceBinding>, reconciler: Arc<BindingReconciler<S, E>>) -> Result<Action> {
        let namespace = binding.try_namespace()?;
        if !reconciler.settings().watches(&namespace) {
            return Ok(Action::await_change());
        }

        reconciler.reconcile(&namespace, binding.try_name()?).await
    }

    fn error_policy(binding: Arc<ServiceBinding>, error: &Error, reconciler: Arc<BindingReconciler<S, E>>) -> Action {
        let name = binding.try_name().unwrap_or_default();
        if error.is_transient() {
            tracing::warn!(binding = %name, %error, "Reconciliation failed, requeueing");
            return Action::requeue(reconciler.settings().requeue_after_error());
        }

        tracing::error!(binding = %name, %error, "Reconciliation failed permanently, waiting for a change");
        Action::await_change()
    }

    async fn handle_reconciliation_result<RE, QE>(result: ReconciliationResult<RE, QE>)
    where
        RE: Debug + Send,
        QE: Debug + Send,
    {
        match result {
            Ok((binding, action)) => {
                tracing::debug!(binding = %binding, ?action, "Reconciliation successful");
            }
            Err(error) => {
                tracing::error!(?error, "Reconciliation error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::binding::ServiceBindingSpec;
    use crate::cache::tests::mock_client;
    use crate::config::Settings;
    use crate::events::NoopEventRecorder;
    use crate::reconciler::Collaborators;
    use crate::target::LocalClusterResolver;

    struct EmptyStore;

    #[async_trait::async_trait]
    impl BindingStore for EmptyStore {
        async fn get(&self, _namespace: &str, _name: &str) -> Result<Option<ServiceBinding>> {
            Ok(None)
        }

        async fn update(&self, binding: &ServiceBinding) -> Result<ServiceBinding> {
            Ok(binding.clone())
        }

        async fn update_status(&self, binding: &ServiceBinding) -> Result<ServiceBinding> {
            Ok(binding.clone())
        }

        async fn create_secret(&self, _secret: &k8s_openapi::api::core::v1::Secret) -> Result<()> {
            Ok(())
        }

        async fn get_secret(
            &self,
            _namespace: &str,
            _name: &str,
        ) -> Result<Option<k8s_openapi::api::core::v1::Secret>> {
            Ok(None)
        }
    }

    #[async_trait::async_trait]
    impl crate::target::PlanResources for EmptyStore {
        async fn plan(
            &self,
            _: &crate::binding::BindingIdentity,
            _: crate::target::Operation,
        ) -> Result<Vec<DynamicObject>> {
            Ok(vec![])
        }
    }

    #[async_trait::async_trait]
    impl crate::target::ApplyResources for EmptyStore {
        async fn apply(
            &self,
            _: &crate::target::TargetCluster,
            desired: Vec<DynamicObject>,
            _: &[crate::binding::SubResourceRef],
        ) -> crate::target::ApplyResult {
            Ok(desired)
        }

        async fn delete(
            &self,
            _: &crate::target::TargetCluster,
            _: &[crate::binding::SubResourceRef],
        ) -> crate::target::DeleteResult {
            Ok(vec![])
        }
    }

    #[async_trait::async_trait]
    impl crate::target::EvaluateOutcome for EmptyStore {
        async fn evaluate(
            &self,
            _: &crate::target::TargetCluster,
            _: &crate::binding::BindingIdentity,
            _: crate::target::Operation,
        ) -> Result<crate::target::Outcome> {
            Ok(crate::target::Outcome::in_progress())
        }
    }

    fn context(settings: Settings) -> Arc<BindingReconciler<EmptyStore, NoopEventRecorder>> {
        let empty = Arc::new(EmptyStore);
        let collaborators = Collaborators {
            resolver: Arc::new(LocalClusterResolver::new(mock_client())),
            planner: empty.clone(),
            applier: empty.clone(),
            evaluator: empty,
        };
        Arc::new(BindingReconciler::new(EmptyStore, NoopEventRecorder, collaborators, settings))
    }

    fn binding(namespace: &str) -> Arc<ServiceBinding> {
        let mut binding = ServiceBinding::new(
            "binding-1",
            ServiceBindingSpec {
                instance_id: "instance-1".to_string(),
                plan_id: "plan-1".to_string(),
                service_id: "service-1".to_string(),
            },
        );
        binding.metadata.namespace = Some(namespace.to_string());
        Arc::new(binding)
    }

    type TestController = BindingController<EmptyStore, NoopEventRecorder>;

    #[tokio::test]
    async fn test_error_policy_requeues_transient_errors() {
        // Given: A transient planning error
        let error = Error::Planning("template missing".to_string());

        // When: Applying the error policy
        let action = TestController::error_policy(binding("default"), &error, context(Settings::default()));

        // Then: The binding is requeued after the configured delay
        assert_eq!(action, Action::requeue(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_error_policy_waits_on_fatal_errors() {
        // Given: An error retrying can't fix
        let error = Error::UnnamedObject;

        // When: Applying the error policy
        let action = TestController::error_policy(binding("default"), &error, context(Settings::default()));

        // Then: The binding waits for the next change
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_reconcile_skips_unwatched_namespaces() {
        // Given: A controller restricted to two namespaces
        let settings = Settings {
            namespaces: vec!["tenant-a".to_string(), "tenant-b".to_string()],
            ..Default::default()
        };

        // When: Reconciling a binding outside of them
        let action = TestController::reconcile(binding("tenant-c"), context(settings)).await.unwrap();

        // Then: Nothing happens
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_reconcile_delegates_to_reconciler() {
        // Given: A binding the store no longer knows
        let settings = Settings::default();

        // When: Reconciling it
        let action = TestController::reconcile(binding("tenant-a"), context(settings)).await.unwrap();

        // Then: The reconciler treats it as already reconciled
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_reconcile_rejects_unnamespaced_bindings() {
        // Given: A binding without namespace
        let mut binding = (*binding("default")).clone();
        binding.metadata.namespace = None;

        // When: Reconciling it
        let error = TestController::reconcile(Arc::new(binding), context(Settings::default()))
            .await
            .unwrap_err();

        // Then: The error is fatal
        assert!(!error.is_transient());
    }
}
