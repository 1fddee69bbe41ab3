//! `binding-operator` reconciles `SFServiceBinding` resources of a multi-cluster service broker.
//!
//! A binding lives on the control cluster while the resources realizing it (bind proxies,
//! database users, ...) live on whatever target cluster hosts the service instance. The
//! [reconciler::BindingReconciler] converges one binding per pass: it guards deletion with a
//! finalizer, plans and applies sub-resources on the target cluster, evaluates the bind
//! outcome and materializes it into the binding's status, issuing the credential secret at
//! most once.
//!
//! ## Usage
//!
//! The reconciler only knows about its collaborators through traits (see [target]), so the
//! broker plugs in its own planner, applier and outcome evaluator:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use binding_operator::cache::CachedApiProvider;
//! use binding_operator::config::Settings;
//! use binding_operator::controller::BindingController;
//! use binding_operator::events::EventRecorder;
//! use binding_operator::k8s::K8sRepository;
//! use binding_operator::reconciler::BindingReconciler;
//! use binding_operator::reconciler::Collaborators;
//! use binding_operator::target::LocalClusterResolver;
//!
//! let client = kube::Client::try_default().await?;
//! let settings = Settings::default();
//!
//! let store = K8sRepository::new(CachedApiProvider::new(client.clone()), CachedApiProvider::new(client.clone()));
//! let events = EventRecorder::new(Arc::new(CachedApiProvider::new(client.clone())), settings.event_component.clone());
//! let collaborators = Collaborators {
//!     resolver: Arc::new(LocalClusterResolver::new(client.clone())),
//!     planner: Arc::new(MyPlanner::new()),
//!     applier: Arc::new(MyApplier::new(client.clone())),
//!     evaluator: Arc::new(MyEvaluator::new(client.clone())),
//! };
//!
//! let reconciler = BindingReconciler::new(store, events, collaborators, settings);
//! BindingController::new(client, reconciler)
//!     .run(Some(async { tokio::signal::ctrl_c().await.ok(); }))
//!     .await;
//! ```
//!
//! ## Error Handling
//!
//! Every fallible step returns [error::Result]. Transient failures (store conflicts, cluster
//! resolution, planning, evaluation) requeue the binding, fatal ones (unnamed objects,
//! ownership clashes) wait for the next change. Collaborator implementations can wrap their
//! own errors with `Error::Anyhow`.

pub mod binding;
pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod k8s;
pub mod ownership;
pub mod reconciler;
pub mod target;

use kube::api::ObjectMeta;
use kube::Resource;
use kube::ResourceExt;

use crate::error::Error;
use crate::error::Result;

/// The ObserveGeneration trait is used to update the observed generation of a resource.
///
/// The user needs to implement the [ObserveGeneration::add] method to update the observed generation.
pub trait ObserveGeneration {
    /// Updates the observed generation of a resource, e.g. updating a property of the status
    /// object that implements [ObserveGeneration].
    fn add(&mut self, observed_generation: i64);

    /// Updates the observed generation of a resource with the generation of the resource's
    /// metadata.
    fn with_observed_gen(&mut self, meta: &ObjectMeta) {
        if let Some(observed_generation) = meta.generation {
            self.add(observed_generation)
        }
    }
}

/// The TryResource trait is used to try to extract the name and the namespace of a resources
/// metadata and encapsulates the error handling.
pub trait TryResource {
    fn try_name(&self) -> Result<&str>;
    fn try_namespace(&self) -> Result<String>;
}

impl<R> TryResource for R
where
    R: Resource,
{
    fn try_name(&self) -> Result<&str> {
        self.meta().name.as_deref().ok_or(Error::UnnamedObject)
    }

    fn try_namespace(&self) -> Result<String> {
        self.namespace().ok_or(Error::UserInput({
            "Expected resource to be namespaced. Can't deploy to an unknown namespace.".to_owned()
        }))
    }
}
