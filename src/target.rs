//! Collaborators the reconciler drives on target clusters.
//!
//! None of these are implemented here beyond [LocalClusterResolver]: templating resources,
//! diffing them against a cluster and judging bind results belong to the broker. The
//! reconciler only relies on the contracts below, which keeps it testable with fakes.

use std::fmt::Debug;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::Client;
use strum::AsRefStr;
use strum::Display;

use crate::binding::BindingIdentity;
use crate::binding::BindingState;
use crate::binding::SubResourceRef;
use crate::error::PartialFailure;
use crate::error::Result;

/// Which broker operation a collaborator is asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Bind,
    Unbind,
}

/// A client bound to the cluster hosting a service instance's resources.
#[derive(Clone)]
pub struct TargetCluster {
    name: String,
    client: Client,
}

impl TargetCluster {
    pub fn new(name: impl Into<String>, client: Client) -> Self {
        TargetCluster {
            name: name.into(),
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }
}

impl Debug for TargetCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetCluster").field("name", &self.name).finish()
    }
}

/// The evaluator's judgment of a bind or unbind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub state: BindingState,
    pub error: Option<String>,
    /// Bind response to expose as credentials, only meaningful for a succeeded bind.
    pub response: Option<String>,
}

impl Outcome {
    pub fn succeeded(response: impl Into<String>) -> Self {
        Outcome {
            state: BindingState::Succeeded,
            error: None,
            response: Some(response.into()),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Outcome {
            state: BindingState::Failed,
            error: Some(error.into()),
            response: None,
        }
    }

    pub fn in_progress() -> Self {
        Outcome::default()
    }
}

/// Result of applying resources: the applied set, or whatever was applied before failing.
///
/// A `None` progress means the applier can't tell what was applied, in which case the
/// previously recorded references are kept.
pub type ApplyResult = std::result::Result<Vec<DynamicObject>, PartialFailure<Option<Vec<DynamicObject>>>>;

/// Result of deleting resources: the references still remaining.
pub type DeleteResult = std::result::Result<Vec<SubResourceRef>, PartialFailure<Vec<SubResourceRef>>>;

/// Selects the cluster hosting an instance. Must be side-effect free, it is called several
/// times per reconciliation.
#[async_trait]
pub trait ResolveCluster: Send + Sync {
    async fn resolve(&self, identity: &BindingIdentity) -> Result<TargetCluster>;
}

/// Computes the sub-resources a binding should produce.
#[async_trait]
pub trait PlanResources: Send + Sync {
    async fn plan(&self, identity: &BindingIdentity, operation: Operation) -> Result<Vec<DynamicObject>>;
}

/// Creates, updates and deletes sub-resources on a target cluster.
#[async_trait]
pub trait ApplyResources: Send + Sync {
    /// Reconciles `desired` against the cluster, `applied` being what the last pass recorded.
    async fn apply(&self, target: &TargetCluster, desired: Vec<DynamicObject>, applied: &[SubResourceRef])
        -> ApplyResult;

    /// Deletes `resources`. Deletion may take several passes, so remaining references are
    /// returned rather than treated as errors.
    async fn delete(&self, target: &TargetCluster, resources: &[SubResourceRef]) -> DeleteResult;
}

/// Inspects provisioned state to decide how a bind or unbind went.
#[async_trait]
pub trait EvaluateOutcome: Send + Sync {
    async fn evaluate(&self, target: &TargetCluster, identity: &BindingIdentity, operation: Operation)
        -> Result<Outcome>;
}

/// Resolves every instance to the control cluster itself.
pub struct LocalClusterResolver {
    client: Client,
}

impl LocalClusterResolver {
    pub const CLUSTER_NAME: &'static str = "local";

    pub fn new(client: Client) -> Self {
        LocalClusterResolver { client }
    }
}

#[async_trait]
impl ResolveCluster for LocalClusterResolver {
    async fn resolve(&self, _identity: &BindingIdentity) -> Result<TargetCluster> {
        Ok(TargetCluster::new(Self::CLUSTER_NAME, self.client.clone()))
    }
}
