//! The `SFServiceBinding` custom resource and the value types derived from it.

use kube::api::DynamicObject;
use kube::CustomResource;
use kube::Resource;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use strum::AsRefStr;
use strum::Display;
use strum::EnumString;

use crate::error::Result;
use crate::ObserveGeneration;
use crate::TryResource;

/// Key of the advisory label mirroring `status.state`.
pub const STATE_LABEL: &str = "state";

/// Key under which the bind response is stored in the credential secret.
pub const RESPONSE_KEY: &str = "response";

/// A credential-granting link between a consumer and a provisioned service instance.
///
/// The binding ID is the object's name. The reconciler never mutates `spec`.
#[derive(CustomResource, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "osb.servicefabrik.io",
    version = "v1alpha1",
    kind = "SFServiceBinding",
    plural = "sfservicebindings",
    shortname = "sfsb",
    status = "BindingStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBindingSpec {
    pub instance_id: String,
    pub plan_id: String,
    pub service_id: String,
}

/// Convenience alias, the kind name is dictated by the broker's API group.
pub type ServiceBinding = SFServiceBinding;

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BindingStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<BindingState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Sub-resources currently believed to be applied on the target cluster.
    #[serde(rename = "CRDs", default)]
    pub crds: Vec<SubResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<BindingResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ObserveGeneration for BindingStatus {
    fn add(&mut self, observed_generation: i64) {
        self.observed_generation = Some(observed_generation);
    }
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BindingResponse {
    /// Name of the secret holding the issued credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
}

/// Lifecycle state of a binding, shared by `status.state`, the advisory label and outcomes.
#[derive(
    Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy, JsonSchema, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BindingState {
    InQueue,
    Update,
    #[default]
    InProgress,
    Succeeded,
    Failed,
}

impl BindingState {
    /// Succeeded and failed bindings are never materialized again.
    pub fn is_terminal(self) -> bool {
        matches!(self, BindingState::Succeeded | BindingState::Failed)
    }
}

/// Reference to one resource applied on a target cluster.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Hash, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubResourceRef {
    pub kind: String,
    pub api_version: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

impl From<&DynamicObject> for SubResourceRef {
    fn from(object: &DynamicObject) -> Self {
        let (kind, api_version) = object
            .types
            .as_ref()
            .map(|types| (types.kind.clone(), types.api_version.clone()))
            .unwrap_or_default();

        SubResourceRef {
            kind,
            api_version,
            name: object.metadata.name.clone().unwrap_or_default(),
            namespace: object.metadata.namespace.clone().unwrap_or_default(),
        }
    }
}

impl std::fmt::Display for SubResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} {}/{}", self.api_version, self.kind, self.namespace, self.name)
    }
}

/// The identifiers every collaborator is addressed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingIdentity {
    pub instance_id: String,
    pub binding_id: String,
    pub service_id: String,
    pub plan_id: String,
    pub namespace: String,
}

impl TryFrom<&ServiceBinding> for BindingIdentity {
    type Error = crate::error::Error;

    fn try_from(binding: &ServiceBinding) -> Result<Self> {
        Ok(BindingIdentity {
            instance_id: binding.spec.instance_id.clone(),
            binding_id: binding.try_name()?.to_owned(),
            service_id: binding.spec.service_id.clone(),
            plan_id: binding.spec.plan_id.clone(),
            namespace: binding.try_namespace()?,
        })
    }
}

impl ServiceBinding {
    /// The recorded state, absent state counts as in progress.
    pub fn state(&self) -> BindingState {
        self.status.as_ref().and_then(|status| status.state).unwrap_or_default()
    }

    /// The sub-resources recorded by the last status write.
    pub fn applied_refs(&self) -> &[SubResourceRef] {
        self.status.as_ref().map(|status| status.crds.as_slice()).unwrap_or_default()
    }

    pub fn is_being_deleted(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.meta()
            .finalizers
            .as_ref()
            .is_some_and(|finalizers| finalizers.iter().any(|f| f == finalizer))
    }

    pub fn add_finalizer(&mut self, finalizer: &str) {
        if !self.has_finalizer(finalizer) {
            self.meta_mut()
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(finalizer.to_owned());
        }
    }

    pub fn remove_finalizer(&mut self, finalizer: &str) {
        if let Some(finalizers) = self.meta_mut().finalizers.as_mut() {
            finalizers.retain(|f| f != finalizer);
        }
    }

    /// The advisory state label, if set.
    pub fn state_label(&self) -> Option<&str> {
        self.meta()
            .labels
            .as_ref()
            .and_then(|labels| labels.get(STATE_LABEL))
            .map(String::as_str)
    }

    pub fn set_state_label(&mut self, state: BindingState) {
        self.meta_mut()
            .labels
            .get_or_insert_with(Default::default)
            .insert(STATE_LABEL.to_owned(), state.to_string());
    }

    pub fn status_mut(&mut self) -> &mut BindingStatus {
        self.status.get_or_insert_with(BindingStatus::default)
    }
}
