//! The control-plane store: bindings and their credential secrets.
//!
//! The reconciler talks to the store only through [BindingStore], so tests can swap in an
//! in-memory fake. [K8sRepository] is the implementation backed by the Kubernetes api.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::api::PostParams;
use kube::Resource;
use serde::Serialize;

use crate::binding::BindingStatus;
use crate::binding::ServiceBinding;
use crate::cache::ProvideApi;
use crate::error::Error;
use crate::error::Result;
use crate::TryResource;

#[async_trait]
pub trait BindingStore: Send + Sync {
    /// Reads a binding, `None` if it doesn't exist (anymore).
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ServiceBinding>>;

    /// Writes metadata (labels, finalizers) of a binding. Fails on a resource version conflict.
    async fn update(&self, binding: &ServiceBinding) -> Result<ServiceBinding>;

    /// Writes the status of a binding. Fails on a resource version conflict.
    async fn update_status(&self, binding: &ServiceBinding) -> Result<ServiceBinding>;

    /// Creates a secret, [Error::AlreadyExists] if one with the same name exists.
    async fn create_secret(&self, secret: &Secret) -> Result<()>;

    /// Reads a secret, `None` if it doesn't exist.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;
}

/// A [BindingStore] backed by the Kubernetes api of the control cluster.
pub struct K8sRepository<B, S>
where
    B: ProvideApi<ServiceBinding>,
    S: ProvideApi<Secret>,
{
    bindings: B,
    secrets: S,
}

impl<B, S> K8sRepository<B, S>
where
    B: ProvideApi<ServiceBinding>,
    S: ProvideApi<Secret>,
{
    pub fn new(bindings: B, secrets: S) -> Self {
        K8sRepository { bindings, secrets }
    }
}

/// Status fields the reconciler clears by setting them to `None`.
const CLEARABLE_STATUS_FIELDS: &[&str] = &["error"];

/// Merge patch for the status subresource.
///
/// Carrying the resource version turns the patch into a conditional write: the api server
/// answers `409 Conflict` if the binding changed since it was read. A merge patch only removes
/// a key when it carries an explicit `null`, so cleared fields are rendered as `null` instead of
/// being left out.
#[derive(Debug, Serialize)]
pub(crate) struct StatusPatch<'a> {
    metadata: PatchMetadata<'a>,
    status: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PatchMetadata<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_version: Option<&'a str>,
}

impl<'a> StatusPatch<'a> {
    pub(crate) fn new(binding: &'a ServiceBinding, status: &BindingStatus) -> Result<Self> {
        let mut rendered = serde_json::to_value(status)?;
        if let Some(fields) = rendered.as_object_mut() {
            for field in CLEARABLE_STATUS_FIELDS {
                fields.entry(*field).or_insert(serde_json::Value::Null);
            }
        }

        Ok(StatusPatch {
            metadata: PatchMetadata {
                resource_version: binding.meta().resource_version.as_deref(),
            },
            status: rendered,
        })
    }

    #[cfg(test)]
    pub(crate) fn status(&self) -> &serde_json::Value {
        &self.status
    }
}

#[async_trait]
impl<B, S> BindingStore for K8sRepository<B, S>
where
    B: ProvideApi<ServiceBinding>,
    S: ProvideApi<Secret>,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ServiceBinding>> {
        let api = self.bindings.get(namespace)?;
        Ok(api.get_opt(name).await?)
    }

    #[tracing::instrument(
        skip(self, binding),
        fields(
            binding = %binding.try_name().unwrap_or_default(),
            namespace = %binding.try_namespace().unwrap_or_default(),
        )
    )]
    async fn update(&self, binding: &ServiceBinding) -> Result<ServiceBinding> {
        let api = self.bindings.get(&binding.try_namespace()?)?;
        let updated = api.replace(binding.try_name()?, &PostParams::default(), binding).await?;

        tracing::debug!("Binding updated");
        Ok(updated)
    }

    #[tracing::instrument(
        skip(self, binding),
        fields(
            binding = %binding.try_name().unwrap_or_default(),
            namespace = %binding.try_namespace().unwrap_or_default(),
            resource_generation = %binding.meta().generation.unwrap_or(0),
        )
    )]
    async fn update_status(&self, binding: &ServiceBinding) -> Result<ServiceBinding> {
        let api = self.bindings.get(&binding.try_namespace()?)?;

        let status = binding.status.clone().unwrap_or_default();
        let patch = StatusPatch::new(binding, &status)?;
        let updated = api
            .patch_status(binding.try_name()?, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        tracing::debug!("Status updated");
        Ok(updated)
    }

    #[tracing::instrument(skip(self, secret), fields(secret = %secret.try_name().unwrap_or_default()))]
    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        let name = secret.try_name()?;
        let api = self.secrets.get(&secret.try_namespace()?)?;

        api.create(&PostParams::default(), secret)
            .await
            .map_err(|e| Error::from_create(e, name))?;

        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api = self.secrets.get(namespace)?;
        Ok(api.get_opt(name).await?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;
    use serde_json::Value;

    use super::*;
    use crate::binding::BindingState;
    use crate::binding::ServiceBindingSpec;
    use crate::binding::SubResourceRef;

    /// Applies `patch` to `target` the way the api server applies a JSON merge patch (RFC 7386).
    pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
        let Value::Object(patch) = patch else {
            *target = patch.clone();
            return;
        };
        if !target.is_object() {
            *target = Value::Object(Default::default());
        }
        if let Value::Object(fields) = target {
            for (key, value) in patch {
                if value.is_null() {
                    fields.remove(key);
                } else {
                    merge_patch(fields.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
    }

    fn binding(resource_version: Option<&str>) -> ServiceBinding {
        let mut binding = ServiceBinding::new(
            "binding-1",
            ServiceBindingSpec {
                instance_id: "instance-1".to_string(),
                plan_id: "plan-1".to_string(),
                service_id: "service-1".to_string(),
            },
        );
        binding.metadata.namespace = Some("default".to_string());
        binding.metadata.resource_version = resource_version.map(str::to_owned);
        binding
    }

    #[test]
    fn test_status_patch_is_conditional_on_resource_version() {
        // Given: A binding read at resource version 42
        let binding = binding(Some("42"));
        let status = BindingStatus {
            state: Some(BindingState::InProgress),
            crds: vec![SubResourceRef {
                kind: "Postgres".to_string(),
                api_version: "kubedb.com/v1alpha1".to_string(),
                name: "db".to_string(),
                namespace: "default".to_string(),
            }],
            ..Default::default()
        };

        // When: Rendering the status patch
        let patch = serde_json::to_value(StatusPatch::new(&binding, &status).unwrap()).unwrap();

        // Then: Resource version and status travel together
        assert_eq!(patch["metadata"]["resourceVersion"], "42");
        assert_eq!(patch["status"]["state"], "in_progress");
        assert_eq!(patch["status"]["CRDs"][0]["name"], "db");
    }

    #[test]
    fn test_status_patch_without_resource_version() {
        // Given: A binding never read from the api server
        let binding = binding(None);
        let status = BindingStatus::default();

        // When: Rendering the status patch
        let patch = serde_json::to_value(StatusPatch::new(&binding, &status).unwrap()).unwrap();

        // Then: The patch is unconditional
        assert_eq!(patch["metadata"], json!({}));
        assert_eq!(patch["status"]["CRDs"], json!([]));
    }

    #[test]
    fn test_status_patch_clears_error() {
        // Given: A stored failed status and a new status without error
        let binding = binding(Some("7"));
        let mut stored = json!({ "state": "failed", "error": "quota exceeded", "CRDs": [] });
        let status = BindingStatus {
            state: Some(BindingState::InProgress),
            ..Default::default()
        };

        // When: Merging the rendered patch onto the stored status
        let patch = StatusPatch::new(&binding, &status).unwrap();
        merge_patch(&mut stored, patch.status());

        // Then: The error is rendered as null and removed by the merge
        assert_eq!(patch.status()["error"], Value::Null);
        assert_eq!(stored, json!({ "state": "in_progress", "CRDs": [] }));
    }

    #[test]
    fn test_status_patch_keeps_error() {
        // Given: A failed status
        let binding = binding(Some("7"));
        let status = BindingStatus {
            state: Some(BindingState::Failed),
            error: Some("quota exceeded".to_string()),
            ..Default::default()
        };

        // When: Rendering the status patch
        let patch = StatusPatch::new(&binding, &status).unwrap();

        // Then: The error is carried
        assert_eq!(patch.status()["error"], "quota exceeded");
    }
}
