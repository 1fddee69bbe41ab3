//! Operator settings.
//!
//! Every field has a default, so a hosting binary can deserialize a partial document (or use
//! [Settings::default]) and only override what it needs.

use std::time::Duration;

use kube::api::ApiResource;
use kube::api::GroupVersionKind;
use serde::Deserialize;

/// Finalizer guarding sub-resource cleanup.
pub const DEFAULT_FINALIZER: &str = "interoperator.servicefabrik.io";
/// Prefix of the credential secret's name, the binding ID follows.
pub const DEFAULT_CREDENTIAL_PREFIX: &str = "sf-";

const RETRY_AFTER_SECONDS: u64 = 5;
const REQUEUE_AFTER_ERROR_SECONDS: u64 = 60;

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub finalizer: String,
    pub credential_prefix: String,
    /// Delay before the next pass when a pass made partial progress.
    pub retry_after_seconds: u64,
    /// Delay before the next pass when a pass failed with a transient error.
    pub requeue_after_error_seconds: u64,
    /// Maximum number of concurrent reconciliations, `None` means unbounded.
    pub concurrency: Option<usize>,
    /// Namespaces to watch, empty means all namespaces.
    pub namespaces: Vec<String>,
    /// Sub-resource kinds whose changes re-trigger their owning binding.
    pub owned_kinds: Vec<OwnedKind>,
    /// Component name reported on emitted events.
    pub event_component: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            finalizer: DEFAULT_FINALIZER.to_owned(),
            credential_prefix: DEFAULT_CREDENTIAL_PREFIX.to_owned(),
            retry_after_seconds: RETRY_AFTER_SECONDS,
            requeue_after_error_seconds: REQUEUE_AFTER_ERROR_SECONDS,
            concurrency: None,
            namespaces: Vec::new(),
            owned_kinds: vec![
                OwnedKind::new("kubedb.com", "v1alpha1", "Postgres"),
                OwnedKind::new("bind.servicefabrik.io", "v1alpha1", "DirectorBind"),
            ],
            event_component: "interoperator".to_owned(),
        }
    }
}

impl Settings {
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_seconds)
    }

    pub fn requeue_after_error(&self) -> Duration {
        Duration::from_secs(self.requeue_after_error_seconds)
    }

    /// Deterministic credential secret name for a binding.
    pub fn credential_name(&self, binding_id: &str) -> String {
        format!("{}{binding_id}", self.credential_prefix)
    }

    /// Whether bindings in `namespace` are reconciled.
    pub fn watches(&self, namespace: &str) -> bool {
        self.namespaces.is_empty() || self.namespaces.iter().any(|watched| watched == namespace)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OwnedKind {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl OwnedKind {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        OwnedKind {
            group: group.to_owned(),
            version: version.to_owned(),
            kind: kind.to_owned(),
        }
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk(&self.group, &self.version, &self.kind))
    }
}
