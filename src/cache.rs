//! Per-namespace [Api] handles for the control cluster.
//!
//! Bindings, their credential secrets and their events are always addressed inside the
//! binding's namespace, so every store call starts by looking up a namespaced [Api].

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::RwLock;

use k8s_openapi::NamespaceResourceScope;
use kube::Api;
use kube::Client;
use kube::Resource;
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::error::Result;

/// Abstraction for obtaining namespaced [Api] instances.
///
/// - [CachedApiProvider] creates handles lazily, for operators watching every namespace.
/// - [StaticApiProvider] is filled once at start-up, for operators restricted to a known set
///   of namespaces. Asking for any other namespace is an error.
pub trait ProvideApi<R>: Send + Sync
where
    R: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    R::DynamicType: Default,
{
    fn get(&self, namespace: &str) -> Result<Arc<Api<R>>>;
}

/// Lazily populated, `RwLock` guarded cache of [Api] handles.
pub struct CachedApiProvider<R>
where
    R: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    R::DynamicType: Default,
{
    client: Client,
    cache: RwLock<HashMap<String, Arc<Api<R>>>>,
}

impl<R> CachedApiProvider<R>
where
    R: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    R::DynamicType: Default,
{
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

impl<R> ProvideApi<R> for CachedApiProvider<R>
where
    R: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    R::DynamicType: Default,
{
    fn get(&self, namespace: &str) -> Result<Arc<Api<R>>> {
        {
            let cache = self.cache.read()?;
            if let Some(api) = cache.get(namespace) {
                return Ok(Arc::clone(api));
            }
        }

        let mut cache = self.cache.write()?;
        // another reconcile may have filled the slot while we waited for the write lock
        let api = cache
            .entry(namespace.to_owned())
            .or_insert_with(|| Arc::new(Api::<R>::namespaced(self.client.clone(), namespace)));

        Ok(Arc::clone(api))
    }
}

/// Immutable set of [Api] handles built for a fixed list of namespaces.
pub struct StaticApiProvider<R>
where
    R: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    R::DynamicType: Default,
{
    cache: HashMap<String, Arc<Api<R>>>,
}

impl<R> StaticApiProvider<R>
where
    R: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    R::DynamicType: Default,
{
    pub fn new<I, S>(client: Client, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let cache = namespaces
            .into_iter()
            .map(|namespace| {
                let namespace = namespace.as_ref();
                let api = Arc::new(Api::<R>::namespaced(client.clone(), namespace));
                (namespace.to_owned(), api)
            })
            .collect();

        Self { cache }
    }
}

impl<R> ProvideApi<R> for StaticApiProvider<R>
where
    R: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    R::DynamicType: Default,
{
    fn get(&self, namespace: &str) -> Result<Arc<Api<R>>> {
        self.cache.get(namespace).map(Arc::clone).ok_or_else(|| {
            Error::UserInput(format!(
                "Namespace '{namespace}' is not watched by this operator, configured namespaces: {:?}",
                self.cache.keys().collect::<Vec<_>>()
            ))
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use kube::client::Body;
    use tower_test::mock;

    use crate::binding::ServiceBinding;

    /// A client whose requests go nowhere, good enough to build [Api] handles.
    pub(crate) fn mock_client() -> Client {
        let (mock_service, _handle) = mock::pair::<http::Request<Body>, http::Response<hyper::body::Incoming>>();
        Client::new(mock_service, "default")
    }

    #[tokio::test]
    async fn test_cached_provider_reuses_handles() {
        // Given: A cached provider
        let provider = CachedApiProvider::<ServiceBinding>::new(mock_client());

        // When: Asking twice for the same namespace
        let first = provider.get("tenant-a").unwrap();
        let second = provider.get("tenant-a").unwrap();

        // Then: The same handle is shared
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_cached_provider_accepts_any_namespace() {
        // Given: A cached provider
        let provider = CachedApiProvider::<Secret>::new(mock_client());

        // When: Asking for two namespaces
        let a = provider.get("tenant-a").unwrap();
        let b = provider.get("tenant-b").unwrap();

        // Then: Each gets its own handle
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(provider.cache.read().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_static_provider_rejects_unknown_namespace() {
        // Given: A static provider for one namespace
        let provider = StaticApiProvider::<ServiceBinding>::new(mock_client(), ["tenant-a"]);

        // Then: The configured namespace resolves, others are rejected
        assert!(provider.get("tenant-a").is_ok());
        match provider.get("tenant-b") {
            Err(Error::UserInput(msg)) => assert!(msg.contains("tenant-b")),
            other => panic!("Expected UserInput error, got {:?}", other.map(|_| ())),
        }
    }
}
