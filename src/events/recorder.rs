use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::Event;
use k8s_openapi::api::core::v1::EventSource;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::PostParams;
use kube::Resource;

use crate::binding::ServiceBinding;
use crate::cache::ProvideApi;
use crate::error::Result;
use crate::events::types::EventData;
use crate::events::EmitEvent;
use crate::TryResource;

/// Creates core/v1 `Event` objects next to the binding they are about.
pub struct EventRecorder<P>
where
    P: ProvideApi<Event>,
{
    api_provider: Arc<P>,
    component: Cow<'static, str>,
}

impl<P> EventRecorder<P>
where
    P: ProvideApi<Event>,
{
    /// `component` shows up as the event source, e.g. "interoperator".
    pub fn new(api_provider: Arc<P>, component: impl Into<Cow<'static, str>>) -> Self {
        Self {
            api_provider,
            component: component.into(),
        }
    }

    pub(crate) fn build(&self, binding: &ServiceBinding, event: EventData) -> Result<Event> {
        let namespace = binding.try_namespace()?;
        let name = binding.try_name()?;
        let now = Utc::now();

        Ok(Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{name}.")),
                namespace: Some(namespace.clone()),
                ..Default::default()
            },
            involved_object: ObjectReference {
                api_version: Some(ServiceBinding::api_version(&()).to_string()),
                kind: Some(ServiceBinding::kind(&()).to_string()),
                name: Some(name.to_owned()),
                namespace: Some(namespace),
                uid: binding.meta().uid.clone(),
                resource_version: binding.meta().resource_version.clone(),
                ..Default::default()
            },
            reason: Some(event.reason.to_string()),
            message: Some(event.message),
            type_: Some(event.type_.to_string()),
            first_timestamp: Some(Time(now)),
            last_timestamp: Some(Time(now)),
            count: Some(1),
            source: Some(EventSource {
                component: Some(self.component.to_string()),
                ..Default::default()
            }),
            reporting_component: Some(self.component.to_string()),
            action: event.action,
            ..Default::default()
        })
    }
}

#[async_trait]
impl<P> EmitEvent for EventRecorder<P>
where
    P: ProvideApi<Event>,
{
    #[tracing::instrument(
        skip(self, binding, event),
        fields(
            binding = %binding.try_name().unwrap_or_default(),
            namespace = %binding.try_namespace().unwrap_or_default(),
            event_type = %event.type_,
            event_reason = %event.reason,
        )
    )]
    async fn try_emit(&self, binding: &ServiceBinding, event: EventData) -> Result<()> {
        let k8s_event = self.build(binding, event)?;
        let events = self.api_provider.get(&binding.try_namespace()?)?;

        events.create(&PostParams::default(), &k8s_event).await?;

        Ok(())
    }
}
