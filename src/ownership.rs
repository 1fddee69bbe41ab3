//! Owner references that let the garbage collector reach everything a binding created.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::Resource;

use crate::error::Error;
use crate::error::Result;

/// Stamps `owner` as the controlling owner of every child.
///
/// Fails if the owner has no name or uid yet, or if a child is already controlled by a
/// different object. Re-stamping a child already controlled by `owner` is a no-op.
pub fn set_owner_reference<O, C>(owner: &O, children: &mut [C]) -> Result<()>
where
    O: Resource<DynamicType = ()>,
    C: Resource,
{
    let owner_ref = owner.controller_owner_ref(&()).ok_or(Error::MissingOwnerIdentity)?;

    for child in children.iter_mut() {
        set_controller(child.meta_mut(), &owner_ref)?;
    }

    Ok(())
}

fn set_controller(meta: &mut ObjectMeta, owner_ref: &OwnerReference) -> Result<()> {
    let references = meta.owner_references.get_or_insert_with(Vec::new);

    let foreign_controller = references
        .iter()
        .any(|existing| existing.controller == Some(true) && existing.uid != owner_ref.uid);
    if foreign_controller {
        return Err(Error::AlreadyOwned(meta.name.clone().unwrap_or_default()));
    }

    references.retain(|existing| existing.uid != owner_ref.uid);
    references.push(owner_ref.clone());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use kube::api::DynamicObject;
    use kube::api::TypeMeta;

    use crate::binding::ServiceBinding;
    use crate::binding::ServiceBindingSpec;

    fn owner(uid: Option<&str>) -> ServiceBinding {
        let mut binding = ServiceBinding::new(
            "binding-1",
            ServiceBindingSpec {
                instance_id: "instance-1".to_string(),
                plan_id: "plan-1".to_string(),
                service_id: "service-1".to_string(),
            },
        );
        binding.metadata.namespace = Some("default".to_string());
        binding.metadata.uid = uid.map(str::to_owned);
        binding
    }

    fn child(name: &str) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "kubedb.com/v1alpha1".to_string(),
                kind: "Postgres".to_string(),
            }),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            data: serde_json::json!({}),
        }
    }

    #[test]
    fn test_stamps_controller_reference_on_every_child() {
        // Given: An owner with uid and two children
        let owner = owner(Some("uid-1"));
        let mut children = vec![child("db"), child("proxy")];

        // When: Setting the owner reference
        set_owner_reference(&owner, &mut children).unwrap();

        // Then: Each child points at the binding as controller
        for child in &children {
            let references = child.metadata.owner_references.as_ref().unwrap();
            assert_eq!(references.len(), 1);
            assert_eq!(references[0].uid, "uid-1");
            assert_eq!(references[0].kind, "SFServiceBinding");
            assert_eq!(references[0].name, "binding-1");
            assert_eq!(references[0].controller, Some(true));
        }
    }

    #[test]
    fn test_restamping_is_idempotent() {
        // Given: Children already owned by the binding
        let owner = owner(Some("uid-1"));
        let mut children = vec![child("db")];
        set_owner_reference(&owner, &mut children).unwrap();

        // When: Stamping again
        set_owner_reference(&owner, &mut children).unwrap();

        // Then: No duplicate reference is added
        assert_eq!(children[0].metadata.owner_references.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_owner_without_uid_is_rejected() {
        // Given: An owner that was never persisted
        let owner = owner(None);
        let mut children = vec![Secret::default()];

        // Then: Nothing can point at it
        assert!(matches!(
            set_owner_reference(&owner, &mut children),
            Err(Error::MissingOwnerIdentity)
        ));
    }

    #[test]
    fn test_child_controlled_elsewhere_is_rejected() {
        // Given: A child controlled by another object
        let mut children = vec![child("db")];
        set_owner_reference(&owner(Some("uid-other")), &mut children).unwrap();

        // When: Another binding claims it
        let result = set_owner_reference(&owner(Some("uid-1")), &mut children);

        // Then: The claim is refused
        assert!(matches!(result, Err(Error::AlreadyOwned(name)) if name == "db"));
    }
}
