use std::fmt::Debug;

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Any error originating from the `kube-rs` crate
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },
    #[error("{0}")]
    UserInput(String),
    #[error("Unnamed k8s object")]
    UnnamedObject,
    #[error("Owner object has no name or uid, can't reference it from children")]
    MissingOwnerIdentity,
    #[error("Object {0} is already controlled by another owner")]
    AlreadyOwned(String),
    #[error("Object {0} already exists")]
    AlreadyExists(String),
    #[error("Secret {0} exists but isn't controlled by this binding")]
    CredentialConflict(String),
    #[error("Failed to resolve target cluster for instance {instance_id}: {reason}")]
    ClusterResolution { instance_id: String, reason: String },
    #[error("Failed to plan resources: {0}")]
    Planning(String),
    #[error("Failed to evaluate outcome: {0}")]
    Evaluation(String),
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("RwLock poisoned: {0}")]
    RwLockPoisoned(String),
    #[error("Failed to emit event: {0}")]
    EmitEventFailed(String),

    /// Can be used by collaborator implementations to return their errors
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Whether retrying the same reconciliation later can make progress.
    ///
    /// Store conflicts, network failures and collaborator errors are transient. Objects that
    /// can never be processed (no name, no namespace, ownership clashes) are not.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Error::UserInput(_) | Error::UnnamedObject | Error::MissingOwnerIdentity | Error::AlreadyOwned(_)
        )
    }

    /// Classifies a create failure, turning a `409 AlreadyExists` answer into [Error::AlreadyExists].
    pub(crate) fn from_create(error: kube::Error, name: &str) -> Self {
        match error {
            kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
                Error::AlreadyExists(name.to_owned())
            }
            other => Error::from(other),
        }
    }
}

/// A collaborator call that failed after making some progress.
///
/// `progress` holds whatever the collaborator managed to do before `source` happened, e.g. the
/// resources applied so far or the references that still remain to be deleted.
#[derive(ThisError, Debug)]
#[error("{source}")]
pub struct PartialFailure<T: Debug> {
    pub progress: T,
    #[source]
    pub source: Error,
}

impl<T: Debug> PartialFailure<T> {
    pub fn new(progress: T, source: impl Into<Error>) -> Self {
        PartialFailure {
            progress,
            source: source.into(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::RwLockPoisoned(e.to_string())
    }
}
