use thiserror::Error;

use crate::waiter::RegisterError;

/// Errors surfaced to the admission pipeline. Matches the error-handling
/// table: most variants map to a `Forbidden` deny, a handful to a 5xx.
#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error(transparent)]
    ClaimIdentity(#[from] quota_admission_policy::errors::PolicyError),

    #[error("waiter capacity exceeded")]
    WaiterCapacityExceeded,

    #[error("a waiter is already registered for this claim")]
    DuplicateWaiter,

    #[error("failed to create claim: {0}")]
    ClaimCreate(#[source] kube::Error),

    #[error("admission request was cancelled")]
    Cancelled,

    #[error("watch manager failed to start: {0}")]
    WatchManagerStartup(String),
}

impl From<RegisterError> for AdmissionError {
    fn from(err: RegisterError) -> Self {
        match err {
            RegisterError::CapacityExceeded => AdmissionError::WaiterCapacityExceeded,
            RegisterError::AlreadyRegistered => AdmissionError::DuplicateWaiter,
        }
    }
}
