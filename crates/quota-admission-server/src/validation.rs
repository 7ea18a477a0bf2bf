//! Schema-level validation for the quota API group's own objects. Covers the
//! five quota kinds named in the external interface: `ResourceClaim`,
//! `ResourceRegistration`, `ClaimCreationPolicy`, `GrantCreationPolicy`,
//! `ResourceGrant`. Each has its own validator; update operations are
//! deferred to server-side validation and not handled here.

use quota_admission_policy::crds::{
    ClaimCreationPolicySpec, GrantCreationPolicySpec, ResourceGrantSpec, ResourceRegistrationSpec,
};
use quota_admission_policy::{AdmissionResponse, ResourceClaimSpec};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("object could not be decoded as {0}: {1}")]
    Decode(&'static str, String),
    #[error("{0}")]
    Shape(String),
}

/// Decodes and shape-checks a quota object by kind. `object` is the
/// unstructured wire payload (`admissionRequest.object`).
pub fn validate(kind: &str, object: &serde_json::Value) -> Result<(), ValidationError> {
    match kind {
        "ResourceClaim" => validate_resource_claim(object),
        "ResourceRegistration" => validate_resource_registration(object),
        "ClaimCreationPolicy" => validate_claim_creation_policy(object),
        "GrantCreationPolicy" => validate_grant_creation_policy(object),
        "ResourceGrant" => validate_resource_grant(object),
        other => Err(ValidationError::Shape(format!("not a quota kind: {other}"))),
    }
}

pub fn is_quota_kind(kind: &str) -> bool {
    matches!(
        kind,
        "ResourceClaim" | "ResourceRegistration" | "ClaimCreationPolicy" | "GrantCreationPolicy" | "ResourceGrant"
    )
}

/// Turns a validation outcome into an `AdmissionResponse`; never produces a
/// 5xx, since the quota objects themselves have no side effects downstream.
pub fn validation_response(uid: String, result: Result<(), ValidationError>) -> AdmissionResponse {
    match result {
        Ok(()) => AdmissionResponse::allow(uid),
        Err(err) => AdmissionResponse::reject(uid, err.to_string(), 400),
    }
}

fn validate_resource_claim(object: &serde_json::Value) -> Result<(), ValidationError> {
    let spec = decode_spec::<ResourceClaimSpec>(object, "ResourceClaim")?;
    if spec.consumer_ref.kind.is_empty() || spec.consumer_ref.name.is_empty() {
        return Err(ValidationError::Shape(
            "ResourceClaim.spec.consumerRef requires both kind and name".into(),
        ));
    }
    if spec.requests.is_empty() {
        return Err(ValidationError::Shape(
            "ResourceClaim.spec.requests must contain at least one entry".into(),
        ));
    }
    for request in &spec.requests {
        non_empty(&request.resource_type, "ResourceClaim.spec.requests[].resourceType")?;
        non_empty(&request.amount, "ResourceClaim.spec.requests[].amount")?;
    }
    Ok(())
}

fn validate_resource_registration(object: &serde_json::Value) -> Result<(), ValidationError> {
    let spec = decode_spec::<ResourceRegistrationSpec>(object, "ResourceRegistration")?;
    non_empty(&spec.resource_type, "ResourceRegistration.spec.resourceType")?;
    non_empty(&spec.unit, "ResourceRegistration.spec.unit")?;
    Ok(())
}

fn validate_claim_creation_policy(object: &serde_json::Value) -> Result<(), ValidationError> {
    let spec = decode_spec::<ClaimCreationPolicySpec>(object, "ClaimCreationPolicy")?;
    non_empty(&spec.trigger.kind, "ClaimCreationPolicy.spec.trigger.kind")?;
    non_empty(&spec.trigger.version, "ClaimCreationPolicy.spec.trigger.version")?;
    for request in &spec.claim_template.spec.requests {
        non_empty(&request.resource_type, "ClaimCreationPolicy.spec.claimTemplate.spec.requests[].resourceType")?;
    }
    Ok(())
}

fn validate_grant_creation_policy(object: &serde_json::Value) -> Result<(), ValidationError> {
    let spec = decode_spec::<GrantCreationPolicySpec>(object, "GrantCreationPolicy")?;
    non_empty(&spec.trigger.kind, "GrantCreationPolicy.spec.trigger.kind")?;
    non_empty(&spec.trigger.version, "GrantCreationPolicy.spec.trigger.version")?;
    Ok(())
}

fn validate_resource_grant(object: &serde_json::Value) -> Result<(), ValidationError> {
    let spec = decode_spec::<ResourceGrantSpec>(object, "ResourceGrant")?;
    non_empty(&spec.resource_type, "ResourceGrant.spec.resourceType")?;
    non_empty(&spec.amount, "ResourceGrant.spec.amount")?;
    Ok(())
}

fn decode_spec<T: serde::de::DeserializeOwned>(
    object: &serde_json::Value,
    kind: &'static str,
) -> Result<T, ValidationError> {
    let spec_value = object
        .get("spec")
        .ok_or_else(|| ValidationError::Decode(kind, "missing .spec".to_string()))?;
    serde_json::from_value(spec_value.clone()).map_err(|e| ValidationError::Decode(kind, e.to_string()))
}

fn non_empty(value: &str, field: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        Err(ValidationError::Shape(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[test]
    fn resource_claim_requires_consumer_ref_and_requests() {
        let object = json!({
            "spec": {
                "consumerRef": {"kind": "Team", "name": "team-a"},
                "requests": [{"resourceType": "cpu", "amount": "4"}],
                "triggerRef": {"group": "apps", "kind": "Deployment", "namespace": "team-a", "name": "web"},
            }
        });
        assert!(validate_resource_claim(&object).is_ok());
    }

    #[test]
    fn resource_claim_rejects_empty_requests() {
        let object = json!({
            "spec": {
                "consumerRef": {"kind": "Team", "name": "team-a"},
                "requests": [],
                "triggerRef": {"group": "apps", "kind": "Deployment", "namespace": "team-a", "name": "web"},
            }
        });
        assert!(validate_resource_claim(&object).is_err());
    }

    #[test]
    fn resource_claim_rejects_missing_spec() {
        let object = json!({});
        assert!(matches!(
            validate_resource_claim(&object),
            Err(ValidationError::Decode("ResourceClaim", _))
        ));
    }

    #[test]
    fn claim_creation_policy_requires_trigger_kind_and_version() {
        let object = json!({
            "spec": {
                "trigger": {"group": "apps", "version": "v1", "kind": "Deployment"},
                "disabled": false,
                "constraints": [],
                "claimTemplate": {
                    "metadata": {"labels": {}, "annotations": {}},
                    "spec": {"consumerRef": {"kind": "", "name": ""}, "requests": []},
                },
            }
        });
        assert!(validate_claim_creation_policy(&object).is_ok());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(validate("Widget", &json!({})).is_err());
    }

    #[rstest]
    #[case::resource_claim("ResourceClaim", true)]
    #[case::resource_registration("ResourceRegistration", true)]
    #[case::claim_creation_policy("ClaimCreationPolicy", true)]
    #[case::grant_creation_policy("GrantCreationPolicy", true)]
    #[case::resource_grant("ResourceGrant", true)]
    #[case::unrelated_kind("Widget", false)]
    #[case::empty_kind("", false)]
    fn is_quota_kind_cases(#[case] kind: &str, #[case] expected: bool) {
        assert_eq!(is_quota_kind(kind), expected);
    }

    #[test]
    fn validation_response_maps_error_to_400() {
        let response = validation_response("uid".to_string(), Err(ValidationError::Shape("bad".into())));
        assert!(!response.allowed);
        assert_eq!(response.status.unwrap().code, Some(400));
    }
}
