use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crds::{ClaimCreationPolicy, ClaimCreationPolicySpec};
use crate::errors::PolicyError;

/// The (group, version, kind) a policy watches for on admission.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct PolicyTriggerKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl PolicyTriggerKind {
    pub fn as_key(&self) -> String {
        format!("{}/{}/{}", self.group, self.version, self.kind)
    }
}

/// In-memory, validated snapshot of a `ClaimCreationPolicy` object, as kept by
/// the Policy Cache. Distinct from the raw CRD: the cache only ever stores
/// policies that are ready and not disabled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub trigger: PolicyTriggerKind,
    pub disabled: bool,
    pub constraints: Vec<String>,
    pub claim_template: ClaimTemplate,
}

impl Policy {
    /// A policy is eligible iff it is not disabled and its ready condition is
    /// true. The cache never stores non-ready or disabled policies, so this
    /// check is redundant defence on the admission path, not the primary gate.
    pub fn is_eligible(&self) -> bool {
        !self.disabled
    }

    pub fn from_crd(crd: &ClaimCreationPolicy) -> Result<Policy, PolicyError> {
        let spec: &ClaimCreationPolicySpec = &crd.spec;
        let name = crd
            .metadata
            .name
            .clone()
            .ok_or_else(|| PolicyError::InvalidPolicy("<unnamed>".into(), "missing metadata.name".into()))?;

        Ok(Policy {
            name: name.clone(),
            trigger: spec.trigger.clone(),
            disabled: spec.disabled,
            constraints: spec.constraints.clone(),
            claim_template: spec.claim_template.clone(),
        })
    }

    pub fn is_ready(crd: &ClaimCreationPolicy) -> bool {
        crd.status
            .as_ref()
            .map(|s| s.ready)
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimTemplate {
    pub metadata: ClaimMetadataTemplate,
    pub spec: ClaimSpecTemplate,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimMetadataTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSpecTemplate {
    pub consumer_ref: ConsumerRefTemplate,
    pub requests: Vec<ResourceRequestTemplate>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerRefTemplate {
    pub kind: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequestTemplate {
    pub resource_type: String,
    /// Template expression string; rendered to a concrete amount at claim creation.
    pub amount: String,
}
