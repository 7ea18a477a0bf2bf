use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The quota claim custom resource. Created by the admission pipeline,
/// transitioned by an external controller, never mutated by the core after
/// creation.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "quota.example.io",
    version = "v1",
    kind = "ResourceClaim",
    namespaced,
    status = "ResourceClaimStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceClaimSpec {
    pub consumer_ref: ConsumerRef,
    pub requests: Vec<ResourceRequest>,
    pub trigger_ref: TriggerRef,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerRef {
    pub kind: String,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequest {
    pub resource_type: String,
    pub amount: String,
}

/// Back-reference to the resource whose admission triggered this claim. The
/// triggering resource does not reference the claim: this is a plain value
/// field, not a graph edge.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRef {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceClaimStatus {
    #[serde(default)]
    pub conditions: Vec<ClaimCondition>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// The claim's quota decision as evaluated from its status conditions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    Granted { reason: Option<String> },
    Denied { message: Option<String> },
    Pending,
}

pub const GRANTED_CONDITION_TYPE: &str = "Granted";
pub const DENIED_REASON: &str = "Denied";

impl ResourceClaimStatus {
    /// Scans the conditions list; the first condition with type `Granted`
    /// decides. Missing status/conditions is non-terminal.
    pub fn outcome(&self) -> ClaimOutcome {
        for condition in &self.conditions {
            if condition.condition_type != GRANTED_CONDITION_TYPE {
                continue;
            }
            return match condition.status {
                ConditionStatus::True => ClaimOutcome::Granted {
                    reason: condition.reason.clone(),
                },
                ConditionStatus::False if condition.reason.as_deref() == Some(DENIED_REASON) => {
                    ClaimOutcome::Denied {
                        message: condition.message.clone(),
                    }
                }
                _ => ClaimOutcome::Pending,
            };
        }
        ClaimOutcome::Pending
    }
}
