//! Typed shapes for the quota API group's remaining custom resources.
//!
//! These exist so `quota-admission-server::validation` has a concrete type to
//! decode the unstructured wire form into and check for schema-shape
//! validity; their semantics beyond "does this decode and pass basic shape
//! checks" are out of scope here (delegated to the external controller /
//! server-side validation).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::policy::{ClaimTemplate, PolicyTriggerKind};

pub const QUOTA_API_GROUP: &str = "quota.example.io";

/// Drives the admission pipeline: maps a trigger kind to constraints and a
/// claim template. The Policy Cache reflects this collection.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "quota.example.io",
    version = "v1",
    kind = "ClaimCreationPolicy",
    namespaced,
    status = "ClaimCreationPolicyStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClaimCreationPolicySpec {
    pub trigger: PolicyTriggerKind,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub constraints: Vec<String>,
    pub claim_template: ClaimTemplate,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimCreationPolicyStatus {
    #[serde(default)]
    pub ready: bool,
}

/// Registers a resource type as quota-trackable. Schema-shape only; never
/// consulted by the admission pipeline directly.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "quota.example.io",
    version = "v1",
    kind = "ResourceRegistration",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRegistrationSpec {
    pub resource_type: String,
    pub unit: String,
}

/// Drives the (out of scope) grant controller's creation of `ResourceGrant`
/// objects. Structurally parallel to `ClaimCreationPolicy`.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "quota.example.io",
    version = "v1",
    kind = "GrantCreationPolicy",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct GrantCreationPolicySpec {
    pub trigger: PolicyTriggerKind,
    #[serde(default)]
    pub disabled: bool,
}

/// A quota allotment. Balance accounting is entirely the grant/quota
/// controller's concern; the core only needs the shape to validate input.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "quota.example.io",
    version = "v1",
    kind = "ResourceGrant",
    namespaced,
    status = "ResourceGrantStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGrantSpec {
    pub resource_type: String,
    pub amount: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGrantStatus {
    #[serde(default)]
    pub consumed: String,
}
