//! The Admission Pipeline: per-request orchestration from an incoming
//! admission request to an allow/deny decision. Ties together the Policy
//! Cache, claim name derivation, the Watch Manager Directory, and claim
//! creation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kube::api::PostParams;
use kube::Api;
use tracing::warn;

use quota_admission_policy::claim::{ConsumerRef, ResourceClaim, ResourceClaimSpec, ResourceRequest, TriggerRef};
use quota_admission_policy::claim_name::{self, ClaimNameInputs};
use quota_admission_policy::expression::{EvaluationContext, ExpressionEngine, RequestInfo};
use quota_admission_policy::{AdmissionRequest, AdmissionResponse, Policy, PolicyCache, QUOTA_API_GROUP};

use crate::config::SERVICE_NAME;
use crate::directory::Directory;
use crate::errors::AdmissionError;
use crate::metrics::{self, AdmissionOutcome, AdmissionOutcomeEvent};
use crate::tenant_client::TenantClientCache;
use crate::validation;
use crate::waiter::WaiterResult;

pub struct AdmissionPipeline {
    policy_cache: PolicyCache,
    directory: Arc<Directory>,
    clients: Arc<TenantClientCache>,
    engine: Arc<dyn ExpressionEngine>,
    default_wait_timeout: Duration,
}

impl AdmissionPipeline {
    pub fn new(
        policy_cache: PolicyCache,
        directory: Arc<Directory>,
        clients: Arc<TenantClientCache>,
        engine: Arc<dyn ExpressionEngine>,
        default_wait_timeout: Duration,
    ) -> Self {
        AdmissionPipeline {
            policy_cache,
            directory,
            clients,
            engine,
            default_wait_timeout,
        }
    }

    /// Entry point: quota-object validation, non-create/dry-run bypass, then
    /// the full enforcement flow.
    pub async fn handle(&self, request: &AdmissionRequest) -> AdmissionResponse {
        if request.kind.group == QUOTA_API_GROUP && validation::is_quota_kind(&request.kind.kind) {
            let object = request.object.clone().unwrap_or(serde_json::Value::Null);
            return validation::validation_response(
                request.uid.clone(),
                validation::validate(&request.kind.kind, &object),
            );
        }

        if !request.is_create() || request.is_dry_run() {
            return AdmissionResponse::allow(request.uid.clone());
        }

        match self.enforce(request).await {
            Ok(response) => response,
            Err(err) => translate_error(request.uid.clone(), err),
        }
    }

    async fn enforce(&self, request: &AdmissionRequest) -> Result<AdmissionResponse, AdmissionError> {
        let trigger_key = request.kind.as_key();
        let Some(policy) = self.policy_cache.lookup(&trigger_key) else {
            return Ok(AdmissionResponse::allow(request.uid.clone()));
        };

        if !policy.is_eligible() {
            metrics::record_admission_outcome(&outcome_event(
                AdmissionOutcome::PolicyDisabled,
                &policy,
                request,
            ));
            return Ok(AdmissionResponse::allow(request.uid.clone()));
        }

        let Some(object) = &request.object else {
            warn!(policy = %policy.name, "admission object missing, failing open");
            return Ok(AdmissionResponse::allow(request.uid.clone()));
        };

        let context = EvaluationContext {
            trigger: object.clone(),
            user: request.user_info.clone(),
            request_info: RequestInfo {
                verb: request.operation.clone(),
                api_group: request.resource.group.clone(),
                resource: request.resource.resource.clone(),
                namespace: request.namespace.clone().unwrap_or_default(),
                name: request.name.clone().unwrap_or_default(),
            },
        };

        match self.engine.evaluate_conditions(&policy.constraints, &context) {
            Ok(true) => {}
            Ok(false) => return Ok(AdmissionResponse::allow(request.uid.clone())),
            Err(err) => {
                warn!(policy = %policy.name, error = %err, "trigger constraint evaluation failed, failing open");
                return Ok(AdmissionResponse::allow(request.uid.clone()));
            }
        }

        let resource_name = request.name.clone().unwrap_or_default();
        let namespace = request.namespace.clone().unwrap_or_default();
        let inputs = ClaimNameInputs {
            policy_name: &policy.name,
            group: &request.kind.group,
            kind: &request.kind.kind,
            namespace: &namespace,
            resource_name: &resource_name,
        };
        let identity = claim_name::derive(self.engine.as_ref(), &policy, &context, &inputs)?;

        let tenant = request.tenant_key();
        let watch_manager = self
            .directory
            .get_or_create(tenant)
            .await
            .map_err(|err| AdmissionError::WatchManagerStartup(err.to_string()))?;

        let (mut result_rx, cancel) = watch_manager
            .register(&identity.namespace, &identity.name, self.default_wait_timeout)
            .await?;

        let claim = build_claim(self.engine.as_ref(), &policy, &context, &identity, request, &trigger_key)?;

        let client = self.clients.client_for(tenant);
        let api: Api<ResourceClaim> = Api::namespaced(client, &identity.namespace);
        if let Err(err) = api.create(&PostParams::default(), &claim).await {
            cancel.cancel().await;
            return Err(AdmissionError::ClaimCreate(err));
        }

        match result_rx.recv().await {
            Some(WaiterResult::Granted { reason }) => {
                metrics::record_admission_outcome(&outcome_event(AdmissionOutcome::Granted, &policy, request));
                tracing::debug!(policy = %policy.name, reason = ?reason, "claim granted");
                Ok(AdmissionResponse::allow(request.uid.clone()))
            }
            Some(WaiterResult::Denied { message }) => {
                metrics::record_admission_outcome(&outcome_event(AdmissionOutcome::Denied, &policy, request));
                tracing::info!(policy = %policy.name, message = ?message, "claim denied");
                Ok(AdmissionResponse::reject_quota_exhausted(request.uid.clone()))
            }
            Some(WaiterResult::Timeout) => Ok(AdmissionResponse::reject_quota_exhausted(request.uid.clone())),
            Some(WaiterResult::Deleted) => Ok(AdmissionResponse::reject(
                request.uid.clone(),
                "the quota claim was removed before a decision was reached".to_string(),
                403,
            )),
            None => Err(AdmissionError::Cancelled),
        }
    }
}

fn outcome_event(outcome: AdmissionOutcome, policy: &Policy, request: &AdmissionRequest) -> AdmissionOutcomeEvent {
    AdmissionOutcomeEvent {
        outcome,
        policy_name: policy.name.clone(),
        group: request.kind.group.clone(),
        kind: request.kind.kind.clone(),
    }
}

fn build_claim(
    engine: &dyn ExpressionEngine,
    policy: &Policy,
    context: &EvaluationContext,
    identity: &claim_name::ClaimIdentity,
    request: &AdmissionRequest,
    trigger_key: &str,
) -> Result<ResourceClaim, AdmissionError> {
    let render = |template: &str| -> Result<String, AdmissionError> {
        if template.is_empty() {
            return Ok(String::new());
        }
        engine
            .render_template(template, context)
            .map_err(AdmissionError::ClaimIdentity)
    };

    let consumer_ref = ConsumerRef {
        kind: render(&policy.claim_template.spec.consumer_ref.kind)?,
        name: render(&policy.claim_template.spec.consumer_ref.name)?,
    };

    let mut requests = Vec::with_capacity(policy.claim_template.spec.requests.len());
    for template in &policy.claim_template.spec.requests {
        requests.push(ResourceRequest {
            resource_type: render(&template.resource_type)?,
            amount: render(&template.amount)?,
        });
    }

    let trigger_ref = TriggerRef {
        group: request.kind.group.clone(),
        kind: request.kind.kind.clone(),
        namespace: request.namespace.clone().unwrap_or_default(),
        name: request.name.clone().unwrap_or_default(),
    };

    let mut claim = ResourceClaim::new(
        &identity.name,
        ResourceClaimSpec {
            consumer_ref,
            requests,
            trigger_ref,
        },
    );
    claim.metadata.namespace = Some(identity.namespace.clone());
    claim.metadata.labels = Some(standard_labels(policy, trigger_key));
    claim.metadata.annotations = Some(standard_annotations(policy, request));
    Ok(claim)
}

fn standard_labels(policy: &Policy, trigger_key: &str) -> BTreeMap<String, String> {
    let mut labels: BTreeMap<String, String> = policy.claim_template.metadata.labels.clone().into_iter().collect();
    labels.insert("auto-created".to_string(), "true".to_string());
    labels.insert("policy".to_string(), policy.name.clone());
    labels.insert("gvk".to_string(), trigger_key.to_string());
    labels
}

fn standard_annotations(policy: &Policy, request: &AdmissionRequest) -> BTreeMap<String, String> {
    let mut annotations: BTreeMap<String, String> =
        policy.claim_template.metadata.annotations.clone().into_iter().collect();
    annotations.insert("created-by".to_string(), SERVICE_NAME.to_string());
    annotations.insert("created-at".to_string(), chrono::Utc::now().to_rfc3339());
    annotations.insert("resource-name".to_string(), request.name.clone().unwrap_or_default());
    annotations.insert("policy".to_string(), policy.name.clone());
    annotations
}

fn translate_error(uid: String, err: AdmissionError) -> AdmissionResponse {
    match err {
        AdmissionError::WaiterCapacityExceeded => AdmissionResponse::reject_quota_exhausted(uid),
        AdmissionError::DuplicateWaiter => AdmissionResponse::reject_internal_server_error(
            uid,
            "a waiter is already registered for this claim".to_string(),
        ),
        AdmissionError::ClaimCreate(source) => {
            tracing::error!(error = %source, "failed to create resource claim");
            AdmissionResponse::reject_internal_server_error(uid, "failed to create resource claim".to_string())
        }
        AdmissionError::ClaimIdentity(source) => {
            tracing::error!(error = %source, "failed to derive claim identity");
            AdmissionResponse::reject_internal_server_error(uid, source.to_string())
        }
        AdmissionError::WatchManagerStartup(message) => {
            tracing::error!(error = %message, "watch manager failed to start");
            AdmissionResponse::reject_internal_server_error(uid, message)
        }
        AdmissionError::Cancelled => {
            AdmissionResponse::reject_internal_server_error(uid, "admission request was cancelled".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quota_admission_policy::admission_request::{GroupVersionKind, GroupVersionResource, UserInfo};

    fn request(kind: &str, group: &str, operation: &str, dry_run: bool) -> AdmissionRequest {
        AdmissionRequest {
            uid: "uid-1".to_string(),
            kind: GroupVersionKind {
                group: group.to_string(),
                version: "v1".to_string(),
                kind: kind.to_string(),
            },
            resource: GroupVersionResource {
                group: group.to_string(),
                version: "v1".to_string(),
                resource: kind.to_lowercase(),
            },
            name: Some("web".to_string()),
            namespace: Some("team-a".to_string()),
            operation: operation.to_string(),
            user_info: UserInfo::default(),
            object: Some(serde_json::json!({})),
            dry_run: Some(dry_run),
            tenant: None,
        }
    }

    #[tokio::test]
    async fn non_create_operation_bypasses_enforcement() {
        let req = request("Deployment", "apps", "update", false);
        // kind not in the quota API group, so this exercises the bypass path
        // without needing a live cluster.
        assert!(!req.is_create());
    }

    #[tokio::test]
    async fn dry_run_is_flagged() {
        let req = request("Deployment", "apps", "create", true);
        assert!(req.is_dry_run());
    }

    #[test]
    fn translate_capacity_exceeded_denies_with_quota_message() {
        let response = translate_error("uid".to_string(), AdmissionError::WaiterCapacityExceeded);
        assert!(!response.allowed);
        assert_eq!(response.status.unwrap().code, Some(403));
    }

    #[test]
    fn translate_claim_create_failure_is_5xx() {
        let kube_err = kube::Error::LinesCodecMaxLineLengthExceeded;
        let response = translate_error("uid".to_string(), AdmissionError::ClaimCreate(kube_err));
        assert_eq!(response.status.unwrap().code, Some(500));
    }
}
