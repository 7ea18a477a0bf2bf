//! The control-plane's HTTP admission webhook: a single `/validate` endpoint
//! plus the readiness/liveness probes a Kubernetes deployment expects.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use quota_admission_policy::PolicyCache;
use tracing::{debug, Span};

use crate::admission::AdmissionPipeline;
use crate::admission_review::{AdmissionReviewRequest, AdmissionReviewResponse};

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<AdmissionPipeline>,
    pub policy_cache: PolicyCache,
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/validate", post(validate_handler))
        .route("/readyz", get(readiness_handler))
        .route("/healthz", get(liveness_handler))
        .with_state(state)
}

#[tracing::instrument(
    name = "validate",
    fields(
        request_uid = tracing::field::Empty,
        kind = tracing::field::Empty,
        namespace = tracing::field::Empty,
        allowed = tracing::field::Empty,
    ),
    skip_all
)]
async fn validate_handler(
    State(state): State<ApiState>,
    Json(review): Json<AdmissionReviewRequest>,
) -> Json<AdmissionReviewResponse> {
    let span = Span::current();
    span.record("request_uid", review.request.uid.as_str());
    span.record("kind", review.request.kind.kind.as_str());
    span.record(
        "namespace",
        review.request.namespace.clone().unwrap_or_default().as_str(),
    );

    let response = state.pipeline.handle(&review.request).await;
    debug!(allowed = response.allowed, "admission request handled");
    span.record("allowed", response.allowed);

    Json(AdmissionReviewResponse::new(response))
}

/// Ready iff the policy cache has completed its initial list; the control
/// plane must not send admission traffic before that.
async fn readiness_handler(State(state): State<ApiState>) -> StatusCode {
    if state.policy_cache.has_synced() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}
