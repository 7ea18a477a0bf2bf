use anyhow::Result;
use lazy_static::lazy_static;
use opentelemetry::metrics::{Counter, Gauge};
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;

const METER_NAME: &str = "quota-admission";

pub fn setup_metrics(otlp_endpoint: &str) -> Result<()> {
    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(otlp_endpoint)
        .build()?;

    let periodic_reader =
        opentelemetry_sdk::metrics::PeriodicReader::builder(metric_exporter, opentelemetry_sdk::runtime::Tokio)
            .build();
    let meter_provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_reader(periodic_reader)
        .build();

    global::set_meter_provider(meter_provider);
    Ok(())
}

lazy_static! {
    static ref ADMISSION_OUTCOMES_TOTAL: Counter<u64> = global::meter(METER_NAME)
        .u64_counter("quota_admission_outcomes_total")
        .build();
    static ref GONE_RESTARTS_TOTAL: Counter<u64> = global::meter(METER_NAME)
        .u64_counter("quota_admission_watch_gone_restarts_total")
        .build();
    static ref WATCH_UPTIME_SECONDS: Gauge<f64> = global::meter(METER_NAME)
        .f64_gauge("quota_admission_watch_uptime_seconds")
        .build();
    static ref WATCH_BOOKMARK_AGE_SECONDS: Gauge<f64> = global::meter(METER_NAME)
        .f64_gauge("quota_admission_watch_bookmark_age_seconds")
        .build();
}

/// One of the three admission outcomes the enforcement flow names:
/// `granted`, `denied`, `policy_disabled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Granted,
    Denied,
    PolicyDisabled,
}

impl AdmissionOutcome {
    fn as_str(self) -> &'static str {
        match self {
            AdmissionOutcome::Granted => "granted",
            AdmissionOutcome::Denied => "denied",
            AdmissionOutcome::PolicyDisabled => "policy_disabled",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AdmissionOutcomeEvent {
    pub outcome: AdmissionOutcome,
    pub policy_name: String,
    pub group: String,
    pub kind: String,
}

pub fn record_admission_outcome(event: &AdmissionOutcomeEvent) {
    ADMISSION_OUTCOMES_TOTAL.add(
        1,
        &[
            KeyValue::new("outcome", event.outcome.as_str()),
            KeyValue::new("policy", event.policy_name.clone()),
            KeyValue::new("group", event.group.clone()),
            KeyValue::new("kind", event.kind.clone()),
        ],
    );
}

pub fn record_gone_restart(tenant: &str) {
    GONE_RESTARTS_TOTAL.add(1, &[KeyValue::new("tenant", tenant.to_string())]);
}

/// Updated by each watch manager's metrics ticker: stream uptime and the age
/// of the last bookmark, both per tenant.
pub fn record_watch_metrics(tenant: &str, uptime_seconds: f64, bookmark_age_seconds: Option<f64>) {
    let attrs = [KeyValue::new("tenant", tenant.to_string())];
    WATCH_UPTIME_SECONDS.record(uptime_seconds, &attrs);
    if let Some(age) = bookmark_age_seconds {
        WATCH_BOOKMARK_AGE_SECONDS.record(age, &attrs);
    }
}
