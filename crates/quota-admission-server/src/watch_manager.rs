use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, WatchEvent, WatchParams};
use kube::Client;
use rand::Rng;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use quota_admission_policy::claim::{ClaimOutcome, ResourceClaim};

use crate::config::RetryConfig;
use crate::errors::AdmissionError;
use crate::metrics;
use crate::waiter::{CancelHandle, RegisterError, WaiterRegistry, WaiterResult};

const METRICS_TICK_INTERVAL: Duration = Duration::from_secs(15);

/// Stream-loop state, driven by stream establishment/failure/stop events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connected,
    Backoff,
    Terminated,
}

#[derive(Default, Clone)]
struct ResumePosition {
    resource_version: Option<String>,
    bookmark: Option<String>,
    bookmark_at: Option<Instant>,
}

enum StreamOutcome {
    /// The server indicated the watch position has expired; restart from
    /// "now" immediately, no backoff.
    Gone,
    /// A transient failure; back off before the next attempt.
    Error,
    /// `stop()` was called.
    Stopped,
}

/// One per tenant. Owns the live event stream, resumption state, the waiter
/// registry, the TTL timer (via the registry), and an atomic active-waiter
/// counter.
pub struct WatchManager {
    tenant: String,
    client: Client,
    registry: Arc<WaiterRegistry>,
    state: RwLock<StreamState>,
    resume: RwLock<ResumePosition>,
    stopped: AtomicBool,
    notify_stop: Arc<Notify>,
    startup_signal: Arc<Notify>,
    retry: RetryConfig,
    startup_timeout: Duration,
    gone_restarts: AtomicI64,
    task: Mutex<Option<JoinHandle<()>>>,
    uptime_started_at: RwLock<Option<Instant>>,
}

impl WatchManager {
    pub fn new(
        tenant: String,
        client: Client,
        max_waiters: usize,
        ttl: Duration,
        retry: RetryConfig,
        startup_timeout: Duration,
    ) -> Arc<WatchManager> {
        Arc::new(WatchManager {
            tenant,
            client,
            registry: WaiterRegistry::new(max_waiters, ttl),
            state: RwLock::new(StreamState::Disconnected),
            resume: RwLock::new(ResumePosition::default()),
            stopped: AtomicBool::new(false),
            notify_stop: Arc::new(Notify::new()),
            startup_signal: Arc::new(Notify::new()),
            retry,
            startup_timeout,
            gone_restarts: AtomicI64::new(0),
            task: Mutex::new(None),
            uptime_started_at: RwLock::new(None),
        })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn state(&self) -> StreamState {
        *self.state.read().expect("watch manager state lock poisoned")
    }

    /// Blocks until the first stream is established or `watch-startup-timeout`
    /// elapses.
    pub async fn start(self: &Arc<Self>) -> Result<(), AdmissionError> {
        let manager = self.clone();
        let task = tokio::spawn(async move { manager.run().await });
        *self.task.lock().await = Some(task);

        let ticker = self.clone();
        tokio::spawn(async move { ticker.metrics_ticker().await });

        let startup_signal = self.startup_signal.clone();
        tokio::time::timeout(self.startup_timeout, startup_signal.notified())
            .await
            .map_err(|_| {
                AdmissionError::WatchManagerStartup(format!(
                    "tenant '{}' did not establish a watch stream within {:?}",
                    self.tenant, self.startup_timeout
                ))
            })
    }

    /// Idempotent. Cancels the stream, delivers a deletion result to every
    /// outstanding waiter, stops the TTL timer.
    pub async fn stop(self: &Arc<Self>) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify_stop.notify_waiters();
        self.registry.deliver_deleted_to_all().await;
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        *self.state.write().expect("watch manager state lock poisoned") = StreamState::Terminated;
    }

    pub async fn register(
        self: &Arc<Self>,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<(tokio::sync::mpsc::Receiver<WaiterResult>, CancelHandle), RegisterError> {
        self.registry.register(namespace, name, timeout).await
    }

    /// Awaits the TTL-expired signal forever; the caller should race this
    /// against other shutdown sources and call `stop()` plus remove the
    /// manager from its directory when it fires.
    pub fn ttl_expired_signal(&self) -> Arc<tokio::sync::Notify> {
        self.registry.ttl_expired_signal()
    }

    /// Third cooperating loop: ticks uptime and bookmark-age gauges until
    /// the manager is stopped. Independent of the event/retry loop so a
    /// backoff spell doesn't starve metrics.
    async fn metrics_ticker(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(METRICS_TICK_INTERVAL) => {}
                _ = self.notify_stop.notified() => return,
            }
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            let uptime = self
                .uptime_started_at
                .read()
                .expect("watch manager uptime lock poisoned")
                .map(|started| started.elapsed().as_secs_f64())
                .unwrap_or(0.0);
            let bookmark_age = self
                .resume
                .read()
                .expect("watch manager resume lock poisoned")
                .bookmark_at
                .map(|at| at.elapsed().as_secs_f64());
            metrics::record_watch_metrics(&self.tenant, uptime, bookmark_age);
        }
    }

    async fn run(self: Arc<Self>) {
        let mut attempt: u32 = 0;
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                *self.state.write().expect("watch manager state lock poisoned") = StreamState::Terminated;
                return;
            }
            *self.state.write().expect("watch manager state lock poisoned") = StreamState::Disconnected;

            match self.establish_and_consume().await {
                StreamOutcome::Stopped => {
                    *self.state.write().expect("watch manager state lock poisoned") = StreamState::Terminated;
                    return;
                }
                StreamOutcome::Gone => {
                    self.gone_restarts.fetch_add(1, Ordering::SeqCst);
                    metrics::record_gone_restart(&self.tenant);
                    attempt = 0;
                    continue;
                }
                StreamOutcome::Error => {
                    *self.state.write().expect("watch manager state lock poisoned") = StreamState::Backoff;
                    attempt += 1;
                    let nominal = self.retry.nominal_delay_for_attempt(attempt);
                    let sample: f64 = rand::thread_rng().gen_range(0.0..1.0);
                    let delay = self.retry.jittered_delay(nominal, sample);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {},
                        _ = self.notify_stop.notified() => {
                            *self.state.write().expect("watch manager state lock poisoned") = StreamState::Terminated;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn establish_and_consume(self: &Arc<Self>) -> StreamOutcome {
        let api: Api<ResourceClaim> = Api::all(self.client.clone());

        let resume_version = {
            let resume = self.resume.read().expect("watch manager resume lock poisoned");
            resume
                .bookmark
                .clone()
                .or_else(|| resume.resource_version.clone())
                .unwrap_or_default()
        };

        let watch_params = WatchParams::default();
        let stream = match api.watch(&watch_params, &resume_version).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(tenant = %self.tenant, error = %err, "failed to establish claim watch stream");
                return StreamOutcome::Error;
            }
        };
        tokio::pin!(stream);

        *self.state.write().expect("watch manager state lock poisoned") = StreamState::Connected;
        *self
            .uptime_started_at
            .write()
            .expect("watch manager uptime lock poisoned") = Some(Instant::now());
        self.startup_signal.notify_one();
        info!(tenant = %self.tenant, "claim watch stream established");

        loop {
            tokio::select! {
                _ = self.notify_stop.notified() => {
                    return StreamOutcome::Stopped;
                }
                item = stream.next() => {
                    match item {
                        None => return StreamOutcome::Error,
                        Some(Ok(event)) => {
                            if let Some(outcome) = self.handle_event(event).await {
                                return outcome;
                            }
                        }
                        Some(Err(err)) => {
                            warn!(tenant = %self.tenant, error = %err, "claim watch stream transient error");
                            return StreamOutcome::Error;
                        }
                    }
                }
            }
        }
    }

    async fn handle_event(self: &Arc<Self>, event: WatchEvent<ResourceClaim>) -> Option<StreamOutcome> {
        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                self.record_resource_version(&obj);
                self.evaluate_and_deliver(&obj).await;
                None
            }
            WatchEvent::Deleted(obj) => {
                self.record_resource_version(&obj);
                if let (Some(ns), Some(name)) = (obj.metadata.namespace.clone(), obj.metadata.name.clone()) {
                    self.registry.deliver(&ns, &name, WaiterResult::Deleted).await;
                }
                None
            }
            WatchEvent::Bookmark(bookmark) => {
                let mut resume = self.resume.write().expect("watch manager resume lock poisoned");
                resume.bookmark = Some(bookmark.metadata.resource_version.clone());
                resume.bookmark_at = Some(Instant::now());
                None
            }
            WatchEvent::Error(err) => {
                if is_gone(err.code) {
                    debug!(tenant = %self.tenant, "watch position expired, restarting from now");
                    *self.resume.write().expect("watch manager resume lock poisoned") = ResumePosition::default();
                    Some(StreamOutcome::Gone)
                } else {
                    warn!(tenant = %self.tenant, reason = %err.reason, message = %err.message, "watch stream reported an error event");
                    Some(StreamOutcome::Error)
                }
            }
        }
    }

    async fn evaluate_and_deliver(self: &Arc<Self>, obj: &ResourceClaim) {
        let (Some(namespace), Some(name)) = (obj.metadata.namespace.clone(), obj.metadata.name.clone()) else {
            return;
        };
        let status = obj.status.clone().unwrap_or_default();
        match status.outcome() {
            ClaimOutcome::Granted { reason } => {
                self.registry
                    .deliver(&namespace, &name, WaiterResult::Granted { reason })
                    .await;
            }
            ClaimOutcome::Denied { message } => {
                self.registry
                    .deliver(&namespace, &name, WaiterResult::Denied { message })
                    .await;
            }
            ClaimOutcome::Pending => {}
        }
    }

    fn record_resource_version(&self, obj: &ResourceClaim) {
        if let Some(rv) = obj.metadata.resource_version.clone() {
            self.resume.write().expect("watch manager resume lock poisoned").resource_version = Some(rv);
        }
    }
}

fn is_gone(code: u16) -> bool {
    code == 410
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_gone_matches_http_410() {
        assert!(is_gone(410));
        assert!(!is_gone(500));
        assert!(!is_gone(200));
    }
}
