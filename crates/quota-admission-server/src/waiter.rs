use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Outcome delivered to a blocked admission request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WaiterResult {
    Granted { reason: Option<String> },
    Denied { message: Option<String> },
    Timeout,
    Deleted,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RegisterError {
    CapacityExceeded,
    AlreadyRegistered,
}

struct Entry {
    sender: mpsc::Sender<WaiterResult>,
}

/// Map from (namespace, name) to a single outstanding waiter. Also owns the
/// active-waiter counter and the TTL timer: every transition of the counter
/// must be followed by a timer (re)arm/cancel decision, so the two live
/// together rather than as separate locks chasing each other.
pub struct WaiterRegistry {
    entries: RwLock<HashMap<(String, String), Entry>>,
    capacity: usize,
    active_count: AtomicI64,
    ttl: Duration,
    ttl_timer: Mutex<Option<JoinHandle<()>>>,
    ttl_expired: Arc<Notify>,
}

impl WaiterRegistry {
    pub fn new(capacity: usize, ttl: Duration) -> Arc<WaiterRegistry> {
        Arc::new(WaiterRegistry {
            entries: RwLock::new(HashMap::new()),
            capacity,
            active_count: AtomicI64::new(0),
            ttl,
            ttl_timer: Mutex::new(None),
            ttl_expired: Arc::new(Notify::new()),
        })
    }

    /// Signalled when the TTL timer fires with zero active waiters. The
    /// owning Watch Manager awaits this to trigger `stop()` and its
    /// directory-removal callback.
    pub fn ttl_expired_signal(&self) -> Arc<Notify> {
        self.ttl_expired.clone()
    }

    pub fn active_count(&self) -> i64 {
        self.active_count.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("waiter registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a waiter for (namespace, name). Capacity exceeded or a
    /// duplicate key fails without side effects. MUST be called before the
    /// corresponding claim is created: the watch stream starts from "now"
    /// and does not list existing claims.
    pub async fn register(
        self: &Arc<Self>,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<(mpsc::Receiver<WaiterResult>, CancelHandle), RegisterError> {
        let key = (namespace.to_string(), name.to_string());
        let rx = {
            let mut entries = self.entries.write().expect("waiter registry lock poisoned");
            if self.capacity != 0 && entries.len() >= self.capacity {
                return Err(RegisterError::CapacityExceeded);
            }
            if entries.contains_key(&key) {
                return Err(RegisterError::AlreadyRegistered);
            }
            let (tx, rx) = mpsc::channel(1);
            entries.insert(key.clone(), Entry { sender: tx });
            rx
        };

        let new_count = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.on_count_changed(new_count).await;

        let timer_registry = self.clone();
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            sleep(timeout).await;
            timer_registry
                .deliver(&timer_key.0, &timer_key.1, WaiterResult::Timeout)
                .await;
        });

        Ok((
            rx,
            CancelHandle {
                registry: self.clone(),
                namespace: key.0,
                name: key.1,
                timer,
                cancelled: AtomicBool::new(false),
            },
        ))
    }

    /// Idempotent removal with no delivery. Used by the timeout timer path's
    /// counterpart (cancellation) and when the caller no longer wants the
    /// waiter's result.
    pub async fn unregister(self: &Arc<Self>, namespace: &str, name: &str) {
        let removed = self
            .entries
            .write()
            .expect("waiter registry lock poisoned")
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some();
        if removed {
            let new_count = self.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
            self.on_count_changed(new_count).await;
        }
    }

    /// Delivers a terminal result if a waiter is registered; no-op
    /// otherwise. The entry is removed synchronously first so a second
    /// terminal event for the same claim cannot re-deliver.
    pub async fn deliver(self: &Arc<Self>, namespace: &str, name: &str, result: WaiterResult) {
        let sender = self
            .entries
            .write()
            .expect("waiter registry lock poisoned")
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|entry| entry.sender);

        let Some(sender) = sender else {
            return;
        };

        let new_count = self.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
        self.on_count_changed(new_count).await;

        // Capacity 1, single writer, single consumer: a full channel here
        // would indicate a protocol bug (duplicate delivery), not backpressure.
        if sender.try_send(result).is_err() {
            tracing::warn!("waiter channel rejected delivery, possible duplicate terminal event");
        }
    }

    /// Delivers a deletion result to every outstanding waiter and clears the
    /// map. Used by `WatchManager::stop`: a stopped manager can no longer
    /// promise a terminal event, so outstanding waiters are treated the same
    /// as claims observed deleted out-of-band.
    pub async fn deliver_deleted_to_all(self: &Arc<Self>) {
        let senders: Vec<_> = {
            let mut entries = self.entries.write().expect("waiter registry lock poisoned");
            entries.drain().map(|(_, entry)| entry.sender).collect()
        };
        if senders.is_empty() {
            return;
        }
        self.active_count.store(0, Ordering::SeqCst);
        self.on_count_changed(0).await;
        for sender in senders {
            let _ = sender.try_send(WaiterResult::Deleted);
        }
    }

    async fn on_count_changed(&self, count: i64) {
        let mut timer_slot = self.ttl_timer.lock().await;
        if count > 0 {
            if let Some(handle) = timer_slot.take() {
                handle.abort();
            }
        } else {
            if let Some(handle) = timer_slot.take() {
                handle.abort();
            }
            let ttl = self.ttl;
            let signal = self.ttl_expired.clone();
            *timer_slot = Some(tokio::spawn(async move {
                sleep(ttl).await;
                signal.notify_one();
            }));
        }
    }
}

/// Cancels the per-waiter timeout timer and removes the registry entry. Safe
/// to invoke multiple times. Also unregisters on drop, so an admission
/// request dropped mid-wait (client disconnect) releases its waiter slot
/// immediately instead of leaking it until the timeout timer fires.
pub struct CancelHandle {
    registry: Arc<WaiterRegistry>,
    namespace: String,
    name: String,
    timer: JoinHandle<()>,
    cancelled: AtomicBool,
}

impl CancelHandle {
    pub async fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.timer.abort();
        self.registry.unregister(&self.namespace, &self.name).await;
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.timer.abort();
        let registry = self.registry.clone();
        let namespace = std::mem::take(&mut self.namespace);
        let name = std::mem::take(&mut self.name);
        tokio::spawn(async move {
            registry.unregister(&namespace, &name).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn register_then_deliver_is_observed() {
        let registry = WaiterRegistry::new(10, StdDuration::from_millis(50));
        let (mut rx, _cancel) = registry
            .register("ns", "claim-a", StdDuration::from_secs(5))
            .await
            .unwrap();

        registry
            .deliver("ns", "claim-a", WaiterResult::Granted { reason: None })
            .await;

        let result = rx.recv().await.unwrap();
        assert_eq!(result, WaiterResult::Granted { reason: None });
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let registry = WaiterRegistry::new(10, StdDuration::from_millis(50));
        let (_rx, _cancel) = registry
            .register("ns", "claim-a", StdDuration::from_secs(5))
            .await
            .unwrap();

        let second = registry
            .register("ns", "claim-a", StdDuration::from_secs(5))
            .await;
        assert_eq!(second.err(), Some(RegisterError::AlreadyRegistered));
    }

    #[tokio::test]
    async fn capacity_exceeded_is_rejected() {
        let registry = WaiterRegistry::new(1, StdDuration::from_millis(50));
        let _first = registry
            .register("ns", "a", StdDuration::from_secs(5))
            .await
            .unwrap();
        let second = registry.register("ns", "b", StdDuration::from_secs(5)).await;
        assert_eq!(second.err(), Some(RegisterError::CapacityExceeded));
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = WaiterRegistry::new(10, StdDuration::from_millis(50));
        let (_rx, _cancel) = registry
            .register("ns", "a", StdDuration::from_secs(5))
            .await
            .unwrap();
        registry.unregister("ns", "a").await;
        registry.unregister("ns", "a").await;
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn cancel_handle_is_safe_to_invoke_twice() {
        let registry = WaiterRegistry::new(10, StdDuration::from_millis(50));
        let (_rx, cancel) = registry
            .register("ns", "a", StdDuration::from_secs(5))
            .await
            .unwrap();
        cancel.cancel().await;
        cancel.cancel().await;
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn dropping_cancel_handle_unregisters_waiter() {
        let registry = WaiterRegistry::new(10, StdDuration::from_millis(50));
        let (_rx, cancel) = registry
            .register("ns", "a", StdDuration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(registry.len(), 1);

        drop(cancel);
        // Drop spawns the unregister as a task; wait for it to run.
        for _ in 0..100 {
            if registry.is_empty() {
                break;
            }
            sleep(StdDuration::from_millis(1)).await;
        }

        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn cancel_then_drop_does_not_double_unregister() {
        let registry = WaiterRegistry::new(10, StdDuration::from_millis(50));
        let (_rx, cancel) = registry
            .register("ns", "a", StdDuration::from_secs(5))
            .await
            .unwrap();
        cancel.cancel().await;
        assert_eq!(registry.active_count(), 0);
        drop(cancel);
        sleep(StdDuration::from_millis(20)).await;
        // Active count must not go negative from a redundant drop-time unregister.
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn timeout_delivers_timeout_result() {
        let registry = WaiterRegistry::new(10, StdDuration::from_millis(500));
        let (mut rx, _cancel) = registry
            .register("ns", "a", StdDuration::from_millis(20))
            .await
            .unwrap();
        let result = rx.recv().await.unwrap();
        assert_eq!(result, WaiterResult::Timeout);
    }

    #[tokio::test]
    async fn a_second_terminal_event_cannot_redeliver() {
        let registry = WaiterRegistry::new(10, StdDuration::from_millis(50));
        let (mut rx, _cancel) = registry
            .register("ns", "a", StdDuration::from_secs(5))
            .await
            .unwrap();
        registry
            .deliver("ns", "a", WaiterResult::Granted { reason: None })
            .await;
        // the claim controller races a second update; this must be a no-op
        registry
            .deliver("ns", "a", WaiterResult::Denied { message: None })
            .await;

        let result = rx.recv().await.unwrap();
        assert_eq!(result, WaiterResult::Granted { reason: None });
        assert!(rx.recv().await.is_none() || rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ttl_fires_after_quiet_period_with_zero_waiters() {
        let registry = WaiterRegistry::new(10, StdDuration::from_millis(30));
        let signal = registry.ttl_expired_signal();
        let (_rx, cancel) = registry
            .register("ns", "a", StdDuration::from_secs(5))
            .await
            .unwrap();
        cancel.cancel().await;

        tokio::time::timeout(StdDuration::from_millis(200), signal.notified())
            .await
            .expect("ttl signal should fire once the registry is quiet");
    }

    #[tokio::test]
    async fn registering_before_ttl_fires_cancels_it() {
        let registry = WaiterRegistry::new(10, StdDuration::from_millis(30));
        let signal = registry.ttl_expired_signal();
        let (_rx, cancel) = registry
            .register("ns", "a", StdDuration::from_secs(5))
            .await
            .unwrap();
        cancel.cancel().await;

        let (_rx2, _cancel2) = registry
            .register("ns", "b", StdDuration::from_secs(5))
            .await
            .unwrap();

        let timed_out = tokio::time::timeout(StdDuration::from_millis(80), signal.notified())
            .await
            .is_err();
        assert!(timed_out, "ttl must not fire while a waiter is active");
    }
}
