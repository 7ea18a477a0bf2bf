use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use futures::StreamExt;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use tracing::warn;

use crate::crds::ClaimCreationPolicy;
use crate::policy::Policy;

/// Background-synced cache of eligible claim-creation policies, keyed by
/// trigger kind. Updated strictly through the reflector task; the admission
/// path only ever reads.
#[derive(Clone)]
pub struct PolicyCache {
    inner: Arc<Inner>,
}

struct Inner {
    by_trigger_kind: RwLock<HashMap<String, Policy>>,
    name_to_trigger_kind: RwLock<HashMap<String, String>>,
    synced: AtomicBool,
}

impl PolicyCache {
    /// `lookup(kind) -> policy | none`. In-memory only; never makes a
    /// network call on the hot path.
    pub fn lookup(&self, trigger_kind_key: &str) -> Option<Policy> {
        self.inner
            .by_trigger_kind
            .read()
            .expect("policy cache lock poisoned")
            .get(trigger_kind_key)
            .cloned()
    }

    /// Ready iff the cache has completed its initial list. Backs the
    /// surrounding system's readiness probe.
    pub fn has_synced(&self) -> bool {
        self.inner.synced.load(Ordering::SeqCst)
    }

    /// Starts the reflector task against the `ClaimCreationPolicy`
    /// collection and returns immediately; the cache becomes ready once the
    /// initial list-and-replace completes.
    pub fn create_and_run(client: Client, namespace: Option<String>) -> PolicyCache {
        let inner = Arc::new(Inner {
            by_trigger_kind: RwLock::new(HashMap::new()),
            name_to_trigger_kind: RwLock::new(HashMap::new()),
            synced: AtomicBool::new(false),
        });

        let task_inner = inner.clone();
        tokio::spawn(async move {
            let api: Api<ClaimCreationPolicy> = match &namespace {
                Some(ns) => Api::namespaced(client, ns),
                None => Api::all(client),
            };
            let stream = watcher(api, watcher::Config::default()).default_backoff();
            let mut stream = Box::pin(stream);
            while let Some(event) = stream.next().await {
                match event {
                    Ok(watcher::Event::InitApply(obj)) | Ok(watcher::Event::Apply(obj)) => {
                        apply(&task_inner, &obj);
                    }
                    Ok(watcher::Event::InitDone) => {
                        task_inner.synced.store(true, Ordering::SeqCst);
                    }
                    Ok(watcher::Event::Delete(obj)) => {
                        remove(&task_inner, &obj);
                    }
                    Ok(watcher::Event::Init) => {}
                    Err(err) => {
                        warn!(error = %err, "claim-creation-policy watch stream error, retrying");
                    }
                }
            }
        });

        PolicyCache { inner }
    }
}

fn apply(inner: &Arc<Inner>, obj: &ClaimCreationPolicy) {
    if !Policy::is_ready(obj) || obj.spec.disabled {
        if let Some(name) = &obj.metadata.name {
            remove_by_name(inner, name);
        }
        return;
    }

    let policy = match Policy::from_crd(obj) {
        Ok(policy) => policy,
        Err(err) => {
            warn!(error = %err, "failed to translate claim-creation-policy object, skipping");
            return;
        }
    };

    let key = policy.trigger.as_key();

    let mut name_to_key = inner
        .name_to_trigger_kind
        .write()
        .expect("policy cache lock poisoned");
    if let Some(previous_key) = name_to_key.get(&policy.name)
        && previous_key != &key
    {
        inner
            .by_trigger_kind
            .write()
            .expect("policy cache lock poisoned")
            .remove(previous_key);
    }
    name_to_key.insert(policy.name.clone(), key.clone());
    drop(name_to_key);

    let mut by_kind = inner
        .by_trigger_kind
        .write()
        .expect("policy cache lock poisoned");
    if let Some(existing) = by_kind.get(&key)
        && existing.name != policy.name
    {
        warn!(
            trigger_kind = %key,
            replaced_policy = %existing.name,
            new_policy = %policy.name,
            "trigger kind now claimed by a different policy, last-seen-wins"
        );
    }
    by_kind.insert(key, policy);
}

fn remove(inner: &Arc<Inner>, obj: &ClaimCreationPolicy) {
    if let Some(name) = &obj.metadata.name {
        remove_by_name(inner, name);
    }
}

fn remove_by_name(inner: &Arc<Inner>, name: &str) {
    let mut name_to_key = inner
        .name_to_trigger_kind
        .write()
        .expect("policy cache lock poisoned");
    if let Some(key) = name_to_key.remove(name) {
        inner
            .by_trigger_kind
            .write()
            .expect("policy cache lock poisoned")
            .remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::ClaimCreationPolicySpec;
    use crate::policy::{ClaimTemplate, PolicyTriggerKind};

    fn policy_crd(name: &str, kind: &str, disabled: bool, ready: bool) -> ClaimCreationPolicy {
        let mut crd = ClaimCreationPolicy::new(
            name,
            ClaimCreationPolicySpec {
                trigger: PolicyTriggerKind {
                    group: "apps".to_string(),
                    version: "v1".to_string(),
                    kind: kind.to_string(),
                },
                disabled,
                constraints: vec![],
                claim_template: ClaimTemplate::default(),
            },
        );
        crd.status = Some(crate::crds::ClaimCreationPolicyStatus { ready });
        crd
    }

    fn fresh_cache() -> PolicyCache {
        PolicyCache {
            inner: Arc::new(Inner {
                by_trigger_kind: RwLock::new(HashMap::new()),
                name_to_trigger_kind: RwLock::new(HashMap::new()),
                synced: AtomicBool::new(false),
            }),
        }
    }

    #[test]
    fn ready_enabled_policy_is_cached_and_looked_up() {
        let cache = fresh_cache();
        let crd = policy_crd("deploy-quota", "Deployment", false, true);
        apply(&cache.inner, &crd);

        let found = cache.lookup("apps/v1/Deployment").unwrap();
        assert_eq!(found.name, "deploy-quota");
        assert!(found.is_eligible());
    }

    #[test]
    fn non_ready_policy_is_not_cached() {
        let cache = fresh_cache();
        let crd = policy_crd("deploy-quota", "Deployment", false, false);
        apply(&cache.inner, &crd);
        assert!(cache.lookup("apps/v1/Deployment").is_none());
    }

    #[test]
    fn disabled_policy_is_not_cached() {
        let cache = fresh_cache();
        let crd = policy_crd("deploy-quota", "Deployment", true, true);
        apply(&cache.inner, &crd);
        assert!(cache.lookup("apps/v1/Deployment").is_none());
    }

    #[test]
    fn conflicting_policy_on_same_kind_is_last_seen_wins() {
        let cache = fresh_cache();
        apply(&cache.inner, &policy_crd("first", "Deployment", false, true));
        apply(&cache.inner, &policy_crd("second", "Deployment", false, true));

        let found = cache.lookup("apps/v1/Deployment").unwrap();
        assert_eq!(found.name, "second");
    }

    #[test]
    fn renaming_trigger_kind_removes_stale_entry() {
        let cache = fresh_cache();
        apply(&cache.inner, &policy_crd("p", "Deployment", false, true));
        assert!(cache.lookup("apps/v1/Deployment").is_some());

        apply(&cache.inner, &policy_crd("p", "StatefulSet", false, true));
        assert!(cache.lookup("apps/v1/Deployment").is_none());
        assert!(cache.lookup("apps/v1/StatefulSet").is_some());
    }

    #[test]
    fn delete_removes_policy() {
        let cache = fresh_cache();
        let crd = policy_crd("p", "Deployment", false, true);
        apply(&cache.inner, &crd);
        remove(&cache.inner, &crd);
        assert!(cache.lookup("apps/v1/Deployment").is_none());
    }

    #[test]
    fn not_synced_until_init_done() {
        let cache = fresh_cache();
        assert!(!cache.has_synced());
        cache.inner.synced.store(true, Ordering::SeqCst);
        assert!(cache.has_synced());
    }
}
