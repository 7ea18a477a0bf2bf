use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use kube::{Client, Config as KubeConfig};

/// Caches per-tenant API clients. A tenant's client is the root client's
/// configuration with the API host rewritten to route to that tenant's
/// control plane; the empty-string tenant always resolves to the root
/// client unchanged.
pub struct TenantClientCache {
    root: Client,
    root_config: KubeConfig,
    by_tenant: RwLock<HashMap<String, Client>>,
}

impl TenantClientCache {
    pub fn new(root: Client, root_config: KubeConfig) -> Arc<TenantClientCache> {
        Arc::new(TenantClientCache {
            root,
            root_config,
            by_tenant: RwLock::new(HashMap::new()),
        })
    }

    pub fn client_for(&self, tenant: &str) -> Client {
        if tenant.is_empty() {
            return self.root.clone();
        }

        if let Some(client) = self.by_tenant.read().expect("tenant client cache lock poisoned").get(tenant) {
            return client.clone();
        }

        let mut config = self.root_config.clone();
        config.cluster_url = rewrite_host(&config.cluster_url, tenant);
        let client = Client::try_from(config).unwrap_or_else(|_| self.root.clone());

        self.by_tenant
            .write()
            .expect("tenant client cache lock poisoned")
            .insert(tenant.to_string(), client.clone());
        client
    }
}

fn rewrite_host(url: &http::Uri, tenant: &str) -> http::Uri {
    let authority = url.authority().map(|a| a.as_str()).unwrap_or_default();
    let host_with_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let rewritten_authority = match host_with_port.split_once(':') {
        Some((_, port)) => format!("{tenant}.tenants.internal:{port}"),
        None => format!("{tenant}.tenants.internal"),
    };

    let mut parts = url.clone().into_parts();
    if let Ok(authority) = rewritten_authority.parse() {
        parts.authority = Some(authority);
    }
    http::Uri::from_parts(parts).unwrap_or_else(|_| url.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_host_swaps_in_tenant_subdomain() {
        let uri: http::Uri = "https://control-plane.internal:6443".parse().unwrap();
        let rewritten = rewrite_host(&uri, "team-a");
        assert_eq!(rewritten.authority().unwrap().as_str(), "team-a.tenants.internal:6443");
        assert_eq!(rewritten.scheme_str(), Some("https"));
    }

    #[test]
    fn rewrite_host_without_explicit_port() {
        let uri: http::Uri = "https://control-plane.internal".parse().unwrap();
        let rewritten = rewrite_host(&uri, "team-b");
        assert_eq!(rewritten.authority().unwrap().as_str(), "team-b.tenants.internal");
    }
}
