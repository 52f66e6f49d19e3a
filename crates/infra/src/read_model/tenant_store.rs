use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use tallyline_core::TenantId;

/// Tenant-isolated key/value store for read models.
///
/// A key is only ever visible under the tenant it was written with.
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V>;

    /// Insert or replace. Replaying the same write is a no-op.
    fn upsert(&self, tenant_id: TenantId, key: K, value: V);

    fn remove(&self, tenant_id: TenantId, key: &K);

    fn list(&self, tenant_id: TenantId) -> Vec<V>;

    /// Drop every record of a tenant before a rebuild.
    fn clear_tenant(&self, tenant_id: TenantId);
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        (**self).upsert(tenant_id, key, value)
    }

    fn remove(&self, tenant_id: TenantId, key: &K) {
        (**self).remove(tenant_id, key)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        (**self).list(tenant_id)
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        (**self).clear_tenant(tenant_id)
    }
}

/// In-memory store for tests/dev.
#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    inner: RwLock<HashMap<TenantId, HashMap<K, V>>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&tenant_id)?.get(key).cloned()
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.entry(tenant_id).or_default().insert(key, value);
        }
    }

    fn remove(&self, tenant_id: TenantId, key: &K) {
        if let Ok(mut map) = self.inner.write() {
            if let Some(records) = map.get_mut(&tenant_id) {
                records.remove(key);
            }
        }
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        match self.inner.read() {
            Ok(map) => map
                .get(&tenant_id)
                .map(|records| records.values().cloned().collect())
                .unwrap_or_default(),
            Err(_) => vec![],
        }
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(&tenant_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenants_never_see_each_other() {
        let store: InMemoryTenantStore<u32, &str> = InMemoryTenantStore::new();
        let (a, b) = (TenantId::new(), TenantId::new());
        store.upsert(a, 1, "a");
        store.upsert(b, 1, "b");

        assert_eq!(store.get(a, &1), Some("a"));
        assert_eq!(store.list(b), vec!["b"]);

        store.clear_tenant(a);
        assert!(store.list(a).is_empty());
        assert_eq!(store.get(b, &1), Some("b"));
    }
}
