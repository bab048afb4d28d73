//! Render Cache - Memoized Evaluator Output
//!
//! Keyed by fingerprint plus the viewer facts evaluation depends on. Bounded,
//! oldest entry evicted first.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use crate::evaluator::ViewerContext;
use crate::render::RenderModel;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub fingerprint: String,
    pub roles: BTreeSet<String>,
    pub entitlements: BTreeSet<String>,
}

impl CacheKey {
    pub fn new(fingerprint: &str, viewer: &ViewerContext) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            roles: viewer.roles.clone(),
            entitlements: viewer.entitlements.clone(),
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CacheKey, Arc<RenderModel>>,
    order: VecDeque<CacheKey>,
}

pub struct RenderCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl RenderCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<RenderModel>> {
        self.inner.lock().entries.get(key).cloned()
    }

    pub fn insert(&self, key: CacheKey, model: Arc<RenderModel>) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.entries.insert(key.clone(), model).is_none() {
            inner.order.push_back(key);
        }
        while inner.entries.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn model(fingerprint: &str) -> Arc<RenderModel> {
        Arc::new(RenderModel {
            page_id: Some("home".into()),
            module: "home".into(),
            route: "/".into(),
            fingerprint: fingerprint.into(),
            regions: vec![],
            actions: vec![],
            constants: BTreeMap::new(),
            sources: BTreeMap::new(),
            errors: vec![],
            degraded: false,
        })
    }

    #[test]
    fn test_role_sets_are_separate_entries() {
        let cache = RenderCache::new(8);
        let admin = CacheKey::new("f1", &ViewerContext::new(["admin"]));
        let guest = CacheKey::new("f1", &ViewerContext::new(["guest"]));
        cache.insert(admin.clone(), model("f1"));
        assert!(cache.get(&admin).is_some());
        assert!(cache.get(&guest).is_none());
    }

    #[test]
    fn test_evicts_oldest_first() {
        let cache = RenderCache::new(2);
        let viewer = ViewerContext::default();
        for f in ["a", "b", "c"] {
            cache.insert(CacheKey::new(f, &viewer), model(f));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&CacheKey::new("a", &viewer)).is_none());
        assert!(cache.get(&CacheKey::new("c", &viewer)).is_some());
    }

    #[test]
    fn test_zero_capacity_disables() {
        let cache = RenderCache::new(0);
        cache.insert(CacheKey::new("a", &ViewerContext::default()), model("a"));
        assert!(cache.is_empty());
    }
}
