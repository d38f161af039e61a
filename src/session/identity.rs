//! One record per identifier.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::Result;
use crate::models::{EntityKind, Record, RecordRef};

/// Identity cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Records shared through the cache, one per (kind, identifier) pair
    pub distinct_identifiers: usize,
}

/// Session-wide map from identifier to the record built for it
#[derive(Debug, Default)]
pub(crate) struct IdentityCache {
    records: Mutex<HashMap<(EntityKind, String), RecordRef>>,
}

impl IdentityCache {
    pub fn get(&self, kind: EntityKind, identifier: &str) -> Option<RecordRef> {
        self.lock().get(&(kind, identifier.to_string())).cloned()
    }

    /// Return the record cached under `identifier`, or build and cache one.
    ///
    /// The lock is held while `build` runs so that two callers can never
    /// both build a record for the same identifier; `build` must not touch
    /// this cache.
    pub fn get_or_create<F>(&self, kind: EntityKind, identifier: &str, build: F) -> Result<RecordRef>
    where
        F: FnOnce() -> Result<Record>,
    {
        let mut records = self.lock();
        let key = (kind, identifier.to_string());
        if let Some(existing) = records.get(&key) {
            tracing::trace!("returning cached {} '{}'", kind, identifier);
            return Ok(existing.clone());
        }

        tracing::debug!("caching new {} '{}'", kind, identifier);
        let record = Arc::new(build()?);
        records.insert(key, record.clone());
        Ok(record)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            distinct_identifiers: self.lock().len(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(EntityKind, String), RecordRef>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DimensionsError;
    use serde_json::json;
    use std::sync::Weak;

    fn build(kind: EntityKind, id: &str) -> Result<Record> {
        Record::new(kind, &json!({ "id": id }), Weak::new())
    }

    #[test]
    fn test_get_or_create_reuses_instances() {
        let cache = IdentityCache::default();
        let a = cache
            .get_or_create(EntityKind::Journal, "j.1", || build(EntityKind::Journal, "j.1"))
            .unwrap();
        let b = cache
            .get_or_create(EntityKind::Journal, "j.1", || panic!("built twice"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats().distinct_identifiers, 1);
        assert!(cache.get(EntityKind::Journal, "j.1").is_some());
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let cache = IdentityCache::default();
        cache
            .get_or_create(EntityKind::Journal, "x", || build(EntityKind::Journal, "x"))
            .unwrap();
        cache
            .get_or_create(EntityKind::Category, "x", || build(EntityKind::Category, "x"))
            .unwrap();
        assert_eq!(cache.stats().distinct_identifiers, 2);
    }

    #[test]
    fn test_failed_build_caches_nothing() {
        let cache = IdentityCache::default();
        let result = cache.get_or_create(EntityKind::Journal, "j.2", || {
            Err(DimensionsError::MalformedData("nope".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(cache.stats().distinct_identifiers, 0);
    }
}
