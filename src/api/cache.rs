//! LRU cache in front of profile lookups.

use super::traits::AccountApi;
use crate::error::Result;
use crate::types::{Did, Profile};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Default number of cached profiles.
pub const DEFAULT_PROFILE_CACHE: usize = 4096;

/// Caches `get_profile` results; handle resolution passes through.
pub struct CachedAccounts {
    inner: Arc<dyn AccountApi>,
    profiles: Mutex<LruCache<String, Profile>>,
}

impl CachedAccounts {
    pub fn new(inner: Arc<dyn AccountApi>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            profiles: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.profiles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AccountApi for CachedAccounts {
    fn resolve_handle(&self, handle: &str) -> Result<Option<Did>> {
        self.inner.resolve_handle(handle)
    }

    fn get_profile(&self, actor: &str) -> Result<Profile> {
        if let Some(profile) = self.profiles.lock().get(actor).cloned() {
            return Ok(profile);
        }

        // Lookup happens outside the lock; concurrent misses may both fetch.
        let profile = self.inner.get_profile(actor)?;
        self.profiles.lock().put(actor.to_string(), profile.clone());
        Ok(profile)
    }
}
