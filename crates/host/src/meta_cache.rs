// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared cache of parsed driver metadata keyed by driver id.
//!
//! Scoped to a context and passed explicitly; nothing here is global.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use iolink_core::DriverMeta;

struct CachedMeta {
    meta: Arc<DriverMeta>,
    meta_hash: String,
}

/// id → parsed meta plus source hash, behind its own lock.
#[derive(Default)]
pub struct MetaCache {
    inner: Mutex<HashMap<String, CachedMeta>>,
}

impl MetaCache {
    pub fn new() -> Self {
        MetaCache::default()
    }

    /// Return the cached meta only when the source hash still matches:
    /// a stable hash means the meta is unchanged and reparsing is skipped.
    pub fn lookup(&self, id: &str, meta_hash: &str) -> Option<Arc<DriverMeta>> {
        let inner = self.inner.lock();
        inner.get(id).filter(|c| c.meta_hash == meta_hash).map(|c| Arc::clone(&c.meta))
    }

    pub fn store(&self, id: impl Into<String>, meta_hash: impl Into<String>, meta: Arc<DriverMeta>) {
        self.inner
            .lock()
            .insert(id.into(), CachedMeta { meta, meta_hash: meta_hash.into() });
    }

    pub fn remove(&self, id: &str) {
        self.inner.lock().remove(id);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
