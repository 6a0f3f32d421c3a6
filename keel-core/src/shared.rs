//! Thread-shareable index handle.
//!
//! Readers run concurrently under a shared lock; inserts, deletes and
//! flushes take the lock exclusively, so writers are serialized and never
//! observe each other's half-applied relinking.

use crate::error::Result;
use crate::graph::RowId;
use crate::storage::{MmapPageStore, PageStore};
use crate::{TopK, VectorIndex};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

/// Cloneable handle to one index.
#[derive(Debug)]
pub struct SharedIndex<S: PageStore = MmapPageStore> {
    inner: Arc<RwLock<VectorIndex<S>>>,
}

impl<S: PageStore> Clone for SharedIndex<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S: PageStore> SharedIndex<S> {
    /// Wrap an index
    #[must_use]
    pub fn new(index: VectorIndex<S>) -> Self {
        Self { inner: Arc::new(RwLock::new(index)) }
    }

    /// Search under a shared lock.
    ///
    /// # Errors
    ///
    /// As [`VectorIndex::search`].
    pub fn search(&self, query: &[f32], k: usize) -> Result<TopK> {
        self.inner.read().search(query, k)
    }

    /// Insert under the exclusive lock.
    ///
    /// # Errors
    ///
    /// As [`VectorIndex::insert`].
    pub fn insert(&self, row_id: RowId, vector: &[f32]) -> Result<()> {
        self.inner.write().insert(row_id, vector)
    }

    /// Delete under the exclusive lock.
    ///
    /// # Errors
    ///
    /// As [`VectorIndex::delete`].
    pub fn delete(&self, row_id: RowId) -> Result<()> {
        self.inner.write().delete(row_id)
    }

    /// Flush under the exclusive lock.
    ///
    /// # Errors
    ///
    /// As [`VectorIndex::flush`].
    pub fn flush(&self) -> Result<()> {
        self.inner.write().flush()
    }

    /// Live rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no rows are indexed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Hold the shared lock across several reads
    pub fn read(&self) -> RwLockReadGuard<'_, VectorIndex<S>> {
        self.inner.read()
    }

    /// Hold the exclusive lock across several writes
    pub fn write(&self) -> RwLockWriteGuard<'_, VectorIndex<S>> {
        self.inner.write()
    }
}
