//! Bulk build and full-graph refinement.
//!
//! A bulk build is a sequence of ordinary inserts in shuffled order, so every
//! intermediate state is a valid index. Refinement then revisits each node
//! with the finished graph as context and re-prunes its neighborhood, which
//! repairs the poor early choices made while the graph was still sparse.

use super::node::Neighbor;
use super::prune::robust_prune;
use super::{DiskGraph, INVALID_ROW_ID, RowId};
use crate::error::{IndexError, Result};
use crate::storage::PageStore;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Bulk build settings.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Seed for the insertion order shuffle; `None` draws from the thread RNG
    pub shuffle_seed: Option<u64>,
    /// Full-graph pruning passes run after all rows are inserted
    pub refine_passes: usize,
    /// Checked between rows; set to stop the build early
    pub cancel: Option<Arc<AtomicBool>>,
}

impl BuildOptions {
    /// Deterministic order with `passes` refinement passes
    #[must_use]
    pub fn seeded(seed: u64, passes: usize) -> Self {
        Self { shuffle_seed: Some(seed), refine_passes: passes, cancel: None }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

impl<S: PageStore> DiskGraph<S> {
    /// Insert many rows in shuffled order, then refine.
    ///
    /// Every row is validated before the first insert, so a bad row leaves
    /// the index untouched. Returns the number of rows inserted.
    ///
    /// # Errors
    ///
    /// Validation errors as [`DiskGraph::insert`] (including duplicates
    /// within `rows`), [`IndexError::Cancelled`] if the cancel flag is
    /// raised, or a storage failure.
    pub fn bulk_build<I>(&mut self, rows: I, options: &BuildOptions) -> Result<usize>
    where
        I: IntoIterator<Item = (RowId, Vec<f32>)>,
    {
        let mut rows: Vec<(RowId, Vec<f32>)> = rows.into_iter().collect();

        let mut batch = HashSet::with_capacity(rows.len());
        for (row_id, vector) in &rows {
            if *row_id == INVALID_ROW_ID {
                return Err(IndexError::InvalidRowId);
            }
            self.check_vector(vector)?;
            if self.directory.contains(*row_id) || !batch.insert(*row_id) {
                return Err(IndexError::DuplicateRowId(*row_id));
            }
        }

        match options.shuffle_seed {
            Some(seed) => rows.shuffle(&mut StdRng::seed_from_u64(seed)),
            None => rows.shuffle(&mut rand::rng()),
        }

        tracing::info!(rows = rows.len(), refine_passes = options.refine_passes, "bulk build started");

        let total = rows.len();
        let mut inserted = 0usize;
        for (row_id, vector) in rows {
            if options.is_cancelled() {
                tracing::warn!(inserted, total, "bulk build cancelled");
                return Err(IndexError::Cancelled { inserted });
            }
            self.insert(row_id, &vector)?;
            inserted += 1;
        }

        if options.refine_passes > 0 {
            self.refine(options.refine_passes)?;
        }

        tracing::info!(inserted, nodes = self.len(), "bulk build finished");
        Ok(inserted)
    }

    /// Re-prune every node against its current search neighborhood.
    ///
    /// # Errors
    ///
    /// Storage failures propagate; corrupt records are skipped.
    pub fn refine(&mut self, passes: usize) -> Result<()> {
        for pass in 0..passes {
            let mut changed = 0usize;
            let mut skipped = 0usize;
            for row in self.directory.rows() {
                match self.refine_node(row) {
                    Ok(true) => changed += 1,
                    Ok(false) => {}
                    Err(IndexError::CorruptRecord { page, reason }) => {
                        tracing::warn!(row, page, reason, "skipping corrupt record during refinement");
                        skipped += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
            tracing::info!(pass = pass + 1, passes, changed, skipped, "refinement pass complete");
        }
        self.publish()
    }

    /// Rebuild one node's list; `true` if it changed.
    fn refine_node(&mut self, row: RowId) -> Result<bool> {
        let page = self.page_of(row)?;
        let mut record = self.read_node(row)?;
        let old_ids = record.neighbor_ids();

        let traversal = self.traverse(&record.vector, self.config.insert_beam, true)?;
        let metric = self.config.metric;

        let mut pool: Vec<(RowId, f32)> = Vec::with_capacity(self.config.candidate_pool() + old_ids.len());
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(pool.capacity());
        for result in traversal.visited.iter().filter(|r| r.row_id != row).take(self.config.candidate_pool()) {
            if let Some(vector) = traversal.vectors.get(&result.row_id) {
                pool.push((result.row_id, result.distance));
                vectors.push(vector.clone());
            }
        }
        for id in &old_ids {
            if pool.iter().any(|(p, _)| p == id) {
                continue;
            }
            // Current neighbors missing from the traversal keep their place in the pool
            match self.view(*id) {
                Ok(Some(view)) => {
                    let vector = view.full_vector();
                    pool.push((*id, metric.distance(&record.vector, &vector)));
                    vectors.push(vector);
                }
                Ok(None) => {}
                Err(IndexError::CorruptRecord { page, reason }) => {
                    tracing::warn!(row = id, page, reason, "dropping corrupt neighbor during refinement");
                }
                Err(err) => return Err(err),
            }
        }

        let selected = robust_prune(&pool, self.config.max_neighbors, self.config.alpha, |i, j| {
            metric.distance(&vectors[i], &vectors[j])
        });
        let new_ids: Vec<RowId> = selected.iter().map(|&i| pool[i].0).collect();
        if new_ids == old_ids {
            return Ok(false);
        }

        record.neighbors = selected
            .iter()
            .map(|&i| Ok(Neighbor { row_id: pool[i].0, vector: self.codec.encode(&vectors[i])? }))
            .collect::<Result<Vec<_>>>()?;
        self.write_node(page, &record)?;
        self.directory.replace_edges(row, &old_ids, &new_ids);

        let encoded = self.codec.encode(&record.vector)?;
        for id in new_ids.iter().filter(|id| !old_ids.contains(id)) {
            match self.add_backlink(*id, row, &encoded) {
                Ok(()) => {}
                Err(IndexError::CorruptRecord { page, reason }) => {
                    tracing::warn!(row = id, page, reason, "skipping backlink to corrupt record");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }
}
