//! Insertion and reciprocal linking.
//!
//! # Crash Consistency Model
//!
//! 1. Write the new node's record FIRST (with forward links)
//! 2. Add backward links on each chosen neighbor (may crash mid-process)
//! 3. Publish metadata last
//!
//! A crash during step 2 leaves one-way edges, never pointers to
//! uninitialized pages, because the new record was written first.
//!
//! # Forward Link Policy
//!
//! A node only links to rows that are live at the time of the write. Links
//! to rows that have since disappeared are dropped the next time the record
//! is edited.

use super::node::{Neighbor, NodeRecord};
use super::prune::robust_prune;
use super::{DiskGraph, RowId};
use crate::error::Result;
use crate::storage::PageStore;

impl<S: PageStore> DiskGraph<S> {
    /// Insert a row.
    ///
    /// # Errors
    ///
    /// Fails before any mutation with [`crate::IndexError::InvalidRowId`],
    /// [`crate::IndexError::DuplicateRowId`],
    /// [`crate::IndexError::DimensionMismatch`] or
    /// [`crate::IndexError::NonFiniteVector`]; storage failures propagate.
    pub fn insert(&mut self, row_id: RowId, vector: &[f32]) -> Result<()> {
        self.check_new_row(row_id)?;
        self.check_vector(vector)?;
        let encoded = self.codec.encode(vector)?;

        if self.entry_point.is_none() {
            let page = self.store.allocate()?;
            self.write_node(page, &NodeRecord::new(row_id, vector.to_vec()))?;
            self.directory.insert_node(row_id, page);
            self.entry_point = Some(row_id);
            self.publish()?;
            tracing::debug!(row_id, page, "inserted first node as entry point");
            return Ok(());
        }

        // Neighbor selection (in-memory phase)
        let traversal = self.traverse(vector, self.config.insert_beam, true)?;
        let pool: Vec<(RowId, f32)> = traversal
            .visited
            .iter()
            .take(self.config.candidate_pool())
            .map(|r| (r.row_id, r.distance))
            .collect();
        let vectors: Vec<&[f32]> =
            pool.iter().map(|(id, _)| traversal.vectors.get(id).map_or(&[][..], Vec::as_slice)).collect();

        let metric = self.config.metric;
        let selected = robust_prune(&pool, self.config.max_neighbors, self.config.alpha, |i, j| {
            metric.distance(vectors[i], vectors[j])
        });

        let mut record = NodeRecord::new(row_id, vector.to_vec());
        for i in selected {
            record.neighbors.push(Neighbor { row_id: pool[i].0, vector: self.codec.encode(vectors[i])? });
        }
        if record.neighbors.is_empty() {
            tracing::warn!(row_id, skipped = traversal.skipped, "no reachable neighbors; node inserted unlinked");
        }

        // STEP A: write the new record first
        let page = self.store.allocate()?;
        self.write_node(page, &record)?;
        self.directory.insert_node(row_id, page);
        for neighbor in &record.neighbors {
            self.directory.add_edge(row_id, neighbor.row_id);
        }

        // STEP B: backward links
        for neighbor in &record.neighbors {
            self.add_backlink(neighbor.row_id, row_id, &encoded)?;
        }

        // STEP C: publish
        self.publish()?;

        tracing::debug!(
            row_id,
            page,
            neighbors = record.neighbors.len(),
            hops = traversal.hops,
            "inserted node"
        );
        Ok(())
    }

    /// Add edge `target → new_row`, pruning `target`'s list if it overflows.
    pub(crate) fn add_backlink(&mut self, target: RowId, new_row: RowId, new_vector: &[u8]) -> Result<()> {
        let page = self.page_of(target)?;
        let mut record = self.read_node(target)?;
        let old_ids = record.neighbor_ids();

        // Duplicate check (idempotency)
        if record.has_neighbor(new_row) {
            return Ok(());
        }

        record.neighbors.retain(|n| self.directory.contains(n.row_id));
        record.neighbors.push(Neighbor { row_id: new_row, vector: new_vector.to_vec() });

        if record.neighbors.len() > self.config.max_neighbors {
            let candidates = std::mem::take(&mut record.neighbors);
            record.neighbors = self.prune_encoded(&record.vector, candidates)?;
        }

        self.write_node(page, &record)?;
        self.directory.replace_edges(target, &old_ids, &record.neighbor_ids());
        Ok(())
    }

    /// Robust-prune a neighbor list using only the inline encoded vectors.
    ///
    /// Used when re-pruning an existing list (backlinks, stitching), where
    /// reading every neighbor's full record would cost one page per slot.
    pub(crate) fn prune_encoded(&self, base: &[f32], candidates: Vec<Neighbor>) -> Result<Vec<Neighbor>> {
        let metric = self.config.metric;
        let base_encoded = self.codec.encode(base)?;
        let scored: Vec<(RowId, f32)> = candidates
            .iter()
            .map(|n| (n.row_id, self.codec.distance(metric, &base_encoded, &n.vector)))
            .collect();

        let selected = robust_prune(&scored, self.config.max_neighbors, self.config.alpha, |i, j| {
            self.codec.distance(metric, &candidates[i].vector, &candidates[j].vector)
        });

        let mut slots: Vec<Option<Neighbor>> = candidates.into_iter().map(Some).collect();
        Ok(selected.into_iter().filter_map(|i| slots[i].take()).collect())
    }
}
