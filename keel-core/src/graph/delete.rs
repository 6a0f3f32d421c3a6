//! Deletion with neighbor stitching.
//!
//! # Crash Consistency Model
//!
//! 1. Stitch every referrer: replace the victim in its list with the
//!    victim's own neighbors, re-pruned to the degree bound
//! 2. Tombstone the victim's page
//! 3. Drop it from the directory and free the page
//! 4. Publish metadata
//!
//! Until step 2 completes the victim is still a valid node, so a crash
//! mid-stitch leaves only extra edges, never an edge to a reused page.

use super::node::{Neighbor, NodeRecord, tombstone};
use super::{DiskGraph, RowId};
use crate::error::{IndexError, Result};
use crate::storage::PageStore;

impl<S: PageStore> DiskGraph<S> {
    /// Remove a row, reconnecting the nodes that pointed at it.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] if `row_id` is not indexed; storage
    /// failures propagate. Corrupt referrer records are logged and skipped.
    pub fn delete(&mut self, row_id: RowId) -> Result<()> {
        let page = self.page_of(row_id)?;

        let (out_ids, survivors) = match self.read_node(row_id) {
            Ok(record) => {
                let out_ids = record.neighbor_ids();
                let survivors: Vec<Neighbor> =
                    record.neighbors.into_iter().filter(|n| self.directory.contains(n.row_id)).collect();
                (out_ids, survivors)
            }
            Err(IndexError::CorruptRecord { page, reason }) => {
                tracing::warn!(row_id, page, reason, "deleting node with corrupt record; referrers lose its links");
                (Vec::new(), Vec::new())
            }
            Err(err) => return Err(err),
        };

        // STEP 1: stitch referrers
        let referrers = self.directory.inbound(row_id);
        let mut stitched = 0usize;
        for referrer in &referrers {
            if *referrer == row_id || !self.directory.contains(*referrer) {
                self.directory.remove_edge(*referrer, row_id);
                continue;
            }
            match self.stitch(*referrer, row_id, &survivors) {
                Ok(()) => stitched += 1,
                Err(IndexError::CorruptRecord { page, reason }) => {
                    tracing::warn!(referrer, page, reason, "skipping corrupt referrer while stitching");
                    self.directory.remove_edge(*referrer, row_id);
                }
                Err(err) => return Err(err),
            }
        }

        // STEP 2 + 3: tombstone, unregister, free
        self.store.write(page, &tombstone(&self.layout))?;
        self.directory.remove_node(row_id, &out_ids);
        self.store.free(page)?;

        if self.entry_point == Some(row_id) {
            let replacement = survivors
                .iter()
                .map(|n| n.row_id)
                .find(|id| self.directory.contains(*id))
                .or_else(|| self.directory.min_row());
            tracing::warn!(row_id, ?replacement, "entry point deleted; reassigned");
            self.entry_point = replacement;
        }

        // STEP 4: publish
        self.publish()?;

        tracing::debug!(row_id, page, referrers = referrers.len(), stitched, "deleted node");
        Ok(())
    }

    /// Rewrite `referrer`'s list without `victim`, offering the victim's
    /// surviving neighbors as replacements.
    fn stitch(&mut self, referrer: RowId, victim: RowId, survivors: &[Neighbor]) -> Result<()> {
        let page = self.page_of(referrer)?;
        let mut record: NodeRecord = self.read_node(referrer)?;
        let old_ids = record.neighbor_ids();

        record.neighbors.retain(|n| n.row_id != victim && self.directory.contains(n.row_id));
        for candidate in survivors {
            if candidate.row_id != referrer && candidate.row_id != victim && !record.has_neighbor(candidate.row_id) {
                record.neighbors.push(candidate.clone());
            }
        }

        if record.neighbors.len() > self.config.max_neighbors {
            let candidates = std::mem::take(&mut record.neighbors);
            record.neighbors = self.prune_encoded(&record.vector, candidates)?;
        }

        self.write_node(page, &record)?;
        self.directory.replace_edges(referrer, &old_ids, &record.neighbor_ids());
        Ok(())
    }
}
