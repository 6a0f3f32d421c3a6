//! In-memory node directory: row id → page, plus inbound edges.
//!
//! Node records only store outbound adjacency. Deletion needs the reverse
//! direction (who points at the victim), so the directory mirrors every
//! edge `src → dst` as `dst ∈ inbound` keyed by `dst`. It is rebuilt from a
//! page scan on load and kept in lockstep with every record write.

use super::RowId;
use crate::storage::PageId;
use std::collections::{BTreeSet, HashMap};

/// Row-to-page mapping and reverse adjacency.
#[derive(Debug, Default, Clone)]
pub struct NodeDirectory {
    pages: HashMap<RowId, PageId>,
    /// dst → sources listing dst (ordered for deterministic stitching)
    inbound: HashMap<RowId, BTreeSet<RowId>>,
}

impl NodeDirectory {
    /// Empty directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether no nodes are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Whether `row` is a live node
    #[must_use]
    pub fn contains(&self, row: RowId) -> bool {
        self.pages.contains_key(&row)
    }

    /// Page holding `row`'s record
    #[must_use]
    pub fn page_of(&self, row: RowId) -> Option<PageId> {
        self.pages.get(&row).copied()
    }

    /// Register a node
    pub fn insert_node(&mut self, row: RowId, page: PageId) {
        self.pages.insert(row, page);
    }

    /// Unregister a node and every edge touching it.
    ///
    /// `out_edges` is the node's adjacency list as last written.
    pub fn remove_node(&mut self, row: RowId, out_edges: &[RowId]) -> Option<PageId> {
        for dst in out_edges {
            self.remove_edge(row, *dst);
        }
        // Referrers that could not be stitched keep dangling edges in their
        // records; they are dropped lazily on the next rewrite.
        self.inbound.remove(&row);
        self.pages.remove(&row)
    }

    /// Record edge `src → dst`
    pub fn add_edge(&mut self, src: RowId, dst: RowId) {
        self.inbound.entry(dst).or_default().insert(src);
    }

    /// Forget edge `src → dst`
    pub fn remove_edge(&mut self, src: RowId, dst: RowId) {
        if let Some(sources) = self.inbound.get_mut(&dst) {
            sources.remove(&src);
            if sources.is_empty() {
                self.inbound.remove(&dst);
            }
        }
    }

    /// Replace `src`'s outbound edges: `old` as last written, `new` as about
    /// to be written.
    pub fn replace_edges(&mut self, src: RowId, old: &[RowId], new: &[RowId]) {
        for dst in old {
            if !new.contains(dst) {
                self.remove_edge(src, *dst);
            }
        }
        for dst in new {
            self.add_edge(src, *dst);
        }
    }

    /// Sources that list `dst`, ascending
    #[must_use]
    pub fn inbound(&self, dst: RowId) -> Vec<RowId> {
        self.inbound.get(&dst).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    /// Number of nodes listing `dst`
    #[must_use]
    pub fn in_degree(&self, dst: RowId) -> usize {
        self.inbound.get(&dst).map_or(0, BTreeSet::len)
    }

    /// Whether edge `src → dst` is recorded
    #[must_use]
    pub fn has_edge(&self, src: RowId, dst: RowId) -> bool {
        self.inbound.get(&dst).is_some_and(|s| s.contains(&src))
    }

    /// Live row ids, ascending
    #[must_use]
    pub fn rows(&self) -> Vec<RowId> {
        let mut rows: Vec<RowId> = self.pages.keys().copied().collect();
        rows.sort_unstable();
        rows
    }

    /// Smallest live row id
    #[must_use]
    pub fn min_row(&self) -> Option<RowId> {
        self.pages.keys().copied().min()
    }

    /// `(row, page)` pairs in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = (RowId, PageId)> + '_ {
        self.pages.iter().map(|(r, p)| (*r, *p))
    }
}
