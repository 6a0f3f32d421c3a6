//! Greedy beam search.
//!
//! The frontier is ranked by approximate distances computed against the
//! compressed neighbor copies stored inline in each expanded record, so
//! discovering a node never costs a page read. Expanding a node reads its
//! own record once; at that point its full vector gives the exact distance
//! used for the final ranking.

use super::{DiskGraph, RowId};
use crate::error::{IndexError, Result};
use crate::options::MAX_SEARCH_BEAM;
use crate::storage::PageStore;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Hop budget per unit of beam width
const HOPS_PER_BEAM: usize = 16;

/// Minimum hop budget
const MIN_HOPS: usize = 256;

/// Search result with distance
#[derive(Debug, Clone, Copy)]
pub struct SearchResult {
    /// Matched row
    pub row_id: RowId,
    /// Distance to the query
    pub distance: f32,
}

impl PartialEq for SearchResult {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SearchResult {}

impl PartialOrd for SearchResult {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchResult {
    /// Distance first, ties broken by row id ascending
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.total_cmp(&other.distance).then(self.row_id.cmp(&other.row_id))
    }
}

/// What a search produced
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    /// Up to `k` results, nearest first
    pub results: Vec<SearchResult>,
    /// Corrupt records bypassed during traversal
    pub skipped_records: usize,
    /// Nodes expanded
    pub hops: usize,
}

/// Full traversal state handed to insert and refine
#[derive(Debug, Default)]
pub(crate) struct Traversal {
    /// Expanded nodes with exact distances, sorted
    pub visited: Vec<SearchResult>,
    /// Full vectors of expanded nodes, when requested
    pub vectors: HashMap<RowId, Vec<f32>>,
    pub skipped: usize,
    pub hops: usize,
}

#[derive(Debug, Clone, Copy)]
struct FrontierEntry {
    result: SearchResult,
    expanded: bool,
}

/// Sorted, bounded candidate list
struct Frontier {
    entries: Vec<FrontierEntry>,
    capacity: usize,
}

impl Frontier {
    fn new(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity + 1), capacity }
    }

    /// Whether `distance` would make it into the list
    fn admits(&self, distance: f32) -> bool {
        self.entries.len() < self.capacity
            || self.entries.last().is_some_and(|worst| distance.total_cmp(&worst.result.distance).is_lt())
    }

    fn insert(&mut self, entry: FrontierEntry) {
        let pos = self.entries.partition_point(|e| e.result < entry.result);
        self.entries.insert(pos, entry);
        self.entries.truncate(self.capacity);
    }

    /// Remove and return the closest entry not yet expanded
    fn pop_unexpanded(&mut self) -> Option<FrontierEntry> {
        let pos = self.entries.iter().position(|e| !e.expanded)?;
        Some(self.entries.remove(pos))
    }
}

impl<S: PageStore> DiskGraph<S> {
    /// Search for the `k` nearest rows.
    ///
    /// `beam` is capped at [`MAX_SEARCH_BEAM`], then raised to `k` when
    /// smaller. A `k` beyond the live row count returns every reachable row.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidK`], [`IndexError::DimensionMismatch`] or
    /// [`IndexError::EmptyIndex`] before touching any page, and
    /// [`IndexError::StorageFailure`] if the store fails. Corrupt records
    /// never fail a search; they are counted in `skipped_records`.
    pub fn search(&self, query: &[f32], k: usize, beam: usize) -> Result<SearchOutcome> {
        if k == 0 {
            return Err(IndexError::InvalidK(k));
        }
        self.check_vector(query)?;
        if self.entry_point.is_none() {
            return Err(IndexError::EmptyIndex);
        }

        let beam = beam.min(MAX_SEARCH_BEAM).max(k.min(self.len()));
        let mut traversal = self.traverse(query, beam, false)?;
        traversal.visited.truncate(k);

        tracing::debug!(k, beam, hops = traversal.hops, skipped = traversal.skipped, "search complete");

        Ok(SearchOutcome { results: traversal.visited, skipped_records: traversal.skipped, hops: traversal.hops })
    }

    /// Beam traversal from the entry point.
    ///
    /// Terminates when no unexpanded candidate remains, when `beam`
    /// consecutive expansions fail to improve the best exact distance, or
    /// when the hop budget runs out.
    pub(crate) fn traverse(&self, query: &[f32], beam: usize, keep_vectors: bool) -> Result<Traversal> {
        let mut out = Traversal::default();
        let Some(entry) = self.entry_point else {
            return Ok(out);
        };

        let metric = self.config.metric;
        let encoded_query = self.codec.encode(query)?;
        // the frontier never needs more slots than there are nodes
        let beam = beam.clamp(1, self.directory.len().max(1));
        let max_hops = beam.saturating_mul(HOPS_PER_BEAM).max(MIN_HOPS);

        let mut frontier = Frontier::new(beam);
        let mut seen: HashSet<RowId> = HashSet::new();
        let mut scratch = vec![0.0_f32; self.config.dims];
        let mut best = f32::INFINITY;
        let mut stalled = 0usize;

        seen.insert(entry);
        frontier.insert(FrontierEntry { result: SearchResult { row_id: entry, distance: 0.0 }, expanded: false });

        while out.hops < max_hops {
            let Some(current) = frontier.pop_unexpanded() else {
                break;
            };
            let row_id = current.result.row_id;

            let view = match self.view(row_id) {
                Ok(Some(view)) => view,
                Ok(None) => continue,
                Err(IndexError::CorruptRecord { page, reason }) => {
                    tracing::warn!(row_id, page, reason, "skipping corrupt node record");
                    out.skipped += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };
            out.hops += 1;

            view.read_full_vector(&mut scratch);
            let exact = metric.distance(query, &scratch);
            let result = SearchResult { row_id, distance: exact };
            out.visited.push(result);
            if keep_vectors {
                out.vectors.insert(row_id, scratch.clone());
            }
            frontier.insert(FrontierEntry { result, expanded: true });

            for (neighbor, encoded) in view.neighbors() {
                if !self.directory.contains(neighbor) || !seen.insert(neighbor) {
                    continue;
                }
                let approx = self.codec.distance(metric, &encoded_query, encoded);
                if frontier.admits(approx) {
                    frontier.insert(FrontierEntry {
                        result: SearchResult { row_id: neighbor, distance: approx },
                        expanded: false,
                    });
                }
            }

            if exact < best {
                best = exact;
                stalled = 0;
            } else {
                stalled += 1;
                if stalled >= beam {
                    break;
                }
            }
        }

        out.visited.sort_unstable();
        Ok(out)
    }
}
