//! Keel - Disk-native approximate nearest neighbor index
//!
//! Keel stores a proximity graph directly in fixed-size pages: one node
//! record per indexed row, holding the row's full vector and, inline, a
//! compressed copy of every neighbor's vector. A beam search expands one
//! node per page read and ranks the frontier from those inline copies, so
//! the index works from disk without a resident vector cache.
//!
//! # Features
//!
//! - Five neighbor encodings: float32, float16, float8, int8 and 1-bit
//! - Robust (α) pruning on insert, neighbor stitching on delete
//! - File-backed store using memory-mapped I/O, or any [`PageStore`]
//! - Concurrent readers with a single serialized writer ([`SharedIndex`])
//! - Explicit durability control via `flush()`
//!
//! # Example
//!
//! ```no_run
//! use keel_core::{IndexOptions, VectorIndex};
//!
//! # fn main() -> keel_core::Result<()> {
//! let options: IndexOptions = "compress_neighbors=float8,max_neighbors=20".parse()?;
//! let mut index = VectorIndex::open("embeddings.keel", 512, options)?;
//!
//! index.insert(1, &vec![0.1; 512])?;
//! index.flush()?;
//!
//! let top = index.search(&vec![0.1; 512], 10)?;
//! assert_eq!(top.row_ids[0], 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Design Philosophy
//!
//! Keel is an index, not a database. Row ids belong to the host table,
//! transactions and page caching belong to the host storage engine, and
//! exact re-ranking of the returned ids is left to the caller.

pub mod codec;
pub mod distance;
pub mod error;
pub mod header;
pub mod metadata;
pub mod options;
pub mod shared;
pub mod storage;

#[cfg(feature = "internals")]
pub mod graph;
#[cfg(not(feature = "internals"))]
pub(crate) mod graph;

pub use codec::{CompressionMode, VectorCodec};
pub use distance::{DistanceMetric, cosine_distance, distance, dot_product, euclidean_distance};
pub use error::{IndexError, Result};
pub use graph::{BuildOptions, INVALID_ROW_ID, IndexStats, RowId, SearchResult};
pub use metadata::IndexMetadata;
pub use options::{IndexConfig, IndexOptions};
pub use shared::SharedIndex;
pub use storage::{MemoryPageStore, MmapPageStore, PageId, PageStore};

use graph::DiskGraph;
use std::path::Path;

/// Row ids nearest first, with enough context to explain a short result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TopK {
    /// Matching rows, nearest first
    pub row_ids: Vec<RowId>,
    /// The `k` that was asked for
    pub requested: usize,
    /// Corrupt node records bypassed during the search
    pub skipped_records: usize,
}

impl TopK {
    /// Fewer rows than requested
    #[must_use]
    pub fn is_short(&self) -> bool {
        self.row_ids.len() < self.requested
    }

    /// Short result that may be caused by damaged records rather than a
    /// small index
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.is_short() && self.skipped_records > 0
    }
}

/// Public facade for a Keel index
///
/// Owns the graph and its page store. Searches take `&self`; inserts and
/// deletes take `&mut self`, so a single writer is enforced by the borrow
/// checker. Use [`SharedIndex`] to share one index across threads.
#[derive(Debug)]
pub struct VectorIndex<S: PageStore = MmapPageStore> {
    graph: DiskGraph<S>,
}

impl VectorIndex<MmapPageStore> {
    /// Open or create a file-backed index
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the index file
    /// * `dims` - Number of dimensions per vector
    /// * `options` - Used only when the file is created; an existing index
    ///   keeps the configuration it was created with
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The options are invalid ([`IndexError::InvalidOptions`])
    /// - The file holds an index of another dimension or format
    ///   ([`IndexError::IncompatibleIndex`])
    /// - The file cannot be opened, locked or mapped
    pub fn open<P: AsRef<Path>>(path: P, dims: usize, options: IndexOptions) -> Result<Self> {
        let path = path.as_ref();

        if MmapPageStore::is_initialized(path) {
            let index = Self::load(MmapPageStore::open(path)?)?;
            if index.dimensions() != dims {
                return Err(IndexError::IncompatibleIndex(format!(
                    "index at {} has dimension {}, requested {}",
                    path.display(),
                    index.dimensions(),
                    dims
                )));
            }
            tracing::info!(path = %path.display(), nodes = index.len(), "opened index");
            return Ok(index);
        }

        let config = options.resolve(dims)?;
        let store = MmapPageStore::create(path, config.record_size())?;
        let graph = DiskGraph::create(store, config)?;
        tracing::info!(path = %path.display(), "created index file");
        Ok(Self { graph })
    }
}

impl<S: PageStore> VectorIndex<S> {
    /// Create an index on an empty store whose page size equals the
    /// resolved record size (see [`IndexConfig::record_size`]).
    ///
    /// # Errors
    ///
    /// [`IndexError::InvalidOptions`] or [`IndexError::IncompatibleIndex`].
    pub fn create(store: S, dims: usize, options: IndexOptions) -> Result<Self> {
        let config = options.resolve(dims)?;
        Ok(Self { graph: DiskGraph::create(store, config)? })
    }

    /// Load an index previously written to `store`.
    ///
    /// # Errors
    ///
    /// [`IndexError::IncompatibleIndex`] if the store holds no valid index.
    pub fn load(store: S) -> Result<Self> {
        Ok(Self { graph: DiskGraph::load(store)? })
    }

    /// Index a row.
    ///
    /// # Crash Consistency Protocol
    ///
    /// 1. **Write Node**: the new record, with its forward links
    /// 2. **Relink**: reciprocal edges on each chosen neighbor
    /// 3. **Publish**: metadata (entry point, node count)
    ///
    /// # Errors
    ///
    /// [`IndexError::DimensionMismatch`], [`IndexError::NonFiniteVector`],
    /// [`IndexError::DuplicateRowId`] or [`IndexError::InvalidRowId`] before
    /// any write; storage failures after.
    pub fn insert(&mut self, row_id: RowId, vector: &[f32]) -> Result<()> {
        self.graph.insert(row_id, vector)
    }

    /// Remove a row and stitch its neighborhood back together.
    ///
    /// # Errors
    ///
    /// [`IndexError::NotFound`] if the row is not indexed.
    pub fn delete(&mut self, row_id: RowId) -> Result<()> {
        self.graph.delete(row_id)
    }

    /// Index `rows` in random order, then run one refinement pass.
    ///
    /// # Errors
    ///
    /// As [`VectorIndex::bulk_build_with`].
    pub fn bulk_build<I>(&mut self, rows: I) -> Result<usize>
    where
        I: IntoIterator<Item = (RowId, Vec<f32>)>,
    {
        self.bulk_build_with(rows, &BuildOptions { refine_passes: 1, ..Default::default() })
    }

    /// Index `rows` with explicit ordering, refinement and cancellation.
    ///
    /// # Errors
    ///
    /// Validation errors for any row (nothing is inserted), or
    /// [`IndexError::Cancelled`] with the number of rows already indexed.
    pub fn bulk_build_with<I>(&mut self, rows: I, options: &BuildOptions) -> Result<usize>
    where
        I: IntoIterator<Item = (RowId, Vec<f32>)>,
    {
        self.graph.bulk_build(rows, options)
    }

    /// Full-graph pruning passes.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub fn refine(&mut self, passes: usize) -> Result<()> {
        self.graph.refine(passes)
    }

    /// The `k` nearest rows using the configured search beam.
    ///
    /// # Errors
    ///
    /// [`IndexError::InvalidK`], [`IndexError::DimensionMismatch`],
    /// [`IndexError::NonFiniteVector`] or [`IndexError::EmptyIndex`].
    pub fn search(&self, query: &[f32], k: usize) -> Result<TopK> {
        self.search_with_beam(query, k, self.graph.config().beam_for(k))
    }

    /// As [`VectorIndex::search`] with an explicit beam width (capped at 200,
    /// then raised to `k` or the live row count, whichever is smaller).
    ///
    /// # Errors
    ///
    /// As [`VectorIndex::search`].
    pub fn search_with_beam(&self, query: &[f32], k: usize, beam: usize) -> Result<TopK> {
        let outcome = self.graph.search(query, k, beam)?;
        Ok(TopK {
            row_ids: outcome.results.iter().map(|r| r.row_id).collect(),
            requested: k,
            skipped_records: outcome.skipped_records,
        })
    }

    /// Nearest rows with their exact distances.
    ///
    /// # Errors
    ///
    /// As [`VectorIndex::search`].
    pub fn search_results(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        Ok(self.graph.search(query, k, self.graph.config().beam_for(k))?.results)
    }

    /// Publish metadata and sync the store.
    ///
    /// # Performance Warning
    ///
    /// On a file-backed index this is an `fsync`. Batch inserts and flush
    /// once at the end.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails
    pub fn flush(&mut self) -> Result<()> {
        self.graph.sync()
    }

    /// Live rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.len()
    }

    /// Whether no rows are indexed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Vector dimension
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.graph.config().dims
    }

    /// Resolved configuration
    #[must_use]
    pub fn config(&self) -> &IndexConfig {
        self.graph.config()
    }

    /// Whether `row_id` is indexed
    #[must_use]
    pub fn contains(&self, row_id: RowId) -> bool {
        self.graph.contains(row_id)
    }

    /// Where every search starts; `None` when empty
    #[must_use]
    pub fn entry_point(&self) -> Option<RowId> {
        self.graph.entry_point()
    }

    /// Adjacency of one row.
    ///
    /// # Errors
    ///
    /// [`IndexError::NotFound`] or [`IndexError::CorruptRecord`].
    pub fn neighbors(&self, row_id: RowId) -> Result<Vec<RowId>> {
        self.graph.neighbors(row_id)
    }

    /// Graph shape summary.
    ///
    /// # Errors
    ///
    /// [`IndexError::CorruptRecord`] if a live record is damaged.
    pub fn stats(&self) -> Result<IndexStats> {
        self.graph.stats()
    }

    /// Underlying graph
    #[cfg(feature = "internals")]
    #[must_use]
    pub fn graph(&self) -> &DiskGraph<S> {
        &self.graph
    }

    /// Underlying graph, mutable
    #[cfg(feature = "internals")]
    pub fn graph_mut(&mut self) -> &mut DiskGraph<S> {
        &mut self.graph
    }
}
