//! Disk-resident proximity graph.
//!
//! One node record per indexed row, one record per page. Traversal reads
//! compressed neighbor copies stored inline in each record, so expanding a
//! node costs one page read regardless of its degree.
//!
//! Writers follow a write-new-then-relink ordering:
//! 1. Write the node's own record (forward links)
//! 2. Update reciprocal or stitched links on affected neighbors
//! 3. Publish (metadata: entry point and node count)
//!
//! A crash between 1 and 3 leaves at worst one-way edges or edges to a
//! record that was never published; both are tolerated on load.

pub mod builder;
pub mod delete;
pub mod directory;
pub mod link;
pub mod node;
pub mod prune;
pub mod search;

pub use builder::BuildOptions;
pub use directory::NodeDirectory;
pub use node::{Neighbor, NodeRecord, NodeView, RecordLayout};
pub use search::{SearchOutcome, SearchResult};

use crate::codec::VectorCodec;
use crate::error::{IndexError, Result};
use crate::metadata::IndexMetadata;
use crate::options::IndexConfig;
use crate::storage::{PageId, PageStore};

/// Host row identifier
pub type RowId = u64;

/// Reserved row id: marks "no node" in metadata and is never indexable
pub const INVALID_ROW_ID: RowId = RowId::MAX;

/// Graph shape summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexStats {
    /// Live nodes
    pub nodes: usize,
    /// Directed edges across all live records
    pub edges: usize,
    /// Largest out-degree
    pub max_degree: usize,
    /// Mean out-degree
    pub avg_degree: f64,
    /// Edges `a → b` where `b` does not list `a`
    pub asymmetric_edges: usize,
    /// Bytes per node record
    pub record_size: usize,
    /// Bytes of pages allocated (live, tombstoned and free)
    pub storage_bytes: u64,
}

/// The graph index over a page store.
#[derive(Debug)]
pub struct DiskGraph<S: PageStore> {
    store: S,
    config: IndexConfig,
    layout: RecordLayout,
    codec: VectorCodec,
    entry_point: Option<RowId>,
    directory: NodeDirectory,
}

impl<S: PageStore> DiskGraph<S> {
    /// Initialize an empty index on an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::IncompatibleIndex`] if the store already holds
    /// pages or metadata, or its page size differs from the record size.
    pub fn create(store: S, config: IndexConfig) -> Result<Self> {
        if store.page_count() != 0 || store.read_meta()?.is_some() {
            return Err(IndexError::IncompatibleIndex("page store is not empty".to_owned()));
        }
        if store.page_size() != config.record_size() {
            return Err(IndexError::IncompatibleIndex(format!(
                "page size {} does not match node record size {}",
                store.page_size(),
                config.record_size()
            )));
        }

        let mut graph = Self {
            store,
            layout: config.layout(),
            codec: config.codec(),
            config,
            entry_point: None,
            directory: NodeDirectory::new(),
        };
        graph.publish()?;

        tracing::info!(
            dims = config.dims,
            compression = %config.compression,
            max_neighbors = config.max_neighbors,
            metric = %config.metric,
            record_size = config.record_size(),
            "created index"
        );
        Ok(graph)
    }

    /// Open an index previously written to `store`.
    ///
    /// Rebuilds the node directory by scanning every page. Corrupt records are
    /// logged and left out; edges pointing at rows that were never published
    /// are dropped from the directory.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::IncompatibleIndex`] for missing or invalid
    /// metadata, or [`IndexError::StorageFailure`] if a page cannot be read.
    pub fn load(store: S) -> Result<Self> {
        let meta = store
            .read_meta()?
            .ok_or_else(|| IndexError::IncompatibleIndex("page store holds no index metadata".to_owned()))?;
        let meta = IndexMetadata::decode(&meta)?;
        let config = meta.config;

        if store.page_size() != config.record_size() {
            return Err(IndexError::IncompatibleIndex(format!(
                "page size {} does not match node record size {}",
                store.page_size(),
                config.record_size()
            )));
        }

        let layout = config.layout();
        let mut directory = NodeDirectory::new();
        let mut adjacency: Vec<(RowId, Vec<RowId>)> = Vec::new();
        let mut corrupt = 0usize;

        for page in 0..store.page_count() {
            let bytes = store.read(page)?;
            match NodeView::parse(bytes, &layout) {
                Ok(Some(view)) => {
                    if directory.contains(view.row_id()) {
                        tracing::warn!(page, row_id = view.row_id(), "duplicate record for row, keeping first");
                        corrupt += 1;
                        continue;
                    }
                    directory.insert_node(view.row_id(), page);
                    adjacency.push((view.row_id(), view.neighbor_ids().collect()));
                }
                Ok(None) => {}
                Err(reason) => {
                    tracing::warn!(page, reason, "skipping corrupt node record during load");
                    corrupt += 1;
                }
            }
        }

        let mut dangling = 0usize;
        for (src, targets) in &adjacency {
            for dst in targets {
                if directory.contains(*dst) {
                    directory.add_edge(*src, *dst);
                } else {
                    dangling += 1;
                }
            }
        }

        let entry_point = match meta.entry_point {
            Some(entry) if directory.contains(entry) => Some(entry),
            stored => {
                let replacement = directory.min_row();
                if stored.is_some() || replacement.is_some() {
                    tracing::warn!(?stored, ?replacement, "stored entry point is not live; reassigned");
                }
                replacement
            }
        };

        if meta.node_count != directory.len() as u64 {
            tracing::warn!(
                published = meta.node_count,
                found = directory.len(),
                "node count differs from last publish (interrupted write)"
            );
        }

        tracing::info!(nodes = directory.len(), corrupt, dangling, "loaded index");

        Ok(Self { store, layout, codec: config.codec(), config, entry_point, directory })
    }

    /// Resolved configuration
    #[must_use]
    pub const fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Record layout
    #[must_use]
    pub const fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    /// Neighbor-vector codec
    #[must_use]
    pub const fn codec(&self) -> &VectorCodec {
        &self.codec
    }

    /// Current entry point
    #[must_use]
    pub const fn entry_point(&self) -> Option<RowId> {
        self.entry_point
    }

    /// Live node count
    #[must_use]
    pub fn len(&self) -> usize {
        self.directory.len()
    }

    /// Whether the graph has no live nodes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.directory.is_empty()
    }

    /// Whether `row_id` is indexed
    #[must_use]
    pub fn contains(&self, row_id: RowId) -> bool {
        self.directory.contains(row_id)
    }

    /// Node directory
    #[must_use]
    pub const fn directory(&self) -> &NodeDirectory {
        &self.directory
    }

    /// Backing store
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Mutable backing store; writes through it bypass every graph invariant.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Give back the store
    pub fn into_store(self) -> S {
        self.store
    }

    /// Write metadata (entry point, node count).
    pub(crate) fn publish(&mut self) -> Result<()> {
        let meta = IndexMetadata {
            config: self.config,
            entry_point: self.entry_point,
            node_count: self.directory.len() as u64,
        };
        self.store.write_meta(&meta.encode())?;
        Ok(())
    }

    /// Publish and make durable.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::StorageFailure`] if the store fails to sync.
    pub fn sync(&mut self) -> Result<()> {
        self.publish()?;
        self.store.sync()?;
        Ok(())
    }

    /// Zero-copy view of a live node; `None` if `row_id` is not indexed.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::CorruptRecord`] if the record fails structural
    /// checks or belongs to a different row.
    pub fn view(&self, row_id: RowId) -> Result<Option<NodeView<'_>>> {
        let Some(page) = self.directory.page_of(row_id) else {
            return Ok(None);
        };
        let bytes = self.store.read(page)?;
        match NodeView::parse(bytes, &self.layout) {
            Ok(Some(view)) if view.row_id() == row_id => Ok(Some(view)),
            Ok(Some(_)) => Err(IndexError::CorruptRecord { page, reason: "record belongs to another row" }),
            Ok(None) => Err(IndexError::CorruptRecord { page, reason: "live node page holds a tombstone" }),
            Err(reason) => Err(IndexError::CorruptRecord { page, reason }),
        }
    }

    /// Owned copy of a node record.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] for an unknown row or
    /// [`IndexError::CorruptRecord`] if its record is damaged.
    pub fn read_node(&self, row_id: RowId) -> Result<NodeRecord> {
        self.view(row_id)?
            .map(|view| NodeRecord::from_view(&view))
            .ok_or(IndexError::NotFound(row_id))
    }

    /// Adjacency of one node, in slot order.
    ///
    /// # Errors
    ///
    /// As [`DiskGraph::read_node`].
    pub fn neighbors(&self, row_id: RowId) -> Result<Vec<RowId>> {
        let view = self.view(row_id)?.ok_or(IndexError::NotFound(row_id))?;
        Ok(view.neighbor_ids().collect())
    }

    pub(crate) fn write_node(&mut self, page: PageId, record: &NodeRecord) -> Result<()> {
        let bytes = record.to_bytes(&self.layout).map_err(|reason| IndexError::CorruptRecord { page, reason })?;
        self.store.write(page, &bytes)?;
        Ok(())
    }

    pub(crate) fn page_of(&self, row_id: RowId) -> Result<PageId> {
        self.directory.page_of(row_id).ok_or(IndexError::NotFound(row_id))
    }

    pub(crate) fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dims {
            return Err(IndexError::DimensionMismatch { expected: self.config.dims, actual: vector.len() });
        }
        if let Some(index) = vector.iter().position(|x| !x.is_finite()) {
            return Err(IndexError::NonFiniteVector { index });
        }
        Ok(())
    }

    pub(crate) fn check_new_row(&self, row_id: RowId) -> Result<()> {
        if row_id == INVALID_ROW_ID {
            return Err(IndexError::InvalidRowId);
        }
        if self.directory.contains(row_id) {
            return Err(IndexError::DuplicateRowId(row_id));
        }
        Ok(())
    }

    /// Scan every live record and summarize the graph.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::CorruptRecord`] if any live record is damaged.
    pub fn stats(&self) -> Result<IndexStats> {
        let mut edges = 0usize;
        let mut max_degree = 0usize;
        let mut asymmetric_edges = 0usize;

        for row in self.directory.rows() {
            let view = self.view(row)?.ok_or(IndexError::NotFound(row))?;
            let degree = view.neighbor_count();
            edges += degree;
            max_degree = max_degree.max(degree);
            asymmetric_edges += view.neighbor_ids().filter(|dst| !self.directory.has_edge(*dst, row)).count();
        }

        let nodes = self.directory.len();
        Ok(IndexStats {
            nodes,
            edges,
            max_degree,
            avg_degree: if nodes == 0 { 0.0 } else { edges as f64 / nodes as f64 },
            asymmetric_edges,
            record_size: self.layout.record_size(),
            storage_bytes: self.store.page_count() * self.store.page_size() as u64,
        })
    }
}
