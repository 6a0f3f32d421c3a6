//! Fixed-width node record layout for O(1) addressing.
//!
//! # Design Principles
//!
//! Each node record has a **fixed size** determined at index creation time
//! and occupies exactly one page. The record reserves space for the
//! **maximum** neighbor count; unused slots are zero and ignored because the
//! header carries the live count.
//!
//! # Layout
//!
//! ```text
//! Offset          Size              Field
//! ------          ----              -----
//! 0               8                 row_id: u64
//! 8               2                 neighbor_count: u16
//! 10              1                 flags: u8 (bit0 = live)
//! 11              5                 reserved
//! 16              4·D               full vector (f32 LE)
//! 16 + 4·D        M × (8 + E)       neighbor slots: row_id u64 | encoded vector
//! ```
//!
//! `E` is the encoded length of one neighbor vector under the index's
//! compression mode. A record whose live bit is clear is a tombstone or a
//! free page and is never traversed.

use super::{INVALID_ROW_ID, RowId};

/// Size of the record header in bytes
pub const NODE_HEADER_SIZE: usize = 16;

/// Live bit in `flags`
pub const FLAG_LIVE: u8 = 0x01;

/// Parameters that determine the fixed record size.
///
/// These parameters are set at index creation and cannot be changed
/// without rebuilding the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    /// Vector dimension
    pub dims: usize,

    /// Neighbor slots per record
    pub max_neighbors: usize,

    /// Encoded byte length of one inline neighbor vector
    pub neighbor_vector_len: usize,
}

impl RecordLayout {
    /// Create a layout
    #[must_use]
    pub const fn new(dims: usize, max_neighbors: usize, neighbor_vector_len: usize) -> Self {
        Self { dims, max_neighbors, neighbor_vector_len }
    }

    /// Bytes of the full-precision vector
    #[must_use]
    pub const fn full_vector_len(&self) -> usize {
        self.dims * 4
    }

    /// Bytes per neighbor slot (id + encoded vector)
    #[must_use]
    pub const fn slot_len(&self) -> usize {
        8 + self.neighbor_vector_len
    }

    /// Offset of the first neighbor slot
    #[must_use]
    pub const fn neighbors_offset(&self) -> usize {
        NODE_HEADER_SIZE + self.full_vector_len()
    }

    /// Total record size: `header + fullVectorBytes + M × (idBytes + neighborVectorBytes)`
    #[must_use]
    pub const fn record_size(&self) -> usize {
        self.neighbors_offset() + self.max_neighbors * self.slot_len()
    }
}

/// Zero-copy view over a live node record.
#[derive(Debug, Clone, Copy)]
pub struct NodeView<'a> {
    row_id: RowId,
    full_vector: &'a [u8],
    slots: &'a [u8],
    slot_len: usize,
    count: usize,
}

impl<'a> NodeView<'a> {
    /// Parse a record with structural validation.
    ///
    /// Returns `Ok(None)` for a tombstone or free page.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The slice length differs from the layout's record size
    /// - The row id is the reserved sentinel
    /// - `neighbor_count` exceeds `max_neighbors`
    /// - A neighbor slot holds the sentinel or the node itself
    pub fn parse(bytes: &'a [u8], layout: &RecordLayout) -> Result<Option<Self>, &'static str> {
        if bytes.len() != layout.record_size() {
            return Err("record length does not match layout");
        }
        if bytes[10] & FLAG_LIVE == 0 {
            return Ok(None);
        }

        let row_id = read_u64(&bytes[0..8]);
        if row_id == INVALID_ROW_ID {
            return Err("row id is the reserved sentinel");
        }

        let count = usize::from(u16::from_le_bytes([bytes[8], bytes[9]]));
        if count > layout.max_neighbors {
            return Err("neighbor count exceeds max_neighbors");
        }

        let view = Self {
            row_id,
            full_vector: &bytes[NODE_HEADER_SIZE..layout.neighbors_offset()],
            slots: &bytes[layout.neighbors_offset()..],
            slot_len: layout.slot_len(),
            count,
        };

        for id in view.neighbor_ids() {
            if id == INVALID_ROW_ID {
                return Err("neighbor slot holds the reserved sentinel");
            }
            if id == row_id {
                return Err("record lists itself as a neighbor");
            }
        }

        Ok(Some(view))
    }

    /// Owning row id
    #[must_use]
    pub const fn row_id(&self) -> RowId {
        self.row_id
    }

    /// Number of live neighbor slots
    #[must_use]
    pub const fn neighbor_count(&self) -> usize {
        self.count
    }

    /// Raw little-endian bytes of the full vector
    #[must_use]
    pub const fn full_vector_bytes(&self) -> &'a [u8] {
        self.full_vector
    }

    /// Decode the full vector into `out` (must be `dims` long).
    pub fn read_full_vector(&self, out: &mut [f32]) {
        for (v, chunk) in out.iter_mut().zip(self.full_vector.chunks_exact(4)) {
            *v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
    }

    /// Decode the full vector into a new buffer
    #[must_use]
    pub fn full_vector(&self) -> Vec<f32> {
        let mut out = vec![0.0; self.full_vector.len() / 4];
        self.read_full_vector(&mut out);
        out
    }

    /// Iterator over `(row_id, encoded vector)` for live slots (zero-allocation)
    pub fn neighbors(self) -> impl Iterator<Item = (RowId, &'a [u8])> + 'a {
        let slot_len = self.slot_len;
        self.slots
            .chunks_exact(slot_len)
            .take(self.count)
            .map(|slot| (read_u64(&slot[..8]), &slot[8..]))
    }

    /// Iterator over neighbor row ids
    pub fn neighbor_ids(self) -> impl Iterator<Item = RowId> + 'a {
        self.neighbors().map(|(id, _)| id)
    }
}

/// One adjacency entry with its inline encoded vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    /// Neighbor's row id
    pub row_id: RowId,
    /// Neighbor's vector under the index compression mode
    pub vector: Vec<u8>,
}

/// Owned node record, used for building and editing.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    /// Owning row id
    pub row_id: RowId,
    /// Full-precision vector
    pub vector: Vec<f32>,
    /// Adjacency list, at most `max_neighbors` entries
    pub neighbors: Vec<Neighbor>,
}

impl NodeRecord {
    /// Create a record with no neighbors
    #[must_use]
    pub fn new(row_id: RowId, vector: Vec<f32>) -> Self {
        Self { row_id, vector, neighbors: Vec::new() }
    }

    /// Copy a view into an owned record
    #[must_use]
    pub fn from_view(view: &NodeView<'_>) -> Self {
        Self {
            row_id: view.row_id(),
            vector: view.full_vector(),
            neighbors: view
                .neighbors()
                .map(|(row_id, vector)| Neighbor { row_id, vector: vector.to_vec() })
                .collect(),
        }
    }

    /// Whether `row_id` is in the adjacency list
    #[must_use]
    pub fn has_neighbor(&self, row_id: RowId) -> bool {
        self.neighbors.iter().any(|n| n.row_id == row_id)
    }

    /// Neighbor row ids in slot order
    #[must_use]
    pub fn neighbor_ids(&self) -> Vec<RowId> {
        self.neighbors.iter().map(|n| n.row_id).collect()
    }

    /// Serialize into a full page.
    ///
    /// # Errors
    ///
    /// Returns an error if the record violates the layout: wrong vector
    /// length, too many neighbors, a self-link, a duplicate or a sentinel id.
    pub fn to_bytes(&self, layout: &RecordLayout) -> Result<Vec<u8>, &'static str> {
        if self.vector.len() != layout.dims {
            return Err("full vector length does not match layout");
        }
        if self.neighbors.len() > layout.max_neighbors {
            return Err("too many neighbors for layout");
        }
        if self.row_id == INVALID_ROW_ID {
            return Err("row id is the reserved sentinel");
        }

        let mut bytes = vec![0u8; layout.record_size()];
        bytes[0..8].copy_from_slice(&self.row_id.to_le_bytes());
        bytes[8..10].copy_from_slice(&(self.neighbors.len() as u16).to_le_bytes());
        bytes[10] = FLAG_LIVE;

        for (chunk, v) in bytes[NODE_HEADER_SIZE..layout.neighbors_offset()].chunks_exact_mut(4).zip(&self.vector) {
            chunk.copy_from_slice(&v.to_le_bytes());
        }

        let slots = &mut bytes[layout.neighbors_offset()..];
        for (i, (slot, neighbor)) in slots.chunks_exact_mut(layout.slot_len()).zip(&self.neighbors).enumerate() {
            if neighbor.row_id == self.row_id || neighbor.row_id == INVALID_ROW_ID {
                return Err("invalid neighbor id");
            }
            if self.neighbors[..i].iter().any(|n| n.row_id == neighbor.row_id) {
                return Err("duplicate neighbor id");
            }
            if neighbor.vector.len() != layout.neighbor_vector_len {
                return Err("neighbor vector length does not match layout");
            }
            slot[..8].copy_from_slice(&neighbor.row_id.to_le_bytes());
            slot[8..].copy_from_slice(&neighbor.vector);
        }

        Ok(bytes)
    }
}

/// An all-zero page: live bit clear.
#[must_use]
pub fn tombstone(layout: &RecordLayout) -> Vec<u8> {
    vec![0u8; layout.record_size()]
}

#[inline]
fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
