//! Index metadata block.
//!
//! # Layout (64 bytes, little-endian)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       8     magic: b"KEELIDX\0"
//! 8       2     version: u16
//! 10      1     compression tag
//! 11      1     metric tag
//! 12      4     dims: u32
//! 16      2     max_neighbors: u16
//! 18      2     search_beam: u16
//! 20      2     insert_beam: u16
//! 22      2     reserved
//! 24      4     alpha: f32
//! 28      4     record_size: u32
//! 32      8     entry_point: u64 (u64::MAX = none)
//! 40      8     node_count: u64
//! 48      16    reserved
//! ```
//!
//! Configuration fields are written at creation and never change. Only the
//! entry point and node count move as the graph is edited.

use crate::codec::CompressionMode;
use crate::distance::DistanceMetric;
use crate::error::{IndexError, Result};
use crate::graph::{INVALID_ROW_ID, RowId};
use crate::options::IndexConfig;

/// Magic bytes identifying a Keel index metadata block
pub const META_MAGIC: &[u8; 8] = b"KEELIDX\0";

/// Metadata format version
pub const META_VERSION: u16 = 1;

/// Encoded size of the metadata block
pub const META_SIZE: usize = 64;

/// Persisted index configuration plus entry-point bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexMetadata {
    /// Immutable configuration
    pub config: IndexConfig,

    /// Start node for every traversal
    pub entry_point: Option<RowId>,

    /// Live node count at last publish
    pub node_count: u64,
}

impl IndexMetadata {
    /// Fresh metadata for an empty index
    #[must_use]
    pub const fn new(config: IndexConfig) -> Self {
        Self { config, entry_point: None, node_count: 0 }
    }

    /// Encode into the fixed 64-byte block
    #[must_use]
    pub fn encode(&self) -> [u8; META_SIZE] {
        let c = &self.config;
        let mut out = [0u8; META_SIZE];

        out[0..8].copy_from_slice(META_MAGIC);
        out[8..10].copy_from_slice(&META_VERSION.to_le_bytes());
        out[10] = c.compression.tag();
        out[11] = c.metric.tag();
        // Ranges are enforced by IndexOptions::resolve
        out[12..16].copy_from_slice(&(c.dims as u32).to_le_bytes());
        out[16..18].copy_from_slice(&(c.max_neighbors as u16).to_le_bytes());
        out[18..20].copy_from_slice(&(c.search_beam as u16).to_le_bytes());
        out[20..22].copy_from_slice(&(c.insert_beam as u16).to_le_bytes());
        out[24..28].copy_from_slice(&c.alpha.to_le_bytes());
        out[28..32].copy_from_slice(&(c.record_size() as u32).to_le_bytes());
        out[32..40].copy_from_slice(&self.entry_point.unwrap_or(INVALID_ROW_ID).to_le_bytes());
        out[40..48].copy_from_slice(&self.node_count.to_le_bytes());

        out
    }

    /// Decode and validate a metadata block.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::IncompatibleIndex`] on a bad magic, unknown
    /// version or tag, or a stored record size that disagrees with the
    /// configuration.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < META_SIZE {
            return Err(incompatible(format!("metadata block is {} bytes, expected {META_SIZE}", bytes.len())));
        }
        if &bytes[0..8] != META_MAGIC {
            return Err(incompatible("metadata magic mismatch".to_owned()));
        }

        let version = u16::from_le_bytes([bytes[8], bytes[9]]);
        if version == 0 || version > META_VERSION {
            return Err(incompatible(format!("unsupported metadata version {version}")));
        }

        let compression = CompressionMode::from_tag(bytes[10])
            .ok_or_else(|| incompatible(format!("unknown compression tag {}", bytes[10])))?;
        let metric = DistanceMetric::from_tag(bytes[11])
            .ok_or_else(|| incompatible(format!("unknown metric tag {}", bytes[11])))?;

        let u16_at = |at: usize| usize::from(u16::from_le_bytes([bytes[at], bytes[at + 1]]));
        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let u64_at = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(buf)
        };

        let config = IndexConfig {
            dims: u32_at(12) as usize,
            compression,
            max_neighbors: u16_at(16),
            metric,
            alpha: f32::from_bits(u32_at(24)),
            search_beam: u16_at(18),
            insert_beam: u16_at(20),
        };

        if config.dims == 0 || config.max_neighbors == 0 || config.search_beam == 0 || config.insert_beam == 0 {
            return Err(incompatible("zero-valued configuration field".to_owned()));
        }
        if !config.alpha.is_finite() || config.alpha < 1.0 {
            return Err(incompatible(format!("invalid alpha {}", config.alpha)));
        }

        let stored_record_size = u32_at(28) as usize;
        if stored_record_size != config.record_size() {
            return Err(incompatible(format!(
                "record size {} does not match configuration ({})",
                stored_record_size,
                config.record_size()
            )));
        }

        let entry = u64_at(32);
        Ok(Self {
            config,
            entry_point: (entry != INVALID_ROW_ID).then_some(entry),
            node_count: u64_at(40),
        })
    }
}

fn incompatible(reason: String) -> IndexError {
    IndexError::IncompatibleIndex(reason)
}
