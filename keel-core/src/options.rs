//! Index configuration.
//!
//! [`IndexOptions`] is what a caller asks for (every field optional in the
//! options string); [`IndexConfig`] is the resolved, immutable configuration
//! bound to a dimension and persisted in the metadata block.

use crate::codec::{CompressionMode, VectorCodec};
use crate::distance::DistanceMetric;
use crate::error::{IndexError, Result};
use crate::graph::node::RecordLayout;
use std::str::FromStr;

/// Default robust-pruning factor
pub const DEFAULT_ALPHA: f32 = 1.2;

/// Default search beam width
pub const DEFAULT_SEARCH_BEAM: usize = 64;

/// Practical ceiling for the configured search beam
pub const MAX_SEARCH_BEAM: usize = 200;

/// Floor for the insert beam when derived from `max_neighbors`
pub const MIN_INSERT_BEAM: usize = 64;

/// Ceiling for the insert beam
pub const MAX_INSERT_BEAM: usize = 512;

/// Largest supported vector dimension
pub const MAX_DIMENSIONS: usize = 65_536;

/// Largest supported neighbor degree
pub const MAX_NEIGHBORS_LIMIT: usize = 1024;

/// `max_neighbors` default: `floor(3 · sqrt(dims))`, at least 1.
#[must_use]
pub fn default_max_neighbors(dims: usize) -> usize {
    ((3.0 * (dims as f64).sqrt()).floor() as usize).max(1)
}

/// Caller-facing index options.
///
/// Parsed from the host's options string, e.g.
/// `"compress_neighbors=float8,max_neighbors=20"`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOptions {
    /// Encoding of the inline neighbor vectors
    pub compression: CompressionMode,

    /// Degree bound; `None` derives `3·sqrt(dims)`
    pub max_neighbors: Option<usize>,

    /// Distance metric
    pub metric: DistanceMetric,

    /// Robust-pruning factor (≥ 1)
    pub alpha: f32,

    /// Beam width for queries (raised to `k` when smaller)
    pub search_beam: usize,

    /// Beam width for insert traversals; `None` derives `max(2·M, 64)`
    pub insert_beam: Option<usize>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            compression: CompressionMode::Float32,
            max_neighbors: None,
            metric: DistanceMetric::Cosine,
            alpha: DEFAULT_ALPHA,
            search_beam: DEFAULT_SEARCH_BEAM,
            insert_beam: None,
        }
    }
}

impl IndexOptions {
    /// Parse a comma or whitespace separated `key=value` list.
    ///
    /// Keys: `compress_neighbors`, `max_neighbors`, `metric`, `alpha`,
    /// `search_l`, `insert_l`. An empty string yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidOptions`] for unknown keys, repeated keys
    /// and unparsable or out-of-range values.
    pub fn parse(options: &str) -> Result<Self> {
        let mut parsed = Self::default();
        let mut seen: Vec<&str> = Vec::new();

        for pair in options.split(|c: char| c == ',' || c.is_whitespace()).filter(|p| !p.is_empty()) {
            let pair = pair.trim_matches(|c: char| c == '\'' || c == '"');
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| IndexError::InvalidOptions(format!("expected key=value, got '{pair}'")))?;
            let (key, value) = (key.trim(), value.trim());

            if seen.contains(&key) {
                return Err(IndexError::InvalidOptions(format!("'{key}' given more than once")));
            }
            seen.push(key);

            match key {
                "compress_neighbors" => parsed.compression = value.parse()?,
                "max_neighbors" => parsed.max_neighbors = Some(parse_number(key, value)?),
                "metric" => parsed.metric = value.parse()?,
                "alpha" => {
                    parsed.alpha = value
                        .parse()
                        .map_err(|_| IndexError::InvalidOptions(format!("alpha: '{value}' is not a number")))?;
                }
                "search_l" => parsed.search_beam = parse_number(key, value)?,
                "insert_l" => parsed.insert_beam = Some(parse_number(key, value)?),
                other => return Err(IndexError::InvalidOptions(format!("unknown option '{other}'"))),
            }
        }

        parsed.validate()?;
        Ok(parsed)
    }

    /// Range-check every field that does not depend on the dimension.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidOptions`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if !self.alpha.is_finite() || self.alpha < 1.0 {
            return Err(IndexError::InvalidOptions(format!("alpha must be >= 1.0, got {}", self.alpha)));
        }
        if self.search_beam == 0 || self.search_beam > MAX_SEARCH_BEAM {
            return Err(IndexError::InvalidOptions(format!(
                "search_l must be in 1..={MAX_SEARCH_BEAM}, got {}",
                self.search_beam
            )));
        }
        if let Some(m) = self.max_neighbors {
            if m == 0 || m > MAX_NEIGHBORS_LIMIT {
                return Err(IndexError::InvalidOptions(format!(
                    "max_neighbors must be in 1..={MAX_NEIGHBORS_LIMIT}, got {m}"
                )));
            }
        }
        if let Some(l) = self.insert_beam {
            if l == 0 || l > MAX_INSERT_BEAM {
                return Err(IndexError::InvalidOptions(format!(
                    "insert_l must be in 1..={MAX_INSERT_BEAM}, got {l}"
                )));
            }
        }
        Ok(())
    }

    /// Bind these options to a dimension.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidOptions`] if the options are out of range
    /// or `dims` is zero or above [`MAX_DIMENSIONS`].
    pub fn resolve(&self, dims: usize) -> Result<IndexConfig> {
        self.validate()?;
        if dims == 0 || dims > MAX_DIMENSIONS {
            return Err(IndexError::InvalidOptions(format!(
                "dimension must be in 1..={MAX_DIMENSIONS}, got {dims}"
            )));
        }

        let max_neighbors = self.max_neighbors.unwrap_or_else(|| default_max_neighbors(dims)).min(MAX_NEIGHBORS_LIMIT);
        let insert_beam = self
            .insert_beam
            .unwrap_or_else(|| (2 * max_neighbors).clamp(MIN_INSERT_BEAM, MAX_INSERT_BEAM));

        let config = IndexConfig {
            dims,
            compression: self.compression,
            max_neighbors,
            metric: self.metric,
            alpha: self.alpha,
            search_beam: self.search_beam,
            insert_beam,
        };

        if u32::try_from(config.record_size()).is_err() {
            return Err(IndexError::InvalidOptions(format!(
                "node record of {} bytes is too large",
                config.record_size()
            )));
        }

        Ok(config)
    }
}

impl FromStr for IndexOptions {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| IndexError::InvalidOptions(format!("{key}: '{value}' is not a positive integer")))
}

/// Resolved configuration, fixed for the lifetime of an index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexConfig {
    /// Vector dimension
    pub dims: usize,
    /// Neighbor vector encoding
    pub compression: CompressionMode,
    /// Degree bound
    pub max_neighbors: usize,
    /// Distance metric
    pub metric: DistanceMetric,
    /// Robust-pruning factor
    pub alpha: f32,
    /// Default query beam
    pub search_beam: usize,
    /// Insert traversal beam
    pub insert_beam: usize,
}

impl IndexConfig {
    /// Fixed on-disk layout of one node record
    #[must_use]
    pub const fn layout(&self) -> RecordLayout {
        RecordLayout::new(self.dims, self.max_neighbors, self.compression.encoded_len(self.dims))
    }

    /// Codec for inline neighbor vectors
    #[must_use]
    pub const fn codec(&self) -> VectorCodec {
        VectorCodec::new(self.compression, self.dims)
    }

    /// Bytes per node record (one page)
    #[must_use]
    pub const fn record_size(&self) -> usize {
        self.layout().record_size()
    }

    /// Bytes of node records needed for `rows` live rows.
    #[must_use]
    pub const fn storage_bytes(&self, rows: usize) -> usize {
        rows * self.record_size()
    }

    /// Candidate pool handed to robust pruning on insert
    #[must_use]
    pub const fn candidate_pool(&self) -> usize {
        2 * self.max_neighbors
    }

    /// Query beam for a given `k`: never narrower than `k`.
    #[must_use]
    pub fn beam_for(&self, k: usize) -> usize {
        self.search_beam.max(k)
    }
}
