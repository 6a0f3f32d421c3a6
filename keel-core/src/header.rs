//! File header for [`crate::storage::MmapPageStore`].
//!
//! # Layout (4096 bytes, little-endian)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       8     magic: b"KEELPGS\0"
//! 8       4     version: u32
//! 12      4     page_size: u32
//! 16      8     page_count: u64 (pages ever allocated, high-water mark)
//! 24      8     free_head: u64 (first free page, u64::MAX = empty)
//! 32      2     meta_len: u16 (0 = no metadata written yet)
//! 34      6     reserved
//! 40      256   meta: opaque metadata block owned by the index
//! 296     3800  reserved
//! ```
//!
//! The header occupies one full page so that record pages start 4 KiB
//! aligned.

/// Magic bytes identifying a Keel page file
pub const MAGIC: &[u8; 8] = b"KEELPGS\0";

/// Current file format version
pub const VERSION: u32 = 1;

/// Size of the header in bytes (always one 4KB page)
pub const HEADER_SIZE: usize = 4096;

/// Capacity of the embedded metadata block
pub const META_CAPACITY: usize = 256;

/// Sentinel for an empty free list
pub const NO_PAGE: u64 = u64::MAX;

const META_OFFSET: usize = 40;

/// Decoded page-file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// File format version
    pub version: u32,

    /// Bytes per page
    pub page_size: u32,

    /// Pages ever allocated (live or free)
    pub page_count: u64,

    /// Head of the on-disk free list
    pub free_head: u64,

    /// Metadata block, `None` until first written
    pub meta: Option<Vec<u8>>,
}

impl Header {
    /// Creates a header for an empty file with the given page size
    #[must_use]
    pub const fn new(page_size: u32) -> Self {
        Self { version: VERSION, page_size, page_count: 0, free_head: NO_PAGE, meta: None }
    }

    /// Validates the header for correctness and compatibility
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.version > 0
            && self.version <= VERSION
            && self.page_size >= 8
            && (self.free_head == NO_PAGE || self.free_head < self.page_count)
            && self.meta.as_ref().is_none_or(|m| m.len() <= META_CAPACITY)
    }

    /// Serialize into a full header page.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0..8].copy_from_slice(MAGIC);
        bytes[8..12].copy_from_slice(&self.version.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.page_size.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.page_count.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.free_head.to_le_bytes());

        if let Some(meta) = &self.meta {
            let len = meta.len().min(META_CAPACITY);
            bytes[32..34].copy_from_slice(&(len as u16).to_le_bytes());
            bytes[META_OFFSET..META_OFFSET + len].copy_from_slice(&meta[..len]);
        }

        bytes
    }

    /// Parse a header page.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is short, the magic does not match, or
    /// a field is out of range.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() < HEADER_SIZE {
            return Err("Buffer too small for file header");
        }
        if &bytes[0..8] != MAGIC {
            return Err("File is not a Keel page file");
        }

        let meta_len = usize::from(u16::from_le_bytes([bytes[32], bytes[33]]));
        if meta_len > META_CAPACITY {
            return Err("Metadata length exceeds capacity");
        }

        let header = Self {
            version: u32::from_le_bytes(read_array(&bytes[8..12])),
            page_size: u32::from_le_bytes(read_array(&bytes[12..16])),
            page_count: u64::from_le_bytes(read_array(&bytes[16..24])),
            free_head: u64::from_le_bytes(read_array(&bytes[24..32])),
            meta: (meta_len > 0).then(|| bytes[META_OFFSET..META_OFFSET + meta_len].to_vec()),
        };

        if !header.is_valid() {
            return Err("Corrupted or incompatible file header");
        }

        Ok(header)
    }
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut header = Header::new(2112);
        header.page_count = 9;
        header.free_head = 4;
        header.meta = Some(vec![7; 64]);

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(Header::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_new_header_is_valid() {
        let header = Header::new(4096);
        assert!(header.is_valid());
        assert_eq!(header.page_count, 0);
        assert_eq!(header.free_head, NO_PAGE);
        assert!(header.meta.is_none());
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = Header::new(64).to_bytes();
        bytes[0..8].copy_from_slice(b"INVALID\0");
        assert!(Header::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_free_head_past_end_is_rejected() {
        let mut header = Header::new(64);
        header.page_count = 2;
        header.free_head = 5;
        assert!(Header::from_bytes(&header.to_bytes()).is_err());
    }

    #[test]
    fn test_zero_page_size_is_rejected() {
        assert!(!Header::new(0).is_valid());
    }
}
