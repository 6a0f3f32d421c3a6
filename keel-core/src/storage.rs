//! Page storage consumed by the index.
//!
//! The index never touches files directly: every node record lives in one
//! fixed-size page obtained through [`PageStore`]. A host engine can supply
//! its own buffer-pool-backed implementation; this module ships two:
//!
//! - [`MmapPageStore`]: a memory-mapped file with a 4 KiB header page,
//!   page-aligned growth and an on-disk free list.
//! - [`MemoryPageStore`]: a heap-backed store for tests and ephemeral indexes.
//!
//! Page primitives report failures as [`anyhow::Error`]; the index wraps
//! them into `IndexError::StorageFailure` without retrying.

use crate::header::{HEADER_SIZE, Header, META_CAPACITY, NO_PAGE};
use anyhow::{Context, Result};
use fs2::FileExt;
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Page number within a store
pub type PageId = u64;

/// Filesystem growth granularity (4KB)
const GROWTH_ALIGN: usize = 4096;

/// Host page primitives.
///
/// Pages are zero-filled when allocated. `read` borrows the store, so a
/// page slice cannot outlive a later `&mut self` call.
pub trait PageStore {
    /// Bytes per page, fixed at creation
    fn page_size(&self) -> usize;

    /// Pages ever allocated; valid page ids are `0..page_count()`
    fn page_count(&self) -> u64;

    /// Allocate a zeroed page, reusing freed pages first
    fn allocate(&mut self) -> Result<PageId>;

    /// Borrow a page's bytes
    fn read(&self, page: PageId) -> Result<&[u8]>;

    /// Overwrite a whole page
    fn write(&mut self, page: PageId, data: &[u8]) -> Result<()>;

    /// Return a page to the free list
    fn free(&mut self, page: PageId) -> Result<()>;

    /// The index metadata block, `None` if never written
    fn read_meta(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the index metadata block
    fn write_meta(&mut self, meta: &[u8]) -> Result<()>;

    /// Make all prior writes durable
    fn sync(&mut self) -> Result<()>;
}

/// File-backed page store.
///
/// # File Layout
///
/// ```text
/// [header: 4096 bytes][page 0][page 1]...[page N-1][growth slack]
/// ```
///
/// Freed pages are zeroed and chained through their first 8 bytes, starting
/// at `free_head` in the header.
#[derive(Debug)]
pub struct MmapPageStore {
    /// File handle (owns the file lock)
    file: File,

    /// Memory-mapped view of the file
    mmap: MmapMut,

    /// Decoded copy of the header page
    header: Header,
}

impl MmapPageStore {
    /// Create a page file with the given page size.
    ///
    /// An existing empty file (e.g. a fresh temp file) is initialized in place.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be opened or created
    /// - The file is already locked by another process
    /// - The file already holds a page file
    pub fn create<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let page_size = u32::try_from(page_size).context("Page size does not fit in u32")?;
        anyhow::ensure!(page_size >= 8, "Page size must hold a free-list link, got {page_size}");

        let file = open_locked(path, true)?;

        let len = file.metadata().map(|m| m.len()).unwrap_or(0);
        if len >= HEADER_SIZE as u64 {
            anyhow::bail!("{} already contains a page file", path.display());
        }

        let header = Header::new(page_size);
        file.set_len(HEADER_SIZE as u64)?;

        // SAFETY: the file is exclusively locked for the lifetime of the map
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        mmap[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        mmap.flush()?;

        tracing::debug!(path = %path.display(), page_size, "created page file");
        Ok(Self { file, mmap, header })
    }

    /// Open an existing page file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, locked, shorter than its
    /// header claims, or not a valid page file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = open_locked(path, false)?;

        // SAFETY: the file is exclusively locked for the lifetime of the map
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        let header = Header::from_bytes(&mmap[..])
            .map_err(|reason| anyhow::anyhow!("{reason}: {}", path.display()))?;

        let required = data_end(header.page_count, header.page_size as usize)?;
        if mmap.len() < required {
            anyhow::bail!(
                "Page file {} is truncated: {} pages need {} bytes, file has {}",
                path.display(),
                header.page_count,
                required,
                mmap.len()
            );
        }

        Ok(Self { file, mmap, header })
    }

    /// Whether `path` holds an initialized page file header
    #[must_use]
    pub fn is_initialized<P: AsRef<Path>>(path: P) -> bool {
        std::fs::metadata(path).map(|m| m.len() >= HEADER_SIZE as u64).unwrap_or(false)
    }

    /// Current mapped length in bytes
    #[must_use]
    pub fn mapped_len(&self) -> usize {
        self.mmap.len()
    }

    fn page_range(&self, page: PageId) -> Result<std::ops::Range<usize>> {
        if page >= self.header.page_count {
            anyhow::bail!("Page out of bounds: {} (count is {})", page, self.header.page_count);
        }

        let page_size = self.header.page_size as usize;
        let index = usize::try_from(page).context("Page id too large for this platform")?;
        let start = index
            .checked_mul(page_size)
            .and_then(|off| off.checked_add(HEADER_SIZE))
            .context("Page offset calculation overflow")?;
        let end = start.checked_add(page_size).context("Page end offset overflow")?;

        if end > self.mmap.len() {
            anyhow::bail!("Page {} extends beyond mmap bounds (end {}, mmap len {})", page, end, self.mmap.len());
        }

        Ok(start..end)
    }

    /// Grows the file (page-aligned) and remaps if necessary.
    ///
    /// Invalidates every slice previously handed out by `read`; the borrow
    /// checker enforces this through `&mut self`.
    fn ensure_capacity(&mut self, required_size: usize) -> Result<()> {
        if self.mmap.len() >= required_size {
            return Ok(());
        }

        let new_size = required_size.div_ceil(GROWTH_ALIGN) * GROWTH_ALIGN;
        self.file.set_len(new_size as u64)?;
        // SAFETY: the file is exclusively locked for the lifetime of the map
        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };

        Ok(())
    }

    /// Whether `page` is already threaded on the free list. The walk is
    /// bounded by the page count so a damaged list cannot loop forever.
    fn is_free(&self, page: PageId) -> Result<bool> {
        let mut cursor = self.header.free_head;
        for _ in 0..=self.header.page_count {
            if cursor == NO_PAGE {
                return Ok(false);
            }
            if cursor == page {
                return Ok(true);
            }
            let start = self.page_range(cursor)?.start;
            cursor = u64::from_le_bytes(
                self.mmap[start..start + 8].try_into().context("Free-list link truncated")?,
            );
        }
        anyhow::bail!("Corrupted free list: longer than {} pages", self.header.page_count)
    }

    fn store_header(&mut self) {
        self.mmap[..HEADER_SIZE].copy_from_slice(&self.header.to_bytes());
    }
}

impl PageStore for MmapPageStore {
    fn page_size(&self) -> usize {
        self.header.page_size as usize
    }

    fn page_count(&self) -> u64 {
        self.header.page_count
    }

    fn allocate(&mut self) -> Result<PageId> {
        if self.header.free_head != NO_PAGE {
            let page = self.header.free_head;
            let range = self.page_range(page)?;
            let next = u64::from_le_bytes(
                self.mmap[range.start..range.start + 8].try_into().context("Free-list link truncated")?,
            );
            if next != NO_PAGE && next >= self.header.page_count {
                anyhow::bail!("Corrupted free list: page {} links to {}", page, next);
            }

            self.mmap[range].fill(0);
            self.header.free_head = next;
            self.store_header();
            return Ok(page);
        }

        let page = self.header.page_count;
        let page_size = self.header.page_size as usize;
        self.ensure_capacity(data_end(page + 1, page_size)?)?;

        // Zero the page before publishing it in the header
        let range = HEADER_SIZE + page as usize * page_size..HEADER_SIZE + (page as usize + 1) * page_size;
        self.mmap[range].fill(0);

        self.header.page_count = page + 1;
        self.store_header();
        Ok(page)
    }

    fn read(&self, page: PageId) -> Result<&[u8]> {
        let range = self.page_range(page)?;
        Ok(&self.mmap[range])
    }

    fn write(&mut self, page: PageId, data: &[u8]) -> Result<()> {
        if data.len() != self.page_size() {
            anyhow::bail!("Page write of {} bytes, page size is {}", data.len(), self.page_size());
        }
        let range = self.page_range(page)?;
        self.mmap[range].copy_from_slice(data);
        Ok(())
    }

    fn free(&mut self, page: PageId) -> Result<()> {
        let range = self.page_range(page)?;
        if self.is_free(page)? {
            anyhow::bail!("Double free of page {}", page);
        }
        let start = range.start;
        self.mmap[range].fill(0);
        self.mmap[start..start + 8].copy_from_slice(&self.header.free_head.to_le_bytes());

        self.header.free_head = page;
        self.store_header();
        Ok(())
    }

    fn read_meta(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.header.meta.clone())
    }

    fn write_meta(&mut self, meta: &[u8]) -> Result<()> {
        if meta.len() > META_CAPACITY {
            anyhow::bail!("Metadata block of {} bytes exceeds {} byte capacity", meta.len(), META_CAPACITY);
        }
        self.header.meta = Some(meta.to_vec());
        self.store_header();
        Ok(())
    }

    /// Flushes the map and forces a physical write (1-50ms depending on device).
    fn sync(&mut self) -> Result<()> {
        self.mmap.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for MmapPageStore {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn open_locked(path: &Path, create: bool) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(create)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open page file: {}", path.display()))?;

    file.try_lock_exclusive().context("Page file is already open by another process")?;
    Ok(file)
}

fn data_end(page_count: u64, page_size: usize) -> Result<usize> {
    usize::try_from(page_count)
        .ok()
        .and_then(|n| n.checked_mul(page_size))
        .and_then(|bytes| bytes.checked_add(HEADER_SIZE))
        .context("Page file size calculation overflow")
}

/// Heap-backed page store.
#[derive(Debug, Clone)]
pub struct MemoryPageStore {
    page_size: usize,
    pages: Vec<Vec<u8>>,
    free: Vec<PageId>,
    meta: Option<Vec<u8>>,
}

impl MemoryPageStore {
    /// Create an empty store
    #[must_use]
    pub const fn new(page_size: usize) -> Self {
        Self { page_size, pages: Vec::new(), free: Vec::new(), meta: None }
    }

    /// Pages currently on the free list
    #[must_use]
    pub fn free_pages(&self) -> usize {
        self.free.len()
    }

    fn page_index(&self, page: PageId) -> Result<usize> {
        let index = usize::try_from(page).context("Page id too large for this platform")?;
        if index >= self.pages.len() {
            anyhow::bail!("Page out of bounds: {} (count is {})", page, self.pages.len());
        }
        Ok(index)
    }
}

impl PageStore for MemoryPageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> u64 {
        self.pages.len() as u64
    }

    fn allocate(&mut self) -> Result<PageId> {
        if let Some(page) = self.free.pop() {
            return Ok(page);
        }
        self.pages.push(vec![0; self.page_size]);
        Ok(self.pages.len() as u64 - 1)
    }

    fn read(&self, page: PageId) -> Result<&[u8]> {
        let index = self.page_index(page)?;
        Ok(&self.pages[index])
    }

    fn write(&mut self, page: PageId, data: &[u8]) -> Result<()> {
        if data.len() != self.page_size {
            anyhow::bail!("Page write of {} bytes, page size is {}", data.len(), self.page_size);
        }
        let index = self.page_index(page)?;
        self.pages[index].copy_from_slice(data);
        Ok(())
    }

    fn free(&mut self, page: PageId) -> Result<()> {
        let index = self.page_index(page)?;
        if self.free.contains(&page) {
            anyhow::bail!("Double free of page {}", page);
        }
        self.pages[index].fill(0);
        self.free.push(page);
        Ok(())
    }

    fn read_meta(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.meta.clone())
    }

    fn write_meta(&mut self, meta: &[u8]) -> Result<()> {
        if meta.len() > META_CAPACITY {
            anyhow::bail!("Metadata block of {} bytes exceeds {} byte capacity", meta.len(), META_CAPACITY);
        }
        self.meta = Some(meta.to_vec());
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}
