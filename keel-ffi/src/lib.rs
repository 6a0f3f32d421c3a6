//! C bindings for the Keel vector index
//!
//! Exposes open/insert/delete/top-k over a file-backed [`VectorIndex`] plus a
//! standalone distance function. All entry points are panic-safe and report
//! failures through a thread-local error message.
//!
//! # Safety Guarantees
//!
//! - No panic may cross the FFI boundary (enforced by `ffi_guard`)
//! - Strict UTF-8 validation for all string inputs
//! - Null pointer checks on all pointer arguments
//!
//! # Error Handling
//!
//! Errors are reported through:
//! - Return values: `NULL` for open, `-1` for insert/delete/flush, `0` for
//!   top-k, `NaN` for distance
//! - Thread-local error message: `keel_last_error_message()`
//!
//! # Thread Safety
//!
//! - Single-writer: `keel_insert`, `keel_delete`, `keel_flush` require
//!   exclusive access to the handle
//! - Multi-reader: `keel_top_k` allows concurrent readers
//! - Each thread has its own error message storage

use keel_core::{DistanceMetric, IndexOptions, VectorIndex, distance};
use libc::{c_char, c_float, c_int, size_t};
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::ptr;
use std::slice;

/// Rust-side state behind the opaque handle
struct KeelIndexState {
    inner: VectorIndex,
}

/// Opaque handle to a Keel index
///
/// C code only ever sees pointers to this type.
#[repr(C)]
pub struct KeelIndex {
    _private: [u8; 0],
}

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Record an error for the current thread. Interior NULs are escaped so
/// reporting itself cannot fail.
fn set_last_error(err: impl std::fmt::Display) {
    LAST_ERROR.with(|cell| {
        let safe_msg = err.to_string().replace('\0', "\\0");
        *cell.borrow_mut() = Some(CString::new(safe_msg).unwrap_or_default());
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = None;
    });
}

/// Run `f`, turning a panic into a recorded error and `None`.
///
/// `AssertUnwindSafe` is sound here: a panicking call is abandoned, never
/// resumed, and its message goes to thread-local storage.
fn ffi_guard<F, R>(f: F) -> Option<R>
where
    F: FnOnce() -> R,
{
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => Some(result),
        Err(e) => {
            let msg = if let Some(s) = e.downcast_ref::<&str>() {
                format!("Panic: {s}")
            } else if let Some(s) = e.downcast_ref::<String>() {
                format!("Panic: {s}")
            } else {
                "Unknown panic".to_string()
            };
            set_last_error(msg);
            None
        }
    }
}

/// Borrow a NUL-terminated UTF-8 argument. Records an error on failure.
///
/// # Safety
///
/// `raw` must be NULL or a valid NUL-terminated string.
unsafe fn utf8_arg<'a>(raw: *const c_char, what: &str) -> Option<&'a str> {
    if raw.is_null() {
        set_last_error(format!("{what} cannot be NULL"));
        return None;
    }
    // SAFETY: caller guarantees raw is a valid C string
    let c_str = unsafe { CStr::from_ptr(raw) };
    match c_str.to_str() {
        Ok(s) => Some(s),
        Err(_) => {
            set_last_error(format!("{what} must be valid UTF-8"));
            None
        }
    }
}

/// # Safety
///
/// `ptr` must be NULL or a live handle from `keel_open`.
unsafe fn index_ref<'a>(ptr: *const KeelIndex) -> Option<&'a VectorIndex> {
    // SAFETY: caller guarantees ptr is NULL or valid
    let state = unsafe { ptr.cast::<KeelIndexState>().as_ref() };
    if state.is_none() {
        set_last_error("Null index pointer");
    }
    state.map(|s| &s.inner)
}

/// # Safety
///
/// `ptr` must be NULL or a live handle from `keel_open` with no other users.
unsafe fn index_mut<'a>(ptr: *mut KeelIndex) -> Option<&'a mut VectorIndex> {
    // SAFETY: caller guarantees ptr is NULL or valid and exclusively held
    let state = unsafe { ptr.cast::<KeelIndexState>().as_mut() };
    if state.is_none() {
        set_last_error("Null index pointer");
    }
    state.map(|s| &mut s.inner)
}

/// # Safety
///
/// `data` must be NULL or point to `len` readable floats.
unsafe fn vector_arg<'a>(data: *const c_float, len: size_t, what: &str) -> Option<&'a [f32]> {
    if data.is_null() {
        set_last_error(format!("Null {what} pointer"));
        return None;
    }
    if len == 0 {
        set_last_error(format!("{what} length must be > 0"));
        return None;
    }
    // SAFETY: caller guarantees data points to len valid f32 values
    Some(unsafe { slice::from_raw_parts(data, len) })
}

//
// === LIFECYCLE MANAGEMENT ===
//

/// Open an index file, creating it when it does not exist yet
///
/// # Arguments
///
/// - `path`: UTF-8 path to the index file (must not be NULL)
/// - `dimensions`: vector dimensionality (must be > 0)
/// - `options`: option string such as `"metric=l2,compress_neighbors=float8"`,
///   or NULL for defaults. Ignored when reopening an existing file, which
///   keeps the configuration it was created with.
///
/// # Returns
///
/// - Non-NULL handle on success
/// - NULL on failure (check `keel_last_error_message()`)
///
/// # Example (C)
///
/// ```c
/// KeelIndex* index = keel_open("docs.keel", 768, "compress_neighbors=float8");
/// if (index == NULL) {
///     fprintf(stderr, "Error: %s\n", keel_last_error_message());
///     exit(1);
/// }
/// ```
///
/// # Safety
///
/// - `path` must be a valid NUL-terminated string
/// - `options` must be NULL or a valid NUL-terminated string
/// - The returned handle must be released with `keel_free()`
#[unsafe(no_mangle)]
pub unsafe extern "C" fn keel_open(
    path: *const c_char,
    dimensions: u32,
    options: *const c_char,
) -> *mut KeelIndex {
    ffi_guard(|| {
        if dimensions == 0 {
            set_last_error("Dimensions must be > 0");
            return ptr::null_mut();
        }

        // SAFETY: caller guarantees path is a valid C string
        let Some(path_str) = (unsafe { utf8_arg(path, "Path") }) else {
            return ptr::null_mut();
        };

        let parsed = if options.is_null() {
            Ok(IndexOptions::default())
        } else {
            // SAFETY: caller guarantees options is a valid C string
            let Some(text) = (unsafe { utf8_arg(options, "Options") }) else {
                return ptr::null_mut();
            };
            IndexOptions::parse(text)
        };

        let opened = parsed.and_then(|opts| VectorIndex::open(path_str, dimensions as usize, opts));
        match opened {
            Ok(index) => {
                clear_last_error();
                Box::into_raw(Box::new(KeelIndexState { inner: index })).cast::<KeelIndex>()
            }
            Err(e) => {
                set_last_error(e);
                ptr::null_mut()
            }
        }
    })
    .unwrap_or(ptr::null_mut())
}

/// Release an index handle. NULL is a no-op.
///
/// Dropping the handle does not flush; call `keel_flush()` first when the
/// latest writes must be durable.
///
/// # Safety
///
/// - `ptr` must be NULL or a handle from `keel_open()` not yet freed
/// - `ptr` must not be used after this call
#[unsafe(no_mangle)]
pub unsafe extern "C" fn keel_free(ptr: *mut KeelIndex) {
    if !ptr.is_null() {
        ffi_guard(|| {
            // SAFETY: caller guarantees ptr came from keel_open
            drop(unsafe { Box::from_raw(ptr.cast::<KeelIndexState>()) });
        });
    }
}

//
// === MUTATION ===
//

/// Index a vector under the host's row id
///
/// # Returns
///
/// - 0 on success
/// - -1 on failure (duplicate or reserved row id, wrong length, storage
///   error); the index is unchanged on precondition failures
///
/// # Example (C)
///
/// ```c
/// if (keel_insert(index, rowid, embedding, 768) != 0) {
///     fprintf(stderr, "Insert failed: %s\n", keel_last_error_message());
/// }
/// ```
///
/// # Safety
///
/// - `ptr` must be a valid handle with no concurrent users
/// - `vector` must point to `len` valid floats
#[unsafe(no_mangle)]
pub unsafe extern "C" fn keel_insert(
    ptr: *mut KeelIndex,
    row_id: u64,
    vector: *const c_float,
    len: size_t,
) -> c_int {
    ffi_guard(|| {
        // SAFETY: caller guarantees exclusive access to a valid handle
        let Some(index) = (unsafe { index_mut(ptr) }) else {
            return -1;
        };
        // SAFETY: caller guarantees vector points to len floats
        let Some(values) = (unsafe { vector_arg(vector, len, "Vector") }) else {
            return -1;
        };

        match index.insert(row_id, values) {
            Ok(()) => {
                clear_last_error();
                0
            }
            Err(e) => {
                set_last_error(e);
                -1
            }
        }
    })
    .unwrap_or(-1)
}

/// Remove a row and repair the neighborhoods that pointed at it
///
/// # Returns
///
/// - 0 on success
/// - -1 on failure, including a row id that is not indexed
///
/// # Safety
///
/// - `ptr` must be a valid handle with no concurrent users
#[unsafe(no_mangle)]
pub unsafe extern "C" fn keel_delete(ptr: *mut KeelIndex, row_id: u64) -> c_int {
    ffi_guard(|| {
        // SAFETY: caller guarantees exclusive access to a valid handle
        let Some(index) = (unsafe { index_mut(ptr) }) else {
            return -1;
        };

        match index.delete(row_id) {
            Ok(()) => {
                clear_last_error();
                0
            }
            Err(e) => {
                set_last_error(e);
                -1
            }
        }
    })
    .unwrap_or(-1)
}

/// Write all pending changes to disk
///
/// # Returns
///
/// - 0 on success
/// - -1 on failure (check `keel_last_error_message()`)
///
/// # Safety
///
/// - `ptr` must be a valid handle with no concurrent users
#[unsafe(no_mangle)]
pub unsafe extern "C" fn keel_flush(ptr: *mut KeelIndex) -> c_int {
    ffi_guard(|| {
        // SAFETY: caller guarantees exclusive access to a valid handle
        let Some(index) = (unsafe { index_mut(ptr) }) else {
            return -1;
        };

        match index.flush() {
            Ok(()) => {
                clear_last_error();
                0
            }
            Err(e) => {
                set_last_error(e);
                -1
            }
        }
    })
    .unwrap_or(-1)
}

//
// === QUERIES ===
//

/// Find the `k` rows closest to `query`
///
/// Row ids are written to `out_ids` nearest first. When `out_skipped` is
/// not NULL it receives the number of corrupt node records the search
/// bypassed.
///
/// # Returns
///
/// - The number of ids written (≤ k). Fewer than `k` with `*out_skipped == 0`
///   means the index holds fewer reachable rows; a non-zero skip count means
///   damaged records may have cut the result short.
/// - 0 on failure (check `keel_last_error_message()`), including an empty
///   index
///
/// # Example (C)
///
/// ```c
/// uint64_t ids[10];
/// size_t skipped;
/// size_t n = keel_top_k(index, query, 768, 10, ids, &skipped);
/// for (size_t i = 0; i < n; i++) {
///     printf("row %llu\n", ids[i]);
/// }
/// if (n < 10 && skipped > 0) {
///     fprintf(stderr, "%zu corrupt records skipped\n", skipped);
/// }
/// ```
///
/// # Safety
///
/// - `ptr` must be a valid handle; concurrent `keel_top_k` calls are fine,
///   concurrent writers are not
/// - `query` must point to `len` valid floats
/// - `out_ids` must have room for `min(k, keel_len(ptr))` values
/// - `out_skipped` must be NULL or point to one writable `size_t`
#[unsafe(no_mangle)]
pub unsafe extern "C" fn keel_top_k(
    ptr: *const KeelIndex,
    query: *const c_float,
    len: size_t,
    k: size_t,
    out_ids: *mut u64,
    out_skipped: *mut size_t,
) -> size_t {
    ffi_guard(|| {
        // SAFETY: caller guarantees ptr is valid for shared access
        let Some(index) = (unsafe { index_ref(ptr) }) else {
            return 0;
        };
        // SAFETY: caller guarantees query points to len floats
        let Some(values) = (unsafe { vector_arg(query, len, "Query") }) else {
            return 0;
        };
        if out_ids.is_null() {
            set_last_error("Null output buffer");
            return 0;
        }

        match index.search(values, k) {
            Ok(top) => {
                let count = top.row_ids.len().min(k);
                // SAFETY: count <= min(k, len) and the caller sized out_ids for that
                let out = unsafe { slice::from_raw_parts_mut(out_ids, count) };
                out.copy_from_slice(&top.row_ids[..count]);
                if !out_skipped.is_null() {
                    // SAFETY: caller guarantees out_skipped is NULL or writable
                    unsafe { *out_skipped = top.skipped_records };
                }
                clear_last_error();
                count
            }
            Err(e) => {
                set_last_error(e);
                0
            }
        }
    })
    .unwrap_or(0)
}

/// Distance between two vectors without an index
///
/// `metric` is 0 for cosine, 1 for L2 and 2 for negated dot product.
///
/// # Returns
///
/// The distance, or NaN on failure (check `keel_last_error_message()`).
///
/// # Safety
///
/// - `a` and `b` must each point to `len` valid floats
#[unsafe(no_mangle)]
pub unsafe extern "C" fn keel_distance(
    a: *const c_float,
    b: *const c_float,
    len: size_t,
    metric: c_int,
) -> c_float {
    ffi_guard(|| {
        let Some(metric) = u8::try_from(metric).ok().and_then(DistanceMetric::from_tag) else {
            set_last_error(format!("Unknown metric {metric}"));
            return f32::NAN;
        };
        // SAFETY: caller guarantees both pointers cover len floats
        let (Some(lhs), Some(rhs)) = (unsafe { vector_arg(a, len, "Vector") }, unsafe { vector_arg(b, len, "Vector") })
        else {
            return f32::NAN;
        };

        match distance(lhs, rhs, metric) {
            Ok(d) => {
                clear_last_error();
                d
            }
            Err(e) => {
                set_last_error(e);
                f32::NAN
            }
        }
    })
    .unwrap_or(f32::NAN)
}

//
// === INTROSPECTION ===
//

/// Number of live rows, or 0 if `ptr` is NULL
///
/// # Safety
///
/// - `ptr` must be NULL or a valid handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn keel_len(ptr: *const KeelIndex) -> u64 {
    ffi_guard(|| {
        // SAFETY: caller guarantees ptr is NULL or valid
        unsafe { index_ref(ptr) }.map_or(0, |index| index.len() as u64)
    })
    .unwrap_or(0)
}

/// Vector dimensionality, or 0 if `ptr` is NULL
///
/// # Safety
///
/// - `ptr` must be NULL or a valid handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn keel_dimensions(ptr: *const KeelIndex) -> u32 {
    ffi_guard(|| {
        // SAFETY: caller guarantees ptr is NULL or valid
        unsafe { index_ref(ptr) }.map_or(0, |index| u32::try_from(index.dimensions()).unwrap_or(u32::MAX))
    })
    .unwrap_or(0)
}

//
// === ERROR HANDLING ===
//

/// Last error message for the current thread, or NULL
///
/// The pointer stays valid until the next Keel call on this thread.
/// **Do NOT** free it.
#[unsafe(no_mangle)]
pub extern "C" fn keel_last_error_message() -> *const c_char {
    LAST_ERROR.with(|cell| cell.borrow().as_ref().map_or(ptr::null(), |s| s.as_ptr()))
}

/// Library version as a static NUL-terminated string. **Do NOT** free it.
#[unsafe(no_mangle)]
pub extern "C" fn keel_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr().cast::<c_char>()
}

//
// === TESTS ===
//
