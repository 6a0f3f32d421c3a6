//! Robust (α) pruning with a lazy pairwise distance cache.
//!
//! # Rule
//!
//! Candidates are visited nearest-first. A candidate `c` is rejected when
//! some already accepted `s` satisfies `α · d(s, c) < d(base, c)`, i.e. `c`
//! is better reached through `s`. Selection stops at `max_count`.
//!
//! # Starvation fallback
//!
//! If fewer than `max_count / 2` candidates survive, the nearest rejected
//! ones are added back until that floor is met, so dense clusters do not
//! leave a node with a single outgoing edge.

use super::RowId;

/// Sentinel value indicating "distance not yet computed"
const NOT_COMPUTED: f32 = f32::NAN;

/// Lazily filled symmetric distance matrix over candidate indices.
pub(crate) struct DistanceCache {
    /// Flat array representing symmetric matrix [i*size + j]
    data: Vec<f32>,
    size: usize,
}

impl DistanceCache {
    /// Create an empty cache for `size` candidates
    pub(crate) fn new(size: usize) -> Self {
        Self { data: vec![NOT_COMPUTED; size * size], size }
    }

    /// Cached distance, computing and storing it symmetrically on a miss
    #[inline]
    pub(crate) fn get_or_insert_with<F: FnOnce() -> f32>(&mut self, i: usize, j: usize, compute: F) -> f32 {
        debug_assert!(i < self.size && j < self.size, "Cache index out of bounds");
        let cached = self.data[i * self.size + j];
        if !cached.is_nan() {
            return cached;
        }
        let distance = compute();
        self.data[i * self.size + j] = distance;
        self.data[j * self.size + i] = distance;
        distance
    }
}

/// Select a diverse subset of `candidates`.
///
/// `candidates` holds `(row_id, distance to base)`; `pair(i, j)` returns the
/// distance between candidates `i` and `j`. Duplicate row ids keep their
/// first occurrence. Returns indices into `candidates`, nearest first.
pub(crate) fn robust_prune<F>(candidates: &[(RowId, f32)], max_count: usize, alpha: f32, mut pair: F) -> Vec<usize>
where
    F: FnMut(usize, usize) -> f32,
{
    if candidates.is_empty() || max_count == 0 {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        candidates[a].1.total_cmp(&candidates[b].1).then(candidates[a].0.cmp(&candidates[b].0))
    });
    let mut seen_ids: Vec<RowId> = Vec::with_capacity(order.len());
    order.retain(|&i| {
        let id = candidates[i].0;
        if seen_ids.contains(&id) {
            false
        } else {
            seen_ids.push(id);
            true
        }
    });

    let mut cache = DistanceCache::new(candidates.len());
    let mut selected: Vec<usize> = Vec::with_capacity(max_count);

    for &c in &order {
        if selected.len() >= max_count {
            break;
        }
        let to_base = candidates[c].1;
        let dominated = selected
            .iter()
            .any(|&s| alpha * cache.get_or_insert_with(s, c, || pair(s, c)) < to_base);
        if !dominated {
            selected.push(c);
        }
    }

    // STARVATION FALLBACK
    let floor = (max_count / 2).min(order.len());
    if selected.len() < floor {
        for &c in &order {
            if selected.len() >= floor {
                break;
            }
            if !selected.contains(&c) {
                selected.push(c);
            }
        }
        let rank = |i: &usize| order.iter().position(|o| o == i).unwrap_or(usize::MAX);
        selected.sort_by_key(rank);
    }

    selected
}
