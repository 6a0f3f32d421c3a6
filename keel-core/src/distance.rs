//! Distance metrics over full-precision vectors.
//!
//! These kernels are the authoritative distances: they rank visited nodes
//! during search, drive robust pruning, and back the standalone
//! [`distance`] utility. Compressed neighbor copies are compared through
//! [`crate::codec::VectorCodec`] instead.
//!
//! Every metric is expressed as a distance (smaller is closer):
//! - `Cosine`: `1 - cos(a, b)`, 1.0 when either vector has zero norm
//! - `L2`: Euclidean distance
//! - `Dot`: negated inner product

use crate::error::{IndexError, Result};
use std::fmt;
use std::str::FromStr;

/// Distance metric for vector comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DistanceMetric {
    /// Cosine distance (1 - cosine similarity)
    #[default]
    Cosine,
    /// Euclidean distance
    L2,
    /// Negated dot product
    Dot,
}

impl DistanceMetric {
    /// Stable on-disk tag
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Cosine => 0,
            Self::L2 => 1,
            Self::Dot => 2,
        }
    }

    /// Inverse of [`DistanceMetric::tag`]
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Cosine),
            1 => Some(Self::L2),
            2 => Some(Self::Dot),
            _ => None,
        }
    }

    /// Name as accepted by the options string
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::L2 => "l2",
            Self::Dot => "dot",
        }
    }

    /// Distance between two equal-length vectors.
    #[inline]
    #[must_use]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Self::Cosine => cosine_distance(a, b),
            Self::L2 => euclidean_distance(a, b),
            Self::Dot => -dot_product(a, b),
        }
    }

    /// Turns accumulated sums into this metric's distance.
    ///
    /// Used by kernels that run over encoded bytes and cannot call
    /// [`DistanceMetric::distance`] directly.
    #[inline]
    #[must_use]
    pub fn finish(self, sums: Sums) -> f32 {
        match self {
            Self::Cosine => {
                if sums.norm_a <= 0.0 || sums.norm_b <= 0.0 {
                    1.0
                } else {
                    1.0 - sums.dot / (sums.norm_a.sqrt() * sums.norm_b.sqrt())
                }
            }
            Self::L2 => sums.l2.max(0.0).sqrt(),
            Self::Dot => -sums.dot,
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DistanceMetric {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" | "cos" => Ok(Self::Cosine),
            "l2" | "euclidean" => Ok(Self::L2),
            "dot" | "ip" | "inner_product" => Ok(Self::Dot),
            other => Err(IndexError::InvalidOptions(format!("unknown metric '{other}'"))),
        }
    }
}

/// Running sums shared by all metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sums {
    /// Σ a·b
    pub dot: f32,
    /// Σ a²
    pub norm_a: f32,
    /// Σ b²
    pub norm_b: f32,
    /// Σ (a-b)²
    pub l2: f32,
}

impl Sums {
    /// Folds one element pair into the sums
    #[inline]
    pub fn add(&mut self, a: f32, b: f32) {
        self.dot += a * b;
        self.norm_a += a * a;
        self.norm_b += b * b;
        let diff = a - b;
        self.l2 += diff * diff;
    }
}

/// Distance between two full-precision vectors.
///
/// This is the host-facing utility (the `vector_distance_*` family): it never
/// looks at compressed data.
///
/// # Errors
///
/// Returns [`IndexError::DimensionMismatch`] if the vectors differ in length.
pub fn distance(a: &[f32], b: &[f32], metric: DistanceMetric) -> Result<f32> {
    if a.len() != b.len() {
        return Err(IndexError::DimensionMismatch { expected: a.len(), actual: b.len() });
    }
    Ok(metric.distance(a, b))
}

/// Compute L2 (Euclidean) distance between two vectors with SIMD acceleration.
///
/// # Architecture Dispatch
///
/// - x86_64 + AVX2: Uses AVX2 intrinsics (runtime detection)
/// - Fallback: Portable scalar implementation
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return unsafe { euclidean_distance_avx2(a, b) };
        }
    }

    euclidean_distance_scalar(a, b)
}

/// Scalar implementation (portable fallback)
#[inline]
pub fn euclidean_distance_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum::<f32>()
        .sqrt()
}

/// AVX2 implementation with 4-way accumulator unrolling (x86_64 only)
///
/// Main loop handles 32 floats per iteration so four FMA chains stay in
/// flight; an 8-wide tail loop and a scalar tail finish the rest.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn euclidean_distance_avx2(a: &[f32], b: &[f32]) -> f32 {
    use std::arch::x86_64::*;

    let len = a.len().min(b.len());
    let mut i = 0;

    let mut sum0 = _mm256_setzero_ps();
    let mut sum1 = _mm256_setzero_ps();
    let mut sum2 = _mm256_setzero_ps();
    let mut sum3 = _mm256_setzero_ps();

    while i + 32 <= len {
        // SAFETY: i + 32 <= len bounds every load below
        let (d0, d1, d2, d3) = unsafe {
            (
                _mm256_sub_ps(_mm256_loadu_ps(a.as_ptr().add(i)), _mm256_loadu_ps(b.as_ptr().add(i))),
                _mm256_sub_ps(
                    _mm256_loadu_ps(a.as_ptr().add(i + 8)),
                    _mm256_loadu_ps(b.as_ptr().add(i + 8)),
                ),
                _mm256_sub_ps(
                    _mm256_loadu_ps(a.as_ptr().add(i + 16)),
                    _mm256_loadu_ps(b.as_ptr().add(i + 16)),
                ),
                _mm256_sub_ps(
                    _mm256_loadu_ps(a.as_ptr().add(i + 24)),
                    _mm256_loadu_ps(b.as_ptr().add(i + 24)),
                ),
            )
        };

        sum0 = _mm256_fmadd_ps(d0, d0, sum0);
        sum1 = _mm256_fmadd_ps(d1, d1, sum1);
        sum2 = _mm256_fmadd_ps(d2, d2, sum2);
        sum3 = _mm256_fmadd_ps(d3, d3, sum3);

        i += 32;
    }

    while i + 8 <= len {
        // SAFETY: i + 8 <= len
        let diff = unsafe {
            _mm256_sub_ps(_mm256_loadu_ps(a.as_ptr().add(i)), _mm256_loadu_ps(b.as_ptr().add(i)))
        };
        sum0 = _mm256_fmadd_ps(diff, diff, sum0);
        i += 8;
    }

    let combined = _mm256_add_ps(_mm256_add_ps(sum0, sum1), _mm256_add_ps(sum2, sum3));

    let high = _mm256_extractf128_ps(combined, 1);
    let low = _mm256_castps256_ps128(combined);
    let sum128 = _mm_add_ps(low, high);
    let sum64 = _mm_add_ps(sum128, _mm_movehl_ps(sum128, sum128));
    let sum32 = _mm_add_ss(sum64, _mm_shuffle_ps(sum64, sum64, 0x55));

    let mut total = _mm_cvtss_f32(sum32);

    for (x, y) in a[i..len].iter().zip(&b[i..len]) {
        let diff = x - y;
        total += diff * diff;
    }

    total.sqrt()
}

/// Inner product with four independent accumulators.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let mut acc = [0.0_f32; 4];
    let chunks_a = a.chunks_exact(4);
    let chunks_b = b.chunks_exact(4);
    let tail: f32 = chunks_a
        .remainder()
        .iter()
        .zip(chunks_b.remainder())
        .map(|(x, y)| x * y)
        .sum();

    for (ca, cb) in chunks_a.zip(chunks_b) {
        for lane in 0..4 {
            acc[lane] += ca[lane] * cb[lane];
        }
    }

    acc[0] + acc[1] + acc[2] + acc[3] + tail
}

/// Compute cosine distance (1 - cosine_similarity).
///
/// Zero-norm inputs have no direction; they are treated as maximally
/// dissimilar to everything (distance 1.0) instead of producing NaN.
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let dot = dot_product(a, b);
    let norm_a = dot_product(a, a).sqrt();
    let norm_b = dot_product(b, b).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    1.0 - (dot / (norm_a * norm_b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_basic() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![4.0, 5.0, 6.0];

        let dist = euclidean_distance(&a, &b);
        let expected = ((3.0_f32).powi(2) * 3.0).sqrt();

        assert!((dist - expected).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];

        let dist = cosine_distance(&a, &b);
        assert!((dist - 1.0).abs() < 1e-6); // Orthogonal vectors

        assert!(cosine_distance(&a, &a).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector_is_not_nan() {
        let zero = vec![0.0; 4];
        let one = vec![1.0; 4];
        assert_eq!(cosine_distance(&zero, &one), 1.0);
    }

    #[test]
    fn test_dot_metric_prefers_larger_inner_product() {
        let q = vec![1.0, 1.0];
        let near = vec![2.0, 2.0];
        let far = vec![0.5, 0.5];
        assert!(DistanceMetric::Dot.distance(&q, &near) < DistanceMetric::Dot.distance(&q, &far));
    }

    #[test]
    fn test_simd_matches_scalar() {
        for size in [3, 7, 31, 128, 384, 1536] {
            let a: Vec<f32> = (0..size).map(|i| (i as f32).sin()).collect();
            let b: Vec<f32> = (0..size).map(|i| (i as f32).cos()).collect();

            let simd_result = euclidean_distance(&a, &b);
            let scalar_result = euclidean_distance_scalar(&a, &b);

            assert!(
                (simd_result - scalar_result).abs() < 1e-3,
                "SIMD mismatch at size {}: simd={}, scalar={}",
                size,
                simd_result,
                scalar_result
            );
        }
    }

    #[test]
    fn test_dot_product_tail() {
        let a: Vec<f32> = (0..11).map(|i| i as f32).collect();
        let expected: f32 = a.iter().map(|x| x * x).sum();
        assert!((dot_product(&a, &a) - expected).abs() < 1e-3);
    }

    #[test]
    fn test_finish_matches_direct_distance() {
        let a = vec![0.3, -1.2, 2.0, 0.0, 5.5];
        let b = vec![1.0, 0.4, -0.7, 2.2, 5.0];
        let mut sums = Sums::default();
        for (x, y) in a.iter().zip(&b) {
            sums.add(*x, *y);
        }

        for metric in [DistanceMetric::Cosine, DistanceMetric::L2, DistanceMetric::Dot] {
            let direct = metric.distance(&a, &b);
            let folded = metric.finish(sums);
            assert!((direct - folded).abs() < 1e-4, "{metric}: {direct} vs {folded}");
        }
    }

    #[test]
    fn test_distance_utility_rejects_mismatch() {
        let err = distance(&[1.0, 2.0], &[1.0], DistanceMetric::L2).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn test_metric_parse_and_tags() {
        for metric in [DistanceMetric::Cosine, DistanceMetric::L2, DistanceMetric::Dot] {
            assert_eq!(metric.name().parse::<DistanceMetric>().unwrap(), metric);
            assert_eq!(DistanceMetric::from_tag(metric.tag()), Some(metric));
        }
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }
}
