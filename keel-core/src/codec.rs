//! Vector codec: fixed-length byte encodings of `D`-dimensional vectors.
//!
//! # Encodings
//!
//! ```text
//! Mode        Bytes      Layout
//! ----------  ---------  -------------------------------------------------
//! Float32     4·D        D × f32 LE
//! Float16     2·D        D × IEEE binary16 LE
//! Float8      D + 8      D × u8 code | offset f32 LE | step f32 LE
//! Int8        D + 4      D × i8 code | step f32 LE
//! Float1Bit   ⌈D/8⌉      sign bits, element i at byte i/8, bit i%8
//! ```
//!
//! The 8-bit modes carry their scale in the vector itself (per-vector
//! policy). `Float8` is an affine code over `[min, max]` of the vector;
//! `Int8` is symmetric around zero with `step = max|v| / 127`.
//!
//! # Distances on encoded bytes
//!
//! `Float32`, `Float16` and `Int8` are compared element-wise without
//! building a decoded vector (`Int8` accumulates in integers). `Float8`
//! dequantizes element by element. `Float1Bit` uses Hamming distance
//! mapped through `cos(π·h/D)`, which assumes the caller's embeddings are
//! sign-thresholdable (the codec checks only the dimension).

use crate::distance::{DistanceMetric, Sums};
use crate::error::{IndexError, Result};
use half::f16;
use std::fmt;
use std::str::FromStr;

/// On-disk numeric encoding for a vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionMode {
    /// 32-bit floats, lossless
    #[default]
    Float32,
    /// 16-bit IEEE floats
    Float16,
    /// 8-bit affine quantization with per-vector offset and step
    Float8,
    /// 8-bit symmetric integer quantization with per-vector step
    Int8,
    /// One sign bit per element
    Float1Bit,
}

impl CompressionMode {
    /// All modes, in tag order
    pub const ALL: [Self; 5] = [Self::Float32, Self::Float16, Self::Float8, Self::Int8, Self::Float1Bit];

    /// Stable on-disk tag
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Float32 => 0,
            Self::Float16 => 1,
            Self::Float8 => 2,
            Self::Int8 => 3,
            Self::Float1Bit => 4,
        }
    }

    /// Inverse of [`CompressionMode::tag`]
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Float32),
            1 => Some(Self::Float16),
            2 => Some(Self::Float8),
            3 => Some(Self::Int8),
            4 => Some(Self::Float1Bit),
            _ => None,
        }
    }

    /// Name as accepted by `compress_neighbors=`
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Float32 => "float32",
            Self::Float16 => "float16",
            Self::Float8 => "float8",
            Self::Int8 => "int8",
            Self::Float1Bit => "float1bit",
        }
    }

    /// Encoded byte length for a vector of `dims` elements.
    #[must_use]
    pub const fn encoded_len(self, dims: usize) -> usize {
        match self {
            Self::Float32 => dims * 4,
            Self::Float16 => dims * 2,
            Self::Float8 => dims + 8,
            Self::Int8 => dims + 4,
            Self::Float1Bit => dims.div_ceil(8),
        }
    }

    /// Whether decode(encode(v)) == v for finite inputs
    #[must_use]
    pub const fn is_lossless(self) -> bool {
        matches!(self, Self::Float32)
    }

    /// Whether [`VectorCodec::distance`] runs on the raw codes rather than
    /// dequantized values
    #[must_use]
    pub const fn computes_directly(self) -> bool {
        !matches!(self, Self::Float8)
    }

    /// Largest per-element round-trip error this mode can introduce for
    /// `vector`.
    ///
    /// `Float1Bit` decodes to ±1, so its bound is how far any element sits
    /// from unit magnitude.
    #[must_use]
    pub fn max_error(self, vector: &[f32]) -> f32 {
        let abs_max = vector.iter().fold(0.0_f32, |m, v| m.max(v.abs()));
        let slack = abs_max * f32::EPSILON * 4.0;
        match self {
            Self::Float32 => 0.0,
            // binary16 keeps 11 significant bits; 6e-8 covers subnormals
            Self::Float16 => abs_max / 2048.0 + 6.0e-8,
            // the subnormal floor covers steps that lose precision or underflow
            Self::Float8 => {
                let (min, max) = min_max(vector);
                (max - min) / 255.0 * 0.5 + slack + f32::from_bits(1) * 256.0
            }
            Self::Int8 => abs_max / 127.0 * 0.5 + slack + f32::from_bits(1) * 128.0,
            Self::Float1Bit => vector.iter().fold(0.0_f32, |m, v| m.max((v.abs() - 1.0).abs())),
        }
    }
}

impl fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionMode {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "float32" | "f32" | "full" => Ok(Self::Float32),
            "float16" | "f16" | "half" => Ok(Self::Float16),
            "float8" | "f8" => Ok(Self::Float8),
            "int8" | "i8" => Ok(Self::Int8),
            "float1bit" | "1bit" | "bit" => Ok(Self::Float1Bit),
            other => Err(IndexError::InvalidOptions(format!("unknown compression '{other}'"))),
        }
    }
}

/// Encoder/decoder bound to one mode and dimension.
///
/// Built once when an index is opened; every hot-path call dispatches on
/// the mode held here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorCodec {
    mode: CompressionMode,
    dims: usize,
}

impl VectorCodec {
    /// Create a codec for `dims`-element vectors
    #[must_use]
    pub const fn new(mode: CompressionMode, dims: usize) -> Self {
        Self { mode, dims }
    }

    /// Compression mode
    #[must_use]
    pub const fn mode(&self) -> CompressionMode {
        self.mode
    }

    /// Vector dimension
    #[must_use]
    pub const fn dims(&self) -> usize {
        self.dims
    }

    /// Bytes per encoded vector
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        self.mode.encoded_len(self.dims)
    }

    /// Encode a vector into a fresh buffer.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DimensionMismatch`] if `vector.len() != dims`.
    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.encoded_len()];
        self.encode_into(vector, &mut out)?;
        Ok(out)
    }

    /// Encode a vector into `out`, which must be exactly `encoded_len()` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DimensionMismatch`] for a wrong-length vector and
    /// [`IndexError::MalformedVector`] for a wrong-length buffer.
    pub fn encode_into(&self, vector: &[f32], out: &mut [u8]) -> Result<()> {
        if vector.len() != self.dims {
            return Err(IndexError::DimensionMismatch { expected: self.dims, actual: vector.len() });
        }
        self.check_len(out.len())?;

        match self.mode {
            CompressionMode::Float32 => {
                for (chunk, v) in out.chunks_exact_mut(4).zip(vector) {
                    chunk.copy_from_slice(&v.to_le_bytes());
                }
            }
            CompressionMode::Float16 => {
                for (chunk, v) in out.chunks_exact_mut(2).zip(vector) {
                    chunk.copy_from_slice(&f16::from_f32(*v).to_le_bytes());
                }
            }
            CompressionMode::Float8 => {
                let (min, max) = min_max(vector);
                let range = max - min;
                let step = if range > 0.0 { range / 255.0 } else { 0.0 };
                let (codes, trailer) = out.split_at_mut(self.dims);
                for (code, v) in codes.iter_mut().zip(vector) {
                    *code = if step == 0.0 {
                        0
                    } else {
                        ((v - min) / step).round().clamp(0.0, 255.0) as u8
                    };
                }
                trailer[..4].copy_from_slice(&min.to_le_bytes());
                trailer[4..].copy_from_slice(&step.to_le_bytes());
            }
            CompressionMode::Int8 => {
                let abs_max = vector.iter().fold(0.0_f32, |m, v| m.max(v.abs()));
                let step = abs_max / 127.0;
                let (codes, trailer) = out.split_at_mut(self.dims);
                for (code, v) in codes.iter_mut().zip(vector) {
                    let q = if step == 0.0 { 0 } else { (v / step).round().clamp(-127.0, 127.0) as i8 };
                    *code = q as u8;
                }
                trailer.copy_from_slice(&step.to_le_bytes());
            }
            CompressionMode::Float1Bit => {
                out.fill(0);
                for (i, v) in vector.iter().enumerate() {
                    if *v > 0.0 {
                        out[i / 8] |= 1 << (i % 8);
                    }
                }
            }
        }

        Ok(())
    }

    /// Decode an encoded vector.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::MalformedVector`] if `bytes` has the wrong length.
    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        let mut out = vec![0.0; self.dims];
        self.decode_into(bytes, &mut out)?;
        Ok(out)
    }

    /// Decode into a caller-provided buffer of `dims` elements.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::MalformedVector`] or
    /// [`IndexError::DimensionMismatch`] on length problems.
    pub fn decode_into(&self, bytes: &[u8], out: &mut [f32]) -> Result<()> {
        self.check_len(bytes.len())?;
        if out.len() != self.dims {
            return Err(IndexError::DimensionMismatch { expected: self.dims, actual: out.len() });
        }

        match self.mode {
            CompressionMode::Float32 => {
                for (v, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
                    *v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                }
            }
            CompressionMode::Float16 => {
                for (v, chunk) in out.iter_mut().zip(bytes.chunks_exact(2)) {
                    *v = f16::from_le_bytes([chunk[0], chunk[1]]).to_f32();
                }
            }
            CompressionMode::Float8 => {
                let (codes, trailer) = bytes.split_at(self.dims);
                let offset = le_f32(&trailer[..4]);
                let step = le_f32(&trailer[4..]);
                for (v, code) in out.iter_mut().zip(codes) {
                    *v = offset + f32::from(*code) * step;
                }
            }
            CompressionMode::Int8 => {
                let (codes, trailer) = bytes.split_at(self.dims);
                let step = le_f32(trailer);
                for (v, code) in out.iter_mut().zip(codes) {
                    *v = f32::from(*code as i8) * step;
                }
            }
            CompressionMode::Float1Bit => {
                for (i, v) in out.iter_mut().enumerate() {
                    *v = if bytes[i / 8] & (1 << (i % 8)) != 0 { 1.0 } else { -1.0 };
                }
            }
        }

        Ok(())
    }

    /// Approximate distance between two encoded vectors of this codec.
    ///
    /// Both slices must be `encoded_len()` bytes; callers read them from
    /// validated node records.
    #[must_use]
    pub fn distance(&self, metric: DistanceMetric, a: &[u8], b: &[u8]) -> f32 {
        debug_assert_eq!(a.len(), self.encoded_len());
        debug_assert_eq!(b.len(), self.encoded_len());

        match self.mode {
            CompressionMode::Float32 => {
                let mut sums = Sums::default();
                for (ca, cb) in a.chunks_exact(4).zip(b.chunks_exact(4)) {
                    sums.add(
                        f32::from_le_bytes([ca[0], ca[1], ca[2], ca[3]]),
                        f32::from_le_bytes([cb[0], cb[1], cb[2], cb[3]]),
                    );
                }
                metric.finish(sums)
            }
            CompressionMode::Float16 => {
                let mut sums = Sums::default();
                for (ca, cb) in a.chunks_exact(2).zip(b.chunks_exact(2)) {
                    sums.add(
                        f16::from_le_bytes([ca[0], ca[1]]).to_f32(),
                        f16::from_le_bytes([cb[0], cb[1]]).to_f32(),
                    );
                }
                metric.finish(sums)
            }
            CompressionMode::Float8 => {
                let (codes_a, trailer_a) = a.split_at(self.dims);
                let (codes_b, trailer_b) = b.split_at(self.dims);
                let (offset_a, step_a) = (le_f32(&trailer_a[..4]), le_f32(&trailer_a[4..]));
                let (offset_b, step_b) = (le_f32(&trailer_b[..4]), le_f32(&trailer_b[4..]));
                let mut sums = Sums::default();
                for (qa, qb) in codes_a.iter().zip(codes_b) {
                    sums.add(offset_a + f32::from(*qa) * step_a, offset_b + f32::from(*qb) * step_b);
                }
                metric.finish(sums)
            }
            CompressionMode::Int8 => {
                let (codes_a, trailer_a) = a.split_at(self.dims);
                let (codes_b, trailer_b) = b.split_at(self.dims);
                let (step_a, step_b) = (le_f32(trailer_a), le_f32(trailer_b));

                let (mut dot, mut norm_a, mut norm_b) = (0_i64, 0_i64, 0_i64);
                for (qa, qb) in codes_a.iter().zip(codes_b) {
                    let (x, y) = (i64::from(*qa as i8), i64::from(*qb as i8));
                    dot += x * y;
                    norm_a += x * x;
                    norm_b += y * y;
                }

                let dot = dot as f32 * step_a * step_b;
                let norm_a = norm_a as f32 * step_a * step_a;
                let norm_b = norm_b as f32 * step_b * step_b;
                metric.finish(Sums { dot, norm_a, norm_b, l2: norm_a + norm_b - 2.0 * dot })
            }
            CompressionMode::Float1Bit => {
                let hamming: u32 = a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum();
                let theta = std::f32::consts::PI * hamming as f32 / self.dims.max(1) as f32;
                let cos = theta.cos();
                match metric {
                    DistanceMetric::Cosine => 1.0 - cos,
                    // unit-norm embeddings: |a-b|² = 2 - 2cos
                    DistanceMetric::L2 => (2.0 - 2.0 * cos).max(0.0).sqrt(),
                    DistanceMetric::Dot => -cos,
                }
            }
        }
    }

    fn check_len(&self, actual: usize) -> Result<()> {
        let expected = self.encoded_len();
        if actual != expected {
            return Err(IndexError::MalformedVector { expected, actual });
        }
        Ok(())
    }
}

fn min_max(vector: &[f32]) -> (f32, f32) {
    if vector.is_empty() {
        return (0.0, 0.0);
    }
    vector.iter().fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
}

#[inline]
fn le_f32(bytes: &[u8]) -> f32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    f32::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(dims: usize, seed: f32) -> Vec<f32> {
        (0..dims).map(|i| ((i as f32 + seed) * 0.37).sin() * 2.5).collect()
    }

    #[test]
    fn test_encoded_lengths() {
        assert_eq!(CompressionMode::Float32.encoded_len(512), 2048);
        assert_eq!(CompressionMode::Float16.encoded_len(512), 1024);
        assert_eq!(CompressionMode::Float8.encoded_len(512), 520);
        assert_eq!(CompressionMode::Int8.encoded_len(512), 516);
        assert_eq!(CompressionMode::Float1Bit.encoded_len(512), 64);
        assert_eq!(CompressionMode::Float1Bit.encoded_len(9), 2);
    }

    #[test]
    fn test_float32_roundtrip_is_exact() {
        let codec = VectorCodec::new(CompressionMode::Float32, 64);
        let v = sample(64, 1.0);
        assert_eq!(codec.decode(&codec.encode(&v).unwrap()).unwrap(), v);
    }

    #[test]
    fn test_encode_rejects_wrong_dimension() {
        let codec = VectorCodec::new(CompressionMode::Int8, 16);
        let err = codec.encode(&[1.0; 15]).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 16, actual: 15 }));
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let codec = VectorCodec::new(CompressionMode::Float16, 16);
        let err = codec.decode(&[0u8; 31]).unwrap_err();
        assert!(matches!(err, IndexError::MalformedVector { expected: 32, actual: 31 }));
    }

    #[test]
    fn test_constant_vector_quantizes_cleanly() {
        for mode in [CompressionMode::Float8, CompressionMode::Int8] {
            let codec = VectorCodec::new(mode, 8);
            let v = vec![0.75; 8];
            let decoded = codec.decode(&codec.encode(&v).unwrap()).unwrap();
            for x in decoded {
                assert!((x - 0.75).abs() <= mode.max_error(&v), "{mode}: {x}");
            }
        }
    }

    #[test]
    fn test_sign_bits_layout() {
        let codec = VectorCodec::new(CompressionMode::Float1Bit, 10);
        let v = [1.0, -1.0, 0.5, 0.0, -2.0, 3.0, -0.1, 0.2, 9.0, -9.0];
        let bytes = codec.encode(&v).unwrap();
        assert_eq!(bytes, vec![0b1010_0101, 0b0000_0001]);
        assert_eq!(codec.decode(&bytes).unwrap(), vec![1.0, -1.0, 1.0, -1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0]);
    }

    #[test]
    fn test_direct_distance_tracks_exact_distance() {
        let dims = 96;
        let a = sample(dims, 0.0);
        let b = sample(dims, 5.0);

        for metric in [DistanceMetric::Cosine, DistanceMetric::L2, DistanceMetric::Dot] {
            let exact = metric.distance(&a, &b);
            for (mode, tolerance) in [
                (CompressionMode::Float32, 1e-3),
                (CompressionMode::Float16, 0.05),
                (CompressionMode::Float8, 0.5),
                (CompressionMode::Int8, 0.5),
            ] {
                let codec = VectorCodec::new(mode, dims);
                let approx = codec.distance(metric, &codec.encode(&a).unwrap(), &codec.encode(&b).unwrap());
                let scale = exact.abs().max(1.0);
                assert!(
                    (approx - exact).abs() <= tolerance * scale,
                    "{mode}/{metric}: approx={approx} exact={exact}"
                );
            }
        }
    }

    #[test]
    fn test_one_bit_distance_orders_by_sign_agreement() {
        let codec = VectorCodec::new(CompressionMode::Float1Bit, 8);
        let q = codec.encode(&[1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0, -1.0]).unwrap();
        let same = codec.encode(&[0.5, 0.2, 0.9, 0.1, -0.3, -0.3, -0.3, -0.3]).unwrap();
        let half = codec.encode(&[0.5, 0.2, 0.9, 0.1, 0.3, 0.3, 0.3, 0.3]).unwrap();
        let opposite = codec.encode(&[-1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0]).unwrap();

        let d_same = codec.distance(DistanceMetric::Cosine, &q, &same);
        let d_half = codec.distance(DistanceMetric::Cosine, &q, &half);
        let d_opp = codec.distance(DistanceMetric::Cosine, &q, &opposite);

        assert!(d_same.abs() < 1e-6);
        assert!((d_half - 1.0).abs() < 1e-5);
        assert!((d_opp - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_mode_names_parse_back() {
        for mode in CompressionMode::ALL {
            assert_eq!(mode.name().parse::<CompressionMode>().unwrap(), mode);
            assert_eq!(CompressionMode::from_tag(mode.tag()), Some(mode));
        }
        assert!("float64".parse::<CompressionMode>().is_err());
    }

    #[test]
    fn test_float8_keeps_tiny_ranges() {
        let codec = VectorCodec::new(CompressionMode::Float8, 2);
        for v in [[0.0, 1e-8], [1e6, 1e6 + 0.0625], [-3e-30, 2e-30]] {
            let decoded = codec.decode(&codec.encode(&v).unwrap()).unwrap();
            let bound = CompressionMode::Float8.max_error(&v);
            for (orig, back) in v.iter().zip(&decoded) {
                assert!((orig - back).abs() <= bound, "{orig} -> {back} (bound {bound})");
            }
            assert!(decoded[0] < decoded[1], "{v:?} collapsed to {decoded:?}");
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn roundtrip_error_within_mode_bound(
            raw in prop::collection::vec(-100.0f32..100.0, 1..200),
            scale in prop::sample::select(vec![1.0f32, 1e-3, 1e-8, 1e-20, 1e-35]),
            tag in 0u8..5,
        ) {
            let v: Vec<f32> = raw.iter().map(|x| x * scale).collect();
            let mode = CompressionMode::from_tag(tag).unwrap();
            let codec = VectorCodec::new(mode, v.len());
            let decoded = codec.decode(&codec.encode(&v).unwrap()).unwrap();
            let bound = mode.max_error(&v);
            for (orig, back) in v.iter().zip(&decoded) {
                prop_assert!((orig - back).abs() <= bound, "{} {} -> {} (bound {})", mode, orig, back, bound);
            }
        }
    }
}
