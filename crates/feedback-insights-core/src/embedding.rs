//! Vector helpers for taxonomy matching.
//!
//! Taxonomy node embeddings are persisted as little-endian `f32` BLOBs and
//! compared by cosine distance (`1 - cosine similarity`), so smaller is
//! closer and a zero vector is exactly `1.0` away from everything.

/// Serialize an embedding for storage.
///
/// ```rust
/// use feedback_insights_core::embedding::{decode_vector, encode_vector};
///
/// let v = vec![0.9f32, 0.435_89];
/// assert_eq!(decode_vector(&encode_vector(&v)), v);
/// ```
pub fn encode_vector(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Deserialize a stored embedding. Trailing bytes that do not form a full
/// `f32` are ignored.
pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Mismatched lengths, empty input, and zero-norm vectors all yield `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (d + x * y, na + x * x, nb + y * y)
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        (dot / denom).clamp(-1.0, 1.0)
    }
}

/// Cosine distance in `[0.0, 2.0]`. Lower means more similar.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// A vector of `dims` zeros, used when a query embedding cannot be produced.
pub fn zero_vector(dims: usize) -> Vec<f32> {
    vec![0.0; dims]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_length() {
        let bytes = encode_vector(&[1.0, -2.5, 3.125]);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode_vector(&bytes), vec![1.0, -2.5, 3.125]);
    }

    #[test]
    fn test_decode_ignores_partial_tail() {
        let mut bytes = encode_vector(&[0.5]);
        bytes.push(0xff);
        assert_eq!(decode_vector(&bytes), vec![0.5]);
    }

    #[test]
    fn test_distance_identical_is_zero() {
        let v = [0.3, 0.4, 0.5];
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn test_distance_orthogonal_is_one() {
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_opposite_is_two() {
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_is_unit_distance() {
        let q = zero_vector(2);
        assert_eq!(cosine_distance(&q, &[0.9, 0.435_89]), 1.0);
    }

    #[test]
    fn test_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_near_match_distance() {
        // 0.9 / |(0.9, 0.43589)| ~= 0.9
        let d = cosine_distance(&[1.0, 0.0], &[0.9, 0.435_89]);
        assert!((d - 0.1).abs() < 1e-3, "{d}");
    }
}
