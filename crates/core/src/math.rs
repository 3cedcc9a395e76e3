//! Vector utilities for embedding storage and similarity search

/// Dot product of two equal-length vectors
///
/// Extra elements of the longer slice are ignored.
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Euclidean (L2) norm
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Divide a vector by its L2 norm in place
///
/// A vector whose norm is exactly zero is left as-is. Returns the norm that was
/// observed before normalisation.
pub fn normalize_vector(v: &mut [f32]) -> f32 {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    norm
}

/// Cosine similarity in [-1, 1]; 0.0 when either vector has zero norm
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot_product(a, b) / (norm_a * norm_b)
}

/// Cosine distance: `1 - cosine_similarity`, same semantics as pgvector's `<=>`
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Elementwise mean of a set of equal-length vectors
///
/// Returns `None` when `vectors` is empty or the lengths disagree.
pub fn mean_vector<V: AsRef<[f32]>>(vectors: &[V]) -> Option<Vec<f32>> {
    let first = vectors.first()?.as_ref();
    let dim = first.len();
    let mut sum = vec![0.0f32; dim];

    for v in vectors {
        let v = v.as_ref();
        if v.len() != dim {
            return None;
        }
        for (acc, x) in sum.iter_mut().zip(v) {
            *acc += x;
        }
    }

    let count = vectors.len() as f32;
    for x in sum.iter_mut() {
        *x /= count;
    }
    Some(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_vector_unit_norm() {
        let mut v = vec![3.0, 4.0];
        let norm = normalize_vector(&mut v);
        assert_eq!(norm, 5.0);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_is_untouched() {
        let mut v = vec![0.0, 0.0, 0.0];
        let norm = normalize_vector(&mut v);
        assert_eq!(norm, 0.0);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_cosine_distance_orders_by_angle() {
        let target = [1.0, 0.0];
        let near = [0.9, 0.1];
        let far = [0.0, 1.0];
        let opposite = [-1.0, 0.0];

        assert!(cosine_distance(&target, &target).abs() < 1e-6);
        assert!(cosine_distance(&target, &near) < cosine_distance(&target, &far));
        assert!((cosine_distance(&target, &far) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&target, &opposite) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_mean_vector() {
        let mean = mean_vector(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(mean, vec![2.0, 3.0]);

        let empty: Vec<Vec<f32>> = Vec::new();
        assert!(mean_vector(&empty).is_none());
        assert!(mean_vector(&[vec![1.0], vec![1.0, 2.0]]).is_none());
    }
}
