use ndarray::{Array1, Array2, Array4, Axis};
use ndarray_rand::RandomExt;
use rand_distr::{StandardNormal, Uniform};
use rand::Rng;

/// Weight initialization strategies
///
/// All strategies draw from a caller-supplied generator so a network built
/// from the same seed is bit-identical.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeightInit {
    /// Xavier/Glorot uniform initialization over `fan_in + fan_out`
    XavierUniform,

    /// Uniform distribution in `[-limit, limit]`
    Uniform { limit: f32 },

    /// Gaussian columns rescaled so each output column has L2 norm `std`
    NormalizedColumns { std: f32 },

    /// All zeros
    Zeros,
}

impl WeightInit {
    /// Initialize a `[fan_in, fan_out]` weight matrix.
    pub fn matrix<R: Rng + ?Sized>(&self, shape: (usize, usize), rng: &mut R) -> Array2<f32> {
        let (fan_in, fan_out) = shape;

        match *self {
            WeightInit::XavierUniform => {
                let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
                Array2::random_using(shape, Uniform::new_inclusive(-limit, limit), rng)
            }

            WeightInit::Uniform { limit } => {
                Array2::random_using(shape, Uniform::new_inclusive(-limit, limit), rng)
            }

            WeightInit::NormalizedColumns { std } => {
                let mut out: Array2<f32> = Array2::random_using(shape, StandardNormal, rng);
                let norms = out.map_axis(Axis(0), |col| col.dot(&col).sqrt().max(f32::EPSILON));
                out /= &norms.insert_axis(Axis(0));
                out * std
            }

            WeightInit::Zeros => Array2::zeros(shape),
        }
    }

    /// Xavier uniform convolution kernel laid out as `[kh, kw, in_channels, out_channels]`.
    pub fn xavier_kernel<R: Rng + ?Sized>(shape: (usize, usize, usize, usize), rng: &mut R) -> Array4<f32> {
        let (kh, kw, cin, cout) = shape;
        let limit = (6.0 / (kh * kw * (cin + cout)).max(1) as f32).sqrt();
        Array4::random_using(shape, Uniform::new_inclusive(-limit, limit), rng)
    }

    /// Biases always start at zero except for the explicit fill helpers.
    pub fn biases(size: usize) -> Array1<f32> {
        Array1::zeros(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn normalized_columns_have_requested_norm() {
        let mut rng = StdRng::seed_from_u64(7);
        let w = WeightInit::NormalizedColumns { std: 0.01 }.matrix((32, 5), &mut rng);
        for col in w.axis_iter(Axis(1)) {
            let norm = col.dot(&col).sqrt();
            assert!((norm - 0.01).abs() < 1e-5, "column norm {}", norm);
        }
    }

    #[test]
    fn xavier_uniform_respects_limit() {
        let mut rng = StdRng::seed_from_u64(1);
        let k = WeightInit::xavier_kernel((3, 1, 4, 8), &mut rng);
        assert_eq!(k.dim(), (3, 1, 4, 8));
        let limit = (6.0 / (3.0 * 12.0_f32)).sqrt();
        assert!(k.iter().all(|&v| v.abs() <= limit));
    }

    #[test]
    fn same_seed_same_weights() {
        let a = WeightInit::XavierUniform.matrix((6, 4), &mut StdRng::seed_from_u64(3));
        let b = WeightInit::XavierUniform.matrix((6, 4), &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }
}
