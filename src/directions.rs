use rand::Rng;
use rand_distr::StandardNormal;

use crate::distributions::choose_weighted;
use crate::error::TraceError;
use crate::geometry::{normalize_checked, Fp, Vec3f, FP_INF};

use std::f64::consts::PI;

/// Laws over unit directions, used for shading orientations and scattered rays.
#[derive(Clone, Debug)]
pub enum DirectionDistribution {
    Fixed(Vec3f),
    UniformSphere,
    UniformHemisphere { normal: Vec3f },
    CosineHemisphere { normal: Vec3f },
    /// Picks one of the laws with probability proportional to its weight
    Mixture(Vec<(DirectionDistribution, Fp)>),
}

pub fn random_unit_vec<R: Rng + ?Sized>(rng: &mut R) -> Result<Vec3f, TraceError> {
    let v = Vec3f::new(
        rng.sample(StandardNormal),
        rng.sample(StandardNormal),
        rng.sample(StandardNormal),
    );
    normalize_checked(&v)
}

impl DirectionDistribution {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec3f, TraceError> {
        match self {
            DirectionDistribution::Fixed(direction) => Ok(*direction),
            DirectionDistribution::UniformSphere => random_unit_vec(rng),
            DirectionDistribution::UniformHemisphere { normal } => {
                let result = random_unit_vec(rng)?;
                if result.dot(normal) > 0.0 {
                    Ok(result)
                } else {
                    Ok(-result)
                }
            }
            DirectionDistribution::CosineHemisphere { normal } => {
                let uniform = random_unit_vec(rng)?;
                normalize_checked(&(uniform + normal))
            }
            DirectionDistribution::Mixture(components) => {
                let weights = components
                    .iter()
                    .enumerate()
                    .map(|(i, (_, weight))| (i, *weight))
                    .collect::<Vec<_>>();
                components[choose_weighted(&weights, rng)?].0.sample(rng)
            }
        }
    }

    /// Solid-angle density of `direction`. A fixed direction has infinite density on itself.
    pub fn probability(&self, direction: &Vec3f) -> Fp {
        match self {
            DirectionDistribution::Fixed(fixed) => {
                if (fixed - direction).norm() < 1e-9 {
                    FP_INF
                } else {
                    0.0
                }
            }
            DirectionDistribution::UniformSphere => 1.0 / (4.0 * PI),
            DirectionDistribution::UniformHemisphere { normal } => {
                if direction.dot(normal) > 0.0 {
                    1.0 / (2.0 * PI)
                } else {
                    0.0
                }
            }
            DirectionDistribution::CosineHemisphere { normal } => {
                Fp::max(0.0, direction.dot(normal)) / PI
            }
            DirectionDistribution::Mixture(components) => {
                let total = components.iter().map(|(_, weight)| weight).sum::<Fp>();
                components
                    .iter()
                    .filter(|(_, weight)| *weight > 0.0)
                    .map(|(component, weight)| weight / total * component.probability(direction))
                    .sum()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    // integrating the density over the sphere with uniform directions should give one
    fn check_normalized(distribution: DirectionDistribution) {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let n = 200_000;
        let avg = (0..n)
            .map(|_| distribution.probability(&random_unit_vec(&mut rng).unwrap()))
            .sum::<Fp>()
            / n as Fp;
        assert!((avg * 4.0 * PI - 1.0).abs() < 0.02, "integral={}", avg * 4.0 * PI);
    }

    #[test]
    fn cosine_distribution_is_normalized() {
        check_normalized(DirectionDistribution::CosineHemisphere { normal: Vec3f::x() });
    }

    #[test]
    fn hemisphere_distribution_is_normalized() {
        check_normalized(DirectionDistribution::UniformHemisphere { normal: Vec3f::y() });
    }

    #[test]
    fn mixture_is_normalized() {
        check_normalized(DirectionDistribution::Mixture(vec![
            (DirectionDistribution::CosineHemisphere { normal: Vec3f::x() }, 3.0),
            (DirectionDistribution::UniformSphere, 1.0),
            (DirectionDistribution::UniformHemisphere { normal: -Vec3f::z() }, 0.0),
        ]));
    }

    #[test]
    fn mixture_follows_its_weights() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
        let distribution = DirectionDistribution::Mixture(vec![
            (DirectionDistribution::Fixed(Vec3f::y()), 1.0),
            (DirectionDistribution::Fixed(-Vec3f::y()), 3.0),
        ]);
        let n = 40_000;
        let up = (0..n)
            .filter(|_| distribution.sample(&mut rng).unwrap() == Vec3f::y())
            .count();
        assert!((up as Fp / n as Fp - 0.25).abs() < 0.01);
        assert_eq!(distribution.probability(&Vec3f::y()), FP_INF);
        assert_eq!(distribution.probability(&Vec3f::x()), 0.0);
    }

    #[test]
    fn samples_stay_in_hemisphere() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let normal = Vec3f::new(0.0, 0.0, -1.0);
        let distribution = DirectionDistribution::CosineHemisphere { normal };
        for _ in 0..10_000 {
            let direction = distribution.sample(&mut rng).unwrap();
            assert!(direction.dot(&normal) >= 0.0);
            assert!((direction.norm() - 1.0).abs() < 1e-9);
        }
    }
}
