//! Probability laws over the distance at which a ray interacts with the scene.
//!
//! A distribution is built fresh for every traced ray and dropped after one
//! distance has been drawn from it. Leaves remember which primitive they belong
//! to so that a sampled distance can be traced back to the primitive that
//! produced it.

use rand::distributions::WeightedIndex;
use rand::Rng;
use rand_distr::{Distribution, Exp};

use crate::error::{RenderError, TraceError};
use crate::geometry::{Fp, FP_INF};
use crate::scene::PrimitiveId;

/// A validated exponential law with rate λ.
#[derive(Clone, Copy, Debug)]
pub struct ExponentialLaw {
    rate: Fp,
    law: Exp<Fp>,
}

impl ExponentialLaw {
    pub fn new(rate: Fp) -> Result<ExponentialLaw, RenderError> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(RenderError::InvalidParameter {
                name: "rate",
                value: rate,
            });
        }
        let law = Exp::new(rate).map_err(|_| RenderError::InvalidParameter {
            name: "rate",
            value: rate,
        })?;
        Ok(ExponentialLaw { rate, law })
    }

    fn density(&self, offset: Fp) -> Fp {
        self.rate * (-self.rate * offset).exp()
    }

    fn cumulative(&self, offset: Fp) -> Fp {
        1.0 - (-self.rate * offset).exp()
    }
}

#[derive(Clone, Debug)]
pub enum DistanceDistribution {
    /// Certain interaction at one distance
    Single { distance: Fp, primitive: PrimitiveId },
    /// Memoryless interaction inside `[entry, exit]`; the remaining mass escapes to infinity
    Exponential {
        entry: Fp,
        exit: Fp,
        law: ExponentialLaw,
        primitive: PrimitiveId,
    },
    /// Whichever of two independent interactions happens first
    Sum(Box<DistanceDistribution>, Box<DistanceDistribution>),
}

/// A primitive that could have produced a sampled distance, with its relative weight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Owner {
    pub primitive: PrimitiveId,
    pub weight: Fp,
    pub point_mass: bool,
}

impl DistanceDistribution {
    pub fn single(distance: Fp, primitive: PrimitiveId) -> DistanceDistribution {
        DistanceDistribution::Single {
            distance,
            primitive,
        }
    }

    pub fn exponential(
        entry: Fp,
        exit: Fp,
        law: ExponentialLaw,
        primitive: PrimitiveId,
    ) -> DistanceDistribution {
        DistanceDistribution::Exponential {
            entry,
            exit,
            law,
            primitive,
        }
    }

    pub fn sum(left: DistanceDistribution, right: DistanceDistribution) -> DistanceDistribution {
        DistanceDistribution::Sum(Box::new(left), Box::new(right))
    }

    /// Combine any number of distributions into a balanced tree of sums.
    pub fn sum_all(distributions: Vec<DistanceDistribution>) -> Option<DistanceDistribution> {
        let mut layer = distributions;
        while layer.len() > 1 {
            let mut next = Vec::with_capacity((layer.len() + 1) / 2);
            let mut iter = layer.into_iter();
            while let Some(left) = iter.next() {
                match iter.next() {
                    Some(right) => next.push(DistanceDistribution::sum(left, right)),
                    None => next.push(left),
                }
            }
            layer = next;
        }
        layer.pop()
    }

    pub fn domain_start(&self) -> Fp {
        match self {
            DistanceDistribution::Single { distance, .. } => *distance,
            DistanceDistribution::Exponential { entry, .. } => *entry,
            DistanceDistribution::Sum(left, right) => left.domain_start().min(right.domain_start()),
        }
    }

    pub fn domain_end(&self) -> Fp {
        match self {
            DistanceDistribution::Single { distance, .. } => *distance,
            DistanceDistribution::Exponential { exit, .. } => *exit,
            DistanceDistribution::Sum(left, right) => left.domain_end().max(right.domain_end()),
        }
    }

    /// Whether every draw yields the same distance.
    pub fn single_solution(&self) -> bool {
        match self {
            DistanceDistribution::Single { .. } => true,
            DistanceDistribution::Exponential { .. } => false,
            DistanceDistribution::Sum(left, right) => {
                left.single_solution()
                    && right.single_solution()
                    && left.domain_start() == right.domain_start()
            }
        }
    }

    pub fn contains(&self, sample: Fp) -> bool {
        match self {
            DistanceDistribution::Single { distance, .. } => sample == *distance,
            DistanceDistribution::Exponential { entry, exit, .. } => {
                *entry <= sample && sample <= *exit
            }
            DistanceDistribution::Sum(left, right) => left.contains(sample) || right.contains(sample),
        }
    }

    /// Draw a distance. `+inf` means the ray passes without interacting.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Fp {
        match self {
            DistanceDistribution::Single { distance, .. } => *distance,
            DistanceDistribution::Exponential {
                entry, exit, law, ..
            } => {
                let distance = entry + law.law.sample(rng);
                if distance <= *exit {
                    distance
                } else {
                    FP_INF
                }
            }
            DistanceDistribution::Sum(left, right) => {
                let first = left.sample(rng);
                // the right side cannot undercut a draw that precedes its whole domain
                if first <= right.domain_start() {
                    first
                } else {
                    first.min(right.sample(rng))
                }
            }
        }
    }

    /// Density at `sample`. Point interactions report an infinite density.
    pub fn probability(&self, sample: Fp) -> Fp {
        match self {
            DistanceDistribution::Single { distance, .. } => {
                if sample == *distance {
                    FP_INF
                } else {
                    0.0
                }
            }
            DistanceDistribution::Exponential {
                entry, exit, law, ..
            } => {
                if *entry <= sample && sample <= *exit {
                    law.density(sample - entry)
                } else {
                    0.0
                }
            }
            DistanceDistribution::Sum(left, right) => {
                if sample < self.domain_start() || sample > self.domain_end() {
                    return 0.0;
                }
                let p_left = left.probability(sample);
                let p_right = right.probability(sample);
                if p_left <= 0.0 && p_right <= 0.0 {
                    0.0
                } else if p_left <= 0.0 {
                    surviving(left.cumulative_before(sample), p_right)
                } else if p_right <= 0.0 {
                    surviving(right.cumulative_before(sample), p_left)
                } else {
                    surviving(left.cumulative_before(sample), p_right)
                        + surviving(right.cumulative_before(sample), p_left)
                }
            }
        }
    }

    /// Probability that the interaction happens at or before `sample`.
    pub fn cumulative_probability(&self, sample: Fp) -> Fp {
        match self {
            DistanceDistribution::Single { distance, .. } => {
                if sample >= *distance {
                    1.0
                } else {
                    0.0
                }
            }
            DistanceDistribution::Exponential {
                entry, exit, law, ..
            } => {
                if sample < *entry {
                    0.0
                } else if sample == FP_INF {
                    1.0
                } else {
                    law.cumulative(sample.min(*exit) - entry)
                }
            }
            DistanceDistribution::Sum(left, right) => {
                if sample < self.domain_start() {
                    0.0
                } else {
                    let l = left.cumulative_probability(sample);
                    let r = right.cumulative_probability(sample);
                    l + r - l * r
                }
            }
        }
    }

    /// Probability of interacting exactly at `sample`.
    pub fn point_mass(&self, sample: Fp) -> Fp {
        match self {
            DistanceDistribution::Single { distance, .. } => {
                if sample == *distance {
                    1.0
                } else {
                    0.0
                }
            }
            DistanceDistribution::Exponential {
                entry, exit, law, ..
            } => {
                if sample == FP_INF {
                    1.0 - law.cumulative(exit - entry)
                } else {
                    0.0
                }
            }
            DistanceDistribution::Sum(left, right) => {
                let mass_left = left.point_mass(sample);
                let mass_right = right.point_mass(sample);
                mass_left * (1.0 - right.cumulative_before(sample))
                    + mass_right * (1.0 - left.cumulative_before(sample) - mass_left)
            }
        }
    }

    fn cumulative_before(&self, sample: Fp) -> Fp {
        (self.cumulative_probability(sample) - self.point_mass(sample)).max(0.0)
    }

    /// Primitives whose interaction could be the one drawn at `sample`,
    /// weighted by the chance that each came first.
    ///
    /// Point interactions dominate densities: when any owner carries mass at
    /// `sample` the density-only owners are dropped.
    pub fn owners_at(&self, sample: Fp) -> Vec<Owner> {
        match self {
            DistanceDistribution::Single {
                distance,
                primitive,
            } => {
                if sample == *distance {
                    vec![Owner {
                        primitive: *primitive,
                        weight: 1.0,
                        point_mass: true,
                    }]
                } else {
                    vec![]
                }
            }
            DistanceDistribution::Exponential { primitive, .. } => {
                if self.contains(sample) {
                    vec![Owner {
                        primitive: *primitive,
                        weight: self.probability(sample),
                        point_mass: false,
                    }]
                } else {
                    vec![]
                }
            }
            DistanceDistribution::Sum(left, right) => {
                let mut owners_left = left.owners_at(sample);
                let mut owners_right = right.owners_at(sample);
                if owners_left.is_empty() {
                    return owners_right;
                }
                if owners_right.is_empty() {
                    return owners_left;
                }
                let survive_right = 1.0 - right.cumulative_before(sample);
                let survive_left = 1.0 - left.cumulative_before(sample);
                owners_left.iter_mut().for_each(|o| o.weight *= survive_right);
                owners_right.iter_mut().for_each(|o| o.weight *= survive_left);
                owners_left.append(&mut owners_right);
                if owners_left.iter().any(|o| o.point_mass) {
                    owners_left.retain(|o| o.point_mass);
                }
                owners_left
            }
        }
    }

    /// Number of leaf distributions in the tree.
    pub fn leaf_count(&self) -> usize {
        match self {
            DistanceDistribution::Sum(left, right) => left.leaf_count() + right.leaf_count(),
            _ => 1,
        }
    }
}

// density of one side given the other has not happened yet; a side that has
// surely happened contributes nothing, even against a point mass
fn surviving(other_cumulative: Fp, density: Fp) -> Fp {
    let survival = 1.0 - other_cumulative;
    if survival <= 0.0 {
        0.0
    } else {
        survival * density
    }
}

/// Pick one candidate proportionally to its weight.
pub fn choose_weighted<T: Copy, R: Rng + ?Sized>(
    candidates: &[(T, Fp)],
    rng: &mut R,
) -> Result<T, TraceError> {
    if let [(only, weight)] = candidates {
        return if weight.is_finite() && *weight > 0.0 {
            Ok(*only)
        } else {
            Err(TraceError::InvalidWeights { count: 1 })
        };
    }
    let index = WeightedIndex::new(candidates.iter().map(|(_, weight)| *weight)).map_err(|_| {
        TraceError::InvalidWeights {
            count: candidates.len(),
        }
    })?;
    Ok(candidates[index.sample(rng)].0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn law(rate: Fp) -> ExponentialLaw {
        ExponentialLaw::new(rate).unwrap()
    }

    #[test]
    fn invalid_rate_is_rejected() {
        assert!(ExponentialLaw::new(0.0).is_err());
        assert!(ExponentialLaw::new(Fp::NAN).is_err());
    }

    #[test]
    fn truncated_exponential_mean() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let (rate, length) = (0.5, 3.0);
        let distribution = DistanceDistribution::exponential(0.0, length, law(rate), PrimitiveId(0));
        let draws = (0..100_000)
            .map(|_| distribution.sample(&mut rng))
            .filter(|d| d.is_finite())
            .collect::<Vec<_>>();
        assert!(draws.iter().all(|d| (0.0..=length).contains(d)));
        let mean = draws.iter().sum::<Fp>() / draws.len() as Fp;
        let tail = (-rate * length).exp();
        let expected = 1.0 / rate - length * tail / (1.0 - tail);
        assert!((mean - expected).abs() < 0.02, "mean={mean} expected={expected}");
        let escaped = 1.0 - draws.len() as Fp / 100_000.0;
        assert!((escaped - tail).abs() < 0.01);
    }

    #[test]
    fn sum_of_exponentials_is_exponential_with_summed_rate() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        let distribution = DistanceDistribution::sum(
            DistanceDistribution::exponential(1.0, 1e9, law(1.0), PrimitiveId(0)),
            DistanceDistribution::exponential(1.0, 1e9, law(3.0), PrimitiveId(1)),
        );
        let n = 100_000;
        let mean = (0..n).map(|_| distribution.sample(&mut rng)).sum::<Fp>() / n as Fp;
        assert!((mean - 1.25).abs() < 0.01, "mean={mean}");
        let cdf = distribution.cumulative_probability(1.5);
        assert!((cdf - (1.0 - (-4.0 * 0.5f64).exp())).abs() < 1e-12);
    }

    #[test]
    fn surface_in_front_hides_everything_behind() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let distribution = DistanceDistribution::sum(
            DistanceDistribution::single(2.0, PrimitiveId(0)),
            DistanceDistribution::exponential(1.0, 5.0, law(0.1), PrimitiveId(1)),
        );
        for _ in 0..1000 {
            let sample = distribution.sample(&mut rng);
            assert!((1.0..=2.0).contains(&sample));
        }
        assert_eq!(distribution.cumulative_probability(2.0), 1.0);
        assert_eq!(distribution.domain_start(), 1.0);
        assert_eq!(distribution.domain_end(), 5.0);
    }

    #[test]
    fn sum_density_integrates_to_its_cumulative() {
        let distribution = DistanceDistribution::sum(
            DistanceDistribution::exponential(0.0, 4.0, law(0.7), PrimitiveId(0)),
            DistanceDistribution::exponential(1.0, 6.0, law(1.3), PrimitiveId(1)),
        );
        let (a, b) = (0.0, 5.0);
        let n = 200_000;
        let h = (b - a) / n as Fp;
        let integral = (0..n)
            .map(|i| distribution.probability(a + (i as Fp + 0.5) * h) * h)
            .sum::<Fp>();
        let expected =
            distribution.cumulative_probability(b) - distribution.cumulative_probability(a);
        assert!((integral - expected).abs() < 1e-4, "{integral} != {expected}");
    }

    #[test]
    fn sum_density_behind_a_certain_surface_is_zero() {
        let distribution = DistanceDistribution::sum(
            DistanceDistribution::single(2.0, PrimitiveId(0)),
            DistanceDistribution::single(1.0, PrimitiveId(1)),
        );
        assert_eq!(distribution.probability(2.0), 0.0);
        assert_eq!(distribution.probability(1.0), FP_INF);

        let coincident = DistanceDistribution::sum(
            DistanceDistribution::single(1.0, PrimitiveId(0)),
            DistanceDistribution::single(1.0, PrimitiveId(1)),
        );
        assert_eq!(coincident.probability(1.0), FP_INF);

        let distribution = DistanceDistribution::sum(
            DistanceDistribution::exponential(0.0, 3.0, law(1.0), PrimitiveId(0)),
            DistanceDistribution::single(1.0, PrimitiveId(1)),
        );
        for x in [0.5, 1.0, 2.0, 3.0] {
            assert!(!distribution.probability(x).is_nan(), "NaN at {x}");
        }
        assert_eq!(distribution.probability(2.0), 0.0);
    }

    #[test]
    fn owners_prefer_point_mass() {
        let distribution = DistanceDistribution::sum(
            DistanceDistribution::single(2.0, PrimitiveId(4)),
            DistanceDistribution::exponential(1.0, 5.0, law(0.1), PrimitiveId(9)),
        );
        let owners = distribution.owners_at(2.0);
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].primitive, PrimitiveId(4));

        let owners = distribution.owners_at(1.5);
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].primitive, PrimitiveId(9));
        assert!(distribution.owners_at(7.0).is_empty());
    }

    #[test]
    fn sum_all_builds_one_tree() {
        let leaves = (0..7)
            .map(|i| DistanceDistribution::single(i as Fp + 1.0, PrimitiveId(i)))
            .collect::<Vec<_>>();
        let combined = DistanceDistribution::sum_all(leaves).unwrap();
        assert_eq!(combined.leaf_count(), 7);
        assert_eq!(combined.domain_start(), 1.0);
        assert_eq!(combined.domain_end(), 7.0);
        assert!(DistanceDistribution::sum_all(vec![]).is_none());
    }

    #[test]
    fn weighted_choice_rejects_zero_weights() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let result = choose_weighted(&[(1, 0.0), (2, 0.0)], &mut rng);
        assert_eq!(result, Err(TraceError::InvalidWeights { count: 2 }));
        assert_eq!(choose_weighted(&[(5, 0.3)], &mut rng), Ok(5));
    }
}
