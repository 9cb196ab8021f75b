use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{error, info, warn};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::bvh::TraversalStats;
use crate::config::IntegratorConfig;
use crate::distributions::choose_weighted;
use crate::error::{RenderError, TraceError};
use crate::film::{CameraSample, Film};
use crate::geometry::{check_finite, Fp, Ray, Vec2f};
use crate::scene::Scene;
use crate::session::RenderSession;
use crate::spectrum::{black, is_black, Spectrum};
use crate::threadpool::Task;

/// Bounce limit used when roulette is off and no explicit cap was configured.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PathStats {
    pub traversal: TraversalStats,
    pub interactions: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IntegrationReport {
    pub registered: usize,
    pub dropped: usize,
}

#[derive(Default)]
struct BatchState {
    registered: AtomicUsize,
    dropped: AtomicUsize,
    failed: AtomicBool,
    fatal: Mutex<Option<TraceError>>,
}

#[derive(Clone, Debug)]
pub struct Integrator {
    config: IntegratorConfig,
}

impl Integrator {
    pub fn new(config: IntegratorConfig) -> Result<Integrator, RenderError> {
        let p = config.survival_probability;
        if !(p > 0.0 && p <= 1.0) {
            return Err(RenderError::InvalidParameter {
                name: "survival_probability",
                value: p,
            });
        }
        Ok(Integrator { config })
    }

    fn depth_limit(&self) -> usize {
        match self.config.max_recursion_depth {
            Some(limit) => limit,
            None if self.config.russian_roulette => usize::MAX,
            None => DEFAULT_MAX_RECURSION_DEPTH,
        }
    }

    /// Radiance arriving along `ray`, estimated with one random path.
    pub fn sample_path<R: Rng + ?Sized>(
        &self,
        scene: &Scene,
        ray: &Ray,
        rng: &mut R,
        stats: &mut PathStats,
    ) -> Result<Spectrum, TraceError> {
        self.sample_recursive(scene, ray, &Spectrum::repeat(1.0), 0, rng, stats)
    }

    fn sample_recursive<R: Rng + ?Sized>(
        &self,
        scene: &Scene,
        ray: &Ray,
        throughput: &Spectrum,
        depth: usize,
        rng: &mut R,
        stats: &mut PathStats,
    ) -> Result<Spectrum, TraceError> {
        if is_black(throughput) || depth >= self.depth_limit() {
            return Ok(black());
        }
        let mut roulette_factor = 1.0;
        if self.config.russian_roulette && depth >= self.config.guaranteed_recursion_depth {
            let p = self.config.survival_probability;
            if rng.gen::<Fp>() >= p {
                return Ok(black());
            }
            roulette_factor = 1.0 / p;
        }

        let Some(distances) = scene.trace(ray, &mut stats.traversal) else {
            return Ok(black());
        };
        let distance = distances.sample(rng);
        if distance == Fp::INFINITY {
            return Ok(black());
        }
        let candidates = distances
            .owners_at(distance)
            .into_iter()
            .map(|owner| (owner.primitive, owner.weight))
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            return Err(TraceError::UncoveredDistance { distance });
        }
        let primitive = scene.primitive(choose_weighted(&candidates, rng)?);
        stats.interactions += 1;
        let material = &primitive.material;

        let position = material.density.get_position(ray, distance)?;
        let orientation = material
            .orientation
            .get_orientations(&position, &ray.direction, primitive)
            .sample(rng)?;
        let outgoing = -ray.direction;

        let direct = if material.emittance.is_emitting() {
            material.emittance.get_emittance(&position, &orientation, &outgoing)
        } else {
            black()
        };

        let indirect = if material.absorption.is_black_body() {
            black()
        } else {
            let direction = material
                .reflection
                .get_directions(&ray.direction, &orientation)
                .sample(rng)?;
            let albedo = material.absorption.get_albedo(&position, &orientation, &direction);
            let next_ray = material.density.create_ray(&position, &orientation, &direction)?;
            let incoming = self.sample_recursive(
                scene,
                &next_ray,
                &throughput.component_mul(&albedo),
                depth + 1,
                rng,
                stats,
            )?;
            albedo.component_mul(&incoming)
        };

        let result = (direct + indirect) * roulette_factor;
        check_finite("path radiance", &result)?;
        Ok(result)
    }

    /// One path through a random film position.
    pub fn sample_camera<R: Rng + ?Sized>(
        &self,
        scene: &Scene,
        rng: &mut R,
    ) -> Result<CameraSample, TraceError> {
        let film_position = Vec2f::new(rng.gen(), rng.gen());
        let lens_offset = Vec2f::new(rng.gen(), rng.gen());
        let ray = scene.camera.get_camera_ray(&film_position, &lens_offset)?;
        let mut stats = PathStats::default();
        let spectrum = self.sample_path(scene, &ray, rng, &mut stats)?;
        Ok(CameraSample {
            film_position,
            spectrum,
            hit: stats.interactions > 0,
            bvh_traversals: stats.traversal.nodes_visited,
        })
    }

    /// Traces `sample_count` paths on the session's pool and blocks until all
    /// of them are registered with `film`.
    ///
    /// Samples that fail numerically are logged and dropped. A consistency
    /// violation stops the batch and is returned once the workers are idle.
    pub fn integrate(
        &self,
        session: &RenderSession,
        scene: Arc<Scene>,
        sample_count: usize,
        film: Arc<dyn Film>,
    ) -> Result<IntegrationReport, RenderError> {
        let units = session.pool.task_count().max(1);
        let state = Arc::new(BatchState::default());
        let mut generator = Xoshiro256PlusPlus::seed_from_u64(session.next_batch_seed());

        let tasks = (0..units)
            .map(|unit| {
                let count = sample_count / units + usize::from(unit < sample_count % units);
                let unit_rng = generator.clone();
                generator.jump();
                let (integrator, scene, film, state) =
                    (self.clone(), scene.clone(), film.clone(), state.clone());
                Box::new(move || {
                    let mut rng = unit_rng.clone();
                    for _ in 0..count {
                        if state.failed.load(Ordering::Relaxed) {
                            return;
                        }
                        match integrator.sample_camera(&scene, &mut rng) {
                            Ok(sample) => {
                                film.register_sample(&sample);
                                state.registered.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) if e.is_fatal() => {
                                error!("aborting integration: {e}");
                                state.failed.store(true, Ordering::Relaxed);
                                state.fatal.lock().get_or_insert(e);
                                return;
                            }
                            Err(e) => {
                                warn!("dropping sample: {e}");
                                state.dropped.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                }) as Task
            })
            .collect();

        session.pool.do_tasks(tasks)?;
        session.pool.wait_till_done()?;
        if let Some(e) = state.fatal.lock().take() {
            return Err(e.into());
        }
        let report = IntegrationReport {
            registered: state.registered.load(Ordering::Acquire),
            dropped: state.dropped.load(Ordering::Acquire),
        };
        info!(
            "integrated {} samples in {} work units, {} dropped",
            report.registered, units, report.dropped
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn survival_probability_is_validated() {
        for p in [0.0, -0.5, 1.5, Fp::NAN] {
            let config = IntegratorConfig {
                survival_probability: p,
                ..IntegratorConfig::default()
            };
            assert!(Integrator::new(config).is_err());
        }
        assert!(Integrator::new(IntegratorConfig::default()).is_ok());
    }

    #[test]
    fn depth_limit_only_applies_without_roulette() {
        let with_roulette = Integrator::new(IntegratorConfig::default()).unwrap();
        assert_eq!(with_roulette.depth_limit(), usize::MAX);
        let without = Integrator::new(IntegratorConfig {
            russian_roulette: false,
            ..IntegratorConfig::default()
        })
        .unwrap();
        assert_eq!(without.depth_limit(), DEFAULT_MAX_RECURSION_DEPTH);
    }
}
