//! Materials are assembled from five independent profiles. Each profile
//! answers one question the integrator asks at an interaction: where along
//! the ray it happens, how the surface is oriented there, where light goes
//! next, how much of it survives and how much is emitted.

use std::fmt::Debug;

use crate::boundaries::Boundary;
use crate::directions::DirectionDistribution;
use crate::distributions::{DistanceDistribution, ExponentialLaw};
use crate::error::{RenderError, TraceError};
use crate::geometry::{check_finite, get_reflection_ray, Fp, Ray, Vec3f};
use crate::scene::Primitive;
use crate::spectrum::{black, is_black, Spectrum};

/// Offset applied to rays leaving a surface so they do not hit it again.
pub const RAISE_EPSILON: Fp = 1e-5;

pub trait DensityProfile: Send + Sync + Debug {
    /// Law of the interaction distance with one primitive, or `None` if the
    /// crossing cannot produce an interaction on this ray.
    fn get_distances(&self, ray: &Ray, boundary: &Boundary) -> Option<DistanceDistribution>;

    fn get_position(&self, ray: &Ray, distance: Fp) -> Result<Vec3f, TraceError> {
        let position = ray.travel(distance);
        check_finite("interaction position", &position)?;
        Ok(position)
    }

    fn create_ray(
        &self,
        position: &Vec3f,
        orientation: &Vec3f,
        direction: &Vec3f,
    ) -> Result<Ray, TraceError>;

    /// Whether an interaction is certain at the first surface crossing, so
    /// nothing behind it can be reached.
    fn is_opaque(&self) -> bool {
        false
    }
}

pub trait AbsorptionProfile: Send + Sync + Debug {
    fn get_albedo(&self, position: &Vec3f, orientation: &Vec3f, direction: &Vec3f) -> Spectrum;

    fn is_black_body(&self) -> bool;
}

pub trait OrientationProfile: Send + Sync + Debug {
    fn get_orientations(
        &self,
        position: &Vec3f,
        incoming: &Vec3f,
        primitive: &Primitive,
    ) -> DirectionDistribution;
}

pub trait ReflectionProfile: Send + Sync + Debug {
    fn get_directions(&self, incoming: &Vec3f, orientation: &Vec3f) -> DirectionDistribution;
}

pub trait EmittanceProfile: Send + Sync + Debug {
    fn is_emitting(&self) -> bool;

    fn get_emittance(&self, position: &Vec3f, orientation: &Vec3f, direction: &Vec3f) -> Spectrum;
}

/// Interaction exactly at the first surface crossing ahead of the ray.
#[derive(Clone, Debug, Default)]
pub struct DeltaSurface;

impl DensityProfile for DeltaSurface {
    fn get_distances(&self, ray: &Ray, boundary: &Boundary) -> Option<DistanceDistribution> {
        boundary
            .surface_crossing_on(ray)
            .map(|distance| DistanceDistribution::single(distance, boundary.primitive))
    }

    fn create_ray(
        &self,
        position: &Vec3f,
        orientation: &Vec3f,
        direction: &Vec3f,
    ) -> Result<Ray, TraceError> {
        let side = if direction.dot(orientation) >= 0.0 { 1.0 } else { -1.0 };
        Ray::new(position + orientation * (RAISE_EPSILON * side), *direction)
    }

    fn is_opaque(&self) -> bool {
        true
    }
}

/// Homogeneous participating medium.
#[derive(Clone, Debug)]
pub struct ExponentialDensity {
    law: ExponentialLaw,
}

impl ExponentialDensity {
    pub fn new(rate: Fp) -> Result<ExponentialDensity, RenderError> {
        Ok(ExponentialDensity {
            law: ExponentialLaw::new(rate)?,
        })
    }
}

impl DensityProfile for ExponentialDensity {
    fn get_distances(&self, ray: &Ray, boundary: &Boundary) -> Option<DistanceDistribution> {
        let entry = boundary.entry.max(0.0);
        let exit = boundary.exit.min(ray.length);
        (entry < exit)
            .then(|| DistanceDistribution::exponential(entry, exit, self.law, boundary.primitive))
    }

    fn create_ray(&self, position: &Vec3f, _: &Vec3f, direction: &Vec3f) -> Result<Ray, TraceError> {
        Ray::new(*position, *direction)
    }
}

#[derive(Clone, Debug)]
pub struct UniformAbsorption {
    pub albedo: Spectrum,
}

impl AbsorptionProfile for UniformAbsorption {
    fn get_albedo(&self, _: &Vec3f, _: &Vec3f, _: &Vec3f) -> Spectrum {
        self.albedo
    }

    fn is_black_body(&self) -> bool {
        is_black(&self.albedo)
    }
}

/// Shape normal, flipped to face the incoming ray.
#[derive(Clone, Debug, Default)]
pub struct FlatOrientation;

impl OrientationProfile for FlatOrientation {
    fn get_orientations(
        &self,
        position: &Vec3f,
        incoming: &Vec3f,
        primitive: &Primitive,
    ) -> DirectionDistribution {
        let normal = primitive.object.surface_normal(position);
        if normal.dot(incoming) > 0.0 {
            DirectionDistribution::Fixed(-normal)
        } else {
            DirectionDistribution::Fixed(normal)
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct UniformOrientation;

impl OrientationProfile for UniformOrientation {
    fn get_orientations(&self, _: &Vec3f, _: &Vec3f, _: &Primitive) -> DirectionDistribution {
        DirectionDistribution::UniformSphere
    }
}

#[derive(Clone, Debug, Default)]
pub struct DiffuseReflection;

impl ReflectionProfile for DiffuseReflection {
    fn get_directions(&self, _: &Vec3f, orientation: &Vec3f) -> DirectionDistribution {
        DirectionDistribution::CosineHemisphere {
            normal: *orientation,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SpecularReflection;

impl ReflectionProfile for SpecularReflection {
    fn get_directions(&self, incoming: &Vec3f, orientation: &Vec3f) -> DirectionDistribution {
        DirectionDistribution::Fixed(get_reflection_ray(incoming, orientation))
    }
}

#[derive(Clone, Debug, Default)]
pub struct IsotropicReflection;

impl ReflectionProfile for IsotropicReflection {
    fn get_directions(&self, _: &Vec3f, _: &Vec3f) -> DirectionDistribution {
        DirectionDistribution::UniformSphere
    }
}

/// Weighted blend of reflection lobes, e.g. a diffuse base under a mirror coat.
#[derive(Debug)]
pub struct BlendedReflection {
    lobes: Vec<(Box<dyn ReflectionProfile>, Fp)>,
}

impl BlendedReflection {
    pub fn new(lobes: Vec<(Box<dyn ReflectionProfile>, Fp)>) -> Result<BlendedReflection, RenderError> {
        if let Some((_, weight)) = lobes
            .iter()
            .find(|(_, weight)| !(weight.is_finite() && *weight >= 0.0))
        {
            return Err(RenderError::InvalidParameter {
                name: "lobe weight",
                value: *weight,
            });
        }
        let total = lobes.iter().map(|(_, weight)| weight).sum::<Fp>();
        if !(total > 0.0) {
            return Err(RenderError::InvalidParameter {
                name: "total lobe weight",
                value: total,
            });
        }
        Ok(BlendedReflection { lobes })
    }
}

impl ReflectionProfile for BlendedReflection {
    fn get_directions(&self, incoming: &Vec3f, orientation: &Vec3f) -> DirectionDistribution {
        DirectionDistribution::Mixture(
            self.lobes
                .iter()
                .map(|(lobe, weight)| (lobe.get_directions(incoming, orientation), *weight))
                .collect(),
        )
    }
}

#[derive(Clone, Debug)]
pub struct UniformEmittance {
    pub radiance: Spectrum,
}

impl EmittanceProfile for UniformEmittance {
    fn is_emitting(&self) -> bool {
        !is_black(&self.radiance)
    }

    fn get_emittance(&self, _: &Vec3f, _: &Vec3f, _: &Vec3f) -> Spectrum {
        self.radiance
    }
}

#[derive(Debug)]
pub struct Material {
    pub density: Box<dyn DensityProfile>,
    pub absorption: Box<dyn AbsorptionProfile>,
    pub orientation: Box<dyn OrientationProfile>,
    pub reflection: Box<dyn ReflectionProfile>,
    pub emittance: Box<dyn EmittanceProfile>,
}

impl Material {
    pub fn diffuse(albedo: Spectrum) -> Material {
        Material::emissive(albedo, black())
    }

    pub fn specular(albedo: Spectrum) -> Material {
        Material {
            density: Box::new(DeltaSurface),
            absorption: Box::new(UniformAbsorption { albedo }),
            orientation: Box::new(FlatOrientation),
            reflection: Box::new(SpecularReflection),
            emittance: Box::new(UniformEmittance { radiance: black() }),
        }
    }

    /// Diffuse surface that also emits `radiance`. A black albedo makes it a pure light.
    pub fn emissive(albedo: Spectrum, radiance: Spectrum) -> Material {
        Material {
            density: Box::new(DeltaSurface),
            absorption: Box::new(UniformAbsorption { albedo }),
            orientation: Box::new(FlatOrientation),
            reflection: Box::new(DiffuseReflection),
            emittance: Box::new(UniformEmittance { radiance }),
        }
    }

    /// Diffuse surface with a mirror coat reflecting a `gloss` share of the light.
    pub fn glossy(albedo: Spectrum, gloss: Fp) -> Result<Material, RenderError> {
        if !(0.0..=1.0).contains(&gloss) {
            return Err(RenderError::InvalidParameter {
                name: "gloss",
                value: gloss,
            });
        }
        Ok(Material {
            density: Box::new(DeltaSurface),
            absorption: Box::new(UniformAbsorption { albedo }),
            orientation: Box::new(FlatOrientation),
            reflection: Box::new(BlendedReflection::new(vec![
                (Box::new(DiffuseReflection) as Box<dyn ReflectionProfile>, 1.0 - gloss),
                (Box::new(SpecularReflection) as Box<dyn ReflectionProfile>, gloss),
            ])?),
            emittance: Box::new(UniformEmittance { radiance: black() }),
        })
    }

    pub fn volumetric(rate: Fp, albedo: Spectrum, radiance: Spectrum) -> Result<Material, RenderError> {
        Ok(Material {
            density: Box::new(ExponentialDensity::new(rate)?),
            absorption: Box::new(UniformAbsorption { albedo }),
            orientation: Box::new(UniformOrientation),
            reflection: Box::new(IsotropicReflection),
            emittance: Box::new(UniformEmittance { radiance }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::PrimitiveId;

    fn boundary(entry: Fp, exit: Fp) -> Boundary {
        Boundary {
            primitive: PrimitiveId(2),
            entry,
            exit,
            entry_on_surface: true,
            exit_on_surface: true,
        }
    }

    #[test]
    fn surface_from_inside_interacts_at_exit() {
        let ray = Ray::new(Vec3f::zeros(), Vec3f::x()).unwrap();
        let distribution = DeltaSurface.get_distances(&ray, &boundary(-1.0, 1.0)).unwrap();
        assert!(distribution.single_solution());
        assert_eq!(distribution.domain_start(), 1.0);
        assert!(DeltaSurface.get_distances(&ray, &boundary(-3.0, -1.0)).is_none());
    }

    #[test]
    fn medium_is_clamped_to_ray() {
        let ray = Ray::new(Vec3f::zeros(), Vec3f::x()).unwrap().with_length(2.0);
        let density = ExponentialDensity::new(0.5).unwrap();
        let distribution = density.get_distances(&ray, &boundary(-1.0, 5.0)).unwrap();
        assert_eq!(distribution.domain_start(), 0.0);
        assert_eq!(distribution.domain_end(), 2.0);
        assert!(Material::volumetric(-1.0, black(), black()).is_err());
    }

    #[test]
    fn glossy_blend_mixes_mirror_and_diffuse() {
        use rand::SeedableRng;
        use rand_xoshiro::Xoshiro256PlusPlus;

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(4);
        let material = Material::glossy(Vec3f::repeat(0.8), 0.3).unwrap();
        let incoming = Vec3f::new(1.0, 0.0, -1.0).normalize();
        let mirror = get_reflection_ray(&incoming, &Vec3f::z());
        let directions = material.reflection.get_directions(&incoming, &Vec3f::z());
        let n = 20_000;
        let mut mirrored = 0;
        for _ in 0..n {
            let direction = directions.sample(&mut rng).unwrap();
            assert!(direction.z >= 0.0);
            if (direction - mirror).norm() < 1e-12 {
                mirrored += 1;
            }
        }
        assert!((mirrored as Fp / n as Fp - 0.3).abs() < 0.015);
    }

    #[test]
    fn blend_weights_are_validated() {
        assert!(BlendedReflection::new(vec![]).is_err());
        let diffuse = || Box::new(DiffuseReflection) as Box<dyn ReflectionProfile>;
        assert!(BlendedReflection::new(vec![(diffuse(), -1.0)]).is_err());
        assert!(BlendedReflection::new(vec![(diffuse(), 0.0)]).is_err());
        assert!(Material::glossy(black(), 1.5).is_err());
        assert!(Material::glossy(black(), 1.0).is_ok());
    }

    #[test]
    fn raised_ray_leaves_on_the_reflected_side() {
        let ray = DeltaSurface
            .create_ray(&Vec3f::zeros(), &Vec3f::z(), &Vec3f::new(1.0, 0.0, 1.0))
            .unwrap();
        assert!(ray.origin.z > 0.0);
        let through = DeltaSurface
            .create_ray(&Vec3f::zeros(), &Vec3f::z(), &Vec3f::new(0.0, 0.0, -1.0))
            .unwrap();
        assert!(through.origin.z < 0.0);
    }
}
