use std::sync::Arc;

use crate::aabb::Aabb;
use crate::boundaries::{BoundaryCollection, BoundaryPiece};
use crate::bvh::{Bvh, TraversalStats};
use crate::camera::Camera;
use crate::config::BvhConfig;
use crate::distributions::DistanceDistribution;
use crate::geometry::{Fp, Object3D, Ray, Vec3f};
use crate::materials::Material;

/// Stable handle of a primitive inside a [`PrimitiveArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrimitiveId(pub usize);

#[derive(Clone, Debug)]
pub struct Primitive {
    pub object: Object3D,
    pub material: Arc<Material>,
}

impl Primitive {
    pub fn new(object: Object3D, material: Arc<Material>) -> Primitive {
        Primitive { object, material }
    }
}

/// Owns every primitive of a scene. Fragments refer back to their original by index.
#[derive(Clone, Debug, Default)]
pub struct PrimitiveArena {
    primitives: Vec<Primitive>,
}

impl PrimitiveArena {
    pub fn new() -> PrimitiveArena {
        PrimitiveArena::default()
    }

    pub fn push(&mut self, primitive: Primitive) -> PrimitiveId {
        self.primitives.push(primitive);
        PrimitiveId(self.primitives.len() - 1)
    }

    pub fn get(&self, id: PrimitiveId) -> &Primitive {
        &self.primitives[id.0]
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PrimitiveId, &Primitive)> {
        self.primitives
            .iter()
            .enumerate()
            .map(|(i, primitive)| (PrimitiveId(i), primitive))
    }

    /// One unclipped scene object per primitive, ready to be handed to a builder.
    pub fn scene_objects(&self) -> Vec<SceneObject> {
        self.iter()
            .map(|(id, primitive)| SceneObject::Primitive {
                id,
                bounds: primitive.object.bounding_box(),
            })
            .collect()
    }
}

/// Part of an original primitive restricted to a smaller box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrimitiveFragment {
    pub original: PrimitiveId,
    pub bounds: Aabb,
}

/// The unit stored in the leaves of the hierarchy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SceneObject {
    Primitive { id: PrimitiveId, bounds: Aabb },
    Fragment(PrimitiveFragment),
}

impl SceneObject {
    pub fn bounds(&self) -> &Aabb {
        match self {
            SceneObject::Primitive { bounds, .. } => bounds,
            SceneObject::Fragment(fragment) => &fragment.bounds,
        }
    }

    pub fn primitive(&self) -> PrimitiveId {
        match self {
            SceneObject::Primitive { id, .. } => *id,
            SceneObject::Fragment(fragment) => fragment.original,
        }
    }

    pub fn center(&self) -> Vec3f {
        self.bounds().center()
    }

    /// The part of this object with `lo <= p[axis] <= hi`. Clipping a fragment
    /// again yields a fragment of the same original.
    pub fn clip(&self, arena: &PrimitiveArena, axis: usize, lo: Fp, hi: Fp) -> Option<SceneObject> {
        let slab = self.bounds().clip_axis(axis, lo, hi)?;
        let original = self.primitive();
        let bounds = arena.get(original).object.clip_bounds(&slab)?;
        Some(SceneObject::Fragment(PrimitiveFragment { original, bounds }))
    }

    /// Crossing of the ray with this object. Fragments only report the part of
    /// the crossing inside their box.
    pub fn intersect(&self, arena: &PrimitiveArena, ray: &Ray) -> Option<BoundaryPiece> {
        let interval = arena.get(self.primitive()).object.intersect(ray)?;
        match self {
            SceneObject::Primitive { id, .. } => Some(BoundaryPiece {
                primitive: *id,
                entry: interval.entry,
                exit: interval.exit,
                entry_on_surface: true,
                exit_on_surface: true,
            }),
            SceneObject::Fragment(fragment) => {
                let (box_entry, box_exit) = fragment.bounds.intersect(ray)?;
                let tolerance = 1e-9 * (1.0 + box_entry.abs().max(box_exit.abs()));
                let entry_on_surface = interval.entry >= box_entry - tolerance;
                let exit_on_surface = interval.exit <= box_exit + tolerance;
                let entry = if entry_on_surface {
                    interval.entry
                } else {
                    box_entry
                };
                let exit = if exit_on_surface {
                    interval.exit
                } else {
                    box_exit
                };
                (entry <= exit).then_some(BoundaryPiece {
                    primitive: fragment.original,
                    entry,
                    exit,
                    entry_on_surface,
                    exit_on_surface,
                })
            }
        }
    }
}

/// A growable set of scene objects with a cached bounding box.
#[derive(Clone, Debug, Default)]
pub struct Aggregate {
    items: Vec<SceneObject>,
    bounds: Aabb,
}

impl Aggregate {
    pub fn new() -> Aggregate {
        Aggregate::default()
    }

    pub fn add(&mut self, item: SceneObject) {
        self.bounds = self.bounds.extend_aabb(item.bounds());
        self.items.push(item);
    }

    /// Removes the first item equal to `item`. The bounds are recomputed from scratch.
    pub fn remove(&mut self, item: &SceneObject) -> bool {
        match self.items.iter().position(|other| other == item) {
            Some(index) => {
                self.items.swap_remove(index);
                self.bounds = self
                    .items
                    .iter()
                    .fold(Aabb::default(), |acc, item| acc.extend_aabb(item.bounds()));
                true
            }
            None => false,
        }
    }

    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    pub fn items(&self) -> &[SceneObject] {
        &self.items
    }

    pub fn into_items(self) -> Vec<SceneObject> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn surface_area_heuristic(&self, config: &BvhConfig) -> Fp {
        surface_area_heuristic(config, self.items.len(), &self.bounds)
    }
}

impl FromIterator<SceneObject> for Aggregate {
    fn from_iter<T: IntoIterator<Item = SceneObject>>(iter: T) -> Self {
        let mut aggregate = Aggregate::new();
        for item in iter {
            aggregate.add(item);
        }
        aggregate
    }
}

/// Expected cost of testing a group of `count` objects inside `bounds`.
pub fn surface_area_heuristic(config: &BvhConfig, count: usize, bounds: &Aabb) -> Fp {
    config.traversal_cost + config.intersection_cost * count as Fp * bounds.surface_area()
}

/// A camera looking at an immutable, already built structure.
pub struct Scene {
    pub camera: Box<dyn Camera>,
    pub structure: Bvh,
}

impl Scene {
    pub fn new(camera: Box<dyn Camera>, structure: Bvh) -> Scene {
        Scene { camera, structure }
    }

    pub fn primitive(&self, id: PrimitiveId) -> &Primitive {
        self.structure.primitives().get(id)
    }

    pub fn trace(&self, ray: &Ray, stats: &mut TraversalStats) -> Option<DistanceDistribution> {
        self.structure.trace(ray, stats)
    }

    pub fn intersect(&self, ray: &Ray, stats: &mut TraversalStats) -> Option<BoundaryCollection> {
        self.structure.intersect(ray, stats)
    }

    /// Distance to the first primitive boundary ahead of the ray.
    pub fn first_surface(&self, ray: &Ray) -> Option<(PrimitiveId, Fp)> {
        self.intersect(ray, &mut TraversalStats::default())?
            .first_hit(ray)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_sphere_arena() -> (PrimitiveArena, PrimitiveId) {
        let mut arena = PrimitiveArena::new();
        let id = arena.push(Primitive::new(
            Object3D::sphere(Vec3f::zeros(), 1.0),
            Arc::new(Material::diffuse(Vec3f::new(0.5, 0.5, 0.5))),
        ));
        (arena, id)
    }

    #[test]
    fn removing_recomputes_bounds() {
        let (arena, _) = unit_sphere_arena();
        let far = SceneObject::Primitive {
            id: PrimitiveId(0),
            bounds: Aabb::new(Vec3f::new(5.0, 5.0, 5.0), Vec3f::new(6.0, 6.0, 6.0)),
        };
        let mut aggregate = arena.scene_objects().into_iter().collect::<Aggregate>();
        aggregate.add(far);
        assert_eq!(aggregate.bounds().max, Vec3f::new(6.0, 6.0, 6.0));
        assert!(aggregate.remove(&far));
        assert_eq!(aggregate.bounds().max, Vec3f::new(1.0, 1.0, 1.0));
        assert!(!aggregate.remove(&far));
    }

    #[test]
    fn fragments_keep_their_original() {
        let (arena, id) = unit_sphere_arena();
        let object = arena.scene_objects()[0];
        let left = object.clip(&arena, 0, -1.0, 0.0).unwrap();
        let left_again = left.clip(&arena, 1, 0.0, 1.0).unwrap();
        assert_eq!(left_again.primitive(), id);
        assert_eq!(left_again.bounds().max.x, 0.0);
        assert_eq!(left_again.bounds().min.y, 0.0);
        assert!(object.clip(&arena, 0, 2.0, 3.0).is_none());
    }

    #[test]
    fn fragment_restricts_the_crossing() {
        let (arena, _) = unit_sphere_arena();
        let object = arena.scene_objects()[0];
        let right = object.clip(&arena, 0, 0.0, 1.0).unwrap();
        let ray = Ray::new(Vec3f::new(-3.0, 0.0, 0.0), Vec3f::x()).unwrap();
        let piece = right.intersect(&arena, &ray).unwrap();
        assert!(!piece.entry_on_surface);
        assert!(piece.exit_on_surface);
        assert!((piece.entry - 3.0).abs() < 1e-9);
        assert!((piece.exit - 4.0).abs() < 1e-9);
    }
}
