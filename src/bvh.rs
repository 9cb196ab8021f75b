use log::info;

use crate::aabb::Aabb;
use crate::boundaries::{BoundaryCollection, BoundaryPiece};
use crate::config::BvhConfig;
use crate::distributions::DistanceDistribution;
use crate::geometry::{Fp, Ray};
use crate::sbvh;
use crate::scene::{surface_area_heuristic, Aggregate, PrimitiveArena, PrimitiveId, SceneObject};

#[derive(Debug)]
pub enum BvhNode {
    Leaf {
        bounds: Aabb,
        items: Vec<SceneObject>,
    },
    Internal {
        bounds: Aabb,
        axis: usize,
        left: Box<BvhNode>,
        right: Box<BvhNode>,
    },
}

impl BvhNode {
    pub fn bounds(&self) -> &Aabb {
        match self {
            BvhNode::Leaf { bounds, .. } => bounds,
            BvhNode::Internal { bounds, .. } => bounds,
        }
    }

    pub fn item_count(&self) -> usize {
        match self {
            BvhNode::Leaf { items, .. } => items.len(),
            BvhNode::Internal { left, right, .. } => left.item_count() + right.item_count(),
        }
    }

    pub fn node_count(&self) -> usize {
        match self {
            BvhNode::Leaf { .. } => 1,
            BvhNode::Internal { left, right, .. } => 1 + left.node_count() + right.node_count(),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            BvhNode::Leaf { .. } => 1,
            BvhNode::Internal { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

/// A partition of a node's items. `cost` is the summed heuristic of both sides.
#[derive(Debug)]
pub struct Split {
    pub left: Aggregate,
    pub right: Aggregate,
    pub axis: usize,
    pub cost: Fp,
}

impl Split {
    pub fn new(left: Aggregate, right: Aggregate, axis: usize, config: &BvhConfig) -> Split {
        let cost = left.surface_area_heuristic(config) + right.surface_area_heuristic(config);
        Split {
            left,
            right,
            axis,
            cost,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitStrategy {
    Objects,
    /// Objects and spatial bins, with straddling objects clipped into fragments
    Spatial,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraversalStats {
    pub nodes_visited: usize,
    pub primitives_tested: usize,
}

/// Read-only hierarchy over the primitives of a scene.
#[derive(Debug)]
pub struct Bvh {
    root: Option<BvhNode>,
    primitives: PrimitiveArena,
}

impl Bvh {
    pub fn build(primitives: PrimitiveArena, config: &BvhConfig) -> Bvh {
        Bvh::build_with(primitives, config, SplitStrategy::Objects)
    }

    pub fn build_with(primitives: PrimitiveArena, config: &BvhConfig, strategy: SplitStrategy) -> Bvh {
        let items = primitives.scene_objects().into_iter().collect::<Aggregate>();
        let root = (!items.is_empty()).then(|| build_node(items, &primitives, config, strategy, 0));
        if let Some(root) = &root {
            info!(
                "built {:?} hierarchy over {} primitives: {} nodes, {} leaf items, depth {}",
                strategy,
                primitives.len(),
                root.node_count(),
                root.item_count(),
                root.depth()
            );
        }
        Bvh { root, primitives }
    }

    pub fn root(&self) -> Option<&BvhNode> {
        self.root.as_ref()
    }

    pub fn primitives(&self) -> &PrimitiveArena {
        &self.primitives
    }

    /// Visits every item whose box the ray reaches before `bound`, near child
    /// first. The visitor may lower `bound` to prune the rest of the walk.
    pub fn traverse<F>(&self, ray: &Ray, bound: &mut Fp, stats: &mut TraversalStats, visit: &mut F)
    where
        F: FnMut(&SceneObject, &mut Fp),
    {
        if let Some(root) = &self.root {
            if root.bounds().hit_within(ray, *bound) {
                traverse_node(root, ray, bound, stats, visit);
            }
        }
    }

    /// Closest surface crossing in front of the ray.
    pub fn closest_hit(&self, ray: &Ray, stats: &mut TraversalStats) -> Option<(PrimitiveId, Fp)> {
        let mut best = None;
        let mut bound = ray.length;
        self.traverse(ray, &mut bound, stats, &mut |item: &SceneObject, bound: &mut Fp| {
            if let Some(piece) = item.intersect(&self.primitives, ray) {
                if let Some(t) = piece.first_surface_crossing(0.0, *bound) {
                    *bound = t;
                    best = Some((piece.primitive, t));
                }
            }
        });
        best
    }

    /// Every primitive the ray can interact with. Anything behind the first
    /// opaque surface is left out.
    pub fn intersect(&self, ray: &Ray, stats: &mut TraversalStats) -> Option<BoundaryCollection> {
        let mut pieces: Vec<BoundaryPiece> = vec![];
        let mut bound = ray.length;
        self.traverse(ray, &mut bound, stats, &mut |item: &SceneObject, bound: &mut Fp| {
            let Some(piece) = item.intersect(&self.primitives, ray) else {
                return;
            };
            if piece.exit < 0.0 || piece.entry > *bound {
                return;
            }
            if self.primitives.get(piece.primitive).material.density.is_opaque() {
                if let Some(t) = piece.first_surface_crossing(0.0, *bound) {
                    *bound = t;
                }
            }
            pieces.push(piece);
        });
        pieces.retain(|piece| piece.entry <= bound);
        let collection = BoundaryCollection::from_pieces(pieces);
        (!collection.is_empty()).then_some(collection)
    }

    /// Combined law of the first interaction along the ray, `None` when nothing can be hit.
    pub fn trace(&self, ray: &Ray, stats: &mut TraversalStats) -> Option<DistanceDistribution> {
        let collection = self.intersect(ray, stats)?;
        let distributions = collection
            .iter()
            .filter_map(|boundary| {
                self.primitives
                    .get(boundary.primitive)
                    .material
                    .density
                    .get_distances(ray, boundary)
            })
            .collect();
        DistanceDistribution::sum_all(distributions)
    }
}

fn traverse_node<F>(
    node: &BvhNode,
    ray: &Ray,
    bound: &mut Fp,
    stats: &mut TraversalStats,
    visit: &mut F,
) where
    F: FnMut(&SceneObject, &mut Fp),
{
    stats.nodes_visited += 1;
    match node {
        BvhNode::Leaf { items, .. } => {
            for item in items {
                stats.primitives_tested += 1;
                visit(item, bound);
            }
        }
        BvhNode::Internal {
            axis, left, right, ..
        } => {
            let (near, far) = if ray.sign[*axis] == 0 {
                (left, right)
            } else {
                (right, left)
            };
            for child in [near, far] {
                if child.bounds().hit_within(ray, *bound) {
                    traverse_node(child, ray, bound, stats, visit);
                }
            }
        }
    }
}

pub fn build_node(
    items: Aggregate,
    arena: &PrimitiveArena,
    config: &BvhConfig,
    strategy: SplitStrategy,
    depth: usize,
) -> BvhNode {
    let bounds = *items.bounds();
    if items.len() <= 1 || depth >= config.max_depth {
        return BvhNode::Leaf {
            bounds,
            items: items.into_items(),
        };
    }
    let leaf_cost = items.surface_area_heuristic(config);
    let split = match strategy {
        SplitStrategy::Objects => find_object_split(&items, config),
        SplitStrategy::Spatial => sbvh::find_split(&items, arena, config),
    };
    match split {
        Some(split) if split.cost < leaf_cost => {
            let Split {
                left, right, axis, ..
            } = split;
            let (left, right) = if items.len() > config.parallel_threshold {
                rayon::join(
                    || build_node(left, arena, config, strategy, depth + 1),
                    || build_node(right, arena, config, strategy, depth + 1),
                )
            } else {
                (
                    build_node(left, arena, config, strategy, depth + 1),
                    build_node(right, arena, config, strategy, depth + 1),
                )
            };
            BvhNode::Internal {
                bounds,
                axis,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        _ => BvhNode::Leaf {
            bounds,
            items: items.into_items(),
        },
    }
}

/// Cheapest partition of the items without clipping. Small sets are swept
/// exhaustively on every axis, larger ones are binned along the longest axis.
/// Sets whose centers all land in one bin are swept as well.
pub fn find_object_split(items: &Aggregate, config: &BvhConfig) -> Option<Split> {
    if items.len() <= config.bin_threshold {
        sweep_split(items, config)
    } else {
        binned_split(items, config).or_else(|| sweep_split(items, config))
    }
}

fn sorted_by_center(items: &[SceneObject], axis: usize) -> Vec<SceneObject> {
    let mut order = items.to_vec();
    order.sort_by(|a, b| a.center()[axis].total_cmp(&b.center()[axis]));
    order
}

fn sweep_split(items: &Aggregate, config: &BvhConfig) -> Option<Split> {
    let n = items.len();
    let mut best: Option<(usize, usize, Fp)> = None;
    for axis in 0..3 {
        let order = sorted_by_center(items.items(), axis);
        let mut right_bounds = vec![Aabb::default(); n];
        let mut acc = Aabb::default();
        for i in (0..n).rev() {
            acc = acc.extend_aabb(order[i].bounds());
            right_bounds[i] = acc;
        }
        let mut left_bounds = Aabb::default();
        for i in 1..n {
            left_bounds = left_bounds.extend_aabb(order[i - 1].bounds());
            let cost = surface_area_heuristic(config, i, &left_bounds)
                + surface_area_heuristic(config, n - i, &right_bounds[i]);
            if best.map_or(true, |(_, _, best_cost)| cost < best_cost) {
                best = Some((axis, i, cost));
            }
        }
    }
    let (axis, boundary, _) = best?;
    let mut order = sorted_by_center(items.items(), axis);
    let right = order.split_off(boundary).into_iter().collect();
    let left = order.into_iter().collect();
    Some(Split::new(left, right, axis, config))
}

fn binned_split(items: &Aggregate, config: &BvhConfig) -> Option<Split> {
    let bounds = items.bounds();
    let axis = bounds.longest_axis();
    let size = bounds.size()[axis];
    if !(size > 0.0) {
        return None;
    }
    let bin_count = config.bin_count.max(2);
    let k1 = bin_count as Fp * config.binning_epsilon / size;
    let bin_of = |item: &SceneObject| {
        (((item.center()[axis] - bounds.min[axis]) * k1) as usize).min(bin_count - 1)
    };

    let mut bins = vec![(Aabb::default(), 0usize); bin_count];
    for item in items.items() {
        let bin = &mut bins[bin_of(item)];
        bin.0 = bin.0.extend_aabb(item.bounds());
        bin.1 += 1;
    }
    let mut right = vec![(Aabb::default(), 0usize); bin_count];
    let mut acc = (Aabb::default(), 0usize);
    for i in (0..bin_count).rev() {
        acc = (acc.0.extend_aabb(&bins[i].0), acc.1 + bins[i].1);
        right[i] = acc;
    }

    let mut best: Option<(usize, Fp)> = None;
    let mut left = (Aabb::default(), 0usize);
    for k in 1..bin_count {
        left = (left.0.extend_aabb(&bins[k - 1].0), left.1 + bins[k - 1].1);
        if left.1 == 0 || right[k].1 == 0 {
            continue;
        }
        let cost = surface_area_heuristic(config, left.1, &left.0)
            + surface_area_heuristic(config, right[k].1, &right[k].0);
        if best.map_or(true, |(_, best_cost)| cost < best_cost) {
            best = Some((k, cost));
        }
    }
    let (k, _) = best?;
    let (left, right): (Vec<SceneObject>, Vec<SceneObject>) =
        items.items().iter().partition(|item| bin_of(item) < k);
    Some(Split::new(
        left.into_iter().collect(),
        right.into_iter().collect(),
        axis,
        config,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Object3D, Vec3f};
    use crate::materials::Material;
    use crate::scene::Primitive;
    use std::sync::Arc;

    fn row_of_spheres(count: usize) -> PrimitiveArena {
        let material = Arc::new(Material::diffuse(Vec3f::new(0.5, 0.5, 0.5)));
        let mut arena = PrimitiveArena::new();
        for i in 0..count {
            arena.push(Primitive::new(
                Object3D::sphere(Vec3f::new(i as Fp * 3.0, 0.0, 0.0), 1.0),
                material.clone(),
            ));
        }
        arena
    }

    #[test]
    fn separated_objects_are_split() {
        let bvh = Bvh::build(row_of_spheres(8), &BvhConfig::default());
        let root = bvh.root().unwrap();
        assert!(matches!(root, BvhNode::Internal { axis: 0, .. }));
        assert_eq!(root.item_count(), 8);
    }

    #[test]
    fn single_object_is_a_leaf() {
        let bvh = Bvh::build(row_of_spheres(1), &BvhConfig::default());
        assert!(matches!(bvh.root(), Some(BvhNode::Leaf { .. })));
    }

    #[test]
    fn empty_scene_has_no_root() {
        let bvh = Bvh::build(PrimitiveArena::new(), &BvhConfig::default());
        assert!(bvh.root().is_none());
        let ray = Ray::new(Vec3f::zeros(), Vec3f::x()).unwrap();
        let mut stats = TraversalStats::default();
        assert!(bvh.trace(&ray, &mut stats).is_none());
        assert_eq!(stats.nodes_visited, 0);
    }

    #[test]
    fn binned_and_swept_builds_find_the_same_hits() {
        let config = BvhConfig {
            bin_threshold: 4,
            ..BvhConfig::default()
        };
        let bvh = Bvh::build(row_of_spheres(64), &config);
        let ray = Ray::new(Vec3f::new(-5.0, 0.0, 0.0), Vec3f::x()).unwrap();
        let mut stats = TraversalStats::default();
        let (id, t) = bvh.closest_hit(&ray, &mut stats).unwrap();
        assert_eq!(id, PrimitiveId(0));
        assert!((t - 4.0).abs() < 1e-9);
        // the near-first walk should not have to open most of the tree
        assert!(stats.primitives_tested < 64);
    }

    #[test]
    fn shared_center_still_splits() {
        let material = Arc::new(Material::diffuse(Vec3f::new(0.5, 0.5, 0.5)));
        let mut arena = PrimitiveArena::new();
        for i in 1..=20 {
            arena.push(Primitive::new(
                Object3D::sphere(Vec3f::zeros(), i as Fp),
                material.clone(),
            ));
        }
        let config = BvhConfig::default();
        assert!(arena.len() > config.bin_threshold);
        let bvh = Bvh::build(arena, &config);
        let root = bvh.root().unwrap();
        assert!(matches!(root, BvhNode::Internal { .. }));
        assert_eq!(root.item_count(), 20);
    }

    #[test]
    fn opaque_surface_hides_what_is_behind() {
        let bvh = Bvh::build(row_of_spheres(10), &BvhConfig::default());
        let ray = Ray::new(Vec3f::new(-5.0, 0.0, 0.0), Vec3f::x()).unwrap();
        let mut stats = TraversalStats::default();
        let collection = bvh.intersect(&ray, &mut stats).unwrap();
        assert_eq!(collection.len(), 1);
        let distribution = bvh.trace(&ray, &mut stats).unwrap();
        assert!(distribution.single_solution());
        assert!((distribution.domain_start() - 4.0).abs() < 1e-9);
    }
}
