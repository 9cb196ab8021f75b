//! Spatial splits. Besides partitioning objects, a node may cut space along
//! its longest axis and clip every object that straddles the cut into two
//! fragments. Fragments are unbounded: every straddler is duplicated.

use crate::aabb::Aabb;
use crate::bvh::{find_object_split, Bvh, Split, SplitStrategy};
use crate::config::BvhConfig;
use crate::geometry::Fp;
use crate::scene::{surface_area_heuristic, Aggregate, PrimitiveArena, SceneObject};

pub fn build_sbvh(primitives: PrimitiveArena, config: &BvhConfig) -> Bvh {
    Bvh::build_with(primitives, config, SplitStrategy::Spatial)
}

/// Cheaper of the best object split and the best spatial split.
pub fn find_split(items: &Aggregate, arena: &PrimitiveArena, config: &BvhConfig) -> Option<Split> {
    let object_split = find_object_split(items, config);
    let spatial_split = find_spatial_split(items, arena, config);
    match (object_split, spatial_split) {
        (Some(object), Some(spatial)) => {
            if spatial.cost < object.cost {
                Some(spatial)
            } else {
                Some(object)
            }
        }
        (object, spatial) => object.or(spatial),
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct SpatialBin {
    bounds: Aabb,
    enter: usize,
    exit: usize,
}

struct SpatialBinning {
    axis: usize,
    origin: Fp,
    width: Fp,
    count: usize,
    end: Fp,
}

impl SpatialBinning {
    fn bin_of(&self, x: Fp) -> usize {
        (((x - self.origin) / self.width).floor().max(0.0) as usize).min(self.count - 1)
    }

    fn plane(&self, i: usize) -> Fp {
        if i >= self.count {
            self.end
        } else {
            self.origin + self.width * i as Fp
        }
    }

    fn range_of(&self, item: &SceneObject) -> (usize, usize) {
        let bounds = item.bounds();
        (
            self.bin_of(bounds.min[self.axis]),
            self.bin_of(bounds.max[self.axis]),
        )
    }
}

pub fn find_spatial_split(
    items: &Aggregate,
    arena: &PrimitiveArena,
    config: &BvhConfig,
) -> Option<Split> {
    let bounds = items.bounds();
    let axis = bounds.longest_axis();
    let size = bounds.size()[axis];
    if !(size > 0.0) || config.spatial_bin_count < 2 {
        return None;
    }
    let binning = SpatialBinning {
        axis,
        origin: bounds.min[axis],
        width: size / config.spatial_bin_count as Fp,
        count: config.spatial_bin_count,
        end: bounds.max[axis],
    };

    let mut bins = vec![SpatialBin::default(); binning.count];
    for item in items.items() {
        let (first, last) = binning.range_of(item);
        bins[first].enter += 1;
        bins[last].exit += 1;
        for (i, bin) in bins.iter_mut().enumerate().take(last + 1).skip(first) {
            let chopped = if first == last {
                Some(*item)
            } else {
                item.clip(arena, axis, binning.plane(i), binning.plane(i + 1))
            };
            if let Some(chopped) = chopped {
                bin.bounds = bin.bounds.extend_aabb(chopped.bounds());
            }
        }
    }

    let mut right = vec![SpatialBin::default(); binning.count];
    let mut acc = SpatialBin::default();
    for i in (0..binning.count).rev() {
        acc.bounds = acc.bounds.extend_aabb(&bins[i].bounds);
        acc.exit += bins[i].exit;
        right[i] = acc;
    }

    let mut best: Option<(usize, Fp)> = None;
    let mut left = SpatialBin::default();
    for i in 1..binning.count {
        left.bounds = left.bounds.extend_aabb(&bins[i - 1].bounds);
        left.enter += bins[i - 1].enter;
        if left.enter == 0 || right[i].exit == 0 {
            continue;
        }
        let cost = surface_area_heuristic(config, left.enter, &left.bounds)
            + surface_area_heuristic(config, right[i].exit, &right[i].bounds);
        if best.map_or(true, |(_, best_cost)| cost < best_cost) {
            best = Some((i, cost));
        }
    }
    let (split_bin, _) = best?;

    let plane = binning.plane(split_bin);
    let mut left = Aggregate::new();
    let mut right = Aggregate::new();
    for item in items.items() {
        let (first, last) = binning.range_of(item);
        if last < split_bin {
            left.add(*item);
        } else if first >= split_bin {
            right.add(*item);
        } else {
            if let Some(fragment) = item.clip(arena, axis, bounds.min[axis], plane) {
                left.add(fragment);
            }
            if let Some(fragment) = item.clip(arena, axis, plane, bounds.max[axis]) {
                right.add(fragment);
            }
        }
    }
    if left.is_empty() || right.is_empty() {
        return None;
    }
    Some(Split::new(left, right, axis, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Object3D, Vec3f};
    use crate::materials::Material;
    use crate::scene::{Primitive, PrimitiveId};
    use std::sync::Arc;

    // a long diagonal sliver crossing a cluster of small triangles is the
    // textbook case where clipping beats any object partition
    fn sliver_scene() -> PrimitiveArena {
        let material = Arc::new(Material::diffuse(Vec3f::new(0.5, 0.5, 0.5)));
        let mut arena = PrimitiveArena::new();
        arena.push(Primitive::new(
            Object3D::triangle(
                Vec3f::new(0.0, 0.0, 0.0),
                Vec3f::new(100.0, 100.0, 0.0),
                Vec3f::new(100.0, 100.1, 0.0),
            ),
            material.clone(),
        ));
        for i in 0..20 {
            let offset = i as Fp * 5.0;
            arena.push(Primitive::new(
                Object3D::triangle(
                    Vec3f::new(offset, offset, 0.0),
                    Vec3f::new(offset + 1.0, offset, 0.0),
                    Vec3f::new(offset, offset + 1.0, 0.0),
                ),
                material.clone(),
            ));
        }
        arena
    }

    #[test]
    fn straddling_sliver_is_fragmented() {
        let arena = sliver_scene();
        let items = arena.scene_objects().into_iter().collect::<Aggregate>();
        let split = find_spatial_split(&items, &arena, &BvhConfig::default()).unwrap();
        let fragments = split
            .left
            .items()
            .iter()
            .chain(split.right.items())
            .filter(|item| matches!(item, SceneObject::Fragment(_)))
            .count();
        assert!(fragments >= 2);
        assert!(split.left.len() + split.right.len() > items.len());
        let sliver = PrimitiveId(0);
        assert!(split.left.items().iter().any(|item| item.primitive() == sliver));
        assert!(split.right.items().iter().any(|item| item.primitive() == sliver));
        assert!(split.left.bounds().max[split.axis] <= split.right.bounds().min[split.axis] + 1e-9);
    }

    #[test]
    fn spatial_split_is_never_worse_than_object_split() {
        let arena = sliver_scene();
        let items = arena.scene_objects().into_iter().collect::<Aggregate>();
        let config = BvhConfig::default();
        let chosen = find_split(&items, &arena, &config).unwrap();
        let object = find_object_split(&items, &config).unwrap();
        assert!(chosen.cost <= object.cost);
    }
}
