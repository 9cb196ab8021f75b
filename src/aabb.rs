use crate::geometry::{Fp, Ray, Vec3f, FP_INF, FP_NEG_INF};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3f,
    pub max: Vec3f,
}

impl Default for Aabb {
    fn default() -> Self {
        Aabb {
            min: Vec3f::new(FP_INF, FP_INF, FP_INF),
            max: Vec3f::new(FP_NEG_INF, FP_NEG_INF, FP_NEG_INF),
        }
    }
}

impl Aabb {
    pub fn new(min: Vec3f, max: Vec3f) -> Aabb {
        Aabb { min, max }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3f>) -> Aabb {
        points
            .into_iter()
            .fold(Aabb::default(), |acc, point| acc.extend_point(point))
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    pub fn extend_point(&self, point: Vec3f) -> Aabb {
        Aabb {
            min: self.min.inf(&point),
            max: self.max.sup(&point),
        }
    }

    pub fn extend_aabb(&self, aabb: &Aabb) -> Aabb {
        Aabb {
            min: self.min.inf(&aabb.min),
            max: self.max.sup(&aabb.max),
        }
    }

    pub fn intersection(&self, aabb: &Aabb) -> Option<Aabb> {
        let result = Aabb {
            min: self.min.sup(&aabb.min),
            max: self.max.inf(&aabb.max),
        };
        (!result.is_empty()).then_some(result)
    }

    /// Restrict the box to `lo <= p[axis] <= hi`.
    pub fn clip_axis(&self, axis: usize, lo: Fp, hi: Fp) -> Option<Aabb> {
        let mut slab = Aabb::new(Vec3f::repeat(FP_NEG_INF), Vec3f::repeat(FP_INF));
        slab.min[axis] = lo;
        slab.max[axis] = hi;
        self.intersection(&slab)
    }

    pub fn size(&self) -> Vec3f {
        self.max - self.min
    }

    pub fn center(&self) -> Vec3f {
        (self.max + self.min) * 0.5
    }

    pub fn surface_area(&self) -> Fp {
        if self.is_empty() {
            return 0.0;
        }
        let diff = self.size();
        let x = diff.x;
        let y = diff.y;
        let z = diff.z;
        2.0 * (x * y + y * z + z * x)
    }

    pub fn longest_axis(&self) -> usize {
        let size = self.size();
        if size.x > size.y && size.x > size.z {
            0
        } else if size.y > size.z {
            1
        } else {
            2
        }
    }

    /// Slab test. Returns the parameter range of the whole line inside the box.
    pub fn intersect(&self, ray: &Ray) -> Option<(Fp, Fp)> {
        let bounds = [self.min, self.max];
        let mut t_enter = FP_NEG_INF;
        let mut t_exit = FP_INF;
        for axis in 0..3 {
            let near = (bounds[ray.sign[axis]][axis] - ray.origin[axis]) * ray.inv_direction[axis];
            let far =
                (bounds[1 - ray.sign[axis]][axis] - ray.origin[axis]) * ray.inv_direction[axis];
            // comparisons are written so that a NaN (axis-parallel ray exactly on a face) is skipped
            if near > t_enter {
                t_enter = near;
            }
            if far < t_exit {
                t_exit = far;
            }
        }
        (t_enter <= t_exit).then_some((t_enter, t_exit))
    }

    /// Whether the ray reaches the box somewhere in `[0, bound]`.
    pub fn hit_within(&self, ray: &Ray, bound: Fp) -> bool {
        matches!(self.intersect(ray), Some((t_enter, t_exit)) if t_exit >= 0.0 && t_enter <= bound)
    }
}
