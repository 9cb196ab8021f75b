use arrayvec::ArrayVec;
use nalgebra::{UnitQuaternion, Vector2, Vector3};

use crate::aabb::Aabb;
use crate::error::TraceError;
use crate::utils::safe_sqrt;

pub type Fp = f64;
pub type Vec3f = Vector3<Fp>;
pub type Vec2f = Vector2<Fp>;

pub static FP_INF: Fp = Fp::INFINITY;
pub static FP_NEG_INF: Fp = Fp::NEG_INFINITY;

/// Half-line with a unit direction. `inv_direction` and `sign` are cached for slab tests.
///
/// `length` is fixed at construction: traversal threads its own best-hit bound
/// instead of shrinking the ray.
#[derive(Clone, Debug)]
pub struct Ray {
    pub origin: Vec3f,
    pub direction: Vec3f,
    pub inv_direction: Vec3f,
    pub sign: [usize; 3],
    pub length: Fp,
}

impl Ray {
    pub fn new(origin: Vec3f, direction: Vec3f) -> Result<Ray, TraceError> {
        check_finite("ray origin", &origin)?;
        let direction = normalize_checked(&direction)?;
        Ok(Ray::from_unit(origin, direction))
    }

    // `direction` must already be unit length
    fn from_unit(origin: Vec3f, direction: Vec3f) -> Ray {
        let inv_direction = direction.map(|d| 1.0 / d);
        let sign = [
            (inv_direction.x < 0.0) as usize,
            (inv_direction.y < 0.0) as usize,
            (inv_direction.z < 0.0) as usize,
        ];
        Ray {
            origin,
            direction,
            inv_direction,
            sign,
            length: FP_INF,
        }
    }

    pub fn with_length(mut self, length: Fp) -> Ray {
        self.length = length;
        self
    }

    pub fn travel(&self, distance: Fp) -> Vec3f {
        self.origin + self.direction * distance
    }
}

pub fn normalize_checked(v: &Vec3f) -> Result<Vec3f, TraceError> {
    let norm = v.norm();
    if norm.is_finite() && norm > 0.0 {
        Ok(v / norm)
    } else {
        Err(TraceError::DegenerateDirection(*v))
    }
}

pub fn check_finite(what: &'static str, v: &Vec3f) -> Result<(), TraceError> {
    if v.iter().all(|c| c.is_finite()) {
        Ok(())
    } else {
        Err(TraceError::NonFinite { what, value: *v })
    }
}

pub fn get_reflection_ray(ray: &Vec3f, normal: &Vec3f) -> Vec3f {
    let projection = -ray.dot(normal);
    ray + normal * projection * 2.0
}

/// Where a ray enters and leaves a shape. `entry` may lie behind the origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShapeInterval {
    pub entry: Fp,
    pub exit: Fp,
}

#[derive(Clone, Debug)]
pub enum Shape3D {
    Ellipsoid { r: Vec3f },
    Box { s: Vec3f },
    Triangle { a: Vec3f, b: Vec3f, c: Vec3f },
}

#[derive(Clone, Debug)]
pub struct Object3D {
    pub shape: Shape3D,
    pub position: Vec3f,
    pub rotation: UnitQuaternion<Fp>,
}

impl Object3D {
    pub fn sphere(center: Vec3f, radius: Fp) -> Object3D {
        Object3D {
            shape: Shape3D::Ellipsoid {
                r: Vec3f::new(radius, radius, radius),
            },
            position: center,
            rotation: UnitQuaternion::identity(),
        }
    }

    pub fn axis_aligned_box(min: Vec3f, max: Vec3f) -> Object3D {
        Object3D {
            shape: Shape3D::Box { s: (max - min) * 0.5 },
            position: (max + min) * 0.5,
            rotation: UnitQuaternion::identity(),
        }
    }

    pub fn triangle(a: Vec3f, b: Vec3f, c: Vec3f) -> Object3D {
        Object3D {
            shape: Shape3D::Triangle { a, b, c },
            position: Vec3f::zeros(),
            rotation: UnitQuaternion::identity(),
        }
    }

    fn to_local(&self, point: &Vec3f) -> Vec3f {
        self.rotation.inverse_transform_vector(&(point - self.position))
    }

    fn to_world(&self, point: &Vec3f) -> Vec3f {
        self.rotation.transform_vector(point) + self.position
    }

    /// Tightest axis-aligned box around the object.
    pub fn bounding_box(&self) -> Aabb {
        let rotation = self.rotation.to_rotation_matrix();
        let m = rotation.matrix();
        match &self.shape {
            Shape3D::Ellipsoid { r } => {
                let half = Vec3f::from_fn(|i, _| {
                    safe_sqrt((0..3).map(|j| (m[(i, j)] * r[j]).powi(2)).sum())
                });
                Aabb::new(self.position - half, self.position + half)
            }
            Shape3D::Box { s } => {
                let half = Vec3f::from_fn(|i, _| (0..3).map(|j| m[(i, j)].abs() * s[j]).sum());
                Aabb::new(self.position - half, self.position + half)
            }
            Shape3D::Triangle { a, b, c } => {
                Aabb::from_points([self.to_world(a), self.to_world(b), self.to_world(c)])
            }
        }
    }

    /// Crossing interval of the whole line through `ray`, ignoring its bounds.
    pub fn intersect(&self, ray: &Ray) -> Option<ShapeInterval> {
        let origin = self.to_local(&ray.origin);
        let direction = self.rotation.inverse_transform_vector(&ray.direction);
        match &self.shape {
            Shape3D::Ellipsoid { r } => {
                let d1 = direction.component_div(r);
                let o1 = origin.component_div(r);
                let a = d1.dot(&d1);
                let b = 2.0 * o1.dot(&d1);
                let c = o1.dot(&o1) - 1.0;
                let discr = b * b - 4.0 * a * c;
                if discr < 0.0 {
                    return None;
                }
                let x1 = (-b - discr.sqrt()) / (2.0 * a);
                let x2 = (-b + discr.sqrt()) / (2.0 * a);
                Some(ShapeInterval {
                    entry: Fp::min(x1, x2),
                    exit: Fp::max(x1, x2),
                })
            }
            Shape3D::Box { s } => {
                let local = Aabb::new(-s, *s);
                let local_ray = Ray::from_unit(origin, direction);
                local
                    .intersect(&local_ray)
                    .map(|(entry, exit)| ShapeInterval { entry, exit })
            }
            Shape3D::Triangle { a, b, c } => {
                // Möller-Trumbore
                let edge1 = b - a;
                let edge2 = c - a;
                let p = direction.cross(&edge2);
                let det = edge1.dot(&p);
                if det.abs() < 1e-12 {
                    return None;
                }
                let inv_det = 1.0 / det;
                let to_origin = origin - a;
                let u = to_origin.dot(&p) * inv_det;
                if !(0.0..=1.0).contains(&u) {
                    return None;
                }
                let q = to_origin.cross(&edge1);
                let v = direction.dot(&q) * inv_det;
                if v < 0.0 || u + v > 1.0 {
                    return None;
                }
                let t = edge2.dot(&q) * inv_det;
                Some(ShapeInterval { entry: t, exit: t })
            }
        }
    }

    /// Outward surface normal at a world position on (or very near) the surface.
    pub fn surface_normal(&self, position: &Vec3f) -> Vec3f {
        let local = self.to_local(position);
        let local_normal = match &self.shape {
            Shape3D::Ellipsoid { r } => local.component_div(r).component_div(r),
            Shape3D::Box { s } => {
                let scaled = local.component_div(s);
                let axis = scaled.iamax();
                let mut normal = Vec3f::zeros();
                normal[axis] = scaled[axis].signum();
                normal
            }
            Shape3D::Triangle { a, b, c } => (b - a).cross(&(c - a)),
        };
        let norm = local_normal.norm();
        if norm > 0.0 {
            self.rotation.transform_vector(&(local_normal / norm))
        } else {
            local_normal
        }
    }

    /// Bounds of the part of the object inside `bounds`, or `None` when nothing is left.
    ///
    /// Triangles are clipped as polygons so the result is tight; the volumes
    /// fall back to the box intersection.
    pub fn clip_bounds(&self, bounds: &Aabb) -> Option<Aabb> {
        match &self.shape {
            Shape3D::Triangle { a, b, c } => {
                let mut polygon = ArrayVec::<Vec3f, 16>::new();
                polygon.push(self.to_world(a));
                polygon.push(self.to_world(b));
                polygon.push(self.to_world(c));
                for axis in 0..3 {
                    polygon = clip_polygon(&polygon, axis, bounds.min[axis], true);
                    polygon = clip_polygon(&polygon, axis, bounds.max[axis], false);
                    if polygon.is_empty() {
                        return None;
                    }
                }
                Some(Aabb::from_points(polygon))
            }
            _ => self.bounding_box().intersection(bounds),
        }
    }
}

// Sutherland-Hodgman against a single axis-aligned plane. `keep_above` keeps
// the side with coordinates >= `plane`.
fn clip_polygon(
    polygon: &ArrayVec<Vec3f, 16>,
    axis: usize,
    plane: Fp,
    keep_above: bool,
) -> ArrayVec<Vec3f, 16> {
    let inside = |p: &Vec3f| {
        if keep_above {
            p[axis] >= plane
        } else {
            p[axis] <= plane
        }
    };
    let mut result = ArrayVec::new();
    for i in 0..polygon.len() {
        let current = polygon[i];
        let next = polygon[(i + 1) % polygon.len()];
        let (current_in, next_in) = (inside(&current), inside(&next));
        if current_in && !result.is_full() {
            result.push(current);
        }
        if current_in != next_in && !result.is_full() {
            let t = (plane - current[axis]) / (next[axis] - current[axis]);
            let mut crossing = current + (next - current) * t;
            crossing[axis] = plane;
            result.push(crossing);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotated_box_bounds_are_tight() {
        let object = Object3D {
            shape: Shape3D::Box {
                s: Vec3f::new(1.0, 1.0, 1.0),
            },
            position: Vec3f::zeros(),
            rotation: UnitQuaternion::from_axis_angle(&Vec3f::z_axis(), std::f64::consts::FRAC_PI_4),
        };
        let bounds = object.bounding_box();
        let expected = std::f64::consts::SQRT_2;
        assert!((bounds.max.x - expected).abs() < 1e-9);
        assert!((bounds.max.y - expected).abs() < 1e-9);
        assert!((bounds.max.z - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sphere_interval_from_inside() {
        let sphere = Object3D::sphere(Vec3f::zeros(), 2.0);
        let ray = Ray::new(Vec3f::zeros(), Vec3f::new(0.0, 0.0, 1.0)).unwrap();
        let interval = sphere.intersect(&ray).unwrap();
        assert!((interval.entry + 2.0).abs() < 1e-9);
        assert!((interval.exit - 2.0).abs() < 1e-9);
    }

    #[test]
    fn triangle_clip_is_tighter_than_box_clip() {
        let triangle = Object3D::triangle(
            Vec3f::new(0.0, 0.0, 0.0),
            Vec3f::new(4.0, 0.0, 0.0),
            Vec3f::new(0.0, 4.0, 0.0),
        );
        let slab = Aabb::new(Vec3f::new(3.0, -10.0, -10.0), Vec3f::new(10.0, 10.0, 10.0));
        let clipped = triangle.clip_bounds(&slab).unwrap();
        assert!((clipped.min.x - 3.0).abs() < 1e-9);
        assert!((clipped.max.y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_direction_is_rejected() {
        let ray = Ray::new(Vec3f::zeros(), Vec3f::zeros());
        assert!(matches!(ray, Err(TraceError::DegenerateDirection(_))));
    }
}
