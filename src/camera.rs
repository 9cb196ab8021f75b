use std::f64::consts::PI;

use crate::error::TraceError;
use crate::geometry::{normalize_checked, Fp, Ray, Vec2f, Vec3f};

pub trait Camera: Send + Sync {
    /// Primary ray through `film_position` in `[0, 1]^2`, with `lens_offset`
    /// in `[0, 1]^2` choosing the point on the aperture.
    fn get_camera_ray(&self, film_position: &Vec2f, lens_offset: &Vec2f) -> Result<Ray, TraceError>;
}

#[derive(Clone, Debug)]
pub struct PinholeCamera {
    pub position: Vec3f,
    pub forward: Vec3f,
    pub right: Vec3f,
    pub up: Vec3f,
    pub fov_x: Fp,
    pub fov_y: Fp,
    /// Lens radius. Zero gives a pinhole.
    pub aperture: Fp,
    pub focus_distance: Fp,
}

impl PinholeCamera {
    pub fn look_at(
        position: Vec3f,
        target: Vec3f,
        up: Vec3f,
        fov_x: Fp,
        width: u32,
        height: u32,
    ) -> Result<PinholeCamera, TraceError> {
        let forward = normalize_checked(&(target - position))?;
        let right = normalize_checked(&forward.cross(&up))?;
        let up = right.cross(&forward);
        let fov_y = ((fov_x / 2.0).tan() * height as Fp / width as Fp).atan() * 2.0;
        Ok(PinholeCamera {
            position,
            forward,
            right,
            up,
            fov_x,
            fov_y,
            aperture: 0.0,
            focus_distance: (target - position).norm(),
        })
    }

    pub fn with_aperture(mut self, aperture: Fp, focus_distance: Fp) -> PinholeCamera {
        self.aperture = aperture;
        self.focus_distance = focus_distance;
        self
    }
}

impl Camera for PinholeCamera {
    fn get_camera_ray(&self, film_position: &Vec2f, lens_offset: &Vec2f) -> Result<Ray, TraceError> {
        let px = (2.0 * film_position.x - 1.0) * (self.fov_x * 0.5).tan();
        let py = -(2.0 * film_position.y - 1.0) * (self.fov_y * 0.5).tan();
        let direction = px * self.right + py * self.up + self.forward;
        if self.aperture <= 0.0 {
            return Ray::new(self.position, direction);
        }
        let focus = self.position + normalize_checked(&direction)? * self.focus_distance;
        let radius = self.aperture * lens_offset.x.sqrt();
        let angle = 2.0 * PI * lens_offset.y;
        let origin =
            self.position + self.right * (radius * angle.cos()) + self.up * (radius * angle.sin());
        Ray::new(origin, focus - origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> PinholeCamera {
        PinholeCamera::look_at(
            Vec3f::zeros(),
            Vec3f::new(0.0, 0.0, 5.0),
            Vec3f::y(),
            PI / 2.0,
            200,
            100,
        )
        .unwrap()
    }

    #[test]
    fn film_center_looks_forward() {
        let ray = camera()
            .get_camera_ray(&Vec2f::new(0.5, 0.5), &Vec2f::zeros())
            .unwrap();
        assert!((ray.direction - Vec3f::z()).norm() < 1e-12);
    }

    #[test]
    fn film_corner_matches_field_of_view() {
        let camera = camera();
        let ray = camera
            .get_camera_ray(&Vec2f::new(1.0, 0.5), &Vec2f::zeros())
            .unwrap();
        let angle = ray.direction.dot(&camera.forward).acos();
        assert!((angle - PI / 4.0).abs() < 1e-9);
        let top = camera
            .get_camera_ray(&Vec2f::new(0.5, 0.0), &Vec2f::zeros())
            .unwrap();
        assert!(top.direction.dot(&camera.up) > 0.0);
    }

    #[test]
    fn lens_rays_meet_at_focus() {
        let camera = camera().with_aperture(0.5, 5.0);
        let ray = camera
            .get_camera_ray(&Vec2f::new(0.5, 0.5), &Vec2f::new(1.0, 0.25))
            .unwrap();
        assert!((ray.origin - camera.position).norm() > 0.1);
        let t = (5.0 - ray.origin.z) / ray.direction.z;
        assert!(ray.travel(t).xy().norm() < 1e-9);
    }
}
