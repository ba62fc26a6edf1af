use egui::Context;
use glam::{vec2, vec3a, vec4, Mat4, Quat, Vec2, Vec3A, Vec4};

use crate::buffers::{Ray, RayCamera};
use crate::geometry::Aabb;

pub struct Camera {
    pub position: Vec3A,
    pub direction: Vec3A,
    pub ray_directions: Vec<Ray>,

    near_clip: f32,
    far_clip: f32,
    vertical_fov: f32,

    pub viewport_width: u32,
    pub viewport_height: u32,

    pub movement_speed: f32,
    turning_speed: f32,

    projection: Mat4,
    inverse_projection: Mat4,
    view: Mat4,
    inverse_view: Mat4,
}

impl Camera {
    pub fn new(width: u32, height: u32) -> Camera {
        let mut camera = Camera {
            position: vec3a(0.0, 0.0, 3.0),
            direction: vec3a(0.0, 0.0, -1.0),
            ray_directions: vec![],

            viewport_width: width,
            viewport_height: height,

            near_clip: 0.1,
            far_clip: 100.0,
            vertical_fov: 45.0,

            movement_speed: 0.05,
            turning_speed: 0.003,

            projection: Mat4::IDENTITY,
            inverse_projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            inverse_view: Mat4::IDENTITY,
        };

        camera.recalculate_projection();
        camera.recalculate_view();
        camera.recalculate_ray_directions();
        camera
    }

    /// Default placement derived from the scene bounds: above and behind the
    /// geometry, looking at its center.
    pub fn frame_bounds(&mut self, bounds: &Aabb) {
        let center = bounds.center();
        let extent = bounds.extent();

        self.position = center + vec3a(0.0, 1.5 * extent.y, 1.5 * extent.z);
        self.direction = (center - self.position)
            .try_normalize()
            .unwrap_or(vec3a(0.0, 0.0, -1.0));

        self.recalculate_view();
        self.recalculate_ray_directions();
    }

    pub fn pose(&self) -> RayCamera {
        RayCamera {
            origin: self.position.into(),
            _padding: [0; 4],
        }
    }

    /// WASD movement plus mouse look while the right button is held.
    /// Returns whether the pose changed so the caller can reset accumulation.
    pub fn on_update(&mut self, egui_context: &Context, timestep: f32) -> bool {
        let up_direction = Vec3A::Y;
        let right_direction = self.direction.cross(up_direction);

        let mut moved = false;

        egui_context.input(|input: &egui::InputState| {
            if input.key_down(egui::Key::W) {
                self.position += timestep * self.movement_speed * self.direction;
                moved = true;
            } else if input.key_down(egui::Key::S) {
                self.position -= timestep * self.movement_speed * self.direction;
                moved = true;
            }

            if input.key_down(egui::Key::D) {
                self.position += timestep * self.movement_speed * right_direction;
                moved = true;
            } else if input.key_down(egui::Key::A) {
                self.position -= timestep * self.movement_speed * right_direction;
                moved = true;
            }
        });

        let mouse_delta = egui_context.input(|input: &egui::InputState| {
            if input.pointer.secondary_down() {
                input.pointer.delta()
            } else {
                egui::Vec2::ZERO
            }
        });

        if mouse_delta != egui::Vec2::ZERO {
            let pitch_delta: f32 = mouse_delta.y * self.turning_speed;
            let yaw_delta: f32 = mouse_delta.x * self.turning_speed;

            let right_rotation = Quat::from_axis_angle(right_direction.into(), -pitch_delta);
            let up_rotation = Quat::from_axis_angle(up_direction.into(), -yaw_delta);

            let rotation: Quat = (right_rotation * up_rotation).normalize();
            self.direction = rotation.mul_vec3(self.direction.into()).into();

            moved = true;
        }

        if moved {
            self.recalculate_view();
            self.recalculate_ray_directions();
        }

        moved
    }

    fn recalculate_projection(&mut self) {
        let fov_rad: f32 = self.vertical_fov.to_radians();
        let aspect_ratio = self.viewport_width as f32 / self.viewport_height as f32;
        self.projection =
            Mat4::perspective_rh_gl(fov_rad, aspect_ratio, self.near_clip, self.far_clip);

        self.inverse_projection = self.projection.inverse();
    }

    fn recalculate_view(&mut self) {
        self.view = Mat4::look_at_rh(
            self.position.into(),
            (self.position + self.direction).into(),
            glam::Vec3::Y,
        );
        self.inverse_view = self.view.inverse();
    }

    /// Converts normalized -1..1 screen coordinates into worldspace ray
    /// directions, rebuilt only on move or resize.
    pub fn recalculate_ray_directions(&mut self) {
        self.ray_directions.clear();
        self.ray_directions
            .reserve((self.viewport_width * self.viewport_height) as usize);

        for y in 0..self.viewport_height {
            let y_coord = y as f32 / self.viewport_height as f32;
            for x in 0..self.viewport_width {
                let x_coord = x as f32 / self.viewport_width as f32;

                let normalized_coord = vec2(x_coord, y_coord) * 2.0 - Vec2::ONE;

                let target: Vec4 = self.inverse_projection
                    * vec4(normalized_coord.x, normalized_coord.y, 1.0, 1.0);

                let target_vec3: Vec3A = target.truncate().into();

                let world_space_target: Vec4 = (target_vec3 / target.w).normalize().extend(0.0);

                let ray_direction: Vec3A =
                    (self.inverse_view * world_space_target).truncate().into();

                self.ray_directions.push(Ray {
                    direction: ray_direction.into(),
                    _padding: [0; 4],
                });
            }
        }
    }

    pub fn on_resize(&mut self, width: u32, height: u32) {
        if width == self.viewport_width && height == self.viewport_height {
            return;
        }

        self.viewport_width = width;
        self.viewport_height = height;

        self.recalculate_projection();
        self.recalculate_ray_directions();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_ray_per_pixel() {
        let camera = Camera::new(8, 6);
        assert_eq!(camera.ray_directions.len(), 48);
    }

    #[test]
    fn resize_rebuilds_the_ray_grid() {
        let mut camera = Camera::new(8, 6);
        camera.on_resize(4, 4);
        assert_eq!(camera.ray_directions.len(), 16);
        assert_eq!(camera.viewport_width, 4);
        assert_eq!(camera.viewport_height, 4);
    }

    #[test]
    fn frame_bounds_places_eye_above_and_behind() {
        let mut camera = Camera::new(4, 4);
        let bounds = Aabb {
            min: vec3a(-1.0, -1.0, -1.0),
            max: vec3a(1.0, 1.0, 1.0),
        };

        camera.frame_bounds(&bounds);

        assert_eq!(camera.position, vec3a(0.0, 3.0, 3.0));
        let expected = (bounds.center() - camera.position).normalize();
        assert!((camera.direction - expected).length() < 1e-6);
        assert!((camera.direction.length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ray_directions_are_unit_length() {
        let camera = Camera::new(4, 4);
        for ray in &camera.ray_directions {
            let d = Vec3A::from(ray.direction);
            assert!((d.length() - 1.0).abs() < 1e-4);
        }
    }
}
