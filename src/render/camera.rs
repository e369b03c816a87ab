// SPDX-License-Identifier: GPL-3.0-only

//! Virtual camera for the 3D mesh views

use crate::constants::camera::*;
use glam::{Mat4, Quat, Vec3};

/// Look-direction camera in the device's camera space (y down, z forward)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    /// Unit look direction
    pub view: Vec3,
    /// Unit up vector
    pub up: Vec3,
    pub fovy_deg: f32,
    pub z_near: f32,
    pub z_far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::ZERO,
            view: Vec3::Z,
            up: Vec3::NEG_Y,
            fovy_deg: DEFAULT_FOVY_DEG,
            z_near: DEFAULT_Z_NEAR,
            z_far: DEFAULT_Z_FAR,
        }
    }
}

impl Camera {
    /// Back to the device's viewpoint
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn right(&self) -> Vec3 {
        self.view.cross(self.up).normalize_or_zero()
    }

    /// Rotate the look direction by a mouse drag of (`dx`, `dy`) pixels
    pub fn rotate(&mut self, dx: f32, dy: f32) {
        let yaw = Quat::from_axis_angle(self.up, -dx * ROTATE_SPEED);
        let view = (yaw * self.view).normalize();

        let right = view.cross(self.up).normalize_or_zero();
        let pitched = (Quat::from_axis_angle(right, -dy * ROTATE_SPEED) * view).normalize();
        // Reject pitch that would tip the view past the pole
        let elevation = pitched.dot(self.up).clamp(-1.0, 1.0).asin();
        self.view = if elevation.abs() <= PITCH_LIMIT {
            pitched
        } else {
            view
        };
    }

    /// Move the eye in the view plane by a mouse drag of (`dx`, `dy`) pixels
    pub fn pan(&mut self, dx: f32, dy: f32) {
        let right = self.right();
        self.eye += right * (-dx * PAN_SPEED) + self.up * (dy * PAN_SPEED);
    }

    /// Move the eye along the look direction
    pub fn dolly(&mut self, meters: f32) {
        self.eye += self.view * meters;
    }

    pub fn set_fovy(&mut self, fovy_deg: f32) {
        self.fovy_deg = fovy_deg.clamp(FOVY_RANGE_DEG.0, FOVY_RANGE_DEG.1);
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.eye, self.view, self.up)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        let aspect = if aspect.is_finite() && aspect > 0.0 {
            aspect
        } else {
            1.0
        };
        Mat4::perspective_rh(self.fovy_deg.to_radians(), aspect, self.z_near, self.z_far)
    }

    /// Combined view-projection matrix
    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_default_sees_points_in_front() {
        let camera = Camera::default();
        let clip = camera.view_projection(4.0 / 3.0) * Vec4::new(0.0, 0.0, 2.0, 1.0);
        let ndc = clip / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn test_camera_space_y_down_maps_to_screen_down() {
        let camera = Camera::default();
        let clip = camera.view_projection(1.0) * Vec4::new(0.0, 0.5, 2.0, 1.0);
        // Positive camera y is below the centre of the screen (negative NDC y)
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn test_fovy_clamped() {
        let mut camera = Camera::default();
        camera.set_fovy(500.0);
        assert_eq!(camera.fovy_deg, FOVY_RANGE_DEG.1);
        camera.set_fovy(0.0);
        assert_eq!(camera.fovy_deg, FOVY_RANGE_DEG.0);
    }

    #[test]
    fn test_dolly_moves_along_view() {
        let mut camera = Camera::default();
        camera.dolly(0.5);
        assert_eq!(camera.eye, Vec3::new(0.0, 0.0, 0.5));
        camera.dolly(-1.0);
        assert_eq!(camera.eye, Vec3::new(0.0, 0.0, -0.5));
    }

    #[test]
    fn test_rotate_keeps_unit_view_and_pitch_limit() {
        let mut camera = Camera::default();
        camera.rotate(120.0, 0.0);
        assert!((camera.view.length() - 1.0).abs() < 1e-5);
        assert!(camera.view.x.abs() > 0.1);

        for _ in 0..1000 {
            camera.rotate(0.0, 50.0);
        }
        assert!(camera.view.dot(camera.up).asin().abs() <= PITCH_LIMIT + 1e-4);
    }

    #[test]
    fn test_pan_moves_eye_only() {
        let mut camera = Camera::default();
        camera.pan(100.0, 0.0);
        assert!(camera.eye.x != 0.0);
        assert_eq!(camera.view, Vec3::Z);

        camera.reset();
        assert_eq!(camera, Camera::default());
    }
}
