//! Free-fly camera for the black-hole view.
//!
//! The view direction is stored as polar (elevation above the xy plane) and
//! azimuth angles, so looking up and down is clamped short of the poles and
//! the horizon never flips. `+z` is up.

use std::f32::consts::FRAC_PI_2;

use glam::Vec3;

use blackhole_core::CameraConfig;
use blackhole_platform::ControlSnapshot;

/// Largest elevation angle reachable with the arrow keys.
pub const MAX_POLAR_ANGLE: f32 = FRAC_PI_2 - 0.05;

#[derive(Clone, Debug)]
pub struct Camera {
    position: Vec3,
    direction: Vec3,
    polar_angle: f32,
    azimuth_angle: f32,
    speed: f32,
    rotation_speed: f32,
    /// Vertical field of view in degrees.
    fov: f32,
}

impl Camera {
    /// Creates a camera looking along `direction`, which need not be normalized.
    pub fn new(position: Vec3, direction: Vec3, speed: f32, rotation_speed: f32, fov: f32) -> Self {
        let direction = direction.normalize_or(Vec3::X);
        Self {
            position,
            direction,
            polar_angle: direction.z.clamp(-1.0, 1.0).asin(),
            azimuth_angle: direction.y.atan2(direction.x),
            speed,
            rotation_speed,
            fov,
        }
    }

    pub fn from_config(config: &CameraConfig) -> Self {
        Self::new(
            Vec3::from_array(config.position),
            Vec3::from_array(config.direction),
            config.speed,
            config.rotation_speed,
            config.fov,
        )
    }

    /// Applies one frame of input held for `dt` seconds.
    ///
    /// Rotation is applied first, so movement follows the new direction.
    pub fn update(&mut self, controls: &ControlSnapshot, dt: f32) {
        let turn = self.rotation_speed * dt;
        if controls.look_up {
            self.polar_angle = (self.polar_angle + turn).clamp(-MAX_POLAR_ANGLE, MAX_POLAR_ANGLE);
        }
        if controls.look_down {
            self.polar_angle = (self.polar_angle - turn).clamp(-MAX_POLAR_ANGLE, MAX_POLAR_ANGLE);
        }
        if controls.look_left {
            self.azimuth_angle += turn;
        }
        if controls.look_right {
            self.azimuth_angle -= turn;
        }

        let (sin_p, cos_p) = self.polar_angle.sin_cos();
        let (sin_a, cos_a) = self.azimuth_angle.sin_cos();
        self.direction = Vec3::new(cos_p * cos_a, cos_p * sin_a, sin_p);

        let step = self.speed * dt;
        let forward = Vec3::new(self.direction.x, self.direction.y, 0.0).normalize_or_zero();
        let right = Vec3::new(self.direction.y, -self.direction.x, 0.0).normalize_or_zero();

        if controls.forward {
            self.position += forward * step;
        }
        if controls.backward {
            self.position -= forward * step;
        }
        if controls.strafe_left {
            self.position -= right * step;
        }
        if controls.strafe_right {
            self.position += right * step;
        }
        if controls.rise {
            self.position += Vec3::Z * step;
        }
        if controls.sink {
            self.position -= Vec3::Z * step;
        }
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Unit view direction.
    #[inline]
    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    #[inline]
    pub fn fov(&self) -> f32 {
        self.fov
    }

    pub fn polar_angle(&self) -> f32 {
        self.polar_angle
    }

    pub fn azimuth_angle(&self) -> f32 {
        self.azimuth_angle
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::from_config(&CameraConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn camera() -> Camera {
        Camera::new(Vec3::ZERO, Vec3::X, 2.0, 1.0, 90.0)
    }

    #[test]
    fn test_angles_from_direction() {
        let camera = Camera::new(Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0), 1.0, 1.0, 90.0);
        assert!((camera.azimuth_angle() - FRAC_PI_2).abs() < EPS);
        assert!(camera.polar_angle().abs() < EPS);
        assert!((camera.direction().length() - 1.0).abs() < EPS);
    }

    #[test]
    fn test_forward_moves_along_horizontal_direction() {
        let mut camera = Camera::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 1.0), 2.0, 1.0, 90.0);
        let controls = ControlSnapshot {
            forward: true,
            ..Default::default()
        };
        camera.update(&controls, 0.5);
        assert!((camera.position() - Vec3::new(1.0, 0.0, 0.0)).length() < EPS);
    }

    #[test]
    fn test_strafe_and_rise() {
        let mut camera = camera();
        let controls = ControlSnapshot {
            strafe_right: true,
            rise: true,
            ..Default::default()
        };
        camera.update(&controls, 1.0);
        // Looking along +x, right is -y.
        assert!((camera.position() - Vec3::new(0.0, -2.0, 2.0)).length() < EPS);
    }

    #[test]
    fn test_polar_angle_is_clamped() {
        let mut camera = camera();
        let controls = ControlSnapshot {
            look_up: true,
            ..Default::default()
        };
        camera.update(&controls, 10.0);
        assert!((camera.polar_angle() - MAX_POLAR_ANGLE).abs() < EPS);
        assert!(camera.direction().z < 1.0);
    }

    #[test]
    fn test_look_left_turns_counter_clockwise() {
        let mut camera = camera();
        let controls = ControlSnapshot {
            look_left: true,
            ..Default::default()
        };
        camera.update(&controls, FRAC_PI_2);
        assert!((camera.direction() - Vec3::Y).length() < EPS);
    }

    #[test]
    fn test_idle_frame_keeps_state() {
        let mut camera = Camera::default();
        let before = (camera.position(), camera.direction());
        camera.update(&ControlSnapshot::default(), 1.0);
        assert_eq!(camera.position(), before.0);
        assert!((camera.direction() - before.1).length() < EPS);
    }
}
