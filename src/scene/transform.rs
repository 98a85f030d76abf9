//! Local transform state

use super::ObjectId;
use glam::{EulerRot, Mat4, Quat, Vec3};

/// Local position, rotation and scale of a GameObject plus its parent link
///
/// World values are never stored. They are derived by the
/// [`GameObjectManager`](super::GameObjectManager) walking the parent chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub local_position: Vec3,
    pub local_rotation: Quat,
    pub local_scale: Vec3,
    pub(crate) parent: Option<ObjectId>,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            local_position: Vec3::ZERO,
            local_rotation: Quat::IDENTITY,
            local_scale: Vec3::ONE,
            parent: None,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            local_position: position,
            ..Default::default()
        }
    }

    /// Create transform from position, rotation (euler angles in radians), and scale
    pub fn from_components(position: Vec3, rotation_euler: Vec3, scale: Vec3) -> Self {
        Self {
            local_position: position,
            local_rotation: Quat::from_euler(
                EulerRot::XYZ,
                rotation_euler.x,
                rotation_euler.y,
                rotation_euler.z,
            ),
            local_scale: scale,
            parent: None,
        }
    }

    /// Parent object, if any. Changed through `GameObjectManager::set_parent`.
    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    /// Scale, then rotate, then translate
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(
            self.local_scale,
            self.local_rotation,
            self.local_position,
        )
    }

    /// Local rotation as XYZ euler angles in degrees
    pub fn local_euler_degrees(&self) -> Vec3 {
        let (x, y, z) = self.local_rotation.to_euler(EulerRot::XYZ);
        Vec3::new(x.to_degrees(), y.to_degrees(), z.to_degrees())
    }

    pub fn set_local_euler_degrees(&mut self, degrees: Vec3) {
        self.local_rotation = Quat::from_euler(
            EulerRot::XYZ,
            degrees.x.to_radians(),
            degrees.y.to_radians(),
            degrees.z.to_radians(),
        );
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.local_position += offset;
    }

    /// Rotate around an axis
    pub fn rotate_axis(&mut self, axis: Vec3, angle: f32) {
        let delta = Quat::from_axis_angle(axis.normalize(), angle);
        self.local_rotation = delta * self.local_rotation;
    }

    /// Point local -Z at `target`, both expressed in the parent's space
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        self.local_rotation = look_rotation(target - self.local_position, up);
    }
}

/// Rotation whose -Z axis points along `direction`
///
/// Falls back to the Z axis for `up` when `direction` is parallel to it.
pub fn look_rotation(direction: Vec3, up: Vec3) -> Quat {
    let forward = direction.normalize_or_zero();
    if forward == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    let up = if forward.cross(up).length_squared() < 1e-8 {
        Vec3::Z
    } else {
        up
    };
    let right = forward.cross(up).normalize();
    let up = right.cross(forward);
    Quat::from_mat3(&glam::Mat3::from_cols(right, up, -forward))
}

/// Forward direction (local -Z) of a rotation
pub fn forward(rotation: Quat) -> Vec3 {
    rotation * -Vec3::Z
}

/// Right direction (local +X) of a rotation
pub fn right(rotation: Quat) -> Vec3 {
    rotation * Vec3::X
}

/// Up direction (local +Y) of a rotation
pub fn up(rotation: Quat) -> Vec3 {
    rotation * Vec3::Y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_matrix_applies_scale_before_rotation() {
        let mut t = Transform::from_position(Vec3::new(1.0, 0.0, 0.0));
        t.local_scale = Vec3::new(2.0, 1.0, 1.0);
        t.local_rotation = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let p = t.local_matrix().transform_point3(Vec3::X);
        assert!(p.abs_diff_eq(Vec3::new(1.0, 2.0, 0.0), 1e-5));
    }

    #[test]
    fn euler_degrees_round_trip() {
        let mut t = Transform::new();
        t.set_local_euler_degrees(Vec3::new(10.0, 20.0, 30.0));
        assert!(t
            .local_euler_degrees()
            .abs_diff_eq(Vec3::new(10.0, 20.0, 30.0), 1e-3));
    }

    #[test]
    fn look_at_points_forward_at_target() {
        let mut t = Transform::from_position(Vec3::new(0.0, 0.0, 5.0));
        t.look_at(Vec3::ZERO, Vec3::Y);
        assert!(forward(t.local_rotation).abs_diff_eq(-Vec3::Z, 1e-5));

        // straight down is parallel to the default up
        let down = look_rotation(-Vec3::Y, Vec3::Y);
        assert!(forward(down).abs_diff_eq(-Vec3::Y, 1e-5));
    }
}
