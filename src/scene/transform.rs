use glam::{EulerRot, Mat4, Vec3, Vec4};

const FORWARD: Vec3 = Vec3::new(0.0, 0.0, 1.0);
const UP: Vec3 = Vec3::new(0.0, 1.0, 0.0);
const LEFT: Vec3 = Vec3::new(1.0, 0.0, 0.0);

/// Position, Euler rotation and non-uniform scale of a scene object.
///
/// Rotation is yaw (y), pitch (x), roll (z) in radians, applied in that
/// order. Basis vectors are recomputed from the rotation on demand.
#[derive(Clone, Copy, Debug)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_translation(self.position) * self.rotation_matrix() * Mat4::from_scale(self.scale)
    }

    pub fn translate(&mut self, translation: Vec3) {
        self.position += translation;
    }

    pub fn rotate(&mut self, axis: Vec3, amount: f32) {
        self.rotation += axis * amount;
    }

    pub fn forward(&self) -> Vec3 {
        self.rotate_basis(FORWARD)
    }

    pub fn up(&self) -> Vec3 {
        self.rotate_basis(UP)
    }

    pub fn left(&self) -> Vec3 {
        self.rotate_basis(LEFT)
    }

    /// Largest scale axis, used to scale bounding radii conservatively.
    pub fn max_scale(&self) -> f32 {
        self.scale.x.max(self.scale.y).max(self.scale.z)
    }

    fn rotation_matrix(&self) -> Mat4 {
        Mat4::from_euler(
            EulerRot::YXZ,
            self.rotation.y,
            self.rotation.x,
            self.rotation.z,
        )
    }

    fn rotate_basis(&self, base: Vec3) -> Vec3 {
        (self.rotation_matrix() * Vec4::new(base.x, base.y, base.z, 0.0)).truncate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn default_is_identity() {
        let m = Transform::default().matrix();
        assert!(m.abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn translate_then_scale_ok() {
        let tr = Transform {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Vec3::ZERO,
            scale: Vec3::splat(2.0),
        };
        let p = tr.matrix().transform_point3(Vec3::new(1.0, 0.0, 0.0));
        // Scale happens about origin, then translation
        assert!(p.abs_diff_eq(Vec3::new(3.0, 2.0, 3.0), 1e-6));
    }

    #[test]
    fn yaw_quarter_turn_swings_forward_to_x() {
        let mut tr = Transform::default();
        tr.rotate(Vec3::Y, FRAC_PI_2);
        assert!(tr.forward().abs_diff_eq(Vec3::new(1.0, 0.0, 0.0), 1e-6));
        assert!(tr.up().abs_diff_eq(Vec3::Y, 1e-6));
    }

    #[test]
    fn max_scale_picks_largest_axis() {
        let tr = Transform {
            scale: Vec3::new(1.0, 3.0, 2.0),
            ..Transform::default()
        };
        assert_eq!(tr.max_scale(), 3.0);
    }
}
