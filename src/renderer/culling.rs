use glam::{Mat4, Vec3, Vec4};

/// A plane in the form `normal . p + distance = 0`, normal pointing into the
/// positive half-space.
#[derive(Debug, Clone, Copy)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    fn from_vec4(v: Vec4) -> Self {
        let normal = Vec3::new(v.x, v.y, v.z);
        let length = normal.length();
        if length > 0.0 {
            Self {
                normal: normal / length,
                distance: v.w / length,
            }
        } else {
            Self {
                normal: Vec3::Y,
                distance: 0.0,
            }
        }
    }

    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

/// Camera frustum as six planes in view space, extracted from the projection
/// matrix with the Gribb-Hartmann method. Test points must already be in
/// view space.
#[derive(Debug, Clone)]
pub struct Frustum {
    /// Order: left, right, bottom, top, near, far.
    pub planes: [Plane; 6],
}

impl Frustum {
    pub fn from_projection(proj: Mat4) -> Self {
        let m = proj.to_cols_array();

        let left = Plane::from_vec4(Vec4::new(
            m[3] + m[0],
            m[7] + m[4],
            m[11] + m[8],
            m[15] + m[12],
        ));
        let right = Plane::from_vec4(Vec4::new(
            m[3] - m[0],
            m[7] - m[4],
            m[11] - m[8],
            m[15] - m[12],
        ));
        let bottom = Plane::from_vec4(Vec4::new(
            m[3] + m[1],
            m[7] + m[5],
            m[11] + m[9],
            m[15] + m[13],
        ));
        let top = Plane::from_vec4(Vec4::new(
            m[3] - m[1],
            m[7] - m[5],
            m[11] - m[9],
            m[15] - m[13],
        ));
        // Near plane anchored at the eye: anything touching the camera
        // position counts as visible.
        let near = Plane {
            normal: Vec3::NEG_Z,
            distance: 0.0,
        };
        let far = Plane::from_vec4(Vec4::new(
            m[3] - m[2],
            m[7] - m[6],
            m[11] - m[10],
            m[15] - m[14],
        ));

        Self {
            planes: [left, right, bottom, top, near, far],
        }
    }

    /// A sphere is inside when no plane has it entirely on the negative side.
    pub fn sphere_inside(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(center) >= -radius)
    }
}

/// Visibility test for one mesh instance: transform the mesh bounds center by
/// view * model, scale the bounding radius by the largest scale axis, test
/// the resulting view-space sphere.
pub fn instance_visible(
    frustum: &Frustum,
    view: Mat4,
    model: Mat4,
    center: Vec3,
    radius: f32,
    max_scale: f32,
) -> bool {
    let view_center = (view * model).transform_point3(center);
    frustum.sphere_inside(view_center, radius * max_scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frustum() -> Frustum {
        Frustum::from_projection(Mat4::perspective_rh(
            60f32.to_radians(),
            1.0,
            0.1,
            100.0,
        ))
    }

    #[test]
    fn sphere_straight_ahead_passes() {
        let frustum = test_frustum();
        assert!(frustum.sphere_inside(Vec3::new(0.0, 0.0, -10.0), 1.0));
    }

    #[test]
    fn sphere_at_camera_with_positive_radius_passes() {
        let frustum = test_frustum();
        assert!(frustum.sphere_inside(Vec3::ZERO, 0.5));
        assert!(frustum.sphere_inside(Vec3::ZERO, 0.001));
    }

    #[test]
    fn sphere_beyond_far_plane_is_rejected() {
        let frustum = test_frustum();
        assert!(!frustum.sphere_inside(Vec3::new(0.0, 0.0, -500.0), 1.0));
    }

    #[test]
    fn sphere_far_off_to_the_side_is_rejected() {
        let frustum = test_frustum();
        assert!(!frustum.sphere_inside(Vec3::new(200.0, 0.0, -10.0), 1.0));
    }

    #[test]
    fn radius_uses_largest_scale_axis() {
        let frustum = test_frustum();
        let view = Mat4::IDENTITY;
        // A unit sphere just outside the left plane at z = -10; a 3x scale on
        // any single axis must rescue it.
        let model = Mat4::from_translation(Vec3::new(-8.0, 0.0, -10.0));
        let center = Vec3::ZERO;

        assert!(!instance_visible(&frustum, view, model, center, 1.0, 1.0));
        assert!(instance_visible(&frustum, view, model, center, 1.0, 3.0));
    }
}
