use glam::Vec3;

use crate::asset::Handle;
use crate::renderer::Vertex;

/// Immutable mesh geometry plus the bounding data the frustum culler works
/// with. GPU buffers are created once by the renderer when the mesh is
/// uploaded; this type stays usable without a device.
#[derive(Debug, Clone)]
pub struct Mesh {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    center: Vec3,
    bounding_radius: f32,
}

impl Mesh {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        let (center, bounding_radius) = bounding_sphere(&vertices);
        Self {
            vertices,
            indices,
            center,
            bounding_radius,
        }
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Center of the axis-aligned bounds in mesh-local space.
    pub fn center(&self) -> Vec3 {
        self.center
    }

    /// Radius of the bounding sphere around [`Self::center`], unscaled.
    pub fn bounding_radius(&self) -> f32 {
        self.bounding_radius
    }
}

/// Ordered collection of meshes sharing one name in the resource store.
#[derive(Debug, Clone, Default)]
pub struct Model {
    meshes: Vec<Handle<Mesh>>,
}

impl Model {
    pub fn new(meshes: Vec<Handle<Mesh>>) -> Self {
        Self { meshes }
    }

    pub fn meshes(&self) -> &[Handle<Mesh>] {
        &self.meshes
    }
}

fn bounding_sphere(vertices: &[Vertex]) -> (Vec3, f32) {
    if vertices.is_empty() {
        return (Vec3::ZERO, 0.0);
    }

    let mut min = Vec3::splat(f32::MAX);
    let mut max = Vec3::splat(f32::MIN);
    for vertex in vertices {
        let p = Vec3::from_array(vertex.pos);
        min = min.min(p);
        max = max.max(p);
    }
    let center = (min + max) * 0.5;

    let radius = vertices
        .iter()
        .map(|vertex| (Vec3::from_array(vertex.pos) - center).length())
        .fold(0.0, f32::max);

    (center, radius)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::vertex::v;

    #[test]
    fn bounding_sphere_of_unit_cube() {
        let vertices = vec![
            v([-0.5, -0.5, -0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
            v([0.5, 0.5, 0.5], [0.0, 1.0, 0.0], [1.0, 1.0]),
        ];
        let mesh = Mesh::new(vertices, vec![0, 1, 0]);

        assert!(mesh.center().abs_diff_eq(Vec3::ZERO, 1e-6));
        let expected = (0.75f32).sqrt();
        assert!((mesh.bounding_radius() - expected).abs() < 1e-6);
    }

    #[test]
    fn bounding_sphere_follows_offset_geometry() {
        let vertices = vec![
            v([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0]),
            v([3.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0]),
        ];
        let mesh = Mesh::new(vertices, vec![0, 1, 0]);

        assert!(mesh.center().abs_diff_eq(Vec3::new(2.0, 0.0, 0.0), 1e-6));
        assert!((mesh.bounding_radius() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_mesh_has_zero_bounds() {
        let mesh = Mesh::new(Vec::new(), Vec::new());
        assert_eq!(mesh.bounding_radius(), 0.0);
        assert_eq!(mesh.index_count(), 0);
    }
}
