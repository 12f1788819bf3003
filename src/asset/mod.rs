pub mod handle;
pub mod mesh;

pub use handle::Handle;
pub use mesh::{Mesh, Model};

use std::collections::HashMap;

use log::warn;

use crate::renderer::Material;

/// Decoded image data handed over by the embedding application. Decoding
/// files into this form is the collaborator's concern, not ours.
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8, row-major.
    pub rgba: Vec<u8>,
}

/// Six decoded faces in +x, -x, +y, -y, +z, -z order.
#[derive(Debug, Clone)]
pub struct CubeTexture {
    pub faces: Box<[TextureData; 6]>,
}

/// Name/id keyed resource store the pipeline pulls from.
///
/// Everything here is owned for the lifetime of a level: meshes and materials
/// hand out stable integer handles, models and textures are looked up by name.
/// A lookup miss is logged and reported as `None`; callers skip the draw and
/// keep going.
#[derive(Default)]
pub struct Resources {
    meshes: Vec<Mesh>,
    models: HashMap<String, Model>,
    materials: Vec<Material>,
    textures: HashMap<String, TextureData>,
    cube_textures: HashMap<String, CubeTexture>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> Handle<Mesh> {
        let handle = Handle::new(self.meshes.len());
        self.meshes.push(mesh);
        handle
    }

    pub fn mesh(&self, handle: Handle<Mesh>) -> Option<&Mesh> {
        self.meshes.get(handle.index())
    }

    pub fn meshes(&self) -> impl Iterator<Item = (Handle<Mesh>, &Mesh)> {
        self.meshes
            .iter()
            .enumerate()
            .map(|(i, mesh)| (Handle::new(i), mesh))
    }

    pub fn add_model(&mut self, name: impl Into<String>, model: Model) {
        self.models.insert(name.into(), model);
    }

    pub fn model(&self, name: &str) -> Option<&Model> {
        let model = self.models.get(name);
        if model.is_none() {
            warn!("Model not found: {}", name);
        }
        model
    }

    pub fn create_material(&mut self) -> Handle<Material> {
        let handle = Handle::new(self.materials.len());
        self.materials.push(Material::new());
        handle
    }

    pub fn material(&self, handle: Handle<Material>) -> Option<&Material> {
        self.materials.get(handle.index())
    }

    pub fn material_mut(&mut self, handle: Handle<Material>) -> Option<&mut Material> {
        self.materials.get_mut(handle.index())
    }

    pub fn add_texture(&mut self, name: impl Into<String>, texture: TextureData) {
        self.textures.insert(name.into(), texture);
    }

    pub fn texture(&self, name: &str) -> Option<&TextureData> {
        let texture = self.textures.get(name);
        if texture.is_none() {
            warn!("Texture not found: {}", name);
        }
        texture
    }

    pub fn add_cube_texture(&mut self, name: impl Into<String>, texture: CubeTexture) {
        self.cube_textures.insert(name.into(), texture);
    }

    pub fn cube_texture(&self, name: &str) -> Option<&CubeTexture> {
        let texture = self.cube_textures.get(name);
        if texture.is_none() {
            warn!("Cube texture not found: {}", name);
        }
        texture
    }

    /// Drop every stored resource. Called on level reset; outstanding handles
    /// become dangling and must not be reused.
    pub fn clear(&mut self) {
        self.meshes.clear();
        self.models.clear();
        self.materials.clear();
        self.textures.clear();
        self.cube_textures.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_handles_are_stable_and_sequential() {
        let mut resources = Resources::new();
        let a = resources.add_mesh(Mesh::new(Vec::new(), Vec::new()));
        let b = resources.add_mesh(Mesh::new(Vec::new(), Vec::new()));

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert!(resources.mesh(a).is_some());
    }

    #[test]
    fn model_lookup_miss_returns_none() {
        let resources = Resources::new();
        assert!(resources.model("missing.obj").is_none());
    }

    #[test]
    fn clear_empties_every_store() {
        let mut resources = Resources::new();
        resources.add_mesh(Mesh::new(Vec::new(), Vec::new()));
        resources.add_model("cube", Model::default());
        resources.create_material();
        resources.clear();

        assert!(resources.model("cube").is_none());
        assert!(resources.mesh(Handle::new(0)).is_none());
    }
}
