use glam::Vec3;
use log::warn;

use crate::asset::Handle;
use crate::renderer::Material;
use crate::scene::components::Component;
use crate::scene::object::{ObjectId, SceneObject};

/// Flat collection of scene objects plus the generation counter the batching
/// index synchronizes against.
///
/// The counter is bumped only by component add/remove of the indexed kinds
/// (material, mesh renderer, light) and by level reset; transform mutation is
/// free and never invalidates anything.
pub struct Scene {
    objects: Vec<SceneObject>,
    skybox: Option<SceneObject>,
    generation: u64,
    default_material: Option<Handle<Material>>,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            skybox: None,
            generation: 0,
            default_material: None,
        }
    }

    pub fn create_object(&mut self, name: impl Into<String>) -> ObjectId {
        let id = ObjectId(self.objects.len() as u32);
        self.objects.push(SceneObject::new(id, name));
        id
    }

    pub fn object(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.get(id.index())
    }

    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut SceneObject> {
        self.objects.get_mut(id.index())
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    /// Attach a component to an object, replacing any same-named one. Bumps
    /// the generation when the component kind is indexed by the batcher.
    pub fn add_component(&mut self, id: ObjectId, component: Component) {
        let Some(object) = self.objects.get_mut(id.index()) else {
            warn!("add_component on unknown object {:?}", id);
            return;
        };
        if object.add_component(component) {
            self.generation += 1;
        }
    }

    pub fn remove_component(&mut self, id: ObjectId, name: &str) -> bool {
        let Some(object) = self.objects.get_mut(id.index()) else {
            warn!("remove_component on unknown object {:?}", id);
            return false;
        };
        match object.remove_component(name) {
            Some(kind) => {
                if kind.affects_topology() {
                    self.generation += 1;
                }
                true
            }
            None => false,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Material used for mesh renderers that carry no material of their own.
    pub fn set_default_material(&mut self, material: Handle<Material>) {
        self.default_material = Some(material);
        self.generation += 1;
    }

    pub fn default_material(&self) -> Option<Handle<Material>> {
        self.default_material
    }

    /// Install the skybox: a cube model that follows the camera and never
    /// takes part in shadowing. The one parented-to-camera special case in an
    /// otherwise flat scene.
    pub fn set_skybox(&mut self, model: impl Into<String>, material: Handle<Material>) {
        let mut object = SceneObject::new(ObjectId(u32::MAX), "skybox");
        object.add_component(Component::MeshRenderer {
            model: model.into(),
        });
        object.add_component(Component::Material(material));
        object.set_shadow_caster(false);
        object.set_shadow_receiver(false);
        self.skybox = Some(object);
    }

    pub fn skybox(&self) -> Option<&SceneObject> {
        self.skybox.as_ref()
    }

    pub fn clear_skybox(&mut self) {
        self.skybox = None;
    }

    /// Per-frame scene upkeep: run custom components, then snap the skybox to
    /// the camera position so it never parallax-shifts.
    pub fn update(&mut self, dt: f32, camera_position: Vec3) {
        for object in &mut self.objects {
            object.run_custom_components(dt);
        }
        if let Some(skybox) = &mut self.skybox {
            skybox.transform.position = camera_position;
        }
    }

    /// Drop every object. The only point where objects die.
    pub fn reset(&mut self) {
        self.objects.clear();
        self.skybox = None;
        self.default_material = None;
        self.generation += 1;
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::components::{Light, LightKind};

    #[test]
    fn component_add_bumps_generation() {
        let mut scene = Scene::new();
        let id = scene.create_object("lamp");
        let before = scene.generation();

        scene.add_component(id, Component::Light(Light::new(LightKind::Point)));
        assert_eq!(scene.generation(), before + 1);
    }

    #[test]
    fn transform_mutation_does_not_bump_generation() {
        let mut scene = Scene::new();
        let id = scene.create_object("crate");
        let before = scene.generation();

        scene.object_mut(id).unwrap().transform.position.x = 4.0;
        assert_eq!(scene.generation(), before);
    }

    #[test]
    fn remove_component_bumps_generation_once() {
        let mut scene = Scene::new();
        let id = scene.create_object("lamp");
        scene.add_component(id, Component::Light(Light::new(LightKind::Point)));
        let before = scene.generation();

        assert!(scene.remove_component(id, "Light"));
        assert_eq!(scene.generation(), before + 1);
        assert!(!scene.remove_component(id, "Light"));
        assert_eq!(scene.generation(), before + 1);
    }

    #[test]
    fn skybox_follows_camera() {
        let mut scene = Scene::new();
        let mut resources = crate::asset::Resources::new();
        let material = resources.create_material();
        scene.set_skybox("cube", material);

        scene.update(0.016, Vec3::new(1.0, 2.0, 3.0));
        let skybox = scene.skybox().unwrap();
        assert!(skybox
            .transform
            .position
            .abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), 1e-6));
        assert!(!skybox.is_shadow_caster());
    }

    #[test]
    fn reset_drops_objects_and_bumps_generation() {
        let mut scene = Scene::new();
        scene.create_object("a");
        scene.create_object("b");
        let before = scene.generation();

        scene.reset();
        assert!(scene.objects().is_empty());
        assert!(scene.generation() > before);
    }
}
