use std::collections::BTreeMap;

use log::{debug, warn};

use crate::asset::{Handle, Mesh, Resources};
use crate::renderer::material::{Material, ShaderFeatures};
use crate::scene::{LightKind, ObjectId, Scene, SceneObject};

/// One drawable unit: a mesh of some model, the material it is shaded with
/// and the object whose transform places it.
///
/// Equality is mesh + material identity; that is the dedup key the index
/// uses when inserting.
#[derive(Debug, Clone, Copy)]
pub struct MeshInstance {
    pub mesh: Handle<Mesh>,
    pub material: Handle<Material>,
    pub object: ObjectId,
}

impl PartialEq for MeshInstance {
    fn eq(&self, other: &Self) -> bool {
        self.mesh == other.mesh && self.material == other.material
    }
}

impl Eq for MeshInstance {}

pub type MaterialBuckets = BTreeMap<Handle<Material>, Vec<MeshInstance>>;

/// The batching index: visible geometry grouped by shader-capability key and
/// then by material, plus the per-kind light lists.
///
/// Rebuilt lazily against the scene generation counter. Object transform
/// mutation never touches this; only component add/remove (which bumps the
/// generation) makes it stale.
pub struct RenderIndex {
    meshes: BTreeMap<ShaderFeatures, MaterialBuckets>,
    lights: [Vec<ObjectId>; LightKind::COUNT],
    synced_generation: Option<u64>,
}

impl RenderIndex {
    pub fn new() -> Self {
        Self {
            meshes: BTreeMap::new(),
            lights: Default::default(),
            synced_generation: None,
        }
    }

    /// Whether the index lags behind the scene's component topology.
    pub fn is_stale(&self, scene: &Scene) -> bool {
        self.synced_generation != Some(scene.generation())
    }

    /// Bring the index up to date with the scene. Returns false without doing
    /// any work when the observed generation already matches.
    pub fn rebuild(&mut self, scene: &Scene, resources: &Resources) -> bool {
        if !self.is_stale(scene) {
            return false;
        }

        for object in scene.objects() {
            self.insert_mesh_instances(object, scene, resources);
            if let Some(light) = object.light() {
                let bucket = &mut self.lights[light.kind.index()];
                if !bucket.contains(&object.id()) {
                    bucket.push(object.id());
                }
            }
        }

        self.sweep(scene);

        self.synced_generation = Some(scene.generation());
        debug!(
            "Batching index rebuilt: {} instances, {} lights",
            self.instance_count(),
            self.lights.iter().map(Vec::len).sum::<usize>()
        );
        true
    }

    pub fn buckets(
        &self,
    ) -> impl Iterator<Item = (ShaderFeatures, &MaterialBuckets)> {
        self.meshes.iter().map(|(key, buckets)| (*key, buckets))
    }

    pub fn lights(&self, kind: LightKind) -> &[ObjectId] {
        &self.lights[kind.index()]
    }

    pub fn instance_count(&self) -> usize {
        self.meshes
            .values()
            .flat_map(|buckets| buckets.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty() && self.lights.iter().all(Vec::is_empty)
    }

    pub fn clear(&mut self) {
        self.meshes.clear();
        for bucket in &mut self.lights {
            bucket.clear();
        }
        self.synced_generation = None;
    }

    fn insert_mesh_instances(
        &mut self,
        object: &SceneObject,
        scene: &Scene,
        resources: &Resources,
    ) {
        if object.model_name().is_none() {
            return;
        }
        let Some(material) = effective_material(object, scene) else {
            // A mesh renderer with neither its own material nor a scene
            // default is a wiring bug, not a recoverable miss.
            debug_assert!(
                false,
                "object {:?} has a mesh renderer but no material",
                object.id()
            );
            warn!("Skipping object {:?}: no material available", object.id());
            return;
        };
        let Some(features) = resources.material(material).map(Material::features) else {
            warn!("Skipping object {:?}: dangling material handle", object.id());
            return;
        };
        let Some(model) = object.model_name().and_then(|name| resources.model(name)) else {
            return;
        };

        let bucket = self
            .meshes
            .entry(features)
            .or_default()
            .entry(material)
            .or_default();
        for &mesh in model.meshes() {
            let instance = MeshInstance {
                mesh,
                material,
                object: object.id(),
            };
            if !bucket.contains(&instance) {
                bucket.push(instance);
            }
        }
    }

    /// Drop entries whose owning object is gone or no longer carries the
    /// component that put them here.
    fn sweep(&mut self, scene: &Scene) {
        for (kind_index, bucket) in self.lights.iter_mut().enumerate() {
            bucket.retain(|id| {
                scene
                    .object(*id)
                    .and_then(SceneObject::light)
                    .is_some_and(|light| light.kind.index() == kind_index)
            });
        }

        for buckets in self.meshes.values_mut() {
            for instances in buckets.values_mut() {
                instances.retain(|instance| {
                    scene.object(instance.object).is_some_and(|object| {
                        object.model_name().is_some()
                            && effective_material(object, scene) == Some(instance.material)
                    })
                });
            }
            buckets.retain(|_, instances| !instances.is_empty());
        }
        self.meshes.retain(|_, buckets| !buckets.is_empty());
    }
}

impl Default for RenderIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn effective_material(object: &SceneObject, scene: &Scene) -> Option<Handle<Material>> {
    object.material().or_else(|| scene.default_material())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{Mesh, Model};
    use crate::scene::components::{Component, Light};

    fn scene_with_cube() -> (Scene, Resources, ObjectId) {
        let mut resources = Resources::new();
        let mesh = resources.add_mesh(Mesh::new(Vec::new(), Vec::new()));
        resources.add_model("cube", Model::new(vec![mesh]));
        let material = resources.create_material();

        let mut scene = Scene::new();
        let id = scene.create_object("crate");
        scene.add_component(
            id,
            Component::MeshRenderer {
                model: "cube".into(),
            },
        );
        scene.add_component(id, Component::Material(material));
        (scene, resources, id)
    }

    #[test]
    fn rebuild_populates_mesh_buckets() {
        let (scene, resources, _) = scene_with_cube();
        let mut index = RenderIndex::new();

        assert!(index.rebuild(&scene, &resources));
        assert_eq!(index.instance_count(), 1);
    }

    #[test]
    fn second_rebuild_without_topology_change_is_a_no_op() {
        let (scene, resources, _) = scene_with_cube();
        let mut index = RenderIndex::new();

        assert!(index.rebuild(&scene, &resources));
        assert!(!index.is_stale(&scene));
        assert!(!index.rebuild(&scene, &resources));
        assert_eq!(index.instance_count(), 1);
    }

    #[test]
    fn transform_mutation_does_not_invalidate() {
        let (mut scene, resources, id) = scene_with_cube();
        let mut index = RenderIndex::new();
        index.rebuild(&scene, &resources);

        scene.object_mut(id).unwrap().transform.position.y = 9.0;
        assert!(!index.is_stale(&scene));
    }

    #[test]
    fn lights_membership_follows_component() {
        let (mut scene, resources, _) = scene_with_cube();
        let lamp = scene.create_object("lamp");
        scene.add_component(
            lamp,
            Component::Light(Light::new(LightKind::Directional)),
        );

        let mut index = RenderIndex::new();
        index.rebuild(&scene, &resources);
        assert_eq!(index.lights(LightKind::Directional), &[lamp]);
        assert!(index.lights(LightKind::Point).is_empty());

        scene.remove_component(lamp, "Light");
        index.rebuild(&scene, &resources);
        assert!(index.lights(LightKind::Directional).is_empty());
    }

    #[test]
    fn light_kind_change_moves_buckets() {
        let (mut scene, resources, _) = scene_with_cube();
        let lamp = scene.create_object("lamp");
        scene.add_component(lamp, Component::Light(Light::new(LightKind::Point)));

        let mut index = RenderIndex::new();
        index.rebuild(&scene, &resources);
        assert_eq!(index.lights(LightKind::Point), &[lamp]);

        scene.add_component(
            lamp,
            Component::Light(Light::new(LightKind::Directional)),
        );
        index.rebuild(&scene, &resources);
        assert!(index.lights(LightKind::Point).is_empty());
        assert_eq!(index.lights(LightKind::Directional), &[lamp]);
    }

    #[test]
    fn instances_dedup_by_mesh_and_material() {
        let (mut scene, mut resources, _) = scene_with_cube();
        // A second object sharing the same mesh and material dedups away; a
        // distinct material does not.
        let twin = scene.create_object("twin");
        scene.add_component(
            twin,
            Component::MeshRenderer {
                model: "cube".into(),
            },
        );
        let first_material = Handle::new(0);
        scene.add_component(twin, Component::Material(first_material));

        let mut index = RenderIndex::new();
        index.rebuild(&scene, &resources);
        assert_eq!(index.instance_count(), 1);

        let other_material = resources.create_material();
        scene.add_component(twin, Component::Material(other_material));
        index.rebuild(&scene, &resources);
        assert_eq!(index.instance_count(), 2);
    }

    #[test]
    fn removing_every_component_empties_the_index() {
        let (mut scene, resources, id) = scene_with_cube();
        let lamp = scene.create_object("lamp");
        scene.add_component(lamp, Component::Light(Light::new(LightKind::Point)));

        let mut index = RenderIndex::new();
        index.rebuild(&scene, &resources);
        assert!(!index.is_empty());

        scene.remove_component(id, "MeshRenderer");
        scene.remove_component(id, "Material");
        scene.remove_component(lamp, "Light");
        index.rebuild(&scene, &resources);
        assert!(index.is_empty());
    }

    #[test]
    fn default_material_backs_bare_renderers() {
        let mut resources = Resources::new();
        let mesh = resources.add_mesh(Mesh::new(Vec::new(), Vec::new()));
        resources.add_model("cube", Model::new(vec![mesh]));
        let fallback = resources.create_material();

        let mut scene = Scene::new();
        scene.set_default_material(fallback);
        let id = scene.create_object("crate");
        scene.add_component(
            id,
            Component::MeshRenderer {
                model: "cube".into(),
            },
        );

        let mut index = RenderIndex::new();
        index.rebuild(&scene, &resources);
        assert_eq!(index.instance_count(), 1);
    }
}
