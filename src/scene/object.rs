use crate::asset::Handle;
use crate::renderer::Material;
use crate::scene::components::{Component, ComponentKind, CustomComponent, Light};
use crate::scene::Transform;

/// Stable identity of an object within its scene. Objects are never removed
/// individually, only dropped wholesale at level reset, so a plain index is
/// enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub(crate) u32);

impl ObjectId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A flat scene entity: transform plus its component slots.
pub struct SceneObject {
    id: ObjectId,
    name: String,
    pub transform: Transform,
    shadow_caster: bool,
    shadow_receiver: bool,
    material: Option<Handle<Material>>,
    model: Option<String>,
    light: Option<Light>,
    customs: Vec<Box<dyn CustomComponent>>,
}

impl SceneObject {
    pub(crate) fn new(id: ObjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            transform: Transform::default(),
            shadow_caster: true,
            shadow_receiver: true,
            material: None,
            model: None,
            light: None,
            customs: Vec::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a component, replacing any existing one with the same name.
    /// Returns true when a topology-relevant slot changed, so the caller can
    /// bump the scene generation.
    pub(crate) fn add_component(&mut self, component: Component) -> bool {
        let affects = component.kind().affects_topology();
        match component {
            Component::Material(handle) => self.material = Some(handle),
            Component::MeshRenderer { model } => self.model = Some(model),
            Component::Light(light) => self.light = Some(light),
            Component::Custom(custom) => {
                if let Some(existing) = self
                    .customs
                    .iter_mut()
                    .find(|c| c.name() == custom.name())
                {
                    *existing = custom;
                } else {
                    self.customs.push(custom);
                }
            }
        }
        affects
    }

    /// Remove the component with the given name. Returns its kind when one
    /// was present.
    pub(crate) fn remove_component(&mut self, name: &str) -> Option<ComponentKind> {
        match name {
            "Material" => self.material.take().map(|_| ComponentKind::Material),
            "MeshRenderer" => self.model.take().map(|_| ComponentKind::MeshRenderer),
            "Light" => self.light.take().map(|_| ComponentKind::Light),
            _ => {
                let index = self.customs.iter().position(|c| c.name() == name)?;
                self.customs.remove(index);
                Some(ComponentKind::Custom)
            }
        }
    }

    pub fn has_component(&self, name: &str) -> bool {
        match name {
            "Material" => self.material.is_some(),
            "MeshRenderer" => self.model.is_some(),
            "Light" => self.light.is_some(),
            _ => self.customs.iter().any(|c| c.name() == name),
        }
    }

    pub fn material(&self) -> Option<Handle<Material>> {
        self.material
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn light(&self) -> Option<&Light> {
        self.light.as_ref()
    }

    pub fn light_mut(&mut self) -> Option<&mut Light> {
        self.light.as_mut()
    }

    pub fn set_shadow_caster(&mut self, caster: bool) {
        self.shadow_caster = caster;
    }

    pub fn is_shadow_caster(&self) -> bool {
        self.shadow_caster
    }

    pub fn set_shadow_receiver(&mut self, receiver: bool) {
        self.shadow_receiver = receiver;
    }

    pub fn is_shadow_receiver(&self) -> bool {
        self.shadow_receiver
    }

    pub(crate) fn run_custom_components(&mut self, dt: f32) {
        for custom in &mut self.customs {
            custom.update(&mut self.transform, dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    struct Spin {
        speed: f32,
    }

    impl CustomComponent for Spin {
        fn name(&self) -> &str {
            "Spin"
        }

        fn update(&mut self, transform: &mut Transform, dt: f32) {
            transform.rotate(Vec3::Y, self.speed * dt);
        }
    }

    #[test]
    fn add_component_fills_slots() {
        let mut object = SceneObject::new(ObjectId(0), "thing");
        assert!(object.add_component(Component::MeshRenderer {
            model: "cube".into(),
        }));
        assert!(object.has_component("MeshRenderer"));
        assert_eq!(object.model_name(), Some("cube"));
    }

    #[test]
    fn custom_components_replace_by_name() {
        let mut object = SceneObject::new(ObjectId(0), "thing");
        let changed = object.add_component(Component::Custom(Box::new(Spin { speed: 1.0 })));
        assert!(!changed);
        object.add_component(Component::Custom(Box::new(Spin { speed: 2.0 })));
        assert_eq!(object.customs.len(), 1);
    }

    #[test]
    fn remove_component_reports_kind() {
        let mut object = SceneObject::new(ObjectId(0), "thing");
        object.add_component(Component::Light(Light::new(
            crate::scene::components::LightKind::Point,
        )));
        assert_eq!(
            object.remove_component("Light"),
            Some(ComponentKind::Light)
        );
        assert_eq!(object.remove_component("Light"), None);
    }

    #[test]
    fn custom_update_mutates_transform() {
        let mut object = SceneObject::new(ObjectId(0), "thing");
        object.add_component(Component::Custom(Box::new(Spin { speed: 1.0 })));
        object.run_custom_components(0.5);
        assert!((object.transform.rotation.y - 0.5).abs() < 1e-6);
    }
}
