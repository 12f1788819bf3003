use glam::Vec4;

use crate::asset::Handle;
use crate::renderer::Material;
use crate::scene::Transform;

/// Light variants the pipeline knows how to shade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightKind {
    Directional,
    Point,
}

impl LightKind {
    /// Iteration order of the per-light passes.
    pub const ALL: [LightKind; 2] = [LightKind::Directional, LightKind::Point];
    pub const COUNT: usize = 2;

    pub fn index(self) -> usize {
        match self {
            LightKind::Directional => 0,
            LightKind::Point => 1,
        }
    }
}

/// Light parameters; world position and direction come from the owning
/// object's transform.
#[derive(Debug, Clone, Copy)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec4,
    pub power: f32,
    pub shadows_enabled: bool,
}

impl Light {
    pub fn new(kind: LightKind) -> Self {
        Self {
            kind,
            color: Vec4::ONE,
            power: 1.0,
            shadows_enabled: false,
        }
    }

    pub fn with_color(mut self, color: Vec4) -> Self {
        self.color = color;
        self
    }

    pub fn with_power(mut self, power: f32) -> Self {
        self.power = power;
        self
    }

    pub fn with_shadows(mut self, enabled: bool) -> Self {
        self.shadows_enabled = enabled;
        self
    }
}

/// Application-defined per-frame behavior attached to an object. The update
/// hook runs once per frame before rendering starts.
pub trait CustomComponent: 'static {
    fn name(&self) -> &str;
    fn update(&mut self, transform: &mut Transform, dt: f32);
}

/// The component set an object can carry: at most one material, mesh renderer
/// and light, any number of custom behaviors. Dispatch is by tag, names exist
/// for the replace-by-name insertion contract.
pub enum Component {
    Material(Handle<Material>),
    MeshRenderer { model: String },
    Light(Light),
    Custom(Box<dyn CustomComponent>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Material,
    MeshRenderer,
    Light,
    Custom,
}

impl ComponentKind {
    /// Whether adding or removing a component of this kind invalidates the
    /// batching and light indices.
    pub fn affects_topology(self) -> bool {
        !matches!(self, ComponentKind::Custom)
    }
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Material(_) => ComponentKind::Material,
            Component::MeshRenderer { .. } => ComponentKind::MeshRenderer,
            Component::Light(_) => ComponentKind::Light,
            Component::Custom(_) => ComponentKind::Custom,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Component::Material(_) => "Material",
            Component::MeshRenderer { .. } => "MeshRenderer",
            Component::Light(_) => "Light",
            Component::Custom(custom) => custom.name(),
        }
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Component::Material(handle) => f.debug_tuple("Material").field(handle).finish(),
            Component::MeshRenderer { model } => {
                f.debug_struct("MeshRenderer").field("model", model).finish()
            }
            Component::Light(light) => f.debug_tuple("Light").field(light).finish(),
            Component::Custom(custom) => f.debug_tuple("Custom").field(&custom.name()).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_sensitivity_by_kind() {
        assert!(ComponentKind::Material.affects_topology());
        assert!(ComponentKind::MeshRenderer.affects_topology());
        assert!(ComponentKind::Light.affects_topology());
        assert!(!ComponentKind::Custom.affects_topology());
    }

    #[test]
    fn light_builder_applies_fields() {
        let light = Light::new(LightKind::Point)
            .with_power(5.0)
            .with_shadows(true);
        assert_eq!(light.kind, LightKind::Point);
        assert_eq!(light.power, 5.0);
        assert!(light.shadows_enabled);
    }
}
