use bitflags::bitflags;

bitflags! {
    /// Capability mask a material advertises; selects the shader program
    /// variant it is drawn with.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ShaderFeatures: u32 {
        const DIFFUSE  = 1 << 0;
        const SPECULAR = 1 << 1;
        const NORMAL   = 1 << 2;
        const BUMP     = 1 << 3;
    }
}

/// Slots a material can bind one texture into; re-setting a slot overwrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    Diffuse,
    Normal,
    Displacement,
    Cube,
}

impl TextureSlot {
    /// Fixed texture unit of each slot in the scene-pass bind group.
    pub fn unit(self) -> u32 {
        match self {
            TextureSlot::Diffuse => 0,
            TextureSlot::Normal => 1,
            TextureSlot::Displacement => 2,
            TextureSlot::Cube => 3,
        }
    }
}

/// Surface description: capability mask, texture bindings and scalar
/// parameters. Identified by its [`crate::asset::Handle`], which doubles as
/// the per-material batching key.
#[derive(Debug, Clone, Default)]
pub struct Material {
    features: ShaderFeatures,
    textures: Vec<(TextureSlot, String)>,
    specularity: f32,
}

impl Material {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_features(&mut self, features: ShaderFeatures) {
        self.features = features;
    }

    pub fn features(&self) -> ShaderFeatures {
        self.features
    }

    /// Bind a texture name into a slot. At most one binding per slot; setting
    /// an occupied slot replaces the previous binding.
    pub fn set_texture(&mut self, slot: TextureSlot, name: impl Into<String>) {
        let name = name.into();
        if let Some(existing) = self.textures.iter_mut().find(|(s, _)| *s == slot) {
            existing.1 = name;
        } else {
            self.textures.push((slot, name));
        }
    }

    pub fn texture(&self, slot: TextureSlot) -> Option<&str> {
        self.textures
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, name)| name.as_str())
    }

    pub fn textures(&self) -> &[(TextureSlot, String)] {
        &self.textures
    }

    pub fn set_specularity(&mut self, specularity: f32) {
        self.specularity = specularity;
    }

    pub fn specularity(&self) -> f32 {
        self.specularity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_a_slot_twice_overwrites() {
        let mut material = Material::new();
        material.set_texture(TextureSlot::Diffuse, "checker.png");
        material.set_texture(TextureSlot::Diffuse, "marble.png");

        assert_eq!(material.texture(TextureSlot::Diffuse), Some("marble.png"));
        assert_eq!(material.textures().len(), 1);
    }

    #[test]
    fn slots_are_independent() {
        let mut material = Material::new();
        material.set_texture(TextureSlot::Diffuse, "checker.png");
        material.set_texture(TextureSlot::Normal, "brick_nmap.png");

        assert_eq!(material.textures().len(), 2);
        assert_eq!(material.texture(TextureSlot::Normal), Some("brick_nmap.png"));
    }

    #[test]
    fn features_compose_as_bitmask() {
        let features = ShaderFeatures::DIFFUSE | ShaderFeatures::NORMAL;
        assert!(features.contains(ShaderFeatures::DIFFUSE));
        assert!(!features.contains(ShaderFeatures::BUMP));
    }
}
