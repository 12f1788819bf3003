use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Which lighting pipeline the renderer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadingPath {
    Forward,
    Deferred,
}

impl Default for ShadingPath {
    fn default() -> Self {
        ShadingPath::Forward
    }
}

/// Renderer configuration, loaded from disk by the embedding application.
///
/// Window dimensions here size every framebuffer in the stack; the directional
/// shadow map follows them, the point shadow map uses its own fixed square
/// resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default = "RenderSettings::default_sample_count")]
    pub sample_count: u32,
    #[serde(default = "RenderSettings::default_point_shadow_size")]
    pub point_shadow_size: u32,
    #[serde(default)]
    pub shading_path: ShadingPath,
    #[serde(default = "RenderSettings::default_ambient_color")]
    pub ambient_color: [f32; 3],
    /// Six cube-face texture names (+x, -x, +y, -y, +z, -z); empty = no skybox.
    #[serde(default)]
    pub skybox_textures: Vec<String>,
    #[serde(default)]
    pub bloom_iterations: u32,
    #[serde(default)]
    pub hdr_enabled: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            sample_count: Self::default_sample_count(),
            point_shadow_size: Self::default_point_shadow_size(),
            shading_path: ShadingPath::default(),
            ambient_color: Self::default_ambient_color(),
            skybox_textures: Vec::new(),
            bloom_iterations: 0,
            hdr_enabled: false,
        }
    }
}

impl RenderSettings {
    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RenderSettings>(&contents) {
                Ok(settings) => {
                    info!("Loaded render settings from {:?}", path);
                    settings.validate()
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default render settings.",
                        path, err
                    );
                    RenderSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Render settings file {:?} not found. Using default settings.",
                    path
                );
                RenderSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }
        }
    }

    pub fn validate(mut self) -> Self {
        if self.sample_count == 0 {
            warn!("Sample count must be greater than zero. Using default instead.");
            self.sample_count = Self::default_sample_count();
        }

        if self.point_shadow_size == 0 {
            warn!("Point shadow map size must be greater than zero. Using default value.");
            self.point_shadow_size = Self::default_point_shadow_size();
        }

        if self.resolution.width == 0 || self.resolution.height == 0 {
            warn!("Resolution must be greater than zero. Using default resolution.");
            self.resolution = Resolution::default();
        }

        if !self.skybox_textures.is_empty() && self.skybox_textures.len() != 6 {
            warn!(
                "Skybox needs exactly 6 face textures, got {}. Disabling skybox.",
                self.skybox_textures.len()
            );
            self.skybox_textures.clear();
        }

        self
    }

    const fn default_sample_count() -> u32 {
        2
    }

    const fn default_point_shadow_size() -> u32 {
        1024
    }

    const fn default_ambient_color() -> [f32; 3] {
        [0.1, 0.1, 0.1]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_replaces_invalid_values_with_defaults() {
        let validated = RenderSettings {
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            sample_count: 0,
            point_shadow_size: 0,
            ..RenderSettings::default()
        }
        .validate();

        assert_eq!(
            validated.sample_count,
            RenderSettings::default().sample_count
        );
        assert_eq!(
            validated.point_shadow_size,
            RenderSettings::default().point_shadow_size
        );
        assert_eq!(validated.resolution.width, Resolution::default().width);
        assert_eq!(validated.resolution.height, Resolution::default().height);
    }

    #[test]
    fn validate_preserves_valid_values() {
        let valid = RenderSettings {
            resolution: Resolution {
                width: 1920,
                height: 1080,
            },
            sample_count: 4,
            point_shadow_size: 2048,
            shading_path: ShadingPath::Deferred,
            ..RenderSettings::default()
        };

        let validated = valid.clone().validate();

        assert_eq!(validated.sample_count, valid.sample_count);
        assert_eq!(validated.point_shadow_size, valid.point_shadow_size);
        assert_eq!(validated.resolution.width, valid.resolution.width);
        assert_eq!(validated.shading_path, ShadingPath::Deferred);
    }

    #[test]
    fn validate_rejects_partial_skybox() {
        let validated = RenderSettings {
            skybox_textures: vec!["px.png".into(), "nx.png".into()],
            ..RenderSettings::default()
        }
        .validate();

        assert!(validated.skybox_textures.is_empty());
    }
}
