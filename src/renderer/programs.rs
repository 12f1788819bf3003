use std::collections::HashMap;

use crate::error::EngineError;
use crate::renderer::material::ShaderFeatures;
use crate::scene::LightKind;
use crate::settings::ShadingPath;

const FORWARD_SRC: &str = include_str!("../shader/forward.wgsl");
const AMBIENT_SRC: &str = include_str!("../shader/ambient.wgsl");
const DEPTH_SRC: &str = include_str!("../shader/depth.wgsl");
const SKYBOX_SRC: &str = include_str!("../shader/skybox.wgsl");
const GBUFFER_SRC: &str = include_str!("../shader/gbuffer.wgsl");
const DEFERRED_SRC: &str = include_str!("../shader/deferred_light.wgsl");
const POSTPROCESS_SRC: &str = include_str!("../shader/postprocess.wgsl");

/// Names of the fixed-function programs the pipeline can ask for.
pub const NAMED_PROGRAMS: &[&str] = &[
    "ambient",
    "skybox",
    "deferred_base",
    "deferred_light",
    "bloom_blur",
    "bloom_blend",
    "hdr",
    "passthrough",
];

/// Selects a compiled program variant: the material capability mask plus,
/// for lit passes, the light kind the variant shades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    pub features: ShaderFeatures,
    pub light: Option<LightKind>,
}

/// Uniform slots a program may or may not declare. Absent slots are skipped
/// silently at draw time instead of being queried every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformSlot {
    AmbientColor,
    LightSpace,
    FarClip,
    Specularity,
    BloomHorizontal,
    CameraPosition,
}

impl UniformSlot {
    pub const ALL: [UniformSlot; 6] = [
        UniformSlot::AmbientColor,
        UniformSlot::LightSpace,
        UniformSlot::FarClip,
        UniformSlot::Specularity,
        UniformSlot::BloomHorizontal,
        UniformSlot::CameraPosition,
    ];

    fn ident(self) -> &'static str {
        match self {
            UniformSlot::AmbientColor => "ambient_color",
            UniformSlot::LightSpace => "light_space",
            UniformSlot::FarClip => "far_clip",
            UniformSlot::Specularity => "specularity",
            UniformSlot::BloomHorizontal => "bloom_horizontal",
            UniformSlot::CameraPosition => "camera_pos",
        }
    }

    fn bit(self) -> u32 {
        match self {
            UniformSlot::AmbientColor => 1 << 0,
            UniformSlot::LightSpace => 1 << 1,
            UniformSlot::FarClip => 1 << 2,
            UniformSlot::Specularity => 1 << 3,
            UniformSlot::BloomHorizontal => 1 << 4,
            UniformSlot::CameraPosition => 1 << 5,
        }
    }
}

/// Bitset of the uniform slots a composed shader source actually references.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UniformSet(u32);

impl UniformSet {
    pub fn scan(source: &str) -> Self {
        let mut bits = 0;
        for slot in UniformSlot::ALL {
            if source.contains(slot.ident()) {
                bits |= slot.bit();
            }
        }
        Self(bits)
    }

    pub fn contains(&self, slot: UniformSlot) -> bool {
        self.0 & slot.bit() != 0
    }
}

/// One compiled-once program variant: the composed WGSL source, its entry
/// points and the uniform slots it declares.
pub struct Program {
    pub label: String,
    pub source: String,
    pub vs_entry: &'static str,
    pub fs_entry: Option<&'static str>,
    uniforms: UniformSet,
}

impl Program {
    fn new(
        label: impl Into<String>,
        source: String,
        vs_entry: &'static str,
        fs_entry: Option<&'static str>,
    ) -> Self {
        let uniforms = UniformSet::scan(&source);
        Self {
            label: label.into(),
            source,
            vs_entry,
            fs_entry,
            uniforms,
        }
    }

    pub fn has_uniform(&self, slot: UniformSlot) -> bool {
        self.uniforms.contains(slot)
    }
}

/// Prepend the feature/light constant header standing in for preprocessor
/// defines. The base source branches on these consts.
pub fn compose_source(base: &str, features: ShaderFeatures, light: Option<LightKind>) -> String {
    let mut header = String::new();
    for (name, flag) in [
        ("USE_DIFFUSE_MAP", ShaderFeatures::DIFFUSE),
        ("USE_SPECULAR", ShaderFeatures::SPECULAR),
        ("USE_NORMAL_MAP", ShaderFeatures::NORMAL),
        ("USE_BUMP_MAP", ShaderFeatures::BUMP),
    ] {
        header.push_str(&format!(
            "const {}: bool = {};\n",
            name,
            features.contains(flag)
        ));
    }
    if let Some(light) = light {
        header.push_str(&format!(
            "const LIGHT_DIRECTIONAL: bool = {};\n",
            light == LightKind::Directional
        ));
    }
    format!("{header}\n{base}")
}

/// All program variants the pipeline may use, compiled once at load time.
///
/// `prepare` receives every capability mask the level's materials use; asking
/// later for a combination that was not prepared is a configuration error.
pub struct ProgramRegistry {
    forward: HashMap<ProgramKey, Program>,
    gbuffer: HashMap<ShaderFeatures, Program>,
    depth: HashMap<LightKind, Program>,
    named: HashMap<String, Program>,
}

impl ProgramRegistry {
    pub fn prepare(
        feature_sets: &[ShaderFeatures],
        path: ShadingPath,
    ) -> Result<Self, EngineError> {
        let mut forward = HashMap::new();
        let mut gbuffer = HashMap::new();

        for &features in feature_sets {
            for kind in LightKind::ALL {
                let key = ProgramKey {
                    features,
                    light: Some(kind),
                };
                forward.entry(key).or_insert_with(|| {
                    Program::new(
                        format!("forward[{:?}|{:?}]", features, kind),
                        compose_source(FORWARD_SRC, features, Some(kind)),
                        "vs_main",
                        Some("fs_main"),
                    )
                });
            }
            if path == ShadingPath::Deferred {
                gbuffer.entry(features).or_insert_with(|| {
                    Program::new(
                        format!("gbuffer[{:?}]", features),
                        compose_source(GBUFFER_SRC, features, None),
                        "vs_main",
                        Some("fs_main"),
                    )
                });
            }
        }

        let mut depth = HashMap::new();
        for kind in LightKind::ALL {
            depth.insert(
                kind,
                Program::new(
                    format!("depth[{:?}]", kind),
                    compose_source(DEPTH_SRC, ShaderFeatures::empty(), Some(kind)),
                    "vs_main",
                    None,
                ),
            );
        }

        let mut named: HashMap<String, Program> = HashMap::new();
        named.insert(
            "ambient".to_owned(),
            Program::new("ambient", AMBIENT_SRC.to_owned(), "vs_main", Some("fs_main")),
        );
        named.insert(
            "skybox".to_owned(),
            Program::new("skybox", SKYBOX_SRC.to_owned(), "vs_main", Some("fs_main")),
        );
        named.insert(
            "deferred_base".to_owned(),
            Program::new(
                "deferred_base",
                DEFERRED_SRC.to_owned(),
                "vs_fullscreen",
                Some("fs_base"),
            ),
        );
        named.insert(
            "deferred_light".to_owned(),
            Program::new(
                "deferred_light",
                DEFERRED_SRC.to_owned(),
                "vs_fullscreen",
                Some("fs_point"),
            ),
        );
        named.insert(
            "bloom_blur".to_owned(),
            Program::new(
                "bloom_blur",
                POSTPROCESS_SRC.to_owned(),
                "vs_fullscreen",
                Some("fs_bloom_blur"),
            ),
        );
        named.insert(
            "bloom_blend".to_owned(),
            Program::new(
                "bloom_blend",
                POSTPROCESS_SRC.to_owned(),
                "vs_fullscreen",
                Some("fs_bloom_blend"),
            ),
        );
        named.insert(
            "hdr".to_owned(),
            Program::new(
                "hdr",
                POSTPROCESS_SRC.to_owned(),
                "vs_fullscreen",
                Some("fs_hdr"),
            ),
        );
        named.insert(
            "passthrough".to_owned(),
            Program::new(
                "passthrough",
                POSTPROCESS_SRC.to_owned(),
                "vs_fullscreen",
                Some("fs_passthrough"),
            ),
        );

        Ok(Self {
            forward,
            gbuffer,
            depth,
            named,
        })
    }

    pub fn forward(
        &self,
        features: ShaderFeatures,
        light: LightKind,
    ) -> Result<&Program, EngineError> {
        let key = ProgramKey {
            features,
            light: Some(light),
        };
        self.forward.get(&key).ok_or_else(|| {
            EngineError::MissingProgram(format!("forward[{:?}|{:?}]", features, light))
        })
    }

    pub fn gbuffer(&self, features: ShaderFeatures) -> Result<&Program, EngineError> {
        self.gbuffer
            .get(&features)
            .ok_or_else(|| EngineError::MissingProgram(format!("gbuffer[{:?}]", features)))
    }

    pub fn depth(&self, light: LightKind) -> &Program {
        // Depth variants are unconditionally prepared for both kinds.
        &self.depth[&light]
    }

    /// Register a user post-process program. The source must provide a
    /// `vs_fullscreen` vertex entry and an `fs_main` fragment entry against
    /// the post-stage bind group interface.
    pub fn register_effect(&mut self, name: impl Into<String>, source: String) {
        let name = name.into();
        let program = Program::new(name.clone(), source, "vs_fullscreen", Some("fs_main"));
        self.named.insert(name, program);
    }

    pub fn named(&self, name: &str) -> Result<&Program, EngineError> {
        self.named
            .get(name)
            .ok_or_else(|| EngineError::MissingProgram(name.to_owned()))
    }

    pub fn forward_keys(&self) -> impl Iterator<Item = &ProgramKey> {
        self.forward.keys()
    }

    pub fn gbuffer_keys(&self) -> impl Iterator<Item = &ShaderFeatures> {
        self.gbuffer.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_emits_feature_constants() {
        let source = compose_source(
            "fn main() {}",
            ShaderFeatures::DIFFUSE | ShaderFeatures::NORMAL,
            Some(LightKind::Point),
        );
        assert!(source.contains("const USE_DIFFUSE_MAP: bool = true;"));
        assert!(source.contains("const USE_SPECULAR: bool = false;"));
        assert!(source.contains("const USE_NORMAL_MAP: bool = true;"));
        assert!(source.contains("const LIGHT_DIRECTIONAL: bool = false;"));
    }

    #[test]
    fn forward_variants_declare_lighting_uniforms() {
        let registry =
            ProgramRegistry::prepare(&[ShaderFeatures::DIFFUSE], ShadingPath::Forward).unwrap();
        let program = registry
            .forward(ShaderFeatures::DIFFUSE, LightKind::Point)
            .unwrap();
        assert!(program.has_uniform(UniformSlot::FarClip));
        assert!(program.has_uniform(UniformSlot::LightSpace));
    }

    #[test]
    fn ambient_program_skips_lighting_uniforms() {
        let registry = ProgramRegistry::prepare(&[], ShadingPath::Forward).unwrap();
        let ambient = registry.named("ambient").unwrap();
        assert!(ambient.has_uniform(UniformSlot::AmbientColor));
        assert!(!ambient.has_uniform(UniformSlot::FarClip));
        assert!(!ambient.has_uniform(UniformSlot::LightSpace));
    }

    #[test]
    fn unprepared_combination_is_a_configuration_error() {
        let registry =
            ProgramRegistry::prepare(&[ShaderFeatures::DIFFUSE], ShadingPath::Forward).unwrap();
        let missing = registry.forward(ShaderFeatures::BUMP, LightKind::Point);
        assert!(matches!(missing, Err(EngineError::MissingProgram(_))));
    }

    #[test]
    fn gbuffer_variants_exist_only_on_the_deferred_path() {
        let forward =
            ProgramRegistry::prepare(&[ShaderFeatures::DIFFUSE], ShadingPath::Forward).unwrap();
        assert!(forward.gbuffer(ShaderFeatures::DIFFUSE).is_err());

        let deferred =
            ProgramRegistry::prepare(&[ShaderFeatures::DIFFUSE], ShadingPath::Deferred).unwrap();
        assert!(deferred.gbuffer(ShaderFeatures::DIFFUSE).is_ok());
    }

    #[test]
    fn every_fixed_function_program_is_registered() {
        let registry = ProgramRegistry::prepare(&[], ShadingPath::Forward).unwrap();
        for &name in NAMED_PROGRAMS {
            assert!(registry.named(name).is_ok(), "missing {}", name);
        }
        assert!(registry.named("nonexistent").is_err());
    }
}
