use std::collections::HashSet;

use glam::Mat4;
use log::warn;

use crate::asset::{Handle, Mesh, Resources};
use crate::renderer::batches::RenderIndex;
use crate::renderer::culling::{instance_visible, Frustum};
use crate::renderer::material::{Material, ShaderFeatures};
use crate::renderer::postprocess::PostChainPlan;
use crate::scene::{Camera, LightKind, ObjectId, Scene, SceneObject};
use crate::settings::ShadingPath;

/// One draw: which mesh, placed by which object, shaded with which material.
/// The capability mask picks the program variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub mesh: Handle<Mesh>,
    pub material: Handle<Material>,
    pub object: ObjectId,
    pub features: ShaderFeatures,
}

/// The scene passes of one frame in issue order.
#[derive(Debug, Clone, PartialEq)]
pub enum ScenePass {
    Ambient {
        draws: Vec<DrawCall>,
    },
    GeometryToGBuffer {
        draws: Vec<DrawCall>,
    },
    /// Depth-only pass into the light's shadow map. Present for every light
    /// with an empty draw list when its shadowing is disabled, so the map is
    /// still bound and cleared to all-far.
    ShadowDepth {
        light: ObjectId,
        kind: LightKind,
        draws: Vec<DrawCall>,
    },
    LitForward {
        light: ObjectId,
        kind: LightKind,
        draws: Vec<DrawCall>,
    },
    /// Fullscreen deferred shading: one base quad carrying the ambient term
    /// and the directional contribution, then one additive quad per point
    /// light. Point lights do not sample shadow maps on this path.
    DeferredLighting {
        directional: Vec<ObjectId>,
        point: Vec<ObjectId>,
    },
    Skybox {
        draws: Vec<DrawCall>,
    },
}

/// Everything the GPU executor needs for one frame, fully decided up front:
/// the ordered scene passes and the post-process chain.
pub struct FramePlan {
    pub passes: Vec<ScenePass>,
    pub post: PostChainPlan,
    /// Mesh ids that survived the frustum test during the first geometry
    /// pass; every lit pass reuses this instead of re-testing.
    pub visible: HashSet<Handle<Mesh>>,
    pub culled: u32,
}

impl FramePlan {
    pub fn build(
        scene: &Scene,
        camera: &Camera,
        resources: &Resources,
        index: &RenderIndex,
        path: ShadingPath,
    ) -> Self {
        let frustum = camera.frustum();
        let view = camera.view();

        let mut visible = HashSet::new();
        let mut culled = 0u32;
        let geometry_draws =
            collect_geometry_draws(scene, resources, index, &frustum, view, &mut visible, &mut culled);

        let mut passes = Vec::new();
        match path {
            ShadingPath::Forward => {
                passes.push(ScenePass::Ambient {
                    draws: geometry_draws,
                });

                for kind in LightKind::ALL {
                    for &light in index.lights(kind) {
                        let shadows_enabled = scene
                            .object(light)
                            .and_then(SceneObject::light)
                            .is_some_and(|l| l.shadows_enabled);

                        let shadow_draws = if shadows_enabled {
                            collect_shadow_caster_draws(scene, index)
                        } else {
                            Vec::new()
                        };
                        passes.push(ScenePass::ShadowDepth {
                            light,
                            kind,
                            draws: shadow_draws,
                        });

                        passes.push(ScenePass::LitForward {
                            light,
                            kind,
                            draws: collect_visible_draws(index, &visible),
                        });
                    }
                }

                if let Some(draws) = skybox_draws(scene, resources) {
                    passes.push(ScenePass::Skybox { draws });
                }
            }
            ShadingPath::Deferred => {
                passes.push(ScenePass::GeometryToGBuffer {
                    draws: geometry_draws,
                });
                passes.push(ScenePass::DeferredLighting {
                    directional: index.lights(LightKind::Directional).to_vec(),
                    point: index.lights(LightKind::Point).to_vec(),
                });
            }
        }

        let post = PostChainPlan::build(
            camera.bloom_iterations(),
            camera.hdr_enabled(),
            camera.postprocesses(),
        );

        Self {
            passes,
            post,
            visible,
            culled,
        }
    }

    /// Total geometry draws across every scene pass.
    pub fn draw_count(&self) -> usize {
        self.passes
            .iter()
            .map(|pass| match pass {
                ScenePass::Ambient { draws }
                | ScenePass::GeometryToGBuffer { draws }
                | ScenePass::ShadowDepth { draws, .. }
                | ScenePass::LitForward { draws, .. }
                | ScenePass::Skybox { draws } => draws.len(),
                ScenePass::DeferredLighting { .. } => 0,
            })
            .sum()
    }
}

/// The first geometry sweep: frustum-test every batched instance, record the
/// survivors in the per-frame visible set.
fn collect_geometry_draws(
    scene: &Scene,
    resources: &Resources,
    index: &RenderIndex,
    frustum: &Frustum,
    view: Mat4,
    visible: &mut HashSet<Handle<Mesh>>,
    culled: &mut u32,
) -> Vec<DrawCall> {
    let mut draws = Vec::new();
    for (features, buckets) in index.buckets() {
        for instances in buckets.values() {
            for instance in instances {
                let Some(object) = scene.object(instance.object) else {
                    continue;
                };
                let Some(mesh) = resources.mesh(instance.mesh) else {
                    warn!("Skipping draw with dangling mesh handle");
                    continue;
                };

                if !instance_visible(
                    frustum,
                    view,
                    object.transform.matrix(),
                    mesh.center(),
                    mesh.bounding_radius(),
                    object.transform.max_scale(),
                ) {
                    *culled += 1;
                    continue;
                }

                visible.insert(instance.mesh);
                draws.push(DrawCall {
                    mesh: instance.mesh,
                    material: instance.material,
                    object: instance.object,
                    features,
                });
            }
        }
    }
    draws
}

/// Shadow casters ignore the camera frustum: an off-screen caster still
/// throws a shadow into view.
fn collect_shadow_caster_draws(scene: &Scene, index: &RenderIndex) -> Vec<DrawCall> {
    let mut draws = Vec::new();
    for (features, buckets) in index.buckets() {
        for instances in buckets.values() {
            for instance in instances {
                let Some(object) = scene.object(instance.object) else {
                    continue;
                };
                if !object.is_shadow_caster() {
                    continue;
                }
                draws.push(DrawCall {
                    mesh: instance.mesh,
                    material: instance.material,
                    object: instance.object,
                    features,
                });
            }
        }
    }
    draws
}

/// Lit passes redraw only what the first geometry sweep marked visible.
fn collect_visible_draws(index: &RenderIndex, visible: &HashSet<Handle<Mesh>>) -> Vec<DrawCall> {
    let mut draws = Vec::new();
    for (features, buckets) in index.buckets() {
        for instances in buckets.values() {
            for instance in instances {
                if !visible.contains(&instance.mesh) {
                    continue;
                }
                draws.push(DrawCall {
                    mesh: instance.mesh,
                    material: instance.material,
                    object: instance.object,
                    features,
                });
            }
        }
    }
    draws
}

fn skybox_draws(scene: &Scene, resources: &Resources) -> Option<Vec<DrawCall>> {
    let skybox = scene.skybox()?;
    let material = skybox.material()?;
    let features = resources
        .material(material)
        .map(Material::features)
        .unwrap_or_default();
    let model = skybox.model_name().and_then(|name| resources.model(name))?;

    Some(
        model
            .meshes()
            .iter()
            .map(|&mesh| DrawCall {
                mesh,
                material,
                object: skybox.id(),
                features,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Model;
    use crate::renderer::vertex::v;
    use crate::scene::components::{Component, Light};
    use glam::Vec3;

    fn unit_cube_mesh() -> Mesh {
        let vertices = vec![
            v([-0.5, -0.5, -0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
            v([0.5, 0.5, 0.5], [0.0, 1.0, 0.0], [1.0, 1.0]),
        ];
        Mesh::new(vertices, vec![0, 1, 0])
    }

    struct Fixture {
        scene: Scene,
        resources: Resources,
        index: RenderIndex,
        camera: Camera,
    }

    fn fixture() -> (Fixture, ObjectId) {
        let mut resources = Resources::new();
        let mesh = resources.add_mesh(unit_cube_mesh());
        resources.add_model("cube", Model::new(vec![mesh]));
        let material = resources.create_material();

        let mut scene = Scene::new();
        let cube = scene.create_object("cube");
        scene.add_component(
            cube,
            Component::MeshRenderer {
                model: "cube".into(),
            },
        );
        scene.add_component(cube, Component::Material(material));
        // Place the cube in front of the camera, which looks down +Z by
        // default basis but view space is -Z; camera at origin facing +Z.
        scene.object_mut(cube).unwrap().transform.position = Vec3::new(0.0, 0.0, 5.0);

        let mut camera = Camera::new(1.0);
        camera.transform.position = Vec3::ZERO;

        let mut index = RenderIndex::new();
        index.rebuild(&scene, &resources);

        (
            Fixture {
                scene,
                resources,
                index,
                camera,
            },
            cube,
        )
    }

    fn plan(f: &Fixture) -> FramePlan {
        FramePlan::build(
            &f.scene,
            &f.camera,
            &f.resources,
            &f.index,
            ShadingPath::Forward,
        )
    }

    #[test]
    fn forward_frame_starts_with_ambient() {
        let (f, _) = fixture();
        let plan = plan(&f);
        assert!(matches!(plan.passes.first(), Some(ScenePass::Ambient { .. })));
    }

    #[test]
    fn lights_add_shadow_then_lit_passes_in_order() {
        let (mut f, _) = fixture();
        let lamp = f.scene.create_object("sun");
        f.scene.add_component(
            lamp,
            Component::Light(Light::new(LightKind::Directional).with_shadows(true)),
        );
        f.index.rebuild(&f.scene, &f.resources);

        let plan = plan(&f);
        let kinds: Vec<&str> = plan
            .passes
            .iter()
            .map(|p| match p {
                ScenePass::Ambient { .. } => "ambient",
                ScenePass::ShadowDepth { .. } => "shadow",
                ScenePass::LitForward { .. } => "lit",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, ["ambient", "shadow", "lit"]);
    }

    #[test]
    fn disabled_shadowing_keeps_the_depth_pass_empty_but_lit_runs() {
        let (mut f, _) = fixture();
        let lamp = f.scene.create_object("sun");
        f.scene.add_component(
            lamp,
            Component::Light(Light::new(LightKind::Directional).with_shadows(false)),
        );
        f.index.rebuild(&f.scene, &f.resources);

        let plan = plan(&f);
        let shadow = plan
            .passes
            .iter()
            .find_map(|p| match p {
                ScenePass::ShadowDepth { draws, .. } => Some(draws),
                _ => None,
            })
            .expect("depth pass must still be planned");
        assert!(shadow.is_empty());

        let lit = plan
            .passes
            .iter()
            .find_map(|p| match p {
                ScenePass::LitForward { draws, .. } => Some(draws),
                _ => None,
            })
            .expect("lit pass must still run");
        assert_eq!(lit.len(), 1);
    }

    #[test]
    fn culled_instances_skip_ambient_and_lit_but_still_cast_shadows() {
        let (mut f, cube) = fixture();
        // Move the cube far outside the frustum.
        f.scene.object_mut(cube).unwrap().transform.position = Vec3::new(1000.0, 0.0, 5.0);
        let lamp = f.scene.create_object("sun");
        f.scene.add_component(
            lamp,
            Component::Light(Light::new(LightKind::Directional).with_shadows(true)),
        );
        f.index.rebuild(&f.scene, &f.resources);

        let plan = plan(&f);
        assert_eq!(plan.culled, 1);
        for pass in &plan.passes {
            match pass {
                ScenePass::Ambient { draws } | ScenePass::LitForward { draws, .. } => {
                    assert!(draws.is_empty())
                }
                ScenePass::ShadowDepth { draws, .. } => assert_eq!(draws.len(), 1),
                _ => {}
            }
        }
    }

    #[test]
    fn non_casters_stay_out_of_depth_passes() {
        let (mut f, cube) = fixture();
        f.scene.object_mut(cube).unwrap().set_shadow_caster(false);
        let lamp = f.scene.create_object("sun");
        f.scene.add_component(
            lamp,
            Component::Light(Light::new(LightKind::Directional).with_shadows(true)),
        );
        f.index.rebuild(&f.scene, &f.resources);

        let plan = plan(&f);
        let shadow = plan
            .passes
            .iter()
            .find_map(|p| match p {
                ScenePass::ShadowDepth { draws, .. } => Some(draws),
                _ => None,
            })
            .unwrap();
        assert!(shadow.is_empty());
    }

    #[test]
    fn directional_lights_precede_point_lights() {
        let (mut f, _) = fixture();
        let point = f.scene.create_object("bulb");
        f.scene
            .add_component(point, Component::Light(Light::new(LightKind::Point)));
        let sun = f.scene.create_object("sun");
        f.scene
            .add_component(sun, Component::Light(Light::new(LightKind::Directional)));
        f.index.rebuild(&f.scene, &f.resources);

        let plan = plan(&f);
        let lit_kinds: Vec<LightKind> = plan
            .passes
            .iter()
            .filter_map(|p| match p {
                ScenePass::LitForward { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(lit_kinds, [LightKind::Directional, LightKind::Point]);
    }

    #[test]
    fn deferred_path_plans_gbuffer_then_fullscreen_lighting() {
        let (mut f, _) = fixture();
        let bulb = f.scene.create_object("bulb");
        f.scene
            .add_component(bulb, Component::Light(Light::new(LightKind::Point)));
        f.index.rebuild(&f.scene, &f.resources);

        let plan = FramePlan::build(
            &f.scene,
            &f.camera,
            &f.resources,
            &f.index,
            ShadingPath::Deferred,
        );
        assert!(matches!(
            plan.passes[0],
            ScenePass::GeometryToGBuffer { .. }
        ));
        match &plan.passes[1] {
            ScenePass::DeferredLighting { point, .. } => assert_eq!(point, &[bulb]),
            other => panic!("expected deferred lighting, got {:?}", other),
        }
    }
}
