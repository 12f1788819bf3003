use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use log::{error, warn};
use wgpu::util::DeviceExt;
use winit::{dpi::PhysicalSize, window::Window};

use crate::asset::{CubeTexture, Handle, Mesh, Resources, TextureData};
use crate::error::EngineError;
use crate::renderer::batches::RenderIndex;
use crate::renderer::context::RenderContext;
use crate::renderer::frame::{DrawCall, FramePlan, ScenePass};
use crate::renderer::material::{Material, ShaderFeatures, TextureSlot};
use crate::renderer::postprocess::{PostStage, TexRef};
use crate::renderer::programs::{Program, ProgramKey, ProgramRegistry, UniformSlot};
use crate::renderer::shadow::{
    DepthMap, DirectionalShadowMap, PointShadowMap, SHADOW_FORMAT,
};
use crate::renderer::targets::{
    GBuffer, PingPongTargets, ResolveTarget, SceneTarget, DEPTH_FORMAT, SCENE_FORMAT,
};
use crate::renderer::vertex::Vertex;
use crate::scene::{Camera, LightKind, ObjectId, Scene};
use crate::settings::{RenderSettings, ShadingPath};

/// Alignment of one slot in the dynamic-offset uniform buffers.
const SLOT_STRIDE: u64 = 256;
const INITIAL_OBJECT_SLOTS: u32 = 256;
const INITIAL_LIGHT_SLOTS: u32 = 16;
const INITIAL_POST_SLOTS: u32 = 32;

/// Per-frame counters, reset every [`Renderer::render`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
    pub draw_calls: u32,
    pub culled: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FrameUniforms {
    view: [[f32; 4]; 4],
    proj: [[f32; 4]; 4],
    view_proj: [[f32; 4]; 4],
    camera_pos: [f32; 4],
    ambient_color: [f32; 4],
    far_clip: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ObjectUniforms {
    model: [[f32; 4]; 4],
    // x: 1.0 when the object receives shadows
    params: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct LightUniforms {
    color: [f32; 4],
    position_power: [f32; 4],
    direction: [f32; 4],
    light_space: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PostParams {
    // x: 1.0 for a horizontal blur direction
    bloom_horizontal: [f32; 4],
}

struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

impl GpuMesh {
    fn upload(device: &wgpu::Device, mesh: &Mesh) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("VertexBuffer"),
            contents: bytemuck::cast_slice(mesh.vertices()),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("IndexBuffer"),
            contents: bytemuck::cast_slice(mesh.indices()),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count(),
        }
    }
}

/// A growable dynamic-offset uniform buffer; one aligned slot per draw,
/// light or post stage.
struct SlotBuffer {
    buffer: wgpu::Buffer,
    capacity: u32,
    label: &'static str,
}

impl SlotBuffer {
    fn new(device: &wgpu::Device, label: &'static str, capacity: u32) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: capacity as u64 * SLOT_STRIDE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            capacity,
            label,
        }
    }

    /// Grow to hold `needed` slots. Returns true when the buffer was
    /// recreated and dependent bind groups must be rebuilt.
    fn ensure(&mut self, device: &wgpu::Device, needed: u32) -> bool {
        if needed <= self.capacity {
            return false;
        }
        let capacity = needed.next_power_of_two();
        *self = Self::new(device, self.label, capacity);
        true
    }

    fn write<T: Pod>(&self, queue: &wgpu::Queue, slot: u32, data: &T) {
        queue.write_buffer(
            &self.buffer,
            slot as u64 * SLOT_STRIDE,
            bytemuck::bytes_of(data),
        );
    }

    fn offset(slot: u32) -> u32 {
        (slot as u64 * SLOT_STRIDE) as u32
    }
}

/// Every bind group layout the pipelines share.
struct BindLayouts {
    frame: wgpu::BindGroupLayout,
    object: wgpu::BindGroupLayout,
    material: wgpu::BindGroupLayout,
    skybox_material: wgpu::BindGroupLayout,
    light_plain: wgpu::BindGroupLayout,
    light_shadow: wgpu::BindGroupLayout,
    gbuffer_read: wgpu::BindGroupLayout,
    post_params: wgpu::BindGroupLayout,
    post_src: wgpu::BindGroupLayout,
}

fn uniform_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
    dynamic: bool,
    min_size: u64,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: NonZeroU64::new(min_size),
        },
        count: None,
    }
}

fn texture_entry(binding: u32, dimension: wgpu::TextureViewDimension) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: dimension,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

impl BindLayouts {
    fn new(device: &wgpu::Device) -> Self {
        let frame = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("FrameLayout"),
            entries: &[uniform_entry(
                0,
                wgpu::ShaderStages::VERTEX_FRAGMENT,
                false,
                std::mem::size_of::<FrameUniforms>() as u64,
            )],
        });

        let object = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ObjectLayout"),
            entries: &[uniform_entry(
                0,
                wgpu::ShaderStages::VERTEX_FRAGMENT,
                true,
                std::mem::size_of::<ObjectUniforms>() as u64,
            )],
        });

        let material = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("MaterialLayout"),
            entries: &[
                texture_entry(0, wgpu::TextureViewDimension::D2),
                texture_entry(1, wgpu::TextureViewDimension::D2),
                texture_entry(2, wgpu::TextureViewDimension::D2),
                sampler_entry(3),
                uniform_entry(4, wgpu::ShaderStages::FRAGMENT, false, 16),
            ],
        });

        let skybox_material = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("SkyboxMaterialLayout"),
            entries: &[
                texture_entry(0, wgpu::TextureViewDimension::Cube),
                sampler_entry(1),
            ],
        });

        let light_plain = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("LightLayout"),
            entries: &[uniform_entry(
                0,
                wgpu::ShaderStages::VERTEX_FRAGMENT,
                true,
                std::mem::size_of::<LightUniforms>() as u64,
            )],
        });

        let light_shadow = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("LightShadowLayout"),
            entries: &[
                uniform_entry(
                    0,
                    wgpu::ShaderStages::VERTEX_FRAGMENT,
                    true,
                    std::mem::size_of::<LightUniforms>() as u64,
                ),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                    count: None,
                },
            ],
        });

        let gbuffer_read = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("GBufferReadLayout"),
            entries: &[
                texture_entry(0, wgpu::TextureViewDimension::D2),
                texture_entry(1, wgpu::TextureViewDimension::D2),
                texture_entry(2, wgpu::TextureViewDimension::D2),
                sampler_entry(3),
            ],
        });

        let post_params = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("PostParamsLayout"),
            entries: &[uniform_entry(
                0,
                wgpu::ShaderStages::FRAGMENT,
                true,
                std::mem::size_of::<PostParams>() as u64,
            )],
        });

        let post_src = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("PostSourceLayout"),
            entries: &[
                texture_entry(0, wgpu::TextureViewDimension::D2),
                texture_entry(1, wgpu::TextureViewDimension::D2),
                sampler_entry(2),
            ],
        });

        Self {
            frame,
            object,
            material,
            skybox_material,
            light_plain,
            light_shadow,
            gbuffer_read,
            post_params,
            post_src,
        }
    }
}

fn additive_blend() -> wgpu::BlendState {
    wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::One,
            operation: wgpu::BlendOperation::Add,
        },
        alpha: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::One,
            operation: wgpu::BlendOperation::Add,
        },
    }
}

fn scene_targets(blend: Option<wgpu::BlendState>) -> [Option<wgpu::ColorTargetState>; 2] {
    let target = wgpu::ColorTargetState {
        format: SCENE_FORMAT,
        blend,
        write_mask: wgpu::ColorWrites::ALL,
    };
    [Some(target.clone()), Some(target)]
}

struct PipelineOptions<'a> {
    label: &'a str,
    targets: Vec<Option<wgpu::ColorTargetState>>,
    depth: Option<wgpu::DepthStencilState>,
    cull: Option<wgpu::Face>,
    sample_count: u32,
    geometry_input: bool,
}

fn depth_state(compare: wgpu::CompareFunction, bias: bool) -> wgpu::DepthStencilState {
    wgpu::DepthStencilState {
        format: DEPTH_FORMAT,
        depth_write_enabled: true,
        depth_compare: compare,
        stencil: wgpu::StencilState::default(),
        bias: if bias {
            wgpu::DepthBiasState {
                constant: 2,
                slope_scale: 2.0,
                clamp: 0.0,
            }
        } else {
            wgpu::DepthBiasState::default()
        },
    }
}

fn build_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    program: &Program,
    options: PipelineOptions<'_>,
) -> wgpu::RenderPipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&program.label),
        source: wgpu::ShaderSource::Wgsl(program.source.as_str().into()),
    });

    let buffers = if options.geometry_input {
        vec![Vertex::layout()]
    } else {
        Vec::new()
    };

    let depth_stencil = if program.fs_entry.is_none() {
        // Depth-only shadow pipeline targets the shadow map format.
        options.depth.map(|state| wgpu::DepthStencilState {
            format: SHADOW_FORMAT,
            ..state
        })
    } else {
        options.depth
    };

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(options.label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some(program.vs_entry),
            buffers: &buffers,
            compilation_options: Default::default(),
        },
        fragment: program.fs_entry.map(|entry| wgpu::FragmentState {
            module: &module,
            entry_point: Some(entry),
            targets: &options.targets,
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: options.cull,
            front_face: wgpu::FrontFace::Ccw,
            ..Default::default()
        },
        depth_stencil,
        multisample: wgpu::MultisampleState {
            count: options.sample_count,
            ..Default::default()
        },
        multiview: None,
        cache: None,
    })
}

/// Compiled pipelines for every program variant the registry prepared.
struct PipelineCache {
    ambient: wgpu::RenderPipeline,
    skybox: wgpu::RenderPipeline,
    depth: [wgpu::RenderPipeline; LightKind::COUNT],
    forward: HashMap<ProgramKey, wgpu::RenderPipeline>,
    gbuffer: HashMap<ShaderFeatures, wgpu::RenderPipeline>,
    deferred_base: Option<wgpu::RenderPipeline>,
    deferred_point: Option<wgpu::RenderPipeline>,
    post: HashMap<String, wgpu::RenderPipeline>,
    passthrough: wgpu::RenderPipeline,
}

impl PipelineCache {
    fn build(
        context: &RenderContext,
        registry: &ProgramRegistry,
        layouts: &BindLayouts,
        path: ShadingPath,
    ) -> Result<Self, EngineError> {
        let device = &context.device;
        let samples = context.sample_count;

        let scene_pl = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("ScenePipelineLayout"),
            bind_group_layouts: &[&layouts.frame, &layouts.object, &layouts.material],
            push_constant_ranges: &[],
        });
        let lit_pl = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("LitPipelineLayout"),
            bind_group_layouts: &[
                &layouts.frame,
                &layouts.object,
                &layouts.material,
                &layouts.light_shadow,
            ],
            push_constant_ranges: &[],
        });
        let skybox_pl = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("SkyboxPipelineLayout"),
            bind_group_layouts: &[&layouts.frame, &layouts.object, &layouts.skybox_material],
            push_constant_ranges: &[],
        });
        let depth_pl = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("DepthPipelineLayout"),
            bind_group_layouts: &[&layouts.light_plain, &layouts.object],
            push_constant_ranges: &[],
        });
        let deferred_pl = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("DeferredPipelineLayout"),
            bind_group_layouts: &[&layouts.frame, &layouts.gbuffer_read, &layouts.light_plain],
            push_constant_ranges: &[],
        });
        let post_pl = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("PostPipelineLayout"),
            bind_group_layouts: &[&layouts.post_params, &layouts.post_src],
            push_constant_ranges: &[],
        });

        let ambient = build_pipeline(
            device,
            &scene_pl,
            registry.named("ambient")?,
            PipelineOptions {
                label: "AmbientPipeline",
                targets: scene_targets(None).to_vec(),
                depth: Some(depth_state(wgpu::CompareFunction::Less, false)),
                cull: Some(wgpu::Face::Back),
                sample_count: samples,
                geometry_input: true,
            },
        );

        let skybox = build_pipeline(
            device,
            &skybox_pl,
            registry.named("skybox")?,
            PipelineOptions {
                label: "SkyboxPipeline",
                targets: scene_targets(None).to_vec(),
                depth: Some(depth_state(wgpu::CompareFunction::LessEqual, false)),
                // Viewed from inside the cube, so the usual back-face cull
                // flips to the front faces.
                cull: Some(wgpu::Face::Front),
                sample_count: samples,
                geometry_input: true,
            },
        );

        let depth = [LightKind::Directional, LightKind::Point].map(|kind| {
            build_pipeline(
                device,
                &depth_pl,
                registry.depth(kind),
                PipelineOptions {
                    label: "ShadowDepthPipeline",
                    targets: Vec::new(),
                    depth: Some(depth_state(wgpu::CompareFunction::LessEqual, true)),
                    cull: Some(wgpu::Face::Back),
                    sample_count: 1,
                    geometry_input: true,
                },
            )
        });

        let mut forward = HashMap::new();
        for key in registry.forward_keys() {
            let program = registry.forward(key.features, key.light.unwrap_or(LightKind::Point))?;
            // Every lit variant must sample the shadow transform.
            debug_assert!(program.has_uniform(UniformSlot::LightSpace));
            forward.insert(
                *key,
                build_pipeline(
                    device,
                    &lit_pl,
                    program,
                    PipelineOptions {
                        label: &program.label,
                        targets: scene_targets(Some(additive_blend())).to_vec(),
                        depth: Some(depth_state(wgpu::CompareFunction::LessEqual, false)),
                        cull: Some(wgpu::Face::Back),
                        sample_count: samples,
                        geometry_input: true,
                    },
                ),
            );
        }

        let mut gbuffer = HashMap::new();
        let mut deferred_base = None;
        let mut deferred_point = None;
        if path == ShadingPath::Deferred {
            for &features in registry.gbuffer_keys() {
                let program = registry.gbuffer(features)?;
                let targets = GBuffer::COLOR_FORMATS
                    .iter()
                    .map(|&format| {
                        Some(wgpu::ColorTargetState {
                            format,
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })
                    })
                    .collect();
                gbuffer.insert(
                    features,
                    build_pipeline(
                        device,
                        &scene_pl,
                        program,
                        PipelineOptions {
                            label: &program.label,
                            targets,
                            depth: Some(depth_state(wgpu::CompareFunction::Less, false)),
                            cull: Some(wgpu::Face::Back),
                            sample_count: 1,
                            geometry_input: true,
                        },
                    ),
                );
            }

            deferred_base = Some(build_pipeline(
                device,
                &deferred_pl,
                registry.named("deferred_base")?,
                PipelineOptions {
                    label: "DeferredBasePipeline",
                    targets: scene_targets(None).to_vec(),
                    depth: None,
                    cull: None,
                    sample_count: samples,
                    geometry_input: false,
                },
            ));
            deferred_point = Some(build_pipeline(
                device,
                &deferred_pl,
                registry.named("deferred_light")?,
                PipelineOptions {
                    label: "DeferredPointPipeline",
                    targets: scene_targets(Some(additive_blend())).to_vec(),
                    depth: None,
                    cull: None,
                    sample_count: samples,
                    geometry_input: false,
                },
            ));
        }

        let post_target = vec![Some(wgpu::ColorTargetState {
            format: SCENE_FORMAT,
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let mut post = HashMap::new();
        // "passthrough" appears twice: here targeting the off-screen format
        // (plain copies between targets) and below targeting the surface.
        for name in ["bloom_blur", "bloom_blend", "hdr", "passthrough"] {
            post.insert(
                name.to_owned(),
                build_pipeline(
                    device,
                    &post_pl,
                    registry.named(name)?,
                    PipelineOptions {
                        label: name,
                        targets: post_target.clone(),
                        depth: None,
                        cull: None,
                        sample_count: 1,
                        geometry_input: false,
                    },
                ),
            );
        }

        let passthrough = build_pipeline(
            device,
            &post_pl,
            registry.named("passthrough")?,
            PipelineOptions {
                label: "PassthroughPipeline",
                targets: vec![Some(wgpu::ColorTargetState {
                    format: context.config.format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                depth: None,
                cull: None,
                sample_count: 1,
                geometry_input: false,
            },
        );

        Ok(Self {
            ambient,
            skybox,
            depth,
            forward,
            gbuffer,
            deferred_base,
            deferred_point,
            post,
            passthrough,
        })
    }
}

/// Pipeline orchestrator: owns every GPU resource, rebuilds the batching
/// index when stale, plans the frame and replays the plan on the device.
/// Strictly one frame at a time on the thread owning the context.
pub struct Renderer {
    context: RenderContext,
    settings: RenderSettings,
    registry: ProgramRegistry,
    layouts: BindLayouts,
    pipelines: PipelineCache,

    scene_target: SceneTarget,
    resolved: ResolveTarget,
    ping: PingPongTargets,
    gbuffer: Option<GBuffer>,
    gbuffer_bind_group: Option<wgpu::BindGroup>,

    shadow_dir: DirectionalShadowMap,
    shadow_point: PointShadowMap,

    frame_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    objects: SlotBuffer,
    objects_bind_group: wgpu::BindGroup,
    lights: SlotBuffer,
    light_depth_bind_group: wgpu::BindGroup,
    light_lit_bind_groups: [wgpu::BindGroup; LightKind::COUNT],
    post_params: SlotBuffer,
    post_params_bind_group: wgpu::BindGroup,

    material_sampler: wgpu::Sampler,
    shadow_sampler: wgpu::Sampler,
    post_sampler: wgpu::Sampler,
    dummy_view: wgpu::TextureView,
    texture_views: HashMap<String, wgpu::TextureView>,
    material_bind_groups: HashMap<Handle<Material>, wgpu::BindGroup>,
    skybox_bind_groups: HashMap<Handle<Material>, wgpu::BindGroup>,
    meshes: HashMap<Handle<Mesh>, GpuMesh>,

    index: RenderIndex,
}

impl Renderer {
    pub fn new(
        window: Arc<Window>,
        settings: RenderSettings,
        resources: &Resources,
    ) -> Result<Self, EngineError> {
        let settings = settings.validate();
        let context = RenderContext::new(window, &settings)?;
        let device = &context.device;

        let width = settings.resolution.width;
        let height = settings.resolution.height;

        let mut shadow_dir = DirectionalShadowMap::new(width, height);
        shadow_dir.init(device)?;
        let mut shadow_point = PointShadowMap::new(settings.point_shadow_size);
        shadow_point.init(device)?;

        let scene_target = SceneTarget::new(device, width, height, context.sample_count)?;
        let resolved = ResolveTarget::new(device, "ResolvedScene", width, height)?;
        let ping = PingPongTargets::new(device, width, height)?;
        let gbuffer = if settings.shading_path == ShadingPath::Deferred {
            Some(GBuffer::new(device, width, height)?)
        } else {
            None
        };

        let mut feature_sets: Vec<ShaderFeatures> = Vec::new();
        for (_, material) in resources_materials(resources) {
            if !feature_sets.contains(&material.features()) {
                feature_sets.push(material.features());
            }
        }
        let registry = ProgramRegistry::prepare(&feature_sets, settings.shading_path)?;

        let layouts = BindLayouts::new(device);
        let pipelines = PipelineCache::build(&context, &registry, &layouts, settings.shading_path)?;

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("FrameUniforms"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("FrameBindGroup"),
            layout: &layouts.frame,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            }],
        });

        let objects = SlotBuffer::new(device, "ObjectSlots", INITIAL_OBJECT_SLOTS);
        let lights = SlotBuffer::new(device, "LightSlots", INITIAL_LIGHT_SLOTS);
        let post_params = SlotBuffer::new(device, "PostParamSlots", INITIAL_POST_SLOTS);

        let material_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("MaterialSampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let shadow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("ShadowSampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });
        let post_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("PostSampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let dummy_view = create_dummy_texture(device, &context.queue);

        let objects_bind_group = object_bind_group(device, &layouts, &objects);
        let light_depth_bind_group = light_plain_bind_group(device, &layouts, &lights);
        let light_lit_bind_groups = light_shadow_bind_groups(
            device,
            &layouts,
            &lights,
            &shadow_dir,
            &shadow_point,
            &shadow_sampler,
        );
        let post_params_bind_group = post_params_bind_group(device, &layouts, &post_params);

        let gbuffer_bind_group = gbuffer
            .as_ref()
            .map(|gb| gbuffer_bind_group(device, &layouts, gb, &post_sampler));

        let mut renderer = Self {
            context,
            settings,
            registry,
            layouts,
            pipelines,
            scene_target,
            resolved,
            ping,
            gbuffer,
            gbuffer_bind_group,
            shadow_dir,
            shadow_point,
            frame_buffer,
            frame_bind_group,
            objects,
            objects_bind_group,
            lights,
            light_depth_bind_group,
            light_lit_bind_groups,
            post_params,
            post_params_bind_group,
            material_sampler,
            shadow_sampler,
            post_sampler,
            dummy_view,
            texture_views: HashMap::new(),
            material_bind_groups: HashMap::new(),
            skybox_bind_groups: HashMap::new(),
            meshes: HashMap::new(),
            index: RenderIndex::new(),
        };
        renderer.upload_resources(resources);
        Ok(renderer)
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Register and compile a user post-process program up front, so a bad
    /// effect fails at load time rather than mid-frame.
    pub fn register_effect(&mut self, name: &str, source: String) -> Result<(), EngineError> {
        self.registry.register_effect(name, source);
        let program = self.registry.named(name)?;

        let post_pl = self
            .context
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("PostPipelineLayout"),
                bind_group_layouts: &[&self.layouts.post_params, &self.layouts.post_src],
                push_constant_ranges: &[],
            });
        let pipeline = build_pipeline(
            &self.context.device,
            &post_pl,
            program,
            PipelineOptions {
                label: name,
                targets: vec![Some(wgpu::ColorTargetState {
                    format: SCENE_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                depth: None,
                cull: None,
                sample_count: 1,
                geometry_input: false,
            },
        );
        self.pipelines.post.insert(name.to_owned(), pipeline);
        Ok(())
    }

    /// Mirror CPU-side resources on the GPU: mesh buffers, texture uploads
    /// and per-material bind groups. Call after the level's resources change.
    pub fn upload_resources(&mut self, resources: &Resources) {
        let device = &self.context.device;
        let queue = &self.context.queue;

        for (handle, mesh) in resources.meshes() {
            self.meshes
                .entry(handle)
                .or_insert_with(|| GpuMesh::upload(device, mesh));
        }

        self.material_bind_groups.clear();
        self.skybox_bind_groups.clear();
        for (handle, material) in resources_materials(resources) {
            for (_, name) in material.textures() {
                if !self.texture_views.contains_key(name) {
                    if let Some(data) = resources.texture(name) {
                        let view = upload_texture(device, queue, name, data);
                        self.texture_views.insert(name.clone(), view);
                    }
                }
            }

            let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("MaterialParams"),
                contents: bytemuck::bytes_of(&[material.specularity(), 0.0, 0.0, 0.0]),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let slot_view = |slot: TextureSlot| {
                resolve_slot_view(material, slot, &self.texture_views, &self.dummy_view)
            };
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("MaterialBindGroup"),
                layout: &self.layouts.material,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(slot_view(TextureSlot::Diffuse)),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(slot_view(TextureSlot::Normal)),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(slot_view(
                            TextureSlot::Displacement,
                        )),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::Sampler(&self.material_sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: params.as_entire_binding(),
                    },
                ],
            });
            self.material_bind_groups.insert(handle, bind_group);

            if let Some(name) = material.texture(TextureSlot::Cube) {
                if let Some(cube) = resources.cube_texture(name) {
                    let view = upload_cube_texture(device, queue, name, cube);
                    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("SkyboxBindGroup"),
                        layout: &self.layouts.skybox_material,
                        entries: &[
                            wgpu::BindGroupEntry {
                                binding: 0,
                                resource: wgpu::BindingResource::TextureView(&view),
                            },
                            wgpu::BindGroupEntry {
                                binding: 1,
                                resource: wgpu::BindingResource::Sampler(&self.material_sampler),
                            },
                        ],
                    });
                    self.skybox_bind_groups.insert(handle, bind_group);
                }
            }
        }
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) -> Result<(), EngineError> {
        if new_size.width == 0 || new_size.height == 0 {
            return Ok(());
        }
        self.context.resize(new_size);
        let device = &self.context.device;
        let (width, height) = (new_size.width, new_size.height);

        self.settings.resolution.width = width;
        self.settings.resolution.height = height;
        self.scene_target = SceneTarget::new(device, width, height, self.context.sample_count)?;
        self.resolved = ResolveTarget::new(device, "ResolvedScene", width, height)?;
        self.ping = PingPongTargets::new(device, width, height)?;
        if self.gbuffer.is_some() {
            let gbuffer = GBuffer::new(device, width, height)?;
            self.gbuffer_bind_group =
                Some(gbuffer_bind_group(device, &self.layouts, &gbuffer, &self.post_sampler));
            self.gbuffer = Some(gbuffer);
        }

        self.shadow_dir = DirectionalShadowMap::new(width, height);
        self.shadow_dir.init(device)?;
        self.light_lit_bind_groups = light_shadow_bind_groups(
            device,
            &self.layouts,
            &self.lights,
            &self.shadow_dir,
            &self.shadow_point,
            &self.shadow_sampler,
        );
        Ok(())
    }

    /// Render one frame: rebuild the index if the scene topology changed,
    /// plan the frame, then replay the plan on the GPU and present.
    pub fn render(
        &mut self,
        scene: &Scene,
        camera: &Camera,
        resources: &Resources,
    ) -> Result<FrameStats, EngineError> {
        self.index.rebuild(scene, resources);
        let plan = FramePlan::build(
            scene,
            camera,
            resources,
            &self.index,
            self.settings.shading_path,
        );

        self.write_frame_uniforms(camera);
        self.write_object_slots(&plan, scene);
        let light_slots = self.write_light_slots(&plan, scene);
        self.write_post_slots(&plan);

        let frame = self.context.surface.get_current_texture()?;
        let surface_view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("FrameEncoder"),
            });

        let mut draw_calls = 0u32;
        let mut object_cursor = 0u32;
        let mut scene_cleared = false;

        for pass in &plan.passes {
            match pass {
                ScenePass::Ambient { draws } => {
                    draw_calls += self.scene_geometry_pass(
                        &mut encoder,
                        draws,
                        &mut object_cursor,
                        !scene_cleared,
                        GeometryKind::Ambient,
                        &light_slots,
                    );
                    scene_cleared = true;
                }
                ScenePass::GeometryToGBuffer { draws } => {
                    draw_calls +=
                        self.gbuffer_pass(&mut encoder, draws, &mut object_cursor);
                }
                ScenePass::ShadowDepth { light, kind, draws } => {
                    draw_calls += self.shadow_depth_pass(
                        &mut encoder,
                        *light,
                        *kind,
                        draws,
                        &mut object_cursor,
                        &light_slots,
                    );
                }
                ScenePass::LitForward { light, kind, draws } => {
                    draw_calls += self.scene_geometry_pass(
                        &mut encoder,
                        draws,
                        &mut object_cursor,
                        false,
                        GeometryKind::Lit {
                            light: *light,
                            kind: *kind,
                        },
                        &light_slots,
                    );
                }
                ScenePass::Skybox { draws } => {
                    draw_calls += self.scene_geometry_pass(
                        &mut encoder,
                        draws,
                        &mut object_cursor,
                        false,
                        GeometryKind::Skybox,
                        &light_slots,
                    );
                }
                ScenePass::DeferredLighting { point, .. } => {
                    draw_calls +=
                        self.deferred_lighting_pass(&mut encoder, point, &light_slots);
                    scene_cleared = true;
                }
            }
        }

        for (stage_index, stage) in plan.post.stages.iter().enumerate() {
            self.post_stage(&mut encoder, stage, stage_index as u32, &surface_view);
        }

        self.context.queue.submit(Some(encoder.finish()));
        frame.present();

        Ok(FrameStats {
            draw_calls,
            culled: plan.culled,
        })
    }

    fn write_frame_uniforms(&self, camera: &Camera) {
        let view = camera.view();
        let proj = camera.proj();
        let position = camera.position();
        let ambient = self.settings.ambient_color;
        let uniforms = FrameUniforms {
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            view_proj: (proj * view).to_cols_array_2d(),
            camera_pos: [position.x, position.y, position.z, 1.0],
            ambient_color: [ambient[0], ambient[1], ambient[2], 1.0],
            far_clip: [camera.far_clip(), 0.0, 0.0, 0.0],
        };
        self.context
            .queue
            .write_buffer(&self.frame_buffer, 0, bytemuck::bytes_of(&uniforms));
    }

    /// One uniform slot per planned draw, in exactly the order the passes
    /// will consume them.
    fn write_object_slots(&mut self, plan: &FramePlan, scene: &Scene) {
        let total: u32 = plan.draw_count() as u32;
        if self.objects.ensure(&self.context.device, total.max(1)) {
            self.objects_bind_group =
                object_bind_group(&self.context.device, &self.layouts, &self.objects);
        }

        let mut slot = 0u32;
        for pass in &plan.passes {
            for draw in pass_draws(pass) {
                let (model, receives) = object_model(scene, draw.object)
                    .unwrap_or((Mat4::IDENTITY, false));
                let uniforms = ObjectUniforms {
                    model: model.to_cols_array_2d(),
                    params: [if receives { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0],
                };
                self.objects.write(&self.context.queue, slot, &uniforms);
                slot += 1;
            }
        }
    }

    /// One uniform slot per light used this frame. The slot carries the
    /// light-space transform the depth maps computed in `bind`.
    fn write_light_slots(&mut self, plan: &FramePlan, scene: &Scene) -> LightSlots {
        let mut slots = LightSlots::default();

        for pass in &plan.passes {
            match pass {
                ScenePass::ShadowDepth { light, kind, .. }
                | ScenePass::LitForward { light, kind, .. } => {
                    slots.reserve(*light, *kind);
                }
                ScenePass::DeferredLighting { directional, point } => {
                    match directional.first() {
                        Some(id) => {
                            slots.base = Some(slots.reserve(*id, LightKind::Directional));
                        }
                        None => {
                            slots.base = Some(slots.reserve_zeroed());
                        }
                    }
                    for id in point {
                        slots.reserve(*id, LightKind::Point);
                    }
                }
                _ => {}
            }
        }

        if self.lights.ensure(&self.context.device, slots.count.max(1)) {
            self.light_depth_bind_group =
                light_plain_bind_group(&self.context.device, &self.layouts, &self.lights);
            self.light_lit_bind_groups = light_shadow_bind_groups(
                &self.context.device,
                &self.layouts,
                &self.lights,
                &self.shadow_dir,
                &self.shadow_point,
                &self.shadow_sampler,
            );
        }

        for (&(id, kind), &slot) in &slots.map {
            let Some(object) = scene.object(id) else {
                self.lights
                    .write(&self.context.queue, slot, &LightUniforms::zeroed());
                continue;
            };
            let Some(light) = object.light() else {
                self.lights
                    .write(&self.context.queue, slot, &LightUniforms::zeroed());
                continue;
            };
            let position = object.transform.position;
            let direction = object.transform.forward();
            let light_space = match kind {
                LightKind::Directional => self.shadow_dir.bind(position, direction),
                LightKind::Point => self.shadow_point.bind(position, direction),
            };
            let uniforms = LightUniforms {
                color: light.color.to_array(),
                position_power: [position.x, position.y, position.z, light.power],
                direction: [direction.x, direction.y, direction.z, 0.0],
                light_space: light_space.to_cols_array_2d(),
            };
            self.lights.write(&self.context.queue, slot, &uniforms);
        }
        for &slot in &slots.zeroed {
            self.lights
                .write(&self.context.queue, slot, &LightUniforms::zeroed());
        }

        slots
    }

    fn write_post_slots(&mut self, plan: &FramePlan) {
        let stages = plan.post.stages.len() as u32;
        if self.post_params.ensure(&self.context.device, stages.max(1)) {
            self.post_params_bind_group =
                post_params_bind_group(&self.context.device, &self.layouts, &self.post_params);
        }
        for (index, stage) in plan.post.stages.iter().enumerate() {
            let horizontal = matches!(
                stage,
                PostStage::BloomBlur {
                    horizontal: true,
                    ..
                }
            );
            let params = PostParams {
                bloom_horizontal: [if horizontal { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0],
            };
            self.post_params
                .write(&self.context.queue, index as u32, &params);
        }
    }

    fn scene_geometry_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        draws: &[DrawCall],
        object_cursor: &mut u32,
        clear: bool,
        kind: GeometryKind,
        light_slots: &LightSlots,
    ) -> u32 {
        let load = if clear {
            wgpu::LoadOp::Clear(wgpu::Color::BLACK)
        } else {
            wgpu::LoadOp::Load
        };
        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("ScenePass"),
            color_attachments: &[
                Some(wgpu::RenderPassColorAttachment {
                    view: self.scene_target.color_view(),
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                }),
                Some(wgpu::RenderPassColorAttachment {
                    view: self.scene_target.bright_view(),
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                }),
            ],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: self.scene_target.depth_view(),
                depth_ops: Some(wgpu::Operations {
                    load: if clear {
                        wgpu::LoadOp::Clear(1.0)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        rpass.set_bind_group(0, &self.frame_bind_group, &[]);

        let mut drawn = 0u32;
        let mut bound_material = None;
        let mut bound_features = None;
        for draw in draws {
            let slot = *object_cursor;
            *object_cursor += 1;

            let pipeline_ok = match kind {
                GeometryKind::Ambient => {
                    if bound_features.is_none() {
                        rpass.set_pipeline(&self.pipelines.ambient);
                        bound_features = Some(draw.features);
                    }
                    true
                }
                GeometryKind::Skybox => {
                    if bound_features.is_none() {
                        rpass.set_pipeline(&self.pipelines.skybox);
                        bound_features = Some(draw.features);
                    }
                    true
                }
                GeometryKind::Lit { light, kind } => {
                    if bound_features != Some(draw.features) {
                        let key = ProgramKey {
                            features: draw.features,
                            light: Some(kind),
                        };
                        match self.pipelines.forward.get(&key) {
                            Some(pipeline) => {
                                rpass.set_pipeline(pipeline);
                                bound_features = Some(draw.features);
                                let offset = light_slots
                                    .slot(light, kind)
                                    .map(SlotBuffer::offset)
                                    .unwrap_or(0);
                                rpass.set_bind_group(
                                    3,
                                    &self.light_lit_bind_groups[kind.index()],
                                    &[offset],
                                );
                            }
                            None => {
                                error!(
                                    "No forward program for {:?} with {:?} light; skipping draw",
                                    draw.features, kind
                                );
                                bound_features = None;
                            }
                        }
                    }
                    bound_features == Some(draw.features)
                }
            };
            if !pipeline_ok {
                continue;
            }

            if bound_material != Some(draw.material) {
                let bind_group = match kind {
                    GeometryKind::Skybox => self.skybox_bind_groups.get(&draw.material),
                    _ => self.material_bind_groups.get(&draw.material),
                };
                let Some(bind_group) = bind_group else {
                    warn!("Missing material bind group; skipping draw");
                    continue;
                };
                rpass.set_bind_group(2, bind_group, &[]);
                bound_material = Some(draw.material);
            }

            let Some(mesh) = self.meshes.get(&draw.mesh) else {
                warn!("Skipping draw with unuploaded mesh");
                continue;
            };
            rpass.set_bind_group(1, &self.objects_bind_group, &[SlotBuffer::offset(slot)]);
            rpass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
            rpass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            rpass.draw_indexed(0..mesh.index_count, 0, 0..1);
            drawn += 1;
        }
        drawn
    }

    fn shadow_depth_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        light: ObjectId,
        kind: LightKind,
        draws: &[DrawCall],
        object_cursor: &mut u32,
        light_slots: &LightSlots,
    ) -> u32 {
        let depth_map: &dyn DepthMap = match kind {
            LightKind::Directional => &self.shadow_dir,
            LightKind::Point => &self.shadow_point,
        };
        let Some(view) = depth_map.view() else {
            return 0;
        };

        // The pass begins and clears even with nothing to draw: a light with
        // shadowing disabled gets an all-far map, i.e. no occlusion.
        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("ShadowDepthPass"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        if draws.is_empty() {
            return 0;
        }

        rpass.set_pipeline(&self.pipelines.depth[kind.index()]);
        let offset = light_slots
            .slot(light, kind)
            .map(SlotBuffer::offset)
            .unwrap_or(0);
        rpass.set_bind_group(0, &self.light_depth_bind_group, &[offset]);

        let mut drawn = 0u32;
        for draw in draws {
            let slot = *object_cursor;
            *object_cursor += 1;
            let Some(mesh) = self.meshes.get(&draw.mesh) else {
                continue;
            };
            rpass.set_bind_group(1, &self.objects_bind_group, &[SlotBuffer::offset(slot)]);
            rpass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
            rpass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            rpass.draw_indexed(0..mesh.index_count, 0, 0..1);
            drawn += 1;
        }
        drawn
    }

    fn gbuffer_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        draws: &[DrawCall],
        object_cursor: &mut u32,
    ) -> u32 {
        let Some(gbuffer) = &self.gbuffer else {
            return 0;
        };

        let color_attachment = |view| {
            Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })
        };
        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("GBufferPass"),
            color_attachments: &[
                color_attachment(gbuffer.position_view()),
                color_attachment(gbuffer.normal_view()),
                color_attachment(gbuffer.albedo_spec_view()),
            ],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: gbuffer.depth_view(),
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        rpass.set_bind_group(0, &self.frame_bind_group, &[]);

        let mut drawn = 0u32;
        let mut bound_material = None;
        let mut bound_features = None;
        for draw in draws {
            let slot = *object_cursor;
            *object_cursor += 1;

            if bound_features != Some(draw.features) {
                match self.pipelines.gbuffer.get(&draw.features) {
                    Some(pipeline) => {
                        rpass.set_pipeline(pipeline);
                        bound_features = Some(draw.features);
                    }
                    None => {
                        error!(
                            "No g-buffer program for {:?}; skipping draw",
                            draw.features
                        );
                        bound_features = None;
                        continue;
                    }
                }
            }

            if bound_material != Some(draw.material) {
                let Some(bind_group) = self.material_bind_groups.get(&draw.material) else {
                    warn!("Missing material bind group; skipping draw");
                    continue;
                };
                rpass.set_bind_group(2, bind_group, &[]);
                bound_material = Some(draw.material);
            }

            let Some(mesh) = self.meshes.get(&draw.mesh) else {
                continue;
            };
            rpass.set_bind_group(1, &self.objects_bind_group, &[SlotBuffer::offset(slot)]);
            rpass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
            rpass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            rpass.draw_indexed(0..mesh.index_count, 0, 0..1);
            drawn += 1;
        }
        drawn
    }

    /// Fullscreen deferred shading: ambient + directional base quad first,
    /// then additive blending for every point-light quad over it.
    fn deferred_lighting_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        point: &[ObjectId],
        light_slots: &LightSlots,
    ) -> u32 {
        let (Some(base_pipeline), Some(point_pipeline), Some(gbuffer_bind_group)) = (
            &self.pipelines.deferred_base,
            &self.pipelines.deferred_point,
            &self.gbuffer_bind_group,
        ) else {
            return 0;
        };

        let attachment = |view| {
            Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })
        };
        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("DeferredLightingPass"),
            color_attachments: &[
                attachment(self.scene_target.color_view()),
                attachment(self.scene_target.bright_view()),
            ],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        rpass.set_bind_group(0, &self.frame_bind_group, &[]);
        rpass.set_bind_group(1, gbuffer_bind_group, &[]);

        let mut drawn = 0u32;

        let base_offset = light_slots.base.map(SlotBuffer::offset).unwrap_or(0);
        rpass.set_pipeline(base_pipeline);
        rpass.set_bind_group(2, &self.light_depth_bind_group, &[base_offset]);
        rpass.draw(0..3, 0..1);
        drawn += 1;

        rpass.set_pipeline(point_pipeline);
        for id in point {
            let Some(slot) = light_slots.slot(*id, LightKind::Point) else {
                continue;
            };
            rpass.set_bind_group(2, &self.light_depth_bind_group, &[SlotBuffer::offset(slot)]);
            rpass.draw(0..3, 0..1);
            drawn += 1;
        }
        drawn
    }

    fn post_stage(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        stage: &PostStage,
        stage_index: u32,
        surface_view: &wgpu::TextureView,
    ) {
        match stage {
            PostStage::ResolveScene => {
                self.resolve_attachment(
                    encoder,
                    self.scene_target.color_view(),
                    self.resolved.view(),
                );
            }
            PostStage::ResolveBright { target } => {
                self.resolve_attachment(
                    encoder,
                    self.scene_target.bright_view(),
                    self.ping.view(*target),
                );
            }
            PostStage::BloomBlur { source, target, .. } => {
                self.fullscreen_stage(
                    encoder,
                    "bloom_blur",
                    &[*source],
                    self.ping.view(*target),
                    stage_index,
                    false,
                );
            }
            PostStage::BloomBlend {
                scene,
                bloom,
                target,
            } => {
                self.fullscreen_stage(
                    encoder,
                    "bloom_blend",
                    &[*scene, *bloom],
                    self.ping.view(*target),
                    stage_index,
                    false,
                );
            }
            PostStage::Tonemap { source, target } => {
                self.fullscreen_stage(
                    encoder,
                    "hdr",
                    &[*source],
                    self.ping.view(*target),
                    stage_index,
                    false,
                );
            }
            PostStage::Effect { name, source, target } => {
                if self.pipelines.post.contains_key(name) {
                    self.fullscreen_stage(
                        encoder,
                        name,
                        &[*source],
                        self.ping.view(*target),
                        stage_index,
                        false,
                    );
                } else {
                    error!("No post-process program named '{}'; skipping stage", name);
                }
            }
            PostStage::Passthrough { source } => {
                self.fullscreen_stage(
                    encoder,
                    "passthrough",
                    &[*source],
                    surface_view,
                    stage_index,
                    true,
                );
            }
        }
    }

    /// Resolve (or plain-copy when MSAA is off) one attachment into a
    /// single-sample texture.
    fn resolve_attachment(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::TextureView,
        destination: &wgpu::TextureView,
    ) {
        if self.context.sample_count > 1 {
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("ResolvePass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: source,
                    depth_slice: None,
                    resolve_target: Some(destination),
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        } else {
            // Single-sample: a fullscreen copy through the passthrough
            // program keeps the stage contract identical.
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("ResolveCopyPass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: destination,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            let Some(pipeline) = self.pipelines.post.get("passthrough") else {
                return;
            };
            let bind_group = self.post_source_bind_group(&[source, source]);
            rpass.set_pipeline(pipeline);
            rpass.set_bind_group(0, &self.post_params_bind_group, &[0]);
            rpass.set_bind_group(1, &bind_group, &[]);
            rpass.draw(0..3, 0..1);
        }
    }

    fn fullscreen_stage(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        program: &str,
        sources: &[TexRef],
        target: &wgpu::TextureView,
        stage_index: u32,
        to_screen: bool,
    ) {
        let pipeline = if to_screen {
            &self.pipelines.passthrough
        } else {
            match self.pipelines.post.get(program) {
                Some(pipeline) => pipeline,
                None => {
                    error!("No post pipeline '{}'; skipping stage", program);
                    return;
                }
            }
        };

        let views: Vec<&wgpu::TextureView> = sources.iter().map(|s| self.tex_ref_view(*s)).collect();
        let src_a = views.first().copied().unwrap_or(self.resolved.view());
        let src_b = views.get(1).copied().unwrap_or(src_a);
        let bind_group = self.post_source_bind_group(&[src_a, src_b]);

        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("PostStagePass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rpass.set_pipeline(pipeline);
        rpass.set_bind_group(
            0,
            &self.post_params_bind_group,
            &[SlotBuffer::offset(stage_index)],
        );
        rpass.set_bind_group(1, &bind_group, &[]);
        rpass.draw(0..3, 0..1);
    }

    fn tex_ref_view(&self, tex: TexRef) -> &wgpu::TextureView {
        match tex {
            TexRef::Resolved => self.resolved.view(),
            TexRef::Ping(index) => self.ping.view(index),
        }
    }

    fn post_source_bind_group(&self, sources: &[&wgpu::TextureView; 2]) -> wgpu::BindGroup {
        self.context
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("PostSourceBindGroup"),
                layout: &self.layouts.post_src,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(sources[0]),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(sources[1]),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&self.post_sampler),
                    },
                ],
            })
    }
}

#[derive(Clone, Copy)]
enum GeometryKind {
    Ambient,
    Skybox,
    Lit { light: ObjectId, kind: LightKind },
}

/// Per-frame assignment of lights to uniform slots.
#[derive(Default)]
struct LightSlots {
    map: HashMap<(ObjectId, LightKind), u32>,
    zeroed: Vec<u32>,
    base: Option<u32>,
    count: u32,
}

impl LightSlots {
    fn reserve(&mut self, id: ObjectId, kind: LightKind) -> u32 {
        if let Some(&slot) = self.map.get(&(id, kind)) {
            return slot;
        }
        let slot = self.count;
        self.count += 1;
        self.map.insert((id, kind), slot);
        slot
    }

    fn reserve_zeroed(&mut self) -> u32 {
        let slot = self.count;
        self.count += 1;
        self.zeroed.push(slot);
        slot
    }

    fn slot(&self, id: ObjectId, kind: LightKind) -> Option<u32> {
        self.map.get(&(id, kind)).copied()
    }
}

fn pass_draws(pass: &ScenePass) -> &[DrawCall] {
    match pass {
        ScenePass::Ambient { draws }
        | ScenePass::GeometryToGBuffer { draws }
        | ScenePass::ShadowDepth { draws, .. }
        | ScenePass::LitForward { draws, .. }
        | ScenePass::Skybox { draws } => draws,
        ScenePass::DeferredLighting { .. } => &[],
    }
}

fn resolve_slot_view<'a>(
    material: &Material,
    slot: TextureSlot,
    views: &'a HashMap<String, wgpu::TextureView>,
    dummy: &'a wgpu::TextureView,
) -> &'a wgpu::TextureView {
    material
        .texture(slot)
        .and_then(|name| views.get(name))
        .unwrap_or(dummy)
}

fn object_model(scene: &Scene, id: ObjectId) -> Option<(Mat4, bool)> {
    if let Some(object) = scene.object(id) {
        return Some((object.transform.matrix(), object.is_shadow_receiver()));
    }
    let skybox = scene.skybox()?;
    if skybox.id() == id {
        return Some((skybox.transform.matrix(), skybox.is_shadow_receiver()));
    }
    None
}

fn resources_materials(
    resources: &Resources,
) -> impl Iterator<Item = (Handle<Material>, &Material)> {
    // Handles are sequential indices; walk them until the store runs out.
    (0..).map_while(|i| {
        let handle = Handle::new(i);
        resources.material(handle).map(|material| (handle, material))
    })
}

fn object_bind_group(
    device: &wgpu::Device,
    layouts: &BindLayouts,
    objects: &SlotBuffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("ObjectBindGroup"),
        layout: &layouts.object,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &objects.buffer,
                offset: 0,
                size: NonZeroU64::new(std::mem::size_of::<ObjectUniforms>() as u64),
            }),
        }],
    })
}

fn light_plain_bind_group(
    device: &wgpu::Device,
    layouts: &BindLayouts,
    lights: &SlotBuffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("LightBindGroup"),
        layout: &layouts.light_plain,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &lights.buffer,
                offset: 0,
                size: NonZeroU64::new(std::mem::size_of::<LightUniforms>() as u64),
            }),
        }],
    })
}

fn light_shadow_bind_groups(
    device: &wgpu::Device,
    layouts: &BindLayouts,
    lights: &SlotBuffer,
    shadow_dir: &DirectionalShadowMap,
    shadow_point: &PointShadowMap,
    shadow_sampler: &wgpu::Sampler,
) -> [wgpu::BindGroup; LightKind::COUNT] {
    [
        shadow_dir.view().expect("shadow map initialized"),
        shadow_point.view().expect("shadow map initialized"),
    ]
    .map(|shadow_view| {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("LightShadowBindGroup"),
            layout: &layouts.light_shadow,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &lights.buffer,
                        offset: 0,
                        size: NonZeroU64::new(std::mem::size_of::<LightUniforms>() as u64),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(shadow_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(shadow_sampler),
                },
            ],
        })
    })
}

fn post_params_bind_group(
    device: &wgpu::Device,
    layouts: &BindLayouts,
    post_params: &SlotBuffer,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("PostParamsBindGroup"),
        layout: &layouts.post_params,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &post_params.buffer,
                offset: 0,
                size: NonZeroU64::new(std::mem::size_of::<PostParams>() as u64),
            }),
        }],
    })
}

fn gbuffer_bind_group(
    device: &wgpu::Device,
    layouts: &BindLayouts,
    gbuffer: &GBuffer,
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("GBufferReadBindGroup"),
        layout: &layouts.gbuffer_read,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(gbuffer.position_view()),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(gbuffer.normal_view()),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(gbuffer.albedo_spec_view()),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

fn create_dummy_texture(device: &wgpu::Device, queue: &wgpu::Queue) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("DummyTexture"),
        size: wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &[255, 255, 255, 255],
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4),
            rows_per_image: Some(1),
        },
        wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
    );
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn upload_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    name: &str,
    data: &TextureData,
) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(name),
        size: wgpu::Extent3d {
            width: data.width.max(1),
            height: data.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &data.rgba,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * data.width.max(1)),
            rows_per_image: Some(data.height.max(1)),
        },
        wgpu::Extent3d {
            width: data.width.max(1),
            height: data.height.max(1),
            depth_or_array_layers: 1,
        },
    );
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn upload_cube_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    name: &str,
    cube: &CubeTexture,
) -> wgpu::TextureView {
    let width = cube.faces[0].width.max(1);
    let height = cube.faces[0].height.max(1);
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(name),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 6,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    for (layer, face) in cube.faces.iter().enumerate() {
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: layer as u32,
                },
                aspect: wgpu::TextureAspect::All,
            },
            &face.rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }
    texture.create_view(&wgpu::TextureViewDescriptor {
        dimension: Some(wgpu::TextureViewDimension::Cube),
        ..Default::default()
    })
}
