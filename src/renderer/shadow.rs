use glam::{Mat4, Vec3};
use log::info;

use crate::error::EngineError;

/// Orthographic half-extent of the directional light frustum.
const DIR_FRUSTUM_EXTENT: f32 = 10.0;
const SHADOW_NEAR: f32 = 0.1;
const SHADOW_FAR: f32 = 100.0;

pub const SHADOW_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Light-space transform of a directional light: orthographic projection
/// looking along the light direction.
pub fn directional_light_space(light_pos: Vec3, light_dir: Vec3) -> Mat4 {
    let projection = Mat4::orthographic_rh(
        -DIR_FRUSTUM_EXTENT,
        DIR_FRUSTUM_EXTENT,
        -DIR_FRUSTUM_EXTENT,
        DIR_FRUSTUM_EXTENT,
        SHADOW_NEAR,
        SHADOW_FAR,
    );
    projection * light_view(light_pos, light_dir)
}

/// Light-space transform of a point light: a square 90 degree perspective
/// projection along the light's forward vector.
pub fn point_light_space(light_pos: Vec3, light_dir: Vec3) -> Mat4 {
    let projection = Mat4::perspective_rh(90f32.to_radians(), 1.0, SHADOW_NEAR, SHADOW_FAR);
    projection * light_view(light_pos, light_dir)
}

fn light_view(light_pos: Vec3, light_dir: Vec3) -> Mat4 {
    let up = if light_dir.normalize_or_zero().abs().dot(Vec3::Y) > 0.95 {
        Vec3::Z
    } else {
        Vec3::Y
    };
    Mat4::look_at_rh(light_pos, light_pos + light_dir, up)
}

/// The depth-map protocol every shadow strategy follows: allocate once,
/// bind-and-clear per light, expose the depth texture and light-space
/// transform to the lit pass.
pub trait DepthMap {
    /// Allocate the depth-only target. Fails on zero dimensions.
    fn init(&mut self, device: &wgpu::Device) -> Result<(), EngineError>;

    /// Compute and store the light-space transform for this light. The
    /// caller starts the depth pass on [`DepthMap::view`] afterwards.
    fn bind(&mut self, light_pos: Vec3, light_dir: Vec3) -> Mat4;

    /// Depth attachment view; present after a successful `init`.
    fn view(&self) -> Option<&wgpu::TextureView>;

    /// The transform published by the last `bind`, re-published for the lit
    /// pass to sample the map.
    fn light_space(&self) -> Mat4;
}

/// Directional shadow map sized to the render target.
pub struct DirectionalShadowMap {
    width: u32,
    height: u32,
    light_space: Mat4,
    target: Option<(wgpu::Texture, wgpu::TextureView)>,
}

impl DirectionalShadowMap {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            light_space: Mat4::IDENTITY,
            target: None,
        }
    }
}

impl DepthMap for DirectionalShadowMap {
    fn init(&mut self, device: &wgpu::Device) -> Result<(), EngineError> {
        self.target = Some(create_depth_target(
            device,
            "DirectionalShadowMap",
            self.width,
            self.height,
        )?);
        info!(
            "Directional shadow map: {}x{}",
            self.width, self.height
        );
        Ok(())
    }

    fn bind(&mut self, light_pos: Vec3, light_dir: Vec3) -> Mat4 {
        self.light_space = directional_light_space(light_pos, light_dir);
        self.light_space
    }

    fn view(&self) -> Option<&wgpu::TextureView> {
        self.target.as_ref().map(|(_, view)| view)
    }

    fn light_space(&self) -> Mat4 {
        self.light_space
    }
}

/// Point-light shadow map with a fixed square resolution.
pub struct PointShadowMap {
    size: u32,
    light_space: Mat4,
    target: Option<(wgpu::Texture, wgpu::TextureView)>,
}

impl PointShadowMap {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            light_space: Mat4::IDENTITY,
            target: None,
        }
    }
}

impl DepthMap for PointShadowMap {
    fn init(&mut self, device: &wgpu::Device) -> Result<(), EngineError> {
        self.target = Some(create_depth_target(
            device,
            "PointShadowMap",
            self.size,
            self.size,
        )?);
        info!("Point shadow map: {0}x{0}", self.size);
        Ok(())
    }

    fn bind(&mut self, light_pos: Vec3, light_dir: Vec3) -> Mat4 {
        self.light_space = point_light_space(light_pos, light_dir);
        self.light_space
    }

    fn view(&self) -> Option<&wgpu::TextureView> {
        self.target.as_ref().map(|(_, view)| view)
    }

    fn light_space(&self) -> Mat4 {
        self.light_space
    }
}

fn create_depth_target(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
) -> Result<(wgpu::Texture, wgpu::TextureView), EngineError> {
    if width == 0 || height == 0 {
        return Err(EngineError::ZeroSizedTarget { width, height });
    }

    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SHADOW_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Ok((texture, view))
}
