use crate::error::EngineError;

/// Color format of every off-screen scene/post target; wide enough to carry
/// HDR values into the tone-mapping stage.
pub const SCENE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Explicit two-element ping-pong selector. Each stage calls [`Self::next`]
/// and writes the returned element while reading the other one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPongIndex {
    current: usize,
}

impl PingPongIndex {
    pub fn new() -> Self {
        // Starts on B so the first stage writes A.
        Self { current: 1 }
    }

    pub fn next(&mut self) -> usize {
        self.current ^= 1;
        self.current
    }

    pub fn current(&self) -> usize {
        self.current
    }
}

impl Default for PingPongIndex {
    fn default() -> Self {
        Self::new()
    }
}

struct ColorAttachment {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

fn color_attachment(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
    sample_count: u32,
    format: wgpu::TextureFormat,
) -> Result<ColorAttachment, EngineError> {
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
        sample_count,
        dimension: wgpu::TextureDimension::D2,
        format,
        // Single-sample color attachments double as copy endpoints so the
        // resolve step still works when MSAA is off. Depth formats reject
        // copy usages.
        usage: if format == DEPTH_FORMAT {
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
        } else if sample_count > 1 {
            wgpu::TextureUsages::RENDER_ATTACHMENT
        } else {
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST
        },
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Ok(ColorAttachment {
        _texture: texture,
        view,
    })
}

/// Multisampled main target: color plus a second brightness attachment the
/// bloom stage extracts from, plus depth.
pub struct SceneTarget {
    color: ColorAttachment,
    bright: ColorAttachment,
    depth: ColorAttachment,
}

impl SceneTarget {
    pub fn new(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        sample_count: u32,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            color: color_attachment(device, "SceneColor", width, height, sample_count, SCENE_FORMAT)?,
            bright: color_attachment(
                device,
                "SceneBright",
                width,
                height,
                sample_count,
                SCENE_FORMAT,
            )?,
            depth: color_attachment(device, "SceneDepth", width, height, sample_count, DEPTH_FORMAT)?,
        })
    }

    pub fn color_view(&self) -> &wgpu::TextureView {
        &self.color.view
    }

    pub fn bright_view(&self) -> &wgpu::TextureView {
        &self.bright.view
    }

    pub fn depth_view(&self) -> &wgpu::TextureView {
        &self.depth.view
    }
}

/// Single-sample destination for resolving one multisampled attachment into
/// a sampleable texture.
pub struct ResolveTarget {
    attachment: ColorAttachment,
}

impl ResolveTarget {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            attachment: color_attachment(device, label, width, height, 1, SCENE_FORMAT)?,
        })
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.attachment.view
    }
}

/// Geometry buffer for the deferred path: view-space position, normal and
/// albedo with specularity in alpha.
pub struct GBuffer {
    position: ColorAttachment,
    normal: ColorAttachment,
    albedo_spec: ColorAttachment,
    depth: ColorAttachment,
}

impl GBuffer {
    pub const COLOR_FORMATS: [wgpu::TextureFormat; 3] = [
        wgpu::TextureFormat::Rgba16Float,
        wgpu::TextureFormat::Rgba16Float,
        wgpu::TextureFormat::Rgba8Unorm,
    ];

    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Result<Self, EngineError> {
        Ok(Self {
            position: color_attachment(
                device,
                "GBufferPosition",
                width,
                height,
                1,
                Self::COLOR_FORMATS[0],
            )?,
            normal: color_attachment(
                device,
                "GBufferNormal",
                width,
                height,
                1,
                Self::COLOR_FORMATS[1],
            )?,
            albedo_spec: color_attachment(
                device,
                "GBufferAlbedoSpec",
                width,
                height,
                1,
                Self::COLOR_FORMATS[2],
            )?,
            depth: color_attachment(device, "GBufferDepth", width, height, 1, DEPTH_FORMAT)?,
        })
    }

    pub fn position_view(&self) -> &wgpu::TextureView {
        &self.position.view
    }

    pub fn normal_view(&self) -> &wgpu::TextureView {
        &self.normal.view
    }

    pub fn albedo_spec_view(&self) -> &wgpu::TextureView {
        &self.albedo_spec.view
    }

    pub fn depth_view(&self) -> &wgpu::TextureView {
        &self.depth.view
    }
}

/// The two alternating post-process targets.
pub struct PingPongTargets {
    targets: [ResolveTarget; 2],
}

impl PingPongTargets {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Result<Self, EngineError> {
        Ok(Self {
            targets: [
                ResolveTarget::new(device, "PostTargetA", width, height)?,
                ResolveTarget::new(device, "PostTargetB", width, height)?,
            ],
        })
    }

    pub fn view(&self, index: usize) -> &wgpu::TextureView {
        self.targets[index & 1].view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_pong_alternates_starting_at_a() {
        let mut index = PingPongIndex::new();
        assert_eq!(index.next(), 0);
        assert_eq!(index.next(), 1);
        assert_eq!(index.next(), 0);
        assert_eq!(index.next(), 1);
    }

    #[test]
    fn ping_pong_parity_after_n_stages() {
        for n in 1..16 {
            let mut index = PingPongIndex::new();
            let mut last = 0;
            for _ in 0..n {
                last = index.next();
            }
            // Stages write A, B, A, ... so after N stages the last written
            // target is A when N is odd.
            assert_eq!(last, (n + 1) % 2);
        }
    }
}
