pub mod batches;
pub mod context;
pub mod culling;
pub mod frame;
pub mod material;
pub mod postprocess;
pub mod primitives;
pub mod programs;
pub mod renderer;
pub mod shadow;
pub mod targets;
pub mod vertex;

pub use batches::{MeshInstance, RenderIndex};
pub use frame::{DrawCall, FramePlan, ScenePass};
pub use material::{Material, ShaderFeatures, TextureSlot};
pub use postprocess::{PostChainPlan, PostEffect, PostStage, TexRef};
pub use primitives::{cube_mesh, sphere_mesh};
pub use programs::{ProgramKey, ProgramRegistry, UniformSlot};
pub use renderer::{FrameStats, Renderer};
pub use vertex::{v, Vertex};
