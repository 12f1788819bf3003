pub mod camera;
pub mod components;
pub mod object;
pub mod scene;
pub mod transform;

pub use camera::Camera;
pub use components::{Component, ComponentKind, CustomComponent, Light, LightKind};
pub use object::{ObjectId, SceneObject};
pub use scene::Scene;
pub use transform::Transform;
