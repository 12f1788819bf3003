use glam::{Mat4, Vec3};

use crate::renderer::culling::Frustum;
use crate::renderer::postprocess::PostEffect;
use crate::scene::Transform;
use crate::settings::RenderSettings;

/// View point of the frame plus the per-camera output options the
/// post-process chain consults (bloom iterations, HDR tone mapping, custom
/// effects ordered by priority).
pub struct Camera {
    pub transform: Transform,
    pub fov_y_radians: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    postprocesses: Vec<PostEffect>,
    bloom_iterations: u32,
    hdr_enabled: bool,
}

impl Camera {
    pub fn new(aspect: f32) -> Self {
        Self {
            transform: Transform::default(),
            fov_y_radians: 45f32.to_radians(),
            aspect,
            near: 0.1,
            far: 100.0,
            postprocesses: Vec::new(),
            bloom_iterations: 0,
            hdr_enabled: false,
        }
    }

    /// Seed the per-camera output options from the loaded render settings.
    pub fn apply_output_settings(&mut self, settings: &RenderSettings) {
        self.bloom_iterations = settings.bloom_iterations;
        self.hdr_enabled = settings.hdr_enabled;
    }

    pub fn view(&self) -> Mat4 {
        let eye = self.transform.position;
        Mat4::look_at_rh(eye, eye + self.transform.forward(), self.transform.up())
    }

    pub fn proj(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_radians, self.aspect, self.near, self.far)
    }

    pub fn position(&self) -> Vec3 {
        self.transform.position
    }

    pub fn forward(&self) -> Vec3 {
        self.transform.forward()
    }

    pub fn far_clip(&self) -> f32 {
        self.far
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_projection(self.proj())
    }

    /// Test a view-space bounding sphere against the camera frustum.
    pub fn sphere_in_frustum(&self, center: Vec3, radius: f32) -> bool {
        self.frustum().sphere_inside(center, radius)
    }

    /// Insert a post-process effect, keeping the list ordered by ascending
    /// priority. An effect with the same name is replaced in place.
    pub fn add_postprocess(&mut self, effect: PostEffect) {
        self.postprocesses.retain(|e| e.name != effect.name);
        let at = self
            .postprocesses
            .partition_point(|e| e.priority <= effect.priority);
        self.postprocesses.insert(at, effect);
    }

    pub fn remove_postprocess(&mut self, name: &str) -> bool {
        let before = self.postprocesses.len();
        self.postprocesses.retain(|e| e.name != name);
        self.postprocesses.len() != before
    }

    pub fn postprocesses(&self) -> &[PostEffect] {
        &self.postprocesses
    }

    pub fn set_bloom_iterations(&mut self, iterations: u32) {
        self.bloom_iterations = iterations;
    }

    pub fn bloom_iterations(&self) -> u32 {
        self.bloom_iterations
    }

    pub fn set_hdr_enabled(&mut self, enabled: bool) {
        self.hdr_enabled = enabled;
    }

    pub fn hdr_enabled(&self) -> bool {
        self.hdr_enabled
    }
}
