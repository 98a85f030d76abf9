//! Renderer and its passes
//!
//! The [`Renderer`] owns the per-frame GPU state. Passes own their own
//! pipelines and targets and are driven by the renderer in a fixed order:
//! shadow map, BRDF LUT (once), then the main pass with skybox and opaque
//! geometry.

pub mod brdf_lut;
pub mod graveyard;
pub mod light_manager;
pub mod renderer;
pub mod shadow_pass;
pub mod skybox_pass;

pub use brdf_lut::BrdfLut;
pub use graveyard::{GpuResource, ResourceGraveyard};
pub use light_manager::{LightManager, MAX_LIGHTS};
pub use renderer::{FrameStats, FrameUniforms, ObjectUniforms, Renderer, TextureSlot};
pub use shadow_pass::{light_space_matrix, ShadowCaster, ShadowPass};
pub use skybox_pass::SkyboxPass;

/// WGSL sources registered under `builtin:<name>`
pub fn builtin_shader_sources() -> [(&'static str, &'static str); 7] {
    [
        ("standard.vert", renderer::STANDARD_VERTEX_SHADER),
        ("standard.frag", renderer::STANDARD_FRAGMENT_SHADER),
        ("shadow.vert", shadow_pass::SHADOW_SHADER),
        ("skybox.vert", skybox_pass::SKYBOX_VERTEX_SHADER),
        ("skybox.frag", skybox_pass::SKYBOX_FRAGMENT_SHADER),
        ("brdf_lut.vert", brdf_lut::BRDF_LUT_VERTEX_SHADER),
        ("brdf_lut.frag", brdf_lut::BRDF_LUT_FRAGMENT_SHADER),
    ]
}
