//! Sceneforge - scene graph and forward renderer for a small game editor
//!
//! The crate is split the way the runtime is layered:
//! - **backend**: the single-threaded graphics context (`GraphicsBackend`), a wgpu
//!   implementation and a recording headless implementation
//! - **scene**: GameObjects, components, the transform hierarchy and scene files
//! - **resources**: meshes, textures, materials and shaders, resolved and cached
//!   through an [`EngineContext`]
//! - **render**: the light buffer, shadow/skybox/BRDF passes and the [`Renderer`]
//!   that orchestrates a frame
//!
//! Everything runs on the thread that owns the backend. There is no global
//! state: project paths, asset index and caches live in [`EngineContext`].

pub mod assets;
pub mod backend;
pub mod context;
pub mod error;
pub mod render;
pub mod resources;
pub mod scene;

pub use backend::headless::HeadlessBackend;
pub use backend::wgpu_backend::WgpuBackend;
pub use backend::GraphicsBackend;
pub use context::EngineContext;
pub use error::{EngineError, EngineResult, HierarchyError};
pub use render::Renderer;
pub use scene::{GameObjectManager, ObjectId, Scene};

use serde::{Deserialize, Serialize};

/// Configuration for the viewer window and renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Enable vsync
    pub vsync: bool,
    pub renderer: RendererConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Sceneforge".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            renderer: RendererConfig::default(),
        }
    }
}

/// Renderer tuning knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Edge length of the square shadow map
    pub shadow_map_size: u32,
    /// Edge length of the BRDF lookup table
    pub brdf_lut_size: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            shadow_map_size: 2048,
            brdf_lut_size: 256,
        }
    }
}

impl EngineConfig {
    /// Read a config file, falling back to defaults for absent fields
    pub fn load(path: impl AsRef<std::path::Path>) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Initialize `env_logger` with `info` as the default level
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "width": 640, "renderer": { "shadow_map_size": 1024 } }"#)
                .unwrap();
        assert_eq!(config.width, 640);
        assert_eq!(config.height, 720);
        assert_eq!(config.renderer.shadow_map_size, 1024);
        assert_eq!(config.renderer.brdf_lut_size, 256);
    }
}
