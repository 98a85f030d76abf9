//! Scene graph: GameObjects, components, transform hierarchy and scene files

mod camera;
pub mod component;
mod game_object;
mod hierarchy;
mod light;
mod manager;
mod mesh_renderer;
pub mod scene_file;
mod transform;

pub use camera::*;
pub use component::{Component, ComponentKind, ComponentVariant};
pub use game_object::*;
pub use light::*;
pub use manager::*;
pub use mesh_renderer::*;
pub use transform::*;

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Per-scene render settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scene {
    #[serde(rename = "ambientLightIntensity")]
    pub ambient_intensity: f32,
    /// Clear color when no environment map is drawn
    pub skybox_color: Vec3,
    /// Equirectangular HDR environment, relative to the asset root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skybox_hdr_path: Option<String>,
    pub exposure: f32,
    /// Flip the environment map vertically
    pub flip_v: bool,
    pub ibl_specular_intensity: f32,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            ambient_intensity: 0.2,
            skybox_color: Vec3::new(0.1, 0.1, 0.12),
            skybox_hdr_path: None,
            exposure: 1.0,
            flip_v: false,
            ibl_specular_intensity: 1.0,
        }
    }
}

impl Scene {
    /// Whether a skybox path is set at all (resolution happens in the renderer)
    pub fn has_skybox(&self) -> bool {
        self.skybox_hdr_path
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty())
    }
}
