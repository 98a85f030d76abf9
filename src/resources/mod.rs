//! Resource management
//!
//! Meshes, textures, materials and shaders are resolved from GUIDs or paths
//! and cached. Unresolvable references fall back to built-in resources.

mod material;
mod mesh;
pub mod shader;
mod texture;

pub use material::*;
pub use mesh::*;
pub use shader::{ShaderKey, ShaderManager, ShaderProgram};
pub use texture::*;
