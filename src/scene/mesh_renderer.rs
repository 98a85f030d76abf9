//! MeshRenderer component

use crate::backend::{BindGroupHandle, BufferHandle};
use crate::render::graveyard::{GpuResource, ResourceGraveyard};
use crate::resources::BUILTIN_CUBE_GUID;
use crate::resources::shader::{DEFAULT_FRAGMENT_SHADER, DEFAULT_VERTEX_SHADER};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// GPU objects owned by a [`MeshRenderer`] once its mesh has been uploaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshGpu {
    /// Mesh the buffers were built from
    pub mesh: Uuid,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub vertex_count: u32,
    pub index_count: u32,
    /// Per-object uniforms (model matrix, material parameters)
    pub object_buffer: BufferHandle,
    pub object_bind_group: BindGroupHandle,
}

/// Draws a mesh with a material
#[derive(Debug)]
pub struct MeshRenderer {
    pub mesh: Option<Uuid>,
    pub material: Option<Uuid>,
    pub vertex_shader: String,
    pub fragment_shader: String,
    gpu: Option<MeshGpu>,
}

impl Default for MeshRenderer {
    fn default() -> Self {
        Self {
            mesh: None,
            material: None,
            vertex_shader: DEFAULT_VERTEX_SHADER.to_string(),
            fragment_shader: DEFAULT_FRAGMENT_SHADER.to_string(),
            gpu: None,
        }
    }
}

impl MeshRenderer {
    pub fn new(mesh: Uuid, material: Option<Uuid>) -> Self {
        Self {
            mesh: Some(mesh),
            material,
            ..Default::default()
        }
    }

    /// Renderer for the built-in unit cube with the default material
    pub fn cube() -> Self {
        Self::new(BUILTIN_CUBE_GUID, None)
    }

    pub fn with_shaders(mut self, vertex: &str, fragment: &str) -> Self {
        self.vertex_shader = vertex.to_string();
        self.fragment_shader = fragment.to_string();
        self
    }

    /// Vertices currently uploaded; zero until the renderer has built the buffers
    pub fn vertex_count(&self) -> u32 {
        self.gpu.map_or(0, |g| g.vertex_count)
    }

    pub fn gpu(&self) -> Option<&MeshGpu> {
        self.gpu.as_ref()
    }

    /// Whether the uploaded buffers still match the referenced mesh
    pub fn is_current(&self) -> bool {
        match (self.gpu, self.mesh) {
            (Some(gpu), Some(mesh)) => gpu.mesh == mesh,
            _ => false,
        }
    }

    /// Install freshly uploaded buffers, burying any previous ones
    pub(crate) fn set_gpu(&mut self, gpu: MeshGpu, graveyard: &mut ResourceGraveyard) {
        self.release_gpu(graveyard);
        self.gpu = Some(gpu);
    }

    pub(crate) fn release_gpu(&mut self, graveyard: &mut ResourceGraveyard) {
        if let Some(gpu) = self.gpu.take() {
            graveyard.bury(GpuResource::BindGroup(gpu.object_bind_group));
            graveyard.bury(GpuResource::Buffer(gpu.object_buffer));
            graveyard.bury(GpuResource::Buffer(gpu.vertex_buffer));
            graveyard.bury(GpuResource::Buffer(gpu.index_buffer));
        }
    }
}

/// Serialized field subset of a [`MeshRenderer`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeshRendererRecord {
    pub mesh: Option<Uuid>,
    pub material: Option<Uuid>,
    pub vertex_shader: String,
    pub fragment_shader: String,
}

impl Default for MeshRendererRecord {
    fn default() -> Self {
        MeshRendererRecord::from(&MeshRenderer::default())
    }
}

impl From<&MeshRenderer> for MeshRendererRecord {
    fn from(renderer: &MeshRenderer) -> Self {
        Self {
            mesh: renderer.mesh,
            material: renderer.material,
            vertex_shader: renderer.vertex_shader.clone(),
            fragment_shader: renderer.fragment_shader.clone(),
        }
    }
}

impl From<MeshRendererRecord> for MeshRenderer {
    fn from(record: MeshRendererRecord) -> Self {
        Self {
            mesh: record.mesh,
            material: record.material,
            vertex_shader: record.vertex_shader,
            fragment_shader: record.fragment_shader,
            gpu: None,
        }
    }
}
