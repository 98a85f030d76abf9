//! The graphics context the renderer records into
//!
//! A backend is the single graphics context the renderer talks to. It is bound
//! to the thread that created it; every call is synchronous from the caller's
//! point of view.

use crate::backend::types::*;
use thiserror::Error;

/// Failures of the graphics context
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Framebuffer incomplete: {0}")]
    FramebufferIncomplete(String),
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
}

pub type BackendResult<T> = Result<T, BackendError>;

// Opaque ids; the backend owns the objects behind them.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureViewHandle(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerHandle(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPipelineHandle(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindGroupHandle(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindGroupLayoutHandle(pub(crate) u64);

/// Resource bound at one binding of a bind group
#[derive(Debug, Clone)]
pub enum BindGroupEntry {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: Option<u64>,
    },
    Texture(TextureViewHandle),
    Sampler(SamplerHandle),
}

#[derive(Debug, Clone)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: ShaderStageFlags,
    pub ty: BindingType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderStageFlags(u32);

impl ShaderStageFlags {
    pub const VERTEX: Self = Self(1 << 0);
    pub const FRAGMENT: Self = Self(1 << 1);
    pub const VERTEX_FRAGMENT: Self = Self((1 << 0) | (1 << 1));

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for ShaderStageFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone)]
pub enum BindingType {
    UniformBuffer,
    StorageBuffer { read_only: bool },
    Texture { sample_type: TextureSampleType },
    Sampler(SamplerBindingKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSampleType {
    Float { filterable: bool },
    Depth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerBindingKind {
    Filtering,
    NonFiltering,
    Comparison,
}

/// Render pipeline descriptor
///
/// `shader` is a single WGSL module exposing `vs_main` and, when
/// `has_fragment` is set, `fs_main`.
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    pub shader: String,
    pub has_fragment: bool,
    pub vertex_layouts: Vec<VertexBufferLayout>,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
    pub cull_mode: CullMode,
    pub depth_stencil: Option<DepthStencilState>,
    pub color_targets: Vec<TextureFormat>,
}

#[derive(Debug, Clone)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
    pub bias: DepthBias,
}

#[derive(Debug, Clone)]
pub struct ColorAttachment {
    pub view: TextureViewHandle,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOp {
    Clear([f32; 4]),
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    Discard,
}

/// Depth target of a pass; `depth_clear_value` is used with `LoadOp::Clear`
#[derive(Debug, Clone)]
pub struct DepthStencilAttachment {
    pub view: TextureViewHandle,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub depth_clear_value: f32,
}

#[derive(Debug, Clone)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil_attachment: Option<DepthStencilAttachment>,
}

/// Swapchain target of the frame being recorded
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub swapchain_view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
}

/// The graphics context every pass records into
///
/// Handles stay valid until their `destroy_*` call. Commands between
/// `begin_render_pass` and `end_render_pass` apply to that pass only.
pub trait GraphicsBackend {
    /// Reconfigure the presentation surface; zero sizes are ignored
    fn resize(&mut self, width: u32, height: u32);

    /// Surface size after clamping to device limits
    fn surface_size(&self) -> (u32, u32);

    /// Acquire the next swapchain image
    fn begin_frame(&mut self) -> BackendResult<FrameContext>;

    /// Submit recorded passes and present
    fn end_frame(&mut self) -> BackendResult<()>;

    fn swapchain_format(&self) -> TextureFormat;

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8])
        -> BackendResult<BufferHandle>;

    /// Queue a write; it lands before the next submitted pass
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Full view over every mip of `texture`
    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle>;

    /// Write the full first mip of a texture
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32);

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle>;

    /// Fails when an entry names a destroyed resource
    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle>;

    /// Cull, depth and bias state are fixed for the pipeline's lifetime
    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle>;

    /// Begin a render pass. Fails when the attachments do not form a complete framebuffer.
    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) -> BackendResult<()>;

    fn end_render_pass(&mut self);

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle);

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle);

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64);

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat);

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32);

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>);

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    );

    // Destroying an unknown or already destroyed handle is a no-op

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn destroy_texture(&mut self, texture: TextureHandle);

    fn destroy_texture_view(&mut self, view: TextureViewHandle);

    fn destroy_sampler(&mut self, sampler: SamplerHandle);

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle);

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle);

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle);
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}
