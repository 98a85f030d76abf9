//! Headless backend for tests and tooling.
//!
//! This backend performs no GPU work. It hands out handles, keeps the bytes
//! written to buffers, remembers every descriptor it was given and records
//! the command stream, so callers can assert on what a frame would have done.

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::{HashMap, HashSet};
use std::ops::Range;

/// A command recorded by [`HeadlessBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginRenderPass {
        label: Option<String>,
        color: Vec<TextureViewHandle>,
        depth: Option<TextureViewHandle>,
        depth_store: Option<StoreOp>,
    },
    EndRenderPass,
    SetPipeline(RenderPipelineHandle),
    SetBindGroup {
        index: u32,
        bind_group: BindGroupHandle,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: BufferHandle,
    },
    SetIndexBuffer {
        buffer: BufferHandle,
        format: IndexFormat,
    },
    SetViewport {
        width: f32,
        height: f32,
    },
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        indices: Range<u32>,
        instances: Range<u32>,
    },
}

struct HeadlessBuffer {
    usage: BufferUsage,
    data: Vec<u8>,
}

/// Recording backend with no GPU behind it
pub struct HeadlessBackend {
    width: u32,
    height: u32,
    format: TextureFormat,
    next_id: u64,

    buffers: HashMap<u64, HeadlessBuffer>,
    textures: HashMap<u64, TextureDescriptor>,
    texture_data: HashMap<u64, Vec<u8>>,
    views: HashMap<u64, u64>,
    samplers: HashMap<u64, SamplerDescriptor>,
    layouts: HashMap<u64, Vec<BindGroupLayoutEntry>>,
    bind_groups: HashMap<u64, Vec<(u32, BindGroupEntry)>>,
    pipelines: HashMap<u64, RenderPipelineDescriptor>,

    swapchain_view: Option<u64>,
    retired_swapchain_views: HashSet<u64>,
    in_pass: bool,
    frames_presented: u64,
    commands: Vec<RecordedCommand>,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            format: TextureFormat::Bgra8UnormSrgb,
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            texture_data: HashMap::new(),
            views: HashMap::new(),
            samplers: HashMap::new(),
            layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            pipelines: HashMap::new(),
            swapchain_view: None,
            retired_swapchain_views: HashSet::new(),
            in_pass: false,
            frames_presented: 0,
            commands: Vec::new(),
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Every command recorded since creation or the last [`clear_commands`](Self::clear_commands)
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Labels of the render passes begun, in order
    pub fn render_pass_labels(&self) -> Vec<String> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BeginRenderPass { label, .. } => {
                    Some(label.clone().unwrap_or_default())
                }
                _ => None,
            })
            .collect()
    }

    /// Number of draw calls recorded
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. }
                )
            })
            .count()
    }

    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|b| b.data.as_slice())
    }

    pub fn buffer_usage(&self, buffer: BufferHandle) -> Option<BufferUsage> {
        self.buffers.get(&buffer.0).map(|b| b.usage)
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0)
    }

    pub fn texture_data(&self, texture: TextureHandle) -> Option<&[u8]> {
        self.texture_data.get(&texture.0).map(|d| d.as_slice())
    }

    /// Descriptor of the texture a view was created from
    pub fn view_descriptor(&self, view: TextureViewHandle) -> Option<&TextureDescriptor> {
        self.views
            .get(&view.0)
            .and_then(|texture| self.textures.get(texture))
    }

    pub fn pipeline_descriptor(
        &self,
        pipeline: RenderPipelineHandle,
    ) -> Option<&RenderPipelineDescriptor> {
        self.pipelines.get(&pipeline.0)
    }

    pub fn bind_group_entries(&self, bind_group: BindGroupHandle) -> Option<&[(u32, BindGroupEntry)]> {
        self.bind_groups.get(&bind_group.0).map(|e| e.as_slice())
    }

    pub fn sampler_descriptor(&self, sampler: SamplerHandle) -> Option<&SamplerDescriptor> {
        self.samplers.get(&sampler.0)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_bind_group_count(&self) -> usize {
        self.bind_groups.len()
    }

    pub fn live_pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    fn is_swapchain_view(&self, view: TextureViewHandle) -> bool {
        self.swapchain_view == Some(view.0)
    }

    fn attachment_size(&self, view: TextureViewHandle) -> BackendResult<(u32, u32, TextureFormat)> {
        if self.is_swapchain_view(view) {
            return Ok((self.width, self.height, self.format));
        }
        if self.retired_swapchain_views.contains(&view.0) {
            return Err(BackendError::FramebufferIncomplete(
                "swapchain view used outside its frame".into(),
            ));
        }
        let desc = self
            .view_descriptor(view)
            .ok_or_else(|| BackendError::FramebufferIncomplete(format!("unknown view {:?}", view)))?;
        if !desc.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            return Err(BackendError::FramebufferIncomplete(format!(
                "texture {:?} is not a render attachment",
                desc.label
            )));
        }
        Ok((desc.width, desc.height, desc.format))
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.width = width;
            self.height = height;
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        let id = self.allocate_id();
        self.swapchain_view = Some(id);
        Ok(FrameContext {
            swapchain_view: TextureViewHandle(id),
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if self.in_pass {
            log::warn!("HeadlessBackend: frame ended inside an open render pass");
            self.in_pass = false;
        }
        if let Some(id) = self.swapchain_view.take() {
            self.retired_swapchain_views.insert(id);
        }
        self.frames_presented += 1;
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.format
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!("HeadlessBackend: creating buffer {:?} ({} bytes)", desc.label, desc.size);
        let id = self.allocate_id();
        self.buffers.insert(
            id,
            HeadlessBuffer {
                usage: desc.usage,
                data: vec![0; desc.size as usize],
            },
        );
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let id = self.allocate_id();
        self.buffers.insert(
            id,
            HeadlessBuffer {
                usage: desc.usage,
                data: data.to_vec(),
            },
        );
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(buf) = self.buffers.get_mut(&buffer.0) else {
            log::warn!("HeadlessBackend: write to unknown buffer {:?}", buffer);
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > buf.data.len() {
            log::warn!(
                "HeadlessBackend: write of {} bytes at {} overflows buffer of {} bytes",
                data.len(),
                offset,
                buf.data.len()
            );
            return;
        }
        buf.data[start..end].copy_from_slice(data);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has a zero dimension",
                desc.label
            )));
        }
        let id = self.allocate_id();
        self.textures.insert(id, desc.clone());
        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::TextureCreationFailed("Texture not found".into()));
        }
        let id = self.allocate_id();
        self.views.insert(id, texture.0);
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        let Some(desc) = self.textures.get(&texture.0) else {
            return;
        };
        let expected = (width * height * desc.format.bytes_per_pixel()) as usize;
        if data.len() != expected {
            log::warn!(
                "HeadlessBackend: texture {:?} upload is {} bytes, expected {}",
                desc.label,
                data.len(),
                expected
            );
        }
        self.texture_data.insert(texture.0, data.to_vec());
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let id = self.allocate_id();
        self.samplers.insert(id, desc.clone());
        Ok(SamplerHandle(id))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let id = self.allocate_id();
        self.layouts.insert(id, entries.to_vec());
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout_entries = self
            .layouts
            .get(&layout.0)
            .ok_or_else(|| BackendError::PipelineCreationFailed("Layout not found".into()))?;
        for entry in layout_entries {
            if !entries.iter().any(|(binding, _)| *binding == entry.binding) {
                return Err(BackendError::PipelineCreationFailed(format!(
                    "binding {} missing from bind group",
                    entry.binding
                )));
            }
        }
        let id = self.allocate_id();
        self.bind_groups.insert(id, entries.to_vec());
        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        if let Some(missing) = desc
            .bind_group_layouts
            .iter()
            .find(|l| !self.layouts.contains_key(&l.0))
        {
            return Err(BackendError::PipelineCreationFailed(format!(
                "unknown bind group layout {:?}",
                missing
            )));
        }
        let id = self.allocate_id();
        self.pipelines.insert(id, desc.clone());
        Ok(RenderPipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) -> BackendResult<()> {
        if desc.color_attachments.is_empty() && desc.depth_stencil_attachment.is_none() {
            return Err(BackendError::FramebufferIncomplete(
                "render pass has no attachments".into(),
            ));
        }

        let mut extent: Option<(u32, u32)> = None;
        for att in &desc.color_attachments {
            let (w, h, format) = self.attachment_size(att.view)?;
            if format.is_depth() {
                return Err(BackendError::FramebufferIncomplete(
                    "depth texture bound as color attachment".into(),
                ));
            }
            if extent.is_some_and(|e| e != (w, h)) {
                return Err(BackendError::FramebufferIncomplete("attachment size mismatch".into()));
            }
            extent = Some((w, h));
        }
        if let Some(att) = &desc.depth_stencil_attachment {
            let (w, h, format) = self.attachment_size(att.view)?;
            if !format.is_depth() {
                return Err(BackendError::FramebufferIncomplete(
                    "color texture bound as depth attachment".into(),
                ));
            }
            if extent.is_some_and(|e| e != (w, h)) {
                return Err(BackendError::FramebufferIncomplete("attachment size mismatch".into()));
            }
        }

        self.in_pass = true;
        self.commands.push(RecordedCommand::BeginRenderPass {
            label: desc.label.clone(),
            color: desc.color_attachments.iter().map(|a| a.view).collect(),
            depth: desc.depth_stencil_attachment.as_ref().map(|a| a.view),
            depth_store: desc.depth_stencil_attachment.as_ref().map(|a| a.depth_store_op),
        });
        Ok(())
    }

    fn end_render_pass(&mut self) {
        if self.in_pass {
            self.in_pass = false;
            self.commands.push(RecordedCommand::EndRenderPass);
        }
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        if self.in_pass {
            self.commands.push(RecordedCommand::SetPipeline(pipeline));
        }
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        if self.in_pass {
            self.commands
                .push(RecordedCommand::SetBindGroup { index, bind_group });
        }
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, _offset: u64) {
        if self.in_pass {
            self.commands
                .push(RecordedCommand::SetVertexBuffer { slot, buffer });
        }
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, _offset: u64, format: IndexFormat) {
        if self.in_pass {
            self.commands
                .push(RecordedCommand::SetIndexBuffer { buffer, format });
        }
    }

    fn set_viewport(&mut self, _x: f32, _y: f32, width: f32, height: f32, _min_depth: f32, _max_depth: f32) {
        if self.in_pass {
            self.commands
                .push(RecordedCommand::SetViewport { width, height });
        }
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        if self.in_pass {
            self.commands
                .push(RecordedCommand::Draw { vertices, instances });
        }
    }

    fn draw_indexed(&mut self, indices: Range<u32>, _base_vertex: i32, instances: Range<u32>) {
        if self.in_pass {
            self.commands
                .push(RecordedCommand::DrawIndexed { indices, instances });
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
        self.texture_data.remove(&texture.0);
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.views.remove(&view.0);
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(&sampler.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) {
        self.layouts.remove(&layout.0);
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.pipelines.remove(&pipeline.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth_target(backend: &mut HeadlessBackend, usage: TextureUsage) -> TextureViewHandle {
        let texture = backend
            .create_texture(&TextureDescriptor {
                label: Some("depth".into()),
                width: 64,
                height: 64,
                format: TextureFormat::Depth32Float,
                usage,
                ..Default::default()
            })
            .unwrap();
        backend.create_texture_view(texture).unwrap()
    }

    #[test]
    fn depth_only_pass_is_complete() {
        let mut backend = HeadlessBackend::new(64, 64);
        let view = depth_target(
            &mut backend,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        );
        backend
            .begin_render_pass(&RenderPassDescriptor {
                label: Some("depth".into()),
                color_attachments: vec![],
                depth_stencil_attachment: Some(DepthStencilAttachment {
                    view,
                    depth_load_op: LoadOp::Clear([1.0; 4]),
                    depth_store_op: StoreOp::Store,
                    depth_clear_value: 1.0,
                }),
            })
            .unwrap();
        backend.end_render_pass();
        assert_eq!(backend.render_pass_labels(), vec!["depth".to_string()]);
    }

    #[test]
    fn non_attachment_texture_is_incomplete() {
        let mut backend = HeadlessBackend::new(64, 64);
        let view = depth_target(&mut backend, TextureUsage::TEXTURE_BINDING);
        let result = backend.begin_render_pass(&RenderPassDescriptor {
            label: None,
            color_attachments: vec![],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view,
                depth_load_op: LoadOp::Clear([1.0; 4]),
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
        });
        assert!(matches!(result, Err(BackendError::FramebufferIncomplete(_))));
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn swapchain_view_expires_with_frame() {
        let mut backend = HeadlessBackend::new(32, 32);
        let frame = backend.begin_frame().unwrap();
        backend.end_frame().unwrap();
        let result = backend.begin_render_pass(&RenderPassDescriptor {
            label: None,
            color_attachments: vec![ColorAttachment {
                view: frame.swapchain_view,
                load_op: LoadOp::Load,
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn buffer_writes_are_kept() {
        let mut backend = HeadlessBackend::new(1, 1);
        let buffer = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 8,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            })
            .unwrap();
        backend.write_buffer(buffer, 4, &[1, 2, 3, 4]);
        assert_eq!(backend.buffer_data(buffer).unwrap(), &[0, 0, 0, 0, 1, 2, 3, 4]);
        // out of range writes are dropped
        backend.write_buffer(buffer, 6, &[9, 9, 9, 9]);
        assert_eq!(backend.buffer_data(buffer).unwrap()[6], 3);
    }
}
