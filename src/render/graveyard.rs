//! Deferred release of GPU objects

use crate::backend::*;

/// A GPU object waiting to be destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuResource {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    TextureView(TextureViewHandle),
    Sampler(SamplerHandle),
    BindGroup(BindGroupHandle),
    BindGroupLayout(BindGroupLayoutHandle),
    Pipeline(RenderPipelineHandle),
}

/// Collects GPU handles released by code that has no backend at hand
///
/// Components are torn down by the scene graph, which never talks to the GPU.
/// Their handles land here and are destroyed by the renderer at the start of
/// the next frame, or on disposal.
#[derive(Debug, Default)]
pub struct ResourceGraveyard {
    pending: Vec<GpuResource>,
}

impl ResourceGraveyard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bury(&mut self, resource: GpuResource) {
        self.pending.push(resource);
    }

    /// Move every pending handle of `other` into this graveyard
    pub fn append(&mut self, other: &mut ResourceGraveyard) {
        self.pending.append(&mut other.pending);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> &[GpuResource] {
        &self.pending
    }

    /// Destroy everything pending. Views and bind groups go before the
    /// textures and buffers they reference.
    pub fn release<B: GraphicsBackend>(&mut self, backend: &mut B) {
        if self.pending.is_empty() {
            return;
        }
        log::debug!("Releasing {} GPU objects", self.pending.len());
        self.pending.sort_by_key(|r| match r {
            GpuResource::BindGroup(_) => 0,
            GpuResource::Pipeline(_) => 1,
            GpuResource::BindGroupLayout(_) => 2,
            GpuResource::TextureView(_) => 3,
            GpuResource::Sampler(_) => 4,
            GpuResource::Texture(_) => 5,
            GpuResource::Buffer(_) => 6,
        });
        for resource in self.pending.drain(..) {
            match resource {
                GpuResource::Buffer(h) => backend.destroy_buffer(h),
                GpuResource::Texture(h) => backend.destroy_texture(h),
                GpuResource::TextureView(h) => backend.destroy_texture_view(h),
                GpuResource::Sampler(h) => backend.destroy_sampler(h),
                GpuResource::BindGroup(h) => backend.destroy_bind_group(h),
                GpuResource::BindGroupLayout(h) => backend.destroy_bind_group_layout(h),
                GpuResource::Pipeline(h) => backend.destroy_render_pipeline(h),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    #[test]
    fn release_destroys_pending_handles() {
        let mut backend = HeadlessBackend::new(4, 4);
        let buffer = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 16,
                usage: BufferUsage::VERTEX,
            })
            .unwrap();
        let mut graveyard = ResourceGraveyard::new();
        graveyard.bury(GpuResource::Buffer(buffer));
        assert_eq!(backend.live_buffer_count(), 1);

        graveyard.release(&mut backend);
        assert_eq!(backend.live_buffer_count(), 0);
        assert!(graveyard.is_empty());
    }
}
