//! Depth-only shadow map pass for the main directional light

use crate::assets::ProjectPaths;
use crate::backend::*;
use crate::render::graveyard::{GpuResource, ResourceGraveyard};
use crate::resources::ShaderManager;
use crate::scene::{GameObjectManager, Light};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Half extent of the orthographic light frustum
pub const SHADOW_ORTHO_SIZE: f32 = 7.0;
pub const SHADOW_NEAR: f32 = 1.0;
pub const SHADOW_FAR: f32 = 40.0;
/// How far the light eye sits behind the scene center
pub const SHADOW_DISTANCE_BACK: f32 = 20.0;

pub const SHADOW_VERTEX_SHADER_PATH: &str = "builtin:shadow.vert";

pub const SHADOW_SHADER: &str = r#"
struct ShadowUniforms {
    light_space: mat4x4<f32>,
}

struct ObjectUniforms {
    model: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
    uv_transform: vec4<f32>,
    material_flags: vec4<u32>,
}

@group(0) @binding(0) var<uniform> shadow: ShadowUniforms;
@group(1) @binding(0) var<uniform> object: ObjectUniforms;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return shadow.light_space * object.model * vec4<f32>(position, 1.0);
}
"#;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ShadowUniforms {
    light_space: Mat4,
}

/// Light-space view-projection for a directional light aimed at `center`
pub fn light_space_matrix(light_direction: Vec3, center: Vec3) -> Mat4 {
    let direction = light_direction.try_normalize().unwrap_or(Vec3::NEG_Y);
    let up = if direction.abs().dot(Vec3::Y) > 0.999 {
        Vec3::Z
    } else {
        Vec3::Y
    };
    let eye = center - direction * SHADOW_DISTANCE_BACK;
    let view = Mat4::look_at_rh(eye, center, up);
    let projection = Mat4::orthographic_rh(
        -SHADOW_ORTHO_SIZE,
        SHADOW_ORTHO_SIZE,
        -SHADOW_ORTHO_SIZE,
        SHADOW_ORTHO_SIZE,
        SHADOW_NEAR,
        SHADOW_FAR,
    );
    projection * view
}

/// Geometry drawn into the shadow map
#[derive(Debug, Clone, Copy)]
pub struct ShadowCaster {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
    pub object_bind_group: BindGroupHandle,
}

struct ShadowResources {
    depth_texture: TextureHandle,
    depth_view: TextureViewHandle,
    uniform_buffer: BufferHandle,
    layout: BindGroupLayoutHandle,
    bind_group: BindGroupHandle,
    /// `None` when the shadow program failed to compile
    pipeline: Option<RenderPipelineHandle>,
}

/// Renders scene depth from the first directional light
///
/// GPU objects are created on first use. The depth texture exists even when
/// no directional light does, so materials can always bind it.
pub struct ShadowPass {
    size: u32,
    object_layout: BindGroupLayoutHandle,
    resources: Option<ShadowResources>,
    light_space: Mat4,
}

impl ShadowPass {
    pub fn new(size: u32, object_layout: BindGroupLayoutHandle) -> Self {
        Self {
            size: size.max(1),
            object_layout,
            resources: None,
            light_space: Mat4::IDENTITY,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Light-space matrix of the last executed pass
    pub fn light_space(&self) -> Mat4 {
        self.light_space
    }

    pub fn depth_view(&self) -> Option<TextureViewHandle> {
        self.resources.as_ref().map(|r| r.depth_view)
    }

    pub fn ensure_resources<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        shaders: &mut ShaderManager,
        paths: &ProjectPaths,
    ) -> BackendResult<()> {
        if self.resources.is_some() {
            return Ok(());
        }

        let depth_texture = backend.create_texture(&TextureDescriptor {
            label: Some("Shadow Map".into()),
            width: self.size,
            height: self.size,
            mip_levels: 1,
            format: TextureFormat::Depth32Float,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        })?;
        let depth_view = backend.create_texture_view(depth_texture)?;

        let uniform_buffer = backend.create_buffer(&BufferDescriptor {
            label: Some("Shadow Uniforms".into()),
            size: std::mem::size_of::<ShadowUniforms>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })?;
        let layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStageFlags::VERTEX,
            ty: BindingType::UniformBuffer,
        }])?;
        let bind_group = backend.create_bind_group(
            layout,
            &[(
                0,
                BindGroupEntry::Buffer {
                    buffer: uniform_buffer,
                    offset: 0,
                    size: None,
                },
            )],
        )?;

        let program = shaders.get(paths, SHADOW_VERTEX_SHADER_PATH, "");
        let pipeline = if program.is_usable() {
            let created = backend.create_render_pipeline(&RenderPipelineDescriptor {
                label: Some("Shadow Pipeline".into()),
                shader: program.source.clone(),
                has_fragment: false,
                vertex_layouts: vec![Vertex::layout()],
                bind_group_layouts: vec![layout, self.object_layout],
                cull_mode: CullMode::Front,
                depth_stencil: Some(DepthStencilState {
                    format: TextureFormat::Depth32Float,
                    depth_write_enabled: true,
                    depth_compare: CompareFunction::LessEqual,
                    bias: DepthBias {
                        constant: 2,
                        slope_scale: 2.0,
                        clamp: 0.0,
                    },
                }),
                color_targets: vec![],
            });
            match created {
                Ok(pipeline) => Some(pipeline),
                Err(e) => {
                    log::error!("Shadow pipeline unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        log::debug!("Created {}x{} shadow map", self.size, self.size);
        self.resources = Some(ShadowResources {
            depth_texture,
            depth_view,
            uniform_buffer,
            layout,
            bind_group,
            pipeline,
        });
        Ok(())
    }

    /// Render the shadow map. Returns `false` without touching the GPU when
    /// the scene has no directional light.
    pub fn execute<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        shaders: &mut ShaderManager,
        paths: &ProjectPaths,
        objects: &GameObjectManager,
        casters: &[ShadowCaster],
    ) -> BackendResult<bool> {
        let Some((light_id, _)) = objects.directional_lights().first().copied() else {
            return Ok(false);
        };
        let rotation = objects.world_rotation(light_id).unwrap_or_default();
        self.light_space = light_space_matrix(Light::direction(rotation), Vec3::ZERO);

        self.ensure_resources(backend, shaders, paths)?;
        let Some(resources) = self.resources.as_ref() else {
            return Ok(false);
        };

        backend.write_buffer(
            resources.uniform_buffer,
            0,
            bytemuck::bytes_of(&ShadowUniforms {
                light_space: self.light_space,
            }),
        );

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Shadow Pass".into()),
            color_attachments: vec![],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: resources.depth_view,
                depth_load_op: LoadOp::Clear([1.0, 0.0, 0.0, 0.0]),
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
        })?;
        backend.set_viewport(0.0, 0.0, self.size as f32, self.size as f32, 0.0, 1.0);

        if let Some(pipeline) = resources.pipeline {
            backend.set_render_pipeline(pipeline);
            backend.set_bind_group(0, resources.bind_group);
            for caster in casters.iter().filter(|c| c.index_count > 0) {
                backend.set_bind_group(1, caster.object_bind_group);
                backend.set_vertex_buffer(0, caster.vertex_buffer, 0);
                backend.set_index_buffer(caster.index_buffer, 0, IndexFormat::Uint32);
                backend.draw_indexed(0..caster.index_count, 0, 0..1);
            }
        }

        backend.end_render_pass();
        Ok(true)
    }

    pub fn dispose(&mut self, graveyard: &mut ResourceGraveyard) {
        if let Some(r) = self.resources.take() {
            if let Some(pipeline) = r.pipeline {
                graveyard.bury(GpuResource::Pipeline(pipeline));
            }
            graveyard.bury(GpuResource::BindGroup(r.bind_group));
            graveyard.bury(GpuResource::BindGroupLayout(r.layout));
            graveyard.bury(GpuResource::Buffer(r.uniform_buffer));
            graveyard.bury(GpuResource::TextureView(r.depth_view));
            graveyard.bury(GpuResource::Texture(r.depth_texture));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessBackend, RecordedCommand};
    use glam::{Quat, Vec4};

    fn object_layout(backend: &mut HeadlessBackend) -> BindGroupLayoutHandle {
        backend
            .create_bind_group_layout(&[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::VERTEX_FRAGMENT,
                ty: BindingType::UniformBuffer,
            }])
            .unwrap()
    }

    #[test]
    fn matrix_centers_origin_at_distance_back() {
        let m = light_space_matrix(Vec3::new(0.0, -1.0, -1.0), Vec3::ZERO);
        let clip = m * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(clip.x.abs() < 1e-5 && clip.y.abs() < 1e-5);
        let expected_depth = (SHADOW_DISTANCE_BACK - SHADOW_NEAR) / (SHADOW_FAR - SHADOW_NEAR);
        assert!((clip.z - expected_depth).abs() < 1e-5);
    }

    #[test]
    fn matrix_covers_ortho_extent() {
        let m = light_space_matrix(Vec3::NEG_Z, Vec3::ZERO);
        let edge = m * Vec4::new(SHADOW_ORTHO_SIZE, 0.0, 0.0, 1.0);
        assert!((edge.x.abs() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn vertical_light_uses_alternate_up() {
        let m = light_space_matrix(Vec3::NEG_Y, Vec3::ZERO);
        assert!(m.is_finite());
    }

    #[test]
    fn no_directional_light_skips_pass() {
        let mut backend = HeadlessBackend::new(64, 64);
        let layout = object_layout(&mut backend);
        let mut shaders = ShaderManager::new();
        let paths = ProjectPaths::rooted_at(".");
        let mut objects = GameObjectManager::new();
        objects.create_light("point", Light::default());

        let mut pass = ShadowPass::new(128, layout);
        backend.begin_frame().unwrap();
        let ran = pass
            .execute(&mut backend, &mut shaders, &paths, &objects, &[])
            .unwrap();
        assert!(!ran);
        assert!(backend.render_pass_labels().is_empty());
        assert!(pass.depth_view().is_none());
    }

    #[test]
    fn directional_light_renders_casters() {
        let mut backend = HeadlessBackend::new(64, 64);
        let layout = object_layout(&mut backend);
        let mut shaders = ShaderManager::new();
        let paths = ProjectPaths::rooted_at(".");
        let mut objects = GameObjectManager::new();
        let sun = objects.create_light("sun", Light::directional(Vec3::ONE, 100.0));
        let rotation = Quat::from_rotation_x(-std::f32::consts::FRAC_PI_4);
        objects.get_mut(sun).unwrap().transform.local_rotation = rotation;

        let buffer = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 160,
                usage: BufferUsage::UNIFORM,
            })
            .unwrap();
        let bind_group = backend
            .create_bind_group(layout, &[(0, BindGroupEntry::Buffer { buffer, offset: 0, size: None })])
            .unwrap();
        let caster = ShadowCaster {
            vertex_buffer: buffer,
            index_buffer: buffer,
            index_count: 36,
            object_bind_group: bind_group,
        };

        let mut pass = ShadowPass::new(128, layout);
        backend.begin_frame().unwrap();
        let ran = pass
            .execute(&mut backend, &mut shaders, &paths, &objects, &[caster])
            .unwrap();
        assert!(ran);
        assert_eq!(backend.render_pass_labels(), vec!["Shadow Pass".to_string()]);
        assert_eq!(backend.draw_count(), 1);
        assert!(backend.commands().contains(&RecordedCommand::SetViewport {
            width: 128.0,
            height: 128.0
        }));
        assert_eq!(
            pass.light_space(),
            light_space_matrix(Light::direction(rotation), Vec3::ZERO)
        );

        let view = pass.depth_view().unwrap();
        let desc = backend.view_descriptor(view).unwrap();
        assert_eq!((desc.width, desc.format), (128, TextureFormat::Depth32Float));
    }
}
