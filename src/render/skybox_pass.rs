//! Equirectangular environment drawn behind everything

use crate::assets::ProjectPaths;
use crate::backend::*;
use crate::render::graveyard::{GpuResource, ResourceGraveyard};
use crate::resources::{GpuTexture, Mesh, ShaderManager};
use crate::scene::{Camera, Scene};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

pub const SKYBOX_VERTEX_SHADER_PATH: &str = "builtin:skybox.vert";
pub const SKYBOX_FRAGMENT_SHADER_PATH: &str = "builtin:skybox.frag";

pub const SKYBOX_VERTEX_SHADER: &str = r#"
struct SkyboxUniforms {
    view_projection: mat4x4<f32>,
    // x: exposure, y: flip v
    params: vec4<f32>,
}

@group(0) @binding(0) var<uniform> sky: SkyboxUniforms;
@group(0) @binding(1) var environment_map: texture_2d<f32>;
@group(0) @binding(2) var environment_sampler: sampler;

struct SkyboxOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) direction: vec3<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> SkyboxOutput {
    var out: SkyboxOutput;
    let clip = sky.view_projection * vec4<f32>(position, 1.0);
    // Pin to the far plane
    out.clip_position = clip.xyww;
    out.direction = position;
    return out;
}
"#;

pub const SKYBOX_FRAGMENT_SHADER: &str = r#"
const SKY_PI: f32 = 3.14159265359;

fn equirect_uv(direction: vec3<f32>) -> vec2<f32> {
    let d = normalize(direction);
    let u = atan2(d.z, d.x) / (2.0 * SKY_PI) + 0.5;
    let v = acos(clamp(d.y, -1.0, 1.0)) / SKY_PI;
    return vec2<f32>(u, v);
}

@fragment
fn fs_main(input: SkyboxOutput) -> @location(0) vec4<f32> {
    var uv = equirect_uv(input.direction);
    if sky.params.y > 0.5 {
        uv.y = 1.0 - uv.y;
    }
    let hdr = textureSampleLevel(environment_map, environment_sampler, uv, 0.0).rgb * sky.params.x;
    let mapped = hdr / (hdr + vec3<f32>(1.0));
    return vec4<f32>(mapped, 1.0);
}
"#;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SkyboxUniforms {
    view_projection: Mat4,
    params: Vec4,
}

struct SkyboxResources {
    vertex_buffer: BufferHandle,
    vertex_count: u32,
    uniform_buffer: BufferHandle,
    layout: BindGroupLayoutHandle,
    pipeline: Option<RenderPipelineHandle>,
}

/// Unit cube rendered with translation stripped from the view, depth pinned to 1
pub struct SkyboxPass {
    resources: Option<SkyboxResources>,
    /// Bind group and the environment view it was built for
    bind_group: Option<(TextureViewHandle, BindGroupHandle)>,
}

impl Default for SkyboxPass {
    fn default() -> Self {
        Self::new()
    }
}

impl SkyboxPass {
    pub fn new() -> Self {
        Self {
            resources: None,
            bind_group: None,
        }
    }

    fn ensure_resources<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        shaders: &mut ShaderManager,
        paths: &ProjectPaths,
        color_format: TextureFormat,
    ) -> BackendResult<&SkyboxResources> {
        if self.resources.is_none() {
            let positions = Mesh::cube_positions();
            let vertex_buffer = backend.create_buffer_init(
                &BufferDescriptor {
                    label: Some("Skybox Cube".into()),
                    size: (positions.len() * std::mem::size_of::<glam::Vec3>()) as u64,
                    usage: BufferUsage::VERTEX,
                },
                bytemuck::cast_slice(&positions),
            )?;
            let uniform_buffer = backend.create_buffer(&BufferDescriptor {
                label: Some("Skybox Uniforms".into()),
                size: std::mem::size_of::<SkyboxUniforms>() as u64,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            })?;
            let layout = backend.create_bind_group_layout(&[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStageFlags::VERTEX_FRAGMENT,
                    ty: BindingType::UniformBuffer,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStageFlags::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: false },
                    },
                },
                BindGroupLayoutEntry {
                    binding: 2,
                    visibility: ShaderStageFlags::FRAGMENT,
                    ty: BindingType::Sampler(SamplerBindingKind::NonFiltering),
                },
            ])?;

            let program = shaders.get(paths, SKYBOX_VERTEX_SHADER_PATH, SKYBOX_FRAGMENT_SHADER_PATH);
            let pipeline = if program.is_usable() {
                backend
                    .create_render_pipeline(&RenderPipelineDescriptor {
                        label: Some("Skybox Pipeline".into()),
                        shader: program.source.clone(),
                        has_fragment: true,
                        vertex_layouts: vec![Vertex::position_layout()],
                        bind_group_layouts: vec![layout],
                        cull_mode: CullMode::None,
                        depth_stencil: Some(DepthStencilState {
                            format: TextureFormat::Depth32Float,
                            depth_write_enabled: false,
                            depth_compare: CompareFunction::LessEqual,
                            bias: DepthBias::default(),
                        }),
                        color_targets: vec![color_format],
                    })
                    .map_err(|e| log::error!("Skybox pipeline unavailable: {}", e))
                    .ok()
            } else {
                None
            };

            self.resources = Some(SkyboxResources {
                vertex_buffer,
                vertex_count: positions.len() as u32,
                uniform_buffer,
                layout,
                pipeline,
            });
        }
        match self.resources.as_ref() {
            Some(resources) => Ok(resources),
            None => Err(BackendError::PipelineCreationFailed("skybox resources missing".into())),
        }
    }

    /// Upload uniforms and bind `environment`. Call before the main pass begins.
    #[allow(clippy::too_many_arguments)]
    pub fn prepare<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        shaders: &mut ShaderManager,
        paths: &ProjectPaths,
        environment: &GpuTexture,
        sampler: SamplerHandle,
        camera: &Camera,
        scene: &Scene,
    ) -> BackendResult<()> {
        let color_format = backend.swapchain_format();
        let resources = self.ensure_resources(backend, shaders, paths, color_format)?;
        let (uniform_buffer, layout) = (resources.uniform_buffer, resources.layout);

        let uniforms = SkyboxUniforms {
            view_projection: camera.projection_matrix() * camera.rotation_only_view(),
            params: Vec4::new(scene.exposure, if scene.flip_v { 1.0 } else { 0.0 }, 0.0, 0.0),
        };
        backend.write_buffer(uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let stale = self
            .bind_group
            .map_or(true, |(view, _)| view != environment.view);
        if stale {
            if let Some((_, old)) = self.bind_group.take() {
                backend.destroy_bind_group(old);
            }
            let bind_group = backend.create_bind_group(
                layout,
                &[
                    (
                        0,
                        BindGroupEntry::Buffer {
                            buffer: uniform_buffer,
                            offset: 0,
                            size: None,
                        },
                    ),
                    (1, BindGroupEntry::Texture(environment.view)),
                    (2, BindGroupEntry::Sampler(sampler)),
                ],
            )?;
            self.bind_group = Some((environment.view, bind_group));
        }
        Ok(())
    }

    /// Record the cube draw into the open pass. Returns whether anything was drawn.
    pub fn draw<B: GraphicsBackend>(&self, backend: &mut B) -> bool {
        let (Some(resources), Some((_, bind_group))) = (self.resources.as_ref(), self.bind_group)
        else {
            return false;
        };
        let Some(pipeline) = resources.pipeline else {
            return false;
        };
        backend.set_render_pipeline(pipeline);
        backend.set_bind_group(0, bind_group);
        backend.set_vertex_buffer(0, resources.vertex_buffer, 0);
        backend.draw(0..resources.vertex_count, 0..1);
        true
    }

    pub fn dispose(&mut self, graveyard: &mut ResourceGraveyard) {
        if let Some((_, bind_group)) = self.bind_group.take() {
            graveyard.bury(GpuResource::BindGroup(bind_group));
        }
        if let Some(r) = self.resources.take() {
            if let Some(pipeline) = r.pipeline {
                graveyard.bury(GpuResource::Pipeline(pipeline));
            }
            graveyard.bury(GpuResource::BindGroupLayout(r.layout));
            graveyard.bury(GpuResource::Buffer(r.uniform_buffer));
            graveyard.bury(GpuResource::Buffer(r.vertex_buffer));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessBackend, RecordedCommand};
    use crate::resources::TextureData;

    #[test]
    fn draws_cube_with_far_plane_pipeline() {
        let mut backend = HeadlessBackend::new(32, 32);
        let mut shaders = ShaderManager::new();
        let paths = ProjectPaths::rooted_at(".");
        let env = GpuTexture::create(
            &mut backend,
            &TextureData::solid_color([255; 4], "env", TextureFormat::Rgba8Unorm),
        )
        .unwrap();
        let sampler = backend.create_sampler(&SamplerDescriptor::nearest("env")).unwrap();

        let mut pass = SkyboxPass::new();
        assert!(!pass.draw(&mut backend));
        pass.prepare(
            &mut backend,
            &mut shaders,
            &paths,
            &env,
            sampler,
            &Camera::default(),
            &Scene::default(),
        )
        .unwrap();
        assert!(pass.draw(&mut backend));
        assert!(backend.commands().contains(&RecordedCommand::Draw {
            vertices: 0..36,
            instances: 0..1
        }));

        let pipeline = backend
            .commands()
            .iter()
            .find_map(|c| match c {
                RecordedCommand::SetPipeline(p) => Some(*p),
                _ => None,
            })
            .unwrap();
        let desc = backend.pipeline_descriptor(pipeline).unwrap();
        assert_eq!(desc.cull_mode, CullMode::None);
        let depth = desc.depth_stencil.as_ref().unwrap();
        assert!(!depth.depth_write_enabled);
        assert_eq!(depth.depth_compare, CompareFunction::LessEqual);
    }

    #[test]
    fn bind_group_follows_environment() {
        let mut backend = HeadlessBackend::new(32, 32);
        let mut shaders = ShaderManager::new();
        let paths = ProjectPaths::rooted_at(".");
        let sampler = backend.create_sampler(&SamplerDescriptor::nearest("env")).unwrap();
        let data = TextureData::solid_color([0; 4], "env", TextureFormat::Rgba8Unorm);
        let first = GpuTexture::create(&mut backend, &data).unwrap();
        let second = GpuTexture::create(&mut backend, &data).unwrap();

        let mut pass = SkyboxPass::new();
        let (camera, scene) = (Camera::default(), Scene::default());
        pass.prepare(&mut backend, &mut shaders, &paths, &first, sampler, &camera, &scene)
            .unwrap();
        let before = backend.live_bind_group_count();
        pass.prepare(&mut backend, &mut shaders, &paths, &first, sampler, &camera, &scene)
            .unwrap();
        assert_eq!(backend.live_bind_group_count(), before);
        pass.prepare(&mut backend, &mut shaders, &paths, &second, sampler, &camera, &scene)
            .unwrap();
        assert_eq!(backend.live_bind_group_count(), before);
        assert_eq!(pass.bind_group.unwrap().0, second.view);
    }
}
