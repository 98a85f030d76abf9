//! Frame orchestration: uploads, shadow map, skybox and the forward pass

use crate::backend::*;
use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::render::brdf_lut::BrdfLut;
use crate::render::graveyard::{GpuResource, ResourceGraveyard};
use crate::render::light_manager::{LightManager, MAX_LIGHTS};
use crate::render::shadow_pass::{ShadowCaster, ShadowPass};
use crate::render::skybox_pass::SkyboxPass;
use crate::resources::{BuiltinTexture, ColorSpace, Material, Mesh, ShaderKey, ShaderProgram};
use crate::scene::{Camera, ComponentKind, GameObjectManager, Light, MeshGpu, MeshRenderer, ObjectId, Scene};
use crate::RendererConfig;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use std::collections::HashMap;
use std::rc::Rc;
use uuid::Uuid;

pub const STANDARD_VERTEX_SHADER: &str = r#"
struct Light {
    position: vec3<f32>,
    intensity: f32,
    color: vec3<f32>,
    radius: f32,
}

struct FrameUniforms {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    light_space: mat4x4<f32>,
    camera_position: vec4<f32>,
    // w > 0.5 when a directional light exists
    main_light_direction: vec4<f32>,
    main_light_color: vec4<f32>,
    // x: ambient, y: IBL specular, z: exposure
    params: vec4<f32>,
    // x: light count, y: shadows, z: IBL, w: flip v
    flags: vec4<u32>,
}

struct ObjectUniforms {
    model: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
    // xy: tiling, zw: offset
    uv_transform: vec4<f32>,
    // x: combined metallic/roughness
    material_flags: vec4<u32>,
}

@group(0) @binding(0) var<storage, read> lights: array<Light, 256>;
@group(0) @binding(1) var<uniform> frame: FrameUniforms;

@group(1) @binding(0) var<uniform> object: ObjectUniforms;

@group(2) @binding(0) var diffuse_map: texture_2d<f32>;
@group(2) @binding(1) var metallic_roughness_map: texture_2d<f32>;
@group(2) @binding(2) var ao_map: texture_2d<f32>;
@group(2) @binding(3) var shadow_map: texture_depth_2d;
@group(2) @binding(4) var metallic_map: texture_2d<f32>;
@group(2) @binding(5) var roughness_map: texture_2d<f32>;
@group(2) @binding(6) var normal_map: texture_2d<f32>;
@group(2) @binding(7) var environment_map: texture_2d<f32>;
@group(2) @binding(8) var brdf_lut: texture_2d<f32>;
@group(2) @binding(9) var material_sampler: sampler;
@group(2) @binding(10) var shadow_sampler: sampler_comparison;
@group(2) @binding(11) var environment_sampler: sampler;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) world_tangent: vec4<f32>,
    @location(4) light_space_position: vec4<f32>,
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let world_position = object.model * vec4<f32>(input.position, 1.0);
    out.world_position = world_position.xyz;
    out.clip_position = frame.projection * frame.view * world_position;
    out.world_normal = normalize((object.normal_matrix * vec4<f32>(input.normal, 0.0)).xyz);
    out.world_tangent = vec4<f32>(normalize((object.model * vec4<f32>(input.tangent.xyz, 0.0)).xyz), input.tangent.w);
    out.uv = input.uv * object.uv_transform.xy + object.uv_transform.zw;
    out.light_space_position = frame.light_space * world_position;
    return out;
}
"#;

pub const STANDARD_FRAGMENT_SHADER: &str = r#"
const PI: f32 = 3.14159265359;

fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let denom = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    return a2 / (PI * denom * denom);
}

fn geometry_schlick_ggx(n_dot_x: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = (r * r) / 8.0;
    return n_dot_x / (n_dot_x * (1.0 - k) + k);
}

fn fresnel_schlick(cos_theta: f32, f0: vec3<f32>) -> vec3<f32> {
    return f0 + (1.0 - f0) * pow(clamp(1.0 - cos_theta, 0.0, 1.0), 5.0);
}

fn fresnel_schlick_roughness(cos_theta: f32, f0: vec3<f32>, roughness: f32) -> vec3<f32> {
    return f0 + (max(vec3<f32>(1.0 - roughness), f0) - f0) * pow(clamp(1.0 - cos_theta, 0.0, 1.0), 5.0);
}

fn brdf(n: vec3<f32>, v: vec3<f32>, l: vec3<f32>, albedo: vec3<f32>, metallic: f32, roughness: f32, f0: vec3<f32>) -> vec3<f32> {
    let h = normalize(v + l);
    let n_dot_l = max(dot(n, l), 0.0);
    let n_dot_v = max(dot(n, v), 1e-4);
    let d = distribution_ggx(max(dot(n, h), 0.0), roughness);
    let g = geometry_schlick_ggx(n_dot_v, roughness) * geometry_schlick_ggx(n_dot_l, roughness);
    let f = fresnel_schlick(max(dot(h, v), 0.0), f0);
    let specular = d * g * f / max(4.0 * n_dot_v * n_dot_l, 1e-4);
    let kd = (vec3<f32>(1.0) - f) * (1.0 - metallic);
    return (kd * albedo / PI + specular) * n_dot_l;
}

fn shadow_factor(light_space_position: vec4<f32>, n_dot_l: f32) -> f32 {
    if frame.flags.y == 0u {
        return 1.0;
    }
    let ndc = light_space_position.xyz / light_space_position.w;
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0 || ndc.z > 1.0 {
        return 1.0;
    }
    let depth_bias = max(0.005 * (1.0 - n_dot_l), 0.0005);
    let texel = 1.0 / vec2<f32>(textureDimensions(shadow_map));
    var lit = 0.0;
    for (var x = -1; x <= 1; x = x + 1) {
        for (var y = -1; y <= 1; y = y + 1) {
            let texel_offset = vec2<f32>(f32(x), f32(y)) * texel;
            lit = lit + textureSampleCompareLevel(shadow_map, shadow_sampler, uv + texel_offset, ndc.z - depth_bias);
        }
    }
    return lit / 9.0;
}

fn sample_environment(direction: vec3<f32>) -> vec3<f32> {
    let d = normalize(direction);
    var uv = vec2<f32>(atan2(d.z, d.x) / (2.0 * PI) + 0.5, acos(clamp(d.y, -1.0, 1.0)) / PI);
    if frame.flags.w != 0u {
        uv.y = 1.0 - uv.y;
    }
    return textureSampleLevel(environment_map, environment_sampler, uv, 0.0).rgb;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    // Implicit-derivative samples stay ahead of any branching
    let albedo = textureSample(diffuse_map, material_sampler, input.uv).rgb;
    let combined = textureSample(metallic_roughness_map, material_sampler, input.uv);
    let metallic_sample = textureSample(metallic_map, material_sampler, input.uv).r;
    let roughness_sample = textureSample(roughness_map, material_sampler, input.uv).r;
    let ao = textureSample(ao_map, material_sampler, input.uv).r;
    let tangent_normal = textureSample(normal_map, material_sampler, input.uv).xyz * 2.0 - 1.0;

    var metallic = metallic_sample;
    var roughness = roughness_sample;
    if object.material_flags.x != 0u {
        metallic = combined.b;
        roughness = combined.g;
    }
    roughness = clamp(roughness, 0.04, 1.0);

    let geometric_normal = normalize(input.world_normal);
    let tangent = normalize(input.world_tangent.xyz - geometric_normal * dot(geometric_normal, input.world_tangent.xyz));
    let bitangent = cross(geometric_normal, tangent) * input.world_tangent.w;
    let n = normalize(mat3x3<f32>(tangent, bitangent, geometric_normal) * tangent_normal);
    let v = normalize(frame.camera_position.xyz - input.world_position);
    let n_dot_v = max(dot(n, v), 1e-4);
    let f0 = mix(vec3<f32>(0.04), albedo, vec3<f32>(metallic));

    var lo = vec3<f32>(0.0);
    if frame.main_light_direction.w > 0.5 {
        let l = normalize(-frame.main_light_direction.xyz);
        let shadow = shadow_factor(input.light_space_position, max(dot(n, l), 0.0));
        lo = lo + brdf(n, v, l, albedo, metallic, roughness, f0) * frame.main_light_color.rgb * shadow;
    }

    let count = min(frame.flags.x, 256u);
    for (var i = 0u; i < count; i = i + 1u) {
        let light = lights[i];
        let to_light = light.position - input.world_position;
        let light_distance = length(to_light);
        if light_distance > light.radius {
            continue;
        }
        let l = to_light / max(light_distance, 1e-4);
        let falloff = clamp(1.0 - light_distance / max(light.radius, 1e-4), 0.0, 1.0);
        let attenuation = falloff * falloff / (1.0 + light_distance * light_distance);
        lo = lo + brdf(n, v, l, albedo, metallic, roughness, f0) * light.color * light.intensity * attenuation;
    }

    var ambient = frame.params.x * albedo * ao;
    if frame.flags.z != 0u {
        let lut = textureSampleLevel(brdf_lut, environment_sampler, vec2<f32>(n_dot_v, roughness), 0.0).rg;
        let f = fresnel_schlick_roughness(n_dot_v, f0, roughness);
        let kd = (vec3<f32>(1.0) - f) * (1.0 - metallic);
        let irradiance = sample_environment(n);
        let specular = sample_environment(reflect(-v, n)) * (f * lut.x + lut.y) * frame.params.y;
        ambient = (kd * irradiance * albedo * frame.params.x + specular) * ao;
    }

    let hdr = (ambient + lo) * frame.params.z;
    return vec4<f32>(hdr / (hdr + vec3<f32>(1.0)), 1.0);
}
"#;

/// Fixed texture bindings of the material bind group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TextureSlot {
    Diffuse = 0,
    MetallicRoughness = 1,
    Ao = 2,
    Shadow = 3,
    Metallic = 4,
    Roughness = 5,
    Normal = 6,
    Environment = 7,
    BrdfLut = 8,
}

impl TextureSlot {
    pub const ALL: [TextureSlot; 9] = [
        TextureSlot::Diffuse,
        TextureSlot::MetallicRoughness,
        TextureSlot::Ao,
        TextureSlot::Shadow,
        TextureSlot::Metallic,
        TextureSlot::Roughness,
        TextureSlot::Normal,
        TextureSlot::Environment,
        TextureSlot::BrdfLut,
    ];

    pub fn binding(self) -> u32 {
        self as u32
    }

    fn sample_type(self) -> TextureSampleType {
        match self {
            TextureSlot::Shadow => TextureSampleType::Depth,
            TextureSlot::Environment | TextureSlot::BrdfLut => {
                TextureSampleType::Float { filterable: false }
            }
            _ => TextureSampleType::Float { filterable: true },
        }
    }
}

pub const MATERIAL_SAMPLER_BINDING: u32 = 9;
pub const SHADOW_SAMPLER_BINDING: u32 = 10;
pub const ENVIRONMENT_SAMPLER_BINDING: u32 = 11;

/// Per-frame uniforms, group 0 binding 1
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FrameUniforms {
    pub view: Mat4,
    pub projection: Mat4,
    pub light_space: Mat4,
    pub camera_position: Vec4,
    pub main_light_direction: Vec4,
    pub main_light_color: Vec4,
    pub params: Vec4,
    pub flags: [u32; 4],
}

/// Per-object uniforms, group 1 binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ObjectUniforms {
    pub model: Mat4,
    pub normal_matrix: Mat4,
    pub uv_transform: Vec4,
    pub material_flags: [u32; 4],
}

impl ObjectUniforms {
    pub fn new(model: Mat4, material: &Material) -> Self {
        let normal_matrix = if model.determinant().abs() > f32::EPSILON {
            model.inverse().transpose()
        } else {
            model
        };
        Self {
            model,
            normal_matrix,
            uv_transform: Vec4::new(
                material.uv_tiling.x,
                material.uv_tiling.y,
                material.uv_offset.x,
                material.uv_offset.y,
            ),
            material_flags: [material.use_combined_mr as u32, 0, 0, 0],
        }
    }
}

/// What the last frame did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub light_count: u32,
    pub shadow_pass: bool,
    pub skybox: bool,
    pub draw_calls: u32,
    /// MeshRenderers skipped because their shader program is unusable
    pub skipped: u32,
}

struct Layouts {
    frame: BindGroupLayoutHandle,
    object: BindGroupLayoutHandle,
    material: BindGroupLayoutHandle,
}

struct Samplers {
    material: SamplerHandle,
    shadow: SamplerHandle,
    environment: SamplerHandle,
}

struct DepthTarget {
    texture: TextureHandle,
    view: TextureViewHandle,
    width: u32,
    height: u32,
}

struct MaterialBinding {
    material: Rc<Material>,
    bind_group: BindGroupHandle,
}

struct CachedPipeline {
    program: Rc<ShaderProgram>,
    pipeline: Option<RenderPipelineHandle>,
}

struct DrawItem {
    pipeline: RenderPipelineHandle,
    material_bind_group: BindGroupHandle,
    gpu: MeshGpu,
}

/// Forward renderer for one [`GameObjectManager`]
///
/// Each frame: release buried GPU objects, upload lights and meshes, render
/// the shadow map, then clear the swapchain and draw the skybox followed by
/// every opaque MeshRenderer in list order.
pub struct Renderer {
    layouts: Layouts,
    samplers: Samplers,
    frame_buffer: BufferHandle,
    frame_bind_group: BindGroupHandle,
    lights: LightManager,
    shadow_pass: ShadowPass,
    skybox_pass: SkyboxPass,
    brdf_lut: BrdfLut,
    depth: Option<DepthTarget>,
    pipelines: HashMap<ShaderKey, CachedPipeline>,
    materials: HashMap<String, MaterialBinding>,
    bound_environment: Option<TextureViewHandle>,
    graveyard: ResourceGraveyard,
    stats: FrameStats,
}

impl Renderer {
    pub fn new<B: GraphicsBackend>(backend: &mut B, config: &RendererConfig) -> BackendResult<Self> {
        let frame_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::StorageBuffer { read_only: true },
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStageFlags::VERTEX_FRAGMENT,
                ty: BindingType::UniformBuffer,
            },
        ])?;
        let object_layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStageFlags::VERTEX_FRAGMENT,
            ty: BindingType::UniformBuffer,
        }])?;

        let mut material_entries: Vec<BindGroupLayoutEntry> = TextureSlot::ALL
            .iter()
            .map(|slot| BindGroupLayoutEntry {
                binding: slot.binding(),
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: slot.sample_type(),
                },
            })
            .collect();
        for (binding, kind) in [
            (MATERIAL_SAMPLER_BINDING, SamplerBindingKind::Filtering),
            (SHADOW_SAMPLER_BINDING, SamplerBindingKind::Comparison),
            (ENVIRONMENT_SAMPLER_BINDING, SamplerBindingKind::NonFiltering),
        ] {
            material_entries.push(BindGroupLayoutEntry {
                binding,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Sampler(kind),
            });
        }
        let material_layout = backend.create_bind_group_layout(&material_entries)?;

        let samplers = Samplers {
            material: backend.create_sampler(&SamplerDescriptor {
                label: Some("Material Sampler".into()),
                address_mode_u: AddressMode::Repeat,
                address_mode_v: AddressMode::Repeat,
                address_mode_w: AddressMode::Repeat,
                ..Default::default()
            })?,
            shadow: backend.create_sampler(&SamplerDescriptor {
                label: Some("Shadow Sampler".into()),
                mipmap_filter: FilterMode::Nearest,
                compare: Some(CompareFunction::LessEqual),
                ..Default::default()
            })?,
            environment: backend.create_sampler(&SamplerDescriptor {
                address_mode_u: AddressMode::Repeat,
                ..SamplerDescriptor::nearest("Environment Sampler")
            })?,
        };

        let mut lights = LightManager::new(MAX_LIGHTS);
        let light_buffer = lights.ensure_buffer(backend)?;
        let frame_buffer = backend.create_buffer(&BufferDescriptor {
            label: Some("Frame Uniforms".into()),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })?;
        let frame_bind_group = backend.create_bind_group(
            frame_layout,
            &[
                (
                    0,
                    BindGroupEntry::Buffer {
                        buffer: light_buffer,
                        offset: 0,
                        size: None,
                    },
                ),
                (
                    1,
                    BindGroupEntry::Buffer {
                        buffer: frame_buffer,
                        offset: 0,
                        size: None,
                    },
                ),
            ],
        )?;

        log::info!(
            "Renderer ready (shadow map {}, BRDF LUT {})",
            config.shadow_map_size,
            config.brdf_lut_size
        );

        Ok(Self {
            layouts: Layouts {
                frame: frame_layout,
                object: object_layout,
                material: material_layout,
            },
            samplers,
            frame_buffer,
            frame_bind_group,
            lights,
            shadow_pass: ShadowPass::new(config.shadow_map_size, object_layout),
            skybox_pass: SkyboxPass::new(),
            brdf_lut: BrdfLut::new(config.brdf_lut_size),
            depth: None,
            pipelines: HashMap::new(),
            materials: HashMap::new(),
            bound_environment: None,
            graveyard: ResourceGraveyard::new(),
            stats: FrameStats::default(),
        })
    }

    /// Statistics of the last completed frame
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn lights(&self) -> &LightManager {
        &self.lights
    }

    pub fn shadow_pass(&self) -> &ShadowPass {
        &self.shadow_pass
    }

    pub fn brdf_lut(&self) -> &BrdfLut {
        &self.brdf_lut
    }

    /// Force the BRDF LUT to be regenerated on the next frame that needs it
    pub fn invalidate_brdf_lut(&mut self) {
        self.brdf_lut.invalidate(&mut self.graveyard);
    }

    /// Render one frame and present it
    pub fn render<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        ctx: &mut EngineContext,
        scene: &Scene,
        objects: &mut GameObjectManager,
        camera: &Camera,
    ) -> EngineResult<FrameStats> {
        let mut released = objects.take_released();
        self.graveyard.append(&mut released);
        self.graveyard.release(backend);

        let frame = backend.begin_frame()?;
        let recorded = self.record_frame(backend, ctx, scene, objects, camera, frame);
        let presented = backend.end_frame();
        let stats = recorded?;
        presented?;

        log::trace!("Frame: {:?}", stats);
        self.stats = stats;
        Ok(stats)
    }

    fn record_frame<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        ctx: &mut EngineContext,
        scene: &Scene,
        objects: &mut GameObjectManager,
        camera: &Camera,
        frame: FrameContext,
    ) -> EngineResult<FrameStats> {
        let mut stats = FrameStats::default();
        let depth_view = self.ensure_depth(backend, frame.width, frame.height)?;

        stats.light_count = self.lights.upload(backend, objects, camera.position)?;
        self.prepare_meshes(backend, ctx, objects)?;

        let casters = shadow_casters(objects);
        self.shadow_pass
            .ensure_resources(backend, &mut ctx.shaders, &ctx.paths)?;
        stats.shadow_pass =
            self.shadow_pass
                .execute(backend, &mut ctx.shaders, &ctx.paths, objects, &casters)?;

        let environment = match scene.skybox_hdr_path.as_deref() {
            Some(path) if scene.has_skybox() => {
                let absolute = ctx.paths.to_absolute(path);
                ctx.textures.environment(backend, &absolute)?
            }
            _ => None,
        };
        let lut_view = match environment {
            Some(_) => Some(self.brdf_lut.ensure(backend, &mut ctx.shaders, &ctx.paths)?),
            None => None,
        };
        if let Some(env) = &environment {
            self.skybox_pass.prepare(
                backend,
                &mut ctx.shaders,
                &ctx.paths,
                env,
                self.samplers.environment,
                camera,
                scene,
            )?;
        }

        let environment_view = environment.as_ref().map(|e| e.view);
        if environment_view != self.bound_environment {
            for (_, binding) in self.materials.drain() {
                self.graveyard.bury(GpuResource::BindGroup(binding.bind_group));
            }
            self.bound_environment = environment_view;
        }

        self.write_frame_uniforms(backend, scene, objects, camera, &stats, environment.is_some());
        let draws = self.collect_draws(backend, ctx, objects, lut_view, &mut stats)?;

        let [r, g, b] = scene.skybox_color.to_array();
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Main Pass".into()),
            color_attachments: vec![ColorAttachment {
                view: frame.swapchain_view,
                load_op: LoadOp::Clear([r, g, b, 1.0]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: depth_view,
                depth_load_op: LoadOp::Clear([1.0, 0.0, 0.0, 0.0]),
                depth_store_op: StoreOp::Discard,
                depth_clear_value: 1.0,
            }),
        })?;
        backend.set_viewport(0.0, 0.0, frame.width as f32, frame.height as f32, 0.0, 1.0);

        if environment.is_some() {
            stats.skybox = self.skybox_pass.draw(backend);
        }

        for draw in &draws {
            backend.set_render_pipeline(draw.pipeline);
            backend.set_bind_group(0, self.frame_bind_group);
            backend.set_bind_group(1, draw.gpu.object_bind_group);
            backend.set_bind_group(2, draw.material_bind_group);
            backend.set_vertex_buffer(0, draw.gpu.vertex_buffer, 0);
            backend.set_index_buffer(draw.gpu.index_buffer, 0, IndexFormat::Uint32);
            backend.draw_indexed(0..draw.gpu.index_count, 0, 0..1);
            stats.draw_calls += 1;
        }

        backend.end_render_pass();
        Ok(stats)
    }

    fn ensure_depth<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> BackendResult<TextureViewHandle> {
        if let Some(depth) = &self.depth {
            if depth.width == width && depth.height == height {
                return Ok(depth.view);
            }
        }
        if let Some(old) = self.depth.take() {
            backend.destroy_texture_view(old.view);
            backend.destroy_texture(old.texture);
        }
        let texture = backend.create_texture(&TextureDescriptor {
            label: Some("Depth Buffer".into()),
            width,
            height,
            mip_levels: 1,
            format: TextureFormat::Depth32Float,
            usage: TextureUsage::RENDER_ATTACHMENT,
        })?;
        let view = backend.create_texture_view(texture)?;
        self.depth = Some(DepthTarget {
            texture,
            view,
            width,
            height,
        });
        Ok(view)
    }

    /// Upload meshes that changed and refresh every object's uniforms
    fn prepare_meshes<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        ctx: &mut EngineContext,
        objects: &mut GameObjectManager,
    ) -> EngineResult<()> {
        let targets: Vec<(ObjectId, Mat4)> = objects
            .iter()
            .filter(|o| o.has_component(ComponentKind::MeshRenderer))
            .filter_map(|o| Some((o.id(), objects.world_matrix(o.id())?)))
            .collect();

        for (id, model) in targets {
            let Some(renderer) = objects
                .get_mut(id)
                .and_then(|o| o.get_component_mut::<MeshRenderer>())
            else {
                continue;
            };

            if !renderer.is_current() {
                let resolved = renderer.mesh.and_then(|guid| {
                    ctx.meshes
                        .get(&ctx.assets, guid)
                        .filter(|m| m.vertex_count() > 0 && m.index_count() > 0)
                        .map(|mesh| (guid, mesh))
                });
                match resolved {
                    Some((guid, mesh)) => {
                        let gpu = self.upload_mesh(backend, guid, &mesh)?;
                        renderer.set_gpu(gpu, &mut self.graveyard);
                    }
                    None => {
                        renderer.release_gpu(&mut self.graveyard);
                        continue;
                    }
                }
            }

            let Some(gpu) = renderer.gpu().copied() else {
                continue;
            };
            let material = ctx.materials.get(&ctx.assets, renderer.material);
            let uniforms = ObjectUniforms::new(model, &material);
            backend.write_buffer(gpu.object_buffer, 0, bytemuck::bytes_of(&uniforms));
        }
        Ok(())
    }

    fn upload_mesh<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        guid: Uuid,
        mesh: &Mesh,
    ) -> BackendResult<MeshGpu> {
        let vertex_bytes = mesh.vertex_bytes();
        let index_bytes = mesh.index_bytes();
        let vertex_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} Vertices", mesh.name)),
                size: vertex_bytes.len() as u64,
                usage: BufferUsage::VERTEX,
            },
            vertex_bytes,
        )?;
        let index_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} Indices", mesh.name)),
                size: index_bytes.len() as u64,
                usage: BufferUsage::INDEX,
            },
            index_bytes,
        )?;
        let object_buffer = backend.create_buffer(&BufferDescriptor {
            label: Some(format!("{} Object Uniforms", mesh.name)),
            size: std::mem::size_of::<ObjectUniforms>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })?;
        let object_bind_group = backend.create_bind_group(
            self.layouts.object,
            &[(
                0,
                BindGroupEntry::Buffer {
                    buffer: object_buffer,
                    offset: 0,
                    size: None,
                },
            )],
        )?;
        log::debug!(
            "Uploaded mesh {} ({} vertices, {} indices)",
            mesh.name,
            mesh.vertex_count(),
            mesh.index_count()
        );

        Ok(MeshGpu {
            mesh: guid,
            vertex_buffer,
            index_buffer,
            vertex_count: mesh.vertex_count() as u32,
            index_count: mesh.index_count() as u32,
            object_buffer,
            object_bind_group,
        })
    }

    fn write_frame_uniforms<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        scene: &Scene,
        objects: &GameObjectManager,
        camera: &Camera,
        stats: &FrameStats,
        ibl: bool,
    ) {
        let (main_light_direction, main_light_color) = match objects.directional_lights().first() {
            Some((id, light)) => {
                let direction = Light::direction(objects.world_rotation(*id).unwrap_or_default());
                let color = light.color * (light.intensity / 100.0);
                (direction.extend(1.0), color.extend(1.0))
            }
            None => (Vec4::new(0.0, -1.0, 0.0, 0.0), Vec4::ZERO),
        };

        let uniforms = FrameUniforms {
            view: camera.view_matrix(),
            projection: camera.projection_matrix(),
            light_space: self.shadow_pass.light_space(),
            camera_position: camera.position.extend(1.0),
            main_light_direction,
            main_light_color,
            params: Vec4::new(
                scene.ambient_intensity,
                scene.ibl_specular_intensity,
                scene.exposure,
                0.0,
            ),
            flags: [
                stats.light_count,
                stats.shadow_pass as u32,
                ibl as u32,
                scene.flip_v as u32,
            ],
        };
        backend.write_buffer(self.frame_buffer, 0, bytemuck::bytes_of(&uniforms));
    }

    fn collect_draws<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        ctx: &mut EngineContext,
        objects: &GameObjectManager,
        lut_view: Option<TextureViewHandle>,
        stats: &mut FrameStats,
    ) -> EngineResult<Vec<DrawItem>> {
        let mut draws = Vec::new();
        for object in objects.iter() {
            let Some(renderer) = object.get_component::<MeshRenderer>() else {
                continue;
            };
            let Some(gpu) = renderer.gpu().copied().filter(|g| g.vertex_count > 0) else {
                continue;
            };

            let program = ctx
                .shaders
                .get(&ctx.paths, &renderer.vertex_shader, &renderer.fragment_shader);
            let Some(pipeline) = self.pipeline_for(backend, program) else {
                stats.skipped += 1;
                continue;
            };

            let material = ctx.materials.get(&ctx.assets, renderer.material);
            let material_bind_group = self.material_bind_group(backend, ctx, &material, lut_view)?;
            draws.push(DrawItem {
                pipeline,
                material_bind_group,
                gpu,
            });
        }
        Ok(draws)
    }

    /// Pipeline for a program, `None` when it cannot be used
    fn pipeline_for<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        program: Rc<ShaderProgram>,
    ) -> Option<RenderPipelineHandle> {
        if let Some(cached) = self.pipelines.get(&program.key) {
            if Rc::ptr_eq(&cached.program, &program) {
                return cached.pipeline;
            }
        }
        if let Some(pipeline) = self.pipelines.remove(&program.key).and_then(|c| c.pipeline) {
            self.graveyard.bury(GpuResource::Pipeline(pipeline));
        }

        let pipeline = if program.is_usable() {
            backend
                .create_render_pipeline(&RenderPipelineDescriptor {
                    label: Some(program.label()),
                    shader: program.source.clone(),
                    has_fragment: true,
                    vertex_layouts: vec![Vertex::layout()],
                    bind_group_layouts: vec![
                        self.layouts.frame,
                        self.layouts.object,
                        self.layouts.material,
                    ],
                    cull_mode: CullMode::Back,
                    depth_stencil: Some(DepthStencilState {
                        format: TextureFormat::Depth32Float,
                        depth_write_enabled: true,
                        depth_compare: CompareFunction::Less,
                        bias: DepthBias::default(),
                    }),
                    color_targets: vec![backend.swapchain_format()],
                })
                .map_err(|e| log::error!("Pipeline for {} unavailable: {}", program.label(), e))
                .ok()
        } else {
            None
        };

        self.pipelines.insert(
            program.key.clone(),
            CachedPipeline {
                program,
                pipeline,
            },
        );
        pipeline
    }

    fn material_bind_group<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        ctx: &mut EngineContext,
        material: &Rc<Material>,
        lut_view: Option<TextureViewHandle>,
    ) -> EngineResult<BindGroupHandle> {
        let key = material.cache_key();
        if let Some(binding) = self.materials.get(&key) {
            if Rc::ptr_eq(&binding.material, material) {
                return Ok(binding.bind_group);
            }
        }
        if let Some(stale) = self.materials.remove(&key) {
            self.graveyard.bury(GpuResource::BindGroup(stale.bind_group));
        }

        let paths = &ctx.paths;
        let textures = &mut ctx.textures;
        let resolve = |reference: &Option<String>| reference.as_deref().map(|r| paths.to_absolute(r));
        let spaces = material.color_spaces;

        let diffuse = textures.get_or(
            backend,
            resolve(&material.diffuse_tex).as_deref(),
            spaces.diffuse,
            BuiltinTexture::White,
        )?;
        let metallic_roughness = textures.get_or(
            backend,
            resolve(&material.metallic_roughness_tex).as_deref(),
            spaces.metallic_roughness,
            BuiltinTexture::Grey,
        )?;
        let ao = textures.get_or(
            backend,
            resolve(&material.ao_tex).as_deref(),
            spaces.ao,
            BuiltinTexture::White,
        )?;
        let metallic = textures.get_or(
            backend,
            resolve(&material.metallic_tex).as_deref(),
            ColorSpace::Linear,
            BuiltinTexture::Black,
        )?;
        let roughness = textures.get_or(
            backend,
            resolve(&material.roughness_tex).as_deref(),
            ColorSpace::Linear,
            BuiltinTexture::Grey,
        )?;
        let normal = textures.get_or(
            backend,
            resolve(&material.normal_tex).as_deref(),
            spaces.normal,
            BuiltinTexture::FlatNormal,
        )?;
        let black = textures.builtin(backend, BuiltinTexture::Black)?;

        let shadow_view = self
            .shadow_pass
            .depth_view()
            .ok_or_else(|| EngineError::Backend(BackendError::TextureCreationFailed(
                "shadow map not created".into(),
            )))?;

        let slot_views = [
            (TextureSlot::Diffuse, diffuse.view),
            (TextureSlot::MetallicRoughness, metallic_roughness.view),
            (TextureSlot::Ao, ao.view),
            (TextureSlot::Shadow, shadow_view),
            (TextureSlot::Metallic, metallic.view),
            (TextureSlot::Roughness, roughness.view),
            (TextureSlot::Normal, normal.view),
            (
                TextureSlot::Environment,
                self.bound_environment.unwrap_or(black.view),
            ),
            (TextureSlot::BrdfLut, lut_view.unwrap_or(black.view)),
        ];
        let mut entries: Vec<(u32, BindGroupEntry)> = slot_views
            .iter()
            .map(|(slot, view)| (slot.binding(), BindGroupEntry::Texture(*view)))
            .collect();
        entries.push((
            MATERIAL_SAMPLER_BINDING,
            BindGroupEntry::Sampler(self.samplers.material),
        ));
        entries.push((
            SHADOW_SAMPLER_BINDING,
            BindGroupEntry::Sampler(self.samplers.shadow),
        ));
        entries.push((
            ENVIRONMENT_SAMPLER_BINDING,
            BindGroupEntry::Sampler(self.samplers.environment),
        ));

        let bind_group = backend.create_bind_group(self.layouts.material, &entries)?;
        log::debug!("Bound material {}", key);
        self.materials.insert(
            key,
            MaterialBinding {
                material: material.clone(),
                bind_group,
            },
        );
        Ok(bind_group)
    }

    /// Destroy every GPU object the renderer owns, including mesh buffers
    /// still held by `objects`
    pub fn dispose<B: GraphicsBackend>(&mut self, backend: &mut B, objects: &mut GameObjectManager) {
        for object in objects.iter_mut() {
            if let Some(renderer) = object.get_component_mut::<MeshRenderer>() {
                renderer.release_gpu(&mut self.graveyard);
            }
        }
        let mut released = objects.take_released();
        self.graveyard.append(&mut released);

        for (_, binding) in self.materials.drain() {
            self.graveyard.bury(GpuResource::BindGroup(binding.bind_group));
        }
        for (_, cached) in self.pipelines.drain() {
            if let Some(pipeline) = cached.pipeline {
                self.graveyard.bury(GpuResource::Pipeline(pipeline));
            }
        }
        if let Some(depth) = self.depth.take() {
            self.graveyard.bury(GpuResource::TextureView(depth.view));
            self.graveyard.bury(GpuResource::Texture(depth.texture));
        }
        self.shadow_pass.dispose(&mut self.graveyard);
        self.skybox_pass.dispose(&mut self.graveyard);
        self.brdf_lut.dispose(&mut self.graveyard);
        self.lights.dispose(&mut self.graveyard);

        for resource in [
            GpuResource::BindGroup(self.frame_bind_group),
            GpuResource::Buffer(self.frame_buffer),
            GpuResource::Sampler(self.samplers.material),
            GpuResource::Sampler(self.samplers.shadow),
            GpuResource::Sampler(self.samplers.environment),
            GpuResource::BindGroupLayout(self.layouts.frame),
            GpuResource::BindGroupLayout(self.layouts.object),
            GpuResource::BindGroupLayout(self.layouts.material),
        ] {
            self.graveyard.bury(resource);
        }
        self.bound_environment = None;
        self.graveyard.release(backend);
        log::debug!("Renderer disposed");
    }
}

fn shadow_casters(objects: &GameObjectManager) -> Vec<ShadowCaster> {
    objects
        .iter()
        .filter_map(|o| o.get_component::<MeshRenderer>()?.gpu().copied())
        .filter(|gpu| gpu.vertex_count > 0)
        .map(|gpu| ShadowCaster {
            vertex_buffer: gpu.vertex_buffer,
            index_buffer: gpu.index_buffer,
            index_count: gpu.index_count,
            object_bind_group: gpu.object_bind_group,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    #[test]
    fn uniform_layouts_match_wgsl() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 272);
        assert_eq!(std::mem::size_of::<ObjectUniforms>(), 160);
    }

    #[test]
    fn texture_slots_are_fixed() {
        let bindings: Vec<u32> = TextureSlot::ALL.iter().map(|s| s.binding()).collect();
        assert_eq!(bindings, (0..9).collect::<Vec<_>>());
        assert_eq!(TextureSlot::Shadow.sample_type(), TextureSampleType::Depth);
    }

    #[test]
    fn object_uniforms_carry_uv_transform() {
        let material = Material {
            uv_tiling: glam::Vec2::new(2.0, 3.0),
            uv_offset: glam::Vec2::new(0.5, 0.25),
            use_combined_mr: true,
            ..Default::default()
        };
        let u = ObjectUniforms::new(Mat4::from_scale(glam::Vec3::splat(2.0)), &material);
        assert_eq!(u.uv_transform, Vec4::new(2.0, 3.0, 0.5, 0.25));
        assert_eq!(u.material_flags[0], 1);
        assert!((u.normal_matrix.x_axis.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn empty_scene_clears_and_presents() {
        let mut backend = HeadlessBackend::new(64, 48);
        let mut renderer = Renderer::new(&mut backend, &RendererConfig::default()).unwrap();
        let mut ctx = EngineContext::without_project(".");
        let mut objects = GameObjectManager::new();

        let stats = renderer
            .render(&mut backend, &mut ctx, &Scene::default(), &mut objects, &Camera::default())
            .unwrap();
        assert_eq!(stats, FrameStats::default());
        assert_eq!(backend.render_pass_labels(), vec!["Main Pass".to_string()]);
        assert_eq!(backend.frames_presented(), 1);
    }
}
