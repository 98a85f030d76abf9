//! Split-sum BRDF integration lookup table

use crate::assets::ProjectPaths;
use crate::backend::*;
use crate::render::graveyard::{GpuResource, ResourceGraveyard};
use crate::resources::ShaderManager;

pub const BRDF_LUT_VERTEX_SHADER_PATH: &str = "builtin:brdf_lut.vert";
pub const BRDF_LUT_FRAGMENT_SHADER_PATH: &str = "builtin:brdf_lut.frag";

pub const BRDF_LUT_VERTEX_SHADER: &str = r#"
struct LutOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

// Fullscreen triangle from the vertex index, no buffers bound
@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> LutOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: LutOutput;
    out.clip_position = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}
"#;

pub const BRDF_LUT_FRAGMENT_SHADER: &str = r#"
const LUT_PI: f32 = 3.14159265359;
const SAMPLE_COUNT: u32 = 256u;

fn radical_inverse_vdc(input: u32) -> f32 {
    var bits = input;
    bits = (bits << 16u) | (bits >> 16u);
    bits = ((bits & 0x55555555u) << 1u) | ((bits & 0xAAAAAAAAu) >> 1u);
    bits = ((bits & 0x33333333u) << 2u) | ((bits & 0xCCCCCCCCu) >> 2u);
    bits = ((bits & 0x0F0F0F0Fu) << 4u) | ((bits & 0xF0F0F0F0u) >> 4u);
    bits = ((bits & 0x00FF00FFu) << 8u) | ((bits & 0xFF00FF00u) >> 8u);
    return f32(bits) * 2.3283064365386963e-10;
}

fn hammersley(i: u32, n: u32) -> vec2<f32> {
    return vec2<f32>(f32(i) / f32(n), radical_inverse_vdc(i));
}

// Half vector in tangent space, normal along +Z
fn importance_sample_ggx(xi: vec2<f32>, roughness: f32) -> vec3<f32> {
    let a = roughness * roughness;
    let phi = 2.0 * LUT_PI * xi.x;
    let cos_theta = sqrt((1.0 - xi.y) / (1.0 + (a * a - 1.0) * xi.y));
    let sin_theta = sqrt(1.0 - cos_theta * cos_theta);
    return vec3<f32>(cos(phi) * sin_theta, sin(phi) * sin_theta, cos_theta);
}

fn geometry_schlick_ggx_ibl(n_dot_v: f32, roughness: f32) -> f32 {
    let k = (roughness * roughness) / 2.0;
    return n_dot_v / (n_dot_v * (1.0 - k) + k);
}

@fragment
fn fs_main(input: LutOutput) -> @location(0) vec4<f32> {
    let n_dot_v = max(input.uv.x, 1e-4);
    let roughness = input.uv.y;
    let v = vec3<f32>(sqrt(1.0 - n_dot_v * n_dot_v), 0.0, n_dot_v);

    var scale_sum = 0.0;
    var bias_sum = 0.0;
    for (var i = 0u; i < SAMPLE_COUNT; i = i + 1u) {
        let h = importance_sample_ggx(hammersley(i, SAMPLE_COUNT), roughness);
        let l = normalize(2.0 * dot(v, h) * h - v);
        let n_dot_l = max(l.z, 0.0);
        let n_dot_h = max(h.z, 1e-4);
        let v_dot_h = max(dot(v, h), 0.0);
        if n_dot_l > 0.0 {
            let g = geometry_schlick_ggx_ibl(n_dot_v, roughness) * geometry_schlick_ggx_ibl(n_dot_l, roughness);
            let g_vis = (g * v_dot_h) / (n_dot_h * n_dot_v);
            let fc = pow(1.0 - v_dot_h, 5.0);
            scale_sum = scale_sum + (1.0 - fc) * g_vis;
            bias_sum = bias_sum + fc * g_vis;
        }
    }
    return vec4<f32>(scale_sum / f32(SAMPLE_COUNT), bias_sum / f32(SAMPLE_COUNT), 0.0, 1.0);
}
"#;

/// Generated once on demand and reused until invalidated
pub struct BrdfLut {
    size: u32,
    texture: Option<(TextureHandle, TextureViewHandle)>,
    pipeline: Option<RenderPipelineHandle>,
    generations: u32,
}

impl BrdfLut {
    pub fn new(size: u32) -> Self {
        Self {
            size: size.max(1),
            texture: None,
            pipeline: None,
            generations: 0,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn view(&self) -> Option<TextureViewHandle> {
        self.texture.map(|(_, view)| view)
    }

    /// Number of times the table has been rendered
    pub fn generations(&self) -> u32 {
        self.generations
    }

    /// The LUT view, rendering it first if needed. Must be called inside a
    /// frame and outside any render pass.
    pub fn ensure<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        shaders: &mut ShaderManager,
        paths: &ProjectPaths,
    ) -> BackendResult<TextureViewHandle> {
        if let Some((_, view)) = self.texture {
            return Ok(view);
        }

        let texture = backend.create_texture(&TextureDescriptor {
            label: Some("BRDF LUT".into()),
            width: self.size,
            height: self.size,
            mip_levels: 1,
            format: TextureFormat::Rgba16Float,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        })?;
        let view = backend.create_texture_view(texture)?;
        self.texture = Some((texture, view));

        if self.pipeline.is_none() {
            let program = shaders.get(paths, BRDF_LUT_VERTEX_SHADER_PATH, BRDF_LUT_FRAGMENT_SHADER_PATH);
            if program.is_usable() {
                self.pipeline = backend
                    .create_render_pipeline(&RenderPipelineDescriptor {
                        label: Some("BRDF LUT Pipeline".into()),
                        shader: program.source.clone(),
                        has_fragment: true,
                        vertex_layouts: vec![],
                        bind_group_layouts: vec![],
                        cull_mode: CullMode::None,
                        depth_stencil: None,
                        color_targets: vec![TextureFormat::Rgba16Float],
                    })
                    .map_err(|e| log::error!("BRDF LUT pipeline unavailable: {}", e))
                    .ok();
            }
        }

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("BRDF LUT".into()),
            color_attachments: vec![ColorAttachment {
                view,
                load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        })?;
        backend.set_viewport(0.0, 0.0, self.size as f32, self.size as f32, 0.0, 1.0);
        if let Some(pipeline) = self.pipeline {
            backend.set_render_pipeline(pipeline);
            backend.draw(0..3, 0..1);
        }
        backend.end_render_pass();

        self.generations += 1;
        log::debug!("Generated {}x{} BRDF LUT", self.size, self.size);
        Ok(view)
    }

    /// Drop the table so the next [`ensure`](Self::ensure) regenerates it
    pub fn invalidate(&mut self, graveyard: &mut ResourceGraveyard) {
        if let Some((texture, view)) = self.texture.take() {
            graveyard.bury(GpuResource::TextureView(view));
            graveyard.bury(GpuResource::Texture(texture));
        }
    }

    pub fn dispose(&mut self, graveyard: &mut ResourceGraveyard) {
        self.invalidate(graveyard);
        if let Some(pipeline) = self.pipeline.take() {
            graveyard.bury(GpuResource::Pipeline(pipeline));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    #[test]
    fn generated_once_until_invalidated() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut shaders = ShaderManager::new();
        let paths = ProjectPaths::rooted_at(".");
        let mut lut = BrdfLut::new(256);

        backend.begin_frame().unwrap();
        let view = lut.ensure(&mut backend, &mut shaders, &paths).unwrap();
        assert_eq!(lut.ensure(&mut backend, &mut shaders, &paths).unwrap(), view);
        assert_eq!(lut.generations(), 1);
        assert_eq!(backend.render_pass_labels(), vec!["BRDF LUT".to_string()]);

        let desc = backend.view_descriptor(view).unwrap();
        assert_eq!((desc.width, desc.height), (256, 256));
        assert_eq!(desc.format, TextureFormat::Rgba16Float);

        let mut graveyard = ResourceGraveyard::new();
        lut.invalidate(&mut graveyard);
        graveyard.release(&mut backend);
        lut.ensure(&mut backend, &mut shaders, &paths).unwrap();
        assert_eq!(lut.generations(), 2);
        assert_eq!(backend.draw_count(), 2);
    }
}
