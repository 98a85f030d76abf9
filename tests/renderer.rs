//! Frame-level behavior of the renderer, recorded through the headless backend

use glam::{Mat4, Quat, Vec3};
use sceneforge::backend::{BindGroupEntry, GraphicsBackend, RecordedCommand, StoreOp};
use sceneforge::render::{FrameStats, TextureSlot};
use sceneforge::resources::BUILTIN_CUBE_GUID;
use sceneforge::scene::{Camera, GpuLight, Light, MeshRenderer};
use sceneforge::{
    EngineContext, GameObjectManager, HeadlessBackend, ObjectId, Renderer, RendererConfig, Scene,
};
use uuid::Uuid;

struct Harness {
    backend: HeadlessBackend,
    renderer: Renderer,
    ctx: EngineContext,
    scene: Scene,
    objects: GameObjectManager,
    camera: Camera,
}

impl Harness {
    fn new() -> Self {
        Self::rooted_at(std::env::temp_dir())
    }

    fn rooted_at(root: impl Into<std::path::PathBuf>) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut backend = HeadlessBackend::new(64, 48);
        let config = RendererConfig {
            shadow_map_size: 256,
            brdf_lut_size: 32,
        };
        let renderer = Renderer::new(&mut backend, &config).unwrap();
        Self {
            backend,
            renderer,
            ctx: EngineContext::without_project(root),
            scene: Scene::default(),
            objects: GameObjectManager::new(),
            camera: Camera::default(),
        }
    }

    fn add_sun(&mut self) -> ObjectId {
        let id = self
            .objects
            .create_light("Sun", Light::directional(Vec3::ONE, 100.0));
        self.objects.get_mut(id).unwrap().transform.local_rotation =
            Quat::from_rotation_x(-std::f32::consts::FRAC_PI_3);
        id
    }

    fn frame(&mut self) -> FrameStats {
        self.backend.clear_commands();
        self.renderer
            .render(
                &mut self.backend,
                &mut self.ctx,
                &self.scene,
                &mut self.objects,
                &self.camera,
            )
            .unwrap()
    }

    fn material_bind_group_entries(&self) -> Vec<(u32, BindGroupEntry)> {
        let group = self
            .backend
            .commands()
            .iter()
            .find_map(|c| match c {
                RecordedCommand::SetBindGroup { index: 2, bind_group } => Some(*bind_group),
                _ => None,
            })
            .expect("material bind group bound");
        self.backend.bind_group_entries(group).unwrap().to_vec()
    }
}

#[test]
fn shadow_pass_runs_before_main_pass() {
    let mut h = Harness::new();
    h.objects.create_cube();
    h.add_sun();

    let stats = h.frame();
    assert!(stats.shadow_pass);
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(
        h.backend.render_pass_labels(),
        vec!["Shadow Pass".to_string(), "Main Pass".to_string()]
    );
    // one caster into the shadow map, one opaque draw
    assert_eq!(h.backend.draw_count(), 2);

    // the shadow map is sampled later; the main depth buffer is not
    let stores: Vec<_> = h
        .backend
        .commands()
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::BeginRenderPass { depth_store, .. } => Some(*depth_store),
            _ => None,
        })
        .collect();
    assert_eq!(stores, vec![Some(StoreOp::Store), Some(StoreOp::Discard)]);
}

#[test]
fn no_directional_light_means_no_shadow_pass() {
    let mut h = Harness::new();
    h.objects.create_cube();
    h.objects.create_light("Lamp", Light::point(Vec3::ONE, 100.0, 5.0));

    let stats = h.frame();
    assert!(!stats.shadow_pass);
    assert_eq!(h.backend.render_pass_labels(), vec!["Main Pass".to_string()]);
    assert_eq!(stats.light_count, 1);
}

#[test]
fn light_buffer_holds_every_light() {
    let mut h = Harness::new();
    let specs = [
        (Vec3::new(1.0, 0.0, 0.0), 50.0, 3.0, Vec3::new(0.0, 2.0, 0.0)),
        (Vec3::new(0.0, 1.0, 0.0), 100.0, 4.0, Vec3::new(-1.0, 1.0, 2.0)),
        (Vec3::new(0.0, 0.0, 1.0), 250.0, 8.0, Vec3::new(3.0, 0.5, -1.0)),
    ];
    for (color, intensity, radius, position) in specs {
        let id = h.objects.create_light("Lamp", Light::point(color, intensity, radius));
        h.objects.get_mut(id).unwrap().transform.local_position = position;
    }

    assert_eq!(h.frame().light_count, 3);
    let buffer = h.renderer.lights().buffer().unwrap();
    let records: &[GpuLight] = bytemuck::cast_slice(h.backend.buffer_data(buffer).unwrap());
    for (record, (color, intensity, radius, position)) in records.iter().zip(specs) {
        assert_eq!(record.position, position.to_array());
        assert_eq!(record.color, color.to_array());
        assert_eq!(record.intensity, intensity / 100.0);
        assert_eq!(record.radius, radius);
    }
}

#[test]
fn object_uniforms_follow_the_hierarchy() {
    let mut h = Harness::new();
    let parent = h.objects.create_game_object("Parent");
    h.objects.get_mut(parent).unwrap().transform.local_position = Vec3::new(0.0, 2.0, 0.0);
    let cube = h.objects.create_cube();
    h.objects.get_mut(cube).unwrap().transform.local_position = Vec3::new(1.0, 0.0, 0.0);
    h.objects.set_parent(cube, Some(parent)).unwrap();

    h.frame();
    let gpu = *h
        .objects
        .get(cube)
        .unwrap()
        .get_component::<MeshRenderer>()
        .unwrap()
        .gpu()
        .unwrap();
    let data = h.backend.buffer_data(gpu.object_buffer).unwrap();
    let model: Mat4 = bytemuck::pod_read_unaligned(&data[..64]);
    assert!(model.abs_diff_eq(Mat4::from_translation(Vec3::new(1.0, 2.0, 0.0)), 1e-6));
}

#[test]
fn material_group_uses_fixed_slots() {
    let mut h = Harness::new();
    h.objects.create_cube();
    h.add_sun();
    h.frame();

    let entries = h.material_bind_group_entries();
    assert_eq!(entries.len(), 12);
    let shadow_view = h.renderer.shadow_pass().depth_view().unwrap();
    let slot = entries
        .iter()
        .find(|(binding, _)| *binding == TextureSlot::Shadow.binding())
        .unwrap();
    assert!(matches!(slot.1, BindGroupEntry::Texture(view) if view == shadow_view));
}

#[test]
fn unknown_material_and_broken_shader_do_not_stop_the_frame() {
    let mut h = Harness::new();
    let good = h.objects.create_game_object("Good");
    h.objects
        .add_component(good, MeshRenderer::new(BUILTIN_CUBE_GUID, Some(Uuid::new_v4())));
    let broken = h.objects.create_game_object("Broken");
    h.objects.add_component(
        broken,
        MeshRenderer::cube().with_shaders("builtin:missing.vert", "builtin:standard.frag"),
    );

    let stats = h.frame();
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(h.backend.frames_presented(), 1);
}

#[test]
fn unresolved_mesh_is_skipped() {
    let mut h = Harness::new();
    let id = h.objects.create_game_object("Ghost");
    h.objects
        .add_component(id, MeshRenderer::new(Uuid::new_v4(), None));

    let stats = h.frame();
    assert_eq!(stats.draw_calls, 0);
    assert_eq!(
        h.objects
            .get(id)
            .unwrap()
            .get_component::<MeshRenderer>()
            .unwrap()
            .vertex_count(),
        0
    );
}

#[test]
fn removed_objects_release_their_buffers_next_frame() {
    let mut h = Harness::new();
    let cube = h.objects.create_cube();
    h.frame();
    let with_cube = h.backend.live_buffer_count();

    assert!(h.objects.remove_game_object(cube));
    h.frame();
    // vertex, index and object uniform buffers
    assert_eq!(h.backend.live_buffer_count(), with_cube - 3);
}

#[test]
fn environment_map_draws_skybox_and_builds_lut_once() {
    let dir = tempfile::tempdir().unwrap();
    image::RgbaImage::from_pixel(8, 4, image::Rgba([200, 180, 255, 255]))
        .save(dir.path().join("sky.png"))
        .unwrap();

    let mut h = Harness::rooted_at(dir.path());
    h.scene.skybox_hdr_path = Some("sky.png".into());
    h.objects.create_cube();

    let first = h.frame();
    assert!(first.skybox);
    assert_eq!(
        h.backend.render_pass_labels(),
        vec!["BRDF LUT".to_string(), "Main Pass".to_string()]
    );
    assert!(h.backend.commands().contains(&RecordedCommand::Draw {
        vertices: 0..36,
        instances: 0..1
    }));

    let second = h.frame();
    assert!(second.skybox);
    assert_eq!(h.backend.render_pass_labels(), vec!["Main Pass".to_string()]);
    assert_eq!(h.renderer.brdf_lut().generations(), 1);

    let entries = h.material_bind_group_entries();
    let lut_view = h.renderer.brdf_lut().view().unwrap();
    assert!(entries.iter().any(|(binding, entry)| {
        *binding == TextureSlot::BrdfLut.binding()
            && matches!(entry, BindGroupEntry::Texture(view) if *view == lut_view)
    }));
}

#[test]
fn missing_environment_falls_back_to_clear_color() {
    let mut h = Harness::new();
    h.scene.skybox_hdr_path = Some("does/not/exist.hdr".into());

    let stats = h.frame();
    assert!(!stats.skybox);
    assert!(h.renderer.brdf_lut().view().is_none());
    assert_eq!(h.backend.render_pass_labels(), vec!["Main Pass".to_string()]);
}

#[test]
fn depth_target_follows_surface_size() {
    let mut h = Harness::new();
    h.frame();
    h.backend.resize(128, 96);
    h.frame();

    let depth = h
        .backend
        .commands()
        .iter()
        .find_map(|c| match c {
            RecordedCommand::BeginRenderPass { label, depth, .. }
                if label.as_deref() == Some("Main Pass") =>
            {
                *depth
            }
            _ => None,
        })
        .unwrap();
    let desc = h.backend.view_descriptor(depth).unwrap();
    assert_eq!((desc.width, desc.height), (128, 96));
}

#[test]
fn dispose_releases_every_gpu_object() {
    let dir = tempfile::tempdir().unwrap();
    image::RgbaImage::from_pixel(4, 2, image::Rgba([10, 20, 30, 255]))
        .save(dir.path().join("sky.png"))
        .unwrap();
    let mut h = Harness::rooted_at(dir.path());
    h.scene.skybox_hdr_path = Some("sky.png".into());
    h.objects.create_cube();
    h.add_sun();
    h.frame();

    h.renderer.dispose(&mut h.backend, &mut h.objects);
    h.ctx.dispose(&mut h.backend);
    assert_eq!(h.backend.live_buffer_count(), 0);
    assert_eq!(h.backend.live_texture_count(), 0);
    assert_eq!(h.backend.live_bind_group_count(), 0);
    assert_eq!(h.backend.live_pipeline_count(), 0);
}
