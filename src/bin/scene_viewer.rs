//! Scene viewer: opens a project (or a built-in demo scene) and renders it

use clap::Parser;
use glam::{Quat, Vec3};
use sceneforge::scene::{scene_file, Camera, Light};
use sceneforge::{
    init_logging, EngineConfig, EngineContext, EngineError, GameObjectManager, GraphicsBackend,
    Renderer, Scene, WgpuBackend,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, Event, KeyEvent, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
    window::WindowBuilder,
};

/// Render a sceneforge project or scene file in a window
#[derive(Parser, Debug)]
#[command(name = "scene-viewer", version, about)]
struct Args {
    /// Project file (`*.project.json`); its start scene is loaded
    #[arg(long)]
    project: Option<PathBuf>,
    /// Scene file to load instead of the project's start scene
    #[arg(long)]
    scene: Option<PathBuf>,
    /// Engine config (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Cube on the origin lit by one directional light
fn demo_scene() -> (Scene, GameObjectManager) {
    let mut objects = GameObjectManager::new();
    objects.create_cube();
    let sun = objects.create_light("Sun", Light::directional(Vec3::new(1.0, 0.96, 0.9), 300.0));
    objects.modify(sun, |o| {
        o.transform.local_rotation = Quat::from_euler(glam::EulerRot::XYZ, -0.9, 0.5, 0.0);
    });
    (Scene::default(), objects)
}

fn load(args: &Args) -> Result<(EngineContext, Scene, GameObjectManager), EngineError> {
    let cwd = std::env::current_dir()?;
    let (ctx, start_scene) = match &args.project {
        Some(path) => {
            let (ctx, file) = EngineContext::open_project(path)?;
            let start = ctx.paths.start_scene(&file);
            (ctx, start)
        }
        None => (EngineContext::without_project(cwd), None),
    };

    let (scene, objects) = match args.scene.clone().or(start_scene) {
        Some(path) => {
            let loaded = scene_file::load_scene(&path)?;
            log::info!("Loaded scene {} ({} objects)", path.display(), loaded.1.len());
            loaded
        }
        None => {
            log::info!("No scene given, showing the demo scene");
            demo_scene()
        }
    };
    Ok((ctx, scene, objects))
}

/// Camera orbiting the origin, driven by the arrow keys
struct Orbit {
    yaw: f32,
    pitch: f32,
    distance: f32,
}

impl Orbit {
    fn apply(&self, camera: &mut Camera) {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        camera.position = camera.target + Vec3::new(sy * cp, sp, cy * cp) * self.distance;
    }

    fn handle_key(&mut self, key: KeyCode) {
        const STEP: f32 = 0.05;
        match key {
            KeyCode::ArrowLeft => self.yaw -= STEP,
            KeyCode::ArrowRight => self.yaw += STEP,
            KeyCode::ArrowUp => self.pitch = (self.pitch + STEP).min(1.5),
            KeyCode::ArrowDown => self.pitch = (self.pitch - STEP).max(-1.5),
            KeyCode::PageUp => self.distance = (self.distance - 0.5).max(1.0),
            KeyCode::PageDown => self.distance += 0.5,
            _ => {}
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let (mut ctx, scene, mut objects) = load(&args)?;

    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .build(&event_loop)?,
    );

    let mut backend = WgpuBackend::new(Arc::clone(&window), config.vsync)?;
    let mut renderer = Renderer::new(&mut backend, &config.renderer)?;

    let mut camera = Camera::default();
    let (width, height) = backend.surface_size();
    camera.set_aspect(width as f32, height as f32);
    let mut orbit = Orbit {
        yaw: 0.0,
        pitch: 0.35,
        distance: 8.0,
    };
    orbit.apply(&mut camera);

    let mut last_frame = Instant::now();
    event_loop.run(move |event, elwt: &EventLoopWindowTarget<()>| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => elwt.exit(),
                WindowEvent::Resized(size) => {
                    backend.resize(size.width, size.height);
                    let (width, height) = backend.surface_size();
                    camera.set_aspect(width as f32, height as f32);
                }
                WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            physical_key: PhysicalKey::Code(key),
                            state: ElementState::Pressed,
                            ..
                        },
                    ..
                } => {
                    if key == KeyCode::Escape {
                        elwt.exit();
                    }
                    orbit.handle_key(key);
                    orbit.apply(&mut camera);
                }
                WindowEvent::RedrawRequested => {
                    let now = Instant::now();
                    objects.update((now - last_frame).as_secs_f32());
                    last_frame = now;

                    match renderer.render(&mut backend, &mut ctx, &scene, &mut objects, &camera) {
                        Ok(_) => {}
                        Err(EngineError::Backend(sceneforge::backend::BackendError::FramebufferIncomplete(e))) => {
                            log::error!("Framebuffer incomplete: {}", e);
                            elwt.exit();
                        }
                        Err(e) => log::warn!("Frame skipped: {}", e),
                    }
                }
                _ => {}
            },
            Event::AboutToWait => window.request_redraw(),
            Event::LoopExiting => {
                renderer.dispose(&mut backend, &mut objects);
                ctx.dispose(&mut backend);
            }
            _ => {}
        }
    })?;
    Ok(())
}
