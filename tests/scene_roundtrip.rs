//! Saving and reloading whole scenes through the JSON scene file

use glam::{Quat, Vec3};
use rstest::rstest;
use sceneforge::scene::scene_file::{load_scene, save_scene};
use sceneforge::scene::{Light, LightType, MeshRenderer};
use sceneforge::{GameObjectManager, Scene};
use uuid::Uuid;

fn build(count: usize) -> GameObjectManager {
    let mut objects = GameObjectManager::new();
    let mut previous = None;
    for i in 0..count {
        let id = objects.create_game_object(&format!("Object {i}"));
        {
            let object = objects.get_mut(id).unwrap();
            object.transform.local_position = Vec3::new(i as f32, 0.5, -(i as f32));
            object.transform.local_rotation = Quat::from_rotation_y(0.1 * i as f32);
            object.transform.local_scale = Vec3::splat(1.0 + i as f32 * 0.25);
        }
        match i % 3 {
            0 => {
                objects.add_component(id, MeshRenderer::new(Uuid::new_v4(), Some(Uuid::new_v4())));
            }
            1 => {
                objects.add_component(id, Light::point(Vec3::new(1.0, 0.5, 0.25), 80.0, 6.0));
            }
            _ => {}
        }
        // every second object hangs under the one before it
        if i % 2 == 1 {
            objects.set_parent(id, previous).unwrap();
        }
        previous = Some(id);
    }
    objects
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(6)]
fn scene_survives_save_and_load(#[case] count: usize) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Scenes/test.scene.json");
    let settings = Scene {
        ambient_intensity: 0.35,
        skybox_hdr_path: Some("Skyboxes/studio.hdr".into()),
        exposure: 1.5,
        flip_v: true,
        ..Default::default()
    };
    let objects = build(count);

    save_scene(&path, &settings, &objects).unwrap();
    let (loaded_settings, loaded) = load_scene(&path).unwrap();

    assert_eq!(loaded_settings, settings);
    assert_eq!(loaded.len(), count);
    assert_eq!(loaded.ids(), objects.ids());

    for id in objects.ids() {
        let (before, after) = (objects.get(id).unwrap(), loaded.get(id).unwrap());
        assert_eq!(before.name(), after.name());
        assert_eq!(before.transform.parent(), after.transform.parent());
        assert!(objects
            .world_matrix(id)
            .unwrap()
            .abs_diff_eq(loaded.world_matrix(id).unwrap(), 1e-5));

        match (before.get_component::<MeshRenderer>(), after.get_component::<MeshRenderer>()) {
            (Some(a), Some(b)) => {
                assert_eq!(a.mesh, b.mesh);
                assert_eq!(a.material, b.material);
                assert_eq!(a.vertex_shader, b.vertex_shader);
            }
            (None, None) => {}
            _ => panic!("MeshRenderer not preserved on {}", before.name()),
        }
        match (before.get_component::<Light>(), after.get_component::<Light>()) {
            (Some(a), Some(b)) => assert_eq!(a, b),
            (None, None) => {}
            _ => panic!("Light not preserved on {}", before.name()),
        }
    }
}

#[test]
fn hand_written_scene_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hand.scene.json");
    std::fs::write(
        &path,
        r#"{
            "settings": { "ambientLightIntensity": 0.5 },
            "objects": [
                {
                    "id": "6f1b3a52-8f0e-4a5c-9d3e-2a7b1c0d9e11",
                    "name": "Sun",
                    "transform": { "position": [0, 10, 0], "rotation": [-45, 0, 0], "scale": [1, 1, 1] },
                    "components": [ { "type": "Light", "fields": { "type": "Directional", "intensity": 250 } } ]
                }
            ]
        }"#,
    )
    .unwrap();

    let (settings, objects) = load_scene(&path).unwrap();
    assert_eq!(settings.ambient_intensity, 0.5);
    assert_eq!(settings.exposure, 1.0);

    let lights = objects.directional_lights();
    assert_eq!(lights.len(), 1);
    let (id, light) = lights[0];
    assert_eq!(light.light_type, LightType::Directional);
    assert_eq!(light.intensity, 250.0);
    let rotation = objects.world_rotation(id).unwrap();
    assert!(rotation.abs_diff_eq(Quat::from_rotation_x((-45f32).to_radians()), 1e-5));
}

#[test]
fn shadow_light_choice_survives_reordering_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("two_suns.scene.json");
    let mut objects = GameObjectManager::new();
    let sun = objects.create_light("Sun", Light::directional(Vec3::ONE, 200.0));
    let moon = objects.create_light("Moon", Light::directional(Vec3::new(0.6, 0.7, 1.0), 20.0));
    assert!(objects.move_before(moon, sun));
    assert_eq!(objects.ids(), vec![moon, sun]);
    assert_eq!(objects.directional_lights()[0].0, sun);

    save_scene(&path, &Scene::default(), &objects).unwrap();
    let (_, mut loaded) = load_scene(&path).unwrap();

    assert_eq!(loaded.ids(), vec![moon, sun]);
    assert_eq!(loaded.directional_lights()[0].0, sun);

    // objects created after a reload are still ordered after the saved ones
    let late = loaded.create_light("Late", Light::directional(Vec3::ONE, 5.0));
    assert!(loaded.move_before(late, moon));
    let order: Vec<_> = loaded.directional_lights().iter().map(|(id, _)| *id).collect();
    assert_eq!(order, vec![sun, moon, late]);
}
