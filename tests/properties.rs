mod common;

use std::path::Path;

use common::*;
use glam::Mat4;
use mitsuba_bridge::export::export_scene;
use mitsuba_bridge::host::{HostScene, unique_name};
use mitsuba_bridge::props::sanitize_id;
use proptest::prelude::*;

proptest! {
    #[test]
    fn sanitized_ids_use_the_safe_alphabet(id in ".{0,24}") {
        let clean = sanitize_id(&id);
        prop_assert!(!clean.is_empty());
        prop_assert!(clean.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        prop_assert_eq!(sanitize_id(&clean), clean.clone());
    }

    #[test]
    fn safe_ids_are_left_alone(id in "[A-Za-z0-9_-]{1,24}") {
        prop_assert_eq!(sanitize_id(&id), id);
    }

    #[test]
    fn unique_names_never_collide(base in "[A-Za-z]{1,8}", taken in 0usize..5) {
        let mut names = vec![base.clone()];
        names.extend((1..=taken).map(|n| format!("{base}.{n:03}")));
        let fresh = unique_name(&base, |n| names.iter().any(|t| t == n));
        prop_assert!(!names.contains(&fresh));
        prop_assert!(fresh.starts_with(&base));
    }
}

#[test]
fn scene_dictionary_serializes_in_insertion_order() {
    let mut scene = HostScene::default();
    scene.materials.insert("Clay".into(), diffuse("Clay", [0.6, 0.5, 0.4]));
    add_mesh_object(&mut scene, cube_mesh("Pot", &[]), &["Clay"], Mat4::IDENTITY);
    let exported = export_scene(&scene, in_process(), None, Path::new(".")).unwrap();

    let json = serde_json::to_value(&exported.scene).unwrap();
    let object = json.as_object().unwrap();
    let keys: Vec<&str> = object.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["type", "integrator", "mat-Clay", "mesh-Pot"]);
    assert_eq!(object["type"], "scene");
    assert_eq!(object["mat-Clay"]["type"], "twosided");
    assert_eq!(object["mesh-Pot"]["bsdf"]["type"], "ref");
    assert_eq!(object["mesh-Pot"]["data"]["type"], "mesh_data");
    assert_eq!(object["mesh-Pot"]["data"]["face_count"], 12);
}
