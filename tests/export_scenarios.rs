mod common;

use std::f32::consts::PI;

use common::*;
use glam::{Mat4, Quat, Vec3};
use mitsuba_bridge::config::ExportOptions;
use mitsuba_bridge::export::{SceneDict, export_scene};
use mitsuba_bridge::host::nodes::types;
use mitsuba_bridge::host::{AreaShape, Camera, HostScene, Light, LightKind, Node, Object, ObjectKind, World};
use mitsuba_bridge::props::{Props, Spectrum, Value};
use serde_json::json;

const ALWAYS_TWO_SIDED: &[&str] = &[
    "dielectric",
    "thindielectric",
    "roughdielectric",
    "mask",
    "bumpmap",
    "normalmap",
    "null",
];

const SHAPES: &[&str] = &["ply", "obj", "mesh", "rectangle", "disk", "sphere", "cube"];

fn valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn rgb(props: &Props, key: &str) -> [f32; 3] {
    props.spectrum(key).and_then(Spectrum::to_rgb).unwrap()
}

fn approx(a: [f32; 3], b: [f32; 3]) -> bool {
    a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-4)
}

/// Every nested bag, paired with the plugin of the bag that holds it.
fn walk<'a>(props: &'a Props, parent: Option<&'a str>, out: &mut Vec<(Option<&'a str>, &'a Props)>) {
    out.push((parent, props));
    for (_, value) in props.iter() {
        if let Value::Bag(child) = value {
            walk(child, Some(props.plugin()), out);
        }
    }
}

fn all_bags(dict: &SceneDict) -> Vec<(Option<&str>, &Props)> {
    let mut out = Vec::new();
    for (_, entry) in dict.iter() {
        walk(&entry.props, None, &mut out);
    }
    out
}

fn diffuse_cube_scene() -> HostScene {
    let mut scene = HostScene::default();
    scene.materials.insert("Diffuse".into(), diffuse("Diffuse", [0.8; 3]));
    add_mesh_object(&mut scene, cube_mesh("Cube", &[]), &["Diffuse"], Mat4::IDENTITY);
    let tilt = Mat4::from_quat(Quat::from_rotation_y(0.3));
    add_light_object(&mut scene, sun("Sun", 3.0), tilt);
    scene.world = Some(World {
        name: "World".into(),
        node_tree: None,
        color: [0.2, 0.3, 0.4],
    });
    scene
}

#[test]
fn diffuse_cube_with_a_sun() {
    let dir = scratch_dir("diffuse-cube");
    let scene = diffuse_cube_scene();
    let exported = export_scene(&scene, ExportOptions::identity_axes(), Some(&dir), &dir).unwrap();
    let dict = &exported.scene;
    assert!(exported.report.errors.is_empty(), "{:?}", exported.report.errors);

    assert_eq!(dict.ids().next(), Some("integrator"));
    let integrator = dict.get("integrator").unwrap();
    assert_eq!(integrator.plugin(), "path");
    assert_eq!(integrator.int("max_depth"), Some(1024));

    let material = dict.get("mat-Diffuse").unwrap();
    assert_eq!(material.plugin(), "twosided");
    let inner = material.bag("bsdf").unwrap();
    assert_eq!(inner.plugin(), "diffuse");
    assert_eq!(inner.spectrum("reflectance"), Some(&Spectrum::Rgb([0.8; 3])));

    let cube = dict.get("mesh-Cube").unwrap();
    assert_eq!(cube.plugin(), "ply");
    assert_eq!(cube.reference_id("bsdf"), Some("mat-Diffuse"));
    assert_eq!(cube.string("filename"), Some("meshes/Cube.ply"));
    assert!(dir.join("meshes/Cube.ply").is_file());
    assert!(dict.position("mat-Diffuse") < dict.position("mesh-Cube"));

    assert!(!dict.contains("default-bsdf"));
    let suns: Vec<_> = dict.of_plugin(&["directional"]).collect();
    assert_eq!(suns.len(), 1);
    assert!(suns[0].0.starts_with("elm__"));
    assert_eq!(rgb(suns[0].1, "irradiance"), [3.0; 3]);
    assert_eq!(dict.of_plugin(&["constant"]).count(), 1);
    assert_eq!(exported.key_mapping["Cube"], "mesh-Cube");
}

#[test]
fn square_area_light_becomes_an_emissive_rectangle() {
    let mut scene = HostScene::default();
    let mut light = Light::new("Panel", LightKind::Area);
    light.shape = AreaShape::Square;
    light.size = 1.0;
    light.energy = 100.0;
    add_light_object(&mut scene, light, Mat4::IDENTITY);

    let exported = export_scene(&scene, in_process(), None, std::path::Path::new(".")).unwrap();
    let (_, panel) = exported.scene.of_plugin(&["rectangle"]).next().unwrap();
    assert_eq!(panel.bool("flip_normals"), Some(true));
    let to_world = panel.transform("to_world").unwrap().matrix();
    assert!(to_world.abs_diff_eq(Mat4::from_scale(Vec3::new(0.5, 0.5, 1.0)), 1e-6));
    assert_eq!(panel.bag("bsdf").unwrap().plugin(), "null");
    let emitter = panel.bag("emitter").unwrap();
    assert_eq!(emitter.plugin(), "area");
    assert!(approx(rgb(emitter, "radiance"), [100.0 / PI; 3]));
}

#[test]
fn repeated_slot_materials_get_numbered_partitions() {
    let dir = scratch_dir("partitions");
    let mut scene = HostScene::default();
    scene.materials.insert("MatA".into(), diffuse("MatA", [1.0, 0.0, 0.0]));
    scene.materials.insert("MatB".into(), diffuse("MatB", [0.0, 1.0, 0.0]));
    add_mesh_object(
        &mut scene,
        cube_mesh("Obj", &[0, 1, 2]),
        &["MatA", "MatB", "MatA"],
        Mat4::IDENTITY,
    );

    let exported = export_scene(&scene, ExportOptions::identity_axes(), Some(&dir), &dir).unwrap();
    let group = exported.scene.get("mesh-Obj").unwrap();
    assert_eq!(group.plugin(), "shapegroup");
    let expected = [
        ("Obj-MatA", "mat-MatA"),
        ("Obj-MatB", "mat-MatB"),
        ("Obj-MatA-001", "mat-MatA"),
    ];
    for (stem, material) in expected {
        let shape = group.bag(stem).unwrap_or_else(|| panic!("missing partition {stem}"));
        assert_eq!(shape.string("filename"), Some(format!("meshes/{stem}.ply").as_str()));
        assert_eq!(shape.reference_id("bsdf"), Some(material));
        assert!(dir.join("meshes").join(format!("{stem}.ply")).is_file());
    }
    let (_, instance) = exported.scene.of_plugin(&["instance"]).next().unwrap();
    assert_eq!(instance.reference_id("shapegroup"), Some("mesh-Obj"));
}

#[test]
fn transmissive_principled_has_eta_and_no_two_sided() {
    let mut scene = HostScene::default();
    scene.materials.insert(
        "Glassy".into(),
        material(
            "Glassy",
            Node::new(types::PRINCIPLED, "Principled BSDF")
                .with_input("Transmission Weight", json!(0.5))
                .with_input("IOR", json!(1.0)),
        ),
    );
    add_mesh_object(&mut scene, cube_mesh("Cube", &[]), &["Glassy"], Mat4::IDENTITY);

    let exported = export_scene(&scene, in_process(), None, std::path::Path::new(".")).unwrap();
    let bsdf = exported.scene.get("mat-Glassy").unwrap();
    assert_eq!(bsdf.plugin(), "principled");
    assert_eq!(bsdf.float("spec_trans"), Some(0.5));
    assert_eq!(bsdf.float("eta"), Some(1.001));
    assert!(!bsdf.contains("specular"));
}

/// A scene touching every exporter, for the structural invariants.
fn busy_scene() -> HostScene {
    let mut scene = HostScene::default();
    scene.materials.insert("Red Paint".into(), diffuse("Red Paint", [0.8, 0.1, 0.1]));
    scene.materials.insert(
        "Metal".into(),
        material(
            "Metal",
            Node::new(types::GLOSSY, "Glossy BSDF")
                .with_param("distribution", json!("GGX"))
                .with_input("Roughness", json!(0.3)),
        ),
    );
    scene.materials.insert(
        "Glass".into(),
        material(
            "Glass",
            Node::new(types::GLASS, "Glass BSDF")
                .with_param("distribution", json!("SHARP"))
                .with_input("IOR", json!(1.5)),
        ),
    );
    scene.materials.insert(
        "Lamp".into(),
        material(
            "Lamp",
            Node::new(types::PRINCIPLED, "Principled BSDF")
                .with_input("Emission Color", json!([1.0, 0.9, 0.8, 1.0]))
                .with_input("Emission Strength", json!(5.0)),
        ),
    );
    add_mesh_object(&mut scene, cube_mesh("Cube.001", &[]), &["Red Paint"], Mat4::IDENTITY);
    add_mesh_object(
        &mut scene,
        cube_mesh("Ball", &[0, 1]),
        &["Metal", "Glass"],
        Mat4::from_translation(Vec3::new(3.0, 0.0, 0.0)),
    );
    add_mesh_object(
        &mut scene,
        cube_mesh("Bulb", &[]),
        &["Lamp"],
        Mat4::from_translation(Vec3::new(0.0, 0.0, 4.0)),
    );
    add_mesh_object(
        &mut scene,
        cube_mesh("Bare", &[]),
        &[],
        Mat4::from_translation(Vec3::new(-3.0, 0.0, 0.0)),
    );
    add_light_object(&mut scene, Light::new("Point", LightKind::Point), Mat4::IDENTITY);
    add_light_object(&mut scene, Light::new("Spot", LightKind::Spot), Mat4::IDENTITY);

    let camera = scene.add_camera(Camera::new("Cam"));
    let mut object = Object::new("Cam", ObjectKind::Camera);
    object.data = Some(camera);
    object.matrix_world = Mat4::from_translation(Vec3::new(0.0, -10.0, 2.0));
    scene.active_camera = Some(scene.add_object(object));
    scene
}

#[test]
fn ids_are_sanitized() {
    let exported = export_scene(&busy_scene(), in_process(), None, std::path::Path::new(".")).unwrap();
    for id in exported.scene.ids() {
        assert!(valid_id(id), "bad id {id}");
    }
    assert!(exported.scene.contains("mesh-Cube_001"));
    assert!(exported.scene.contains("mat-Red_Paint"));
    for (_, bag) in all_bags(&exported.scene) {
        for (_, value) in bag.iter() {
            if let Value::Ref(id) = value {
                assert!(exported.scene.contains(id), "dangling reference {id}");
            }
        }
    }
}

#[test]
fn shapes_carry_one_bsdf_and_emissive_ones_an_emitter() {
    let exported = export_scene(&busy_scene(), in_process(), None, std::path::Path::new(".")).unwrap();
    let shapes: Vec<&Props> = all_bags(&exported.scene)
        .into_iter()
        .map(|(_, p)| p)
        .filter(|p| SHAPES.contains(&p.plugin()))
        .collect();
    assert!(shapes.len() >= 5);
    for shape in &shapes {
        assert!(shape.contains("bsdf"), "{} without bsdf", shape.plugin());
    }
    let emissive: Vec<_> = shapes
        .iter()
        .filter(|s| s.reference_id("bsdf") == Some("mat-Lamp"))
        .collect();
    assert_eq!(emissive.len(), 1);
    assert_eq!(emissive[0].bag("emitter").unwrap().plugin(), "area");
}

#[test]
fn two_sided_wrappers_are_never_nested_or_redundant() {
    let exported = export_scene(&busy_scene(), in_process(), None, std::path::Path::new(".")).unwrap();
    let bags = all_bags(&exported.scene);
    assert!(bags.iter().any(|(_, p)| p.plugin() == "twosided"));
    for (parent, bag) in &bags {
        if bag.plugin() == "twosided" {
            assert_ne!(*parent, Some("twosided"));
        }
        if let Some("twosided") = parent {
            assert!(!ALWAYS_TWO_SIDED.contains(&bag.plugin()), "twosided wraps {}", bag.plugin());
        }
    }
    assert_eq!(exported.scene.get("mat-Glass").unwrap().plugin(), "dielectric");
}

#[test]
fn default_bsdf_precedes_its_first_reference() {
    let exported = export_scene(&busy_scene(), in_process(), None, std::path::Path::new(".")).unwrap();
    let dict = &exported.scene;
    let default = dict.position("default-bsdf").unwrap();
    let bare = dict.position("mesh-Bare").unwrap();
    assert!(default < bare);
    assert_eq!(dict.get("mesh-Bare").unwrap().reference_id("bsdf"), Some("default-bsdf"));

    let ids: Vec<&str> = dict.ids().collect();
    let first_mesh = ids.iter().position(|id| id.starts_with("mesh-")).unwrap();
    let last_material = ids.iter().rposition(|id| id.starts_with("mat-")).unwrap();
    assert!(last_material < first_mesh);
    assert_eq!(ids[0], "integrator");
}

#[test]
fn only_the_active_camera_is_exported_in_process() {
    let mut scene = busy_scene();
    let second = scene.add_camera(Camera::new("Other"));
    let mut object = Object::new("Other", ObjectKind::Camera);
    object.data = Some(second);
    scene.add_object(object);

    let in_memory = export_scene(&scene, in_process(), None, std::path::Path::new(".")).unwrap();
    assert_eq!(in_memory.scene.of_plugin(&["perspective"]).count(), 1);

    let dir = scratch_dir("two-cameras");
    let on_disk = export_scene(&scene, ExportOptions::identity_axes(), Some(&dir), &dir).unwrap();
    let cameras: Vec<&str> = on_disk.scene.of_plugin(&["perspective"]).map(|(id, _)| id).collect();
    assert_eq!(cameras.len(), 2);
    assert_eq!(on_disk.key_mapping["Cam"], cameras[0]);
}
