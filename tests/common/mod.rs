#![allow(dead_code)]

use std::path::PathBuf;

use glam::Mat4;
use mitsuba_bridge::config::ExportOptions;
use mitsuba_bridge::host::nodes::types;
use mitsuba_bridge::host::{
    HostScene, Light, LightKind, Material, Mesh, MeshBuilder, Node, NodeTree, Object, ObjectKind,
};
use serde_json::{Value as Json, json};

pub const VERSION: [u32; 3] = [4, 2, 0];

/// Unit cube centred on the origin, one material slot per face given in
/// `slots` (cycled).
pub fn cube_mesh(name: &str, slots: &[i32]) -> Mesh {
    let mut b = MeshBuilder::new(name, VERSION).vertices(vec![
        [-1.0, -1.0, -1.0],
        [1.0, -1.0, -1.0],
        [1.0, 1.0, -1.0],
        [-1.0, 1.0, -1.0],
        [-1.0, -1.0, 1.0],
        [1.0, -1.0, 1.0],
        [1.0, 1.0, 1.0],
        [-1.0, 1.0, 1.0],
    ]);
    let faces: [[u32; 4]; 6] = [
        [0, 3, 2, 1],
        [4, 5, 6, 7],
        [0, 1, 5, 4],
        [2, 3, 7, 6],
        [1, 2, 6, 5],
        [0, 4, 7, 3],
    ];
    for (i, face) in faces.iter().enumerate() {
        let slot = if slots.is_empty() { 0 } else { slots[i % slots.len()] };
        b.polygon(face, slot, false, None, &[]).unwrap();
    }
    b.build(false)
}

/// Material whose output is fed by a single shader node.
pub fn material(name: &str, node: Node) -> Material {
    let mut tree = NodeTree::default();
    let shader = tree.add_node(node);
    let output = tree.add_node(
        Node::new(types::OUTPUT_MATERIAL, "Material Output").with_param("is_active_output", json!(true)),
    );
    let socket = match tree.node(&shader).map(|n| n.node_type.as_str()) {
        Some(types::EMISSION) => "Emission",
        Some(types::MIX_SHADER) | Some(types::ADD_SHADER) => "Shader",
        _ => "BSDF",
    };
    tree.link(&shader, socket, &output, "Surface");
    Material::new(name, tree)
}

pub fn diffuse(name: &str, color: [f32; 3]) -> Material {
    material(
        name,
        Node::new(types::DIFFUSE, "Diffuse BSDF").with_input("Color", rgba(color)),
    )
}

pub fn rgba(c: [f32; 3]) -> Json {
    json!([c[0], c[1], c[2], 1.0])
}

/// Add a mesh object with its own mesh data block.
pub fn add_mesh_object(scene: &mut HostScene, mesh: Mesh, slots: &[&str], matrix: Mat4) -> String {
    let name = mesh.name.clone();
    let data = scene.add_mesh(mesh);
    let mut object = Object::new(name, ObjectKind::Mesh);
    object.data = Some(data);
    object.material_slots = slots.iter().map(|s| Some(s.to_string())).collect();
    object.matrix_world = matrix;
    scene.add_object(object)
}

pub fn add_light_object(scene: &mut HostScene, light: Light, matrix: Mat4) -> String {
    let name = light.name.clone();
    let data = scene.add_light(light);
    let mut object = Object::new(name, ObjectKind::Light);
    object.data = Some(data);
    object.matrix_world = matrix;
    scene.add_object(object)
}

pub fn sun(name: &str, strength: f32) -> Light {
    let mut light = Light::new(name, LightKind::Sun);
    light.energy = strength;
    light
}

/// Options for an in-process export that keeps host coordinates.
pub fn in_process() -> ExportOptions {
    ExportOptions {
        export_assets: false,
        ..ExportOptions::identity_axes()
    }
}

/// A fresh scratch directory for one test.
pub fn scratch_dir(test: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mitsuba-bridge-{test}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
