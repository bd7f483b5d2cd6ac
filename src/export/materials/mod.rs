//! Host node-tree materials to renderer BSDF dictionaries.

pub mod bsdfs;
pub mod evaluators;
pub mod textures;
pub mod walker;

use anyhow::{Result, bail};
use log::debug;

use crate::export::context::{ExportContext, ExportedMaterial};
use crate::host::nodes::types;
use crate::host::{HostScene, Material};
use crate::props::{Props, Spectrum, sanitize_id};

use bsdfs::{Shader, error_material, export_shader, two_sided};
use walker::{Cursor, Input};

pub fn material_id(name: &str) -> String {
    format!("mat-{}", sanitize_id(name))
}

/// Materials without a node tree only carry viewport colours.
fn viewport_material(material: &Material) -> Props {
    let [r, g, b, _] = material.diffuse_color;
    two_sided(Props::new("diffuse").with("reflectance", Spectrum::Rgb([r, g, b])))
}

fn convert(ctx: &mut ExportContext, scene: &HostScene, material: &Material) -> Result<Shader> {
    let Some(tree) = &material.node_tree else {
        return Ok(Shader::Bsdf(viewport_material(material)));
    };
    let Some(output) = tree.output_node(types::OUTPUT_MATERIAL) else {
        bail!("material has no output node");
    };
    let cursor = Cursor::new(tree, &scene.node_groups);
    for unsupported in ["Volume", "Displacement"] {
        if cursor.input(output, unsupported).is_linked() {
            ctx.report.warn(format!(
                "material '{}': {} output is not supported and was ignored",
                material.name,
                unsupported.to_lowercase()
            ));
        }
    }
    match cursor.input(output, "Surface") {
        Input::Linked(src) => export_shader(ctx, scene, &src, false),
        Input::Value(_) => bail!("material output has no surface shader"),
    }
}

/// Export a material once and return what shapes using it must reference.
///
/// Conversion failures never propagate: the material is replaced by the
/// error material and a warning is recorded.
pub fn export_material(ctx: &mut ExportContext, scene: &HostScene, material: &Material) -> ExportedMaterial {
    let id = material_id(&material.name);
    if let Some(done) = ctx.exported_materials.get(&id) {
        return done.clone();
    }
    let shader = match convert(ctx, scene, material) {
        Ok(shader) => shader,
        Err(e) => {
            ctx.report.warn(format!(
                "material '{}' could not be converted ({e:#}); using the error material",
                material.name
            ));
            Shader::Bsdf(error_material())
        }
    };
    let record = match shader {
        Shader::Bsdf(bsdf) => {
            ctx.add_object(&material.name, bsdf, Some(&id), true);
            ExportedMaterial {
                bsdf: Some(id.clone()),
                emitter: None,
            }
        }
        Shader::Emitter(emitter) => ExportedMaterial {
            bsdf: None,
            emitter: Some(emitter),
        },
        Shader::Pair { bsdf, emitter } => {
            ctx.add_object(&material.name, bsdf, Some(&id), true);
            ExportedMaterial {
                bsdf: Some(id.clone()),
                emitter: Some(emitter),
            }
        }
    };
    debug!("exported material '{}' as {id}", material.name);
    ctx.exported_materials.insert(id, record.clone());
    record
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;
    use crate::config::ExportOptions;
    use crate::host::nodes::{Node, NodeTree};
    use crate::props::Value;

    fn ctx() -> ExportContext {
        let options = ExportOptions {
            export_assets: false,
            ..Default::default()
        };
        ExportContext::new(options, None, PathBuf::from(".")).unwrap()
    }

    fn single(node: Node, socket: &str) -> NodeTree {
        let mut tree = NodeTree::default();
        let name = tree.add_node(node);
        tree.add_node(Node::new(types::OUTPUT_MATERIAL, "Material Output"));
        tree.link(&name, socket, "Material Output", "Surface");
        tree
    }

    fn export(tree: NodeTree) -> (ExportContext, ExportedMaterial) {
        let mut c = ctx();
        let scene = HostScene::default();
        let m = Material::new("Mat", tree);
        let record = export_material(&mut c, &scene, &m);
        (c, record)
    }

    #[test]
    fn diffuse_is_wrapped_two_sided() {
        let tree = single(
            Node::new(types::DIFFUSE, "Diffuse").with_input("Color", json!([0.8, 0.8, 0.8, 1.0])),
            "BSDF",
        );
        let (c, record) = export(tree);
        assert_eq!(record.bsdf.as_deref(), Some("mat-Mat"));
        let bsdf = c.scene.get("mat-Mat").unwrap();
        assert_eq!(bsdf.plugin(), "twosided");
        let inner = bsdf.bag("bsdf").unwrap();
        assert_eq!(inner.plugin(), "diffuse");
        assert_eq!(inner.spectrum("reflectance"), Some(&Spectrum::Rgb([0.8; 3])));
    }

    #[test]
    fn missing_image_only_drops_its_socket() {
        let mut tree = single(Node::new(types::DIFFUSE, "Diffuse"), "BSDF");
        let tex = tree.add_node(Node::new(types::TEX_IMAGE, "Image Texture").with_param("image", json!("Gone")));
        tree.link(&tex, "Color", "Diffuse", "Color");
        let (c, record) = export(tree);
        assert_eq!(record.bsdf.as_deref(), Some("mat-Mat"));
        let inner = c.scene.get("mat-Mat").unwrap().bag("bsdf").unwrap();
        assert_eq!(inner.plugin(), "diffuse");
        assert!(inner.spectrum("reflectance").is_some());
        assert!(c.report.has_warning("missing image 'Gone'"));
        assert!(!c.report.has_warning("error material"));
    }

    #[test]
    fn rough_glass_is_never_wrapped() {
        let tree = single(
            Node::new(types::GLASS, "Glass")
                .with_param("distribution", json!("GGX"))
                .with_input("Roughness", json!(0.5))
                .with_input("IOR", json!(1.5)),
            "BSDF",
        );
        let (c, _) = export(tree);
        let bsdf = c.scene.get("mat-Mat").unwrap();
        assert_eq!(bsdf.plugin(), "roughdielectric");
        assert_eq!(bsdf.float("alpha"), Some(0.25));
        assert_eq!(bsdf.float("int_ior"), Some(1.5));
    }

    #[test]
    fn subsurface_becomes_error_material() {
        let tree = single(Node::new(types::SUBSURFACE, "SSS"), "BSSRDF");
        let (c, _) = export(tree);
        assert_eq!(c.scene.get("mat-Mat").unwrap(), &error_material());
        assert!(c.report.has_warning("subsurface"));
    }

    #[test]
    fn emission_only_material_has_no_bsdf() {
        let tree = single(
            Node::new(types::EMISSION, "Emission")
                .with_input("Color", json!([1.0, 0.5, 0.25, 1.0]))
                .with_input("Strength", json!(2.0)),
            "Emission",
        );
        let (c, record) = export(tree);
        assert!(record.bsdf.is_none());
        assert!(c.scene.is_empty());
        let emitter = record.emitter.unwrap();
        assert_eq!(emitter.plugin(), "area");
        assert_eq!(emitter.spectrum("radiance").and_then(Spectrum::to_rgb), Some([2.0, 1.0, 0.5]));
    }

    #[test]
    fn backfacing_mix_builds_two_sided_selector() {
        let mut tree = NodeTree::default();
        tree.add_node(Node::new(types::NEW_GEOMETRY, "Geometry"));
        tree.add_node(Node::new(types::DIFFUSE, "Front"));
        tree.add_node(Node::new(types::GLOSSY, "Back").with_param("distribution", json!("SHARP")));
        tree.add_node(Node::new(types::MIX_SHADER, "Mix"));
        tree.add_node(Node::new(types::OUTPUT_MATERIAL, "Out"));
        tree.link("Geometry", "Backfacing", "Mix", "Fac");
        tree.link("Front", "BSDF", "Mix", "Shader");
        tree.link("Back", "BSDF", "Mix", "Shader_001");
        tree.link("Mix", "Shader", "Out", "Surface");
        let (c, _) = export(tree);
        let bsdf = c.scene.get("mat-Mat").unwrap();
        assert_eq!(bsdf.plugin(), "twosided");
        assert_eq!(bsdf.bag("bsdf_0").unwrap().plugin(), "diffuse");
        assert_eq!(bsdf.bag("bsdf_1").unwrap().plugin(), "conductor");
    }

    #[test]
    fn mixing_bsdfs_blends() {
        let mut tree = NodeTree::default();
        tree.add_node(Node::new(types::DIFFUSE, "A"));
        tree.add_node(Node::new(types::TRANSPARENT, "B"));
        tree.add_node(Node::new(types::MIX_SHADER, "Mix").with_input("Fac", json!(0.25)));
        tree.add_node(Node::new(types::OUTPUT_MATERIAL, "Out"));
        tree.link("A", "BSDF", "Mix", "Shader");
        tree.link("B", "BSDF", "Mix", "Shader_001");
        tree.link("Mix", "Shader", "Out", "Surface");
        let (c, _) = export(tree);
        let bsdf = c.scene.get("mat-Mat").unwrap();
        assert_eq!(bsdf.plugin(), "blendbsdf");
        assert_eq!(bsdf.float("weight"), Some(0.25));
        assert_eq!(bsdf.bag("bsdf_0").unwrap().plugin(), "twosided");
        assert_eq!(bsdf.bag("bsdf_1").unwrap().plugin(), "null");
    }

    #[test]
    fn principled_emission_exports_pair() {
        let tree = single(
            Node::new(types::PRINCIPLED, "Principled BSDF")
                .with_input("Base Color", json!([0.5, 0.5, 0.5, 1.0]))
                .with_input("Emission Color", json!([1.0, 1.0, 1.0, 1.0]))
                .with_input("Emission Strength", json!(3.0)),
            "BSDF",
        );
        let (c, record) = export(tree);
        assert_eq!(record.bsdf.as_deref(), Some("mat-Mat"));
        let emitter = record.emitter.unwrap();
        assert_eq!(
            emitter.spectrum("radiance"),
            Some(&Spectrum::Srgb {
                color: [3.0; 3],
                unbounded: true
            })
        );
        assert_eq!(c.scene.get("mat-Mat").unwrap().plugin(), "twosided");
    }

    #[test]
    fn principled_alpha_adds_mask_outside_two_sided() {
        let tree = single(
            Node::new(types::PRINCIPLED, "Principled BSDF").with_input("Alpha", json!(0.5)),
            "BSDF",
        );
        let (c, _) = export(tree);
        let bsdf = c.scene.get("mat-Mat").unwrap();
        assert_eq!(bsdf.plugin(), "mask");
        assert_eq!(bsdf.float("opacity"), Some(0.5));
        assert_eq!(bsdf.bag("bsdf").unwrap().plugin(), "twosided");
    }

    #[test]
    fn bump_wraps_two_sided_bsdf() {
        let mut tree = NodeTree::default();
        tree.add_node(Node::new(types::TEX_CHECKER, "Checker"));
        tree.add_node(
            Node::new(types::BUMP, "Bump")
                .with_input("Strength", json!(0.5))
                .with_input("Distance", json!(0.2)),
        );
        tree.add_node(Node::new(types::DIFFUSE, "Diffuse"));
        tree.add_node(Node::new(types::OUTPUT_MATERIAL, "Out"));
        tree.link("Checker", "Fac", "Bump", "Height");
        tree.link("Bump", "Normal", "Diffuse", "Normal");
        tree.link("Diffuse", "BSDF", "Out", "Surface");
        let (c, _) = export(tree);
        let bsdf = c.scene.get("mat-Mat").unwrap();
        assert_eq!(bsdf.plugin(), "bumpmap");
        assert!((bsdf.float("scale").unwrap() - 0.1).abs() < 1e-6);
        assert_eq!(bsdf.bag("texture").unwrap().plugin(), "checkerboard");
        assert_eq!(bsdf.bag("bsdf").unwrap().plugin(), "twosided");
    }

    #[test]
    fn glossy_anisotropy_splits_alpha() {
        let tree = single(
            Node::new(types::GLOSSY, "Glossy")
                .with_param("distribution", json!("BECKMANN"))
                .with_input("Roughness", json!(0.5))
                .with_input("Anisotropy", json!(0.5)),
            "BSDF",
        );
        let (c, _) = export(tree);
        let inner = c.scene.get("mat-Mat").unwrap().bag("bsdf").unwrap().clone();
        assert_eq!(inner.plugin(), "roughconductor");
        assert_eq!(inner.string("distribution"), Some("beckmann"));
        let (u, v) = (inner.float("alpha_u").unwrap(), inner.float("alpha_v").unwrap());
        assert!(((u * v).sqrt() - 0.25).abs() < 1e-6);
        assert!(!inner.contains("alpha"));
    }

    #[test]
    fn materials_are_exported_once() {
        let mut c = ctx();
        let scene = HostScene::default();
        let m = Material::new("Mat", single(Node::new(types::DIFFUSE, "D"), "BSDF"));
        let a = export_material(&mut c, &scene, &m);
        let b = export_material(&mut c, &scene, &m);
        assert_eq!(a, b);
        assert_eq!(c.scene.len(), 1);
        assert!(c.report.errors.is_empty());
        assert!(matches!(c.scene.get("mat-Mat").unwrap().get("bsdf"), Some(Value::Bag(_))));
    }
}
