//! Constant and environment-map emitters to the host world.

use std::collections::HashMap;

use anyhow::Result;
use glam::EulerRot;
use serde_json::json;

use crate::export::world::envmap_basis;
use crate::host::nodes::{Node, NodeTree, color_json, types, vec3_json};
use crate::host::{DEFAULT_WORLD_COLOR, World};
use crate::import::ImportContext;
use crate::import::textures::ImageData;
use crate::props::{Props, Transform, Value};

fn background(tree: &mut NodeTree, color: [f32; 3], strength: f32) -> String {
    let output = tree.add_node(Node::new(types::OUTPUT_WORLD, "World Output"));
    let bg = tree.add_node(
        Node::new(types::BACKGROUND, "Background")
            .with_input("Color", color_json(color))
            .with_input("Strength", json!(strength)),
    );
    tree.link(&bg, "Background", &output, "Surface");
    bg
}

/// Build the host world for a `constant` or `envmap` emitter. `images`
/// maps image cache keys to host image names.
pub fn import_world(ctx: &mut ImportContext, name: &str, props: &Props, images: &HashMap<String, String>) -> Result<()> {
    if ctx.scene.world.is_some() {
        ctx.report
            .error(format!("'{name}': only one environment emitter is supported; ignored"));
        props.mark_all_queried();
        return Ok(());
    }
    let mut tree = NodeTree::default();
    let mut color = DEFAULT_WORLD_COLOR;
    match props.plugin() {
        "constant" => {
            let radiance = match props.get("radiance") {
                None => Some([1.0; 3]),
                Some(Value::Spectrum(s)) => s.to_rgb(),
                Some(v) => v.as_float().map(|f| [f; 3]),
            };
            let rgb = radiance.unwrap_or_else(|| {
                ctx.report.warn(format!(
                    "world '{name}': radiance cannot be expressed as a colour; using white"
                ));
                [1.0; 3]
            });
            background(&mut tree, rgb, 1.0);
            color = rgb;
        }
        "envmap" => {
            let strength = props.float_or("scale", 1.0);
            let bg = background(&mut tree, [1.0; 3], strength);
            let image = ImageData::from_props(props).and_then(|data| images.get(&data.key()).cloned());
            match image {
                Some(image) => {
                    let env = tree.add_node(
                        Node::new(types::TEX_ENVIRONMENT, "Environment Texture")
                            .with_param("image", json!(image))
                            .with_param("interpolation", json!("Linear"))
                            .with_param("projection", json!("EQUIRECTANGULAR")),
                    );
                    tree.link(&env, "Color", &bg, "Color");
                    let to_world = props.transform("to_world").unwrap_or(Transform::IDENTITY);
                    let mapping = envmap_basis().inverse() * ctx.host_matrix(to_world);
                    if !Transform(mapping).approx_eq(&Transform::IDENTITY, 1e-5) {
                        let (scale, rotation, location) = mapping.to_scale_rotation_translation();
                        let (z, y, x) = rotation.to_euler(EulerRot::ZYX);
                        let node = tree.add_node(
                            Node::new(types::MAPPING, "Mapping")
                                .with_param("vector_type", json!("POINT"))
                                .with_input("Location", vec3_json(location.to_array()))
                                .with_input("Rotation", vec3_json([x, y, z]))
                                .with_input("Scale", vec3_json(scale.to_array())),
                        );
                        let coords = tree.add_node(Node::new(types::TEX_COORD, "Texture Coordinate"));
                        tree.link(&coords, "Generated", &node, "Vector");
                        tree.link(&node, "Vector", &env, "Vector");
                    }
                }
                None => {
                    ctx.report.warn(format!(
                        "world '{name}': environment image is unavailable; using a white background"
                    ));
                    props.mark_all_queried();
                }
            }
        }
        other => {
            ctx.report
                .warn(format!("world '{name}': '{other}' emitters are not supported"));
            props.mark_all_queried();
            return Ok(());
        }
    }
    ctx.scene.world = Some(World {
        name: name.to_string(),
        node_tree: Some(tree),
        color,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::ImportOptions;
    use crate::export::world::mapping_matrix;
    use crate::props::Spectrum;

    fn ctx() -> ImportContext {
        ImportContext::new(ImportOptions::identity_axes(), PathBuf::from(".")).unwrap()
    }

    #[test]
    fn constant_becomes_a_background_colour() {
        let mut ctx = ctx();
        let props = Props::new("constant").with("radiance", Spectrum::Rgb([0.2, 0.3, 0.4]));
        import_world(&mut ctx, "World", &props, &HashMap::new()).unwrap();
        let world = ctx.scene.world.as_ref().unwrap();
        let tree = world.node_tree.as_ref().unwrap();
        let bg = tree.output_node(types::BACKGROUND).unwrap();
        assert_eq!(bg.input_color("Color"), Some([0.2, 0.3, 0.4]));
        assert_eq!(world.color, [0.2, 0.3, 0.4]);
    }

    #[test]
    fn envmap_rotation_comes_back_as_a_mapping() {
        let mut ctx = ctx();
        let mapping = mapping_matrix([0.0; 3], [0.0, 0.0, 0.5], [1.0; 3]);
        let props = Props::new("envmap")
            .with("filename", "sky.exr")
            .with("scale", 2.0f32)
            .with("to_world", Transform(envmap_basis() * mapping));
        let images = HashMap::from([("file:sky.exr".to_string(), "sky.exr".to_string())]);
        import_world(&mut ctx, "World", &props, &images).unwrap();
        let tree = ctx.scene.world.as_ref().unwrap().node_tree.clone().unwrap();
        let node = tree.output_node(types::MAPPING).unwrap();
        let r = node.input_vec3("Rotation").unwrap();
        assert!((r[2] - 0.5).abs() < 1e-5 && r[0].abs() < 1e-5 && r[1].abs() < 1e-5);
        let bg = tree.output_node(types::BACKGROUND).unwrap();
        assert_eq!(bg.input_f32("Strength"), Some(2.0));
        let env = tree.output_node(types::TEX_ENVIRONMENT).unwrap();
        assert_eq!(env.param_str("image"), Some("sky.exr"));
    }

    #[test]
    fn unrotated_envmap_needs_no_mapping() {
        let mut ctx = ctx();
        let props = Props::new("envmap")
            .with("filename", "sky.exr")
            .with("to_world", Transform(envmap_basis()));
        let images = HashMap::from([("file:sky.exr".to_string(), "sky.exr".to_string())]);
        import_world(&mut ctx, "World", &props, &images).unwrap();
        let tree = ctx.scene.world.as_ref().unwrap().node_tree.clone().unwrap();
        assert!(tree.output_node(types::MAPPING).is_none());
    }

    #[test]
    fn second_world_is_refused() {
        let mut ctx = ctx();
        let props = Props::new("constant");
        import_world(&mut ctx, "A", &props, &HashMap::new()).unwrap();
        import_world(&mut ctx, "B", &props, &HashMap::new()).unwrap();
        assert_eq!(ctx.scene.world.as_ref().unwrap().name, "A");
        assert!(ctx.report.has_error("only one"));
    }
}
