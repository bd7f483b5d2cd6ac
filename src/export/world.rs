//! Host world shader to a constant or environment-map emitter.

use glam::{EulerRot, Mat4, Quat, Vec3};

use crate::export::context::ExportContext;
use crate::export::materials::evaluators::{Eval, input};
use crate::export::materials::walker::{Cursor, Input, Source};
use crate::host::nodes::types;
use crate::host::{DEFAULT_WORLD_COLOR, HostScene, World};
use crate::props::{Props, Spectrum, Value};
use crate::textures::TexturePayload;

/// Maps the host's equirectangular convention (Z up, seam on -X) onto the
/// renderer's (Y up).
pub fn envmap_basis() -> Mat4 {
    Mat4::from_cols_array_2d(&[
        [0.0, 0.0, 1.0, 0.0],
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ])
    .transpose()
}

/// Mapping node transform: `T · R(xyz euler) · S`.
pub fn mapping_matrix(location: [f32; 3], rotation: [f32; 3], scale: [f32; 3]) -> Mat4 {
    Mat4::from_scale_rotation_translation(
        Vec3::from(scale),
        Quat::from_euler(EulerRot::ZYX, rotation[2], rotation[1], rotation[0]),
        Vec3::from(location),
    )
}

fn is_default_grey(color: [f32; 3]) -> bool {
    color
        .iter()
        .zip(DEFAULT_WORLD_COLOR)
        .all(|(a, b)| (a - b).abs() < 1e-5)
}

fn environment_mapping(ctx: &mut ExportContext, src: &Source) -> Mat4 {
    let Input::Linked(vector) = src.cursor.input(src.node, "Vector") else {
        return Mat4::IDENTITY;
    };
    let n = vector.node;
    match n.node_type.as_str() {
        types::MAPPING => mapping_matrix(
            n.input_vec3("Location").unwrap_or([0.0; 3]),
            n.input_vec3("Rotation").unwrap_or([0.0; 3]),
            n.input_vec3("Scale").unwrap_or([1.0; 3]),
        ),
        types::TEX_COORD => Mat4::IDENTITY,
        other => {
            ctx.report.warn(format!(
                "environment vector input from '{other}' is not supported"
            ));
            Mat4::IDENTITY
        }
    }
}

fn envmap(ctx: &mut ExportContext, scene: &HostScene, src: &Source, strength: f32) -> Option<Props> {
    let Some(image) = src
        .node
        .param_str("image")
        .and_then(|name| scene.images.get(name))
    else {
        ctx.report.error(format!(
            "environment texture '{}' has no image",
            src.node.name
        ));
        return None;
    };
    let payload = ctx.export_and_cache_texture(image, None)?;
    let mut props = Props::new("envmap");
    match payload {
        TexturePayload::Filename(path) => props.set("filename", path),
        TexturePayload::Bitmap(img) => props.set("bitmap", Value::Bitmap(img)),
    }
    let mapping = environment_mapping(ctx, src);
    props.set("scale", strength);
    props.set("to_world", ctx.transform_matrix(envmap_basis() * mapping));
    Some(props)
}

fn constant(color: [f32; 3], strength: f32) -> Props {
    Props::new("constant").with("radiance", Spectrum::Rgb(color.map(|c| c * strength)))
}

/// The emitter a world describes, or `None` when it contributes nothing.
pub fn world_emitter(ctx: &mut ExportContext, scene: &HostScene, world: &World) -> Option<Props> {
    let skip_default = ctx.options.ignore_default_background;
    let Some(tree) = &world.node_tree else {
        if skip_default && is_default_grey(world.color) {
            return None;
        }
        return Some(constant(world.color, 1.0));
    };
    let output = tree.output_node(types::OUTPUT_WORLD)?;
    let cursor = Cursor::new(tree, &scene.node_groups);
    let Input::Linked(surface) = cursor.input(output, "Surface") else {
        return None;
    };
    if surface.node.node_type != types::BACKGROUND {
        ctx.report.warn(format!(
            "world '{}': only background shaders are supported, found {}",
            world.name, surface.node.node_type
        ));
        return None;
    }
    let strength = match input(ctx, scene, &surface, "Strength", Eval::Float(1.0)) {
        Ok(s) => s.float().unwrap_or_else(|| {
            ctx.report
                .warn(format!("world '{}': textured strength is not supported", world.name));
            1.0
        }),
        Err(e) => {
            ctx.report.warn(format!("world '{}': {e:#}", world.name));
            1.0
        }
    };
    if strength == 0.0 {
        return None;
    }
    match surface.cursor.input(surface.node, "Color") {
        Input::Linked(color)
            if matches!(color.node.node_type.as_str(), types::TEX_ENVIRONMENT | types::TEX_IMAGE) =>
        {
            envmap(ctx, scene, &color, strength)
        }
        _ => match input(ctx, scene, &surface, "Color", Eval::Color(world.color)) {
            Ok(Eval::Texture(_)) => {
                ctx.report.warn(format!(
                    "world '{}': only environment textures can light the scene",
                    world.name
                ));
                None
            }
            Ok(c) => {
                let c = c.color().unwrap_or(world.color);
                if skip_default && strength == 1.0 && is_default_grey(c) {
                    return None;
                }
                Some(constant(c, strength))
            }
            Err(e) => {
                ctx.report.warn(format!("world '{}': {e:#}", world.name));
                None
            }
        },
    }
}

pub fn export_world(ctx: &mut ExportContext, scene: &HostScene) {
    let Some(world) = &scene.world else {
        return;
    };
    if let Some(emitter) = world_emitter(ctx, scene, world) {
        ctx.add_object(&world.name, emitter, None, false);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;
    use crate::config::ExportOptions;
    use crate::host::nodes::{Node, NodeTree};

    fn ctx() -> ExportContext {
        let options = ExportOptions {
            export_assets: false,
            ..Default::default()
        };
        ExportContext::new(options, None, PathBuf::from(".")).unwrap()
    }

    fn background(color: [f32; 3], strength: f32) -> World {
        let mut tree = NodeTree::default();
        tree.add_node(
            Node::new(types::BACKGROUND, "Background")
                .with_input("Color", json!([color[0], color[1], color[2], 1.0]))
                .with_input("Strength", json!(strength)),
        );
        tree.add_node(Node::new(types::OUTPUT_WORLD, "World Output"));
        tree.link("Background", "Background", "World Output", "Surface");
        World {
            name: "World".into(),
            node_tree: Some(tree),
            color: DEFAULT_WORLD_COLOR,
        }
    }

    #[test]
    fn default_grey_is_skipped() {
        let mut c = ctx();
        let scene = HostScene::default();
        assert!(world_emitter(&mut c, &scene, &background(DEFAULT_WORLD_COLOR, 1.0)).is_none());
        c.options.ignore_default_background = false;
        let e = world_emitter(&mut c, &scene, &background(DEFAULT_WORLD_COLOR, 1.0)).unwrap();
        assert_eq!(e.plugin(), "constant");
    }

    #[test]
    fn zero_strength_is_skipped() {
        let mut c = ctx();
        let scene = HostScene::default();
        assert!(world_emitter(&mut c, &scene, &background([1.0; 3], 0.0)).is_none());
    }

    #[test]
    fn constant_radiance_is_scaled() {
        let mut c = ctx();
        let scene = HostScene::default();
        let e = world_emitter(&mut c, &scene, &background([0.5, 0.25, 1.0], 2.0)).unwrap();
        assert_eq!(e.spectrum("radiance"), Some(&Spectrum::Rgb([1.0, 0.5, 2.0])));
    }

    #[test]
    fn envmap_basis_is_a_rotation() {
        let b = envmap_basis();
        assert!((b * b.transpose()).abs_diff_eq(Mat4::IDENTITY, 1e-6));
        assert!((b.determinant() - 1.0).abs() < 1e-6);
    }
}
