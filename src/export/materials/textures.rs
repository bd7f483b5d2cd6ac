//! Texture nodes: image, checker and colour-attribute lookups.

use anyhow::{Result, anyhow};
use glam::{Mat4, Vec3};
use serde_json::Value as Json;

use crate::export::context::ExportContext;
use crate::export::materials::evaluators::{Eval, eval_input};
use crate::export::materials::walker::{Input, Source};
use crate::host::nodes::{json_color, types};
use crate::host::{HostScene, Image, ImageSource};
use crate::props::{Props, Transform, Value, sanitize_id};
use crate::textures::TexturePayload;

fn wrap_mode(extension: Option<&str>) -> &'static str {
    match extension {
        Some("MIRROR") => "mirror",
        Some("EXTEND") | Some("CLIP") => "clamp",
        _ => "repeat",
    }
}

fn filter_type(interpolation: Option<&str>) -> &'static str {
    match interpolation {
        Some("Closest") => "nearest",
        _ => "bilinear",
    }
}

/// `T · Rz · S` in texture space from a mapping node's location, rotation
/// (radians) and scale.
pub fn mapping_to_uv(location: [f32; 3], rotation: [f32; 3], scale: [f32; 3]) -> Mat4 {
    Mat4::from_translation(Vec3::new(location[0], location[1], 0.0))
        * Mat4::from_rotation_z(rotation[2])
        * Mat4::from_scale(Vec3::new(scale[0], scale[1], 1.0))
}

/// The UV transform a texture node's `Vector` input asks for, if any.
fn uv_transform(ctx: &mut ExportContext, src: &Source) -> Option<Mat4> {
    let Input::Linked(vector) = src.cursor.input(src.node, "Vector") else {
        return None;
    };
    match vector.node.node_type.as_str() {
        types::MAPPING => {
            let n = vector.node;
            match n.param_str("vector_type") {
                None | Some("POINT") | Some("TEXTURE") => {}
                Some(kind) => ctx.report.warn(format!(
                    "mapping node '{}' uses {kind} mode; exported as a point mapping",
                    n.name
                )),
            }
            let location = n.input_vec3("Location").unwrap_or([0.0; 3]);
            let rotation = n.input_vec3("Rotation").unwrap_or([0.0; 3]);
            let scale = n.input_vec3("Scale").unwrap_or([1.0; 3]);
            if rotation[0] != 0.0 || rotation[1] != 0.0 {
                ctx.report.warn(format!(
                    "mapping node '{}': only rotation around Z applies to UVs",
                    n.name
                ));
            }
            Some(mapping_to_uv(location, rotation, scale))
        }
        types::TEX_COORD => None,
        other => {
            ctx.report.warn(format!(
                "texture vector input from '{other}' is not supported; using UVs"
            ));
            None
        }
    }
}

fn bitmap_from_payload(payload: TexturePayload) -> Props {
    match payload {
        TexturePayload::Filename(path) => Props::new("bitmap").with("filename", path),
        TexturePayload::Bitmap(img) => {
            let mut p = Props::new("bitmap");
            p.set("data", Value::Bitmap(img));
            p
        }
    }
}

fn bitmap_settings(mut bitmap: Props, ctx: &ExportContext, src: &Source, image: &Image) -> Props {
    bitmap.set("filter_type", filter_type(src.node.param_str("interpolation")));
    bitmap.set("wrap_mode", wrap_mode(src.node.param_str("extension")));
    if image.is_raw() || ctx.raw_texture_input() {
        bitmap.set("raw", true);
    }
    bitmap
}

/// `bitmap`, or `udim_texture` with one bitmap per tile.
pub fn image_texture(ctx: &mut ExportContext, scene: &HostScene, src: &Source) -> Result<Props> {
    let image_name = src
        .node
        .param_str("image")
        .ok_or_else(|| anyhow!("image texture '{}' has no image", src.node.name))?;
    let image = scene
        .images
        .get(image_name)
        .ok_or_else(|| anyhow!("image texture '{}' references missing image '{image_name}'", src.node.name))?;
    if src.socket == "Alpha" {
        ctx.report.warn(format!(
            "image texture '{}': alpha output exported as colour",
            src.node.name
        ));
    }
    let to_uv = uv_transform(ctx, src);

    let mut tex = if image.source == ImageSource::Tiled {
        if image.tiles.is_empty() {
            return Err(anyhow!("tiled image '{}' has no tiles", image.name));
        }
        let mut udim = Props::new("udim_texture");
        for tile in &image.tiles {
            let payload = ctx
                .export_and_cache_texture(image, Some(&format!(".{tile}")))
                .ok_or_else(|| anyhow!("failed to export tile {tile} of '{}'", image.name))?;
            let bitmap = bitmap_settings(bitmap_from_payload(payload), ctx, src, image);
            udim.set(format!("tile_{tile}"), bitmap);
        }
        udim
    } else {
        let payload = ctx
            .export_and_cache_texture(image, None)
            .ok_or_else(|| anyhow!("failed to export image '{}'", image.name))?;
        bitmap_settings(bitmap_from_payload(payload), ctx, src, image)
    };
    if let Some(m) = to_uv.filter(|m| !m.abs_diff_eq(Mat4::IDENTITY, 1e-6)) {
        tex.set("to_uv", Transform(m));
    }
    Ok(tex)
}

fn checker_color(ctx: &mut ExportContext, scene: &HostScene, src: &Source, socket: &str, default: [f32; 3]) -> Result<Value> {
    let e = eval_input(ctx, scene, &src.cursor, src.node, socket, Eval::Color(default))?;
    Ok(color_value(ctx, e))
}

pub fn checker_texture(ctx: &mut ExportContext, scene: &HostScene, src: &Source) -> Result<Props> {
    let color0 = checker_color(ctx, scene, src, "Color1", [0.8; 3])?;
    let color1 = checker_color(ctx, scene, src, "Color2", [0.2; 3])?;
    let scale = match eval_input(ctx, scene, &src.cursor, src.node, "Scale", Eval::Float(5.0))? {
        Eval::Float(s) => s,
        Eval::Color(c) => c[0],
        Eval::Texture(_) => {
            ctx.report.warn(format!(
                "checker texture '{}': textured scale is not supported",
                src.node.name
            ));
            5.0
        }
    };
    // One renderer checker cell pair spans [0, 1]; the host repeats `scale` cells.
    let half = scale / 2.0;
    let mut to_uv = Mat4::from_scale(Vec3::new(half, half, 1.0));
    if let Some(m) = uv_transform(ctx, src) {
        to_uv *= m;
    }
    Ok(Props::new("checkerboard")
        .with("color0", color0)
        .with("color1", color1)
        .with("to_uv", Transform(to_uv)))
}

pub fn vertex_color_texture(src: &Source) -> Result<Props> {
    let layer = src
        .node
        .param_str("layer_name")
        .filter(|l| !l.is_empty())
        .ok_or_else(|| anyhow!("colour attribute node '{}' has no layer", src.node.name))?;
    Ok(Props::new("mesh_attribute").with("name", format!("vertex_{}", sanitize_id(layer))))
}

/// A constant or textured colour as a property value.
pub fn color_value(ctx: &ExportContext, e: Eval) -> Value {
    match e {
        Eval::Color(c) => Value::Spectrum(ctx.rgb(c)),
        Eval::Float(f) => Value::Spectrum(ctx.rgb([f; 3])),
        Eval::Texture(t) => Value::Bag(t),
    }
}

/// A constant or textured scalar as a property value.
pub fn float_value(e: Eval) -> Value {
    match e {
        Eval::Float(f) => Value::Float(f),
        Eval::Color(c) => Value::Float(crate::color::luminance(c)),
        Eval::Texture(t) => Value::Bag(t),
    }
}

/// Constant value stored on an RGB node.
pub fn rgb_node_color(json: Option<&Json>) -> [f32; 3] {
    json.and_then(json_color).unwrap_or([0.5; 3])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_composes_translate_rotate_scale() {
        let m = mapping_to_uv([0.5, 0.0, 0.0], [0.0, 0.0, std::f32::consts::FRAC_PI_2], [2.0, 1.0, 1.0]);
        // (1, 0) → scaled (2, 0) → rotated (0, 2) → translated (0.5, 2)
        let p = m.transform_point3(Vec3::new(1.0, 0.0, 0.0));
        assert!(p.abs_diff_eq(Vec3::new(0.5, 2.0, 0.0), 1e-5));
    }

    #[test]
    fn extension_and_interpolation_names() {
        assert_eq!(wrap_mode(Some("EXTEND")), "clamp");
        assert_eq!(wrap_mode(None), "repeat");
        assert_eq!(filter_type(Some("Closest")), "nearest");
        assert_eq!(filter_type(Some("Cubic")), "bilinear");
    }
}
