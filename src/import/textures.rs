//! Renderer textures to host images and texture nodes.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use glam::{EulerRot, Mat4, Vec3};
use image::DynamicImage;
use serde_json::json;

use crate::host::nodes::{Node, types, vec3_json};
use crate::host::{Image, ImageFormat, ImageSource};
use crate::import::ImportContext;
use crate::import::materials::ShaderBuilder;
use crate::props::{Props, Transform, Value};

/// Where an imported image's pixels come from.
#[derive(Debug, Clone)]
pub enum ImageData {
    File(String),
    Memory(Arc<DynamicImage>),
    /// A UDIM set: the file pattern with `<UDIM>` and each tile's file.
    Tiled {
        pattern: String,
        tiles: Vec<(u32, String)>,
    },
}

fn tile_pattern(filename: &str, tile: u32) -> String {
    let number = tile.to_string();
    match filename.rfind(&number) {
        Some(at) => format!("{}<UDIM>{}", &filename[..at], &filename[at + number.len()..]),
        None => filename.to_string(),
    }
}

impl ImageData {
    /// Image source of a `bitmap`, `udim_texture` or `envmap` plugin.
    pub fn from_props(props: &Props) -> Option<ImageData> {
        if props.plugin() == "udim_texture" {
            let mut tiles: Vec<(u32, String)> = props
                .iter()
                .filter_map(|(key, value)| {
                    let tile = key.strip_prefix("tile_")?.parse::<u32>().ok()?;
                    let Value::Bag(bitmap) = value else {
                        return None;
                    };
                    props.mark_queried(key);
                    Some((tile, bitmap.string("filename")?.to_string()))
                })
                .collect();
            tiles.sort_by_key(|(tile, _)| *tile);
            let (first, filename) = tiles.first()?;
            let pattern = tile_pattern(filename, *first);
            return Some(ImageData::Tiled { pattern, tiles });
        }
        if let Some(filename) = props.string("filename") {
            return Some(ImageData::File(filename.to_string()));
        }
        ["data", "bitmap"].iter().find_map(|key| match props.get(key) {
            Some(Value::Bitmap(img)) => Some(ImageData::Memory(img.clone())),
            _ => None,
        })
    }

    /// Cache key: two plugins naming the same source share one host image.
    pub fn key(&self) -> String {
        match self {
            ImageData::File(f) => format!("file:{f}"),
            ImageData::Memory(img) => format!("memory:{:p}", Arc::as_ptr(img)),
            ImageData::Tiled { pattern, .. } => format!("udim:{pattern}"),
        }
    }

    pub fn display_name(&self) -> String {
        let file_name = |f: &str| {
            Path::new(f)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| f.to_string())
        };
        match self {
            ImageData::File(f) => file_name(f),
            ImageData::Memory(_) => "Image".to_string(),
            ImageData::Tiled { pattern, .. } => file_name(pattern),
        }
    }
}

fn file_format(filename: &str) -> ImageFormat {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(ImageFormat::from_extension)
        .unwrap_or(ImageFormat::Png)
}

/// Float RGBA, bottom row first.
fn host_pixels(img: &DynamicImage) -> Vec<f32> {
    let rgba = img.to_rgba32f();
    let row = rgba.width() as usize * 4;
    let mut out = Vec::with_capacity(rgba.as_raw().len());
    for chunk in rgba.as_raw().chunks_exact(row.max(1)).rev() {
        out.extend_from_slice(chunk);
    }
    out
}

/// Create the host image for `data`. Unreadable files are reported and
/// yield `None`; textures using them fall back to constants.
pub fn create_image(ctx: &mut ImportContext, name: &str, data: &ImageData, raw: bool) -> Option<String> {
    let colorspace = if raw { "Non-Color" } else { "sRGB" }.to_string();
    let image = match data {
        ImageData::File(filename) => {
            let path = ctx.resolve_path(filename);
            let (w, h) = match image::image_dimensions(&path) {
                Ok(size) => size,
                Err(e) => {
                    ctx.report
                        .error(format!("texture {} could not be read: {e}", path.display()));
                    return None;
                }
            };
            Image {
                name: name.to_string(),
                filepath: Some(path.to_string_lossy().into_owned()),
                file_format: file_format(filename),
                source: ImageSource::File,
                colorspace,
                size: [w, h],
                pixels: None,
                tiles: Vec::new(),
            }
        }
        ImageData::Memory(img) => Image {
            name: name.to_string(),
            filepath: None,
            file_format: ImageFormat::Png,
            source: ImageSource::Generated,
            colorspace,
            size: [img.width(), img.height()],
            pixels: Some(host_pixels(img)),
            tiles: Vec::new(),
        },
        ImageData::Tiled { pattern, tiles } => {
            let mut size = None;
            let mut found = Vec::new();
            for (tile, filename) in tiles {
                let path = ctx.resolve_path(filename);
                match image::image_dimensions(&path) {
                    Ok((w, h)) => {
                        size.get_or_insert([w, h]);
                        found.push(*tile);
                    }
                    Err(e) => ctx
                        .report
                        .error(format!("UDIM tile {} could not be read: {e}", path.display())),
                }
            }
            let size = size?;
            Image {
                name: name.to_string(),
                filepath: Some(ctx.resolve_path(pattern).to_string_lossy().into_owned()),
                file_format: file_format(pattern),
                source: ImageSource::Tiled,
                colorspace,
                size,
                pixels: None,
                tiles: found,
            }
        }
    };
    Some(ctx.scene.add_image(image))
}

fn interpolation(filter_type: Option<&str>) -> &'static str {
    match filter_type {
        Some("nearest") => "Closest",
        _ => "Linear",
    }
}

fn extension(wrap_mode: Option<&str>) -> &'static str {
    match wrap_mode {
        Some("mirror") => "MIRROR",
        Some("clamp") => "EXTEND",
        _ => "REPEAT",
    }
}

/// Location, rotation and scale of a mapping node reproducing `to_uv`.
pub fn uv_mapping(to_uv: Mat4) -> ([f32; 3], [f32; 3], [f32; 3]) {
    let (scale, rotation, translation) = to_uv.to_scale_rotation_translation();
    let (z, _, _) = rotation.to_euler(EulerRot::ZYX);
    (
        [translation.x, translation.y, 0.0],
        [0.0, 0.0, z],
        [scale.x, scale.y, 1.0],
    )
}

impl<'a> ShaderBuilder<'a, '_> {
    /// Build the node for a texture plugin. `None` when the texture has no
    /// host counterpart and the socket keeps its constant value.
    pub(super) fn texture(&mut self, tex: &'a Props) -> Result<Option<(String, &'static str)>> {
        match tex.plugin() {
            "bitmap" | "udim_texture" => Ok(self.image_texture(tex)),
            "checkerboard" => self.checkerboard(tex).map(Some),
            "mesh_attribute" => Ok(self.vertex_color(tex)),
            other => {
                self.report.warn(format!(
                    "material '{}': texture '{other}' is not supported",
                    self.material
                ));
                tex.mark_all_queried();
                Ok(None)
            }
        }
    }

    fn image_texture(&mut self, tex: &'a Props) -> Option<(String, &'static str)> {
        let key = ImageData::from_props(tex)?.key();
        let Some(image) = self.images.get(&key).cloned() else {
            self.report.warn(format!(
                "material '{}': image {key} is unavailable; using a constant",
                self.material
            ));
            tex.mark_all_queried();
            return None;
        };
        // Tiles share their sampling settings; the first one speaks for all.
        let sampling = if tex.plugin() == "udim_texture" {
            let tiles: Vec<&Props> = tex
                .iter()
                .filter_map(|(_, v)| match v {
                    Value::Bag(tile) => Some(tile),
                    _ => None,
                })
                .collect();
            for tile in tiles.iter().skip(1) {
                tile.mark_all_queried();
            }
            tiles.first().copied().unwrap_or(tex)
        } else {
            tex
        };
        let node = Node::new(types::TEX_IMAGE, "Image Texture")
            .with_param("image", json!(image))
            .with_param("interpolation", json!(interpolation(sampling.string("filter_type"))))
            .with_param("extension", json!(extension(sampling.string("wrap_mode"))));
        sampling.mark_queried("raw");
        let name = self.tree.add_node(node);
        if let Some(to_uv) = tex.transform("to_uv") {
            self.mapping(&name, to_uv);
        }
        Some((name, "Color"))
    }

    /// Mapping and UV coordinate nodes in front of `target`.
    fn mapping(&mut self, target: &str, to_uv: Transform) {
        if to_uv.approx_eq(&Transform::IDENTITY, 1e-6) {
            return;
        }
        let (location, rotation, scale) = uv_mapping(to_uv.matrix());
        let mapping = self.tree.add_node(
            Node::new(types::MAPPING, "Mapping")
                .with_param("vector_type", json!("POINT"))
                .with_input("Location", vec3_json(location))
                .with_input("Rotation", vec3_json(rotation))
                .with_input("Scale", vec3_json(scale)),
        );
        let coords = self.tree.add_node(Node::new(types::TEX_COORD, "Texture Coordinate"));
        self.tree.link(&coords, "UV", &mapping, "Vector");
        self.tree.link(&mapping, "Vector", target, "Vector");
    }

    fn checkerboard(&mut self, tex: &'a Props) -> Result<(String, &'static str)> {
        let node = self.tree.add_node(
            Node::new(types::TEX_CHECKER, "Checker Texture")
                .with_input("Color1", json!([0.4, 0.4, 0.4, 1.0]))
                .with_input("Color2", json!([0.2, 0.2, 0.2, 1.0])),
        );
        self.set_color(&node, "Color1", tex.get("color0"))?;
        self.set_color(&node, "Color2", tex.get("color1"))?;
        let to_uv = tex.transform("to_uv").unwrap_or(Transform::IDENTITY).matrix();
        let (scale, rotation, translation) = to_uv.to_scale_rotation_translation();
        let pure_scale = (scale.x - scale.y).abs() < 1e-5
            && rotation.abs_diff_eq(glam::Quat::IDENTITY, 1e-5)
            && translation.abs_diff_eq(Vec3::ZERO, 1e-5);
        if !pure_scale {
            self.report.warn(format!(
                "material '{}': checkerboard mapping beyond a uniform scale is not imported",
                self.material
            ));
        }
        self.tree.set_input(&node, "Scale", json!(2.0 * scale.x));
        Ok((node, "Color"))
    }

    fn vertex_color(&mut self, tex: &'a Props) -> Option<(String, &'static str)> {
        let name = tex.string("name").unwrap_or_default();
        let Some(layer) = name.strip_prefix("vertex_") else {
            self.report.warn(format!(
                "material '{}': mesh attribute '{name}' is not a vertex colour",
                self.material
            ));
            return None;
        };
        let node = self.tree.add_node(
            Node::new(types::VERTEX_COLOR, "Color Attribute").with_param("layer_name", json!(layer)),
        );
        Some((node, "Color"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udim_pattern_replaces_the_last_tile_number() {
        assert_eq!(tile_pattern("tex/a1001.1001.png", 1001), "tex/a1001.<UDIM>.png");
        assert_eq!(tile_pattern("wood.png", 1001), "wood.png");
    }

    #[test]
    fn tiles_are_sorted_and_keyed_by_pattern() {
        let udim = Props::new("udim_texture")
            .with("tile_1002", Props::new("bitmap").with("filename", "t/wood.1002.png"))
            .with("tile_1001", Props::new("bitmap").with("filename", "t/wood.1001.png"));
        let data = ImageData::from_props(&udim).unwrap();
        assert_eq!(data.key(), "udim:t/wood.<UDIM>.png");
        assert_eq!(data.display_name(), "wood.<UDIM>.png");
        let ImageData::Tiled { tiles, .. } = data else {
            panic!("expected tiles");
        };
        assert_eq!(tiles[0].0, 1001);
    }

    #[test]
    fn uv_mapping_inverts_translate_rotate_scale() {
        let m = Mat4::from_translation(Vec3::new(0.25, 0.5, 0.0))
            * Mat4::from_rotation_z(0.3)
            * Mat4::from_scale(Vec3::new(2.0, 3.0, 1.0));
        let (location, rotation, scale) = uv_mapping(m);
        assert!((location[0] - 0.25).abs() < 1e-5 && (location[1] - 0.5).abs() < 1e-5);
        assert!((rotation[2] - 0.3).abs() < 1e-5);
        assert!((scale[0] - 2.0).abs() < 1e-5 && (scale[1] - 3.0).abs() < 1e-5);
    }

    #[test]
    fn sampling_names_map_back() {
        assert_eq!(interpolation(Some("nearest")), "Closest");
        assert_eq!(interpolation(None), "Linear");
        assert_eq!(extension(Some("clamp")), "EXTEND");
        assert_eq!(extension(Some("repeat")), "REPEAT");
    }
}
