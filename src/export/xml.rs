//! Scene dictionary to renderer XML, optionally split per category.

use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use crate::export::dict::SceneDict;
use crate::props::{Props, Spectrum, Value};
use crate::report::Report;

pub const SCENE_VERSION: &str = "3.0.0";

/// Fragment files in include order.
pub const FRAGMENTS: [(&str, &str); 4] = [
    ("materials.xml", "materials"),
    ("geometry.xml", "geometry"),
    ("emitters.xml", "emitters"),
    ("cameras.xml", "cameras"),
];

/// XML element for a plugin name.
pub fn plugin_tag(plugin: &str) -> Option<&'static str> {
    Some(match plugin {
        "diffuse" | "twosided" | "conductor" | "roughconductor" | "dielectric"
        | "roughdielectric" | "thindielectric" | "principled" | "principledthin" | "blendbsdf"
        | "mask" | "bumpmap" | "normalmap" | "null" | "plastic" | "roughplastic" | "pplastic"
        | "polarizer" | "hair" | "measured" => "bsdf",
        "ply" | "obj" | "mesh" | "serialized" | "sphere" | "cube" | "rectangle" | "disk"
        | "cylinder" | "shapegroup" | "instance" => "shape",
        "area" | "point" | "spot" | "directional" | "constant" | "envmap" | "projector"
        | "directionalarea" => "emitter",
        "perspective" | "thinlens" | "orthographic" | "radiancemeter" | "irradiancemeter" => {
            "sensor"
        }
        "hdrfilm" | "specfilm" => "film",
        "independent" | "stratified" | "multijitter" | "orthogonal" | "ldsampler" => "sampler",
        "box" | "tent" | "gaussian" | "mitchell" | "catmullrom" | "lanczos" => "rfilter",
        "path" | "moment" | "direct" | "aov" | "volpath" | "volpathmis" | "ptracer" | "depth"
        | "stokes" => "integrator",
        "bitmap" | "checkerboard" | "mesh_attribute" | "udim_texture" => "texture",
        _ => return None,
    })
}

/// Element names that introduce a plugin.
pub const PLUGIN_TAGS: [&str; 10] = [
    "bsdf", "shape", "emitter", "sensor", "film", "sampler", "rfilter", "integrator", "texture", "medium",
];

pub fn is_plugin_tag(tag: &str) -> bool {
    PLUGIN_TAGS.contains(&tag)
}

/// Which fragment file a top-level plugin belongs to.
fn fragment_of(tag: &str) -> Option<&'static str> {
    match tag {
        "bsdf" | "texture" => Some("materials"),
        "shape" => Some("geometry"),
        "emitter" => Some("emitters"),
        "sensor" => Some("cameras"),
        _ => None,
    }
}

pub fn escape_xml_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn join<T: std::fmt::Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// `name="..."` unless the key is an anonymous argument.
fn name_attr(key: &str) -> String {
    if key.starts_with("_arg_") {
        String::new()
    } else {
        format!(" name=\"{}\"", escape_xml_attr(key))
    }
}

fn emit_value(out: &mut String, key: &str, value: &Value, indent: usize, report: &mut Report) {
    let pad = " ".repeat(indent);
    let name = name_attr(key);
    match value {
        Value::Bool(b) => out.push_str(&format!("{pad}<boolean{name} value=\"{b}\"/>\n")),
        Value::Int(i) => out.push_str(&format!("{pad}<integer{name} value=\"{i}\"/>\n")),
        Value::Float(f) => out.push_str(&format!("{pad}<float{name} value=\"{f}\"/>\n")),
        Value::String(s) => out.push_str(&format!(
            "{pad}<string{name} value=\"{}\"/>\n",
            escape_xml_attr(s)
        )),
        Value::Point(p) => out.push_str(&format!(
            "{pad}<point{name} x=\"{}\" y=\"{}\" z=\"{}\"/>\n",
            p[0], p[1], p[2]
        )),
        Value::Spectrum(s) => match s {
            // `<rgb>` has no unbounded attribute. Unbounded colours only occur
            // as emitter radiance, which the loader reads as unbounded anyway.
            Spectrum::Rgb(c) | Spectrum::Srgb { color: c, .. } => {
                out.push_str(&format!("{pad}<rgb{name} value=\"{}\"/>\n", join(c)))
            }
            Spectrum::Uniform(v) => {
                out.push_str(&format!("{pad}<spectrum{name} value=\"{v}\"/>\n"))
            }
            Spectrum::Sampled {
                wavelengths,
                values,
            } => {
                let pairs: Vec<String> = wavelengths
                    .iter()
                    .zip(values)
                    .map(|(w, v)| format!("{w}:{v}"))
                    .collect();
                out.push_str(&format!(
                    "{pad}<spectrum{name} value=\"{}\"/>\n",
                    pairs.join(", ")
                ))
            }
            Spectrum::File(path) => out.push_str(&format!(
                "{pad}<spectrum{name} filename=\"{}\"/>\n",
                escape_xml_attr(path)
            )),
        },
        Value::Transform(t) => {
            out.push_str(&format!("{pad}<transform{name}>\n"));
            out.push_str(&format!(
                "{pad}    <matrix value=\"{}\"/>\n",
                t.to_row_major()
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            ));
            out.push_str(&format!("{pad}</transform>\n"));
        }
        Value::Bag(child) => emit_plugin(out, Some(key), child.id(), child, indent, report),
        Value::Ref(id) => out.push_str(&format!(
            "{pad}<ref{name} id=\"{}\"/>\n",
            escape_xml_attr(id)
        )),
        Value::Bitmap(_) | Value::Mesh(_) => report.error(format!(
            "'{key}' holds in-memory {} data and cannot be written to XML",
            value.kind_name()
        )),
    }
}

fn emit_plugin(
    out: &mut String,
    key: Option<&str>,
    id: Option<&str>,
    props: &Props,
    indent: usize,
    report: &mut Report,
) {
    let Some(tag) = plugin_tag(props.plugin()) else {
        report.error(format!(
            "unknown plugin '{}' cannot be written to XML",
            props.plugin()
        ));
        return;
    };
    let pad = " ".repeat(indent);
    let mut open = format!("{pad}<{tag} type=\"{}\"", escape_xml_attr(props.plugin()));
    if let Some(id) = id {
        open.push_str(&format!(" id=\"{}\"", escape_xml_attr(id)));
    }
    if let Some(key) = key {
        open.push_str(&name_attr(key));
    }
    if props.is_empty() {
        out.push_str(&format!("{open}/>\n"));
        return;
    }
    out.push_str(&format!("{open}>\n"));
    for (k, v) in props.iter() {
        emit_value(out, k, v, indent + 4, report);
    }
    out.push_str(&format!("{pad}</{tag}>\n"));
}

fn open_scene() -> String {
    format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\n<scene version=\"{SCENE_VERSION}\">\n")
}

/// A rendered scene: the root document plus any split fragments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlDocument {
    pub root: String,
    pub fragments: Vec<(String, String)>,
}

pub fn render_xml(dict: &SceneDict, export_ids: bool, split_files: bool, report: &mut Report) -> XmlDocument {
    let mut root = open_scene();
    let mut parts: Vec<(&str, String)> = FRAGMENTS.iter().map(|(_, c)| (*c, String::new())).collect();
    for (id, entry) in dict.iter() {
        let id = (entry.keep_id || export_ids).then_some(id);
        let fragment = if split_files {
            plugin_tag(entry.props.plugin()).and_then(fragment_of)
        } else {
            None
        };
        let out = match fragment.and_then(|f| parts.iter_mut().find(|(c, _)| *c == f)) {
            Some((_, body)) => body,
            None => &mut root,
        };
        emit_plugin(out, None, id, &entry.props, 4, report);
        if fragment.is_none() {
            root.push('\n');
        }
    }
    let mut fragments = Vec::new();
    for ((file, _), (_, body)) in FRAGMENTS.iter().zip(parts) {
        if body.is_empty() {
            continue;
        }
        root.push_str(&format!("    <include filename=\"{file}\"/>\n"));
        fragments.push((file.to_string(), format!("{}{body}</scene>\n", open_scene())));
    }
    root.push_str("</scene>\n");
    XmlDocument { root, fragments }
}

/// Write the scene to `path`, fragments beside it.
pub fn write_xml(dict: &SceneDict, path: &Path, export_ids: bool, split_files: bool, report: &mut Report) -> Result<()> {
    let doc = render_xml(dict, export_ids, split_files, report);
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    for (file, body) in &doc.fragments {
        let fragment = dir.join(file);
        std::fs::write(&fragment, body)
            .with_context(|| format!("failed to write {}", fragment.display()))?;
    }
    std::fs::write(path, &doc.root).with_context(|| format!("failed to write {}", path.display()))?;
    info!(
        "wrote {} ({} entries, {} fragments)",
        path.display(),
        dict.len(),
        doc.fragments.len()
    );
    Ok(())
}
