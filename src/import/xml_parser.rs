//! Renderer XML to a tree of property bags.
//!
//! The document root becomes a `scene` bag. Plugins with an `id` are keyed by
//! it, named children by their `name`, and anonymous children by `_arg_<n>`.
//! `<default>` declarations feed `$name` substitution in later attributes and
//! `<include>` splices another file's children in place.

use std::collections::HashMap;
use std::num::{ParseFloatError, ParseIntError};
use std::path::{Path, PathBuf};
use std::str::ParseBoolError;

use glam::{Mat3, Mat4, Vec3};
use log::{debug, warn};
use thiserror::Error;

use crate::export::xml::is_plugin_tag;
use crate::props::{Props, Spectrum, Transform, Value};

const MAX_INCLUDE_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("parse error: {0}")]
    Parse(#[from] roxmltree::Error),
    #[error("unexpected element <{tag}>")]
    UnexpectedElement { tag: String },
    #[error("<{tag}> is missing attribute '{attr}'")]
    MissingAttribute { tag: String, attr: &'static str },
    #[error("integer parse error: {0}")]
    ParseInt(#[from] ParseIntError),
    #[error("float parse error: {0}")]
    ParseFloat(#[from] ParseFloatError),
    #[error("boolean parse error: {0}")]
    ParseBool(#[from] ParseBoolError),
    #[error("invalid value format '{0}'")]
    InvalidValueFormat(String),
    #[error("undefined variable '${0}'")]
    UndefinedVariable(String),
    #[error("id '{0}' is declared twice")]
    DuplicateId(String),
    #[error("cannot read '{}': {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("includes nested too deeply at '{}'", .0.display())]
    IncludeDepth(PathBuf),
}

/// Split on commas and whitespace.
fn parse_floats(text: &str) -> Result<Vec<f32>, XmlError> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f32>().map_err(XmlError::from))
        .collect()
}

fn parse_vec3(text: &str) -> Result<[f32; 3], XmlError> {
    match parse_floats(text)?.as_slice() {
        [v] => Ok([*v; 3]),
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err(XmlError::InvalidValueFormat(text.to_string())),
    }
}

/// `r, g, b`, `r g b` or one replicated value.
pub fn parse_rgb(text: &str) -> Result<Spectrum, XmlError> {
    parse_vec3(text).map(Spectrum::Rgb)
}

/// A uniform value or `λ:v` pairs.
pub fn parse_spectrum(text: &str) -> Result<Spectrum, XmlError> {
    if !text.contains(':') {
        let v: f32 = text.trim().parse()?;
        return Ok(Spectrum::Uniform(v));
    }
    let mut wavelengths = Vec::new();
    let mut values = Vec::new();
    for pair in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (w, v) = pair
            .split_once(':')
            .ok_or_else(|| XmlError::InvalidValueFormat(text.to_string()))?;
        wavelengths.push(w.trim().parse::<f32>()?);
        values.push(v.trim().parse::<f32>()?);
    }
    Ok(Spectrum::Sampled {
        wavelengths,
        values,
    })
}

/// Typed value of a plugin attribute: three numbers are a colour, one a
/// float; anything else is a boolean or a string.
fn shorthand_value(text: &str) -> Value {
    if let Ok(floats) = parse_floats(text) {
        match floats.as_slice() {
            [v] => return Value::Float(*v),
            [r, g, b] => return Value::Spectrum(Spectrum::Rgb([*r, *g, *b])),
            _ => {}
        }
    }
    match parse_bool(text) {
        Ok(b) => Value::Bool(b),
        Err(_) => Value::String(text.to_string()),
    }
}

fn parse_bool(text: &str) -> Result<bool, XmlError> {
    Ok(text.trim().to_ascii_lowercase().parse::<bool>()?)
}

/// Camera-style look-at frame: +Z towards the target.
pub fn look_at(origin: Vec3, target: Vec3, up: Vec3) -> Result<Mat4, XmlError> {
    let dir = (target - origin).normalize_or_zero();
    let left = up.normalize_or_zero().cross(dir).normalize_or_zero();
    if dir == Vec3::ZERO || left == Vec3::ZERO {
        return Err(XmlError::InvalidValueFormat(format!(
            "lookat origin {origin} target {target} up {up}"
        )));
    }
    let new_up = dir.cross(left);
    Ok(Mat4::from_cols(
        left.extend(0.0),
        new_up.extend(0.0),
        dir.extend(0.0),
        origin.extend(1.0),
    ))
}

struct Parser {
    defaults: HashMap<String, String>,
    depth: usize,
}

impl Parser {
    fn substitute(&self, text: &str) -> Result<String, XmlError> {
        if !text.contains('$') {
            return Ok(text.to_string());
        }
        let mut out = String::with_capacity(text.len());
        let mut chars = text.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            let start = i + 1;
            let mut end = start;
            while let Some(&(j, n)) = chars.peek() {
                if n.is_ascii_alphanumeric() || n == '_' {
                    end = j + n.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            if end == start {
                out.push('$');
                continue;
            }
            let name = &text[start..end];
            let value = self
                .defaults
                .get(name)
                .ok_or_else(|| XmlError::UndefinedVariable(name.to_string()))?;
            out.push_str(value);
        }
        Ok(out)
    }

    fn attr(&self, node: roxmltree::Node, name: &str) -> Result<Option<String>, XmlError> {
        node.attribute(name).map(|v| self.substitute(v)).transpose()
    }

    fn required(&self, node: roxmltree::Node, name: &'static str) -> Result<String, XmlError> {
        self.attr(node, name)?.ok_or_else(|| XmlError::MissingAttribute {
            tag: node.tag_name().name().to_string(),
            attr: name,
        })
    }

    /// `x`/`y`/`z` attributes, or a `value` triple.
    fn xyz(&self, node: roxmltree::Node, default: f32) -> Result<[f32; 3], XmlError> {
        if let Some(value) = self.attr(node, "value")? {
            return parse_vec3(&value);
        }
        let mut out = [default; 3];
        for (slot, axis) in out.iter_mut().zip(["x", "y", "z"]) {
            if let Some(v) = self.attr(node, axis)? {
                *slot = v.trim().parse()?;
            }
        }
        Ok(out)
    }

    fn transform(&self, node: roxmltree::Node) -> Result<Transform, XmlError> {
        let mut m = Mat4::IDENTITY;
        for op in node.children().filter(|n| n.is_element()) {
            let step = match op.tag_name().name() {
                "translate" => Mat4::from_translation(Vec3::from(self.xyz(op, 0.0)?)),
                "scale" => Mat4::from_scale(Vec3::from(self.xyz(op, 1.0)?)),
                "rotate" => {
                    let axis = Vec3::from(self.xyz(op, 0.0)?);
                    let angle: f32 = self.required(op, "angle")?.trim().parse()?;
                    if axis == Vec3::ZERO {
                        return Err(XmlError::InvalidValueFormat("rotation about a zero axis".into()));
                    }
                    Mat4::from_axis_angle(axis.normalize(), angle.to_radians())
                }
                "matrix" => {
                    let text = self.required(op, "value")?;
                    let values = parse_floats(&text)?;
                    match values.len() {
                        16 => {
                            let mut rows = [0.0; 16];
                            rows.copy_from_slice(&values);
                            Transform::from_row_major(&rows).matrix()
                        }
                        9 => Mat4::from_mat3(Mat3::from_cols_slice(&values).transpose()),
                        _ => return Err(XmlError::InvalidValueFormat(text)),
                    }
                }
                "lookat" => {
                    let origin = parse_vec3(&self.required(op, "origin")?)?;
                    let target = parse_vec3(&self.required(op, "target")?)?;
                    let up = match self.attr(op, "up")? {
                        Some(up) => parse_vec3(&up)?,
                        None => [0.0, 1.0, 0.0],
                    };
                    look_at(Vec3::from(origin), Vec3::from(target), Vec3::from(up))?
                }
                other => {
                    warn!("unknown transform operation <{other}> skipped");
                    continue;
                }
            };
            m = step * m;
        }
        Ok(Transform(m))
    }

    /// The value a property element carries, `None` for elements that are
    /// not properties.
    fn property(&mut self, node: roxmltree::Node, dir: &Path) -> Result<Option<Value>, XmlError> {
        let tag = node.tag_name().name();
        let value = match tag {
            "float" => Value::Float(self.required(node, "value")?.trim().parse()?),
            "integer" => Value::Int(self.required(node, "value")?.trim().parse()?),
            "boolean" => Value::Bool(parse_bool(&self.required(node, "value")?)?),
            "string" => Value::String(self.required(node, "value")?),
            "point" | "vector" => Value::Point(self.xyz(node, 0.0)?),
            "rgb" => Value::Spectrum(parse_rgb(&self.required(node, "value")?)?),
            "spectrum" => match self.attr(node, "filename")? {
                Some(file) => Value::Spectrum(Spectrum::File(file)),
                None => Value::Spectrum(parse_spectrum(&self.required(node, "value")?)?),
            },
            "transform" => Value::Transform(self.transform(node)?),
            "ref" => Value::Ref(self.required(node, "id")?),
            _ if is_plugin_tag(tag) => Value::Bag(self.plugin(node, dir)?),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn plugin(&mut self, node: roxmltree::Node, dir: &Path) -> Result<Props, XmlError> {
        let plugin = self.required(node, "type")?;
        let mut props = Props::new(plugin);
        if let Some(id) = self.attr(node, "id")? {
            props.set_id(Some(id));
        }
        // `<bsdf type="diffuse" reflectance="0.2, 0.3, 0.4"/>` shorthand.
        for attr in node.attributes() {
            if matches!(attr.name(), "type" | "id" | "name") {
                continue;
            }
            let text = self.substitute(attr.value())?;
            props.set(attr.name(), shorthand_value(&text));
        }
        let mut anonymous = 0;
        self.children(node, &mut props, &mut anonymous, dir)?;
        Ok(props)
    }

    fn children(
        &mut self,
        node: roxmltree::Node,
        props: &mut Props,
        anonymous: &mut usize,
        dir: &Path,
    ) -> Result<(), XmlError> {
        for child in node.children().filter(|n| n.is_element()) {
            match child.tag_name().name() {
                "default" => {
                    let name = self.required(child, "name")?;
                    let value = self.required(child, "value")?;
                    // Earlier declarations win, like command-line overrides.
                    self.defaults.entry(name).or_insert(value);
                    continue;
                }
                "include" => {
                    let file = self.required(child, "filename")?;
                    self.include(&dir.join(file), props, anonymous)?;
                    continue;
                }
                _ => {}
            }
            let Some(value) = self.property(child, dir)? else {
                warn!("unknown element <{}> skipped", child.tag_name().name());
                continue;
            };
            let scene_id = match &value {
                Value::Bag(bag) if props.plugin() == "scene" => bag.id().map(str::to_string),
                _ => None,
            };
            let key = match self.attr(child, "name")?.or(scene_id) {
                Some(key) => key,
                None => {
                    let key = format!("_arg_{anonymous}");
                    *anonymous += 1;
                    key
                }
            };
            if props.contains(&key) {
                if props.plugin() == "scene" {
                    return Err(XmlError::DuplicateId(key));
                }
                warn!("'{}' sets '{key}' twice; the last value wins", props.plugin());
            }
            props.set(key, value);
        }
        Ok(())
    }

    fn include(&mut self, path: &Path, props: &mut Props, anonymous: &mut usize) -> Result<(), XmlError> {
        if self.depth >= MAX_INCLUDE_DEPTH {
            return Err(XmlError::IncludeDepth(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| XmlError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let doc = roxmltree::Document::parse(&text)?;
        let root = doc.root_element();
        if root.tag_name().name() != "scene" {
            return Err(XmlError::UnexpectedElement {
                tag: root.tag_name().name().to_string(),
            });
        }
        debug!("including {}", path.display());
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        self.depth += 1;
        let result = self.children(root, props, anonymous, dir);
        self.depth -= 1;
        result
    }
}

/// Parse a scene document. Includes resolve against `dir`.
pub fn parse_scene_str(text: &str, dir: &Path) -> Result<Props, XmlError> {
    let doc = roxmltree::Document::parse(text)?;
    let root = doc.root_element();
    if root.tag_name().name() != "scene" {
        return Err(XmlError::UnexpectedElement {
            tag: root.tag_name().name().to_string(),
        });
    }
    let mut parser = Parser {
        defaults: HashMap::new(),
        depth: 0,
    };
    let mut scene = Props::new("scene");
    if let Some(version) = parser.attr(root, "version")? {
        debug!("scene format version {version}");
    }
    let mut anonymous = 0;
    parser.children(root, &mut scene, &mut anonymous, dir)?;
    Ok(scene)
}

pub fn parse_scene_file(path: &Path) -> Result<Props, XmlError> {
    let text = std::fs::read_to_string(path).map_err(|source| XmlError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_scene_str(&text, dir)
}
