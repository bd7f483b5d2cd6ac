//! Renderer-side property bags.
//!
//! A [`Props`] is one plugin description: a plugin name (`type`), an optional
//! id and an insertion-ordered set of named values. Values are primitives,
//! spectra, transforms, nested plugins or references to other plugins.
//!
//! Bags remember which keys were read so an importer can report parameters it
//! never looked at.

use std::cell::RefCell;
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose};
use glam::{Mat4, Vec3};
use indexmap::IndexMap;
use serde::ser::{Error as _, SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::ply::TriangleMesh;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropertyError {
    #[error("'{plugin}' is missing property '{key}'")]
    Missing { plugin: String, key: String },
    #[error("property '{key}' of '{plugin}' is {found}, expected {expected}")]
    WrongType {
        plugin: String,
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("unresolved reference '{0}'")]
    UnresolvedReference(String),
}

/// Tagged spectrum value.
#[derive(Debug, Clone, PartialEq)]
pub enum Spectrum {
    /// `{type: rgb, value: [r, g, b]}`
    Rgb([f32; 3]),
    /// `{type: srgb, color: [r, g, b], unbounded: bool}`
    Srgb { color: [f32; 3], unbounded: bool },
    /// `{type: spectrum, value: v}`
    Uniform(f32),
    /// `{type: spectrum, wavelengths: [...], values: [...]}`
    Sampled {
        wavelengths: Vec<f32>,
        values: Vec<f32>,
    },
    /// `{type: spectrum, filename: path}`
    File(String),
}

impl Spectrum {
    pub fn plugin_name(&self) -> &'static str {
        match self {
            Spectrum::Rgb(_) => "rgb",
            Spectrum::Srgb { .. } => "srgb",
            Spectrum::Uniform(_) | Spectrum::Sampled { .. } | Spectrum::File(_) => "spectrum",
        }
    }

    /// Tristimulus approximation. Sampled spectra average their values;
    /// file spectra cannot be resolved here.
    pub fn to_rgb(&self) -> Option<[f32; 3]> {
        match self {
            Spectrum::Rgb(c) => Some(*c),
            Spectrum::Srgb { color, .. } => Some(*color),
            Spectrum::Uniform(v) => Some([*v; 3]),
            Spectrum::Sampled { values, .. } if !values.is_empty() => {
                let avg = values.iter().sum::<f32>() / values.len() as f32;
                Some([avg; 3])
            }
            Spectrum::Sampled { .. } | Spectrum::File(_) => None,
        }
    }

    pub fn scaled(&self, s: f32) -> Spectrum {
        match self {
            Spectrum::Rgb(c) => Spectrum::Rgb(c.map(|x| x * s)),
            Spectrum::Srgb { color, unbounded } => Spectrum::Srgb {
                color: color.map(|x| x * s),
                unbounded: *unbounded,
            },
            Spectrum::Uniform(v) => Spectrum::Uniform(v * s),
            Spectrum::Sampled {
                wavelengths,
                values,
            } => Spectrum::Sampled {
                wavelengths: wavelengths.clone(),
                values: values.iter().map(|v| v * s).collect(),
            },
            Spectrum::File(f) => Spectrum::File(f.clone()),
        }
    }
}

/// A 4×4 transform stored row-major in documents and column-major in memory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform(pub Mat4);

impl Transform {
    pub const IDENTITY: Transform = Transform(Mat4::IDENTITY);

    pub fn matrix(&self) -> Mat4 {
        self.0
    }

    pub fn translation(&self) -> Vec3 {
        self.0.w_axis.truncate()
    }

    /// Row-major element list, the order used by `<matrix value="...">`.
    pub fn to_row_major(&self) -> [f32; 16] {
        self.0.transpose().to_cols_array()
    }

    pub fn from_row_major(values: &[f32; 16]) -> Self {
        Transform(Mat4::from_cols_array(values).transpose())
    }

    pub fn approx_eq(&self, other: &Transform, eps: f32) -> bool {
        self.0.abs_diff_eq(other.0, eps)
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f32),
    String(String),
    Point([f32; 3]),
    Spectrum(Spectrum),
    Transform(Transform),
    Bag(Props),
    Ref(String),
    /// In-memory image handed to an in-process renderer.
    Bitmap(Arc<image::DynamicImage>),
    /// In-memory triangle mesh handed to an in-process renderer.
    Mesh(Arc<TriangleMesh>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Point(_) => "point",
            Value::Spectrum(_) => "spectrum",
            Value::Transform(_) => "transform",
            Value::Bag(_) => "plugin",
            Value::Ref(_) => "reference",
            Value::Bitmap(_) => "bitmap",
            Value::Mesh(_) => "mesh",
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f32),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Point(a), Value::Point(b)) => a == b,
            (Value::Spectrum(a), Value::Spectrum(b)) => a == b,
            (Value::Transform(a), Value::Transform(b)) => a == b,
            (Value::Bag(a), Value::Bag(b)) => a == b,
            (Value::Ref(a), Value::Ref(b)) => a == b,
            (Value::Bitmap(a), Value::Bitmap(b)) => Arc::ptr_eq(a, b),
            (Value::Mesh(a), Value::Mesh(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Spectrum> for Value {
    fn from(v: Spectrum) -> Self {
        Value::Spectrum(v)
    }
}

impl From<Transform> for Value {
    fn from(v: Transform) -> Self {
        Value::Transform(v)
    }
}

impl From<Props> for Value {
    fn from(v: Props) -> Self {
        Value::Bag(v)
    }
}

/// One renderer plugin description.
#[derive(Debug, Clone, Default)]
pub struct Props {
    plugin: String,
    id: Option<String>,
    fields: IndexMap<String, Value>,
    queried: RefCell<HashSet<String>>,
}

impl PartialEq for Props {
    fn eq(&self, other: &Self) -> bool {
        self.plugin == other.plugin && self.id == other.id && self.fields == other.fields
    }
}

impl Props {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            ..Default::default()
        }
    }

    pub fn reference(id: impl Into<String>) -> Value {
        Value::Ref(id.into())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn is_valid(&self) -> bool {
        !self.plugin.trim().is_empty()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }

    pub fn take_id(&mut self) -> Option<String> {
        self.id.take()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Iterate over fields without marking them as read.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Value)> {
        self.fields.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// Look up a field and mark it as read.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let v = self.fields.get(key)?;
        self.queried.borrow_mut().insert(key.to_string());
        Some(v)
    }

    pub fn mark_queried(&self, key: &str) {
        if self.fields.contains_key(key) {
            self.queried.borrow_mut().insert(key.to_string());
        }
    }

    /// Mark every field of this plugin and its nested plugins as read.
    pub fn mark_all_queried(&self) {
        let mut queried = self.queried.borrow_mut();
        for (key, value) in &self.fields {
            queried.insert(key.clone());
            if let Value::Bag(child) = value {
                child.mark_all_queried();
            }
        }
    }

    pub fn float(&self, key: &str) -> Option<f32> {
        self.get(key).and_then(Value::as_float)
    }

    pub fn float_or(&self, key: &str, default: f32) -> f32 {
        self.float(key).unwrap_or(default)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            Value::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn spectrum(&self, key: &str) -> Option<&Spectrum> {
        match self.get(key)? {
            Value::Spectrum(v) => Some(v),
            _ => None,
        }
    }

    pub fn point(&self, key: &str) -> Option<[f32; 3]> {
        match self.get(key)? {
            Value::Point(v) => Some(*v),
            _ => None,
        }
    }

    pub fn transform(&self, key: &str) -> Option<Transform> {
        match self.get(key)? {
            Value::Transform(v) => Some(*v),
            _ => None,
        }
    }

    pub fn bag(&self, key: &str) -> Option<&Props> {
        match self.get(key)? {
            Value::Bag(v) => Some(v),
            _ => None,
        }
    }

    pub fn reference_id(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            Value::Ref(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn require_float(&self, key: &str) -> Result<f32, PropertyError> {
        let v = self.require(key)?;
        v.as_float().ok_or_else(|| self.wrong_type(key, "float", v))
    }

    pub fn require_string(&self, key: &str) -> Result<&str, PropertyError> {
        match self.require(key)? {
            Value::String(s) => Ok(s.as_str()),
            other => Err(self.wrong_type(key, "string", other)),
        }
    }

    fn require(&self, key: &str) -> Result<&Value, PropertyError> {
        self.get(key).ok_or_else(|| PropertyError::Missing {
            plugin: self.plugin.clone(),
            key: key.to_string(),
        })
    }

    fn wrong_type(&self, key: &str, expected: &'static str, found: &Value) -> PropertyError {
        PropertyError::WrongType {
            plugin: self.plugin.clone(),
            key: key.to_string(),
            expected,
            found: found.kind_name(),
        }
    }

    /// Nested plugins and references in declaration order. Marks them read.
    pub fn children(&self) -> Vec<(&str, &Value)> {
        self.fields
            .iter()
            .filter(|(_, v)| matches!(v, Value::Bag(_) | Value::Ref(_)))
            .map(|(k, v)| {
                self.queried.borrow_mut().insert(k.clone());
                (k.as_str(), v)
            })
            .collect()
    }

    pub fn unqueried(&self) -> Vec<String> {
        let queried = self.queried.borrow();
        self.fields
            .keys()
            .filter(|k| !queried.contains(*k))
            .cloned()
            .collect()
    }

    /// Collect `path.key` entries for every field never read, recursing into
    /// nested plugins.
    pub fn audit(&self, path: &str, out: &mut Vec<String>) {
        for key in self.unqueried() {
            out.push(format!("{path}.{key}"));
        }
        for (key, value) in &self.fields {
            if let Value::Bag(child) = value {
                child.audit(&format!("{path}.{key}"), out);
            }
        }
    }
}

/// Replace every character the renderer's traversal API cannot carry in an id.
pub fn sanitize_id(id: &str) -> String {
    let mut out: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        out.push('_');
    }
    out
}

impl Serialize for Spectrum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.plugin_name())?;
        match self {
            Spectrum::Rgb(c) => map.serialize_entry("value", c)?,
            Spectrum::Srgb { color, unbounded } => {
                map.serialize_entry("color", color)?;
                map.serialize_entry("unbounded", unbounded)?;
            }
            Spectrum::Uniform(v) => map.serialize_entry("value", v)?,
            Spectrum::Sampled {
                wavelengths,
                values,
            } => {
                map.serialize_entry("wavelengths", wavelengths)?;
                map.serialize_entry("values", values)?;
            }
            Spectrum::File(f) => map.serialize_entry("filename", f)?,
        }
        map.end()
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f32(*v),
            Value::String(v) => serializer.serialize_str(v),
            Value::Point(v) => v.serialize(serializer),
            Value::Spectrum(v) => v.serialize(serializer),
            Value::Transform(t) => {
                let mut s = serializer.serialize_struct("Transform", 2)?;
                s.serialize_field("type", "transform")?;
                s.serialize_field("matrix", &t.to_row_major())?;
                s.end()
            }
            Value::Bag(p) => p.serialize(serializer),
            Value::Ref(id) => {
                let mut s = serializer.serialize_struct("Ref", 2)?;
                s.serialize_field("type", "ref")?;
                s.serialize_field("id", id)?;
                s.end()
            }
            Value::Bitmap(img) => {
                let mut bytes = Vec::new();
                img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
                    .map_err(S::Error::custom)?;
                let url = format!(
                    "data:image/png;base64,{}",
                    general_purpose::STANDARD.encode(bytes)
                );
                let mut s = serializer.serialize_struct("Bitmap", 2)?;
                s.serialize_field("type", "bitmap_data")?;
                s.serialize_field("data_url", &url)?;
                s.end()
            }
            Value::Mesh(mesh) => {
                let mut s = serializer.serialize_struct("Mesh", 3)?;
                s.serialize_field("type", "mesh_data")?;
                s.serialize_field("vertex_count", &mesh.positions.len())?;
                s.serialize_field("face_count", &mesh.faces.len())?;
                s.end()
            }
        }
    }
}

impl Serialize for Props {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 2))?;
        map.serialize_entry("type", &self.plugin)?;
        if let Some(id) = &self.id {
            map.serialize_entry("id", id)?;
        }
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_dots_and_spaces() {
        assert_eq!(sanitize_id("Cube.001"), "Cube_001");
        assert_eq!(sanitize_id("my mat"), "my_mat");
        assert_eq!(sanitize_id("mesh-A_b"), "mesh-A_b");
        assert_eq!(sanitize_id(""), "_");
    }

    #[test]
    fn reads_are_tracked() {
        let p = Props::new("diffuse")
            .with("reflectance", Spectrum::Rgb([0.5; 3]))
            .with("unused", 1.0f32);
        assert!(p.spectrum("reflectance").is_some());
        assert_eq!(p.unqueried(), vec!["unused".to_string()]);

        let mut found = Vec::new();
        let outer = Props::new("twosided").with("bsdf", p);
        outer.bag("bsdf");
        outer.audit("mat", &mut found);
        assert_eq!(found, vec!["mat.bsdf.unused".to_string()]);
    }

    #[test]
    fn typed_accessors_report_wrong_type() {
        let p = Props::new("ply").with("filename", 3i32);
        let err = p.require_string("filename").unwrap_err();
        assert!(matches!(err, PropertyError::WrongType { found: "integer", .. }));
        assert!(matches!(
            p.require_float("missing"),
            Err(PropertyError::Missing { .. })
        ));
    }

    #[test]
    fn transform_row_major_round_trip() {
        let t = Transform(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));
        let rows = t.to_row_major();
        assert_eq!(rows[3], 1.0);
        assert_eq!(rows[7], 2.0);
        assert_eq!(rows[11], 3.0);
        assert_eq!(Transform::from_row_major(&rows), t);
    }

    #[test]
    fn serializes_with_type_first() {
        let p = Props::new("diffuse").with("reflectance", Spectrum::Rgb([0.8, 0.8, 0.8]));
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["type"], "diffuse");
        assert_eq!(json["reflectance"]["type"], "rgb");
    }
}
