//! Host mesh data as named attribute buffers.
//!
//! Attribute names moved between host releases (`co` became `position`,
//! `vertex_index` became `.corner_vert`, `use_smooth` became the inverted
//! `sharp_face`). [`MeshLayout`] picks the names for a host version and
//! [`Mesh::buffers`] resolves them, falling back to the other spelling.

use anyhow::{Result, anyhow, bail};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Point,
    Corner,
    Face,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum AttributeData {
    Float(Vec<f32>),
    Float2(Vec<[f32; 2]>),
    Float3(Vec<[f32; 3]>),
    Color(Vec<[f32; 4]>),
    Int(Vec<i32>),
    Bool(Vec<bool>),
}

impl AttributeData {
    pub fn len(&self) -> usize {
        match self {
            AttributeData::Float(v) => v.len(),
            AttributeData::Float2(v) => v.len(),
            AttributeData::Float3(v) => v.len(),
            AttributeData::Color(v) => v.len(),
            AttributeData::Int(v) => v.len(),
            AttributeData::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub domain: Domain,
    pub data: AttributeData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothAttribute {
    /// Per-face `true` when smooth shaded.
    UseSmooth(&'static str),
    /// Per-face `true` when flat shaded; missing means all smooth.
    SharpFace(&'static str),
}

/// Attribute names for one host release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshLayout {
    pub position: &'static str,
    pub corner_vert: &'static str,
    pub normal: &'static str,
    pub material_index: &'static str,
    pub smooth: SmoothAttribute,
}

impl MeshLayout {
    pub fn for_version(version: [u32; 3]) -> Self {
        let at_least = |major: u32, minor: u32| (version[0], version[1]) >= (major, minor);
        Self {
            position: if at_least(3, 5) { "position" } else { "co" },
            corner_vert: if at_least(3, 6) {
                ".corner_vert"
            } else {
                "vertex_index"
            },
            normal: "normal",
            material_index: "material_index",
            smooth: if at_least(4, 1) {
                SmoothAttribute::SharpFace("sharp_face")
            } else {
                SmoothAttribute::UseSmooth("use_smooth")
            },
        }
    }

    fn alternative(name: &str) -> Option<&'static str> {
        match name {
            "position" => Some("co"),
            "co" => Some("position"),
            ".corner_vert" => Some("vertex_index"),
            "vertex_index" => Some(".corner_vert"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SmoothBuffer<'a> {
    UseSmooth(&'a [bool]),
    SharpFace(&'a [bool]),
    AllSmooth,
    AllFlat,
}

impl SmoothBuffer<'_> {
    pub fn is_smooth(&self, face: usize) -> bool {
        match self {
            SmoothBuffer::UseSmooth(v) => v.get(face).copied().unwrap_or(false),
            SmoothBuffer::SharpFace(v) => !v.get(face).copied().unwrap_or(false),
            SmoothBuffer::AllSmooth => true,
            SmoothBuffer::AllFlat => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ColorBuffer<'a> {
    Point(&'a [[f32; 4]]),
    Corner(&'a [[f32; 4]]),
}

impl ColorBuffer<'_> {
    pub fn at(&self, vertex: usize, corner: usize) -> [f32; 3] {
        let c = match self {
            ColorBuffer::Point(v) => v.get(vertex),
            ColorBuffer::Corner(v) => v.get(corner),
        };
        c.map(|c| [c[0], c[1], c[2]]).unwrap_or([0.0; 3])
    }
}

/// Borrowed view of the buffers the geometry translator consumes.
#[derive(Debug, Clone)]
pub struct MeshBuffers<'a> {
    pub positions: &'a [[f32; 3]],
    pub corner_verts: &'a [i32],
    pub loop_triangles: &'a [[u32; 3]],
    pub loop_triangle_polygons: &'a [u32],
    pub normals: Option<&'a [[f32; 3]]>,
    pub uv: Option<&'a [[f32; 2]]>,
    pub material_index: Option<&'a [i32]>,
    pub smooth: SmoothBuffer<'a>,
    pub colors: Vec<(&'a str, ColorBuffer<'a>)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub name: String,
    #[serde(default)]
    pub attributes: IndexMap<String, Attribute>,
    /// Triangulated corners (indices into the corner domain).
    #[serde(default)]
    pub loop_triangles: Vec<[u32; 3]>,
    /// Face index of every loop triangle.
    #[serde(default)]
    pub loop_triangle_polygons: Vec<u32>,
    #[serde(default)]
    pub polygon_count: usize,
    /// Names of the float2 corner attributes that are UV maps.
    #[serde(default)]
    pub uv_layers: Vec<String>,
    #[serde(default)]
    pub active_render_uv: Option<String>,
    /// Names of the colour attributes.
    #[serde(default)]
    pub color_attributes: Vec<String>,
}

impl Mesh {
    fn lookup(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name).or_else(|| {
            MeshLayout::alternative(name).and_then(|alt| self.attributes.get(alt))
        })
    }

    /// The UV layer used for rendering, plus the names of layers that are
    /// ignored.
    pub fn render_uv_layer(&self) -> (Option<&str>, Vec<&str>) {
        let active = self
            .active_render_uv
            .as_deref()
            .filter(|n| self.uv_layers.iter().any(|l| l == n))
            .or_else(|| self.uv_layers.first().map(String::as_str));
        let ignored = self
            .uv_layers
            .iter()
            .map(String::as_str)
            .filter(|n| Some(*n) != active)
            .collect();
        (active, ignored)
    }

    pub fn buffers(&self, layout: &MeshLayout) -> Result<MeshBuffers<'_>> {
        let positions = match self.lookup(layout.position) {
            Some(Attribute {
                data: AttributeData::Float3(v),
                ..
            }) => v.as_slice(),
            Some(_) => bail!("mesh '{}': '{}' is not a float3 attribute", self.name, layout.position),
            None => bail!("mesh '{}' has no '{}' attribute", self.name, layout.position),
        };
        let corner_verts = match self.lookup(layout.corner_vert) {
            Some(Attribute {
                data: AttributeData::Int(v),
                ..
            }) => v.as_slice(),
            _ => bail!("mesh '{}' has no integer '{}' attribute", self.name, layout.corner_vert),
        };
        let normals = match self.lookup(layout.normal) {
            Some(Attribute {
                domain: Domain::Point,
                data: AttributeData::Float3(v),
            }) => Some(v.as_slice()),
            _ => None,
        };
        let material_index = match self.lookup(layout.material_index) {
            Some(Attribute {
                data: AttributeData::Int(v),
                ..
            }) => Some(v.as_slice()),
            _ => None,
        };
        let smooth = match layout.smooth {
            SmoothAttribute::UseSmooth(name) => match self.lookup(name) {
                Some(Attribute {
                    data: AttributeData::Bool(v),
                    ..
                }) => SmoothBuffer::UseSmooth(v),
                _ => match self.lookup("sharp_face") {
                    Some(Attribute {
                        data: AttributeData::Bool(v),
                        ..
                    }) => SmoothBuffer::SharpFace(v),
                    _ => SmoothBuffer::AllFlat,
                },
            },
            SmoothAttribute::SharpFace(name) => match self.lookup(name) {
                Some(Attribute {
                    data: AttributeData::Bool(v),
                    ..
                }) => SmoothBuffer::SharpFace(v),
                _ => match self.lookup("use_smooth") {
                    Some(Attribute {
                        data: AttributeData::Bool(v),
                        ..
                    }) => SmoothBuffer::UseSmooth(v),
                    _ => SmoothBuffer::AllSmooth,
                },
            },
        };
        let (uv_name, _) = self.render_uv_layer();
        let uv = match uv_name.and_then(|n| self.attributes.get(n)) {
            Some(Attribute {
                domain: Domain::Corner,
                data: AttributeData::Float2(v),
            }) => Some(v.as_slice()),
            _ => None,
        };
        let colors = self
            .color_attributes
            .iter()
            .filter_map(|name| match self.attributes.get(name) {
                Some(Attribute {
                    domain: Domain::Point,
                    data: AttributeData::Color(v),
                }) => Some((name.as_str(), ColorBuffer::Point(v))),
                Some(Attribute {
                    domain: Domain::Corner,
                    data: AttributeData::Color(v),
                }) => Some((name.as_str(), ColorBuffer::Corner(v))),
                _ => None,
            })
            .collect();

        if self.loop_triangle_polygons.len() != self.loop_triangles.len() {
            bail!(
                "mesh '{}': {} loop triangles but {} polygon indices",
                self.name,
                self.loop_triangles.len(),
                self.loop_triangle_polygons.len()
            );
        }

        Ok(MeshBuffers {
            positions,
            corner_verts,
            loop_triangles: &self.loop_triangles,
            loop_triangle_polygons: &self.loop_triangle_polygons,
            normals,
            uv,
            material_index,
            smooth,
            colors,
        })
    }
}

/// Builds a host mesh from polygons, fan-triangulating each face.
#[derive(Debug, Clone)]
pub struct MeshBuilder {
    layout: MeshLayout,
    name: String,
    positions: Vec<[f32; 3]>,
    normals: Option<Vec<[f32; 3]>>,
    corner_verts: Vec<i32>,
    uvs: Vec<[f32; 2]>,
    colors: IndexMap<String, Vec<[f32; 4]>>,
    loop_triangles: Vec<[u32; 3]>,
    loop_triangle_polygons: Vec<u32>,
    material_index: Vec<i32>,
    smooth: Vec<bool>,
}

impl MeshBuilder {
    pub fn new(name: impl Into<String>, version: [u32; 3]) -> Self {
        Self {
            layout: MeshLayout::for_version(version),
            name: name.into(),
            positions: Vec::new(),
            normals: None,
            corner_verts: Vec::new(),
            uvs: Vec::new(),
            colors: IndexMap::new(),
            loop_triangles: Vec::new(),
            loop_triangle_polygons: Vec::new(),
            material_index: Vec::new(),
            smooth: Vec::new(),
        }
    }

    pub fn vertices(mut self, positions: Vec<[f32; 3]>) -> Self {
        self.positions = positions;
        self
    }

    pub fn vertex_normals(mut self, normals: Vec<[f32; 3]>) -> Self {
        self.normals = Some(normals);
        self
    }

    /// Add a polygon. `uvs` and `colors` are per corner when given.
    pub fn polygon(
        &mut self,
        verts: &[u32],
        material_index: i32,
        smooth: bool,
        uvs: Option<&[[f32; 2]]>,
        colors: &[(&str, &[[f32; 4]])],
    ) -> Result<()> {
        if verts.len() < 3 {
            bail!("polygon needs at least 3 vertices, got {}", verts.len());
        }
        let face = self.material_index.len() as u32;
        let first_corner = self.corner_verts.len() as u32;
        for (i, v) in verts.iter().enumerate() {
            if *v as usize >= self.positions.len() {
                return Err(anyhow!("polygon references missing vertex {v}"));
            }
            self.corner_verts.push(*v as i32);
            self.uvs.push(uvs.and_then(|u| u.get(i)).copied().unwrap_or([0.0, 0.0]));
        }
        for (name, values) in colors {
            let layer = self.colors.entry(name.to_string()).or_default();
            layer.resize(first_corner as usize, [1.0; 4]);
            for i in 0..verts.len() {
                layer.push(values.get(i).copied().unwrap_or([1.0; 4]));
            }
        }
        for k in 1..verts.len() as u32 - 1 {
            self.loop_triangles
                .push([first_corner, first_corner + k, first_corner + k + 1]);
            self.loop_triangle_polygons.push(face);
        }
        self.material_index.push(material_index);
        self.smooth.push(smooth);
        Ok(())
    }

    pub fn with_uvs(&self) -> bool {
        self.uvs.iter().any(|uv| *uv != [0.0, 0.0])
    }

    pub fn build(self, keep_uvs: bool) -> Mesh {
        let mut attributes = IndexMap::new();
        attributes.insert(
            self.layout.position.to_string(),
            Attribute {
                domain: Domain::Point,
                data: AttributeData::Float3(self.positions),
            },
        );
        attributes.insert(
            self.layout.corner_vert.to_string(),
            Attribute {
                domain: Domain::Corner,
                data: AttributeData::Int(self.corner_verts.clone()),
            },
        );
        if let Some(normals) = self.normals {
            attributes.insert(
                self.layout.normal.to_string(),
                Attribute {
                    domain: Domain::Point,
                    data: AttributeData::Float3(normals),
                },
            );
        }
        attributes.insert(
            self.layout.material_index.to_string(),
            Attribute {
                domain: Domain::Face,
                data: AttributeData::Int(self.material_index.clone()),
            },
        );
        match self.layout.smooth {
            SmoothAttribute::UseSmooth(name) => {
                attributes.insert(
                    name.to_string(),
                    Attribute {
                        domain: Domain::Face,
                        data: AttributeData::Bool(self.smooth.clone()),
                    },
                );
            }
            SmoothAttribute::SharpFace(name) => {
                attributes.insert(
                    name.to_string(),
                    Attribute {
                        domain: Domain::Face,
                        data: AttributeData::Bool(self.smooth.iter().map(|s| !s).collect()),
                    },
                );
            }
        }
        let mut uv_layers = Vec::new();
        if keep_uvs {
            attributes.insert(
                "UVMap".to_string(),
                Attribute {
                    domain: Domain::Corner,
                    data: AttributeData::Float2(self.uvs),
                },
            );
            uv_layers.push("UVMap".to_string());
        }
        let corner_count = self.corner_verts.len();
        let mut color_attributes = Vec::new();
        for (name, mut values) in self.colors {
            values.resize(corner_count, [1.0; 4]);
            attributes.insert(
                name.clone(),
                Attribute {
                    domain: Domain::Corner,
                    data: AttributeData::Color(values),
                },
            );
            color_attributes.push(name);
        }
        Mesh {
            name: self.name,
            attributes,
            loop_triangles: self.loop_triangles,
            loop_triangle_polygons: self.loop_triangle_polygons,
            polygon_count: self.material_index.len(),
            active_render_uv: uv_layers.first().cloned(),
            uv_layers,
            color_attributes,
        }
    }
}
