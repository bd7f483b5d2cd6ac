//! Triangle meshes and the Stanford PLY codec used for mesh sidecar files.
//!
//! Meshes are written as `binary_little_endian 1.0` with interleaved vertex
//! records (`x y z [nx ny nz] [u v] [<layer>_r <layer>_g <layer>_b]*`) and a
//! `uchar`/`int` face list. The reader also accepts ASCII and big-endian files
//! and polygon faces (fan-triangulated).

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use bytemuck::{Pod, Zeroable};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColorLayer {
    pub name: String,
    pub values: Vec<[f32; 3]>,
}

/// Renderer-side triangle soup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    pub name: String,
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub uvs: Option<Vec<[f32; 2]>>,
    pub colors: Vec<ColorLayer>,
    pub faces: Vec<[u32; 3]>,
}

impl TriangleMesh {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    fn floats_per_vertex(&self) -> usize {
        3 + self.normals.as_ref().map_or(0, |_| 3)
            + self.uvs.as_ref().map_or(0, |_| 2)
            + 3 * self.colors.len()
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FaceRecord {
    count: u8,
    indices: [u32; 3],
}

/// Encode `mesh` as binary PLY.
pub fn write_ply<W: Write>(mesh: &TriangleMesh, out: &mut W) -> Result<()> {
    let mut header = String::new();
    header.push_str("ply\nformat binary_little_endian 1.0\n");
    header.push_str(&format!("element vertex {}\n", mesh.positions.len()));
    for p in ["x", "y", "z"] {
        header.push_str(&format!("property float {p}\n"));
    }
    if mesh.normals.is_some() {
        for p in ["nx", "ny", "nz"] {
            header.push_str(&format!("property float {p}\n"));
        }
    }
    if mesh.uvs.is_some() {
        header.push_str("property float u\nproperty float v\n");
    }
    for layer in &mesh.colors {
        for c in ["r", "g", "b"] {
            header.push_str(&format!("property float {}_{c}\n", layer.name));
        }
    }
    header.push_str(&format!("element face {}\n", mesh.faces.len()));
    header.push_str("property list uchar int vertex_indices\nend_header\n");
    out.write_all(header.as_bytes())?;

    let n = mesh.positions.len();
    if let Some(normals) = &mesh.normals {
        if normals.len() != n {
            bail!("mesh '{}': {} normals for {n} vertices", mesh.name, normals.len());
        }
    }
    if let Some(uvs) = &mesh.uvs {
        if uvs.len() != n {
            bail!("mesh '{}': {} uvs for {n} vertices", mesh.name, uvs.len());
        }
    }
    for layer in &mesh.colors {
        if layer.values.len() != n {
            bail!(
                "mesh '{}': color layer '{}' has {} values for {n} vertices",
                mesh.name,
                layer.name,
                layer.values.len()
            );
        }
    }

    let mut words: Vec<u32> = Vec::with_capacity(n * mesh.floats_per_vertex());
    let mut push = |v: f32| words.push(v.to_bits().to_le());
    for i in 0..n {
        mesh.positions[i].iter().copied().for_each(&mut push);
        if let Some(normals) = &mesh.normals {
            normals[i].iter().copied().for_each(&mut push);
        }
        if let Some(uvs) = &mesh.uvs {
            uvs[i].iter().copied().for_each(&mut push);
        }
        for layer in &mesh.colors {
            layer.values[i].iter().copied().for_each(&mut push);
        }
    }
    out.write_all(bytemuck::cast_slice(&words))?;

    let faces: Vec<FaceRecord> = mesh
        .faces
        .iter()
        .map(|f| FaceRecord {
            count: 3,
            indices: [f[0].to_le(), f[1].to_le(), f[2].to_le()],
        })
        .collect();
    out.write_all(bytemuck::cast_slice(&faces))?;
    Ok(())
}

pub fn write_ply_file(mesh: &TriangleMesh, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut w = std::io::BufWriter::new(file);
    write_ply(mesh, &mut w).with_context(|| format!("failed to write {}", path.display()))?;
    w.flush()?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Ascii,
    LittleEndian,
    BigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl Scalar {
    fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "char" | "int8" => Scalar::I8,
            "uchar" | "uint8" => Scalar::U8,
            "short" | "int16" => Scalar::I16,
            "ushort" | "uint16" => Scalar::U16,
            "int" | "int32" => Scalar::I32,
            "uint" | "uint32" => Scalar::U32,
            "float" | "float32" => Scalar::F32,
            "double" | "float64" => Scalar::F64,
            other => bail!("unsupported PLY scalar type '{other}'"),
        })
    }

    fn size(self) -> usize {
        match self {
            Scalar::I8 | Scalar::U8 => 1,
            Scalar::I16 | Scalar::U16 => 2,
            Scalar::I32 | Scalar::U32 | Scalar::F32 => 4,
            Scalar::F64 => 8,
        }
    }

    fn is_integer(self) -> bool {
        !matches!(self, Scalar::F32 | Scalar::F64)
    }
}

#[derive(Debug, Clone)]
enum Property {
    Scalar { name: String, ty: Scalar },
    List { name: String, count: Scalar, item: Scalar },
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    count: usize,
    properties: Vec<Property>,
}

struct ValueReader<R> {
    inner: R,
    encoding: Encoding,
    tokens: std::vec::IntoIter<String>,
}

impl<R: BufRead> ValueReader<R> {
    fn read(&mut self, ty: Scalar) -> Result<f64> {
        match self.encoding {
            Encoding::Ascii => {
                let token = loop {
                    if let Some(t) = self.tokens.next() {
                        break t;
                    }
                    let mut line = String::new();
                    if self.inner.read_line(&mut line)? == 0 {
                        bail!("unexpected end of PLY data");
                    }
                    self.tokens = line
                        .split_whitespace()
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                        .into_iter();
                };
                token
                    .parse::<f64>()
                    .map_err(|e| anyhow!("bad PLY value '{token}': {e}"))
            }
            Encoding::LittleEndian | Encoding::BigEndian => {
                let mut buf = [0u8; 8];
                let bytes = &mut buf[..ty.size()];
                self.inner.read_exact(bytes)?;
                let le = self.encoding == Encoding::LittleEndian;
                macro_rules! decode {
                    ($t:ty) => {{
                        let arr = bytes.try_into().map_err(|_| anyhow!("short PLY read"))?;
                        if le {
                            <$t>::from_le_bytes(arr) as f64
                        } else {
                            <$t>::from_be_bytes(arr) as f64
                        }
                    }};
                }
                Ok(match ty {
                    Scalar::I8 => decode!(i8),
                    Scalar::U8 => decode!(u8),
                    Scalar::I16 => decode!(i16),
                    Scalar::U16 => decode!(u16),
                    Scalar::I32 => decode!(i32),
                    Scalar::U32 => decode!(u32),
                    Scalar::F32 => decode!(f32),
                    Scalar::F64 => decode!(f64),
                })
            }
        }
    }
}

/// Decode a PLY stream into a triangle mesh.
pub fn read_ply<R: Read>(input: R, name: &str) -> Result<TriangleMesh> {
    let mut reader = BufReader::new(input);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim() != "ply" {
        bail!("not a PLY file (missing magic)");
    }

    let mut encoding = None;
    let mut elements: Vec<Element> = Vec::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            bail!("PLY header is not terminated");
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["end_header"] => break,
            ["format", fmt, _version] => {
                encoding = Some(match *fmt {
                    "ascii" => Encoding::Ascii,
                    "binary_little_endian" => Encoding::LittleEndian,
                    "binary_big_endian" => Encoding::BigEndian,
                    other => bail!("unsupported PLY format '{other}'"),
                });
            }
            ["element", elem_name, count] => elements.push(Element {
                name: elem_name.to_string(),
                count: count.parse().context("bad PLY element count")?,
                properties: Vec::new(),
            }),
            ["property", "list", count, item, prop_name] => {
                let elem = elements
                    .last_mut()
                    .ok_or_else(|| anyhow!("PLY property before element"))?;
                elem.properties.push(Property::List {
                    name: prop_name.to_string(),
                    count: Scalar::parse(count)?,
                    item: Scalar::parse(item)?,
                });
            }
            ["property", ty, prop_name] => {
                let elem = elements
                    .last_mut()
                    .ok_or_else(|| anyhow!("PLY property before element"))?;
                elem.properties.push(Property::Scalar {
                    name: prop_name.to_string(),
                    ty: Scalar::parse(ty)?,
                });
            }
            ["comment", ..] | ["obj_info", ..] | [] => {}
            _ => bail!("unexpected PLY header line '{}'", line.trim()),
        }
    }
    let encoding = encoding.ok_or_else(|| anyhow!("PLY header has no format line"))?;

    let mut values = ValueReader {
        inner: reader,
        encoding,
        tokens: Vec::new().into_iter(),
    };
    let mut mesh = TriangleMesh {
        name: name.to_string(),
        ..Default::default()
    };

    for elem in &elements {
        match elem.name.as_str() {
            "vertex" => read_vertices(&mut values, elem, &mut mesh)?,
            "face" => read_faces(&mut values, elem, &mut mesh)?,
            _ => {
                for _ in 0..elem.count {
                    for prop in &elem.properties {
                        match prop {
                            Property::Scalar { ty, .. } => {
                                values.read(*ty)?;
                            }
                            Property::List { count, item, .. } => {
                                let n = values.read(*count)? as usize;
                                for _ in 0..n {
                                    values.read(*item)?;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    let n = mesh.positions.len() as u32;
    if let Some(bad) = mesh.faces.iter().flatten().find(|&&i| i >= n) {
        bail!("PLY face index {bad} out of range ({n} vertices)");
    }
    Ok(mesh)
}

fn read_vertices<R: BufRead>(
    values: &mut ValueReader<R>,
    elem: &Element,
    mesh: &mut TriangleMesh,
) -> Result<()> {
    let names: Vec<&str> = elem
        .properties
        .iter()
        .map(|p| match p {
            Property::Scalar { name, .. } | Property::List { name, .. } => name.as_str(),
        })
        .collect();
    let has = |n: &str| names.contains(&n);
    let has_normals = has("nx") && has("ny") && has("nz");
    let uv_names = [("u", "v"), ("s", "t"), ("texture_u", "texture_v")]
        .into_iter()
        .find(|(u, v)| has(u) && has(v));

    // Colour layers: `<layer>_r/_g/_b` plus the conventional `red/green/blue`.
    let mut layer_names: Vec<String> = Vec::new();
    for n in &names {
        if let Some(base) = n.strip_suffix("_r") {
            if has(&format!("{base}_g")) && has(&format!("{base}_b")) {
                layer_names.push(base.to_string());
            }
        }
    }
    let has_rgb = has("red") && has("green") && has("blue");
    if has_rgb {
        layer_names.push("Col".to_string());
    }

    let mut normals = Vec::with_capacity(if has_normals { elem.count } else { 0 });
    let mut uvs = Vec::with_capacity(if uv_names.is_some() { elem.count } else { 0 });
    let mut colors: Vec<Vec<[f32; 3]>> = vec![Vec::with_capacity(elem.count); layer_names.len()];

    let mut row: HashMap<&str, f64> = HashMap::new();
    for _ in 0..elem.count {
        row.clear();
        let mut integer_color = false;
        for prop in &elem.properties {
            match prop {
                Property::Scalar { name, ty } => {
                    let v = values.read(*ty)?;
                    if matches!(name.as_str(), "red" | "green" | "blue") && ty.is_integer() {
                        integer_color = true;
                    }
                    row.insert(name.as_str(), v);
                }
                Property::List { count, item, .. } => {
                    let n = values.read(*count)? as usize;
                    for _ in 0..n {
                        values.read(*item)?;
                    }
                }
            }
        }
        let get = |k: &str| row.get(k).copied().unwrap_or(0.0) as f32;
        mesh.positions.push([get("x"), get("y"), get("z")]);
        if has_normals {
            normals.push([get("nx"), get("ny"), get("nz")]);
        }
        if let Some((u, v)) = uv_names {
            uvs.push([get(u), get(v)]);
        }
        for (i, layer) in layer_names.iter().enumerate() {
            if has_rgb && layer == "Col" && i == layer_names.len() - 1 {
                let s = if integer_color { 1.0 / 255.0 } else { 1.0 };
                colors[i].push([get("red") * s, get("green") * s, get("blue") * s]);
            } else {
                colors[i].push([
                    get(&format!("{layer}_r")),
                    get(&format!("{layer}_g")),
                    get(&format!("{layer}_b")),
                ]);
            }
        }
    }

    if has_normals {
        mesh.normals = Some(normals);
    }
    if uv_names.is_some() {
        mesh.uvs = Some(uvs);
    }
    mesh.colors = layer_names
        .into_iter()
        .zip(colors)
        .map(|(name, values)| ColorLayer { name, values })
        .collect();
    Ok(())
}

fn read_faces<R: BufRead>(
    values: &mut ValueReader<R>,
    elem: &Element,
    mesh: &mut TriangleMesh,
) -> Result<()> {
    for _ in 0..elem.count {
        for prop in &elem.properties {
            match prop {
                Property::List { name, count, item }
                    if name == "vertex_indices" || name == "vertex_index" =>
                {
                    let n = values.read(*count)? as usize;
                    let mut poly = Vec::with_capacity(n);
                    for _ in 0..n {
                        poly.push(values.read(*item)? as u32);
                    }
                    for k in 1..n.saturating_sub(1) {
                        mesh.faces.push([poly[0], poly[k], poly[k + 1]]);
                    }
                }
                Property::List { count, item, .. } => {
                    let n = values.read(*count)? as usize;
                    for _ in 0..n {
                        values.read(*item)?;
                    }
                }
                Property::Scalar { ty, .. } => {
                    values.read(*ty)?;
                }
            }
        }
    }
    Ok(())
}

pub fn read_ply_file(path: &Path) -> Result<TriangleMesh> {
    let file =
        std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("mesh")
        .to_string();
    read_ply(file, &name).with_context(|| format!("failed to read {}", path.display()))
}
