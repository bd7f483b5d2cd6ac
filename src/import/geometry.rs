//! Renderer shapes to host meshes.

use std::f32::consts::{PI, TAU};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use glam::{Mat3, Mat4, Vec3};
use log::debug;

use crate::host::mesh::Mesh;
use crate::host::{MeshBuilder, Object, ObjectKind};
use crate::import::ImportContext;
use crate::ply::{ColorLayer, TriangleMesh, read_ply_file};
use crate::props::{Props, Transform, Value};

/// A shape's triangles in its own frame. `local` places the unit primitive
/// shapes (`sphere` center and radius) inside the shape's `to_world`.
#[derive(Debug, Clone)]
pub struct LoadedShape {
    pub mesh: TriangleMesh,
    pub local: Mat4,
    pub flat: bool,
}

fn load_obj(path: &Path, name: &str, flip_tex_coords: bool) -> Result<TriangleMesh> {
    let (models, _) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let mut out = TriangleMesh {
        name: name.to_string(),
        ..Default::default()
    };
    let mut normals = Vec::new();
    let mut uvs = Vec::new();
    let with_normals = models.iter().all(|m| !m.mesh.normals.is_empty());
    let with_uvs = models.iter().all(|m| !m.mesh.texcoords.is_empty());
    for model in &models {
        let m = &model.mesh;
        let base = out.positions.len() as u32;
        out.positions
            .extend(m.positions.chunks_exact(3).map(|p| [p[0], p[1], p[2]]));
        if with_normals {
            normals.extend(m.normals.chunks_exact(3).map(|n| [n[0], n[1], n[2]]));
        }
        if with_uvs {
            uvs.extend(m.texcoords.chunks_exact(2).map(|t| {
                if flip_tex_coords { [t[0], t[1]] } else { [t[0], 1.0 - t[1]] }
            }));
        }
        out.faces
            .extend(m.indices.chunks_exact(3).map(|f| [base + f[0], base + f[1], base + f[2]]));
    }
    if with_normals && !models.is_empty() {
        out.normals = Some(normals);
    }
    if with_uvs && !models.is_empty() {
        out.uvs = Some(uvs);
    }
    debug!("loaded {} ({} models, {} faces)", path.display(), models.len(), out.faces.len());
    Ok(out)
}

fn rectangle_mesh(name: &str) -> TriangleMesh {
    TriangleMesh {
        name: name.to_string(),
        positions: vec![[-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [1.0, 1.0, 0.0], [-1.0, 1.0, 0.0]],
        normals: None,
        uvs: Some(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
        colors: Vec::new(),
        faces: vec![[0, 1, 2], [0, 2, 3]],
    }
}

fn disk_mesh(name: &str, segments: u32) -> TriangleMesh {
    let mut positions = vec![[0.0, 0.0, 0.0]];
    let mut uvs = vec![[0.5, 0.5]];
    let mut faces = Vec::new();
    for i in 0..segments {
        let a = TAU * i as f32 / segments as f32;
        positions.push([a.cos(), a.sin(), 0.0]);
        uvs.push([0.5 + 0.5 * a.cos(), 0.5 + 0.5 * a.sin()]);
        faces.push([0, 1 + i, 1 + (i + 1) % segments]);
    }
    TriangleMesh {
        name: name.to_string(),
        positions,
        normals: None,
        uvs: Some(uvs),
        colors: Vec::new(),
        faces,
    }
}

fn cube_mesh(name: &str) -> TriangleMesh {
    let mut mesh = TriangleMesh {
        name: name.to_string(),
        ..Default::default()
    };
    for axis in 0..3 {
        for sign in [-1.0f32, 1.0] {
            let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
            let base = mesh.positions.len() as u32;
            for (a, b) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let mut p = [0.0; 3];
                p[axis] = sign;
                p[u] = a;
                p[v] = b * sign;
                mesh.positions.push(p);
            }
            mesh.faces.push([base, base + 1, base + 2]);
            mesh.faces.push([base, base + 2, base + 3]);
        }
    }
    mesh
}

fn sphere_mesh(name: &str, rings: u32, segments: u32) -> TriangleMesh {
    let mut mesh = TriangleMesh {
        name: name.to_string(),
        ..Default::default()
    };
    let mut uvs = Vec::new();
    for r in 0..=rings {
        let theta = PI * r as f32 / rings as f32;
        for s in 0..=segments {
            let phi = TAU * s as f32 / segments as f32;
            let p = [theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos()];
            mesh.positions.push(p);
            uvs.push([s as f32 / segments as f32, 1.0 - r as f32 / rings as f32]);
        }
    }
    let stride = segments + 1;
    for r in 0..rings {
        for s in 0..segments {
            let a = r * stride + s;
            let b = a + stride;
            if r > 0 {
                mesh.faces.push([a, b, a + 1]);
            }
            if r + 1 < rings {
                mesh.faces.push([a + 1, b, b + 1]);
            }
        }
    }
    mesh.normals = Some(mesh.positions.clone());
    mesh.uvs = Some(uvs);
    mesh
}

fn flip_faces(mesh: &mut TriangleMesh) {
    for f in &mut mesh.faces {
        f.swap(1, 2);
    }
    if let Some(normals) = &mut mesh.normals {
        for n in normals {
            *n = n.map(|c| -c);
        }
    }
}

/// Load the triangles of a shape plugin. `None` when the shape is skipped;
/// the reason is already reported.
pub fn load_shape(ctx: &mut ImportContext, props: &Props, name: &str) -> Result<Option<LoadedShape>> {
    let mut local = Mat4::IDENTITY;
    let face_normals = props.bool("face_normals").unwrap_or(false);
    let (mut mesh, flat) = match props.plugin() {
        "ply" => {
            let path = ctx.resolve_path(props.require_string("filename")?);
            match read_ply_file(&path) {
                Ok(mut mesh) => {
                    if let Some(uvs) = &mut mesh.uvs {
                        for uv in uvs {
                            uv[1] = 1.0 - uv[1];
                        }
                    }
                    (mesh, face_normals)
                }
                Err(e) => {
                    ctx.report.error(format!("shape '{name}': {e:#}"));
                    return Ok(None);
                }
            }
        }
        "obj" => {
            let path = ctx.resolve_path(props.require_string("filename")?);
            let flip = props.bool("flip_tex_coords").unwrap_or(true);
            match load_obj(&path, name, flip) {
                Ok(mesh) => (mesh, face_normals),
                Err(e) => {
                    ctx.report.error(format!("shape '{name}': {e:#}"));
                    return Ok(None);
                }
            }
        }
        "mesh" => match props.get("data") {
            Some(Value::Mesh(data)) => (data.as_ref().clone(), face_normals),
            _ => return Err(anyhow!("in-memory mesh '{name}' carries no data")),
        },
        "sphere" => {
            let center = props.point("center").unwrap_or([0.0; 3]);
            let radius = props.float_or("radius", 1.0);
            local = Mat4::from_translation(Vec3::from(center)) * Mat4::from_scale(Vec3::splat(radius));
            (sphere_mesh(name, 16, 32), false)
        }
        "cube" => (cube_mesh(name), true),
        "rectangle" => (rectangle_mesh(name), true),
        "disk" => (disk_mesh(name, 64), true),
        other => {
            ctx.report
                .warn(format!("shape '{name}': '{other}' shapes are not supported; skipped"));
            props.mark_all_queried();
            return Ok(None);
        }
    };
    if props.bool("flip_normals").unwrap_or(false) {
        flip_faces(&mut mesh);
    }
    if mesh.faces.is_empty() {
        ctx.report.warn(format!("shape '{name}' has no faces; skipped"));
        return Ok(None);
    }
    Ok(Some(LoadedShape { mesh, local, flat }))
}

/// One triangle mesh placed into a combined host mesh.
#[derive(Debug, Clone, Copy)]
pub struct Part<'m> {
    pub mesh: &'m TriangleMesh,
    pub transform: Mat4,
    pub slot: i32,
    pub flat: bool,
}

/// Area-weighted vertex normals.
fn computed_normals(mesh: &TriangleMesh) -> Vec<[f32; 3]> {
    let mut acc = vec![Vec3::ZERO; mesh.positions.len()];
    for f in &mesh.faces {
        let [a, b, c] = f.map(|i| Vec3::from(mesh.positions[i as usize]));
        let n = (b - a).cross(c - a);
        for i in f {
            acc[*i as usize] += n;
        }
    }
    acc.into_iter().map(|n| n.normalize_or_zero().to_array()).collect()
}

fn layer_corners(layer: &ColorLayer, face: [u32; 3]) -> Vec<[f32; 4]> {
    face.iter()
        .map(|&v| {
            let [r, g, b] = layer.values.get(v as usize).copied().unwrap_or([1.0; 3]);
            [r, g, b, 1.0]
        })
        .collect()
}

/// Combine parts into one host mesh. Each part's faces take its material slot.
pub fn build_host_mesh(name: &str, version: [u32; 3], parts: &[Part]) -> Result<Mesh> {
    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let any_smooth = parts.iter().any(|p| !p.flat);
    let keep_uvs = parts.iter().any(|p| p.mesh.uvs.is_some());
    for part in parts {
        let normal_matrix = Mat3::from_mat4(part.transform).inverse().transpose();
        positions.extend(
            part.mesh
                .positions
                .iter()
                .map(|p| part.transform.transform_point3(Vec3::from(*p)).to_array()),
        );
        if any_smooth {
            let local = match &part.mesh.normals {
                Some(n) if n.len() == part.mesh.positions.len() => n.clone(),
                _ => computed_normals(part.mesh),
            };
            normals.extend(
                local
                    .iter()
                    .map(|n| (normal_matrix * Vec3::from(*n)).normalize_or_zero().to_array()),
            );
        }
    }
    let mut builder = MeshBuilder::new(name, version).vertices(positions);
    if any_smooth {
        builder = builder.vertex_normals(normals);
    }
    let mut offset = 0u32;
    for part in parts {
        for face in &part.mesh.faces {
            let verts = face.map(|v| v + offset);
            let uvs: Option<Vec<[f32; 2]>> = part.mesh.uvs.as_ref().map(|uvs| {
                face.iter()
                    .map(|&v| uvs.get(v as usize).copied().unwrap_or([0.0, 0.0]))
                    .collect()
            });
            let corners: Vec<(String, Vec<[f32; 4]>)> = part
                .mesh
                .colors
                .iter()
                .map(|layer| (layer.name.clone(), layer_corners(layer, *face)))
                .collect();
            let colors: Vec<(&str, &[[f32; 4]])> =
                corners.iter().map(|(n, c)| (n.as_str(), c.as_slice())).collect();
            builder
                .polygon(&verts, part.slot, !part.flat, uvs.as_deref(), &colors)
                .with_context(|| format!("mesh '{name}'"))?;
        }
        offset += part.mesh.positions.len() as u32;
    }
    Ok(builder.build(keep_uvs))
}

/// Create the object for a standalone shape bound to `material`.
pub fn import_shape(ctx: &mut ImportContext, name: &str, props: &Props, material: Option<String>) -> Result<()> {
    let to_world = props.transform("to_world").unwrap_or(Transform::IDENTITY);
    let Some(shape) = load_shape(ctx, props, name)? else {
        return Ok(());
    };
    let part = Part {
        mesh: &shape.mesh,
        transform: Mat4::IDENTITY,
        slot: 0,
        flat: shape.flat,
    };
    let mesh = build_host_mesh(name, ctx.version(), &[part])?;
    let mesh = ctx.scene.add_mesh(mesh);
    let mut object = Object::new(name, ObjectKind::Mesh);
    object.data = Some(mesh);
    object.matrix_world = ctx.host_matrix(Transform(to_world.matrix() * shape.local));
    object.material_slots = material.into_iter().map(Some).collect();
    ctx.scene.add_object(object);
    Ok(())
}

/// A shape group's combined mesh and its material slots.
#[derive(Debug, Clone)]
pub struct GroupMesh {
    pub mesh: String,
    pub slots: Vec<Option<String>>,
}

/// Bake the members of a shape group into one host mesh.
pub fn import_group(
    ctx: &mut ImportContext,
    name: &str,
    members: &[(&Props, Option<String>)],
) -> Result<Option<GroupMesh>> {
    let mut slots: Vec<Option<String>> = Vec::new();
    let mut loaded = Vec::new();
    for (i, (props, material)) in members.iter().enumerate() {
        let member = format!("{name}.{i}");
        let to_world = props.transform("to_world").unwrap_or(Transform::IDENTITY);
        let Some(shape) = load_shape(ctx, props, &member)? else {
            continue;
        };
        let slot = match slots.iter().position(|s| s == material) {
            Some(k) => k,
            None => {
                slots.push(material.clone());
                slots.len() - 1
            }
        };
        loaded.push((shape, to_world.matrix(), slot as i32));
    }
    if loaded.is_empty() {
        ctx.report.warn(format!("shape group '{name}' has no usable shapes"));
        return Ok(None);
    }
    let parts: Vec<Part> = loaded
        .iter()
        .map(|(shape, to_world, slot)| Part {
            mesh: &shape.mesh,
            transform: *to_world * shape.local,
            slot: *slot,
            flat: shape.flat,
        })
        .collect();
    let mesh = build_host_mesh(name, ctx.version(), &parts)?;
    let mesh = ctx.scene.add_mesh(mesh);
    if slots.iter().all(Option::is_none) {
        slots.clear();
    }
    Ok(Some(GroupMesh { mesh, slots }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mesh::AttributeData;

    #[test]
    fn primitives_are_closed_and_consistently_sized() {
        let cube = cube_mesh("Cube");
        assert_eq!(cube.positions.len(), 24);
        assert_eq!(cube.faces.len(), 12);
        let disk = disk_mesh("Disk", 8);
        assert_eq!(disk.faces.len(), 8);
        assert!(disk.faces.iter().all(|f| f.iter().all(|&v| v < 9)));
        let sphere = sphere_mesh("Sphere", 4, 8);
        assert_eq!(sphere.faces.len(), 2 * 8 + 2 * 2 * 8);
    }

    #[test]
    fn cube_faces_point_outwards() {
        let cube = cube_mesh("Cube");
        for f in &cube.faces {
            let [a, b, c] = f.map(|i| Vec3::from(cube.positions[i as usize]));
            let n = (b - a).cross(c - a);
            let centre = (a + b + c) / 3.0;
            assert!(n.dot(centre) > 0.0);
        }
    }

    #[test]
    fn flipping_reverses_winding_and_normals() {
        let mut sphere = sphere_mesh("Sphere", 4, 8);
        let first = sphere.faces[0];
        flip_faces(&mut sphere);
        assert_eq!(sphere.faces[0], [first[0], first[2], first[1]]);
        let n = sphere.normals.as_ref().unwrap()[0];
        assert_eq!(n, [-0.0, -0.0, -1.0]);
    }

    #[test]
    fn parts_are_merged_with_their_slots() {
        let rect = rectangle_mesh("Rect");
        let parts = [
            Part {
                mesh: &rect,
                transform: Mat4::IDENTITY,
                slot: 0,
                flat: true,
            },
            Part {
                mesh: &rect,
                transform: Mat4::from_translation(Vec3::X * 3.0),
                slot: 1,
                flat: true,
            },
        ];
        let mesh = build_host_mesh("Both", [4, 2, 0], &parts).unwrap();
        assert_eq!(mesh.polygon_count, 4);
        let Some(AttributeData::Int(slots)) = mesh.attributes.get("material_index").map(|a| &a.data) else {
            panic!("missing material index");
        };
        assert_eq!(slots, &vec![0, 0, 1, 1]);
        let Some(AttributeData::Float3(positions)) = mesh.attributes.get("position").map(|a| &a.data) else {
            panic!("missing positions");
        };
        assert_eq!(positions[4], [2.0, -1.0, 0.0]);
    }
}
