//! Evaluated host meshes to renderer shapes.
//!
//! Every loop triangle becomes a renderer triangle. Corners are welded back
//! together when they agree on vertex, normal, UV and colours, so a smooth
//! mesh with one UV island keeps its host vertex count.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use glam::Vec3;
use log::debug;

use crate::export::context::{ExportContext, ExportedMaterial};
use crate::export::materials::material_id;
use crate::host::mesh::MeshBuffers;
use crate::host::{HostScene, Object, ObjectInstance};
use crate::ply::{ColorLayer, TriangleMesh, write_ply_file};
use crate::props::{Props, Value, sanitize_id};

/// One material's share of an evaluated mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub mesh: TriangleMesh,
    /// Every face is flat shaded; the renderer derives normals per face.
    pub face_normals: bool,
}

/// Restrict a partition to faces using material slot `slot` of `slot_count`.
/// Out-of-range indices fall into the last slot, as the host renders them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotFilter {
    pub slot: usize,
    pub slot_count: usize,
}

impl SlotFilter {
    fn accepts(&self, material_index: i32) -> bool {
        let last = self.slot_count.saturating_sub(1);
        (material_index.max(0) as usize).min(last) == self.slot
    }
}

fn corner_vertex(buffers: &MeshBuffers, corner: u32) -> Result<usize> {
    let v = buffers
        .corner_verts
        .get(corner as usize)
        .copied()
        .ok_or_else(|| anyhow!("loop triangle references missing corner {corner}"))?;
    if v < 0 || v as usize >= buffers.positions.len() {
        bail!("corner {corner} references missing vertex {v}");
    }
    Ok(v as usize)
}

fn triangle_normal(buffers: &MeshBuffers, verts: [usize; 3]) -> Vec3 {
    let [a, b, c] = verts.map(|v| Vec3::from(buffers.positions[v]));
    (b - a).cross(c - a)
}

/// Area-weighted vertex normals for meshes that ship none.
fn computed_vertex_normals(buffers: &MeshBuffers) -> Result<Vec<Vec3>> {
    let mut normals = vec![Vec3::ZERO; buffers.positions.len()];
    for tri in buffers.loop_triangles {
        let verts = [
            corner_vertex(buffers, tri[0])?,
            corner_vertex(buffers, tri[1])?,
            corner_vertex(buffers, tri[2])?,
        ];
        let n = triangle_normal(buffers, verts);
        for v in verts {
            normals[v] += n;
        }
    }
    Ok(normals.into_iter().map(Vec3::normalize_or_zero).collect())
}

fn push_bits(key: &mut Vec<u32>, values: &[f32]) {
    key.extend(values.iter().map(|v| v.to_bits()));
}

/// Build the triangle soup for one partition of `buffers`.
///
/// UVs are flipped vertically: the host puts `v = 0` at the bottom of an
/// image, the renderer at the top.
pub fn build_partition(name: &str, buffers: &MeshBuffers, filter: Option<SlotFilter>) -> Result<Partition> {
    let material_of = |t: usize| -> i32 {
        let face = buffers.loop_triangle_polygons[t] as usize;
        buffers
            .material_index
            .and_then(|m| m.get(face))
            .copied()
            .unwrap_or(0)
    };
    let triangles: Vec<usize> = (0..buffers.loop_triangles.len())
        .filter(|&t| filter.is_none_or(|f| f.accepts(material_of(t))))
        .collect();
    let all_flat = triangles
        .iter()
        .all(|&t| !buffers.smooth.is_smooth(buffers.loop_triangle_polygons[t] as usize));
    let vertex_normals: Option<Vec<Vec3>> = match (all_flat, buffers.normals) {
        (true, _) => None,
        (false, Some(n)) => Some(n.iter().map(|n| Vec3::from(*n)).collect()),
        (false, None) => Some(computed_vertex_normals(buffers)?),
    };

    let mut mesh = TriangleMesh {
        name: name.to_string(),
        ..Default::default()
    };
    let mut normals = Vec::new();
    let mut uvs = Vec::new();
    let mut colors: Vec<Vec<[f32; 3]>> = vec![Vec::new(); buffers.colors.len()];
    let mut welded: HashMap<Vec<u32>, u32> = HashMap::new();

    for t in triangles {
        let corners = buffers.loop_triangles[t];
        let verts = [
            corner_vertex(buffers, corners[0])?,
            corner_vertex(buffers, corners[1])?,
            corner_vertex(buffers, corners[2])?,
        ];
        let smooth = buffers.smooth.is_smooth(buffers.loop_triangle_polygons[t] as usize);
        let face_normal = triangle_normal(buffers, verts).normalize_or_zero();
        let mut face = [0u32; 3];
        for i in 0..3 {
            let (corner, v) = (corners[i] as usize, verts[i]);
            let normal = vertex_normals.as_ref().map(|vn| {
                if smooth {
                    vn.get(v).copied().unwrap_or(face_normal)
                } else {
                    face_normal
                }
            });
            let uv = buffers.uv.map(|layer| {
                let [u, v] = layer.get(corner).copied().unwrap_or([0.0, 0.0]);
                [u, 1.0 - v]
            });
            let corner_colors: Vec<[f32; 3]> =
                buffers.colors.iter().map(|(_, c)| c.at(v, corner)).collect();

            let mut key = vec![v as u32];
            if let Some(n) = normal {
                push_bits(&mut key, &n.to_array());
            }
            if let Some(uv) = uv {
                push_bits(&mut key, &uv);
            }
            for c in &corner_colors {
                push_bits(&mut key, c);
            }
            face[i] = match welded.entry(key) {
                Entry::Occupied(e) => *e.get(),
                Entry::Vacant(e) => {
                    let index = mesh.positions.len() as u32;
                    mesh.positions.push(buffers.positions[v]);
                    if let Some(n) = normal {
                        normals.push(n.to_array());
                    }
                    if let Some(uv) = uv {
                        uvs.push(uv);
                    }
                    for (layer, c) in colors.iter_mut().zip(corner_colors) {
                        layer.push(c);
                    }
                    *e.insert(index)
                }
            };
        }
        mesh.faces.push(face);
    }

    if vertex_normals.is_some() {
        mesh.normals = Some(normals);
    }
    if buffers.uv.is_some() {
        mesh.uvs = Some(uvs);
    }
    mesh.colors = buffers
        .colors
        .iter()
        .zip(colors)
        .map(|((name, _), values)| ColorLayer {
            name: sanitize_id(name),
            values,
        })
        .collect();
    Ok(Partition {
        mesh,
        face_normals: all_flat,
    })
}

/// `<object>-<material>` per slot, numbering repeated materials `-001`, ...
pub fn partition_names(object: &str, slots: &[Option<String>]) -> Vec<Option<String>> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    slots
        .iter()
        .map(|slot| {
            slot.as_deref().map(|material| {
                let count = seen.entry(material).or_insert(0);
                let name = if *count == 0 {
                    format!("{object}-{material}")
                } else {
                    format!("{object}-{material}-{:03}", *count)
                };
                *count += 1;
                name
            })
        })
        .collect()
}

fn material_refs(ctx: &mut ExportContext, shape: &mut Props, material: Option<&str>) {
    let record = material.and_then(|m| ctx.exported_materials.get(&material_id(m)).cloned());
    let record = match (material, record) {
        (_, Some(record)) => record,
        (Some(m), None) => {
            ctx.report
                .warn(format!("material '{m}' was not exported; using the default BSDF"));
            ExportedMaterial {
                bsdf: Some(ctx.default_bsdf()),
                emitter: None,
            }
        }
        (None, None) => ExportedMaterial {
            bsdf: Some(ctx.default_bsdf()),
            emitter: None,
        },
    };
    let bsdf = match record.bsdf {
        Some(id) => id,
        None => ctx.empty_emitter_bsdf(),
    };
    shape.set("bsdf", Props::reference(bsdf));
    if let Some(emitter) = record.emitter {
        shape.set("emitter", emitter);
    }
}

/// Write or embed a partition. `None` when it has no faces or could not be
/// written.
fn shape_for_partition(
    ctx: &mut ExportContext,
    partition: Partition,
    file_stem: &str,
    material: Option<&str>,
) -> Option<Props> {
    if partition.mesh.face_count() == 0 {
        debug!("skipping empty mesh partition '{}'", partition.mesh.name);
        return None;
    }
    let mut shape = match (ctx.options.export_assets, ctx.mesh_dir()) {
        (true, Some(dir)) => {
            let path = dir.join(format!("{file_stem}.ply"));
            if let Err(e) = write_ply_file(&partition.mesh, &path) {
                ctx.report
                    .error(format!("failed to write mesh '{}': {e:#}", partition.mesh.name));
                return None;
            }
            Props::new("ply").with("filename", format!("meshes/{file_stem}.ply"))
        }
        _ => {
            let mut shape = Props::new("mesh");
            shape.set("data", Value::Mesh(Arc::new(partition.mesh)));
            shape
        }
    };
    if partition.face_normals {
        shape.set("face_normals", true);
    }
    material_refs(ctx, &mut shape, material);
    Some(shape)
}

fn is_instanced(scene: &HostScene, object: &Object, instances: &[&ObjectInstance]) -> bool {
    let parent_instancer = object
        .parent
        .as_deref()
        .and_then(|p| scene.objects.get(p))
        .is_some_and(|p| p.is_instancer);
    parent_instancer || instances.len() > 1 || instances.iter().any(|i| i.is_instance)
}

/// Export a mesh-like object and its instances.
pub fn export_mesh_object(
    ctx: &mut ExportContext,
    scene: &HostScene,
    object: &Object,
    instances: &[&ObjectInstance],
) -> Result<()> {
    let data = object
        .data
        .as_deref()
        .ok_or_else(|| anyhow!("object '{}' has no mesh data", object.name))?;
    let mesh = scene
        .meshes
        .get(data)
        .ok_or_else(|| anyhow!("object '{}' references missing mesh '{data}'", object.name))?;
    if mesh.loop_triangles.is_empty() {
        ctx.report
            .warn(format!("object '{}' has no faces; skipped", object.name));
        return Ok(());
    }
    let (_, ignored) = mesh.render_uv_layer();
    if !ignored.is_empty() {
        ctx.report.warn(format!(
            "object '{}': only the render UV map is exported, ignoring {}",
            object.name,
            ignored.join(", ")
        ));
    }
    let buffers = mesh.buffers(&scene.mesh_layout())?;

    let object_id = format!("mesh-{}", sanitize_id(&object.name));
    let slots = &object.material_slots;
    let used: Vec<(usize, &str)> = slots
        .iter()
        .enumerate()
        .filter_map(|(k, s)| s.as_deref().map(|m| (k, m)))
        .collect();
    let instanced = is_instanced(scene, object, instances);

    // Single shape, placed directly.
    if used.len() <= 1 && !instanced {
        let Some(instance) = instances.first() else {
            return Ok(());
        };
        let (filter, material) = match used.first() {
            Some((k, m)) => (
                Some(SlotFilter {
                    slot: *k,
                    slot_count: slots.len(),
                }),
                Some(*m),
            ),
            None => (None, None),
        };
        let partition = build_partition(&object.name, &buffers, filter)?;
        let stem = sanitize_id(&object.name);
        if let Some(mut shape) = shape_for_partition(ctx, partition, &stem, material) {
            shape.set("to_world", ctx.transform_matrix(instance.matrix_world));
            ctx.add_object(&object.name, shape, Some(&object_id), false);
        }
        return Ok(());
    }

    let mut group = Props::new("shapegroup");
    if used.is_empty() {
        let partition = build_partition(&object.name, &buffers, None)?;
        let stem = sanitize_id(&object.name);
        if let Some(shape) = shape_for_partition(ctx, partition, &stem, None) {
            group.set(stem, shape);
        }
    } else {
        let names = partition_names(&object.name, slots);
        for (k, material) in used {
            let Some(name) = names[k].as_deref() else {
                continue;
            };
            let filter = SlotFilter {
                slot: k,
                slot_count: slots.len(),
            };
            let partition = build_partition(name, &buffers, Some(filter))?;
            let stem = sanitize_id(name);
            if let Some(shape) = shape_for_partition(ctx, partition, &stem, Some(material)) {
                group.set(stem, shape);
            }
        }
    }
    if group.is_empty() {
        ctx.report
            .warn(format!("object '{}' produced no shapes", object.name));
        return Ok(());
    }
    if !ctx.add_object(&object.name, group, Some(&object_id), true) {
        return Ok(());
    }
    for (n, instance) in instances.iter().enumerate() {
        let bag = Props::new("instance")
            .with("shapegroup", Props::reference(object_id.clone()))
            .with("to_world", ctx.transform_matrix(instance.matrix_world));
        ctx.add_object(&format!("{}[{n}]", object.name), bag, None, false);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mesh::Mesh;
    use crate::host::{MeshBuilder, MeshLayout};

    fn two_quads(smooth: bool) -> Mesh {
        let mut b = MeshBuilder::new("Strip", [4, 2, 0]).vertices(vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
            [2.0, 0.0, 0.0],
            [2.0, 1.0, 0.0],
        ]);
        b.polygon(&[0, 1, 2, 3], 0, smooth, None, &[]).unwrap();
        b.polygon(&[1, 4, 5, 2], 1, smooth, None, &[]).unwrap();
        b.build(false)
    }

    #[test]
    fn flat_partitions_use_face_normals() {
        let mesh = two_quads(false);
        let buffers = mesh.buffers(&MeshLayout::for_version([4, 2, 0])).unwrap();
        let p = build_partition("Strip", &buffers, None).unwrap();
        assert!(p.face_normals);
        assert!(p.mesh.normals.is_none());
        assert_eq!(p.mesh.vertex_count(), 6);
        assert_eq!(p.mesh.face_count(), 4);
    }

    #[test]
    fn smooth_meshes_get_computed_normals() {
        let mesh = two_quads(true);
        let buffers = mesh.buffers(&MeshLayout::for_version([4, 2, 0])).unwrap();
        let p = build_partition("Strip", &buffers, None).unwrap();
        assert!(!p.face_normals);
        let normals = p.mesh.normals.unwrap();
        assert!(normals.iter().all(|n| (n[2] - 1.0).abs() < 1e-6));
    }

    #[test]
    fn slot_filter_splits_faces() {
        let mesh = two_quads(false);
        let buffers = mesh.buffers(&MeshLayout::for_version([4, 2, 0])).unwrap();
        let second = build_partition(
            "B",
            &buffers,
            Some(SlotFilter {
                slot: 1,
                slot_count: 2,
            }),
        )
        .unwrap();
        assert_eq!(second.mesh.face_count(), 2);
        assert_eq!(second.mesh.vertex_count(), 4);
        assert!(second.mesh.positions.iter().all(|p| p[0] >= 1.0));
    }

    #[test]
    fn uvs_are_flipped_and_split_seams() {
        let mut b = MeshBuilder::new("Quad", [4, 2, 0]).vertices(vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ]);
        let uvs = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        b.polygon(&[0, 1, 2, 3], 0, true, Some(&uvs), &[]).unwrap();
        let mesh = b.build(true);
        let buffers = mesh.buffers(&MeshLayout::for_version([4, 2, 0])).unwrap();
        let p = build_partition("Quad", &buffers, None).unwrap();
        let out = p.mesh.uvs.unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], [0.0, 1.0]);
    }

    #[test]
    fn repeated_materials_are_numbered() {
        let names = partition_names(
            "Obj",
            &[Some("MatA".into()), Some("MatB".into()), None, Some("MatA".into())],
        );
        assert_eq!(
            names,
            vec![
                Some("Obj-MatA".to_string()),
                Some("Obj-MatB".to_string()),
                None,
                Some("Obj-MatA-001".to_string())
            ]
        );
    }
}
