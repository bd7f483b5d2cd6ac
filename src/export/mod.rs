//! Host scene to renderer scene dictionary.
//!
//! Order matters: the integrator comes first, then the world, then every
//! material (so shapes can reference them), then shapes, cameras and lights.

pub mod camera;
pub mod context;
pub mod dict;
pub mod geometry;
pub mod lights;
pub mod materials;
pub mod render_settings;
pub mod world;
pub mod xml;

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, info};

use crate::config::ExportOptions;
use crate::host::{HostScene, ObjectInstance, ObjectKind};
use crate::report::Report;

pub use context::{ExportContext, ExportedMaterial};
pub use dict::SceneDict;

/// Result of an export.
#[derive(Debug, Clone)]
pub struct Exported {
    pub scene: SceneDict,
    /// Host object name to scene id.
    pub key_mapping: HashMap<String, String>,
    pub report: Report,
}

/// Instances that survive render visibility and the selection filter.
fn visible_instances(ctx: &ExportContext, host: &HostScene) -> Vec<ObjectInstance> {
    host.object_instances()
        .into_iter()
        .filter(|inst| {
            let Some(object) = host.objects.get(&inst.object) else {
                debug!("instance of unknown object '{}' skipped", inst.object);
                return false;
            };
            let parent = inst.parent.as_deref().and_then(|p| host.objects.get(p));
            if object.hide_render && !inst.is_instance {
                return false;
            }
            if parent.is_some_and(|p| p.hide_render) {
                return false;
            }
            !ctx.options.use_selection || object.select || parent.is_some_and(|p| p.select)
        })
        .collect()
}

fn export_materials(ctx: &mut ExportContext, host: &HostScene, instances: &[ObjectInstance]) {
    for inst in instances {
        let Some(object) = host.objects.get(&inst.object) else {
            continue;
        };
        if !object.kind.is_mesh_like() {
            continue;
        }
        for name in object.material_slots.iter().flatten() {
            match host.materials.get(name) {
                Some(material) => {
                    materials::export_material(ctx, host, material);
                }
                None => ctx
                    .report
                    .warn(format!("object '{}' uses missing material '{name}'", object.name)),
            }
        }
    }
}

fn export_object(ctx: &mut ExportContext, host: &HostScene, name: &str, instances: &[&ObjectInstance]) {
    let Some(object) = host.objects.get(name) else {
        return;
    };
    let result = match object.kind {
        kind if kind.is_mesh_like() => geometry::export_mesh_object(ctx, host, object, instances),
        ObjectKind::Camera => instances
            .iter()
            .try_for_each(|inst| camera::export_camera(ctx, host, object, inst.matrix_world)),
        ObjectKind::Light => instances
            .iter()
            .try_for_each(|inst| lights::export_light(ctx, host, object, inst.matrix_world)),
        ObjectKind::Curve => {
            ctx.report
                .warn(format!("curve object '{name}' is not supported; skipped"));
            Ok(())
        }
        _ => Ok(()),
    };
    if let Err(e) = result {
        ctx.report.error(format!("object '{name}' not exported: {e:#}"));
    }
}

/// Build the scene dictionary for `host`.
///
/// `output_dir` is where mesh and texture files go; `None` produces a
/// dictionary for an in-process renderer, with in-memory meshes and images
/// and only the active camera.
pub fn export_scene(
    host: &HostScene,
    options: ExportOptions,
    output_dir: Option<&Path>,
    source_dir: &Path,
) -> Result<Exported> {
    let in_process = output_dir.is_none();
    let mut ctx = ExportContext::new(options, output_dir.map(Path::to_path_buf), source_dir.to_path_buf())?;
    ctx.host_version = host.version;

    render_settings::export_integrator(&mut ctx, &host.render);
    world::export_world(&mut ctx, host);

    let instances = visible_instances(&ctx, host);
    export_materials(&mut ctx, host, &instances);

    let mut by_object: IndexMap<&str, Vec<&ObjectInstance>> = IndexMap::new();
    for inst in &instances {
        by_object.entry(inst.object.as_str()).or_default().push(inst);
    }
    let active = host.active_camera.as_deref();
    if let Some((name, cam)) = active.and_then(|a| by_object.get_key_value(a)) {
        export_object(&mut ctx, host, name, cam);
    }
    let mut deferred_cameras = Vec::new();
    for (name, insts) in &by_object {
        let is_camera = host
            .objects
            .get(*name)
            .is_some_and(|o| o.kind == ObjectKind::Camera);
        if is_camera {
            if Some(*name) != active && !in_process {
                deferred_cameras.push((*name, insts));
            }
            continue;
        }
        export_object(&mut ctx, host, name, insts);
    }
    for (name, insts) in deferred_cameras {
        export_object(&mut ctx, host, name, insts);
    }

    info!(
        "exported scene '{}': {} entries, {} warnings, {} errors",
        host.name,
        ctx.scene.len(),
        ctx.report.warnings.len(),
        ctx.report.errors.len()
    );
    Ok(Exported {
        scene: ctx.scene,
        key_mapping: ctx.key_mapping,
        report: ctx.report,
    })
}

/// Export `host` and write it as XML to `path`, with assets beside it.
pub fn export_to_xml(host: &HostScene, options: ExportOptions, path: &Path, source_dir: &Path) -> Result<Exported> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let (export_ids, split_files) = (options.export_ids, options.split_files);
    let mut exported = export_scene(host, options, Some(dir), source_dir)?;
    let mut report = Report::default();
    xml::write_xml(&exported.scene, path, export_ids, split_files, &mut report)
        .with_context(|| format!("failed to write scene xml {}", path.display()))?;
    exported.report.absorb(report);
    Ok(exported)
}
