//! Second import phase: create host data blocks in dependency order.

use std::collections::HashMap;

use anyhow::{Context, Result};
use log::{debug, error};

use crate::graph::topo_sort;
use crate::host::{Object, ObjectKind};
use crate::import::geometry::{GroupMesh, import_group, import_shape};
use crate::import::materials::ShaderBuilder;
use crate::import::textures::create_image;
use crate::import::tree::{ImportTree, NodeId, NodeKind};
use crate::import::{ImportContext, camera, lights, render_settings, world};
use crate::props::{Props, Transform, Value};
use crate::report::Report;

/// Host names of what has been created so far.
#[derive(Debug, Default)]
struct Instantiated {
    materials: HashMap<NodeId, String>,
    /// Image cache key to host image name.
    images: HashMap<String, String>,
    groups: HashMap<NodeId, GroupMesh>,
}

fn instantiate_node(ctx: &mut ImportContext, tree: &ImportTree, id: NodeId, done: &mut Instantiated) -> Result<()> {
    let node = tree.node(id);
    let name = node.name.as_str();
    match &node.kind {
        NodeKind::Scene => {}
        NodeKind::Image { key, data, raw } => {
            if let Some(image) = create_image(ctx, name, data, *raw) {
                done.images.insert(key.clone(), image);
            }
        }
        NodeKind::Material { bsdf, emitter } => {
            let builder = ShaderBuilder::new(name, &tree.resolver, &done.images, ctx.version());
            let (material, report) = builder.build(name, *bsdf, *emitter);
            ctx.report.absorb(report);
            let material = ctx.scene.add_material(material);
            done.materials.insert(id, material);
        }
        NodeKind::Shape(shape) => {
            let material = shape.material.and_then(|m| done.materials.get(&m).cloned());
            import_shape(ctx, name, shape.props, material)?;
        }
        NodeKind::ShapeGroup { members } => {
            let members: Vec<(&Props, Option<String>)> = members
                .iter()
                .map(|m| (m.props, m.material.and_then(|k| done.materials.get(&k).cloned())))
                .collect();
            if let Some(group) = import_group(ctx, name, &members)? {
                done.groups.insert(id, group);
            }
        }
        NodeKind::Instance { props, group } => {
            let to_world = props.transform("to_world").unwrap_or(Transform::IDENTITY);
            let Some(group) = done.groups.get(group) else {
                ctx.report
                    .warn(format!("instance '{name}' refers to an empty shape group; skipped"));
                return Ok(());
            };
            let mut object = Object::new(name, ObjectKind::Mesh);
            object.data = Some(group.mesh.clone());
            object.material_slots = group.slots.clone();
            object.matrix_world = ctx.host_matrix(to_world);
            ctx.scene.add_object(object);
        }
        NodeKind::Camera { props, active } => camera::import_camera(ctx, &tree.resolver, name, props, *active)?,
        NodeKind::Light { props } => lights::import_light(ctx, &tree.resolver, name, props)?,
        NodeKind::World { props } => world::import_world(ctx, name, props, &done.images)?,
        NodeKind::Integrator { props } => render_settings::import_integrator(ctx, props, &tree.resolver)?,
    }
    Ok(())
}

/// Instantiate every node of `tree`. The first failure aborts the import.
pub fn instantiate(tree: &ImportTree, ctx: &mut ImportContext) -> Result<()> {
    let ids: Vec<NodeId> = (0..tree.nodes.len()).collect();
    let order = topo_sort(&ids, &tree.edges)?;
    let mut done = Instantiated::default();
    for id in order {
        let node = tree.node(id);
        debug!("instantiating {} '{}'", node.kind.label(), node.name);
        let result = instantiate_node(ctx, tree, id, &mut done)
            .with_context(|| format!("failed to instantiate {} '{}'", node.kind.label(), node.name));
        if let Err(e) = result {
            error!("{e:#}");
            return Err(e);
        }
    }
    Ok(())
}

/// Warn once for every property the import never read.
pub fn audit(root: &Props, report: &mut Report) {
    let mut unread = Vec::new();
    for (key, value) in root.iter() {
        if let Value::Bag(child) = value {
            child.audit(key, &mut unread);
        }
    }
    unread.sort();
    unread.dedup();
    for path in unread {
        report.warn(format!("property '{path}' was never read"));
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::ImportOptions;
    use crate::props::Spectrum;

    fn run(root: &Props) -> (ImportContext, Result<()>) {
        let mut ctx = ImportContext::new(ImportOptions::identity_axes(), PathBuf::from(".")).unwrap();
        let tree = ImportTree::build(root, &mut ctx.report);
        let result = instantiate(&tree, &mut ctx);
        (ctx, result)
    }

    #[test]
    fn shapes_bind_their_materials() {
        let root = Props::new("scene")
            .with(
                "mat-Red",
                Props::new("diffuse")
                    .with_id("mat-Red")
                    .with("reflectance", Spectrum::Rgb([1.0, 0.0, 0.0])),
            )
            .with(
                "Box",
                Props::new("cube")
                    .with_id("mesh-Box")
                    .with("bsdf", Value::Ref("mat-Red".to_string())),
            );
        let (ctx, result) = run(&root);
        result.unwrap();
        let object = &ctx.scene.objects["Box"];
        assert_eq!(object.material_slots, vec![Some("Red".to_string())]);
        assert!(ctx.scene.materials.contains_key("Red"));
        assert!(ctx.scene.meshes.contains_key("Box"));
    }

    #[test]
    fn instances_share_the_group_mesh() {
        let root = Props::new("scene")
            .with(
                "mesh-Rock",
                Props::new("shapegroup")
                    .with_id("mesh-Rock")
                    .with("Rock", Props::new("rectangle")),
            )
            .with(
                "a",
                Props::new("instance").with("shapegroup", Value::Ref("mesh-Rock".to_string())),
            )
            .with(
                "b",
                Props::new("instance").with("shapegroup", Value::Ref("mesh-Rock".to_string())),
            );
        let (ctx, result) = run(&root);
        result.unwrap();
        let meshes: Vec<_> = ctx
            .scene
            .objects
            .values()
            .filter_map(|o| o.data.clone())
            .collect();
        assert_eq!(meshes.len(), 2);
        assert_eq!(meshes[0], meshes[1]);
        assert_eq!(ctx.scene.meshes.len(), 1);
    }

    #[test]
    fn malformed_shape_aborts_the_import() {
        let root = Props::new("scene").with("Broken", Props::new("ply").with("filename", 3));
        let (_, result) = run(&root);
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("failed to instantiate shape"));
    }

    #[test]
    fn unread_properties_are_reported() {
        let root = Props::new("scene")
            .with("Box", Props::new("cube").with("mystery", 1.0f32));
        let (mut ctx, result) = run(&root);
        result.unwrap();
        audit(&root, &mut ctx.report);
        assert!(ctx.report.has_warning("Box.mystery"));
    }
}
