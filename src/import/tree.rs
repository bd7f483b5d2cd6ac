//! First import phase: resolve references and sort the plugins of a scene
//! into typed nodes with dependency edges.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::export::context::{DEFAULT_BSDF_ID, EMPTY_EMITTER_BSDF_ID};
use crate::import::materials::BSDF_PLUGINS;
use crate::import::textures::ImageData;
use crate::props::{PropertyError, Props, Value};
use crate::report::Report;

pub type NodeId = usize;

/// What kind of plugin a name denotes. Property bags carry no XML tag, so
/// the plugin name decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Shape,
    ShapeGroup,
    Instance,
    Bsdf,
    Emitter,
    Sensor,
    Film,
    Sampler,
    Rfilter,
    Integrator,
    Texture,
    Unknown,
}

pub fn category(plugin: &str) -> Category {
    match plugin {
        "ply" | "obj" | "serialized" | "mesh" | "sphere" | "cube" | "rectangle" | "disk" | "cylinder" => {
            Category::Shape
        }
        "shapegroup" => Category::ShapeGroup,
        "instance" => Category::Instance,
        "area" | "point" | "spot" | "directional" | "constant" | "envmap" | "projector" => Category::Emitter,
        "perspective" | "thinlens" | "orthographic" | "radiancemeter" | "irradiancemeter" => Category::Sensor,
        "hdrfilm" | "specfilm" => Category::Film,
        "independent" | "stratified" | "multijitter" | "orthogonal" | "ldsampler" => Category::Sampler,
        "box" | "tent" | "gaussian" | "mitchell" | "catmullrom" | "lanczos" => Category::Rfilter,
        "path" | "moment" | "direct" | "volpath" | "volpathmis" | "aov" | "ptracer" | "prb" | "depth" => {
            Category::Integrator
        }
        "bitmap" | "checkerboard" | "mesh_attribute" | "udim_texture" => Category::Texture,
        p if BSDF_PLUGINS.contains(&p) => Category::Bsdf,
        _ => Category::Unknown,
    }
}

/// Id lookup over every plugin of a scene, at any depth.
#[derive(Debug, Default)]
pub struct Resolver<'a> {
    ids: HashMap<&'a str, &'a Props>,
}

fn index<'a>(props: &'a Props, ids: &mut HashMap<&'a str, &'a Props>) {
    if let Some(id) = props.id() {
        ids.entry(id).or_insert(props);
    }
    for (_, value) in props.iter() {
        if let Value::Bag(child) = value {
            index(child, ids);
        }
    }
}

impl<'a> Resolver<'a> {
    pub fn new(root: &'a Props) -> Self {
        let mut ids = HashMap::new();
        index(root, &mut ids);
        Self { ids }
    }

    pub fn get(&self, id: &str) -> Option<&'a Props> {
        self.ids.get(id).copied()
    }

    /// The plugin a value denotes, following references. `Ok(None)` for
    /// plain values.
    pub fn resolve(&self, value: &'a Value) -> Result<Option<&'a Props>, PropertyError> {
        match value {
            Value::Bag(props) => Ok(Some(props)),
            Value::Ref(id) => self
                .get(id)
                .map(Some)
                .ok_or_else(|| PropertyError::UnresolvedReference(id.clone())),
            _ => Ok(None),
        }
    }

    /// Nested plugins of `props` in one category, in declaration order.
    /// Marks the matching keys as read.
    pub fn children_of(&self, props: &'a Props, wanted: Category) -> Result<Vec<&'a Props>, PropertyError> {
        let mut out = Vec::new();
        for (key, value) in props.iter() {
            if !matches!(value, Value::Bag(_) | Value::Ref(_)) {
                continue;
            }
            let Some(child) = self.resolve(value)? else {
                continue;
            };
            if category(child.plugin()) == wanted {
                props.mark_queried(key);
                out.push(child);
            }
        }
        Ok(out)
    }

    pub fn child_of(&self, props: &'a Props, wanted: Category) -> Result<Option<&'a Props>, PropertyError> {
        Ok(self.children_of(props, wanted)?.into_iter().next())
    }
}

/// A shape together with the material node it binds to.
#[derive(Debug, Clone, Copy)]
pub struct ShapeRef<'a> {
    pub props: &'a Props,
    pub material: Option<NodeId>,
}

#[derive(Debug)]
pub enum NodeKind<'a> {
    Scene,
    Shape(ShapeRef<'a>),
    ShapeGroup { members: Vec<ShapeRef<'a>> },
    Instance { props: &'a Props, group: NodeId },
    Camera { props: &'a Props, active: bool },
    /// Point, spot and directional emitters, and emissive rectangles and disks.
    Light { props: &'a Props },
    Material {
        bsdf: Option<&'a Props>,
        emitter: Option<&'a Props>,
    },
    World { props: &'a Props },
    Image { key: String, data: ImageData, raw: bool },
    Integrator { props: &'a Props },
}

impl NodeKind<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Scene => "scene",
            NodeKind::Shape(_) => "shape",
            NodeKind::ShapeGroup { .. } => "shape group",
            NodeKind::Instance { .. } => "instance",
            NodeKind::Camera { .. } => "camera",
            NodeKind::Light { .. } => "light",
            NodeKind::Material { .. } => "material",
            NodeKind::World { .. } => "world",
            NodeKind::Image { .. } => "image",
            NodeKind::Integrator { .. } => "integrator",
        }
    }
}

#[derive(Debug)]
pub struct TreeNode<'a> {
    pub name: String,
    pub kind: NodeKind<'a>,
}

/// The intermediate scene: nodes plus `(owner, dependency)` edges.
#[derive(Debug)]
pub struct ImportTree<'a> {
    pub nodes: Vec<TreeNode<'a>>,
    pub edges: Vec<(NodeId, NodeId)>,
    pub resolver: Resolver<'a>,
}

/// Host-facing name for an imported plugin. Exporter prefixes are dropped
/// and generated ids fall back to `fallback`.
pub fn display_name(id: Option<&str>, prefix: &str, fallback: &str) -> String {
    match id {
        Some(id) if !id.starts_with("elm__") => id.strip_prefix(prefix).unwrap_or(id).to_string(),
        _ => fallback.to_string(),
    }
}

/// The BSDF and emitter a shape declares.
#[derive(Debug, Default)]
struct ShapeChildren<'a> {
    /// `None` inside means the shared default BSDF.
    bsdf: Option<Option<&'a Props>>,
    emitter: Option<&'a Props>,
    unresolved: Vec<String>,
}

struct Builder<'a, 'r> {
    tree: ImportTree<'a>,
    report: &'r mut Report,
    bsdfs: HashMap<String, NodeId>,
    groups: HashMap<String, NodeId>,
    images: HashMap<String, NodeId>,
    /// BSDF ids only ever referenced next to an emitter.
    emissive_refs: HashSet<String>,
    plain_refs: HashSet<String>,
    has_camera: bool,
}

impl<'a> Builder<'a, '_> {
    fn push(&mut self, name: String, kind: NodeKind<'a>) -> NodeId {
        self.tree.nodes.push(TreeNode { name, kind });
        self.tree.nodes.len() - 1
    }

    fn edge(&mut self, owner: NodeId, dep: NodeId) {
        self.tree.edges.push((owner, dep));
    }

    fn shape_children(&self, shape: &'a Props) -> ShapeChildren<'a> {
        let mut out = ShapeChildren::default();
        for (key, value) in shape.iter() {
            let child = match value {
                Value::Ref(id) if id == DEFAULT_BSDF_ID => {
                    shape.mark_queried(key);
                    out.bsdf = Some(None);
                    continue;
                }
                Value::Bag(_) | Value::Ref(_) => match self.tree.resolver.resolve(value) {
                    Ok(Some(child)) => child,
                    Ok(None) => continue,
                    Err(_) => {
                        if let Value::Ref(id) = value {
                            out.unresolved.push(id.clone());
                        }
                        shape.mark_queried(key);
                        continue;
                    }
                },
                _ => continue,
            };
            match category(child.plugin()) {
                Category::Bsdf => {
                    shape.mark_queried(key);
                    out.bsdf = Some(Some(child));
                }
                Category::Emitter if child.plugin() == "area" => {
                    shape.mark_queried(key);
                    out.emitter = Some(child);
                }
                _ => {}
            }
        }
        out
    }

    /// Record which BSDF ids are shared by plain shapes and which only by
    /// emissive ones.
    fn prescan(&mut self, root: &'a Props) {
        let mut shapes: Vec<&'a Props> = Vec::new();
        for (_, value) in root.iter() {
            let Ok(Some(props)) = self.tree.resolver.resolve(value) else {
                continue;
            };
            match category(props.plugin()) {
                Category::Shape => shapes.push(props),
                Category::ShapeGroup => {
                    shapes.extend(props.iter().filter_map(|(_, v)| match v {
                        Value::Bag(p) if category(p.plugin()) == Category::Shape => Some(p),
                        _ => None,
                    }));
                }
                _ => {}
            }
        }
        for shape in shapes {
            let children = self.shape_children(shape);
            let Some(Some(bsdf)) = children.bsdf else {
                continue;
            };
            let Some(id) = bsdf.id() else {
                continue;
            };
            if children.emitter.is_some() {
                self.emissive_refs.insert(id.to_string());
            } else {
                self.plain_refs.insert(id.to_string());
            }
        }
    }

    /// Add image nodes for every texture below `props` and make `owner`
    /// depend on them.
    fn collect_images(&mut self, props: &'a Props, owner: NodeId, seen: &mut HashSet<*const Props>) {
        if !seen.insert(props as *const Props) {
            return;
        }
        if matches!(props.plugin(), "bitmap" | "udim_texture" | "envmap") {
            if let Some(image) = self.image(props) {
                self.edge(owner, image);
            }
            if props.plugin() == "udim_texture" {
                return;
            }
        }
        for (_, value) in props.iter() {
            match value {
                Value::Bag(child) => self.collect_images(child, owner, seen),
                Value::Ref(id) => {
                    if let Some(child) = self.tree.resolver.get(id) {
                        self.collect_images(child, owner, seen);
                    }
                }
                _ => {}
            }
        }
    }

    fn image(&mut self, props: &'a Props) -> Option<NodeId> {
        let data = ImageData::from_props(props)?;
        let key = data.key();
        if let Some(&id) = self.images.get(&key) {
            return Some(id);
        }
        let raw = match &data {
            ImageData::Tiled { .. } => props
                .iter()
                .find_map(|(_, v)| match v {
                    Value::Bag(tile) => tile.bool("raw"),
                    _ => None,
                })
                .unwrap_or(false),
            _ => props.bool("raw").unwrap_or(false),
        };
        let name = data.display_name();
        let id = self.push(name, NodeKind::Image {
            key: key.clone(),
            data,
            raw,
        });
        self.images.insert(key, id);
        Some(id)
    }

    fn material(&mut self, bsdf: Option<&'a Props>, emitter: Option<&'a Props>) -> NodeId {
        let cacheable = emitter.is_none();
        let bsdf_id = bsdf.and_then(Props::id);
        if cacheable {
            if let Some(&id) = bsdf_id.and_then(|b| self.bsdfs.get(b)) {
                return id;
            }
        }
        let name = match bsdf {
            Some(b) if b.id() != Some(EMPTY_EMITTER_BSDF_ID) => display_name(b.id(), "mat-", "Material"),
            _ => "Emission".to_string(),
        };
        let bsdf = bsdf.filter(|b| b.id() != Some(EMPTY_EMITTER_BSDF_ID));
        let id = self.push(name, NodeKind::Material { bsdf, emitter });
        let mut seen = HashSet::new();
        for props in bsdf.into_iter().chain(emitter) {
            self.collect_images(props, id, &mut seen);
        }
        if let (true, Some(bsdf_id)) = (cacheable, bsdf_id) {
            self.bsdfs.insert(bsdf_id.to_string(), id);
        }
        id
    }

    fn shape_ref(&mut self, props: &'a Props) -> ShapeRef<'a> {
        let children = self.shape_children(props);
        for id in &children.unresolved {
            self.report
                .error(format!("shape '{}': unresolved reference '{id}'", props.plugin()));
        }
        let material = match (children.bsdf, children.emitter) {
            (None | Some(None), None) => None,
            (Some(bsdf), None) => Some(self.material(bsdf, None)),
            (bsdf, Some(emitter)) => Some(self.material(bsdf.flatten(), Some(emitter))),
        };
        ShapeRef { props, material }
    }

    fn shape(&mut self, key: &str, props: &'a Props) -> Option<NodeId> {
        let is_area_light = matches!(props.plugin(), "rectangle" | "disk")
            && self.shape_children(props).emitter.is_some();
        let fallback = if key.starts_with("_arg_") { props.plugin() } else { key };
        let name = display_name(props.id(), "mesh-", fallback);
        if is_area_light {
            return Some(self.push(name, NodeKind::Light { props }));
        }
        let shape = self.shape_ref(props);
        let id = self.push(name, NodeKind::Shape(shape));
        if let Some(m) = shape.material {
            self.edge(id, m);
        }
        Some(id)
    }

    fn group(&mut self, props: &'a Props) -> NodeId {
        if let Some(&id) = props.id().and_then(|g| self.groups.get(g)) {
            return id;
        }
        let mut members = Vec::new();
        for (key, value) in props.iter() {
            let Value::Bag(member) = value else {
                continue;
            };
            props.mark_queried(key);
            match category(member.plugin()) {
                Category::Shape => members.push(self.shape_ref(member)),
                _ => {
                    self.report.warn(format!(
                        "shape group '{}': '{}' is not a shape; skipped",
                        props.id().unwrap_or("?"),
                        member.plugin()
                    ));
                    member.mark_all_queried();
                }
            }
        }
        let materials: Vec<NodeId> = members.iter().filter_map(|m| m.material).collect();
        let name = display_name(props.id(), "mesh-", "Group");
        let id = self.push(name, NodeKind::ShapeGroup { members });
        for m in materials {
            self.edge(id, m);
        }
        if let Some(g) = props.id() {
            self.groups.insert(g.to_string(), id);
        }
        id
    }

    fn instance(&mut self, props: &'a Props) -> Option<NodeId> {
        let group = match self.tree.resolver.child_of(props, Category::ShapeGroup) {
            Ok(Some(group)) => group,
            Ok(None) => {
                self.report.error("instance does not reference a shape group");
                return None;
            }
            Err(e) => {
                self.report.error(format!("instance: {e}"));
                return None;
            }
        };
        let group = self.group(group);
        let name = self.tree.nodes[group].name.clone();
        let id = self.push(name, NodeKind::Instance { props, group });
        self.edge(id, group);
        Some(id)
    }

    fn top_level(&mut self, key: &'a str, props: &'a Props) -> Option<NodeId> {
        match category(props.plugin()) {
            Category::Shape => self.shape(key, props),
            Category::ShapeGroup => Some(self.group(props)),
            Category::Instance => self.instance(props),
            Category::Sensor => {
                let active = !self.has_camera;
                self.has_camera = true;
                let name = display_name(props.id(), "", "Camera");
                Some(self.push(name, NodeKind::Camera { props, active }))
            }
            Category::Emitter => match props.plugin() {
                "constant" | "envmap" => {
                    let name = display_name(props.id(), "", "World");
                    let id = self.push(name, NodeKind::World { props });
                    self.collect_images(props, id, &mut HashSet::new());
                    Some(id)
                }
                "point" | "spot" | "directional" => {
                    let name = display_name(props.id(), "", "Light");
                    Some(self.push(name, NodeKind::Light { props }))
                }
                other => {
                    self.report
                        .warn(format!("emitter '{other}' is not supported; skipped"));
                    props.mark_all_queried();
                    None
                }
            },
            Category::Integrator => {
                let name = display_name(props.id(), "", "integrator");
                Some(self.push(name, NodeKind::Integrator { props }))
            }
            Category::Bsdf => {
                let Some(id) = props.id() else {
                    return Some(self.material(Some(props), None));
                };
                if id == DEFAULT_BSDF_ID || id == EMPTY_EMITTER_BSDF_ID {
                    props.mark_all_queried();
                    return None;
                }
                if self.emissive_refs.contains(id) && !self.plain_refs.contains(id) {
                    debug!("bsdf '{id}' is only used by emissive shapes");
                    return None;
                }
                Some(self.material(Some(props), None))
            }
            // Textures are picked up through the plugins that use them.
            Category::Texture => None,
            Category::Film | Category::Sampler | Category::Rfilter => {
                self.report.warn(format!(
                    "'{}' outside a sensor has no effect; skipped",
                    props.plugin()
                ));
                props.mark_all_queried();
                None
            }
            Category::Unknown => {
                self.report
                    .warn(format!("plugin '{}' is not supported; skipped", props.plugin()));
                props.mark_all_queried();
                None
            }
        }
    }
}

impl<'a> ImportTree<'a> {
    /// Phase one: every top-level plugin of `root` becomes a node.
    pub fn build(root: &'a Props, report: &mut Report) -> ImportTree<'a> {
        let mut builder = Builder {
            tree: ImportTree {
                nodes: vec![TreeNode {
                    name: "scene".to_string(),
                    kind: NodeKind::Scene,
                }],
                edges: Vec::new(),
                resolver: Resolver::new(root),
            },
            report,
            bsdfs: HashMap::new(),
            groups: HashMap::new(),
            images: HashMap::new(),
            emissive_refs: HashSet::new(),
            plain_refs: HashSet::new(),
            has_camera: false,
        };
        builder.prescan(root);
        for (key, value) in root.children() {
            let props = match builder.tree.resolver.resolve(value) {
                Ok(Some(props)) => props,
                Ok(None) => continue,
                Err(e) => {
                    builder.report.error(format!("scene entry '{key}': {e}"));
                    continue;
                }
            };
            if let Some(id) = builder.top_level(key, props) {
                builder.edge(0, id);
            }
        }
        debug!(
            "import tree: {} nodes, {} edges",
            builder.tree.nodes.len(),
            builder.tree.edges.len()
        );
        builder.tree
    }

    pub fn node(&self, id: NodeId) -> &TreeNode<'a> {
        &self.nodes[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props::Spectrum;

    fn scene(entries: Vec<Props>) -> Props {
        let mut root = Props::new("scene");
        for (n, e) in entries.into_iter().enumerate() {
            let key = e.id().map(str::to_string).unwrap_or_else(|| format!("_arg_{n}"));
            root.set(key, e);
        }
        root
    }

    fn count(tree: &ImportTree, label: &str) -> usize {
        tree.nodes.iter().filter(|n| n.kind.label() == label).count()
    }

    #[test]
    fn shared_bsdfs_become_one_material() {
        let bsdf = Props::new("diffuse").with_id("mat-Red");
        let a = Props::new("ply").with_id("mesh-A").with("bsdf", Props::reference("mat-Red"));
        let b = Props::new("ply").with_id("mesh-B").with("bsdf", Props::reference("mat-Red"));
        let root = scene(vec![bsdf, a, b]);
        let mut report = Report::default();
        let tree = ImportTree::build(&root, &mut report);
        assert_eq!(count(&tree, "material"), 1);
        assert_eq!(count(&tree, "shape"), 2);
        let material = tree.nodes.iter().position(|n| n.kind.label() == "material").unwrap();
        assert_eq!(tree.nodes[material].name, "Red");
        assert!(report.is_clean());
    }

    #[test]
    fn emissive_shapes_get_fresh_materials() {
        let emitter = || Props::new("area").with("radiance", Spectrum::Rgb([1.0; 3]));
        let bsdf = Props::new("diffuse").with_id("mat-Lamp");
        let a = Props::new("ply")
            .with_id("mesh-A")
            .with("bsdf", Props::reference("mat-Lamp"))
            .with("emitter", emitter());
        let b = Props::new("ply")
            .with_id("mesh-B")
            .with("bsdf", Props::reference("mat-Lamp"))
            .with("emitter", emitter());
        let root = scene(vec![bsdf, a, b]);
        let tree = ImportTree::build(&root, &mut Report::default());
        assert_eq!(count(&tree, "material"), 2);
    }

    #[test]
    fn emissive_rectangles_are_lights() {
        let light = Props::new("rectangle")
            .with("bsdf", Props::new("null"))
            .with("emitter", Props::new("area").with("radiance", Spectrum::Rgb([1.0; 3])));
        let root = scene(vec![light, Props::new("rectangle")]);
        let tree = ImportTree::build(&root, &mut Report::default());
        assert_eq!(count(&tree, "light"), 1);
        assert_eq!(count(&tree, "shape"), 1);
    }

    #[test]
    fn default_bsdf_reference_binds_no_material() {
        let root = scene(vec![
            Props::new("twosided").with_id(DEFAULT_BSDF_ID),
            Props::new("ply").with_id("mesh-A").with("bsdf", Props::reference(DEFAULT_BSDF_ID)),
        ]);
        let tree = ImportTree::build(&root, &mut Report::default());
        assert_eq!(count(&tree, "material"), 0);
    }

    #[test]
    fn first_sensor_is_active() {
        let root = scene(vec![Props::new("perspective"), Props::new("orthographic")]);
        let tree = ImportTree::build(&root, &mut Report::default());
        let active: Vec<bool> = tree
            .nodes
            .iter()
            .filter_map(|n| match n.kind {
                NodeKind::Camera { active, .. } => Some(active),
                _ => None,
            })
            .collect();
        assert_eq!(active, vec![true, false]);
    }

    #[test]
    fn images_are_shared_between_materials() {
        let tex = || Props::new("bitmap").with("filename", "textures/wood.png");
        let a = Props::new("diffuse").with_id("mat-A").with("reflectance", tex());
        let b = Props::new("diffuse").with_id("mat-B").with("reflectance", tex());
        let root = scene(vec![a, b]);
        let tree = ImportTree::build(&root, &mut Report::default());
        assert_eq!(count(&tree, "image"), 1);
        let image = tree.nodes.iter().position(|n| n.kind.label() == "image").unwrap();
        assert_eq!(tree.edges.iter().filter(|(_, d)| *d == image).count(), 2);
    }

    #[test]
    fn instances_depend_on_their_group() {
        let group = Props::new("shapegroup")
            .with_id("mesh-Tree")
            .with("Tree", Props::new("ply").with("filename", "meshes/Tree.ply"));
        let inst = Props::new("instance").with("shapegroup", Props::reference("mesh-Tree"));
        let root = scene(vec![group, inst.clone().with_id("a"), inst.with_id("b")]);
        let tree = ImportTree::build(&root, &mut Report::default());
        assert_eq!(count(&tree, "shape group"), 1);
        assert_eq!(count(&tree, "instance"), 2);
    }

    #[test]
    fn unknown_plugins_warn() {
        let root = scene(vec![Props::new("medium_of_mystery")]);
        let mut report = Report::default();
        ImportTree::build(&root, &mut report);
        assert!(report.has_warning("medium_of_mystery"));
    }
}
