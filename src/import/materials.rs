//! Renderer BSDFs to host shader node trees.
//!
//! A BSDF tree is rebuilt bottom-up: every plugin becomes one shader node
//! (wrappers become helper nodes linked into the wrapped shader) and the
//! result feeds the material output's `Surface`.

use std::collections::HashMap;

use anyhow::{Result, anyhow, bail};
use serde_json::json;

use crate::color::{luminance, max_component};
use crate::host::Material;
use crate::host::nodes::{Node, NodeTree, color_json, types};
use crate::import::tree::{Category, Resolver, category};
use crate::ior::{self, Ior};
use crate::props::{Props, Spectrum, Value};
use crate::report::Report;

/// Every BSDF plugin name the importer recognises, supported or not.
pub const BSDF_PLUGINS: &[&str] = &[
    "diffuse",
    "twosided",
    "conductor",
    "roughconductor",
    "dielectric",
    "thindielectric",
    "roughdielectric",
    "principled",
    "principledthin",
    "plastic",
    "roughplastic",
    "null",
    "mask",
    "blendbsdf",
    "bumpmap",
    "normalmap",
    "hair",
    "measured",
    "pplastic",
    "polarizer",
    "retarder",
    "circular",
];

const ERROR_COLOR: [f32; 3] = [1.0, 0.0, 0.3];

/// Principled socket names changed with host 4.0.
struct PrincipledSockets {
    sheen: &'static str,
    coat: &'static str,
    coat_roughness: &'static str,
    transmission: &'static str,
    specular: &'static str,
    emission: &'static str,
}

fn principled_sockets(version: [u32; 3]) -> PrincipledSockets {
    if version[0] >= 4 {
        PrincipledSockets {
            sheen: "Sheen Weight",
            coat: "Coat Weight",
            coat_roughness: "Coat Roughness",
            transmission: "Transmission Weight",
            specular: "Specular IOR Level",
            emission: "Emission Color",
        }
    } else {
        PrincipledSockets {
            sheen: "Sheen",
            coat: "Clearcoat",
            coat_roughness: "Clearcoat Roughness",
            transmission: "Transmission",
            specular: "Specular",
            emission: "Emission",
        }
    }
}

/// Shader nodes that accept a perturbed normal.
const TAKES_NORMAL: &[&str] = &[
    types::PRINCIPLED,
    types::DIFFUSE,
    types::GLOSSY,
    types::GLASS,
    types::TRANSLUCENT,
];

/// Wrappers already open around the plugin being built.
#[derive(Debug, Clone, Copy, Default)]
struct Nesting {
    twosided: bool,
    bump: bool,
    normalmap: bool,
    mask: bool,
}

fn distribution(props: &Props) -> &'static str {
    match props.string("distribution") {
        Some("beckmann") => "BECKMANN",
        _ => "GGX",
    }
}

/// Builds one host material.
pub struct ShaderBuilder<'a, 'c> {
    pub(super) tree: NodeTree,
    pub(super) resolver: &'c Resolver<'a>,
    /// Image cache key to host image name.
    pub(super) images: &'c HashMap<String, String>,
    pub(super) version: [u32; 3],
    pub(super) report: Report,
    pub(super) material: String,
}

impl<'a, 'c> ShaderBuilder<'a, 'c> {
    pub fn new(
        material: &str,
        resolver: &'c Resolver<'a>,
        images: &'c HashMap<String, String>,
        version: [u32; 3],
    ) -> Self {
        Self {
            tree: NodeTree::default(),
            resolver,
            images,
            version,
            report: Report::default(),
            material: material.to_string(),
        }
    }

    fn node(&mut self, node_type: &str, name: &str) -> String {
        self.tree.add_node(Node::new(node_type, name))
    }

    fn texture_input(&mut self, value: &'a Value, node: &str, socket: &str) -> Result<bool> {
        let tex = self
            .resolver
            .resolve(value)?
            .ok_or_else(|| anyhow!("{socket} is not a plugin"))?;
        if category(tex.plugin()) != Category::Texture {
            bail!("'{}' cannot drive socket {socket}", tex.plugin());
        }
        match self.texture(tex)? {
            Some((from, out)) => {
                self.tree.link(&from, out, node, socket);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Set a colour socket from a spectrum, number or texture.
    pub(super) fn set_color(&mut self, node: &str, socket: &str, value: Option<&'a Value>) -> Result<()> {
        let Some(value) = value else {
            return Ok(());
        };
        let rgb = match value {
            Value::Float(_) | Value::Int(_) => value.as_float().map(|v| [v; 3]),
            Value::Spectrum(s) => self.spectrum_rgb(s, socket),
            Value::Bag(_) | Value::Ref(_) => {
                self.texture_input(value, node, socket)?;
                return Ok(());
            }
            other => bail!("{socket} cannot be a {}", other.kind_name()),
        };
        if let Some(c) = rgb {
            self.tree.set_input(node, socket, color_json(c));
        }
        Ok(())
    }

    /// Set a scalar socket; colours collapse to their luminance.
    pub(super) fn set_float(&mut self, node: &str, socket: &str, value: Option<&'a Value>) -> Result<()> {
        let Some(value) = value else {
            return Ok(());
        };
        let v = match value {
            Value::Float(_) | Value::Int(_) => value.as_float(),
            Value::Spectrum(s) => self.spectrum_rgb(s, socket).map(luminance),
            Value::Bag(_) | Value::Ref(_) => {
                self.texture_input(value, node, socket)?;
                return Ok(());
            }
            other => bail!("{socket} cannot be a {}", other.kind_name()),
        };
        if let Some(v) = v {
            self.tree.set_input(node, socket, json!(v));
        }
        Ok(())
    }

    /// Set a host roughness socket from the renderer's α.
    fn set_roughness(&mut self, node: &str, value: Option<&'a Value>, default_alpha: f32) -> Result<()> {
        match value {
            Some(Value::Bag(_) | Value::Ref(_)) => {
                self.report.warn(format!(
                    "material '{}': textured roughness is imported without remapping",
                    self.material
                ));
                self.set_float(node, "Roughness", value)
            }
            Some(v) => {
                let alpha = v
                    .as_float()
                    .ok_or_else(|| anyhow!("alpha must be a number, found {}", v.kind_name()))?;
                self.tree.set_input(node, "Roughness", json!(alpha.max(0.0).sqrt()));
                Ok(())
            }
            None => {
                self.tree.set_input(node, "Roughness", json!(default_alpha.sqrt()));
                Ok(())
            }
        }
    }

    fn spectrum_rgb(&mut self, s: &Spectrum, socket: &str) -> Option<[f32; 3]> {
        let rgb = s.to_rgb();
        if rgb.is_none() {
            self.report.warn(format!(
                "material '{}': {socket} uses a spectrum the host cannot show; kept the default",
                self.material
            ));
        }
        rgb
    }

    fn ior(&mut self, node: &str, value: Option<&'a Value>, default: f32) {
        match value.and_then(Ior::from_value) {
            Some(Ior::Named(name)) => {
                let v = ior::lookup(&name).unwrap_or(default);
                self.tree.set_input(node, "IOR", json!(v));
                if let Some(n) = self.tree.node_mut(node) {
                    n.params.insert("ior_preset".to_string(), json!(name));
                }
            }
            Some(Ior::Value(v)) => self.tree.set_input(node, "IOR", json!(v)),
            None => {
                if let Some(v) = value {
                    self.report.warn(format!(
                        "material '{}': unknown index of refraction {v:?}; using {default}",
                        self.material
                    ));
                }
                self.tree.set_input(node, "IOR", json!(default));
            }
        }
    }

    fn bsdf_children(&self, props: &'a Props) -> Result<Vec<&'a Props>> {
        Ok(self.resolver.children_of(props, Category::Bsdf)?)
    }

    fn inner_bsdf(&self, props: &'a Props) -> Result<&'a Props> {
        self.bsdf_children(props)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("'{}' wraps no BSDF", props.plugin()))
    }

    /// The texture a wrapper reads, named or as its only texture child.
    fn wrapper_texture(&self, props: &'a Props, key: &str) -> Option<&'a Value> {
        props.get(key).or_else(|| {
            props.iter().find_map(|(k, v)| {
                let child = self.resolver.resolve(v).ok().flatten()?;
                if category(child.plugin()) == Category::Texture {
                    props.mark_queried(k);
                    Some(v)
                } else {
                    None
                }
            })
        })
    }

    pub fn error_bsdf(&mut self) -> String {
        self.tree.add_node(
            Node::new(types::DIFFUSE, "Diffuse BSDF").with_input("Color", color_json(ERROR_COLOR)),
        )
    }

    fn link_normal(&mut self, from: &str, out: &str, shader: &str) {
        let takes_normal = self
            .tree
            .node(shader)
            .is_some_and(|n| TAKES_NORMAL.contains(&n.node_type.as_str()));
        if takes_normal {
            self.tree.link(from, out, shader, "Normal");
        } else {
            self.report.warn(format!(
                "material '{}': '{shader}' takes no normal input; perturbation dropped",
                self.material
            ));
        }
    }

    /// Build the node for a BSDF plugin and return its name. The node's
    /// output socket is always `BSDF`, or `Shader` for mix nodes.
    fn bsdf(&mut self, props: &'a Props, nest: Nesting) -> Result<String> {
        match props.plugin() {
            "twosided" => {
                if nest.twosided {
                    bail!("twosided BSDF nested in another twosided BSDF");
                }
                let inner = Nesting {
                    twosided: true,
                    ..nest
                };
                match self.bsdf_children(props)?.as_slice() {
                    [one] => self.bsdf(one, inner),
                    [front, back] => {
                        let front = self.bsdf(front, inner)?;
                        let back = self.bsdf(back, inner)?;
                        let mix = self.node(types::MIX_SHADER, "Mix Shader");
                        let geometry = self.node(types::NEW_GEOMETRY, "Geometry");
                        self.tree.link(&geometry, "Backfacing", &mix, "Fac");
                        self.tree.link(&front, output_socket(&self.tree, &front), &mix, "Shader");
                        self.tree.link(&back, output_socket(&self.tree, &back), &mix, "Shader_001");
                        Ok(mix)
                    }
                    other => bail!("twosided needs one or two BSDFs, found {}", other.len()),
                }
            }
            "diffuse" => {
                let n = self.tree.add_node(
                    Node::new(types::DIFFUSE, "Diffuse BSDF").with_input("Color", color_json([0.5; 3])),
                );
                self.set_color(&n, "Color", props.get("reflectance"))?;
                Ok(n)
            }
            "conductor" | "roughconductor" => self.conductor(props),
            "dielectric" | "thindielectric" | "roughdielectric" => self.dielectric(props),
            "principled" => self.principled(props),
            "principledthin" => {
                let n = self.tree.add_node(
                    Node::new(types::TRANSLUCENT, "Translucent BSDF").with_input("Color", color_json([0.5; 3])),
                );
                self.set_color(&n, "Color", props.get("base_color"))?;
                props.mark_queried("diff_trans");
                Ok(n)
            }
            "plastic" | "roughplastic" => self.plastic(props),
            "null" => Ok(self.node(types::TRANSPARENT, "Transparent BSDF")),
            "mask" => {
                if nest.mask {
                    bail!("mask nested in another mask");
                }
                let inner = self.bsdf(self.inner_bsdf(props)?, Nesting { mask: true, ..nest })?;
                let opacity = props.get("opacity");
                let is_principled = self
                    .tree
                    .node(&inner)
                    .is_some_and(|n| n.node_type == types::PRINCIPLED);
                if is_principled {
                    self.tree.set_input(&inner, "Alpha", json!(0.5));
                    self.set_float(&inner, "Alpha", opacity)?;
                    return Ok(inner);
                }
                let mix = self.tree.add_node(Node::new(types::MIX_SHADER, "Mix Shader").with_input("Fac", json!(0.5)));
                let transparent = self.node(types::TRANSPARENT, "Transparent BSDF");
                self.set_float(&mix, "Fac", opacity)?;
                self.tree.link(&transparent, "BSDF", &mix, "Shader");
                self.tree.link(&inner, output_socket(&self.tree, &inner), &mix, "Shader_001");
                Ok(mix)
            }
            "blendbsdf" => {
                let children = self.bsdf_children(props)?;
                let [a, b] = children.as_slice() else {
                    bail!("blendbsdf needs two BSDFs, found {}", children.len());
                };
                let a = self.bsdf(a, nest)?;
                let b = self.bsdf(b, nest)?;
                let mix = self.tree.add_node(Node::new(types::MIX_SHADER, "Mix Shader").with_input("Fac", json!(0.5)));
                self.set_float(&mix, "Fac", props.get("weight"))?;
                self.tree.link(&a, output_socket(&self.tree, &a), &mix, "Shader");
                self.tree.link(&b, output_socket(&self.tree, &b), &mix, "Shader_001");
                Ok(mix)
            }
            "bumpmap" => {
                if nest.bump {
                    bail!("bumpmap nested in another bumpmap");
                }
                let inner = self.bsdf(self.inner_bsdf(props)?, Nesting { bump: true, ..nest })?;
                let bump = self.tree.add_node(
                    Node::new(types::BUMP, "Bump")
                        .with_input("Strength", json!(1.0))
                        .with_input("Distance", json!(props.float_or("scale", 1.0))),
                );
                let height = self.wrapper_texture(props, "texture");
                let Some(height) = height else {
                    bail!("bumpmap has no height texture");
                };
                if !self.texture_input(height, &bump, "Height")? {
                    return Ok(inner);
                }
                self.link_normal(&bump, "Normal", &inner);
                Ok(inner)
            }
            "normalmap" => {
                if nest.normalmap {
                    bail!("normalmap nested in another normalmap");
                }
                let inner = self.bsdf(self.inner_bsdf(props)?, Nesting { normalmap: true, ..nest })?;
                let map = self.tree.add_node(
                    Node::new(types::NORMAL_MAP, "Normal Map")
                        .with_param("space", json!("TANGENT"))
                        .with_input("Strength", json!(1.0)),
                );
                let Some(texture) = self.wrapper_texture(props, "normalmap") else {
                    bail!("normalmap has no normal texture");
                };
                if !self.texture_input(texture, &map, "Color")? {
                    return Ok(inner);
                }
                self.link_normal(&map, "Normal", &inner);
                Ok(inner)
            }
            other => {
                self.report.warn(format!(
                    "material '{}': BSDF '{other}' is not supported; using the error material",
                    self.material
                ));
                props.mark_all_queried();
                Ok(self.error_bsdf())
            }
        }
    }

    fn conductor(&mut self, props: &'a Props) -> Result<String> {
        let n = self.tree.add_node(
            Node::new(types::GLOSSY, "Glossy BSDF").with_input("Color", color_json([1.0; 3])),
        );
        self.set_color(&n, "Color", props.get("specular_reflectance"))?;
        if props.string("material").is_some_and(|m| m != "none") {
            self.report.warn(format!(
                "material '{}': conductor presets are imported as a white glossy",
                self.material
            ));
        }
        if props.plugin() == "conductor" {
            if let Some(node) = self.tree.node_mut(&n) {
                node.params.insert("distribution".to_string(), json!("SHARP"));
            }
            return Ok(n);
        }
        let dist = distribution(props);
        if let Some(node) = self.tree.node_mut(&n) {
            node.params.insert("distribution".to_string(), json!(dist));
        }
        match (props.float("alpha_u"), props.float("alpha_v")) {
            (Some(au), Some(av)) if au > 0.0 && av > 0.0 => {
                let roughness = (au * av).sqrt().sqrt();
                let anisotropy = ((1.0 - av / au) / 0.9).clamp(-1.0, 1.0);
                self.tree.set_input(&n, "Roughness", json!(roughness));
                self.tree.set_input(&n, "Anisotropy", json!(anisotropy));
            }
            _ => self.set_roughness(&n, props.get("alpha"), 0.1)?,
        }
        Ok(n)
    }

    fn dielectric(&mut self, props: &'a Props) -> Result<String> {
        let n = self.tree.add_node(
            Node::new(types::GLASS, "Glass BSDF").with_input("Color", color_json([1.0; 3])),
        );
        self.set_color(&n, "Color", props.get("specular_transmittance"))?;
        self.ior(&n, props.get("int_ior"), 1.5046);
        let ext = props.get("ext_ior").and_then(Ior::from_value).and_then(|i| i.value());
        if ext.is_some_and(|e| (e - 1.0).abs() > 1e-3) {
            self.report.warn(format!(
                "material '{}': exterior IOR is not supported; assuming air",
                self.material
            ));
        }
        props.mark_queried("specular_reflectance");
        let dist = match props.plugin() {
            "roughdielectric" => {
                self.set_roughness(&n, props.get("alpha"), 0.1)?;
                distribution(props)
            }
            _ => "SHARP",
        };
        if let Some(node) = self.tree.node_mut(&n) {
            node.params.insert("distribution".to_string(), json!(dist));
            if props.plugin() == "thindielectric" {
                node.params.insert("thin".to_string(), json!(true));
            }
        }
        Ok(n)
    }

    fn principled_node(&mut self) -> String {
        let s = principled_sockets(self.version);
        self.tree.add_node(
            Node::new(types::PRINCIPLED, "Principled BSDF")
                .with_input("Base Color", color_json([0.5; 3]))
                .with_input("Metallic", json!(0.0))
                .with_input("Roughness", json!(0.5))
                .with_input(s.specular, json!(0.5))
                .with_input(s.transmission, json!(0.0)),
        )
    }

    fn principled(&mut self, props: &'a Props) -> Result<String> {
        let s = principled_sockets(self.version);
        let n = self.principled_node();
        self.set_color(&n, "Base Color", props.get("base_color"))?;
        self.set_float(&n, "Metallic", props.get("metallic"))?;
        self.set_float(&n, "Roughness", props.get("roughness"))?;
        self.set_float(&n, "Anisotropic", props.get("anisotropic"))?;
        self.set_float(&n, s.sheen, props.get("sheen"))?;
        self.set_float(&n, "Sheen Tint", props.get("sheen_tint"))?;
        self.set_float(&n, "Specular Tint", props.get("spec_tint"))?;
        self.set_float(&n, s.coat, props.get("clearcoat"))?;
        match props.get("clearcoat_gloss") {
            Some(v @ (Value::Bag(_) | Value::Ref(_))) => {
                self.report.warn(format!(
                    "material '{}': textured clearcoat gloss is imported as roughness unchanged",
                    self.material
                ));
                self.set_float(&n, s.coat_roughness, Some(v))?;
            }
            Some(v) => {
                let gloss = v.as_float().unwrap_or(0.97);
                self.tree.set_input(&n, s.coat_roughness, json!(1.0 - gloss));
            }
            None => {}
        }
        self.set_float(&n, s.transmission, props.get("spec_trans"))?;
        if let Some(eta) = props.float("eta") {
            self.tree.set_input(&n, "IOR", json!(eta));
        }
        self.set_float(&n, s.specular, props.get("specular"))?;
        Ok(n)
    }

    fn plastic(&mut self, props: &'a Props) -> Result<String> {
        let n = self.principled_node();
        self.set_color(&n, "Base Color", props.get("diffuse_reflectance"))?;
        match props.plugin() {
            "roughplastic" => self.set_roughness(&n, props.get("alpha"), 0.1)?,
            _ => self.tree.set_input(&n, "Roughness", json!(0.0)),
        }
        self.ior(&n, props.get("int_ior"), 1.49);
        props.mark_queried("specular_reflectance");
        props.mark_queried("nonlinear");
        props.mark_queried("distribution");
        Ok(n)
    }

    /// Attach an `area` emitter to `surface`, or build an emission-only shader.
    fn emission(&mut self, emitter: &'a Props, surface: Option<String>) -> Result<String> {
        if emitter.plugin() != "area" {
            bail!("emitter '{}' cannot be attached to a shape", emitter.plugin());
        }
        let radiance = emitter.get("radiance");
        let constant = match radiance {
            Some(Value::Spectrum(s)) => s.to_rgb(),
            Some(v) => v.as_float().map(|f| [f; 3]),
            None => Some([1.0; 3]),
        };
        let (color, strength) = match constant {
            Some(c) => {
                let m = max_component(c);
                if m > 0.0 { (c.map(|x| x / m), m) } else { ([0.0; 3], 0.0) }
            }
            None => ([1.0; 3], 1.0),
        };
        let principled = surface
            .as_deref()
            .filter(|s| self.tree.node(s).is_some_and(|n| n.node_type == types::PRINCIPLED));
        if let Some(p) = principled.map(str::to_string) {
            let socket = principled_sockets(self.version).emission;
            self.tree.set_input(&p, socket, color_json(color));
            self.tree.set_input(&p, "Emission Strength", json!(strength));
            if constant.is_none() {
                if let Some(v) = radiance {
                    self.set_color(&p, socket, Some(v))?;
                }
            }
            return Ok(p);
        }
        let e = self.tree.add_node(
            Node::new(types::EMISSION, "Emission")
                .with_input("Color", color_json(color))
                .with_input("Strength", json!(strength)),
        );
        if constant.is_none() {
            if let Some(v) = radiance {
                self.set_color(&e, "Color", Some(v))?;
            }
        }
        let Some(surface) = surface else {
            return Ok(e);
        };
        let add = self.node(types::ADD_SHADER, "Add Shader");
        self.tree.link(&surface, output_socket(&self.tree, &surface), &add, "Shader");
        self.tree.link(&e, "Emission", &add, "Shader_001");
        Ok(add)
    }

    /// Build the whole material. Conversion errors are reported and replaced
    /// by the error material.
    pub fn build(mut self, name: &str, bsdf: Option<&'a Props>, emitter: Option<&'a Props>) -> (Material, Report) {
        let output = self.tree.add_node(
            Node::new(types::OUTPUT_MATERIAL, "Material Output").with_param("is_active_output", json!(true)),
        );
        let surface = bsdf.map(|b| match self.bsdf(b, Nesting::default()) {
            Ok(node) => node,
            Err(e) => {
                self.report
                    .error(format!("material '{name}': {e:#}; using the error material"));
                b.mark_all_queried();
                self.error_bsdf()
            }
        });
        let surface = match emitter {
            Some(e) => match self.emission(e, surface.clone()) {
                Ok(node) => Some(node),
                Err(err) => {
                    self.report.error(format!("material '{name}': {err:#}"));
                    e.mark_all_queried();
                    surface
                }
            },
            None => surface,
        };
        if let Some(s) = surface {
            let out = output_socket(&self.tree, &s);
            self.tree.link(&s, out, &output, "Surface");
        }
        let mut material = Material::new(name, self.tree);
        if let Some(c) = base_color(&material) {
            material.diffuse_color = [c[0], c[1], c[2], 1.0];
        }
        (material, self.report)
    }
}

/// Output socket name of a shader node.
fn output_socket(tree: &NodeTree, node: &str) -> &'static str {
    match tree.node(node).map(|n| n.node_type.as_str()) {
        Some(types::MIX_SHADER | types::ADD_SHADER) => "Shader",
        Some(types::EMISSION) => "Emission",
        _ => "BSDF",
    }
}

/// Viewport colour: the first shader's base colour.
fn base_color(material: &Material) -> Option<[f32; 3]> {
    let tree = material.node_tree.as_ref()?;
    tree.nodes.iter().find_map(|n| match n.node_type.as_str() {
        types::PRINCIPLED => n.input_color("Base Color"),
        types::DIFFUSE => n.input_color("Color"),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(bsdf: &Props, version: [u32; 3]) -> (Material, Report) {
        let root = Props::new("scene");
        let resolver = Resolver::new(&root);
        let images = HashMap::new();
        ShaderBuilder::new("Test", &resolver, &images, version).build("Test", Some(bsdf), None)
    }

    fn surface<'t>(m: &'t Material) -> &'t Node {
        let tree = m.node_tree.as_ref().unwrap();
        let link = tree.incoming("Material Output", "Surface").unwrap();
        tree.node(&link.from.node).unwrap()
    }

    #[test]
    fn twosided_diffuse_collapses_to_one_node() {
        let bsdf = Props::new("twosided")
            .with("bsdf", Props::new("diffuse").with("reflectance", Spectrum::Rgb([0.5, 0.5, 0.5])));
        let (m, report) = build(&bsdf, [4, 2, 0]);
        assert!(report.is_clean());
        let node = surface(&m);
        assert_eq!(node.node_type, types::DIFFUSE);
        assert_eq!(node.input_color("Color"), Some([0.5; 3]));
        assert_eq!(m.node_tree.as_ref().unwrap().nodes.len(), 2);
    }

    #[test]
    fn two_sides_become_a_backfacing_mix() {
        let bsdf = Props::new("twosided")
            .with("bsdf_0", Props::new("diffuse"))
            .with("bsdf_1", Props::new("conductor"));
        let (m, _) = build(&bsdf, [4, 2, 0]);
        let tree = m.node_tree.as_ref().unwrap();
        let mix = surface(&m);
        assert_eq!(mix.node_type, types::MIX_SHADER);
        let fac = tree.incoming(&mix.name, "Fac").unwrap();
        assert_eq!(fac.from.socket, "Backfacing");
    }

    #[test]
    fn nested_twosided_yields_the_error_material() {
        let bsdf = Props::new("twosided")
            .with("bsdf", Props::new("twosided").with("bsdf", Props::new("diffuse")));
        let (m, report) = build(&bsdf, [4, 2, 0]);
        assert!(report.has_error("nested"));
        assert_eq!(surface(&m).input_color("Color"), Some(ERROR_COLOR));
    }

    #[test]
    fn rough_conductor_roughness_is_sqrt_alpha() {
        let bsdf = Props::new("roughconductor").with("alpha", 0.09f32);
        let (m, _) = build(&bsdf, [4, 2, 0]);
        let node = surface(&m);
        assert!((node.input_f32("Roughness").unwrap() - 0.3).abs() < 1e-6);
        assert_eq!(node.param_str("distribution"), Some("GGX"));
    }

    #[test]
    fn anisotropic_alphas_map_back() {
        let (alpha, aniso) = (0.25f32, 0.5f32);
        let aspect = (1.0 - 0.9 * aniso).sqrt();
        let bsdf = Props::new("roughconductor")
            .with("alpha_u", alpha / aspect)
            .with("alpha_v", alpha * aspect);
        let (m, _) = build(&bsdf, [4, 2, 0]);
        let node = surface(&m);
        assert!((node.input_f32("Roughness").unwrap() - 0.5).abs() < 1e-5);
        assert!((node.input_f32("Anisotropy").unwrap() - aniso).abs() < 1e-5);
    }

    #[test]
    fn named_ior_keeps_its_preset() {
        let bsdf = Props::new("dielectric").with("int_ior", "water");
        let (m, _) = build(&bsdf, [4, 2, 0]);
        let node = surface(&m);
        assert_eq!(node.param_str("ior_preset"), Some("water"));
        assert!((node.input_f32("IOR").unwrap() - 1.333).abs() < 1e-3);
        assert_eq!(node.param_str("distribution"), Some("SHARP"));
    }

    #[test]
    fn principled_uses_version_socket_names() {
        let bsdf = Props::new("principled").with("clearcoat", 0.5f32).with("clearcoat_gloss", 0.75f32);
        let (new, _) = build(&bsdf, [4, 2, 0]);
        assert_eq!(surface(&new).input_f32("Coat Weight"), Some(0.5));
        assert_eq!(surface(&new).input_f32("Coat Roughness"), Some(0.25));
        let (old, _) = build(&bsdf, [3, 6, 0]);
        assert_eq!(surface(&old).input_f32("Clearcoat"), Some(0.5));
    }

    #[test]
    fn mask_over_principled_sets_alpha() {
        let bsdf = Props::new("mask")
            .with("opacity", 0.25f32)
            .with("bsdf", Props::new("twosided").with("bsdf", Props::new("principled")));
        let (m, _) = build(&bsdf, [4, 2, 0]);
        let node = surface(&m);
        assert_eq!(node.node_type, types::PRINCIPLED);
        assert_eq!(node.input_f32("Alpha"), Some(0.25));
    }

    #[test]
    fn mask_over_other_bsdfs_mixes_with_transparent() {
        let bsdf = Props::new("mask")
            .with("opacity", 0.25f32)
            .with("bsdf", Props::new("diffuse"));
        let (m, _) = build(&bsdf, [4, 2, 0]);
        let mix = surface(&m);
        assert_eq!(mix.node_type, types::MIX_SHADER);
        assert_eq!(mix.input_f32("Fac"), Some(0.25));
    }

    #[test]
    fn unknown_bsdf_warns_and_uses_the_error_material() {
        let (m, report) = build(&Props::new("hair"), [4, 2, 0]);
        assert!(report.has_warning("hair"));
        assert_eq!(surface(&m).input_color("Color"), Some(ERROR_COLOR));
    }

    #[test]
    fn emitter_on_principled_sets_emission_sockets() {
        let root = Props::new("scene");
        let resolver = Resolver::new(&root);
        let images = HashMap::new();
        let bsdf = Props::new("principled");
        let emitter = Props::new("area").with("radiance", Spectrum::Rgb([2.0, 1.0, 0.0]));
        let (m, _) = ShaderBuilder::new("Lamp", &resolver, &images, [4, 2, 0]).build("Lamp", Some(&bsdf), Some(&emitter));
        let node = surface(&m);
        assert_eq!(node.input_color("Emission Color"), Some([1.0, 0.5, 0.0]));
        assert_eq!(node.input_f32("Emission Strength"), Some(2.0));
    }

    #[test]
    fn emitter_without_bsdf_is_emission_only() {
        let root = Props::new("scene");
        let resolver = Resolver::new(&root);
        let images = HashMap::new();
        let emitter = Props::new("area").with("radiance", Spectrum::Rgb([3.0; 3]));
        let (m, _) = ShaderBuilder::new("Glow", &resolver, &images, [4, 2, 0]).build("Glow", None, Some(&emitter));
        let node = surface(&m);
        assert_eq!(node.node_type, types::EMISSION);
        assert_eq!(node.input_f32("Strength"), Some(3.0));
    }
}
