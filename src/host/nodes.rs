//! Host shader node trees: nodes with socket default values, plus links
//! between named sockets.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value as Json, json};

pub mod types {
    pub const OUTPUT_MATERIAL: &str = "ShaderNodeOutputMaterial";
    pub const OUTPUT_WORLD: &str = "ShaderNodeOutputWorld";
    pub const PRINCIPLED: &str = "ShaderNodeBsdfPrincipled";
    pub const DIFFUSE: &str = "ShaderNodeBsdfDiffuse";
    pub const GLOSSY: &str = "ShaderNodeBsdfGlossy";
    pub const ANISOTROPIC: &str = "ShaderNodeBsdfAnisotropic";
    pub const GLASS: &str = "ShaderNodeBsdfGlass";
    pub const TRANSPARENT: &str = "ShaderNodeBsdfTransparent";
    pub const TRANSLUCENT: &str = "ShaderNodeBsdfTranslucent";
    pub const EMISSION: &str = "ShaderNodeEmission";
    pub const BACKGROUND: &str = "ShaderNodeBackground";
    pub const MIX_SHADER: &str = "ShaderNodeMixShader";
    pub const ADD_SHADER: &str = "ShaderNodeAddShader";
    pub const SUBSURFACE: &str = "ShaderNodeSubsurfaceScattering";
    pub const TEX_IMAGE: &str = "ShaderNodeTexImage";
    pub const TEX_ENVIRONMENT: &str = "ShaderNodeTexEnvironment";
    pub const TEX_CHECKER: &str = "ShaderNodeTexChecker";
    pub const TEX_NOISE: &str = "ShaderNodeTexNoise";
    pub const VERTEX_COLOR: &str = "ShaderNodeVertexColor";
    pub const RGB: &str = "ShaderNodeRGB";
    pub const VALUE: &str = "ShaderNodeValue";
    pub const REROUTE: &str = "NodeReroute";
    pub const GROUP: &str = "ShaderNodeGroup";
    pub const GROUP_INPUT: &str = "NodeGroupInput";
    pub const GROUP_OUTPUT: &str = "NodeGroupOutput";
    pub const COLOR_RAMP: &str = "ShaderNodeValToRGB";
    pub const MATH: &str = "ShaderNodeMath";
    pub const MIX: &str = "ShaderNodeMix";
    pub const MIX_RGB: &str = "ShaderNodeMixRGB";
    pub const SEPARATE_COLOR: &str = "ShaderNodeSeparateColor";
    pub const SEPARATE_RGB: &str = "ShaderNodeSeparateRGB";
    pub const COMBINE_COLOR: &str = "ShaderNodeCombineColor";
    pub const COMBINE_RGB: &str = "ShaderNodeCombineRGB";
    pub const HUE_SATURATION: &str = "ShaderNodeHueSaturation";
    pub const CLAMP: &str = "ShaderNodeClamp";
    pub const MAP_RANGE: &str = "ShaderNodeMapRange";
    pub const INVERT: &str = "ShaderNodeInvert";
    pub const BRIGHT_CONTRAST: &str = "ShaderNodeBrightContrast";
    pub const RGB_TO_BW: &str = "ShaderNodeRGBToBW";
    pub const BUMP: &str = "ShaderNodeBump";
    pub const NORMAL_MAP: &str = "ShaderNodeNormalMap";
    pub const NEW_GEOMETRY: &str = "ShaderNodeNewGeometry";
    pub const MAPPING: &str = "ShaderNodeMapping";
    pub const TEX_COORD: &str = "ShaderNodeTexCoord";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub node: String,
    pub socket: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub from: Endpoint,
    pub to: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    /// Default values of the input sockets, by socket name.
    #[serde(default)]
    pub inputs: IndexMap<String, Json>,
    /// Node properties (distribution, interpolation, blend type, ...).
    #[serde(default)]
    pub params: IndexMap<String, Json>,
}

impl Node {
    pub fn new(node_type: &str, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_type: node_type.to_string(),
            inputs: IndexMap::new(),
            params: IndexMap::new(),
        }
    }

    pub fn with_input(mut self, socket: &str, value: Json) -> Self {
        self.inputs.insert(socket.to_string(), value);
        self
    }

    pub fn with_param(mut self, key: &str, value: Json) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn input(&self, socket: &str) -> Option<&Json> {
        self.inputs.get(socket)
    }

    pub fn input_f32(&self, socket: &str) -> Option<f32> {
        json_f32(self.inputs.get(socket)?)
    }

    pub fn input_color(&self, socket: &str) -> Option<[f32; 3]> {
        json_color(self.inputs.get(socket)?)
    }

    pub fn input_vec3(&self, socket: &str) -> Option<[f32; 3]> {
        json_color(self.inputs.get(socket)?)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key)?.as_str()
    }

    pub fn param_f32(&self, key: &str) -> Option<f32> {
        json_f32(self.params.get(key)?)
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key)?.as_bool()
    }
}

pub fn json_f32(v: &Json) -> Option<f32> {
    v.as_f64()
        .map(|x| x as f32)
        .or_else(|| v.as_bool().map(|b| if b { 1.0 } else { 0.0 }))
}

/// Accepts `[r, g, b]`, `[r, g, b, a]` or a scalar.
pub fn json_color(v: &Json) -> Option<[f32; 3]> {
    if let Some(x) = json_f32(v) {
        return Some([x; 3]);
    }
    let arr = v.as_array()?;
    if arr.len() < 3 {
        return None;
    }
    Some([
        json_f32(&arr[0])?,
        json_f32(&arr[1])?,
        json_f32(&arr[2])?,
    ])
}

pub fn color_json(c: [f32; 3]) -> Json {
    json!([c[0], c[1], c[2], 1.0])
}

pub fn vec3_json(c: [f32; 3]) -> Json {
    json!([c[0], c[1], c[2]])
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeTree {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl NodeTree {
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.name == name)
    }

    pub fn nodes_of_type<'a>(&'a self, node_type: &'a str) -> impl Iterator<Item = &'a Node> {
        self.nodes.iter().filter(move |n| n.node_type == node_type)
    }

    /// The active output node of the given type; the first one otherwise.
    pub fn output_node(&self, node_type: &str) -> Option<&Node> {
        let mut outputs = self.nodes.iter().filter(|n| n.node_type == node_type);
        outputs
            .clone()
            .find(|n| n.param_bool("is_active_output") == Some(true))
            .or_else(|| outputs.next())
    }

    pub fn incoming(&self, node: &str, socket: &str) -> Option<&Link> {
        self.links
            .iter()
            .find(|l| l.to.node == node && l.to.socket == socket)
    }

    pub fn is_linked(&self, node: &str, socket: &str) -> bool {
        self.incoming(node, socket).is_some()
    }

    /// Add a node, suffixing `.001`, `.002`, ... when the name is taken.
    pub fn add_node(&mut self, mut node: Node) -> String {
        let base = node.name.clone();
        let mut n = 0;
        while self.node(&node.name).is_some() {
            n += 1;
            node.name = format!("{base}.{n:03}");
        }
        let name = node.name.clone();
        self.nodes.push(node);
        name
    }

    pub fn link(&mut self, from_node: &str, from_socket: &str, to_node: &str, to_socket: &str) {
        self.links
            .retain(|l| !(l.to.node == to_node && l.to.socket == to_socket));
        self.links.push(Link {
            from: Endpoint {
                node: from_node.to_string(),
                socket: from_socket.to_string(),
            },
            to: Endpoint {
                node: to_node.to_string(),
                socket: to_socket.to_string(),
            },
        });
    }

    pub fn set_input(&mut self, node: &str, socket: &str, value: Json) {
        if let Some(n) = self.node_mut(node) {
            n.inputs.insert(socket.to_string(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_node_disambiguates_names() {
        let mut tree = NodeTree::default();
        let a = tree.add_node(Node::new(types::DIFFUSE, "Diffuse BSDF"));
        let b = tree.add_node(Node::new(types::DIFFUSE, "Diffuse BSDF"));
        assert_eq!(a, "Diffuse BSDF");
        assert_eq!(b, "Diffuse BSDF.001");
    }

    #[test]
    fn relinking_a_socket_replaces_the_link() {
        let mut tree = NodeTree::default();
        tree.link("a", "BSDF", "out", "Surface");
        tree.link("b", "BSDF", "out", "Surface");
        assert_eq!(tree.links.len(), 1);
        assert_eq!(tree.incoming("out", "Surface").unwrap().from.node, "b");
    }

    #[test]
    fn colors_accept_rgba_and_scalars() {
        assert_eq!(json_color(&json!([0.1, 0.2, 0.3, 1.0])), Some([0.1, 0.2, 0.3]));
        assert_eq!(json_color(&json!(0.5)), Some([0.5; 3]));
        assert_eq!(json_color(&json!([0.1])), None);
    }
}
