//! Host scene graph interchange model.
//!
//! The host application hands the translator its evaluated scene: objects and
//! their instances, mesh data, materials with node trees, lights, cameras, a
//! world and render settings. The importer produces the same structure.

pub mod mesh;
pub mod nodes;

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use glam::Mat4;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use mesh::{Mesh, MeshBuilder, MeshLayout};
pub use nodes::{Node, NodeTree};

fn default_version() -> [u32; 3] {
    [4, 2, 0]
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectKind {
    Mesh,
    Curve,
    Font,
    Surface,
    Meta,
    PointCloud,
    Camera,
    Light,
    Empty,
}

impl ObjectKind {
    /// Kinds whose evaluated data is a triangle mesh.
    pub fn is_mesh_like(self) -> bool {
        matches!(
            self,
            ObjectKind::Mesh
                | ObjectKind::Font
                | ObjectKind::Surface
                | ObjectKind::Meta
                | ObjectKind::PointCloud
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub name: String,
    pub kind: ObjectKind,
    /// Name of the mesh, light or camera data block.
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default = "identity")]
    pub matrix_world: Mat4,
    #[serde(default)]
    pub material_slots: Vec<Option<String>>,
    #[serde(default)]
    pub hide_render: bool,
    #[serde(default)]
    pub select: bool,
    #[serde(default)]
    pub parent: Option<String>,
    /// Whether this object instances others (particles, vertex/face instancing).
    #[serde(default)]
    pub is_instancer: bool,
}

fn identity() -> Mat4 {
    Mat4::IDENTITY
}

impl Object {
    pub fn new(name: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            name: name.into(),
            kind,
            data: None,
            matrix_world: Mat4::IDENTITY,
            material_slots: Vec::new(),
            hide_render: false,
            select: false,
            parent: None,
            is_instancer: false,
        }
    }
}

/// One entry of the evaluated object-instance list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInstance {
    pub object: String,
    #[serde(default)]
    pub is_instance: bool,
    /// The instancer, for instances.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default = "identity")]
    pub matrix_world: Mat4,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    #[serde(default)]
    pub node_tree: Option<NodeTree>,
    #[serde(default = "default_diffuse")]
    pub diffuse_color: [f32; 4],
    #[serde(default = "default_roughness")]
    pub roughness: f32,
    #[serde(default)]
    pub metallic: f32,
}

fn default_diffuse() -> [f32; 4] {
    [0.8, 0.8, 0.8, 1.0]
}

fn default_roughness() -> f32 {
    0.5
}

impl Material {
    pub fn new(name: impl Into<String>, node_tree: NodeTree) -> Self {
        Self {
            name: name.into(),
            node_tree: Some(node_tree),
            diffuse_color: default_diffuse(),
            roughness: default_roughness(),
            metallic: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    #[serde(rename = "BMP")]
    Bmp,
    #[serde(rename = "HDR")]
    Hdr,
    #[serde(rename = "JPEG")]
    Jpeg,
    #[serde(rename = "JPEG2000")]
    Jpeg2000,
    #[serde(rename = "PNG")]
    Png,
    #[serde(rename = "OPEN_EXR")]
    OpenExr,
    #[serde(rename = "OPEN_EXR_MULTILAYER")]
    OpenExrMultilayer,
    #[serde(rename = "TARGA")]
    Targa,
    #[serde(rename = "TARGA_RAW")]
    TargaRaw,
    #[serde(rename = "CINEON")]
    Cineon,
    #[serde(rename = "DPX")]
    Dpx,
    #[serde(rename = "TIFF")]
    Tiff,
    #[serde(rename = "IRIS")]
    Iris,
}

impl ImageFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        Some(match ext.to_ascii_lowercase().as_str() {
            "bmp" => ImageFormat::Bmp,
            "hdr" => ImageFormat::Hdr,
            "jpg" | "jpeg" => ImageFormat::Jpeg,
            "jp2" | "j2c" => ImageFormat::Jpeg2000,
            "png" => ImageFormat::Png,
            "exr" => ImageFormat::OpenExr,
            "tga" => ImageFormat::Targa,
            "cin" => ImageFormat::Cineon,
            "dpx" => ImageFormat::Dpx,
            "tif" | "tiff" => ImageFormat::Tiff,
            "rgb" | "sgi" | "bw" => ImageFormat::Iris,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageSource {
    File,
    Generated,
    Tiled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub name: String,
    #[serde(default)]
    pub filepath: Option<String>,
    pub file_format: ImageFormat,
    #[serde(default = "default_source")]
    pub source: ImageSource,
    #[serde(default = "default_colorspace")]
    pub colorspace: String,
    #[serde(default)]
    pub size: [u32; 2],
    /// Float RGBA pixels, bottom row first, for generated or packed images.
    #[serde(default)]
    pub pixels: Option<Vec<f32>>,
    /// UDIM tile numbers for tiled images.
    #[serde(default)]
    pub tiles: Vec<u32>,
}

fn default_source() -> ImageSource {
    ImageSource::File
}

fn default_colorspace() -> String {
    "sRGB".to_string()
}

impl Image {
    /// Non-colour data is passed to the renderer without gamma conversion.
    pub fn is_raw(&self) -> bool {
        matches!(
            self.colorspace.as_str(),
            "Non-Color" | "Raw" | "Linear" | "Linear Rec.709"
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LightKind {
    Point,
    Sun,
    Spot,
    Area,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AreaShape {
    Square,
    Rectangle,
    Disk,
    Ellipse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Light {
    pub name: String,
    pub kind: LightKind,
    #[serde(default = "white")]
    pub color: [f32; 3],
    #[serde(default = "default_energy")]
    pub energy: f32,
    #[serde(default)]
    pub shadow_soft_size: f32,
    /// Full cone angle in radians.
    #[serde(default = "default_spot_size")]
    pub spot_size: f32,
    #[serde(default = "default_spot_blend")]
    pub spot_blend: f32,
    #[serde(default = "default_shape")]
    pub shape: AreaShape,
    #[serde(default = "one")]
    pub size: f32,
    #[serde(default = "one")]
    pub size_y: f32,
}

fn white() -> [f32; 3] {
    [1.0; 3]
}

fn default_energy() -> f32 {
    10.0
}

fn default_spot_size() -> f32 {
    std::f32::consts::FRAC_PI_4
}

fn default_spot_blend() -> f32 {
    0.15
}

fn default_shape() -> AreaShape {
    AreaShape::Square
}

fn one() -> f32 {
    1.0
}

impl Light {
    pub fn new(name: impl Into<String>, kind: LightKind) -> Self {
        Self {
            name: name.into(),
            kind,
            color: white(),
            energy: default_energy(),
            shadow_soft_size: 0.0,
            spot_size: default_spot_size(),
            spot_blend: default_spot_blend(),
            shape: default_shape(),
            size: 1.0,
            size_y: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Projection {
    Perspective,
    Orthographic,
    Panoramic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensorFit {
    Auto,
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthOfField {
    #[serde(default)]
    pub use_dof: bool,
    #[serde(default = "default_focus")]
    pub focus_distance: f32,
    #[serde(default = "default_fstop")]
    pub aperture_fstop: f32,
}

fn default_focus() -> f32 {
    10.0
}

fn default_fstop() -> f32 {
    2.8
}

impl Default for DepthOfField {
    fn default() -> Self {
        Self {
            use_dof: false,
            focus_distance: default_focus(),
            aperture_fstop: default_fstop(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub name: String,
    #[serde(default = "default_projection")]
    pub projection: Projection,
    /// Focal length in millimetres.
    #[serde(default = "default_lens")]
    pub lens: f32,
    #[serde(default = "default_sensor_width")]
    pub sensor_width: f32,
    #[serde(default = "default_sensor_height")]
    pub sensor_height: f32,
    #[serde(default = "default_sensor_fit")]
    pub sensor_fit: SensorFit,
    #[serde(default)]
    pub shift_x: f32,
    #[serde(default)]
    pub shift_y: f32,
    #[serde(default = "default_clip_start")]
    pub clip_start: f32,
    #[serde(default = "default_clip_end")]
    pub clip_end: f32,
    #[serde(default = "default_ortho_scale")]
    pub ortho_scale: f32,
    #[serde(default)]
    pub dof: DepthOfField,
}

fn default_projection() -> Projection {
    Projection::Perspective
}
fn default_lens() -> f32 {
    50.0
}
fn default_sensor_width() -> f32 {
    36.0
}
fn default_sensor_height() -> f32 {
    24.0
}
fn default_sensor_fit() -> SensorFit {
    SensorFit::Auto
}
fn default_clip_start() -> f32 {
    0.1
}
fn default_clip_end() -> f32 {
    1000.0
}
fn default_ortho_scale() -> f32 {
    6.0
}

impl Camera {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            projection: default_projection(),
            lens: default_lens(),
            sensor_width: default_sensor_width(),
            sensor_height: default_sensor_height(),
            sensor_fit: default_sensor_fit(),
            shift_x: 0.0,
            shift_y: 0.0,
            clip_start: default_clip_start(),
            clip_end: default_clip_end(),
            ortho_scale: default_ortho_scale(),
            dof: DepthOfField::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    pub name: String,
    #[serde(default)]
    pub node_tree: Option<NodeTree>,
    #[serde(default = "default_world_color")]
    pub color: [f32; 3],
}

/// The grey a fresh host world starts with.
pub const DEFAULT_WORLD_COLOR: [f32; 3] = [0.050_876, 0.050_876, 0.050_876];

fn default_world_color() -> [f32; 3] {
    DEFAULT_WORLD_COLOR
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RenderEngine {
    Mitsuba,
    Cycles,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntegratorSettings {
    Path {
        max_depth: i32,
        rr_depth: i32,
        #[serde(default)]
        hide_emitters: bool,
    },
    Moment {
        #[serde(default)]
        integrators: Vec<IntegratorSettings>,
    },
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        IntegratorSettings::Path {
            max_depth: 1024,
            rr_depth: 5,
            hide_emitters: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKind {
    Independent,
    Stratified,
    Multijitter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerSettings {
    pub kind: SamplerKind,
    pub sample_count: u32,
    #[serde(default)]
    pub seed: u32,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            kind: SamplerKind::Independent,
            sample_count: 4,
            seed: 0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterSettings {
    Box,
    Tent,
    Gaussian { stddev: f32 },
}

impl Default for FilterSettings {
    fn default() -> Self {
        FilterSettings::Gaussian { stddev: 0.5 }
    }
}

/// Render properties the renderer add-on stores on the host scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MitsubaSettings {
    pub integrator: IntegratorSettings,
    pub sampler: SamplerSettings,
    pub rfilter: FilterSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CyclesSettings {
    pub samples: u32,
    pub seed: u32,
    pub max_bounces: i32,
    pub min_light_bounces: i32,
    pub film_transparent: bool,
    pub sampling_pattern: String,
    pub pixel_filter_type: String,
    pub filter_width: f32,
}

impl Default for CyclesSettings {
    fn default() -> Self {
        Self {
            samples: 4096,
            seed: 0,
            max_bounces: 12,
            min_light_bounces: 0,
            film_transparent: false,
            sampling_pattern: "TABULATED_SOBOL".to_string(),
            pixel_filter_type: "GAUSSIAN".to_string(),
            filter_width: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub engine: RenderEngine,
    pub resolution_x: u32,
    pub resolution_y: u32,
    pub resolution_percentage: u32,
    pub use_border: bool,
    /// Normalized border, y measured from the bottom: `[min_x, min_y, max_x, max_y]`.
    pub border: [f32; 4],
    pub file_format: String,
    pub color_mode: String,
    pub color_depth: String,
    pub cycles: CyclesSettings,
    pub mitsuba: MitsubaSettings,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            engine: RenderEngine::Mitsuba,
            resolution_x: 1920,
            resolution_y: 1080,
            resolution_percentage: 100,
            use_border: false,
            border: [0.0, 0.0, 1.0, 1.0],
            file_format: "OPEN_EXR".to_string(),
            color_mode: "RGBA".to_string(),
            color_depth: "32".to_string(),
            cycles: CyclesSettings::default(),
            mitsuba: MitsubaSettings::default(),
        }
    }
}

impl RenderSettings {
    /// Final output resolution after the percentage scale.
    pub fn resolution(&self) -> [u32; 2] {
        let scale = |v: u32| ((v as u64 * self.resolution_percentage as u64) / 100).max(1) as u32;
        [scale(self.resolution_x), scale(self.resolution_y)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostScene {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: [u32; 3],
    #[serde(default)]
    pub objects: IndexMap<String, Object>,
    /// Evaluated object instances. Empty means one plain instance per object.
    #[serde(default)]
    pub instances: Vec<ObjectInstance>,
    #[serde(default)]
    pub meshes: HashMap<String, Mesh>,
    #[serde(default)]
    pub materials: IndexMap<String, Material>,
    #[serde(default)]
    pub node_groups: HashMap<String, NodeTree>,
    #[serde(default)]
    pub images: IndexMap<String, Image>,
    #[serde(default)]
    pub lights: HashMap<String, Light>,
    #[serde(default)]
    pub cameras: HashMap<String, Camera>,
    #[serde(default)]
    pub world: Option<World>,
    #[serde(default)]
    pub render: RenderSettings,
    #[serde(default)]
    pub active_camera: Option<String>,
}

impl Default for HostScene {
    fn default() -> Self {
        Self {
            name: "Scene".to_string(),
            version: default_version(),
            objects: IndexMap::new(),
            instances: Vec::new(),
            meshes: HashMap::new(),
            materials: IndexMap::new(),
            node_groups: HashMap::new(),
            images: IndexMap::new(),
            lights: HashMap::new(),
            cameras: HashMap::new(),
            world: None,
            render: RenderSettings::default(),
            active_camera: None,
        }
    }
}

impl HostScene {
    pub fn mesh_layout(&self) -> MeshLayout {
        MeshLayout::for_version(self.version)
    }

    /// The evaluated instance list, synthesizing plain instances when the
    /// host supplied none.
    pub fn object_instances(&self) -> Vec<ObjectInstance> {
        if !self.instances.is_empty() {
            return self.instances.clone();
        }
        self.objects
            .values()
            .map(|o| ObjectInstance {
                object: o.name.clone(),
                is_instance: false,
                parent: None,
                matrix_world: o.matrix_world,
            })
            .collect()
    }

    pub fn add_object(&mut self, object: Object) -> String {
        let name = unique_name(&object.name, |n| self.objects.contains_key(n));
        let mut object = object;
        object.name = name.clone();
        self.objects.insert(name.clone(), object);
        name
    }

    pub fn add_material(&mut self, material: Material) -> String {
        let name = unique_name(&material.name, |n| self.materials.contains_key(n));
        let mut material = material;
        material.name = name.clone();
        self.materials.insert(name.clone(), material);
        name
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> String {
        let name = unique_name(&mesh.name, |n| self.meshes.contains_key(n));
        let mut mesh = mesh;
        mesh.name = name.clone();
        self.meshes.insert(name.clone(), mesh);
        name
    }

    pub fn add_image(&mut self, image: Image) -> String {
        let name = unique_name(&image.name, |n| self.images.contains_key(n));
        let mut image = image;
        image.name = name.clone();
        self.images.insert(name.clone(), image);
        name
    }

    pub fn add_light(&mut self, light: Light) -> String {
        let name = unique_name(&light.name, |n| self.lights.contains_key(n));
        let mut light = light;
        light.name = name.clone();
        self.lights.insert(name.clone(), light);
        name
    }

    pub fn add_camera(&mut self, camera: Camera) -> String {
        let name = unique_name(&camera.name, |n| self.cameras.contains_key(n));
        let mut camera = camera;
        camera.name = name.clone();
        self.cameras.insert(name.clone(), camera);
        name
    }
}

/// Host-style unique naming: `Name`, `Name.001`, `Name.002`, ...
pub fn unique_name(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{base}.{n:03}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

pub fn load_host_scene_from_path(path: impl AsRef<Path>) -> Result<HostScene> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read host scene json at {}", path.display()))?;
    let scene: HostScene =
        serde_json::from_str(&text).context("failed to parse host scene json")?;
    // A new host file invalidates textures exported for the previous one.
    crate::textures::clear_texture_cache();
    Ok(scene)
}

pub fn save_host_scene(scene: &HostScene, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let text = serde_json::to_string_pretty(scene).context("failed to serialize host scene")?;
    std::fs::write(path, text)
        .with_context(|| format!("failed to write host scene json at {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_names_follow_host_convention() {
        let taken = ["Cube", "Cube.001"];
        assert_eq!(unique_name("Cube", |n| taken.contains(&n)), "Cube.002");
        assert_eq!(unique_name("Sphere", |n| taken.contains(&n)), "Sphere");
    }

    #[test]
    fn minimal_json_fills_defaults() {
        let scene: HostScene = serde_json::from_str(
            r#"{"objects": {"Cube": {"name": "Cube", "kind": "MESH", "data": "Cube"}}}"#,
        )
        .unwrap();
        assert_eq!(scene.version, [4, 2, 0]);
        assert_eq!(scene.object_instances().len(), 1);
        assert_eq!(scene.render.resolution(), [1920, 1080]);
        assert!(scene.objects["Cube"].matrix_world.abs_diff_eq(Mat4::IDENTITY, 0.0));
    }

    #[test]
    fn integrator_settings_are_tagged() {
        let s: IntegratorSettings =
            serde_json::from_str(r#"{"type": "path", "max_depth": 8, "rr_depth": 3}"#).unwrap();
        assert_eq!(
            s,
            IntegratorSettings::Path {
                max_depth: 8,
                rr_depth: 3,
                hide_emitters: false
            }
        );
    }
}
