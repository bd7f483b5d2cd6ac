//! State shared by every export translator.

use std::cell::Cell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Result, bail};
use glam::Mat4;
use log::debug;
use serde_json::Value as Json;

use crate::config::ExportOptions;
use crate::export::dict::SceneDict;
use crate::host::Image;
use crate::props::{Props, Spectrum, Transform, sanitize_id};
use crate::report::Report;
use crate::textures::{self, TexturePayload, TextureTarget};

pub const DEFAULT_BSDF_ID: &str = "default-bsdf";
pub const EMPTY_EMITTER_BSDF_ID: &str = "empty-emitter-bsdf";

/// What a material became once exported.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedMaterial {
    /// Dictionary id of the BSDF. `None` for purely emissive materials.
    pub bsdf: Option<String>,
    /// Inline emitter every shape using the material carries.
    pub emitter: Option<Props>,
}

/// A boolean that is `true` for the lifetime of a [`FlagGuard`].
#[derive(Debug, Clone, Default)]
pub struct ScopedFlag(Rc<Cell<bool>>);

impl ScopedFlag {
    pub fn get(&self) -> bool {
        self.0.get()
    }

    pub fn scope(&self) -> FlagGuard {
        let prev = self.0.replace(true);
        FlagGuard {
            flag: self.0.clone(),
            prev,
        }
    }
}

/// Restores the flag's previous value when dropped, including on early
/// returns and unwinding.
#[must_use = "the flag resets as soon as the guard is dropped"]
#[derive(Debug)]
pub struct FlagGuard {
    flag: Rc<Cell<bool>>,
    prev: bool,
}

impl Drop for FlagGuard {
    fn drop(&mut self) {
        self.flag.set(self.prev);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpectrumMode {
    #[default]
    Rgb,
    /// Prefer `spectrum` tags: greys become uniform spectra.
    Spectrum,
}

pub struct ExportContext {
    pub options: ExportOptions,
    axis: Mat4,
    pub scene: SceneDict,
    /// Host object name → dictionary id.
    pub key_mapping: HashMap<String, String>,
    pub exported_materials: HashMap<String, ExportedMaterial>,
    pub report: Report,
    /// Export directory. `None` when the scene is consumed in-process.
    pub directory: Option<PathBuf>,
    /// Directory host-relative image paths resolve against.
    pub source_dir: PathBuf,
    /// Host version, for attribute names and node socket spellings.
    pub host_version: [u32; 3],
    unbounded: ScopedFlag,
    raw: ScopedFlag,
    counter: usize,
}

impl ExportContext {
    pub fn new(options: ExportOptions, directory: Option<PathBuf>, source_dir: PathBuf) -> Result<Self> {
        let axis = options.axis_matrix()?;
        if options.export_assets && directory.is_none() {
            bail!("exporting assets requires an output directory");
        }
        Ok(Self {
            options,
            axis,
            scene: SceneDict::new(),
            key_mapping: HashMap::new(),
            exported_materials: HashMap::new(),
            report: Report::default(),
            directory,
            source_dir,
            host_version: [4, 2, 0],
            unbounded: ScopedFlag::default(),
            raw: ScopedFlag::default(),
            counter: 0,
        })
    }

    pub fn axis_matrix(&self) -> Mat4 {
        self.axis
    }

    /// Add a plugin to the scene dictionary.
    ///
    /// Without an explicit id the bag's own `id` is consumed, else an
    /// `elm__N` id is generated. Generated ids are only written out when
    /// `force_export_id` or the `export_ids` option asks for it.
    pub fn add_object(
        &mut self,
        host_name: &str,
        mut props: Props,
        id: Option<&str>,
        force_export_id: bool,
    ) -> bool {
        if !props.is_valid() {
            self.report
                .error(format!("refusing to add '{host_name}': plugin has no type"));
            return false;
        }
        let own_id = props.take_id();
        let (id, keep_id) = match (id, own_id) {
            (Some(id), _) => (sanitize_id(id), true),
            (None, Some(id)) => (sanitize_id(&id), true),
            (None, None) => (self.generate_id(), force_export_id),
        };
        if !self.scene.insert(id.clone(), props, keep_id) {
            self.report
                .error(format!("duplicate scene id '{id}' (from '{host_name}')"));
            return false;
        }
        debug!("added '{id}' for host object '{host_name}'");
        self.key_mapping.insert(host_name.to_string(), id);
        true
    }

    fn generate_id(&mut self) -> String {
        loop {
            let id = format!("elm__{}", self.counter);
            self.counter += 1;
            if !self.scene.contains(&id) {
                return id;
            }
        }
    }

    pub fn scope_unbounded_texture_input(&self) -> FlagGuard {
        self.unbounded.scope()
    }

    pub fn scope_raw_texture_input(&self) -> FlagGuard {
        self.raw.scope()
    }

    pub fn unbounded_texture_input(&self) -> bool {
        self.unbounded.get()
    }

    pub fn raw_texture_input(&self) -> bool {
        self.raw.get()
    }

    /// A tristimulus colour, lifted to unbounded sRGB inside the unbounded
    /// scope.
    pub fn rgb(&self, color: [f32; 3]) -> Spectrum {
        if self.unbounded.get() {
            Spectrum::Srgb {
                color,
                unbounded: true,
            }
        } else {
            Spectrum::Rgb(color)
        }
    }

    /// Coerce a loosely typed value into the narrowest spectrum tag.
    ///
    /// Accepts a number, a filename, `[v]`, `[r, g, b]`, `[r, g, b, a]`
    /// (alpha dropped) or a list of `[wavelength, value]` pairs.
    pub fn spectrum(&self, value: &Json, mode: SpectrumMode) -> Result<Spectrum> {
        let spectrum = match value {
            Json::Number(n) => Spectrum::Uniform(n.as_f64().unwrap_or(0.0) as f32),
            Json::Bool(b) => Spectrum::Uniform(if *b { 1.0 } else { 0.0 }),
            Json::String(path) => Spectrum::File(path.clone()),
            Json::Array(items) if items.iter().all(Json::is_number) => {
                let values: Vec<f32> = items
                    .iter()
                    .filter_map(Json::as_f64)
                    .map(|v| v as f32)
                    .collect();
                match values.as_slice() {
                    [v] => Spectrum::Uniform(*v),
                    [r, g, b] | [r, g, b, _] => {
                        if mode == SpectrumMode::Spectrum && r == g && g == b {
                            Spectrum::Uniform(*r)
                        } else {
                            self.rgb([*r, *g, *b])
                        }
                    }
                    other => bail!("cannot read a colour from {} values", other.len()),
                }
            }
            Json::Array(items) if !items.is_empty() && items.iter().all(Json::is_array) => {
                let mut wavelengths = Vec::with_capacity(items.len());
                let mut values = Vec::with_capacity(items.len());
                for pair in items {
                    match pair.as_array().map(Vec::as_slice) {
                        Some([w, v]) => match (w.as_f64(), v.as_f64()) {
                            (Some(w), Some(v)) => {
                                wavelengths.push(w as f32);
                                values.push(v as f32);
                            }
                            _ => bail!("spectrum samples must be numeric pairs"),
                        },
                        _ => bail!("spectrum samples must be [wavelength, value] pairs"),
                    }
                }
                Spectrum::Sampled {
                    wavelengths,
                    values,
                }
            }
            Json::Array(_) => bail!("mixed-type list cannot be read as a spectrum"),
            other => bail!("cannot read a spectrum from {other}"),
        };
        Ok(spectrum)
    }

    /// Host world matrix to renderer `to_world`.
    pub fn transform_matrix(&self, m: Mat4) -> Transform {
        Transform(self.axis * m)
    }

    pub fn texture_target(&self) -> TextureTarget {
        match (&self.directory, self.options.export_assets) {
            (Some(dir), true) => TextureTarget::Directory(dir.clone()),
            _ => TextureTarget::InMemory,
        }
    }

    /// Export an image through the process-wide cache. Failures are logged
    /// and yield `None`.
    pub fn export_and_cache_texture(&mut self, image: &Image, suffix: Option<&str>) -> Option<TexturePayload> {
        let target = self.texture_target();
        match textures::export_and_cache_texture(
            textures::texture_cache(),
            image,
            &target,
            &self.source_dir,
            suffix,
        ) {
            Ok(payload) => Some(payload),
            Err(e) => {
                self.report
                    .error(format!("failed to export image '{}': {e:#}", image.name));
                None
            }
        }
    }

    pub fn mesh_dir(&self) -> Option<PathBuf> {
        self.directory.as_deref().map(|d| d.join("meshes"))
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Add `default-bsdf` the first time it is needed.
    pub fn default_bsdf(&mut self) -> String {
        if !self.scene.contains(DEFAULT_BSDF_ID) {
            let bsdf = Props::new("twosided").with(
                "bsdf",
                Props::new("diffuse").with("reflectance", Spectrum::Rgb([0.8; 3])),
            );
            self.add_object(DEFAULT_BSDF_ID, bsdf, Some(DEFAULT_BSDF_ID), true);
        }
        DEFAULT_BSDF_ID.to_string()
    }

    /// Add the black BSDF purely emissive shapes reference.
    pub fn empty_emitter_bsdf(&mut self) -> String {
        if !self.scene.contains(EMPTY_EMITTER_BSDF_ID) {
            let bsdf = Props::new("diffuse").with("reflectance", Spectrum::Rgb([0.0; 3]));
            self.add_object(EMPTY_EMITTER_BSDF_ID, bsdf, Some(EMPTY_EMITTER_BSDF_ID), true);
        }
        EMPTY_EMITTER_BSDF_ID.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ExportContext {
        let options = ExportOptions {
            export_assets: false,
            ..Default::default()
        };
        ExportContext::new(options, None, PathBuf::from(".")).unwrap()
    }

    #[test]
    fn add_object_generates_and_sanitizes_ids() {
        let mut c = ctx();
        assert!(c.add_object("Sun", Props::new("directional"), None, false));
        assert!(c.add_object("Cube.001", Props::new("ply"), Some("mesh-Cube.001"), false));
        let consumed = Props::new("diffuse").with_id("my.mat");
        assert!(c.add_object("mat", consumed, None, false));

        let ids: Vec<&str> = c.scene.ids().collect();
        assert_eq!(ids, vec!["elm__0", "mesh-Cube_001", "my_mat"]);
        assert!(!c.scene.entry("elm__0").unwrap().keep_id);
        assert!(c.scene.entry("my_mat").unwrap().keep_id);
        assert_eq!(c.key_mapping["Cube.001"], "mesh-Cube_001");
    }

    #[test]
    fn malformed_and_duplicate_bags_are_refused() {
        let mut c = ctx();
        assert!(!c.add_object("x", Props::new(""), None, false));
        assert!(c.add_object("a", Props::new("ply"), Some("a"), false));
        assert!(!c.add_object("b", Props::new("ply"), Some("a"), false));
        assert_eq!(c.report.errors.len(), 2);
        assert_eq!(c.scene.len(), 1);
    }

    #[test]
    fn spectrum_coercion_picks_narrowest_tag() {
        let c = ctx();
        let m = SpectrumMode::Rgb;
        assert_eq!(c.spectrum(&json!(0.5), m).unwrap(), Spectrum::Uniform(0.5));
        assert_eq!(c.spectrum(&json!([0.5]), m).unwrap(), Spectrum::Uniform(0.5));
        assert_eq!(
            c.spectrum(&json!([0.8, 0.8, 0.8, 1.0]), m).unwrap(),
            Spectrum::Rgb([0.8; 3])
        );
        assert_eq!(
            c.spectrum(&json!("spectra/gold.spd"), m).unwrap(),
            Spectrum::File("spectra/gold.spd".into())
        );
        assert_eq!(
            c.spectrum(&json!([[400.0, 0.1], [700.0, 0.9]]), m).unwrap(),
            Spectrum::Sampled {
                wavelengths: vec![400.0, 700.0],
                values: vec![0.1, 0.9]
            }
        );
        assert!(c.spectrum(&json!([0.1, [400.0, 1.0]]), m).is_err());
        assert_eq!(
            c.spectrum(&json!([0.3, 0.3, 0.3]), SpectrumMode::Spectrum).unwrap(),
            Spectrum::Uniform(0.3)
        );
    }

    #[test]
    fn unbounded_scope_resets_on_every_exit() {
        let c = ctx();
        fn fails_inside(c: &ExportContext) -> Result<()> {
            let _g = c.scope_unbounded_texture_input();
            assert!(c.unbounded_texture_input());
            bail!("conversion failed")
        }
        assert!(fails_inside(&c).is_err());
        assert!(!c.unbounded_texture_input());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _g = c.scope_unbounded_texture_input();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(!c.unbounded_texture_input());

        {
            let _g = c.scope_unbounded_texture_input();
            assert_eq!(
                c.rgb([2.0, 1.0, 0.5]),
                Spectrum::Srgb {
                    color: [2.0, 1.0, 0.5],
                    unbounded: true
                }
            );
        }
        assert_eq!(c.rgb([2.0, 1.0, 0.5]), Spectrum::Rgb([2.0, 1.0, 0.5]));
    }

    #[test]
    fn nested_scopes_restore_outer_value() {
        let c = ctx();
        let outer = c.scope_raw_texture_input();
        {
            let _inner = c.scope_raw_texture_input();
        }
        assert!(c.raw_texture_input());
        drop(outer);
        assert!(!c.raw_texture_input());
    }

    #[test]
    fn defaults_are_added_once() {
        let mut c = ctx();
        assert_eq!(c.default_bsdf(), DEFAULT_BSDF_ID);
        assert_eq!(c.default_bsdf(), DEFAULT_BSDF_ID);
        assert_eq!(c.scene.len(), 1);
        assert_eq!(c.scene.get(DEFAULT_BSDF_ID).unwrap().plugin(), "twosided");
    }
}
