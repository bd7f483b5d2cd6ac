//! Renderer scene description to host scene.
//!
//! Import runs in two phases. [`tree::ImportTree::build`] resolves references
//! and sorts every plugin of the scene into typed nodes; [`instantiate`]
//! then creates host data blocks in dependency order and audits which
//! properties were never read.

pub mod camera;
pub mod geometry;
pub mod instantiate;
pub mod lights;
pub mod materials;
pub mod render_settings;
pub mod textures;
pub mod tree;
pub mod world;
pub mod xml_parser;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use log::info;

use crate::config::ImportOptions;
use crate::export::SceneDict;
use crate::host::HostScene;
use crate::props::{Props, Transform};
use crate::report::Report;

pub use tree::ImportTree;
pub use xml_parser::{XmlError, parse_scene_file, parse_scene_str};

/// State shared by the importers of one scene.
#[derive(Debug)]
pub struct ImportContext {
    pub options: ImportOptions,
    axis: Mat4,
    /// Directory relative file names resolve against.
    pub base_dir: PathBuf,
    pub scene: HostScene,
    pub report: Report,
}

impl ImportContext {
    pub fn new(options: ImportOptions, base_dir: PathBuf) -> Result<Self> {
        let axis = options.axis_matrix()?;
        let scene = HostScene {
            version: options.host_version,
            ..Default::default()
        };
        Ok(Self {
            options,
            axis,
            base_dir,
            scene,
            report: Report::default(),
        })
    }

    /// Undo the axis conversion the renderer side carries.
    pub fn host_matrix(&self, to_world: Transform) -> Mat4 {
        self.axis.transpose() * to_world.matrix()
    }

    pub fn host_point(&self, p: [f32; 3]) -> Vec3 {
        self.axis.transpose().transform_point3(Vec3::from(p))
    }

    pub fn resolve_path(&self, filename: &str) -> PathBuf {
        let p = Path::new(filename);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }

    pub fn version(&self) -> [u32; 3] {
        self.scene.version
    }
}

/// Result of an import.
#[derive(Debug, Clone)]
pub struct Imported {
    pub scene: HostScene,
    pub report: Report,
}

/// Build a host scene from a parsed `scene` bag.
pub fn import_scene(root: &Props, options: ImportOptions, base_dir: &Path) -> Result<Imported> {
    let mut ctx = ImportContext::new(options, base_dir.to_path_buf())?;
    let tree = ImportTree::build(root, &mut ctx.report);
    instantiate::instantiate(&tree, &mut ctx).context("import aborted")?;
    instantiate::audit(root, &mut ctx.report);
    info!(
        "imported {} objects, {} materials ({} warnings, {} errors)",
        ctx.scene.objects.len(),
        ctx.scene.materials.len(),
        ctx.report.warnings.len(),
        ctx.report.errors.len()
    );
    Ok(Imported {
        scene: ctx.scene,
        report: ctx.report,
    })
}

/// Import a scene dictionary produced in-process.
pub fn import_dict(dict: &SceneDict, options: ImportOptions, base_dir: &Path) -> Result<Imported> {
    import_scene(&dict.to_props(), options, base_dir)
}

pub fn import_xml_file(path: &Path, options: ImportOptions) -> Result<Imported> {
    let root = parse_scene_file(path).with_context(|| format!("failed to read scene {}", path.display()))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    import_scene(&root, options, dir)
}
