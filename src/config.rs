//! Options recognised by the exporter and importer.

use std::path::Path;

use anyhow::{Context, Result, bail};
use glam::{Mat3, Mat4, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    #[serde(rename = "X")]
    X,
    #[serde(rename = "Y")]
    Y,
    #[serde(rename = "Z")]
    Z,
    #[serde(rename = "-X")]
    NegX,
    #[serde(rename = "-Y")]
    NegY,
    #[serde(rename = "-Z")]
    NegZ,
}

impl Axis {
    pub fn vector(self) -> Vec3 {
        match self {
            Axis::X => Vec3::X,
            Axis::Y => Vec3::Y,
            Axis::Z => Vec3::Z,
            Axis::NegX => Vec3::NEG_X,
            Axis::NegY => Vec3::NEG_Y,
            Axis::NegZ => Vec3::NEG_Z,
        }
    }

    fn index(self) -> usize {
        match self {
            Axis::X | Axis::NegX => 0,
            Axis::Y | Axis::NegY => 1,
            Axis::Z | Axis::NegZ => 2,
        }
    }

    pub fn parse(s: &str) -> Result<Axis> {
        Ok(match s.trim() {
            "X" | "x" => Axis::X,
            "Y" | "y" => Axis::Y,
            "Z" | "z" => Axis::Z,
            "-X" | "-x" => Axis::NegX,
            "-Y" | "-y" => Axis::NegY,
            "-Z" | "-z" => Axis::NegZ,
            other => bail!("unknown axis '{other}' (expected X, Y, Z, -X, -Y or -Z)"),
        })
    }
}

fn basis(forward: Axis, up: Axis) -> Result<Mat3> {
    if forward.index() == up.index() {
        bail!("forward axis {forward:?} and up axis {up:?} must differ");
    }
    let f = forward.vector();
    let u = up.vector();
    Ok(Mat3::from_cols(f.cross(u), f, u))
}

/// Rigid basis change from the host convention (forward `Y`, up `Z`) to the
/// given forward/up pair.
pub fn axis_conversion(forward: Axis, up: Axis) -> Result<Mat4> {
    let from = basis(Axis::Y, Axis::Z)?;
    let to = basis(forward, up)?;
    Ok(Mat4::from_mat3(to * from.transpose()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Export only selected objects (and the instancers of selected instances).
    pub use_selection: bool,
    /// Write an `id` on every plugin, including generated `elm__N` ones.
    pub export_ids: bool,
    /// Serialize materials/geometry/emitters/cameras into separate files.
    pub split_files: bool,
    /// Write mesh and texture files. Off when the scene is consumed in-process.
    pub export_assets: bool,
    /// Skip the host's default grey world background.
    pub ignore_default_background: bool,
    pub axis_forward: Axis,
    pub axis_up: Axis,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            use_selection: false,
            export_ids: false,
            split_files: false,
            export_assets: true,
            ignore_default_background: true,
            axis_forward: Axis::NegZ,
            axis_up: Axis::Y,
        }
    }
}

impl ExportOptions {
    /// Options that keep host coordinates unchanged.
    pub fn identity_axes() -> Self {
        Self {
            axis_forward: Axis::Y,
            axis_up: Axis::Z,
            ..Default::default()
        }
    }

    pub fn axis_matrix(&self) -> Result<Mat4> {
        axis_conversion(self.axis_forward, self.axis_up)
    }

    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    pub axis_forward: Axis,
    pub axis_up: Axis,
    /// Host release the imported scene is built for; picks mesh attribute
    /// names, shader socket names and the Cycles sampling pattern.
    pub host_version: [u32; 3],
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            axis_forward: Axis::NegZ,
            axis_up: Axis::Y,
            host_version: [4, 2, 0],
        }
    }
}

impl ImportOptions {
    pub fn identity_axes() -> Self {
        Self {
            axis_forward: Axis::Y,
            axis_up: Axis::Z,
            ..Default::default()
        }
    }

    pub fn axis_matrix(&self) -> Result<Mat4> {
        axis_conversion(self.axis_forward, self.axis_up)
    }

    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read options at {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid options in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_axes_give_identity() {
        let m = axis_conversion(Axis::Y, Axis::Z).unwrap();
        assert!(m.abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn default_maps_z_up_to_y_up() {
        let m = ExportOptions::default().axis_matrix().unwrap();
        let up = m.transform_vector3(Vec3::Z);
        let fwd = m.transform_vector3(Vec3::Y);
        assert!(up.abs_diff_eq(Vec3::Y, 1e-6));
        assert!(fwd.abs_diff_eq(Vec3::NEG_Z, 1e-6));
        assert!((m.determinant() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn same_axis_is_a_conflict() {
        assert!(axis_conversion(Axis::Z, Axis::NegZ).is_err());
    }

    #[test]
    fn options_fill_defaults_from_partial_json() {
        let opts: ExportOptions = serde_json::from_str(r#"{"split_files": true, "axis_up": "Z", "axis_forward": "Y"}"#).unwrap();
        assert!(opts.split_files);
        assert!(opts.export_assets);
        assert_eq!(opts.axis_up, Axis::Z);
    }
}
