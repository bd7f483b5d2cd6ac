//! Host lights to renderer emitters and emissive analytic shapes.

use std::f32::consts::PI;

use anyhow::{Result, anyhow, bail};
use glam::{Mat4, Vec3};

use crate::export::context::ExportContext;
use crate::host::{AreaShape, HostScene, Light, LightKind, Object};
use crate::props::{Props, Spectrum, Value};

/// Host lights shine down local -Z; renderer directional and spot emitters
/// shine down +Z.
pub fn light_basis() -> Mat4 {
    Mat4::from_rotation_x(PI)
}

fn scaled(color: [f32; 3], s: f32) -> Spectrum {
    Spectrum::Rgb(color.map(|c| c * s))
}

/// Inner cone of a spot light from the host's blend factor.
pub fn beam_width(cutoff: f32, blend: f32) -> f32 {
    (blend + (1.0 - blend) * cutoff.cos()).clamp(-1.0, 1.0).acos()
}

/// Size of an area light along its local x and y, before object scale.
fn area_extent(light: &Light) -> Result<(&'static str, f32, f32)> {
    Ok(match light.shape {
        AreaShape::Square => ("rectangle", light.size, light.size),
        AreaShape::Rectangle => ("rectangle", light.size, light.size_y),
        AreaShape::Disk => ("disk", light.size, light.size),
        AreaShape::Ellipse => {
            if (light.size - light.size_y).abs() > 1e-6 {
                bail!(
                    "light '{}': elliptic area lights are not supported (size {} x {})",
                    light.name,
                    light.size,
                    light.size_y
                );
            }
            ("disk", light.size, light.size)
        }
    })
}

pub fn light_props(ctx: &ExportContext, light: &Light, world: Mat4) -> Result<Props> {
    Ok(match light.kind {
        LightKind::Point => {
            let p = ctx.transform_matrix(world).translation();
            Props::new("point")
                .with("position", Value::Point(p.to_array()))
                .with("intensity", scaled(light.color, light.energy / (4.0 * PI)))
        }
        LightKind::Sun => Props::new("directional")
            .with("irradiance", scaled(light.color, light.energy))
            .with("to_world", ctx.transform_matrix(world * light_basis())),
        LightKind::Spot => {
            let cutoff = light.spot_size / 2.0;
            Props::new("spot")
                .with("intensity", scaled(light.color, light.energy / (4.0 * PI)))
                .with("cutoff_angle", cutoff.to_degrees())
                .with("beam_width", beam_width(cutoff, light.spot_blend).to_degrees())
                .with("to_world", ctx.transform_matrix(world * light_basis()))
        }
        LightKind::Area => {
            let (plugin, sx, sy) = area_extent(light)?;
            let (scale, _, _) = world.to_scale_rotation_translation();
            if plugin == "disk" && (scale.x - scale.y).abs() > 1e-5 {
                bail!("light '{}': disk lights cannot be scaled non-uniformly", light.name);
            }
            let (wx, wy) = (sx * scale.x.abs(), sy * scale.y.abs());
            let area = if plugin == "disk" {
                PI * (wx / 2.0) * (wy / 2.0)
            } else {
                wx * wy
            };
            if area <= 0.0 {
                bail!("light '{}' has zero area", light.name);
            }
            // Renderer primitives span [-1, 1] and face -Z after flipping.
            let local = Mat4::from_scale(Vec3::new(0.5 * sx, 0.5 * sy, 1.0));
            Props::new(plugin)
                .with("flip_normals", true)
                .with("to_world", ctx.transform_matrix(world * local))
                .with("bsdf", Props::new("null"))
                .with(
                    "emitter",
                    Props::new("area").with("radiance", scaled(light.color, light.energy / (area * PI))),
                )
        }
    })
}

pub fn export_light(ctx: &mut ExportContext, scene: &HostScene, object: &Object, matrix_world: Mat4) -> Result<()> {
    let data = object
        .data
        .as_deref()
        .ok_or_else(|| anyhow!("light object '{}' has no light data", object.name))?;
    let light = scene
        .lights
        .get(data)
        .ok_or_else(|| anyhow!("light object '{}' references missing light '{data}'", object.name))?;
    let props = light_props(ctx, light, matrix_world)?;
    ctx.add_object(&object.name, props, None, false);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::ExportOptions;

    fn ctx() -> ExportContext {
        let options = ExportOptions {
            export_assets: false,
            ..ExportOptions::identity_axes()
        };
        ExportContext::new(options, None, PathBuf::from(".")).unwrap()
    }

    #[test]
    fn rectangle_radiance_is_per_unit_area() {
        let mut light = Light::new("Area", LightKind::Area);
        light.energy = 100.0;
        let p = light_props(&ctx(), &light, Mat4::IDENTITY).unwrap();
        assert_eq!(p.plugin(), "rectangle");
        assert_eq!(p.bool("flip_normals"), Some(true));
        assert_eq!(p.bag("bsdf").unwrap().plugin(), "null");
        let radiance = p.bag("emitter").unwrap().spectrum("radiance").unwrap().clone();
        let expected = 100.0 / PI;
        match radiance {
            Spectrum::Rgb(c) => assert!(c.iter().all(|v| (v - expected).abs() < 1e-4)),
            other => panic!("unexpected {other:?}"),
        }
        let m = p.transform("to_world").unwrap().matrix();
        assert!(m.abs_diff_eq(Mat4::from_scale(Vec3::new(0.5, 0.5, 1.0)), 1e-6));
    }

    #[test]
    fn disk_rejects_non_uniform_scale() {
        let mut light = Light::new("Disk", LightKind::Area);
        light.shape = AreaShape::Disk;
        let world = Mat4::from_scale(Vec3::new(1.0, 2.0, 1.0));
        assert!(light_props(&ctx(), &light, world).is_err());
        light.shape = AreaShape::Ellipse;
        light.size_y = 2.0;
        assert!(light_props(&ctx(), &light, Mat4::IDENTITY).is_err());
    }

    #[test]
    fn spot_cone_angles() {
        let mut light = Light::new("Spot", LightKind::Spot);
        light.spot_size = 1.0;
        light.spot_blend = 0.0;
        let p = light_props(&ctx(), &light, Mat4::IDENTITY).unwrap();
        let cutoff = p.float("cutoff_angle").unwrap();
        assert!((cutoff - 0.5f32.to_degrees()).abs() < 1e-4);
        assert!((p.float("beam_width").unwrap() - cutoff).abs() < 1e-3);
    }

    #[test]
    fn point_light_position_and_intensity() {
        let light = Light::new("Point", LightKind::Point);
        let world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let p = light_props(&ctx(), &light, world).unwrap();
        assert_eq!(p.point("position"), Some([1.0, 2.0, 3.0]));
        let i = p.spectrum("intensity").and_then(Spectrum::to_rgb).unwrap();
        assert!((i[0] - 10.0 / (4.0 * PI)).abs() < 1e-6);
    }
}
