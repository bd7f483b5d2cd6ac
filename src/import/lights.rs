//! Renderer emitters and emissive analytic shapes to host lights.

use std::f32::consts::PI;

use anyhow::{Result, anyhow};
use glam::{Mat4, Quat, Vec3};

use crate::color::max_component;
use crate::export::lights::light_basis;
use crate::host::{AreaShape, Light, LightKind, Object, ObjectKind};
use crate::import::ImportContext;
use crate::import::tree::{Category, Resolver};
use crate::props::{Props, Transform, Value};

/// Split an emitted power into a normalized colour and a scalar.
fn split_power(ctx: &mut ImportContext, name: &str, value: Option<&Value>) -> ([f32; 3], f32) {
    let rgb = match value {
        None => Some([1.0; 3]),
        Some(Value::Spectrum(s)) => s.to_rgb(),
        Some(v) => v.as_float().map(|f| [f; 3]),
    };
    let Some(rgb) = rgb else {
        ctx.report.warn(format!(
            "light '{name}': emission cannot be expressed as a colour; using white"
        ));
        return ([1.0; 3], 1.0);
    };
    let m = max_component(rgb);
    if m <= 0.0 {
        return ([1.0; 3], 0.0);
    }
    (rgb.map(|c| c / m), m)
}

/// Host spot blend for a renderer cone.
pub fn spot_blend(cutoff: f32, beam: f32) -> f32 {
    let (cc, cb) = (cutoff.cos(), beam.min(cutoff).cos());
    if (1.0 - cc).abs() < 1e-6 {
        return 0.0;
    }
    ((cb - cc) / (1.0 - cc)).clamp(0.0, 1.0)
}

fn add_light(ctx: &mut ImportContext, light: Light, matrix_world: Mat4) {
    let name = light.name.clone();
    let data = ctx.scene.add_light(light);
    let mut object = Object::new(name, ObjectKind::Light);
    object.data = Some(data);
    object.matrix_world = matrix_world;
    ctx.scene.add_object(object);
}

fn area_light(ctx: &mut ImportContext, resolver: &Resolver, name: &str, props: &Props) -> Result<()> {
    let emitter = resolver
        .child_of(props, Category::Emitter)?
        .ok_or_else(|| anyhow!("area light '{name}' has no emitter"))?;
    if let Some(bsdf) = resolver.child_of(props, Category::Bsdf)? {
        if bsdf.plugin() != "null" {
            ctx.report.warn(format!(
                "light '{name}': the surface BSDF of an emissive {} is dropped",
                props.plugin()
            ));
        }
        bsdf.mark_all_queried();
    }
    let to_world = props.transform("to_world").unwrap_or(Transform::IDENTITY);
    let mut m = ctx.host_matrix(to_world);
    if !props.bool("flip_normals").unwrap_or(false) {
        ctx.report.warn(format!(
            "light '{name}' emits towards +Z; turned to face the host light direction"
        ));
        m *= Mat4::from_rotation_x(PI);
    }
    let (scale, rotation, translation) = m.to_scale_rotation_translation();
    let (sx, sy) = (2.0 * scale.x.abs(), 2.0 * scale.y.abs());
    let disk = props.plugin() == "disk";
    let mut light = Light::new(name, LightKind::Area);
    light.shape = match (disk, (sx - sy).abs() <= 1e-5 * sx.max(sy)) {
        (false, true) => AreaShape::Square,
        (false, false) => AreaShape::Rectangle,
        (true, true) => AreaShape::Disk,
        (true, false) => {
            ctx.report.warn(format!(
                "light '{name}': non-uniformly scaled disk becomes an ellipse, which cannot be exported back"
            ));
            AreaShape::Ellipse
        }
    };
    light.size = sx;
    light.size_y = sy;
    let area = if disk { PI * sx * sy / 4.0 } else { sx * sy };
    let (color, radiance) = split_power(ctx, name, emitter.get("radiance"));
    light.color = color;
    light.energy = radiance * area * PI;
    let world = Mat4::from_scale_rotation_translation(Vec3::new(1.0, 1.0, scale.z), rotation, translation);
    add_light(ctx, light, world);
    Ok(())
}

pub fn import_light(ctx: &mut ImportContext, resolver: &Resolver, name: &str, props: &Props) -> Result<()> {
    let to_world = props.transform("to_world").unwrap_or(Transform::IDENTITY);
    match props.plugin() {
        "rectangle" | "disk" => area_light(ctx, resolver, name, props),
        "point" => {
            let position = match (props.point("position"), props.transform("to_world")) {
                (Some(p), _) => ctx.host_point(p),
                (None, Some(t)) => ctx.host_matrix(t).w_axis.truncate(),
                (None, None) => Vec3::ZERO,
            };
            let (color, intensity) = split_power(ctx, name, props.get("intensity"));
            let mut light = Light::new(name, LightKind::Point);
            light.color = color;
            light.energy = intensity * 4.0 * PI;
            add_light(ctx, light, Mat4::from_translation(position));
            Ok(())
        }
        "spot" => {
            let cutoff = props.float_or("cutoff_angle", 20.0).to_radians();
            let beam = props
                .float("beam_width")
                .map_or(cutoff * 0.75, f32::to_radians);
            let (color, intensity) = split_power(ctx, name, props.get("intensity"));
            let mut light = Light::new(name, LightKind::Spot);
            light.color = color;
            light.energy = intensity * 4.0 * PI;
            light.spot_size = 2.0 * cutoff;
            light.spot_blend = spot_blend(cutoff, beam);
            if props.get("texture").is_some() {
                ctx.report
                    .warn(format!("light '{name}': projected spot textures are not supported"));
            }
            let world = ctx.host_matrix(to_world) * light_basis().inverse();
            add_light(ctx, light, world);
            Ok(())
        }
        "directional" => {
            let (color, irradiance) = split_power(ctx, name, props.get("irradiance"));
            let mut light = Light::new(name, LightKind::Sun);
            light.color = color;
            light.energy = irradiance;
            let frame = match props.point("direction") {
                Some(d) => Transform(Mat4::from_quat(Quat::from_rotation_arc(
                    Vec3::Z,
                    Vec3::from(d).try_normalize().unwrap_or(Vec3::Z),
                ))),
                None => to_world,
            };
            let world = ctx.host_matrix(frame) * light_basis().inverse();
            add_light(ctx, light, world);
            Ok(())
        }
        other => {
            ctx.report
                .warn(format!("light '{name}': '{other}' emitters are not supported; skipped"));
            props.mark_all_queried();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::ImportOptions;
    use crate::export::lights::beam_width;
    use crate::props::Spectrum;

    fn ctx() -> ImportContext {
        ImportContext::new(ImportOptions::identity_axes(), PathBuf::from(".")).unwrap()
    }

    fn only_light(ctx: &ImportContext) -> &Light {
        ctx.scene.lights.values().next().unwrap()
    }

    #[test]
    fn point_intensity_becomes_watts() {
        let mut ctx = ctx();
        let root = Props::new("scene");
        let resolver = Resolver::new(&root);
        let props = Props::new("point")
            .with("position", Value::Point([1.0, 2.0, 3.0]))
            .with("intensity", Spectrum::Rgb([2.0, 1.0, 1.0]));
        import_light(&mut ctx, &resolver, "Lamp", &props).unwrap();
        let light = only_light(&ctx);
        assert_eq!(light.color, [1.0, 0.5, 0.5]);
        assert!((light.energy - 8.0 * PI).abs() < 1e-4);
        let object = &ctx.scene.objects["Lamp"];
        assert_eq!(object.matrix_world.w_axis.truncate(), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn spot_blend_inverts_the_beam_width() {
        let cutoff = 0.4f32;
        for blend in [0.0f32, 0.15, 0.5, 1.0] {
            let beam = beam_width(cutoff, blend);
            assert!((spot_blend(cutoff, beam) - blend).abs() < 1e-4, "blend {blend}");
        }
    }

    #[test]
    fn emissive_rectangle_becomes_an_area_light() {
        let mut ctx = ctx();
        let root = Props::new("scene");
        let resolver = Resolver::new(&root);
        let to_world = Mat4::from_scale(Vec3::new(1.0, 0.5, 1.0));
        let props = Props::new("rectangle")
            .with("flip_normals", true)
            .with("to_world", Transform(to_world))
            .with("bsdf", Props::new("null"))
            .with("emitter", Props::new("area").with("radiance", Spectrum::Rgb([1.0; 3])));
        import_light(&mut ctx, &resolver, "Panel", &props).unwrap();
        let light = only_light(&ctx);
        assert_eq!(light.shape, AreaShape::Rectangle);
        assert_eq!((light.size, light.size_y), (2.0, 1.0));
        assert!((light.energy - 2.0 * PI).abs() < 1e-4);
        assert!(ctx.report.is_clean());
    }

    #[test]
    fn unflipped_rectangle_is_turned_around() {
        let mut ctx = ctx();
        let root = Props::new("scene");
        let resolver = Resolver::new(&root);
        let props = Props::new("rectangle")
            .with("emitter", Props::new("area").with("radiance", Spectrum::Rgb([1.0; 3])));
        import_light(&mut ctx, &resolver, "Panel", &props).unwrap();
        assert!(ctx.report.has_warning("+Z"));
        let object = &ctx.scene.objects["Panel"];
        let down = object.matrix_world.transform_vector3(Vec3::NEG_Z);
        assert!((down - Vec3::Z).length() < 1e-5);
    }

    #[test]
    fn directional_direction_points_the_sun() {
        let mut ctx = ctx();
        let root = Props::new("scene");
        let resolver = Resolver::new(&root);
        let props = Props::new("directional")
            .with("direction", Value::Point([0.0, 0.0, -1.0]))
            .with("irradiance", Spectrum::Rgb([3.0; 3]));
        import_light(&mut ctx, &resolver, "Sun", &props).unwrap();
        let object = &ctx.scene.objects["Sun"];
        let shine = object.matrix_world.transform_vector3(Vec3::NEG_Z);
        assert!((shine - Vec3::NEG_Z).length() < 1e-5);
        assert_eq!(only_light(&ctx).energy, 3.0);
    }
}
