//! Renderer sensors to host cameras.

use anyhow::{Result, anyhow};

use crate::export::camera::host_camera_matrix;
use crate::host::{Camera, Object, ObjectKind, Projection, SensorFit};
use crate::import::ImportContext;
use crate::import::render_settings::{film_size, import_film, import_sampler};
use crate::import::tree::{Category, Resolver};
use crate::props::{Props, Transform};

/// `fov_axis` resolved against the film aspect to `x` or `y`.
fn fov_axis(props: &Props, [w, h]: [u32; 2]) -> &'static str {
    match props.string("fov_axis") {
        Some("y") => "y",
        Some("smaller") => if w <= h { "x" } else { "y" },
        Some("larger") => if w >= h { "x" } else { "y" },
        _ => "x",
    }
}

/// Focal length and sensor fit for a field of view measured along `axis`.
fn lens_for_fov(camera: &mut Camera, fov_deg: f32, axis: &str, [w, h]: [u32; 2]) {
    let (fit, sensor) = match axis {
        "x" if w >= h => (SensorFit::Auto, camera.sensor_width),
        "x" => (SensorFit::Horizontal, camera.sensor_width),
        _ if h > w => (SensorFit::Auto, camera.sensor_width),
        _ => (SensorFit::Vertical, camera.sensor_height),
    };
    camera.sensor_fit = fit;
    camera.lens = sensor / (2.0 * (fov_deg.to_radians() / 2.0).tan());
}

/// `"50mm"` style focal lengths, measured against a 36mm sensor.
fn parse_focal_length(s: &str) -> Option<f32> {
    s.trim().trim_end_matches("mm").trim().parse().ok()
}

pub fn import_camera(
    ctx: &mut ImportContext,
    resolver: &Resolver,
    name: &str,
    props: &Props,
    active: bool,
) -> Result<()> {
    let film = resolver.child_of(props, Category::Film)?;
    let sampler = resolver.child_of(props, Category::Sampler)?;
    let size = film_size(film, &mut ctx.report);
    let [w, h] = size;
    let to_world = props.transform("to_world").unwrap_or(Transform::IDENTITY);
    let mut camera = Camera::new(name);
    let orthographic = match props.plugin() {
        "perspective" | "thinlens" => {
            camera.projection = Projection::Perspective;
            let axis = fov_axis(props, size);
            match (props.float("fov"), props.string("focal_length")) {
                (Some(fov), _) => lens_for_fov(&mut camera, fov, axis, size),
                (None, Some(f)) => {
                    camera.lens = parse_focal_length(f)
                        .ok_or_else(|| anyhow!("camera '{name}': bad focal length '{f}'"))?;
                }
                (None, None) => lens_for_fov(&mut camera, 39.597_755, axis, size),
            }
            if props.string("fov_axis") == Some("diagonal") {
                ctx.report.warn(format!(
                    "camera '{name}': diagonal field of view is imported as horizontal"
                ));
            }
            let max = w.max(h) as f32;
            camera.shift_x = props.float_or("principal_point_offset_x", 0.0) * w as f32 / max;
            camera.shift_y = -props.float_or("principal_point_offset_y", 0.0) * h as f32 / max;
            if props.plugin() == "thinlens" {
                let radius = props.float_or("aperture_radius", 0.0);
                camera.dof.focus_distance = props.float_or("focus_distance", 0.0);
                if radius > 0.0 {
                    camera.dof.use_dof = true;
                    camera.dof.aperture_fstop = camera.lens / (2.0 * radius * 1000.0);
                }
            }
            false
        }
        "orthographic" => {
            camera.projection = Projection::Orthographic;
            camera.ortho_scale = 2.0 * to_world.matrix().x_axis.truncate().length();
            true
        }
        other => {
            ctx.report
                .warn(format!("camera '{name}': '{other}' sensors are not supported; skipped"));
            props.mark_all_queried();
            return Ok(());
        }
    };
    camera.clip_start = props.float_or("near_clip", 0.01);
    camera.clip_end = props.float_or("far_clip", 10000.0);

    let data = ctx.scene.add_camera(camera);
    let mut object = Object::new(name, ObjectKind::Camera);
    object.data = Some(data);
    object.matrix_world = host_camera_matrix(&Transform(ctx.host_matrix(to_world)), orthographic);
    let object = ctx.scene.add_object(object);

    if !active {
        for p in film.into_iter().chain(sampler) {
            p.mark_all_queried();
        }
        return Ok(());
    }
    ctx.scene.active_camera = Some(object);
    if let Some(film) = film {
        import_film(ctx, film, resolver)?;
    }
    if let Some(sampler) = sampler {
        import_sampler(ctx, sampler);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use glam::{Mat4, Vec3};

    use super::*;
    use crate::config::ImportOptions;
    use crate::export::camera::field_of_view;

    fn ctx() -> ImportContext {
        ImportContext::new(ImportOptions::identity_axes(), PathBuf::from(".")).unwrap()
    }

    fn film(w: i32, h: i32) -> Props {
        Props::new("hdrfilm").with("width", w).with("height", h)
    }

    #[test]
    fn fov_round_trips_through_the_focal_length() {
        let mut ctx = ctx();
        let root = Props::new("scene");
        let resolver = Resolver::new(&root);
        let sensor = Props::new("perspective")
            .with("fov", 45.0f32)
            .with("fov_axis", "x")
            .with("film", film(640, 480));
        import_camera(&mut ctx, &resolver, "Cam", &sensor, true).unwrap();
        let camera = &ctx.scene.cameras["Cam"];
        assert_eq!(camera.sensor_fit, SensorFit::Auto);
        let (fov, axis) = field_of_view(camera, &ctx.scene.render);
        assert_eq!(axis, "x");
        assert!((fov - 45.0).abs() < 1e-3);
        assert_eq!(ctx.scene.active_camera.as_deref(), Some("Cam"));
    }

    #[test]
    fn vertical_fov_on_landscape_film_fits_vertically() {
        let mut ctx = ctx();
        let root = Props::new("scene");
        let resolver = Resolver::new(&root);
        let sensor = Props::new("perspective")
            .with("fov", 30.0f32)
            .with("fov_axis", "y")
            .with("film", film(640, 480));
        import_camera(&mut ctx, &resolver, "Cam", &sensor, true).unwrap();
        let camera = &ctx.scene.cameras["Cam"];
        assert_eq!(camera.sensor_fit, SensorFit::Vertical);
        let (fov, axis) = field_of_view(camera, &ctx.scene.render);
        assert_eq!(axis, "y");
        assert!((fov - 30.0).abs() < 1e-3);
    }

    #[test]
    fn thinlens_sets_depth_of_field() {
        let mut ctx = ctx();
        let root = Props::new("scene");
        let resolver = Resolver::new(&root);
        let sensor = Props::new("thinlens")
            .with("fov", 39.597_755f32)
            .with("aperture_radius", 0.05f32 / 2.8 / 2.0)
            .with("focus_distance", 4.0f32);
        import_camera(&mut ctx, &resolver, "Cam", &sensor, true).unwrap();
        let camera = &ctx.scene.cameras["Cam"];
        assert!(camera.dof.use_dof);
        assert_eq!(camera.dof.focus_distance, 4.0);
        assert!((camera.lens - 50.0).abs() < 1e-2);
        assert!((camera.dof.aperture_fstop - 2.8).abs() < 1e-2);
    }

    #[test]
    fn orthographic_scale_comes_from_the_transform() {
        let mut ctx = ctx();
        let root = Props::new("scene");
        let resolver = Resolver::new(&root);
        let m = Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0)) * Mat4::from_scale(Vec3::new(3.0, 3.0, 1.0));
        let sensor = Props::new("orthographic").with("to_world", Transform(m));
        import_camera(&mut ctx, &resolver, "Ortho", &sensor, false).unwrap();
        let camera = &ctx.scene.cameras["Ortho"];
        assert_eq!(camera.projection, Projection::Orthographic);
        assert!((camera.ortho_scale - 6.0).abs() < 1e-5);
        let object = &ctx.scene.objects["Ortho"];
        assert!((object.matrix_world.x_axis.truncate().length() - 1.0).abs() < 1e-5);
        assert!(ctx.scene.active_camera.is_none());
    }

    #[test]
    fn focal_length_strings_are_parsed() {
        assert_eq!(parse_focal_length("50mm"), Some(50.0));
        assert_eq!(parse_focal_length(" 35 mm"), Some(35.0));
        assert_eq!(parse_focal_length("wide"), None);
    }
}
