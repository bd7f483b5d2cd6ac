//! Host cameras to renderer sensors.

use anyhow::{Result, anyhow};
use glam::{Mat4, Vec3};

use crate::export::context::ExportContext;
use crate::export::render_settings::{film, sampler};
use crate::host::{Camera, HostScene, Object, Projection, RenderSettings, SensorFit};
use crate::props::{Props, Transform};

/// Host cameras look down local -Z, renderer sensors down +Z.
pub fn camera_basis() -> Mat4 {
    Mat4::from_rotation_y(std::f32::consts::PI)
}

/// Field of view in degrees and the axis it is measured along.
pub fn field_of_view(camera: &Camera, render: &RenderSettings) -> (f32, &'static str) {
    let [w, h] = render.resolution();
    let (axis, sensor) = match camera.sensor_fit {
        SensorFit::Auto => (if w >= h { "x" } else { "y" }, camera.sensor_width),
        SensorFit::Horizontal => ("x", camera.sensor_width),
        SensorFit::Vertical => ("y", camera.sensor_height),
    };
    let fov = 2.0 * (sensor / (2.0 * camera.lens)).atan();
    (fov.to_degrees(), axis)
}

/// Lens shift (in units of the larger image side) to principal point offsets
/// (in units of each side).
pub fn principal_point(camera: &Camera, render: &RenderSettings) -> (f32, f32) {
    let [w, h] = render.resolution();
    let max = w.max(h) as f32;
    (camera.shift_x * max / w as f32, -camera.shift_y * max / h as f32)
}

pub fn sensor_props(ctx: &mut ExportContext, camera: &Camera, world: Mat4, render: &RenderSettings) -> Result<Option<Props>> {
    let to_world = world * camera_basis();
    let mut props = match camera.projection {
        Projection::Panoramic => {
            ctx.report.warn(format!(
                "camera '{}': panoramic projection is not supported; skipped",
                camera.name
            ));
            return Ok(None);
        }
        Projection::Orthographic => {
            let half = camera.ortho_scale / 2.0;
            Props::new("orthographic").with(
                "to_world",
                ctx.transform_matrix(to_world * Mat4::from_scale(Vec3::new(half, half, 1.0))),
            )
        }
        Projection::Perspective => {
            let (fov, fov_axis) = field_of_view(camera, render);
            let (offset_x, offset_y) = principal_point(camera, render);
            let mut props = if camera.dof.use_dof {
                Props::new("thinlens")
                    .with("aperture_radius", camera.lens / (2.0 * camera.dof.aperture_fstop) / 1000.0)
                    .with("focus_distance", camera.dof.focus_distance)
            } else {
                Props::new("perspective")
            };
            props.set("fov", fov);
            props.set("fov_axis", fov_axis);
            props.set("principal_point_offset_x", offset_x);
            props.set("principal_point_offset_y", offset_y);
            props.set("to_world", ctx.transform_matrix(to_world));
            props
        }
    };
    props.set("near_clip", camera.clip_start);
    props.set("far_clip", camera.clip_end);
    props.set("sampler", sampler(render));
    props.set("film", film(ctx, render));
    Ok(Some(props))
}

pub fn export_camera(ctx: &mut ExportContext, scene: &HostScene, object: &Object, matrix_world: Mat4) -> Result<()> {
    let data = object
        .data
        .as_deref()
        .ok_or_else(|| anyhow!("camera object '{}' has no camera data", object.name))?;
    let camera = scene
        .cameras
        .get(data)
        .ok_or_else(|| anyhow!("camera object '{}' references missing camera '{data}'", object.name))?;
    if let Some(props) = sensor_props(ctx, camera, matrix_world, &scene.render)? {
        ctx.add_object(&object.name, props, None, false);
    }
    Ok(())
}

/// Camera-local to world, undoing the sensor basis and any orthographic scale.
pub fn host_camera_matrix(to_world: &Transform, orthographic: bool) -> Mat4 {
    let mut m = to_world.matrix();
    if orthographic {
        let (scale, rotation, translation) = m.to_scale_rotation_translation();
        m = Mat4::from_scale_rotation_translation(Vec3::new(1.0, 1.0, scale.z), rotation, translation);
    }
    m * camera_basis().inverse()
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
    fn default_camera_fov() {
        let camera = Camera::new("Camera");
        let render = RenderSettings::default();
        let (fov, axis) = field_of_view(&camera, &render);
        assert_eq!(axis, "x");
        assert!((fov - 39.5978).abs() < 1e-3);
    }

    #[test]
    fn portrait_auto_fit_uses_y() {
        let camera = Camera::new("Camera");
        let render = RenderSettings {
            resolution_x: 1080,
            resolution_y: 1920,
            ..Default::default()
        };
        assert_eq!(field_of_view(&camera, &render).1, "y");
    }

    #[test]
    fn shift_is_scaled_to_each_side() {
        let mut camera = Camera::new("Camera");
        camera.shift_x = 0.1;
        camera.shift_y = 0.1;
        let render = RenderSettings {
            resolution_x: 200,
            resolution_y: 100,
            ..Default::default()
        };
        let (x, y) = principal_point(&camera, &render);
        assert!((x - 0.1).abs() < 1e-6);
        assert!((y + 0.2).abs() < 1e-6);
    }

    #[test]
    fn depth_of_field_uses_thin_lens() {
        let mut c = ctx();
        let mut camera = Camera::new("Camera");
        camera.dof.use_dof = true;
        camera.dof.aperture_fstop = 2.5;
        camera.dof.focus_distance = 4.0;
        let props = sensor_props(&mut c, &camera, Mat4::IDENTITY, &RenderSettings::default())
            .unwrap()
            .unwrap();
        assert_eq!(props.plugin(), "thinlens");
        assert!((props.float("aperture_radius").unwrap() - 0.01).abs() < 1e-7);
        assert_eq!(props.float("focus_distance"), Some(4.0));
        assert_eq!(props.bag("film").unwrap().plugin(), "hdrfilm");
        assert!(props.bag("sampler").is_some());
    }

    #[test]
    fn camera_matrix_round_trips() {
        let mut c = ctx();
        let world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)) * Mat4::from_rotation_x(0.7);
        let mut camera = Camera::new("Ortho");
        camera.projection = Projection::Orthographic;
        let props = sensor_props(&mut c, &camera, world, &RenderSettings::default())
            .unwrap()
            .unwrap();
        let back = host_camera_matrix(&props.transform("to_world").unwrap(), true);
        assert!(back.abs_diff_eq(world, 1e-5));
    }

    #[test]
    fn panoramic_is_skipped() {
        let mut c = ctx();
        let mut camera = Camera::new("Pano");
        camera.projection = Projection::Panoramic;
        assert!(sensor_props(&mut c, &camera, Mat4::IDENTITY, &RenderSettings::default())
            .unwrap()
            .is_none());
        assert!(c.report.has_warning("panoramic"));
    }
}
