//! Host render properties to integrator, sampler, reconstruction filter and
//! film plugins.

use anyhow::{Result, bail};

use crate::export::context::ExportContext;
use crate::host::{
    FilterSettings, IntegratorSettings, RenderEngine, RenderSettings, SamplerKind, SamplerSettings,
};
use crate::props::Props;

/// Nested `moment` integrators deeper than this are refused.
pub const MAX_INTEGRATOR_DEPTH: usize = 8;

pub fn integrator_props(settings: &IntegratorSettings, depth: usize) -> Result<Props> {
    if depth > MAX_INTEGRATOR_DEPTH {
        bail!("integrators nested deeper than {MAX_INTEGRATOR_DEPTH} levels");
    }
    Ok(match settings {
        IntegratorSettings::Path {
            max_depth,
            rr_depth,
            hide_emitters,
        } => Props::new("path")
            .with("max_depth", *max_depth)
            .with("rr_depth", *rr_depth)
            .with("hide_emitters", *hide_emitters),
        IntegratorSettings::Moment { integrators } => {
            let mut props = Props::new("moment");
            for (i, nested) in integrators.iter().enumerate() {
                props.set(format!("integrator_{i}"), integrator_props(nested, depth + 1)?);
            }
            props
        }
    })
}

/// The integrator the host render settings describe.
pub fn integrator_settings(render: &RenderSettings) -> IntegratorSettings {
    match render.engine {
        RenderEngine::Mitsuba => render.mitsuba.integrator.clone(),
        RenderEngine::Cycles => IntegratorSettings::Path {
            max_depth: render.cycles.max_bounces,
            rr_depth: render.cycles.min_light_bounces,
            hide_emitters: render.cycles.film_transparent,
        },
    }
}

pub fn export_integrator(ctx: &mut ExportContext, render: &RenderSettings) {
    match integrator_props(&integrator_settings(render), 0) {
        Ok(props) => {
            ctx.add_object("integrator", props, Some("integrator"), false);
        }
        Err(e) => ctx.report.error(format!("integrator not exported: {e:#}")),
    }
}

pub fn sampler(render: &RenderSettings) -> Props {
    let settings = match render.engine {
        RenderEngine::Mitsuba => render.mitsuba.sampler.clone(),
        RenderEngine::Cycles => SamplerSettings {
            kind: SamplerKind::Independent,
            sample_count: render.cycles.samples,
            seed: render.cycles.seed,
            jitter: true,
        },
    };
    let plugin = match settings.kind {
        SamplerKind::Independent => "independent",
        SamplerKind::Stratified => "stratified",
        SamplerKind::Multijitter => "multijitter",
    };
    let mut props = Props::new(plugin)
        .with("sample_count", settings.sample_count)
        .with("seed", settings.seed);
    if settings.kind != SamplerKind::Independent {
        props.set("jitter", settings.jitter);
    }
    props
}

pub fn rfilter(ctx: &mut ExportContext, render: &RenderSettings) -> Props {
    let settings = match render.engine {
        RenderEngine::Mitsuba => render.mitsuba.rfilter.clone(),
        RenderEngine::Cycles => match render.cycles.pixel_filter_type.as_str() {
            "BOX" => FilterSettings::Box,
            "GAUSSIAN" => FilterSettings::Gaussian {
                stddev: render.cycles.filter_width / 3.0,
            },
            other => {
                ctx.report.warn(format!(
                    "pixel filter {other} is not supported; using a gaussian of the same width"
                ));
                FilterSettings::Gaussian {
                    stddev: render.cycles.filter_width / 3.0,
                }
            }
        },
    };
    match settings {
        FilterSettings::Box => Props::new("box"),
        FilterSettings::Tent => Props::new("tent"),
        FilterSettings::Gaussian { stddev } => Props::new("gaussian").with("stddev", stddev),
    }
}

pub fn film(ctx: &mut ExportContext, render: &RenderSettings) -> Props {
    let [width, height] = render.resolution();
    if render.file_format != "OPEN_EXR" && render.file_format != "OPEN_EXR_MULTILAYER" {
        ctx.report.warn(format!(
            "output format {} is not supported; the film writes OpenEXR",
            render.file_format
        ));
    }
    let pixel_format = match render.color_mode.as_str() {
        "RGB" => "rgb",
        "RGBA" => "rgba",
        other => {
            ctx.report
                .warn(format!("colour mode {other} is not supported; using rgba"));
            "rgba"
        }
    };
    let component_format = match render.color_depth.as_str() {
        "16" => "float16",
        _ => "float32",
    };
    let mut props = Props::new("hdrfilm")
        .with("width", width)
        .with("height", height)
        .with("file_format", "openexr")
        .with("pixel_format", pixel_format)
        .with("component_format", component_format);
    if render.use_border {
        let [min_x, min_y, max_x, max_y] = render.border;
        let (w, h) = (width as f32, height as f32);
        props.set("crop_offset_x", (min_x * w).round() as i64);
        props.set("crop_offset_y", ((1.0 - max_y) * h).round() as i64);
        props.set("crop_width", (((max_x - min_x) * w).round() as i64).max(1));
        props.set("crop_height", (((max_y - min_y) * h).round() as i64).max(1));
    }
    props.set("rfilter", rfilter(ctx, render));
    props
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::ExportOptions;
    use crate::host::CyclesSettings;

    fn ctx() -> ExportContext {
        let options = ExportOptions {
            export_assets: false,
            ..Default::default()
        };
        ExportContext::new(options, None, PathBuf::from(".")).unwrap()
    }

    #[test]
    fn cycles_bounces_drive_path_depths() {
        let render = RenderSettings {
            engine: RenderEngine::Cycles,
            cycles: CyclesSettings {
                max_bounces: 8,
                min_light_bounces: 3,
                film_transparent: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let p = integrator_props(&integrator_settings(&render), 0).unwrap();
        assert_eq!(p.plugin(), "path");
        assert_eq!(p.int("max_depth"), Some(8));
        assert_eq!(p.int("rr_depth"), Some(3));
        assert_eq!(p.bool("hide_emitters"), Some(true));
    }

    #[test]
    fn moment_depth_is_bounded() {
        let mut settings = IntegratorSettings::default();
        for _ in 0..=MAX_INTEGRATOR_DEPTH {
            settings = IntegratorSettings::Moment {
                integrators: vec![settings],
            };
        }
        assert!(integrator_props(&settings, 0).is_err());
        let shallow = IntegratorSettings::Moment {
            integrators: vec![IntegratorSettings::default(), IntegratorSettings::default()],
        };
        let p = integrator_props(&shallow, 0).unwrap();
        assert_eq!(p.bag("integrator_1").unwrap().plugin(), "path");
    }

    #[test]
    fn film_crop_uses_top_left_origin() {
        let mut c = ctx();
        let render = RenderSettings {
            resolution_x: 200,
            resolution_y: 100,
            use_border: true,
            border: [0.25, 0.5, 0.75, 1.0],
            color_depth: "16".into(),
            ..Default::default()
        };
        let f = film(&mut c, &render);
        assert_eq!(f.int("width"), Some(200));
        assert_eq!(f.string("component_format"), Some("float16"));
        assert_eq!(f.int("crop_offset_x"), Some(50));
        assert_eq!(f.int("crop_offset_y"), Some(0));
        assert_eq!(f.int("crop_width"), Some(100));
        assert_eq!(f.int("crop_height"), Some(50));
        assert_eq!(f.bag("rfilter").unwrap().plugin(), "gaussian");
    }

    #[test]
    fn cycles_filters() {
        let mut c = ctx();
        let mut render = RenderSettings {
            engine: RenderEngine::Cycles,
            ..Default::default()
        };
        assert_eq!(rfilter(&mut c, &render).float("stddev"), Some(0.5));
        render.cycles.pixel_filter_type = "BLACKMAN_HARRIS".into();
        assert_eq!(rfilter(&mut c, &render).plugin(), "gaussian");
        assert!(c.report.has_warning("BLACKMAN_HARRIS"));
    }
}
