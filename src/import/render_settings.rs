//! Integrator, sampler, reconstruction filter and film plugins back to host
//! render properties.

use anyhow::{Result, bail};

use crate::export::render_settings::MAX_INTEGRATOR_DEPTH;
use crate::host::{FilterSettings, IntegratorSettings, RenderEngine, SamplerKind};
use crate::import::ImportContext;
use crate::import::tree::{Category, Resolver};
use crate::props::Props;
use crate::report::Report;

/// An integer property that must fit `T`; out-of-range values fall back to
/// `default` with a warning.
fn int_property<T: TryFrom<i64> + Copy>(props: &Props, key: &str, default: T, report: &mut Report) -> T {
    let Some(value) = props.int(key) else {
        return default;
    };
    T::try_from(value).unwrap_or_else(|_| {
        report.warn(format!(
            "{}: '{key}' = {value} is out of range; using the default",
            props.plugin()
        ));
        default
    })
}

fn integrator_settings(props: &Props, resolver: &Resolver, report: &mut Report, depth: usize) -> Result<IntegratorSettings> {
    if depth > MAX_INTEGRATOR_DEPTH {
        bail!("integrators nested deeper than {MAX_INTEGRATOR_DEPTH} levels");
    }
    match props.plugin() {
        "moment" => {
            let mut integrators = Vec::new();
            for nested in resolver.children_of(props, Category::Integrator)? {
                integrators.push(integrator_settings(nested, resolver, report, depth + 1)?);
            }
            Ok(IntegratorSettings::Moment { integrators })
        }
        other => {
            if other != "path" {
                report.warn(format!("integrator '{other}' is imported as a path tracer"));
            }
            let max_depth = int_property(props, "max_depth", -1i32, report);
            let rr_depth = int_property(props, "rr_depth", 5i32, report);
            let hide_emitters = props.bool("hide_emitters").unwrap_or(false);
            if other != "path" {
                props.mark_all_queried();
            }
            Ok(IntegratorSettings::Path {
                max_depth,
                rr_depth,
                hide_emitters,
            })
        }
    }
}

pub fn import_integrator(ctx: &mut ImportContext, props: &Props, resolver: &Resolver) -> Result<()> {
    let settings = integrator_settings(props, resolver, &mut ctx.report, 0)?;
    let render = &mut ctx.scene.render;
    // Cycles mirrors the outermost path tracer.
    let path = match &settings {
        IntegratorSettings::Moment { integrators } => integrators.iter().find_map(|i| match i {
            IntegratorSettings::Path { .. } => Some(i.clone()),
            IntegratorSettings::Moment { .. } => None,
        }),
        path => Some(path.clone()),
    };
    if let Some(IntegratorSettings::Path {
        max_depth,
        rr_depth,
        hide_emitters,
    }) = path
    {
        render.cycles.max_bounces = if max_depth < 0 { 1024 } else { max_depth };
        render.cycles.min_light_bounces = rr_depth;
        render.cycles.film_transparent = hide_emitters;
    }
    render.mitsuba.integrator = settings;
    render.engine = RenderEngine::Mitsuba;
    Ok(())
}

/// Cycles' sampling pattern closest to `kind` on this host release.
pub fn sampling_pattern(kind: SamplerKind, version: [u32; 3]) -> &'static str {
    let at_least = |major: u32, minor: u32| (version[0], version[1]) >= (major, minor);
    match kind {
        SamplerKind::Independent if at_least(4, 2) => "TABULATED_SOBOL",
        SamplerKind::Independent if at_least(3, 5) => "SOBOL_BURLEY",
        SamplerKind::Independent => "SOBOL",
        _ if at_least(4, 2) => "TABULATED_SOBOL",
        _ => "PROGRESSIVE_MULTI_JITTER",
    }
}

pub fn import_sampler(ctx: &mut ImportContext, props: &Props) {
    let kind = match props.plugin() {
        "independent" => SamplerKind::Independent,
        "stratified" => SamplerKind::Stratified,
        "multijitter" => SamplerKind::Multijitter,
        other => {
            ctx.report
                .warn(format!("sampler '{other}' is imported as an independent sampler"));
            props.mark_all_queried();
            SamplerKind::Independent
        }
    };
    let version = ctx.version();
    let sample_count = int_property(props, "sample_count", 4u32, &mut ctx.report).max(1);
    let seed = int_property(props, "seed", 0u32, &mut ctx.report);
    let sampler = &mut ctx.scene.render.mitsuba.sampler;
    sampler.kind = kind;
    sampler.sample_count = sample_count;
    sampler.seed = seed;
    sampler.jitter = props.bool("jitter").unwrap_or(true);
    let cycles = &mut ctx.scene.render.cycles;
    cycles.samples = ctx.scene.render.mitsuba.sampler.sample_count;
    cycles.seed = ctx.scene.render.mitsuba.sampler.seed;
    cycles.sampling_pattern = sampling_pattern(kind, version).to_string();
}

pub fn import_rfilter(ctx: &mut ImportContext, props: &Props) {
    let settings = match props.plugin() {
        "box" => FilterSettings::Box,
        "tent" => FilterSettings::Tent,
        "gaussian" => FilterSettings::Gaussian {
            stddev: props.float_or("stddev", 0.5),
        },
        other => {
            ctx.report
                .warn(format!("reconstruction filter '{other}' is imported as a gaussian"));
            props.mark_all_queried();
            FilterSettings::default()
        }
    };
    let cycles = &mut ctx.scene.render.cycles;
    match &settings {
        FilterSettings::Box => {
            cycles.pixel_filter_type = "BOX".to_string();
            cycles.filter_width = 1.0;
        }
        FilterSettings::Tent => {
            cycles.pixel_filter_type = "GAUSSIAN".to_string();
            cycles.filter_width = 1.5;
        }
        FilterSettings::Gaussian { stddev } => {
            cycles.pixel_filter_type = "GAUSSIAN".to_string();
            cycles.filter_width = 3.0 * stddev;
        }
    }
    ctx.scene.render.mitsuba.rfilter = settings;
}

/// Film size, or the renderer's default when there is no film.
pub fn film_size(film: Option<&Props>, report: &mut Report) -> [u32; 2] {
    match film {
        Some(f) => [
            int_property(f, "width", 768u32, report).max(1),
            int_property(f, "height", 576u32, report).max(1),
        ],
        None => [768, 576],
    }
}

pub fn import_film(ctx: &mut ImportContext, film: &Props, resolver: &Resolver) -> Result<()> {
    if film.plugin() != "hdrfilm" {
        ctx.report
            .warn(format!("film '{}' is imported as an HDR film", film.plugin()));
    }
    let [width, height] = film_size(Some(film), &mut ctx.report);
    let color_mode = match film.string("pixel_format") {
        Some("rgb") => "RGB",
        Some("rgba") | None => "RGBA",
        Some(other) => {
            ctx.report
                .warn(format!("pixel format '{other}' is not supported; using RGBA"));
            "RGBA"
        }
    };
    let color_depth = match film.string("component_format") {
        Some("float16") => "16",
        _ => "32",
    };
    match film.string("file_format") {
        Some("openexr" | "exr") | None => {}
        Some(other) => ctx
            .report
            .warn(format!("film file format '{other}' is not supported; using OpenEXR")),
    }
    let crop = (
        film.int("crop_offset_x"),
        film.int("crop_offset_y"),
        film.int("crop_width"),
        film.int("crop_height"),
    );
    let render = &mut ctx.scene.render;
    render.resolution_x = width;
    render.resolution_y = height;
    render.resolution_percentage = 100;
    render.file_format = "OPEN_EXR".to_string();
    render.color_mode = color_mode.to_string();
    render.color_depth = color_depth.to_string();
    let (w, h) = (width as f32, height as f32);
    match crop {
        (None, None, None, None) => render.use_border = false,
        (ox, oy, cw, ch) => {
            let (ox, oy) = (ox.unwrap_or(0) as f32, oy.unwrap_or(0) as f32);
            let cw = cw.map_or(w - ox, |v| v as f32);
            let ch = ch.map_or(h - oy, |v| v as f32);
            render.use_border = true;
            render.border = [ox / w, 1.0 - (oy + ch) / h, (ox + cw) / w, 1.0 - oy / h];
        }
    }
    if let Some(rfilter) = resolver.child_of(film, Category::Rfilter)? {
        import_rfilter(ctx, rfilter);
    }
    Ok(())
}
