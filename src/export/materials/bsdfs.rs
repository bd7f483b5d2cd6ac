//! Shader nodes to renderer BSDFs and emitters.

use anyhow::{Result, anyhow, bail};
use serde_json::Value as Json;

use crate::color::max_component;
use crate::export::context::ExportContext;
use crate::export::materials::evaluators::{Eval, input, input_any};
use crate::export::materials::textures::{color_value, float_value};
use crate::export::materials::walker::{Input, Source};
use crate::host::HostScene;
use crate::host::nodes::types;
use crate::ior;
use crate::props::{Props, Spectrum, Value};

/// BSDFs that are two-sided by construction and must never be wrapped.
pub const ALWAYS_TWO_SIDED: &[&str] = &[
    "dielectric",
    "roughdielectric",
    "thindielectric",
    "mask",
    "bumpmap",
    "normalmap",
    "null",
];

/// What a shader socket evaluates to.
#[derive(Debug, Clone, PartialEq)]
pub enum Shader {
    Bsdf(Props),
    Emitter(Props),
    Pair { bsdf: Props, emitter: Props },
}

impl Shader {
    fn kind(&self) -> &'static str {
        match self {
            Shader::Bsdf(_) => "BSDF",
            Shader::Emitter(_) => "emitter",
            Shader::Pair { .. } => "BSDF+emitter",
        }
    }
}

/// The solid magenta-ish material that marks a failed conversion.
pub fn error_material() -> Props {
    Props::new("twosided").with(
        "bsdf",
        Props::new("diffuse").with("reflectance", Spectrum::Rgb([1.0, 0.0, 0.3])),
    )
}

pub fn distribution(name: Option<&str>) -> &'static str {
    match name {
        Some("BECKMANN") | Some("ASHIKHMIN_SHIRLEY") => "beckmann",
        _ => "ggx",
    }
}

/// Host anisotropy to the stretch of the roughness ellipse.
pub fn anisotropic_alphas(alpha: f32, anisotropy: f32) -> (f32, f32) {
    let aspect = (1.0 - 0.9 * anisotropy.clamp(-1.0, 1.0)).sqrt();
    (alpha / aspect, alpha * aspect)
}

/// Wrap a reflective BSDF in `twosided`, leaving already two-sided ones and
/// `twosided` itself alone.
pub fn two_sided(bsdf: Props) -> Props {
    if bsdf.plugin() == "twosided" || ALWAYS_TWO_SIDED.contains(&bsdf.plugin()) {
        bsdf
    } else {
        Props::new("twosided").with("bsdf", bsdf)
    }
}

fn color(ctx: &mut ExportContext, scene: &HostScene, src: &Source, sockets: &[&str], default: [f32; 3]) -> Result<Value> {
    let e = input_any(ctx, scene, src, sockets, Eval::Color(default))?;
    Ok(color_value(ctx, e))
}

fn scalar(ctx: &mut ExportContext, scene: &HostScene, src: &Source, sockets: &[&str], default: f32) -> Result<Eval> {
    input_any(ctx, scene, src, sockets, Eval::Float(default))
}

/// Perceptual roughness to the renderer's α.
fn alpha(ctx: &mut ExportContext, src: &Source, roughness: Eval) -> Value {
    match roughness {
        Eval::Texture(t) => {
            ctx.report.warn(format!(
                "'{}': textured roughness is exported without remapping",
                src.node.name
            ));
            Value::Bag(t)
        }
        other => {
            let r = other.float().unwrap_or(0.5);
            Value::Float(r * r)
        }
    }
}

fn constant_or_warn(ctx: &mut ExportContext, src: &Source, what: &str, e: &Eval, fallback: f32) -> f32 {
    match e.float() {
        Some(v) => v,
        None => {
            ctx.report.warn(format!(
                "'{}': textured {what} is not supported; using {fallback}",
                src.node.name
            ));
            fallback
        }
    }
}

/// Export the shader feeding a socket.
///
/// `in_twosided` is set for the children of a two-sided selector; they are
/// not wrapped again.
pub fn export_shader(ctx: &mut ExportContext, scene: &HostScene, src: &Source, in_twosided: bool) -> Result<Shader> {
    let node = src.node;
    match node.node_type.as_str() {
        types::PRINCIPLED => principled(ctx, scene, src, in_twosided),
        types::DIFFUSE => {
            let reflectance = color(ctx, scene, src, &["Color"], [0.8; 3])?;
            let bsdf = Props::new("diffuse").with("reflectance", reflectance);
            finish(ctx, scene, src, bsdf, !in_twosided)
        }
        types::GLOSSY | types::ANISOTROPIC => {
            let bsdf = glossy(ctx, scene, src)?;
            finish(ctx, scene, src, bsdf, !in_twosided)
        }
        types::GLASS => {
            let bsdf = glass(ctx, scene, src)?;
            finish(ctx, scene, src, bsdf, false)
        }
        types::TRANSPARENT => Ok(Shader::Bsdf(Props::new("null"))),
        types::TRANSLUCENT => {
            let base = color(ctx, scene, src, &["Color"], [0.8; 3])?;
            let bsdf = Props::new("principledthin")
                .with("base_color", base)
                .with("diff_trans", 2.0f32);
            finish(ctx, scene, src, bsdf, false)
        }
        types::EMISSION => Ok(Shader::Emitter(emission(ctx, scene, src)?)),
        types::MIX_SHADER => mix_shader(ctx, scene, src, in_twosided),
        types::ADD_SHADER => add_shader(ctx, scene, src, in_twosided),
        types::SUBSURFACE => bail!("subsurface scattering ('{}') is not supported", node.name),
        types::GROUP_OUTPUT | types::REROUTE => bail!("dangling shader link into '{}'", node.name),
        other => bail!("unsupported shader node '{}' of type {other}", node.name),
    }
}

/// Apply the wrapper chain: two-sided, then bump or normal map.
fn finish(ctx: &mut ExportContext, scene: &HostScene, src: &Source, bsdf: Props, wrap: bool) -> Result<Shader> {
    let bsdf = if wrap { two_sided(bsdf) } else { bsdf };
    Ok(Shader::Bsdf(normal_wrapper(ctx, scene, src, bsdf)?))
}

fn glossy(ctx: &mut ExportContext, scene: &HostScene, src: &Source) -> Result<Props> {
    let node = src.node;
    let reflectance = color(ctx, scene, src, &["Color"], [0.8; 3])?;
    let dist = node.param_str("distribution");
    if dist == Some("SHARP") {
        return Ok(Props::new("conductor").with("specular_reflectance", reflectance));
    }
    let roughness = scalar(ctx, scene, src, &["Roughness"], 0.5)?;
    let mut bsdf = Props::new("roughconductor").with("distribution", distribution(dist));
    let anisotropy = scalar(ctx, scene, src, &["Anisotropy"], 0.0)?;
    let aniso = constant_or_warn(ctx, src, "anisotropy", &anisotropy, 0.0);
    match alpha(ctx, src, roughness) {
        Value::Float(a) if aniso != 0.0 => {
            let (au, av) = anisotropic_alphas(a, aniso);
            bsdf.set("alpha_u", au);
            bsdf.set("alpha_v", av);
        }
        a => bsdf.set("alpha", a),
    }
    if input_any(ctx, scene, src, &["Rotation"], Eval::Float(0.0))?.float() != Some(0.0) {
        ctx.report.warn(format!(
            "'{}': anisotropic rotation is not supported",
            node.name
        ));
    }
    bsdf.set("specular_reflectance", reflectance);
    Ok(bsdf)
}

/// A user-chosen preset name survives when it still matches the value.
fn ior_value(src: &Source, value: f32) -> Value {
    match src.node.param_str("ior_preset") {
        Some(name) if ior::lookup(name).is_some_and(|v| (v - value).abs() < 1e-4) => {
            ior::Ior::Named(name.to_string()).to_value()
        }
        _ => ior::Ior::Value(value).to_value(),
    }
}

fn glass(ctx: &mut ExportContext, scene: &HostScene, src: &Source) -> Result<Props> {
    let node = src.node;
    let transmittance = color(ctx, scene, src, &["Color"], [1.0; 3])?;
    let ior_eval = scalar(ctx, scene, src, &["IOR"], 1.45)?;
    let ior = constant_or_warn(ctx, src, "IOR", &ior_eval, 1.45);
    let int_ior = ior_value(src, ior);
    let dist = node.param_str("distribution");
    let thin = node.param_bool("thin").unwrap_or(false);

    let mut bsdf = if thin {
        if dist != Some("SHARP") {
            let r = scalar(ctx, scene, src, &["Roughness"], 0.0)?;
            if r.float() != Some(0.0) {
                ctx.report.warn(format!("'{}': thin glass ignores roughness", node.name));
            }
        }
        Props::new("thindielectric")
    } else if dist == Some("SHARP") {
        Props::new("dielectric")
    } else {
        let roughness = scalar(ctx, scene, src, &["Roughness"], 0.0)?;
        let a = alpha(ctx, src, roughness);
        Props::new("roughdielectric")
            .with("distribution", distribution(dist))
            .with("alpha", a)
    };
    bsdf.set("int_ior", int_ior);
    bsdf.set("specular_transmittance", transmittance);
    Ok(bsdf)
}

/// `area` emitter from a colour and a strength.
fn radiance(ctx: &mut ExportContext, src: &Source, color: Eval, strength: Eval) -> Result<Value> {
    let _unbounded = ctx.scope_unbounded_texture_input();
    let s = constant_or_warn(ctx, src, "emission strength", &strength, 1.0);
    Ok(match color {
        Eval::Texture(t) => {
            if s != 1.0 {
                ctx.report.warn(format!(
                    "'{}': strength {s} cannot scale a textured emission",
                    src.node.name
                ));
            }
            Value::Bag(t)
        }
        other => {
            let c = other.color().unwrap_or([1.0; 3]);
            Value::Spectrum(ctx.rgb(c.map(|x| x * s)))
        }
    })
}

fn emission(ctx: &mut ExportContext, scene: &HostScene, src: &Source) -> Result<Props> {
    let color = {
        let _unbounded = ctx.scope_unbounded_texture_input();
        input(ctx, scene, src, "Color", Eval::Color([1.0; 3]))?
    };
    let strength = input(ctx, scene, src, "Strength", Eval::Float(1.0))?;
    let radiance = radiance(ctx, src, color, strength)?;
    Ok(Props::new("area").with("radiance", radiance))
}

fn principled(ctx: &mut ExportContext, scene: &HostScene, src: &Source, in_twosided: bool) -> Result<Shader> {
    let node = src.node;
    let mut bsdf = Props::new("principled");
    bsdf.set("base_color", color(ctx, scene, src, &["Base Color"], [0.8; 3])?);
    bsdf.set("metallic", float_value(scalar(ctx, scene, src, &["Metallic"], 0.0)?));
    bsdf.set("roughness", float_value(scalar(ctx, scene, src, &["Roughness"], 0.5)?));

    let anisotropic = scalar(ctx, scene, src, &["Anisotropic"], 0.0)?;
    if anisotropic.float() != Some(0.0) {
        bsdf.set("anisotropic", float_value(anisotropic));
    }
    let sheen = scalar(ctx, scene, src, &["Sheen Weight", "Sheen"], 0.0)?;
    if sheen.float() != Some(0.0) {
        bsdf.set("sheen", float_value(sheen));
    }
    // Tints are scalars on older hosts and colours on newer ones; only the
    // scalar form has a renderer counterpart.
    for (socket, key) in [("Sheen Tint", "sheen_tint"), ("Specular Tint", "spec_tint")] {
        let scalar_socket = node.input(socket).is_some_and(Json::is_number)
            && !src.cursor.tree().is_linked(&node.name, socket);
        if scalar_socket {
            let tint = scalar(ctx, scene, src, &[socket], 0.0)?;
            if tint.float() != Some(0.0) {
                bsdf.set(key, float_value(tint));
            }
        }
    }
    let clearcoat = scalar(ctx, scene, src, &["Coat Weight", "Clearcoat"], 0.0)?;
    if clearcoat.float() != Some(0.0) {
        bsdf.set("clearcoat", float_value(clearcoat));
        let coat_roughness = scalar(ctx, scene, src, &["Coat Roughness", "Clearcoat Roughness"], 0.03)?;
        let gloss = match coat_roughness {
            Eval::Texture(t) => {
                ctx.report.warn(format!(
                    "'{}': textured coat roughness is exported as gloss unchanged",
                    node.name
                ));
                Value::Bag(t)
            }
            other => Value::Float(1.0 - other.float().unwrap_or(0.03)),
        };
        bsdf.set("clearcoat_gloss", gloss);
    }

    let transmission = scalar(ctx, scene, src, &["Transmission Weight", "Transmission"], 0.0)?;
    let transmissive = transmission.float() != Some(0.0);
    if transmissive {
        bsdf.set("spec_trans", float_value(transmission));
        let ior_eval = scalar(ctx, scene, src, &["IOR"], 1.45)?;
        let ior = constant_or_warn(ctx, src, "IOR", &ior_eval, 1.45);
        bsdf.set("eta", ior.max(1.001));
    } else {
        let specular = scalar(ctx, scene, src, &["Specular IOR Level", "Specular"], 0.5)?;
        bsdf.set("specular", float_value(specular));
    }

    let wrapped = if transmissive || in_twosided {
        bsdf
    } else {
        two_sided(bsdf)
    };
    let mut bsdf = normal_wrapper(ctx, scene, src, wrapped)?;

    let alpha_in = scalar(ctx, scene, src, &["Alpha"], 1.0)?;
    match alpha_in {
        Eval::Texture(t) => {
            bsdf = Props::new("mask").with("opacity", t).with("bsdf", bsdf);
        }
        other => {
            let a = other.float().unwrap_or(1.0);
            if a < 1.0 {
                bsdf = Props::new("mask").with("opacity", a).with("bsdf", bsdf);
            }
        }
    }

    let emission_color = {
        let _unbounded = ctx.scope_unbounded_texture_input();
        input_any(ctx, scene, src, &["Emission Color", "Emission"], Eval::Color([0.0; 3]))?
    };
    let default_strength = if node.inputs.contains_key("Emission Color") { 0.0 } else { 1.0 };
    let strength = scalar(ctx, scene, src, &["Emission Strength"], default_strength)?;
    let emits = match (&emission_color, strength.float()) {
        (_, Some(s)) if s == 0.0 => false,
        (Eval::Texture(_), _) => true,
        (c, _) => c.color().is_some_and(|c| max_component(c) > 0.0),
    };
    if emits {
        let radiance = radiance(ctx, src, emission_color, strength)?;
        return Ok(Shader::Pair {
            bsdf,
            emitter: Props::new("area").with("radiance", radiance),
        });
    }
    Ok(Shader::Bsdf(bsdf))
}

/// Wrap `bsdf` for a bump or normal-map node on the shader's `Normal` input.
fn normal_wrapper(ctx: &mut ExportContext, scene: &HostScene, src: &Source, bsdf: Props) -> Result<Props> {
    let Input::Linked(normal) = src.cursor.input(src.node, "Normal") else {
        return Ok(bsdf);
    };
    let n = normal.node;
    match n.node_type.as_str() {
        types::BUMP => {
            if let Input::Linked(inner) = normal.cursor.input(n, "Normal") {
                if matches!(inner.node.node_type.as_str(), types::BUMP | types::NORMAL_MAP) {
                    ctx.report.warn(format!(
                        "bump node '{}' is chained to '{}'; nested normal perturbations are not supported",
                        n.name, inner.node.name
                    ));
                }
            }
            let height = {
                let _raw = ctx.scope_raw_texture_input();
                input(ctx, scene, &normal, "Height", Eval::Float(1.0))?
            };
            let Eval::Texture(height) = height else {
                return Ok(bsdf);
            };
            let strength = input(ctx, scene, &normal, "Strength", Eval::Float(1.0))?;
            let distance = input(ctx, scene, &normal, "Distance", Eval::Float(1.0))?;
            let scale = constant_or_warn(ctx, &normal, "bump strength", &strength, 1.0)
                * constant_or_warn(ctx, &normal, "bump distance", &distance, 1.0);
            if n.param_bool("invert").unwrap_or(false) {
                ctx.report.warn(format!("bump node '{}': invert is not supported", n.name));
            }
            Ok(Props::new("bumpmap")
                .with("texture", height)
                .with("scale", scale)
                .with("bsdf", bsdf))
        }
        types::NORMAL_MAP => {
            if let Some(space) = n.param_str("space").filter(|s| *s != "TANGENT") {
                ctx.report.warn(format!(
                    "normal map '{}' uses {space} space; exported as tangent space",
                    n.name
                ));
            }
            let strength = input(ctx, scene, &normal, "Strength", Eval::Float(1.0))?;
            if strength.float() != Some(1.0) {
                ctx.report.warn(format!(
                    "normal map '{}': strength other than 1 is not supported",
                    n.name
                ));
            }
            let map = {
                let _raw = ctx.scope_raw_texture_input();
                input(ctx, scene, &normal, "Color", Eval::Color([0.5, 0.5, 1.0]))?
            };
            let Eval::Texture(map) = map else {
                return Ok(bsdf);
            };
            Ok(Props::new("normalmap").with("normalmap", map).with("bsdf", bsdf))
        }
        other => {
            ctx.report.warn(format!(
                "'{}': normal input from '{other}' is not supported",
                src.node.name
            ));
            Ok(bsdf)
        }
    }
}

fn shader_input(ctx: &mut ExportContext, scene: &HostScene, src: &Source, socket: &str, in_twosided: bool) -> Result<Shader> {
    match src.cursor.input(src.node, socket) {
        Input::Linked(child) => export_shader(ctx, scene, &child, in_twosided),
        Input::Value(_) => Err(anyhow!("'{}': shader input {socket} is not connected", src.node.name)),
    }
}

fn is_backfacing(src: &Source) -> bool {
    match src.cursor.input(src.node, "Fac") {
        Input::Linked(fac) => fac.node.node_type == types::NEW_GEOMETRY && fac.socket == "Backfacing",
        Input::Value(_) => false,
    }
}

fn constant_radiance(e: &Props) -> Option<[f32; 3]> {
    e.spectrum("radiance").and_then(Spectrum::to_rgb)
}

fn area_from_rgb(ctx: &ExportContext, c: [f32; 3]) -> Props {
    let _unbounded = ctx.scope_unbounded_texture_input();
    Props::new("area").with("radiance", ctx.rgb(c))
}

fn scale_emitter(ctx: &ExportContext, e: Props, w: f32) -> Props {
    if w == 1.0 {
        return e;
    }
    match constant_radiance(&e) {
        Some(c) => area_from_rgb(ctx, c.map(|x| x * w)),
        None => e,
    }
}

fn mix_shader(ctx: &mut ExportContext, scene: &HostScene, src: &Source, in_twosided: bool) -> Result<Shader> {
    let node = src.node;
    if is_backfacing(src) {
        if in_twosided {
            bail!("'{}': two-sided selector nested in another", node.name);
        }
        let front = shader_input(ctx, scene, src, "Shader", true)?;
        let back = shader_input(ctx, scene, src, "Shader_001", true)?;
        return match (front, back) {
            (Shader::Bsdf(front), Shader::Bsdf(back)) => {
                let wraps_two_sided = |b: &Props| {
                    ALWAYS_TWO_SIDED.contains(&b.plugin()) || b.plugin() == "twosided"
                };
                if wraps_two_sided(&front) || wraps_two_sided(&back) {
                    ctx.report.warn(format!(
                        "'{}': a two-sided BSDF cannot be a side of another; using the front side",
                        node.name
                    ));
                    return Ok(Shader::Bsdf(front));
                }
                Ok(Shader::Bsdf(
                    Props::new("twosided")
                        .with("bsdf_0", front)
                        .with("bsdf_1", back),
                ))
            }
            (a, b) => bail!(
                "'{}': backface selection needs two BSDFs, got {} and {}",
                node.name,
                a.kind(),
                b.kind()
            ),
        };
    }

    let fac = input(ctx, scene, src, "Fac", Eval::Float(0.5))?;
    let a = shader_input(ctx, scene, src, "Shader", in_twosided)?;
    let b = shader_input(ctx, scene, src, "Shader_001", in_twosided)?;
    match (a, b) {
        (Shader::Bsdf(a), Shader::Bsdf(b)) => Ok(Shader::Bsdf(
            Props::new("blendbsdf")
                .with("weight", float_value(fac))
                .with("bsdf_0", a)
                .with("bsdf_1", b),
        )),
        (Shader::Emitter(a), Shader::Emitter(b)) => {
            let f = constant_or_warn(ctx, src, "mix factor", &fac, 0.5);
            match (constant_radiance(&a), constant_radiance(&b)) {
                (Some(ra), Some(rb)) => Ok(Shader::Emitter(area_from_rgb(
                    ctx,
                    std::array::from_fn(|i| (1.0 - f) * ra[i] + f * rb[i]),
                ))),
                _ => bail!("'{}': cannot blend textured emission", node.name),
            }
        }
        (Shader::Bsdf(bsdf), Shader::Emitter(e)) | (Shader::Emitter(e), Shader::Bsdf(bsdf)) => {
            let f = constant_or_warn(ctx, src, "mix factor", &fac, 0.5);
            ctx.report.warn(format!(
                "'{}': mixing a BSDF with emission exports both, with the emission scaled",
                node.name
            ));
            let emitter_first = matches!(
                src.cursor.input(node, "Shader"),
                Input::Linked(ref s) if s.node.node_type == types::EMISSION
            );
            let w = if emitter_first { 1.0 - f } else { f };
            Ok(Shader::Pair {
                bsdf,
                emitter: scale_emitter(ctx, e, w),
            })
        }
        (a, b) => bail!(
            "'{}': cannot mix {} with {}",
            node.name,
            a.kind(),
            b.kind()
        ),
    }
}

fn add_shader(ctx: &mut ExportContext, scene: &HostScene, src: &Source, in_twosided: bool) -> Result<Shader> {
    let node = src.node;
    let a = shader_input(ctx, scene, src, "Shader", in_twosided)?;
    let b = shader_input(ctx, scene, src, "Shader_001", in_twosided)?;
    match (a, b) {
        (Shader::Emitter(a), Shader::Emitter(b)) => match (constant_radiance(&a), constant_radiance(&b)) {
            (Some(ra), Some(rb)) => Ok(Shader::Emitter(area_from_rgb(
                ctx,
                std::array::from_fn(|i| ra[i] + rb[i]),
            ))),
            _ => bail!("'{}': cannot add textured emission", node.name),
        },
        (Shader::Bsdf(bsdf), Shader::Emitter(emitter)) | (Shader::Emitter(emitter), Shader::Bsdf(bsdf)) => {
            Ok(Shader::Pair { bsdf, emitter })
        }
        (a, b) => bail!(
            "'{}': cannot add {} to {}",
            node.name,
            a.kind(),
            b.kind()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isotropic_alphas_are_equal() {
        let (u, v) = anisotropic_alphas(0.25, 0.0);
        assert_eq!(u, 0.25);
        assert_eq!(v, 0.25);
        let (u, v) = anisotropic_alphas(0.25, 0.5);
        assert!(u > v);
        assert!(((u * v).sqrt() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn two_sided_policy() {
        let wrapped = two_sided(Props::new("diffuse"));
        assert_eq!(wrapped.plugin(), "twosided");
        assert_eq!(two_sided(wrapped.clone()), wrapped);
        for plugin in ALWAYS_TWO_SIDED {
            assert_eq!(two_sided(Props::new(*plugin)).plugin(), *plugin);
        }
    }

    #[test]
    fn distributions() {
        assert_eq!(distribution(Some("MULTI_GGX")), "ggx");
        assert_eq!(distribution(Some("ASHIKHMIN_SHIRLEY")), "beckmann");
        assert_eq!(distribution(None), "ggx");
    }
}
