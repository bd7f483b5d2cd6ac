//! Colour and scalar inputs of shader nodes.
//!
//! Constant sub-graphs (math, mixing, ramps, colour adjustments) are folded
//! on the CPU into literal values. Converter nodes fed by a texture cannot be
//! folded; their textured input is passed through and a warning is logged.

use anyhow::{Result, bail};
use serde_json::Value as Json;

use crate::color::{clamp01, hsv_to_rgb, luminance, rgb_to_hsv};
use crate::export::context::ExportContext;
use crate::export::materials::textures;
use crate::export::materials::walker::{Cursor, Input, Source};
use crate::host::HostScene;
use crate::host::nodes::{Node, json_color, json_f32, types};
use crate::props::Props;

#[derive(Debug, Clone, PartialEq)]
pub enum Eval {
    Color([f32; 3]),
    Float(f32),
    Texture(Props),
}

impl Eval {
    pub fn color(&self) -> Option<[f32; 3]> {
        match self {
            Eval::Color(c) => Some(*c),
            Eval::Float(f) => Some([*f; 3]),
            Eval::Texture(_) => None,
        }
    }

    pub fn float(&self) -> Option<f32> {
        match self {
            Eval::Float(f) => Some(*f),
            Eval::Color(c) => Some(luminance(*c)),
            Eval::Texture(_) => None,
        }
    }
}

fn literal(json: &Json, default: &Eval) -> Eval {
    match default {
        Eval::Float(_) => json_f32(json)
            .map(Eval::Float)
            .or_else(|| json_color(json).map(|c| Eval::Float(luminance(c))))
            .unwrap_or_else(|| default.clone()),
        _ => json_color(json)
            .map(Eval::Color)
            .unwrap_or_else(|| default.clone()),
    }
}

/// Evaluate `socket` of `node`. Unlinked sockets yield their stored value,
/// or `default` when the node stores none.
pub fn eval_input(
    ctx: &mut ExportContext,
    scene: &HostScene,
    cursor: &Cursor,
    node: &Node,
    socket: &str,
    default: Eval,
) -> Result<Eval> {
    match cursor.input(node, socket) {
        Input::Value(Some(json)) => Ok(literal(json, &default)),
        Input::Value(None) => Ok(default),
        Input::Linked(src) => match eval_source(ctx, scene, &src) {
            // A broken image only costs the socket it feeds.
            Err(e) if is_image_node(src.node) => {
                ctx.report.warn(format!(
                    "{}: {e:#}; using the default of '{socket}'",
                    src.node.name
                ));
                Ok(default)
            }
            other => other,
        },
    }
}

fn is_image_node(node: &Node) -> bool {
    matches!(node.node_type.as_str(), types::TEX_IMAGE | types::TEX_ENVIRONMENT)
}

/// Evaluate the output socket a link points at.
pub fn eval_source(ctx: &mut ExportContext, scene: &HostScene, src: &Source) -> Result<Eval> {
    let node = src.node;
    let out = match node.node_type.as_str() {
        types::TEX_IMAGE | types::TEX_ENVIRONMENT => {
            Eval::Texture(textures::image_texture(ctx, scene, src)?)
        }
        types::TEX_CHECKER => Eval::Texture(textures::checker_texture(ctx, scene, src)?),
        types::VERTEX_COLOR => Eval::Texture(textures::vertex_color_texture(src)?),
        types::RGB => Eval::Color(textures::rgb_node_color(
            node.params.get("color").or_else(|| node.input("Color")),
        )),
        types::VALUE => Eval::Float(node.param_f32("value").unwrap_or(0.5)),
        types::TEX_NOISE => {
            ctx.report.warn(format!(
                "noise texture '{}' is not supported; using its mean value",
                node.name
            ));
            if src.socket == "Color" {
                Eval::Color([0.5; 3])
            } else {
                Eval::Float(0.5)
            }
        }
        types::MATH => math_node(ctx, scene, src)?,
        types::MIX | types::MIX_RGB => mix_node(ctx, scene, src)?,
        types::COLOR_RAMP => color_ramp(ctx, scene, src)?,
        types::SEPARATE_COLOR | types::SEPARATE_RGB => separate_color(ctx, scene, src)?,
        types::COMBINE_COLOR | types::COMBINE_RGB => combine_color(ctx, scene, src)?,
        types::HUE_SATURATION => hue_saturation(ctx, scene, src)?,
        types::CLAMP => clamp_node(ctx, scene, src)?,
        types::MAP_RANGE => map_range(ctx, scene, src)?,
        types::INVERT => invert(ctx, scene, src)?,
        types::BRIGHT_CONTRAST => bright_contrast(ctx, scene, src)?,
        types::RGB_TO_BW => {
            let c = input(ctx, scene, src, "Color", Eval::Color([0.5; 3]))?;
            match c {
                Eval::Texture(t) => pass_through(ctx, node, t),
                other => Eval::Float(other.float().unwrap_or(0.0)),
            }
        }
        other => bail!("unsupported shader node '{}' of type {other}", node.name),
    };
    Ok(out)
}

pub fn input(ctx: &mut ExportContext, scene: &HostScene, src: &Source, socket: &str, default: Eval) -> Result<Eval> {
    eval_input(ctx, scene, &src.cursor, src.node, socket, default)
}

/// First input that exists on the node, for sockets renamed between host
/// releases.
pub fn input_any(
    ctx: &mut ExportContext,
    scene: &HostScene,
    src: &Source,
    sockets: &[&str],
    default: Eval,
) -> Result<Eval> {
    for socket in sockets {
        if src.node.inputs.contains_key(*socket) || src.cursor.tree().is_linked(&src.node.name, socket) {
            return input(ctx, scene, src, socket, default);
        }
    }
    Ok(default)
}

fn pass_through(ctx: &mut ExportContext, node: &Node, texture: Props) -> Eval {
    ctx.report.warn(format!(
        "'{}' ({}) is fed by a texture and cannot be evaluated; passing the texture through",
        node.name, node.node_type
    ));
    Eval::Texture(texture)
}

fn first_texture(inputs: &[&Eval]) -> Option<Props> {
    inputs.iter().find_map(|e| match e {
        Eval::Texture(t) => Some(t.clone()),
        _ => None,
    })
}

pub fn math_op(op: &str, a: f32, b: f32, c: f32) -> Option<f32> {
    Some(match op {
        "ADD" => a + b,
        "SUBTRACT" => a - b,
        "MULTIPLY" => a * b,
        "DIVIDE" => {
            if b == 0.0 {
                0.0
            } else {
                a / b
            }
        }
        "MULTIPLY_ADD" => a * b + c,
        "POWER" => {
            if a < 0.0 && b.fract() != 0.0 {
                0.0
            } else {
                a.powf(b)
            }
        }
        "LOGARITHM" => {
            if a > 0.0 && b > 0.0 && b != 1.0 {
                a.ln() / b.ln()
            } else {
                0.0
            }
        }
        "SQRT" => {
            if a > 0.0 {
                a.sqrt()
            } else {
                0.0
            }
        }
        "INVERSE_SQRT" => {
            if a > 0.0 {
                1.0 / a.sqrt()
            } else {
                0.0
            }
        }
        "ABSOLUTE" => a.abs(),
        "EXPONENT" => a.exp(),
        "MINIMUM" => a.min(b),
        "MAXIMUM" => a.max(b),
        "LESS_THAN" => (a < b) as u8 as f32,
        "GREATER_THAN" => (a > b) as u8 as f32,
        "SIGN" => {
            if a == 0.0 {
                0.0
            } else {
                a.signum()
            }
        }
        "COMPARE" => ((a - b).abs() <= c.max(1e-5)) as u8 as f32,
        "ROUND" => (a + 0.5).floor(),
        "FLOOR" => a.floor(),
        "CEIL" => a.ceil(),
        "TRUNC" => a.trunc(),
        "FRACT" => a - a.floor(),
        "MODULO" => {
            if b == 0.0 {
                0.0
            } else {
                a % b
            }
        }
        "FLOORED_MODULO" => {
            if b == 0.0 {
                0.0
            } else {
                a - (a / b).floor() * b
            }
        }
        "WRAP" => {
            let range = b - c;
            if range == 0.0 {
                c
            } else {
                a - range * ((a - c) / range).floor()
            }
        }
        "SNAP" => {
            if b == 0.0 {
                0.0
            } else {
                (a / b).floor() * b
            }
        }
        "SINE" => a.sin(),
        "COSINE" => a.cos(),
        "TANGENT" => a.tan(),
        "ARCSINE" => a.clamp(-1.0, 1.0).asin(),
        "ARCCOSINE" => a.clamp(-1.0, 1.0).acos(),
        "ARCTANGENT" => a.atan(),
        "ARCTAN2" => a.atan2(b),
        "SINH" => a.sinh(),
        "COSH" => a.cosh(),
        "TANH" => a.tanh(),
        "RADIANS" => a.to_radians(),
        "DEGREES" => a.to_degrees(),
        _ => return None,
    })
}

fn math_node(ctx: &mut ExportContext, scene: &HostScene, src: &Source) -> Result<Eval> {
    let a = input(ctx, scene, src, "Value", Eval::Float(0.5))?;
    let b = input(ctx, scene, src, "Value_001", Eval::Float(0.5))?;
    let c = input(ctx, scene, src, "Value_002", Eval::Float(0.5))?;
    if let Some(t) = first_texture(&[&a, &b, &c]) {
        return Ok(pass_through(ctx, src.node, t));
    }
    let op = src.node.param_str("operation").unwrap_or("ADD");
    let (a, b, c) = (
        a.float().unwrap_or(0.0),
        b.float().unwrap_or(0.0),
        c.float().unwrap_or(0.0),
    );
    let v = match math_op(op, a, b, c) {
        Some(v) => v,
        None => {
            ctx.report.warn(format!(
                "math node '{}': operation {op} is not supported; using its first input",
                src.node.name
            ));
            a
        }
    };
    let clamp = src.node.param_bool("use_clamp").unwrap_or(false);
    Ok(Eval::Float(if clamp { clamp01(v) } else { v }))
}

pub fn blend_channel(mode: &str, f: f32, a: f32, b: f32) -> Option<f32> {
    let fm = 1.0 - f;
    Some(match mode {
        "MIX" => fm * a + f * b,
        "ADD" => a + f * b,
        "MULTIPLY" => a * (fm + f * b),
        "SUBTRACT" => a - f * b,
        "SCREEN" => 1.0 - (fm + f * (1.0 - b)) * (1.0 - a),
        "DIVIDE" => {
            if b != 0.0 {
                fm * a + f * a / b
            } else {
                a
            }
        }
        "DIFFERENCE" => fm * a + f * (a - b).abs(),
        "EXCLUSION" => fm * a + f * (a + b - 2.0 * a * b),
        "DARKEN" => fm * a + f * a.min(b),
        "LIGHTEN" => fm * a + f * a.max(b),
        "OVERLAY" => {
            if a < 0.5 {
                a * (fm + 2.0 * f * b)
            } else {
                1.0 - (fm + 2.0 * f * (1.0 - b)) * (1.0 - a)
            }
        }
        "DODGE" => {
            if a == 0.0 {
                0.0
            } else {
                let t = 1.0 - f * b;
                if t <= 0.0 { 1.0 } else { (a / t).min(1.0) }
            }
        }
        "BURN" => {
            let t = fm + f * b;
            if t <= 0.0 {
                0.0
            } else {
                clamp01(1.0 - (1.0 - a) / t)
            }
        }
        "SOFT_LIGHT" => {
            let scr = 1.0 - (1.0 - b) * (1.0 - a);
            fm * a + f * ((1.0 - a) * b * a + a * scr)
        }
        "LINEAR_LIGHT" => {
            if b > 0.5 {
                a + f * (2.0 * (b - 0.5))
            } else {
                a + f * (2.0 * b - 1.0)
            }
        }
        _ => return None,
    })
}

/// Blend modes working in HSV space.
fn blend_hsv(mode: &str, f: f32, a: [f32; 3], b: [f32; 3]) -> Option<[f32; 3]> {
    let ha = rgb_to_hsv(a);
    let hb = rgb_to_hsv(b);
    let mixed = match mode {
        "HUE" if hb[1] != 0.0 => hsv_to_rgb([hb[0], ha[1], ha[2]]),
        "SATURATION" if ha[1] != 0.0 => hsv_to_rgb([ha[0], hb[1], ha[2]]),
        "VALUE" => hsv_to_rgb([ha[0], ha[1], hb[2]]),
        "COLOR" if hb[1] != 0.0 => hsv_to_rgb([hb[0], hb[1], ha[2]]),
        "HUE" | "SATURATION" | "COLOR" => a,
        _ => return None,
    };
    Some(std::array::from_fn(|i| (1.0 - f) * a[i] + f * mixed[i]))
}

fn mix_node(ctx: &mut ExportContext, scene: &HostScene, src: &Source) -> Result<Eval> {
    let node = src.node;
    let legacy = node.node_type == types::MIX_RGB;
    let (fac_socket, a_socket, b_socket) = if legacy {
        ("Fac", "Color1", "Color2")
    } else {
        ("Factor", "A", "B")
    };
    let float_mode = !legacy && node.param_str("data_type") == Some("FLOAT");
    let operand_default = if float_mode {
        Eval::Float(0.5)
    } else {
        Eval::Color([0.5; 3])
    };
    let fac = input(ctx, scene, src, fac_socket, Eval::Float(0.5))?;
    let a = input(ctx, scene, src, a_socket, operand_default.clone())?;
    let b = input(ctx, scene, src, b_socket, operand_default)?;
    if let Some(t) = first_texture(&[&a, &b, &fac]) {
        return Ok(pass_through(ctx, node, t));
    }
    let mut f = fac.float().unwrap_or(0.5);
    if node.param_bool("clamp_factor").unwrap_or(true) {
        f = clamp01(f);
    }
    if float_mode {
        let (a, b) = (a.float().unwrap_or(0.0), b.float().unwrap_or(0.0));
        let v = (1.0 - f) * a + f * b;
        let clamp = node.param_bool("clamp_result").unwrap_or(false);
        return Ok(Eval::Float(if clamp { clamp01(v) } else { v }));
    }

    let mode = node.param_str("blend_type").unwrap_or("MIX");
    let (a, b) = (a.color().unwrap_or([0.0; 3]), b.color().unwrap_or([0.0; 3]));
    let mut out = match blend_hsv(mode, f, a, b) {
        Some(c) => c,
        None => {
            let per_channel: Option<Vec<f32>> =
                (0..3).map(|i| blend_channel(mode, f, a[i], b[i])).collect();
            match per_channel {
                Some(v) => [v[0], v[1], v[2]],
                None => {
                    ctx.report.warn(format!(
                        "mix node '{}': blend mode {mode} is not supported; using MIX",
                        node.name
                    ));
                    std::array::from_fn(|i| (1.0 - f) * a[i] + f * b[i])
                }
            }
        }
    };
    let clamp = node
        .param_bool("clamp_result")
        .or_else(|| node.param_bool("use_clamp"))
        .unwrap_or(false);
    if clamp {
        out = out.map(clamp01);
    }
    Ok(Eval::Color(out))
}

#[derive(Debug, Clone, Copy)]
struct RampStop {
    position: f32,
    color: [f32; 4],
}

fn ramp_stops(node: &Node) -> Vec<RampStop> {
    let mut stops: Vec<RampStop> = node
        .params
        .get("elements")
        .and_then(Json::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|e| {
                    let position = json_f32(e.get("position")?)?;
                    let c = e.get("color")?.as_array()?;
                    let ch = |i: usize| c.get(i).and_then(json_f32);
                    Some(RampStop {
                        position,
                        color: [ch(0)?, ch(1)?, ch(2)?, ch(3).unwrap_or(1.0)],
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    if stops.is_empty() {
        stops = vec![
            RampStop {
                position: 0.0,
                color: [0.0, 0.0, 0.0, 1.0],
            },
            RampStop {
                position: 1.0,
                color: [1.0; 4],
            },
        ];
    }
    stops.sort_by(|a, b| a.position.total_cmp(&b.position));
    stops
}

fn sample_ramp(stops: &[RampStop], interpolation: &str, t: f32) -> [f32; 4] {
    let Some(first) = stops.first() else {
        return [0.0; 4];
    };
    if t <= first.position {
        return first.color;
    }
    for pair in stops.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if t < hi.position {
            if interpolation == "CONSTANT" {
                return lo.color;
            }
            let span = hi.position - lo.position;
            let mut u = if span > 0.0 { (t - lo.position) / span } else { 0.0 };
            if interpolation == "EASE" {
                u = u * u * (3.0 - 2.0 * u);
            }
            return std::array::from_fn(|i| lo.color[i] + (hi.color[i] - lo.color[i]) * u);
        }
    }
    stops[stops.len() - 1].color
}

fn color_ramp(ctx: &mut ExportContext, scene: &HostScene, src: &Source) -> Result<Eval> {
    let fac = input(ctx, scene, src, "Fac", Eval::Float(0.5))?;
    let t = match fac {
        Eval::Texture(tex) => return Ok(pass_through(ctx, src.node, tex)),
        other => other.float().unwrap_or(0.5),
    };
    let stops = ramp_stops(src.node);
    let interpolation = src.node.param_str("interpolation").unwrap_or("LINEAR");
    if !matches!(interpolation, "LINEAR" | "CONSTANT" | "EASE") {
        ctx.report.warn(format!(
            "color ramp '{}': {interpolation} interpolation approximated as linear",
            src.node.name
        ));
    }
    let c = sample_ramp(&stops, interpolation, clamp01(t));
    Ok(if src.socket == "Alpha" {
        Eval::Float(c[3])
    } else {
        Eval::Color([c[0], c[1], c[2]])
    })
}

fn separate_color(ctx: &mut ExportContext, scene: &HostScene, src: &Source) -> Result<Eval> {
    let c = input_any(ctx, scene, src, &["Color", "Image"], Eval::Color([0.8; 3]))?;
    let rgb = match c {
        Eval::Texture(tex) => return Ok(pass_through(ctx, src.node, tex)),
        other => other.color().unwrap_or([0.0; 3]),
    };
    let values = match src.node.param_str("mode") {
        Some("HSV") => rgb_to_hsv(rgb),
        Some("HSL") => {
            ctx.report.warn(format!(
                "separate colour '{}': HSL approximated by HSV",
                src.node.name
            ));
            rgb_to_hsv(rgb)
        }
        _ => rgb,
    };
    let idx = match src.socket.as_str() {
        "Red" | "R" | "Hue" | "H" => 0,
        "Green" | "G" | "Saturation" | "S" => 1,
        _ => 2,
    };
    Ok(Eval::Float(values[idx]))
}

fn combine_color(ctx: &mut ExportContext, scene: &HostScene, src: &Source) -> Result<Eval> {
    let legacy = src.node.node_type == types::COMBINE_RGB;
    let names: [&str; 3] = if legacy {
        ["R", "G", "B"]
    } else {
        ["Red", "Green", "Blue"]
    };
    let mut channels = Vec::with_capacity(3);
    for name in names {
        channels.push(input(ctx, scene, src, name, Eval::Float(0.0))?);
    }
    if let Some(t) = first_texture(&channels.iter().collect::<Vec<_>>()) {
        return Ok(pass_through(ctx, src.node, t));
    }
    let v: [f32; 3] = std::array::from_fn(|i| channels[i].float().unwrap_or(0.0));
    Ok(Eval::Color(match src.node.param_str("mode") {
        Some("HSV") | Some("HSL") => hsv_to_rgb(v),
        _ => v,
    }))
}

fn hue_saturation(ctx: &mut ExportContext, scene: &HostScene, src: &Source) -> Result<Eval> {
    let hue = input(ctx, scene, src, "Hue", Eval::Float(0.5))?;
    let sat = input(ctx, scene, src, "Saturation", Eval::Float(1.0))?;
    let val = input(ctx, scene, src, "Value", Eval::Float(1.0))?;
    let fac = input(ctx, scene, src, "Fac", Eval::Float(1.0))?;
    let color = input(ctx, scene, src, "Color", Eval::Color([0.8; 3]))?;
    if let Some(t) = first_texture(&[&color, &hue, &sat, &val, &fac]) {
        return Ok(pass_through(ctx, src.node, t));
    }
    let c = color.color().unwrap_or([0.0; 3]);
    let mut hsv = rgb_to_hsv(c);
    hsv[0] = (hsv[0] + hue.float().unwrap_or(0.5) - 0.5).rem_euclid(1.0);
    hsv[1] = clamp01(hsv[1] * sat.float().unwrap_or(1.0));
    hsv[2] *= val.float().unwrap_or(1.0);
    let shifted = hsv_to_rgb(hsv);
    let f = fac.float().unwrap_or(1.0);
    Ok(Eval::Color(std::array::from_fn(|i| {
        (1.0 - f) * c[i] + f * shifted[i]
    })))
}

fn clamp_node(ctx: &mut ExportContext, scene: &HostScene, src: &Source) -> Result<Eval> {
    let v = input(ctx, scene, src, "Value", Eval::Float(1.0))?;
    let lo = input(ctx, scene, src, "Min", Eval::Float(0.0))?;
    let hi = input(ctx, scene, src, "Max", Eval::Float(1.0))?;
    if let Some(t) = first_texture(&[&v, &lo, &hi]) {
        return Ok(pass_through(ctx, src.node, t));
    }
    let (v, mut lo, mut hi) = (
        v.float().unwrap_or(0.0),
        lo.float().unwrap_or(0.0),
        hi.float().unwrap_or(1.0),
    );
    if src.node.param_str("clamp_type") == Some("RANGE") && lo > hi {
        std::mem::swap(&mut lo, &mut hi);
    }
    Ok(Eval::Float(v.max(lo).min(hi)))
}

fn map_range(ctx: &mut ExportContext, scene: &HostScene, src: &Source) -> Result<Eval> {
    let mut vals = Vec::with_capacity(6);
    for (socket, default) in [
        ("Value", 1.0),
        ("From Min", 0.0),
        ("From Max", 1.0),
        ("To Min", 0.0),
        ("To Max", 1.0),
        ("Steps", 4.0),
    ] {
        vals.push(input(ctx, scene, src, socket, Eval::Float(default))?);
    }
    if let Some(t) = first_texture(&vals.iter().collect::<Vec<_>>()) {
        return Ok(pass_through(ctx, src.node, t));
    }
    let f: Vec<f32> = vals.iter().map(|e| e.float().unwrap_or(0.0)).collect();
    let (v, from_min, from_max, to_min, to_max, steps) = (f[0], f[1], f[2], f[3], f[4], f[5]);
    let range = from_max - from_min;
    let mut t = if range != 0.0 { (v - from_min) / range } else { 0.0 };
    match src.node.param_str("interpolation_type").unwrap_or("LINEAR") {
        "STEPPED" => {
            if steps > 0.0 {
                t = (t * (steps + 1.0)).floor() / steps;
            }
        }
        "SMOOTHSTEP" => {
            let u = clamp01(t);
            t = u * u * (3.0 - 2.0 * u);
        }
        "SMOOTHERSTEP" => {
            let u = clamp01(t);
            t = u * u * u * (u * (u * 6.0 - 15.0) + 10.0);
        }
        _ => {}
    }
    let mut out = to_min + t * (to_max - to_min);
    if src.node.param_bool("clamp").unwrap_or(true) {
        let (lo, hi) = if to_min <= to_max {
            (to_min, to_max)
        } else {
            (to_max, to_min)
        };
        out = out.clamp(lo, hi);
    }
    Ok(Eval::Float(out))
}

fn invert(ctx: &mut ExportContext, scene: &HostScene, src: &Source) -> Result<Eval> {
    let fac = input(ctx, scene, src, "Fac", Eval::Float(1.0))?;
    let color = input(ctx, scene, src, "Color", Eval::Color([0.0; 3]))?;
    if let Some(t) = first_texture(&[&color, &fac]) {
        return Ok(pass_through(ctx, src.node, t));
    }
    let f = fac.float().unwrap_or(1.0);
    let c = color.color().unwrap_or([0.0; 3]);
    Ok(Eval::Color(c.map(|x| (1.0 - f) * x + f * (1.0 - x))))
}

fn bright_contrast(ctx: &mut ExportContext, scene: &HostScene, src: &Source) -> Result<Eval> {
    let color = input(ctx, scene, src, "Color", Eval::Color([0.8; 3]))?;
    let bright = input(ctx, scene, src, "Bright", Eval::Float(0.0))?;
    let contrast = input(ctx, scene, src, "Contrast", Eval::Float(0.0))?;
    if let Some(t) = first_texture(&[&color, &bright, &contrast]) {
        return Ok(pass_through(ctx, src.node, t));
    }
    let c = color.color().unwrap_or([0.0; 3]);
    let contrast = contrast.float().unwrap_or(0.0);
    let a = 1.0 + contrast;
    let b = bright.float().unwrap_or(0.0) - contrast * 0.5;
    Ok(Eval::Color(c.map(|x| (a * x + b).max(0.0))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn math_ops_guard_domain_errors() {
        assert_eq!(math_op("DIVIDE", 1.0, 0.0, 0.0), Some(0.0));
        assert_eq!(math_op("SQRT", -4.0, 0.0, 0.0), Some(0.0));
        assert_eq!(math_op("MULTIPLY_ADD", 2.0, 3.0, 1.0), Some(7.0));
        assert_eq!(math_op("FLOORED_MODULO", -1.0, 3.0, 0.0), Some(2.0));
        assert_eq!(math_op("PINGPONG", 0.0, 0.0, 0.0), None);
    }

    #[test]
    fn blend_modes_match_host_formulas() {
        assert_eq!(blend_channel("MIX", 0.25, 0.0, 1.0), Some(0.25));
        assert_eq!(blend_channel("MULTIPLY", 1.0, 0.5, 0.5), Some(0.25));
        assert_eq!(blend_channel("SCREEN", 1.0, 0.5, 0.5), Some(0.75));
        assert_eq!(blend_channel("DIVIDE", 1.0, 0.5, 0.0), Some(0.5));
        assert_eq!(blend_channel("UNKNOWN", 1.0, 0.5, 0.0), None);
    }

    #[test]
    fn ramp_interpolates_between_stops() {
        let stops = vec![
            RampStop {
                position: 0.0,
                color: [0.0, 0.0, 0.0, 1.0],
            },
            RampStop {
                position: 1.0,
                color: [1.0, 0.5, 0.0, 1.0],
            },
        ];
        let mid = sample_ramp(&stops, "LINEAR", 0.5);
        assert_eq!(mid, [0.5, 0.25, 0.0, 1.0]);
        assert_eq!(sample_ramp(&stops, "CONSTANT", 0.5), stops[0].color);
        assert_eq!(sample_ramp(&stops, "LINEAR", 2.0), stops[1].color);
    }
}
