//! Colour-space helpers shared by the shader evaluators and image export.

pub fn clamp01(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}

pub fn linear_to_srgb_channel(x: f32) -> f32 {
    // https://en.wikipedia.org/wiki/SRGB
    if x <= 0.003_130_8 {
        12.92 * x
    } else {
        1.055 * x.powf(1.0 / 2.4) - 0.055
    }
}

pub fn srgb_to_linear_channel(x: f32) -> f32 {
    if x <= 0.040_45 {
        x / 12.92
    } else {
        ((x + 0.055) / 1.055).powf(2.4)
    }
}

/// Scene-linear luminance with Rec.709 primaries.
pub fn luminance([r, g, b]: [f32; 3]) -> f32 {
    0.2126 * r + 0.7152 * g + 0.0722 * b
}

pub fn rgb_to_hsv([r, g, b]: [f32; 3]) -> [f32; 3] {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let v = max;
    let s = if max > 0.0 { delta / max } else { 0.0 };
    if delta <= 0.0 {
        return [0.0, s, v];
    }
    let h = if r >= max {
        (g - b) / delta
    } else if g >= max {
        2.0 + (b - r) / delta
    } else {
        4.0 + (r - g) / delta
    };
    let h = (h / 6.0).rem_euclid(1.0);
    [h, s, v]
}

pub fn hsv_to_rgb([h, s, v]: [f32; 3]) -> [f32; 3] {
    if s <= 0.0 {
        return [v, v, v];
    }
    let h = h.rem_euclid(1.0) * 6.0;
    let i = h.floor();
    let f = h - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match i as u32 {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}

/// Largest component, used to split an RGB intensity into colour × strength.
pub fn max_component(c: [f32; 3]) -> f32 {
    c[0].max(c[1]).max(c[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_round_trip() {
        for x in [0.0, 0.002, 0.2, 0.5, 1.0] {
            let back = srgb_to_linear_channel(linear_to_srgb_channel(x));
            assert!((back - x).abs() < 1e-5, "x={x} back={back}");
        }
    }

    #[test]
    fn hsv_round_trip() {
        let c = [0.8, 0.2, 0.4];
        let back = hsv_to_rgb(rgb_to_hsv(c));
        for i in 0..3 {
            assert!((back[i] - c[i]).abs() < 1e-5);
        }
    }

    #[test]
    fn grey_has_no_saturation() {
        let [_, s, v] = rgb_to_hsv([0.5, 0.5, 0.5]);
        assert_eq!(s, 0.0);
        assert_eq!(v, 0.5);
    }
}
