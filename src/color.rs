#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rgba {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Rgba {
    pub fn new(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }.clamp()
    }

    fn clamp(self) -> Self {
        Self {
            r: self.r.clamp(0.0, 1.0),
            g: self.g.clamp(0.0, 1.0),
            b: self.b.clamp(0.0, 1.0),
            a: self.a.clamp(0.0, 1.0),
        }
    }
}

pub fn parse_color(input: &str) -> Option<Rgba> {
    let trimmed = input.trim();
    if let Some(stripped) = trimmed.strip_prefix('#') {
        return parse_hex(stripped);
    }
    let lowered = trimmed.to_ascii_lowercase();
    if lowered.starts_with("rgba") {
        return parse_rgb_function(&lowered, true);
    }
    if lowered.starts_with("rgb") {
        return parse_rgb_function(&lowered, false);
    }
    if lowered.starts_with("hsla") || lowered.starts_with("hsl") {
        return parse_hsl_function(&lowered);
    }
    named_color(&lowered)
}

/// CSS 基础命名色，LESS 把它们当作颜色常量参与运算。
fn named_color(name: &str) -> Option<Rgba> {
    let (r, g, b) = match name {
        "black" => (0x00, 0x00, 0x00),
        "silver" => (0xc0, 0xc0, 0xc0),
        "gray" | "grey" => (0x80, 0x80, 0x80),
        "white" => (0xff, 0xff, 0xff),
        "maroon" => (0x80, 0x00, 0x00),
        "red" => (0xff, 0x00, 0x00),
        "purple" => (0x80, 0x00, 0x80),
        "fuchsia" | "magenta" => (0xff, 0x00, 0xff),
        "green" => (0x00, 0x80, 0x00),
        "lime" => (0x00, 0xff, 0x00),
        "olive" => (0x80, 0x80, 0x00),
        "yellow" => (0xff, 0xff, 0x00),
        "navy" => (0x00, 0x00, 0x80),
        "blue" => (0x00, 0x00, 0xff),
        "teal" => (0x00, 0x80, 0x80),
        "aqua" | "cyan" => (0x00, 0xff, 0xff),
        "orange" => (0xff, 0xa5, 0x00),
        _ => return None,
    };
    Some(Rgba {
        r: r as f64 / 255.0,
        g: g as f64 / 255.0,
        b: b as f64 / 255.0,
        a: 1.0,
    })
}

pub fn lighten(color: Rgba, amount: f64) -> Rgba {
    let (h, s, l) = rgb_to_hsl(color);
    let new_l = (l + amount).clamp(0.0, 1.0);
    hsl_to_rgb(h, s, new_l, color.a)
}

pub fn darken(color: Rgba, amount: f64) -> Rgba {
    let (h, s, l) = rgb_to_hsl(color);
    let new_l = (l - amount).clamp(0.0, 1.0);
    hsl_to_rgb(h, s, new_l, color.a)
}

pub fn saturate(color: Rgba, amount: f64) -> Rgba {
    let (h, s, l) = rgb_to_hsl(color);
    let new_s = (s + amount).clamp(0.0, 1.0);
    hsl_to_rgb(h, new_s, l, color.a)
}

pub fn desaturate(color: Rgba, amount: f64) -> Rgba {
    let (h, s, l) = rgb_to_hsl(color);
    let new_s = (s - amount).clamp(0.0, 1.0);
    hsl_to_rgb(h, new_s, l, color.a)
}

pub fn fade(color: Rgba, amount: f64) -> Rgba {
    Rgba {
        a: amount.clamp(0.0, 1.0),
        ..color
    }
    .clamp()
}

pub fn fade_in(color: Rgba, amount: f64) -> Rgba {
    Rgba {
        a: color.a + amount,
        ..color
    }
    .clamp()
}

pub fn fade_out(color: Rgba, amount: f64) -> Rgba {
    Rgba {
        a: color.a - amount,
        ..color
    }
    .clamp()
}

/// 色相旋转，角度以度计，可为负。
pub fn spin(color: Rgba, degrees: f64) -> Rgba {
    let (h, s, l) = rgb_to_hsl(color);
    let rotated = (h * 360.0 + degrees).rem_euclid(360.0) / 360.0;
    hsl_to_rgb(rotated, s, l, color.a)
}

/// 按权重线性混合两个颜色，weight 是第一个颜色的占比。
pub fn mix(first: Rgba, second: Rgba, weight: f64) -> Rgba {
    let w = weight.clamp(0.0, 1.0);
    Rgba {
        r: first.r * w + second.r * (1.0 - w),
        g: first.g * w + second.g * (1.0 - w),
        b: first.b * w + second.b * (1.0 - w),
        a: first.a * w + second.a * (1.0 - w),
    }
    .clamp()
}

pub fn overlay(top: Rgba, bottom: Rgba) -> Rgba {
    color_blend(blend_overlay, top, bottom)
}

pub fn hsl(h: f64, s: f64, l: f64, alpha: f64) -> Rgba {
    let hue = h.rem_euclid(360.0) / 360.0;
    hsl_to_rgb(hue, s.clamp(0.0, 1.0), l.clamp(0.0, 1.0), alpha)
}

pub fn hue(color: Rgba) -> f64 {
    rgb_to_hsl(color).0 * 360.0
}

pub fn saturation(color: Rgba) -> f64 {
    rgb_to_hsl(color).1
}

pub fn lightness(color: Rgba) -> f64 {
    rgb_to_hsl(color).2
}

pub fn format_hex(color: Rgba) -> String {
    let c = color.clamp();
    format!(
        "#{:02x}{:02x}{:02x}",
        to_channel(c.r),
        to_channel(c.g),
        to_channel(c.b)
    )
}

pub fn format_rgba(color: Rgba) -> String {
    let c = color.clamp();
    let alpha = format_float(c.a);
    format!(
        "rgba({}, {}, {}, {})",
        to_channel(c.r),
        to_channel(c.g),
        to_channel(c.b),
        alpha
    )
}

fn parse_hex(hex: &str) -> Option<Rgba> {
    match hex.len() {
        3 => {
            let r = hex_value(&hex[0..1])?;
            let g = hex_value(&hex[1..2])?;
            let b = hex_value(&hex[2..3])?;
            Some(Rgba {
                r: (r * 17) as f64 / 255.0,
                g: (g * 17) as f64 / 255.0,
                b: (b * 17) as f64 / 255.0,
                a: 1.0,
            })
        }
        6 => {
            let r = hex_value(&hex[0..2])?;
            let g = hex_value(&hex[2..4])?;
            let b = hex_value(&hex[4..6])?;
            Some(Rgba {
                r: r as f64 / 255.0,
                g: g as f64 / 255.0,
                b: b as f64 / 255.0,
                a: 1.0,
            })
        }
        8 => {
            let r = hex_value(&hex[0..2])?;
            let g = hex_value(&hex[2..4])?;
            let b = hex_value(&hex[4..6])?;
            let a = hex_value(&hex[6..8])?;
            Some(Rgba {
                r: r as f64 / 255.0,
                g: g as f64 / 255.0,
                b: b as f64 / 255.0,
                a: a as f64 / 255.0,
            })
        }
        _ => None,
    }
}

fn parse_rgb_function(input: &str, has_alpha: bool) -> Option<Rgba> {
    let start = input.find('(')? + 1;
    let end = input.rfind(')')?;
    let body = &input[start..end];
    let parts: Vec<&str> = body.split(',').map(|s| s.trim()).collect();
    if (has_alpha && parts.len() != 4) || (!has_alpha && parts.len() != 3) {
        return None;
    }
    let r = parse_channel(parts[0])?;
    let g = parse_channel(parts[1])?;
    let b = parse_channel(parts[2])?;
    let a = if has_alpha {
        parse_alpha(parts[3])?
    } else {
        1.0
    };
    Some(Rgba { r, g, b, a }.clamp())
}

fn parse_hsl_function(input: &str) -> Option<Rgba> {
    let has_alpha = input.starts_with("hsla");
    let start = input.find('(')? + 1;
    let end = input.rfind(')')?;
    let body = &input[start..end];
    let parts: Vec<&str> = body.split(',').map(|s| s.trim()).collect();
    if (has_alpha && parts.len() != 4) || (!has_alpha && parts.len() != 3) {
        return None;
    }
    let h: f64 = parts[0].parse().ok()?;
    let s = parse_percent_component(parts[1])?;
    let l = parse_percent_component(parts[2])?;
    let a = if has_alpha {
        parse_alpha(parts[3])?
    } else {
        1.0
    };
    Some(hsl(h, s, l, a))
}

fn parse_channel(input: &str) -> Option<f64> {
    if let Some(value) = input.strip_suffix('%') {
        let num: f64 = value.trim().parse().ok()?;
        Some((num / 100.0).clamp(0.0, 1.0))
    } else {
        let num: f64 = input.parse().ok()?;
        Some((num / 255.0).clamp(0.0, 1.0))
    }
}

fn parse_percent_component(input: &str) -> Option<f64> {
    let value = input.strip_suffix('%').unwrap_or(input);
    let num: f64 = value.trim().parse().ok()?;
    Some((num / 100.0).clamp(0.0, 1.0))
}

fn parse_alpha(input: &str) -> Option<f64> {
    if let Some(value) = input.strip_suffix('%') {
        let num: f64 = value.parse().ok()?;
        Some((num / 100.0).clamp(0.0, 1.0))
    } else {
        input.parse().ok().map(|v: f64| v.clamp(0.0, 1.0))
    }
}

fn color_blend<F>(mode: F, bottom: Rgba, top: Rgba) -> Rgba
where
    F: Fn(f64, f64) -> f64 + Copy,
{
    let ab = bottom.a;
    let at = top.a;
    let ar = at + ab * (1.0 - at);
    let bottom_channels = [bottom.r, bottom.g, bottom.b];
    let top_channels = [top.r, top.g, top.b];
    let mut result = [0.0; 3];
    for i in 0..3 {
        let cb = bottom_channels[i];
        let cs = top_channels[i];
        let mut cr = mode(cb, cs);
        if ar > 0.0 {
            cr = (at * cs + ab * (cb - at * (cb + cs - cr))) / ar;
        }
        result[i] = cr;
    }
    Rgba {
        r: result[0],
        g: result[1],
        b: result[2],
        a: ar,
    }
    .clamp()
}

fn blend_multiply(a: f64, b: f64) -> f64 {
    a * b
}

fn blend_screen(a: f64, b: f64) -> f64 {
    a + b - a * b
}

fn blend_overlay(base: f64, overlay: f64) -> f64 {
    if base <= 0.5 {
        blend_multiply(base * 2.0, overlay)
    } else {
        blend_screen(base * 2.0 - 1.0, overlay)
    }
}

fn hex_value(hex: &str) -> Option<u8> {
    u8::from_str_radix(hex, 16).ok()
}

fn rgb_to_hsl(color: Rgba) -> (f64, f64, f64) {
    let r = color.r;
    let g = color.g;
    let b = color.b;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;

    if (max - min).abs() < f64::EPSILON {
        return (0.0, 0.0, l);
    }

    let d = max - min;
    let s = if l > 0.5 {
        d / (2.0 - max - min)
    } else {
        d / (max + min)
    };

    let h = if (max - r).abs() < f64::EPSILON {
        (g - b) / d + if g < b { 6.0 } else { 0.0 }
    } else if (max - g).abs() < f64::EPSILON {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    } / 6.0;

    (h, s, l)
}

fn hsl_to_rgb(h: f64, s: f64, l: f64, alpha: f64) -> Rgba {
    if s <= 0.0 {
        return Rgba {
            r: l,
            g: l,
            b: l,
            a: alpha,
        };
    }

    let q = if l < 0.5 {
        l * (1.0 + s)
    } else {
        l + s - l * s
    };
    let p = 2.0 * l - q;

    let r = hue_to_rgb(p, q, h + 1.0 / 3.0);
    let g = hue_to_rgb(p, q, h);
    let b = hue_to_rgb(p, q, h - 1.0 / 3.0);

    Rgba { r, g, b, a: alpha }.clamp()
}

fn hue_to_rgb(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    match t {
        _ if t < 1.0 / 6.0 => p + (q - p) * 6.0 * t,
        _ if t < 1.0 / 2.0 => q,
        _ if t < 2.0 / 3.0 => p + (q - p) * (2.0 / 3.0 - t) * 6.0,
        _ => p,
    }
}

pub fn to_channel(value: f64) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

pub fn format_float(value: f64) -> String {
    let mut formatted = format!("{value:.3}");
    while formatted.contains('.') && formatted.ends_with('0') {
        formatted.pop();
    }
    if formatted.ends_with('.') {
        formatted.pop();
    }
    if formatted.is_empty() {
        "0".to_string()
    } else {
        formatted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_shorthand_expands() {
        let c = parse_color("#fff").unwrap();
        assert_eq!(format_hex(c), "#ffffff");
    }

    #[test]
    fn lighten_darken_roundtrip() {
        let base = parse_color("#336699").unwrap();
        assert_eq!(format_hex(lighten(base, 0.2)), "#6699cc");
        assert_eq!(format_hex(darken(base, 0.1)), "#264c73");
    }

    #[test]
    fn spin_wraps_hue() {
        let base = parse_color("#ff0000").unwrap();
        let rotated = spin(base, 360.0);
        assert_eq!(format_hex(rotated), "#ff0000");
    }

    #[test]
    fn mix_halfway() {
        let c = mix(
            parse_color("#ff0000").unwrap(),
            parse_color("#0000ff").unwrap(),
            0.5,
        );
        assert_eq!(format_hex(c), "#800080");
    }

    #[test]
    fn named_colors_resolve() {
        assert_eq!(format_hex(parse_color("red").unwrap()), "#ff0000");
        assert!(parse_color("notacolor").is_none());
    }
}
