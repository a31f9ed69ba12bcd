/// Pure color conversions shared by the light session and the command runner.
///
/// Temperature conversions follow the common two-branch closed-form
/// approximation of the black body curve, split at 6504 K.

/// Converts a color temperature in Kelvin to RGB channels in [0.0, 255.0].
pub fn temperature_to_rgb(kelvin: f64) -> [f64; 3] {
    let t100 = kelvin / 100.0;

    let (red, green) = if kelvin <= 6504.0 {
        let green = 99.470_802_586_1 * t100.ln() - 161.119_568_166_1;
        (255.0, green.clamp(0.0, 255.0))
    } else {
        let red = 329.698_727_446 * (t100 - 60.0).powf(-0.133_204_759_2);
        let green = 288.122_169_528_3 * (t100 - 60.0).powf(-0.075_514_849_2);
        (red.clamp(0.0, 255.0), green.clamp(0.0, 255.0))
    };

    let blue = if kelvin >= 6504.0 {
        255.0
    } else if t100 <= 19.0 {
        0.0
    } else {
        (138.517_731_223_1 * (t100 - 10.0).ln() - 305.044_792_730_7).clamp(0.0, 255.0)
    };

    [red, green, blue]
}

/// Inverts [`temperature_to_rgb`] by binary search over [1000, 40000] K,
/// narrowing until the interval is smaller than 0.4 K. The search is driven
/// by the monotone blue/red channel ratio.
///
/// A red channel of 0 makes the ratio +∞ (IEEE-754 division), so the search
/// walks to the upper bound instead of panicking. Temperatures whose blue
/// channel is 0 (below ~1905 K) all share ratio 0 and collapse to the lower
/// bound.
pub fn rgb_to_temperature(red: f64, _green: f64, blue: f64) -> u16 {
    let ratio = blue / red;

    let mut t_min = 1000.0;
    let mut t_max = 40000.0;
    let mut t = 0.0;
    while t_max - t_min > 0.4 {
        t = (t_max + t_min) / 2.0;
        let test = temperature_to_rgb(t);
        if test[2] / test[0] >= ratio {
            t_max = t;
        } else {
            t_min = t;
        }
    }

    t.round() as u16
}

pub fn rgb_to_hex(red: u8, green: u8, blue: u8) -> String {
    format!("#{:02x}{:02x}{:02x}", red, green, blue)
}

/// Parses `#rgb` and `#rrggbb` forms (leading `#` optional). Unparsable input
/// yields black rather than an error.
pub fn hex_to_rgb(hex: &str) -> (u8, u8, u8) {
    let hex = hex.trim_start_matches('#');

    let expanded;
    let hex = if hex.len() == 3 {
        expanded = hex.chars().flat_map(|c| [c, c]).collect::<String>();
        expanded.as_str()
    } else {
        hex
    };

    if hex.len() != 6 || !hex.is_ascii() {
        return (0, 0, 0);
    }

    let channel = |range| u8::from_str_radix(&hex[range], 16).ok();
    match (channel(0..2), channel(2..4), channel(4..6)) {
        (Some(red), Some(green), Some(blue)) => (red, green, blue),
        _ => (0, 0, 0),
    }
}

/// Converts RGB to hue [0, 359], saturation [0, 100] and value [0, 100].
pub fn rgb_to_hsv(red: u8, green: u8, blue: u8) -> (u16, u8, u8) {
    let r = f64::from(red) / 255.0;
    let g = f64::from(green) / 255.0;
    let b = f64::from(blue) / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };

    let saturation = if max == 0.0 { 0.0 } else { delta / max };

    (
        (hue.round() as u16) % 360,
        (saturation * 100.0).round() as u8,
        (max * 100.0).round() as u8,
    )
}

/// Converts hue [0, 359], saturation [0, 100] and value [0, 100] to RGB.
pub fn hsv_to_rgb(hue: u16, saturation: u8, value: u8) -> (u8, u8, u8) {
    let h = f64::from(hue % 360);
    let s = f64::from(saturation.min(100)) / 100.0;
    let v = f64::from(value.min(100)) / 100.0;

    let c = v * s;
    let x = c * (1.0 - ((h / 60.0).rem_euclid(2.0) - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match h as u16 / 60 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    (
        ((r + m) * 255.0).round() as u8,
        ((g + m) * 255.0).round() as u8,
        ((b + m) * 255.0).round() as u8,
    )
}
