use crate::domain::color::{hsv_to_rgb, rgb_to_hsv, temperature_to_rgb};

/// Identity and capabilities of a light. Outlives any single TCP connection:
/// the descriptor persists across reconnects, only the session is recreated.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LightDescriptor {
    pub id: String,
    pub name: String,
    /// Link-layer address, best effort only. Blank when the light is not in
    /// the local neighbor table.
    pub mac: Option<String>,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub firmware: String,
    /// Advertised method names. Empty means unrestricted (manually added
    /// device).
    pub support: Vec<String>,
    pub kind: ColorKind,
}

impl LightDescriptor {
    /// A method is permitted when the support list is empty or contains it.
    pub fn supports(&self, method: &str) -> bool {
        self.support.is_empty() || self.support.iter().any(|m| m == method)
    }

    pub fn classify(support: &[String]) -> ColorKind {
        let mut kind = ColorKind::Unknown;
        if support.iter().any(|m| m == "set_ct_abx") {
            kind = ColorKind::White;
        }
        if support.iter().any(|m| m == "set_rgb" || m == "set_hsv") {
            kind = ColorKind::Color;
        }
        kind
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorKind {
    #[default]
    Unknown,
    White,
    Color,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hsb {
    pub h: u16,
    pub s: u8,
    pub b: u8,
}

/// Cached device state. Exactly one of the RGB/CT/HSV update paths is
/// authoritative per update, the other representations are recomputed from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightState {
    pub power: bool,
    pub bright: u8,
    pub rgb: Rgb,
    pub hsb: Hsb,
}

impl LightState {
    pub fn apply_power(&mut self, on: bool) {
        self.power = on;
    }

    /// The protocol reports power as text; anything but an explicit off value
    /// counts as on.
    pub fn apply_power_text(&mut self, value: &str) {
        let value = value.to_lowercase();
        self.power = !(value.is_empty() || value == "off" || value == "false" || value == "0");
    }

    pub fn apply_bright(&mut self, bright: u8) {
        self.bright = bright;
        self.hsb.b = bright;
    }

    /// Applies a packed 24-bit RGB value (0 to 16777215).
    pub fn apply_rgb(&mut self, rgb: u32, bright: Option<u8>) {
        let r = ((rgb >> 16) & 0xff) as u8;
        let g = ((rgb >> 8) & 0xff) as u8;
        let b = (rgb & 0xff) as u8;
        self.apply_color(r, g, b, bright);
    }

    /// Applies a color temperature (1700 to 6500 in the device domain) by
    /// converting it to its RGB equivalent.
    pub fn apply_ct(&mut self, kelvin: u16, bright: Option<u8>) {
        let [r, g, b] = temperature_to_rgb(f64::from(kelvin));
        self.apply_color(r.round() as u8, g.round() as u8, b.round() as u8, bright);
    }

    pub fn apply_hsv(&mut self, hue: u16, sat: u8, bright: Option<u8>) {
        if let Some(bright) = bright {
            self.bright = bright;
        }

        self.hsb = Hsb {
            h: hue,
            s: sat,
            b: self.bright,
        };

        let (r, g, b) = hsv_to_rgb(hue, sat, self.bright);
        self.rgb = Rgb { r, g, b };
    }

    fn apply_color(&mut self, r: u8, g: u8, b: u8, bright: Option<u8>) {
        self.rgb = Rgb { r, g, b };

        if let Some(bright) = bright {
            self.bright = bright;
        }

        let (h, s, _) = rgb_to_hsv(r, g, b);
        self.hsb = Hsb {
            h,
            s,
            b: self.bright,
        };
    }
}
