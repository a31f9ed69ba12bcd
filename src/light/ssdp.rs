use crate::domain::device::{LightDescriptor, LightState};
use std::collections::HashMap;

/// Service type advertised by the lights.
pub const SERVICE_TYPE: &str = "wifi_bulb";

/// The multicast search datagram sent on every discovery cycle.
pub fn search_message(multicast_address: &str) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\nHOST: {multicast_address}\r\nMAN: \"ssdp:discover\"\r\nST: {SERVICE_TYPE}\r\n\r\n"
    )
}

/// One parsed discovery reply. Optional fields are the color snapshot headers,
/// absent from replies of lights that never reported them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SsdpReply {
    pub id: String,
    pub name: String,
    pub model: String,
    pub firmware: String,
    pub support: Vec<String>,
    pub host: String,
    pub port: u16,
    pub power: Option<String>,
    pub color_mode: Option<u8>,
    pub rgb: Option<u32>,
    pub ct: Option<u16>,
    pub hue: Option<u16>,
    pub sat: Option<u8>,
    pub bright: Option<u8>,
}

impl SsdpReply {
    /// Parses the header block of a discovery reply. Returns `None` when the
    /// identity or location headers are missing or unusable; such replies are
    /// dropped per-entry without aborting the scan cycle.
    pub fn parse(text: &str) -> Option<SsdpReply> {
        let mut headers: HashMap<String, &str> = HashMap::new();
        for line in text.lines().skip(1) {
            if let Some((key, value)) = line.split_once(':') {
                headers.insert(key.trim().to_uppercase(), value.trim());
            }
        }

        let id = (*headers.get("ID")?).to_string();
        let (host, port) = parse_location(headers.get("LOCATION")?)?;

        Some(SsdpReply {
            id,
            name: headers.get("NAME").copied().unwrap_or_default().to_string(),
            model: headers.get("MODEL").copied().unwrap_or_default().to_string(),
            firmware: headers.get("FW_VER").copied().unwrap_or_default().to_string(),
            support: headers
                .get("SUPPORT")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            host,
            port,
            power: headers.get("POWER").map(|p| (*p).to_string()),
            color_mode: headers.get("COLOR_MODE").and_then(|v| v.parse().ok()),
            rgb: headers.get("RGB").and_then(|v| v.parse().ok()),
            ct: headers.get("CT").and_then(|v| v.parse().ok()),
            hue: headers.get("HUE").and_then(|v| v.parse().ok()),
            sat: headers.get("SAT").and_then(|v| v.parse().ok()),
            bright: headers.get("BRIGHT").and_then(|v| v.parse().ok()),
        })
    }

    /// Merges this reply into a descriptor and cached state. Identity fields
    /// are overwritten with the most recently received values; the color
    /// snapshot is applied through the representation `COLOR_MODE` marks as
    /// authoritative (1 = RGB, 2 = color temperature, 3 = HSV).
    pub fn apply_to(&self, descriptor: &mut LightDescriptor, state: &mut LightState) {
        descriptor.id = self.id.clone();
        descriptor.name = self.name.clone();
        descriptor.model = self.model.clone();
        descriptor.firmware = self.firmware.clone();
        descriptor.host = self.host.clone();
        descriptor.port = self.port;
        descriptor.support = self.support.clone();
        descriptor.kind = LightDescriptor::classify(&self.support);

        if let Some(power) = &self.power {
            state.apply_power_text(power);
        }

        match self.color_mode {
            Some(1) => {
                if let Some(rgb) = self.rgb {
                    state.apply_rgb(rgb, self.bright);
                }
            }
            Some(2) => {
                if let Some(ct) = self.ct {
                    state.apply_ct(ct, self.bright);
                }
            }
            Some(3) => {
                if let (Some(hue), Some(sat)) = (self.hue, self.sat) {
                    state.apply_hsv(hue, sat, self.bright);
                }
            }
            _ => {
                if let Some(bright) = self.bright {
                    state.apply_bright(bright);
                }
            }
        }
    }

    /// Builds a fresh descriptor and state for a light seen for the first
    /// time. The link-layer address is resolved best effort.
    pub fn seed(&self) -> (LightDescriptor, LightState) {
        let mut descriptor = LightDescriptor::default();
        let mut state = LightState::default();
        self.apply_to(&mut descriptor, &mut state);
        descriptor.mac = resolve_mac(&self.host);
        (descriptor, state)
    }
}

/// `LOCATION` has the form `yeelight://host:port`; a bare `host:port`
/// (configured manual entry) is accepted too.
pub(crate) fn parse_location(location: &str) -> Option<(String, u16)> {
    let address = location.split_once("//").map_or(location, |(_, rest)| rest);
    let (host, port) = address.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port.parse().ok()?))
}

/// Best-effort link-layer address lookup in the kernel neighbor table.
/// Returns `None` on hosts without one or when the light is not local.
pub fn resolve_mac(host: &str) -> Option<String> {
    let table = std::fs::read_to_string("/proc/net/arp").ok()?;
    table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [ip, _, _, mac, ..] if *ip == host && *mac != "00:00:00:00:00:00" => Some((*mac).to_string()),
            _ => None,
        }
    })
}
