use serde::{Deserialize, Serialize};

/// A single telemetry value as it appears in the feed JSON.
///
/// The feed mixes types freely (`alt_baro` is a number in flight and the
/// string `"ground"` on the apron; `spi`/`alert` arrive as 0/1 integers on
/// some receivers and booleans on others), so every field is carried as this
/// sum and interpreted only at the encoder boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObservationValue {
    Number(f64),
    Text(String),
    Flag(bool),
}

impl ObservationValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ObservationValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ObservationValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Render for the fingerprint projection. Numbers use their shortest
    /// decimal form so `37000` and `37000.0` agree.
    pub fn render(&self) -> String {
        match self {
            ObservationValue::Number(n) => format!("{}", n),
            ObservationValue::Text(s) => s.clone(),
            ObservationValue::Flag(b) => b.to_string(),
        }
    }
}

/// One aircraft record from the feed.
///
/// Every field other than the identity is optional; unknown extra fields in
/// the feed JSON are ignored during parsing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AircraftObservation {
    /// 24-bit ICAO address, lowercase hex. The record identity.
    pub hex: Option<String>,
    pub flight: Option<ObservationValue>,
    pub lat: Option<ObservationValue>,
    pub lon: Option<ObservationValue>,
    pub alt_baro: Option<ObservationValue>,
    pub alt_geom: Option<ObservationValue>,
    pub gs: Option<ObservationValue>,
    pub ias: Option<ObservationValue>,
    pub tas: Option<ObservationValue>,
    pub mach: Option<ObservationValue>,
    pub track: Option<ObservationValue>,
    pub track_rate: Option<ObservationValue>,
    pub mag_heading: Option<ObservationValue>,
    pub true_heading: Option<ObservationValue>,
    pub roll: Option<ObservationValue>,
    pub baro_rate: Option<ObservationValue>,
    pub geom_rate: Option<ObservationValue>,
    pub squawk: Option<ObservationValue>,
    pub emergency: Option<ObservationValue>,
    /// Registration mark.
    pub r: Option<ObservationValue>,
    /// ICAO type code.
    pub t: Option<ObservationValue>,
    /// Long type description.
    pub desc: Option<ObservationValue>,
    pub category: Option<ObservationValue>,
    pub position_source: Option<ObservationValue>,
    pub nav_qnh: Option<ObservationValue>,
    pub nav_altitude_mcp: Option<ObservationValue>,
    pub nav_altitude_fms: Option<ObservationValue>,
    pub nav_heading: Option<ObservationValue>,
    pub wd: Option<ObservationValue>,
    pub ws: Option<ObservationValue>,
    pub oat: Option<ObservationValue>,
    pub tat: Option<ObservationValue>,
    pub spi: Option<ObservationValue>,
    pub alert: Option<ObservationValue>,
    pub version: Option<ObservationValue>,
    pub messages: Option<ObservationValue>,
    pub seen: Option<ObservationValue>,
    pub seen_pos: Option<ObservationValue>,
    pub rssi: Option<ObservationValue>,
    pub nic: Option<ObservationValue>,
    pub nac_p: Option<ObservationValue>,
    pub nac_v: Option<ObservationValue>,
    pub sil: Option<ObservationValue>,
    pub sil_type: Option<ObservationValue>,
    pub gva: Option<ObservationValue>,
    pub sda: Option<ObservationValue>,
    pub nic_baro: Option<ObservationValue>,
    pub rc: Option<ObservationValue>,
    pub dst: Option<ObservationValue>,
    pub dir: Option<ObservationValue>,
    #[serde(rename = "dbFlags")]
    pub db_flags: Option<ObservationValue>,
}

impl AircraftObservation {
    /// The trimmed, lowercased ICAO address, or `None` when absent/empty.
    pub fn normalized_hex(&self) -> Option<String> {
        let hex = self.hex.as_deref()?.trim().to_lowercase();
        if hex.is_empty() { None } else { Some(hex) }
    }

    /// The trimmed callsign, or `None` when absent/blank.
    pub fn callsign(&self) -> Option<String> {
        let flight = self.flight.as_ref()?.as_text()?.trim();
        if flight.is_empty() {
            None
        } else {
            Some(flight.to_string())
        }
    }
}
