//! Stations, events and source-receiver geometry.

use std::fmt;

use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::codes::Nsl;

pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Format a time in seconds since the epoch as RFC 3339 (UTC, microseconds).
pub fn time_to_str(t: f64) -> String {
    if !t.is_finite() {
        return format!("{t}");
    }
    let secs = t.floor();
    let nanos = ((t - secs) * 1e9).round().min(999_999_999.0) as u32;
    match DateTime::from_timestamp(secs as i64, nanos) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Micros, true),
        None => format!("{t}"),
    }
}

/// Parse an RFC 3339 time into seconds since the epoch.
pub fn str_to_time(s: &str) -> Result<f64, chrono::ParseError> {
    let dt = DateTime::parse_from_rfc3339(s.trim())?;
    Ok(dt.timestamp() as f64 + dt.timestamp_subsec_nanos() as f64 * 1e-9)
}

/// serde adapter storing epoch seconds as RFC 3339 strings.
pub mod time_format {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &f64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::time_to_str(*t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        let s = String::deserialize(d)?;
        super::str_to_time(&s).map_err(de::Error::custom)
    }
}

/// Same as [`time_format`] for optional times.
pub mod opt_time_format {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
        match t {
            Some(t) => s.serialize_some(&super::time_to_str(*t)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(s) => super::str_to_time(&s).map(Some).map_err(de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Physical quantity a waveform is restituted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    #[default]
    Displacement,
    Velocity,
    Acceleration,
}

impl Quantity {
    /// Number of time derivatives relative to displacement.
    pub fn order(&self) -> u32 {
        match self {
            Quantity::Displacement => 0,
            Quantity::Velocity => 1,
            Quantity::Acceleration => 2,
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Displacement => write!(f, "displacement"),
            Quantity::Velocity => write!(f, "velocity"),
            Quantity::Acceleration => write!(f, "acceleration"),
        }
    }
}

/// A point on the spherical earth, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Azimuth from `self` to `other` and back-azimuth from `other` to
    /// `self`, degrees clockwise from north.
    pub fn azibazi_to(&self, other: &Location) -> (f64, f64) {
        (azimuth(self, other), azimuth(other, self))
    }

    /// Great circle distance in meters.
    pub fn distance_to(&self, other: &Location) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS * a.sqrt().min(1.0).asin()
    }
}

fn azimuth(a: &Location, b: &Location) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlon = (b.lon - a.lon).to_radians();
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    y.atan2(x).to_degrees()
}

/// A recorded component and its sensor orientation.
///
/// `azimuth` is clockwise from north, `dip` is downward from horizontal, so
/// an upward vertical has dip -90.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    #[serde(default)]
    pub azimuth: Option<f64>,
    #[serde(default)]
    pub dip: Option<f64>,
}

impl Channel {
    pub fn new(name: &str, azimuth: f64, dip: f64) -> Self {
        Self {
            name: name.to_string(),
            azimuth: Some(azimuth),
            dip: Some(dip),
        }
    }

    /// Orientation guessed from the component letter of the channel code.
    pub fn from_name(name: &str) -> Self {
        let (azimuth, dip) = match name.chars().last() {
            Some('E') => (Some(90.0), Some(0.0)),
            Some('N') => (Some(0.0), Some(0.0)),
            Some('Z') => (Some(0.0), Some(-90.0)),
            _ => (None, None),
        };
        Self {
            name: name.to_string(),
            azimuth,
            dip,
        }
    }

    /// Unit vector in (east, north, up) coordinates.
    pub fn enu(&self) -> Option<[f64; 3]> {
        let azi = self.azimuth?.to_radians();
        let dip = self.dip?.to_radians();
        Some([azi.sin() * dip.cos(), azi.cos() * dip.cos(), -dip.sin()])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub network: String,
    pub station: String,
    #[serde(default)]
    pub location: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub elevation: f64,
    #[serde(default)]
    pub depth: f64,
    #[serde(default)]
    pub channels: Vec<Channel>,
}

impl Station {
    pub fn new(nsl: &Nsl, lat: f64, lon: f64) -> Self {
        Self {
            network: nsl.network.clone(),
            station: nsl.station.clone(),
            location: nsl.location.clone(),
            lat,
            lon,
            elevation: 0.0,
            depth: 0.0,
            channels: Vec::new(),
        }
    }

    pub fn nsl(&self) -> Nsl {
        Nsl::new(&self.network, &self.station, &self.location)
    }

    pub fn location(&self) -> Location {
        Location::new(self.lat, self.lon)
    }

    pub fn get_channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Replace the channel list, guessing orientations from the names.
    pub fn set_channels_by_name<S: AsRef<str>>(&mut self, names: &[S]) {
        self.channels = names.iter().map(|n| Channel::from_name(n.as_ref())).collect();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(with = "time_format")]
    pub time: f64,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub depth: f64,
    #[serde(default)]
    pub magnitude: Option<f64>,
}

impl Event {
    pub fn location(&self) -> Location {
        Location::new(self.lat, self.lon)
    }

    /// Content hash used by phase markers to refer to this event.
    pub fn content_hash(&self) -> String {
        let canonical = format!(
            "{} {} {:.6} {:.6} {:.3} {}",
            self.name,
            time_to_str(self.time),
            self.lat,
            self.lon,
            self.depth,
            self.magnitude.map(|m| format!("{m:.3}")).unwrap_or_default(),
        );
        Sha256::digest(canonical.as_bytes())
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn event() -> Event {
        Event {
            name: "ev1".to_string(),
            time: str_to_time("2020-03-01T12:00:00Z").unwrap(),
            lat: 10.0,
            lon: 20.0,
            depth: 10_000.0,
            magnitude: Some(4.5),
        }
    }

    #[test]
    fn time_strings() {
        let t = str_to_time("2022-06-05T20:32:38.123456Z").unwrap();
        assert_eq!(time_to_str(t), "2022-06-05T20:32:38.123456Z");
        assert!(str_to_time("yesterday").is_err());
    }

    #[test]
    fn geometry() {
        let a = Location::new(0.0, 0.0);
        let b = Location::new(0.0, 1.0);
        let (azi, bazi) = a.azibazi_to(&b);
        assert!((azi - 90.0).abs() < 1e-9);
        assert!((bazi + 90.0).abs() < 1e-9);
        let d = a.distance_to(&b);
        assert!((d - 111_194.9).abs() < 1.0, "{d}");
    }

    #[test]
    fn orientation_from_name() {
        let z = Channel::from_name("HHZ").enu().unwrap();
        assert!((z[2] - 1.0).abs() < 1e-12);
        let e = Channel::from_name("HHE").enu().unwrap();
        assert!((e[0] - 1.0).abs() < 1e-12);
        assert!(Channel::from_name("HH1").enu().is_none());
    }

    #[test]
    fn event_hash_tracks_content() {
        let ev = event();
        assert_eq!(ev.content_hash(), event().content_hash());
        assert_eq!(ev.content_hash().len(), 64);
        let mut other = event();
        other.magnitude = Some(5.0);
        assert_ne!(ev.content_hash(), other.content_hash());
    }

    #[test]
    fn event_yaml() {
        let yaml = serde_yaml::to_string(&event()).unwrap();
        assert!(yaml.contains("2020-03-01T12:00:00.000000Z"));
        let back: Event = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, event());
    }
}
