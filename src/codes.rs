//! Channel addressing: NSL/NSLC codes, the closed set of objects a code can
//! be extracted from, and the blacklist/whitelist filters.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, InvalidObject};
use crate::model::Station;
use crate::trace::Trace;

/// Network, station and location code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "[String; 3]", into = "[String; 3]")]
pub struct Nsl {
    pub network: String,
    pub station: String,
    pub location: String,
}

impl Nsl {
    pub fn new(network: &str, station: &str, location: &str) -> Self {
        Self {
            network: network.to_string(),
            station: station.to_string(),
            location: location.to_string(),
        }
    }

    pub fn with_channel(&self, channel: &str) -> Nslc {
        Nslc {
            network: self.network.clone(),
            station: self.station.clone(),
            location: self.location.clone(),
            channel: channel.to_string(),
        }
    }

    /// Lookup keys in priority order: exact location, empty location,
    /// station code alone.
    pub fn fallback_keys(&self) -> Vec<Nsl> {
        let mut keys = vec![
            self.clone(),
            Nsl::new(&self.network, &self.station, ""),
            Nsl::new("", &self.station, ""),
        ];
        keys.dedup();
        keys
    }
}

impl From<[String; 3]> for Nsl {
    fn from([network, station, location]: [String; 3]) -> Self {
        Self {
            network,
            station,
            location,
        }
    }
}

impl From<Nsl> for [String; 3] {
    fn from(nsl: Nsl) -> Self {
        [nsl.network, nsl.station, nsl.location]
    }
}

impl fmt::Display for Nsl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.network, self.station, self.location)
    }
}

impl FromStr for Nsl {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split('.').collect::<Vec<_>>().as_slice() {
            [n, s, l] => Ok(Nsl::new(n, s, l)),
            _ => Err(DatasetError::InvalidCodes(s.to_string())),
        }
    }
}

/// Network, station, location and channel code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "[String; 4]", into = "[String; 4]")]
pub struct Nslc {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
}

impl Nslc {
    pub fn new(network: &str, station: &str, location: &str, channel: &str) -> Self {
        Nsl::new(network, station, location).with_channel(channel)
    }

    pub fn nsl(&self) -> Nsl {
        Nsl::new(&self.network, &self.station, &self.location)
    }

    pub fn fallback_keys(&self) -> Vec<Nslc> {
        let mut keys = Vec::new();
        for nsl in self.nsl().fallback_keys() {
            let key = nsl.with_channel(&self.channel);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }
}

impl From<[String; 4]> for Nslc {
    fn from([network, station, location, channel]: [String; 4]) -> Self {
        Self {
            network,
            station,
            location,
            channel,
        }
    }
}

impl From<Nslc> for [String; 4] {
    fn from(nslc: Nslc) -> Self {
        [nslc.network, nslc.station, nslc.location, nslc.channel]
    }
}

impl fmt::Display for Nslc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }
}

impl FromStr for Nslc {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split('.').collect::<Vec<_>>().as_slice() {
            [n, s, l, c] => Ok(Nslc::new(n, s, l, c)),
            _ => Err(DatasetError::InvalidCodes(s.to_string())),
        }
    }
}

/// Either granularity of code, used to key clip markers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CodeKey {
    Nsl(Nsl),
    Nslc(Nslc),
}

/// Anything a channel or station identity can be taken from.
#[derive(Debug, Clone, Copy)]
pub enum ObjectRef<'a> {
    Trace(&'a Trace),
    Station(&'a Station),
    Nsl(&'a Nsl),
    Nslc(&'a Nslc),
}

impl ObjectRef<'_> {
    fn kind(&self) -> &'static str {
        match self {
            ObjectRef::Trace(_) => "trace",
            ObjectRef::Station(_) => "station",
            ObjectRef::Nsl(_) => "nsl code",
            ObjectRef::Nslc(_) => "nslc code",
        }
    }

    pub fn nsl(&self) -> Nsl {
        match self {
            ObjectRef::Trace(tr) => tr.codes.nsl(),
            ObjectRef::Station(sta) => sta.nsl(),
            ObjectRef::Nsl(nsl) => (*nsl).clone(),
            ObjectRef::Nslc(nslc) => nslc.nsl(),
        }
    }

    pub fn nslc(&self) -> Result<Nslc, InvalidObject> {
        match self {
            ObjectRef::Trace(tr) => Ok(tr.codes.clone()),
            ObjectRef::Nslc(nslc) => Ok((*nslc).clone()),
            _ => Err(InvalidObject {
                wanted: "nslc code",
                kind: self.kind(),
            }),
        }
    }

    pub fn time_span(&self) -> Result<(f64, f64), InvalidObject> {
        match self {
            ObjectRef::Trace(tr) => Ok((tr.tmin, tr.tmax())),
            _ => Err(InvalidObject {
                wanted: "tmin and tmax",
                kind: self.kind(),
            }),
        }
    }
}

impl<'a> From<&'a Trace> for ObjectRef<'a> {
    fn from(tr: &'a Trace) -> Self {
        ObjectRef::Trace(tr)
    }
}

impl<'a> From<&'a Station> for ObjectRef<'a> {
    fn from(sta: &'a Station) -> Self {
        ObjectRef::Station(sta)
    }
}

impl<'a> From<&'a Nsl> for ObjectRef<'a> {
    fn from(nsl: &'a Nsl) -> Self {
        ObjectRef::Nsl(nsl)
    }
}

impl<'a> From<&'a Nslc> for ObjectRef<'a> {
    fn from(nslc: &'a Nslc) -> Self {
        ObjectRef::Nslc(nslc)
    }
}

/// Split a dotted code list entry (`STA`, `NET.STA`, `NET.STA.LOC` or
/// `NET.STA.LOC.CHA`) into its parts.
pub fn parse_partial(entry: &str) -> Result<Vec<String>, DatasetError> {
    let parts: Vec<String> = entry.trim().split('.').map(str::to_string).collect();
    if entry.trim().is_empty() || parts.len() > 4 {
        return Err(DatasetError::InvalidCodes(entry.to_string()));
    }
    Ok(parts)
}

/// Codes excluded from processing.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    entries: HashSet<Vec<String>>,
}

impl Blacklist {
    pub fn add(&mut self, entry: &str) -> Result<(), DatasetError> {
        self.entries.insert(parse_partial(entry)?);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, obj: ObjectRef<'_>) -> bool {
        if let Ok(nslc) = obj.nslc() {
            if self.entries.contains(&Vec::from(<[String; 4]>::from(nslc))) {
                return true;
            }
        }
        let nsl = obj.nsl();
        self.entries.contains(&vec![nsl.station.clone()])
            || self
                .entries
                .contains(&vec![nsl.network.clone(), nsl.station.clone()])
            || self.entries.contains(&Vec::from(<[String; 3]>::from(nsl)))
    }
}

/// Codes processing is restricted to.
///
/// An empty whitelist restricts nothing.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    nslc: HashSet<Nslc>,
    nsl: HashSet<Nsl>,
    nsl_of_nslc: HashSet<Nsl>,
    net_sta: HashSet<(String, String)>,
    sta: HashSet<String>,
}

impl Whitelist {
    pub fn add(&mut self, entry: &str) -> Result<(), DatasetError> {
        match parse_partial(entry)?.as_slice() {
            [s] => {
                self.sta.insert(s.clone());
            }
            [n, s] => {
                self.net_sta.insert((n.clone(), s.clone()));
            }
            [n, s, l] => {
                self.nsl.insert(Nsl::new(n, s, l));
            }
            [n, s, l, c] => {
                let nslc = Nslc::new(n, s, l, c);
                self.nsl_of_nslc.insert(nslc.nsl());
                self.nslc.insert(nslc);
            }
            _ => return Err(DatasetError::InvalidCodes(entry.to_string())),
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.nslc.is_empty()
            && self.nsl.is_empty()
            && self.net_sta.is_empty()
            && self.sta.is_empty()
    }

    pub fn contains(&self, obj: ObjectRef<'_>) -> bool {
        if self.is_empty() {
            return true;
        }
        let nsl = obj.nsl();
        let coarse = self.nsl.contains(&nsl)
            || self
                .net_sta
                .contains(&(nsl.network.clone(), nsl.station.clone()))
            || self.sta.contains(&nsl.station);

        match obj.nslc() {
            Ok(nslc) => self.nslc.contains(&nslc) || coarse,
            Err(_) => coarse || self.nsl_of_nslc.contains(&nsl),
        }
    }
}
