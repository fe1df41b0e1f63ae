//! Station inventories with per-epoch channels and their responses.

use serde::{Deserialize, Serialize};

use crate::codes::{Nsl, Nslc};
use crate::model::{opt_time_format, time_format, Channel, Quantity, Station};
use crate::response::Response;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEpoch {
    pub name: String,
    #[serde(default)]
    pub azimuth: Option<f64>,
    #[serde(default)]
    pub dip: Option<f64>,
    #[serde(with = "time_format")]
    pub start: f64,
    #[serde(default, with = "opt_time_format")]
    pub end: Option<f64>,
    /// Ground motion quantity the response takes as input.
    #[serde(default = "default_input")]
    pub input_quantity: Quantity,
    #[serde(default)]
    pub response: Option<Response>,
}

fn default_input() -> Quantity {
    Quantity::Velocity
}

impl ChannelEpoch {
    fn spans(&self, tmin: f64, tmax: f64) -> bool {
        self.start <= tmin && self.end.map_or(true, |end| tmax <= end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogStation {
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
    pub channels: Vec<ChannelEpoch>,
}

impl CatalogStation {
    pub fn nsl(&self) -> Nsl {
        Nsl::new(&self.network, &self.station, &self.location)
    }
}

/// Why a catalog could not provide exactly one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogMiss {
    None,
    Multiple,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationCatalog {
    pub stations: Vec<CatalogStation>,
}

impl StationCatalog {
    /// Station records, each with the distinct channel names of all
    /// epochs and the orientation of the latest one.
    pub fn stations(&self) -> Vec<Station> {
        self.stations
            .iter()
            .map(|cs| {
                let mut station = Station::new(&cs.nsl(), cs.lat, cs.lon);
                station.elevation = cs.elevation;
                station.depth = cs.depth;
                let mut epochs: Vec<&ChannelEpoch> = cs.channels.iter().collect();
                epochs.sort_by(|a, b| b.start.total_cmp(&a.start));
                for epoch in epochs {
                    if station.get_channel(&epoch.name).is_none() {
                        station.channels.push(Channel {
                            name: epoch.name.clone(),
                            azimuth: epoch.azimuth,
                            dip: epoch.dip,
                        });
                    }
                }
                station.channels.sort_by(|a, b| a.name.cmp(&b.name));
                station
            })
            .collect()
    }

    /// The single response of `nslc` whose epoch spans `[tmin, tmax]`,
    /// converted for restitution to `quantity`.
    pub fn get_response(
        &self,
        nslc: &Nslc,
        tmin: f64,
        tmax: f64,
        quantity: Quantity,
    ) -> Result<Response, CatalogMiss> {
        let found: Vec<&ChannelEpoch> = self
            .stations
            .iter()
            .filter(|cs| cs.nsl() == nslc.nsl())
            .flat_map(|cs| cs.channels.iter())
            .filter(|ch| ch.name == nslc.channel && ch.response.is_some() && ch.spans(tmin, tmax))
            .collect();
        match found.as_slice() {
            [epoch] => match &epoch.response {
                Some(resp) => Ok(resp.converted(epoch.input_quantity, quantity)),
                None => Err(CatalogMiss::None),
            },
            [] => Err(CatalogMiss::None),
            _ => Err(CatalogMiss::Multiple),
        }
    }
}
