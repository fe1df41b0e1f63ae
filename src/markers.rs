//! Event, phase pick, clipping and time span markers.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codes::Nslc;
use crate::error::DatasetError;
use crate::files::{dump_yaml, load_yaml};
use crate::model::{time_format, Event};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Marker {
    Event {
        event: Event,
    },
    Phase {
        nslc: Nslc,
        #[serde(with = "time_format")]
        tmin: f64,
        phase: String,
        /// Content hash of the event the pick belongs to.
        #[serde(default)]
        event_hash: Option<String>,
    },
    /// Sensor saturation observed at `tmin`.
    Clip {
        nslc: Nslc,
        #[serde(with = "time_format")]
        tmin: f64,
    },
    Span {
        nslc: Nslc,
        #[serde(with = "time_format")]
        tmin: f64,
        #[serde(with = "time_format")]
        tmax: f64,
        label: String,
    },
}

impl Marker {
    pub fn event(event: &Event) -> Self {
        Marker::Event {
            event: event.clone(),
        }
    }

    pub fn phase(nslc: Nslc, tmin: f64, phase: &str, event: Option<&Event>) -> Self {
        Marker::Phase {
            nslc,
            tmin,
            phase: phase.to_string(),
            event_hash: event.map(Event::content_hash),
        }
    }

    pub fn tmin(&self) -> f64 {
        match self {
            Marker::Event { event } => event.time,
            Marker::Phase { tmin, .. } | Marker::Clip { tmin, .. } | Marker::Span { tmin, .. } => {
                *tmin
            }
        }
    }
}

pub fn load_markers(path: &Path) -> Result<Vec<Marker>, DatasetError> {
    log::debug!("Loading markers from file {}", path.display());
    load_yaml(path)
}

pub fn dump_markers(markers: &[Marker], path: &Path) -> Result<(), DatasetError> {
    dump_yaml(markers, path)
}
