use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codes::Nslc;
use crate::error::DatasetError;
use crate::files::{dump_yaml, load_yaml};

/// Empirical per-channel timing and amplitude correction.
///
/// Corrected traces are divided by `factor` and shifted by `-delay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationCorrection {
    pub codes: Nslc,
    pub delay: f64,
    pub factor: f64,
}

pub fn load_station_corrections(path: &Path) -> Result<Vec<StationCorrection>, DatasetError> {
    log::debug!("Loading station corrections from file {}", path.display());
    load_yaml(path)
}

pub fn dump_station_corrections(
    corrections: &[StationCorrection],
    path: &Path,
) -> Result<(), DatasetError> {
    dump_yaml(corrections, path)
}
