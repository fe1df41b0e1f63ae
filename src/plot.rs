//! Binned medians of extraction results against distance and magnitude.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::codes::{Nsl, ObjectRef};
use crate::config::read_config;
use crate::error::{DatasetError, WafeError};
use crate::extract::{CONFIG_FILE, MEASURES_FILE};
use crate::trace::median;

/// Distance bins per decade.
const DISTANCE_BINS_PER_DECADE: f64 = 4.0;
const MAGNITUDE_BIN_WIDTH: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PlotFormat {
    Csv,
    Json,
}

impl fmt::Display for PlotFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlotFormat::Csv => "csv",
            PlotFormat::Json => "json",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Epicentral distance, km.
    Distance,
    Magnitude,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinnedMedian {
    pub axis: Axis,
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub median: f64,
}

/// One line of `measures.txt`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub event_name: String,
    pub station: Nsl,
    pub values: Vec<f64>,
}

/// Measure names and rows of a `measures.txt` file.
pub fn read_measures(path: &Path) -> Result<(Vec<String>, Vec<ResultRow>), WafeError> {
    let results_error = |message: String| WafeError::Results {
        path: path.to_path_buf(),
        message,
    };
    let text = fs::read_to_string(path).map_err(|e| DatasetError::io(path, e))?;
    let mut names: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    for (iline, line) in text.lines().enumerate() {
        let line = line.trim();
        if let Some(header) = line.strip_prefix('#') {
            if names.is_none() {
                names = Some(header.split_whitespace().skip(2).map(str::to_string).collect());
            }
            continue;
        }
        if line.is_empty() {
            continue;
        }
        let toks: Vec<&str> = line.split_whitespace().collect();
        let nnames = names.as_ref().map_or(0, Vec::len);
        if toks.len() != nnames + 2 {
            return Err(results_error(format!(
                "line {}: expected {} fields, found {}",
                iline + 1,
                nnames + 2,
                toks.len()
            )));
        }
        let station: Nsl = toks[1]
            .parse()
            .map_err(|e: DatasetError| results_error(format!("line {}: {e}", iline + 1)))?;
        let values = toks[2..]
            .iter()
            .map(|t| t.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| results_error(format!("line {}: {e}", iline + 1)))?;
        rows.push(ResultRow {
            event_name: toks[0].to_string(),
            station,
            values,
        });
    }
    let names = names.ok_or_else(|| results_error("missing header line".to_string()))?;
    Ok((names, rows))
}

fn binned_medians(
    axis: Axis,
    points: impl IntoIterator<Item = (f64, f64)>,
    bin_of: impl Fn(f64) -> Option<i64>,
    edges_of: impl Fn(i64) -> (f64, f64),
) -> Vec<BinnedMedian> {
    let mut bins: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for (x, value) in points {
        if !value.is_finite() {
            continue;
        }
        if let Some(k) = bin_of(x) {
            bins.entry(k).or_default().push(value);
        }
    }
    bins.into_iter()
        .map(|(k, values)| {
            let (lower, upper) = edges_of(k);
            BinnedMedian {
                axis,
                lower,
                upper,
                count: values.len(),
                median: median(&values),
            }
        })
        .collect()
}

/// Medians over log-spaced distance bins (km).
pub fn distance_medians(points: impl IntoIterator<Item = (f64, f64)>) -> Vec<BinnedMedian> {
    binned_medians(
        Axis::Distance,
        points,
        |d| {
            (d > 0.0 && d.is_finite())
                .then(|| (d.log10() * DISTANCE_BINS_PER_DECADE).floor() as i64)
        },
        |k| {
            (
                10f64.powf(k as f64 / DISTANCE_BINS_PER_DECADE),
                10f64.powf((k + 1) as f64 / DISTANCE_BINS_PER_DECADE),
            )
        },
    )
}

pub fn magnitude_medians(points: impl IntoIterator<Item = (f64, f64)>) -> Vec<BinnedMedian> {
    binned_medians(
        Axis::Magnitude,
        points,
        |m| m.is_finite().then(|| (m / MAGNITUDE_BIN_WIDTH).floor() as i64),
        |k| (k as f64 * MAGNITUDE_BIN_WIDTH, (k + 1) as f64 * MAGNITUDE_BIN_WIDTH),
    )
}

fn write_bins(path: &Path, format: PlotFormat, bins: &[BinnedMedian]) -> Result<(), WafeError> {
    let write_error = |message: String| WafeError::Results {
        path: path.to_path_buf(),
        message,
    };
    match format {
        PlotFormat::Csv => {
            let mut writer = csv::Writer::from_path(path).map_err(|e| write_error(e.to_string()))?;
            for bin in bins {
                writer.serialize(bin).map_err(|e| write_error(e.to_string()))?;
            }
            writer.flush().map_err(|e| WafeError::write(path, e))
        }
        PlotFormat::Json => {
            let text = serde_json::to_string_pretty(bins).map_err(|e| write_error(e.to_string()))?;
            fs::write(path, text).map_err(|e| WafeError::write(path, e))
        }
    }
}

/// Summarise the results in `results_dir`, one file per measure and
/// format under `plots/`. Returns the written paths.
pub fn run_plot(results_dir: &Path, formats: &[PlotFormat]) -> Result<Vec<PathBuf>, WafeError> {
    let config = read_config(&results_dir.join(CONFIG_FILE))?;
    let (names, rows) = read_measures(&results_dir.join(MEASURES_FILE))?;

    let mut provider = config.dataset_provider();
    // distance (km), magnitude and values per row
    let mut located: Vec<(f64, f64, &[f64])> = Vec::with_capacity(rows.len());
    for row in &rows {
        let dataset = provider.get_dataset(&row.event_name)?;
        let lookup = dataset.get_event().and_then(|event| {
            let station = dataset.get_station(ObjectRef::Nsl(&row.station))?;
            let distance = event.location().distance_to(&station.location()) / 1000.0;
            Ok((distance, event.magnitude.unwrap_or(f64::NAN)))
        });
        match lookup {
            Ok((distance, magnitude)) => located.push((distance, magnitude, &row.values)),
            Err(e) => log::warn!("skipping {} {}: {}", row.event_name, row.station, e),
        }
    }

    let plots_dir = results_dir.join("plots");
    fs::create_dir_all(&plots_dir).map_err(|e| WafeError::write(&plots_dir, e))?;
    let mut written = Vec::new();
    for (imeasure, name) in names.iter().enumerate() {
        let mut bins = distance_medians(located.iter().map(|(d, _, v)| (*d, v[imeasure])));
        bins.extend(magnitude_medians(located.iter().map(|(_, m, v)| (*m, v[imeasure]))));
        for format in formats {
            let path = plots_dir.join(format!("{name}.{format}"));
            write_bins(&path, *format, &bins)?;
            log::info!("wrote {}", path.display());
            written.push(path);
        }
    }
    Ok(written)
}
