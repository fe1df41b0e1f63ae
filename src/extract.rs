//! The extraction run: every configured measure for every event and
//! eligible station, written to `measures.txt`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::config::{write_config, Config};
use crate::dataset::Dataset;
use crate::error::{DatasetError, EngineError, MeasureError, WafeError};
use crate::markers::{dump_markers, Marker};
use crate::measure::{DebugInfo, Engine, Source, Target};
use crate::model::{Event, Station};
use crate::mseed::write_traces;

pub const MEASURES_FILE: &str = "measures.txt";
pub const CONFIG_FILE: &str = "config.yaml";

/// `printf("%g")`-style rendering: six significant digits, trailing zeros
/// removed, exponent form outside `1e-4 ..= 1e6`.
pub fn format_g(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if v == 0.0 {
        return "0".to_string();
    }
    let sci = format!("{v:.5e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    if !(-4..6).contains(&exp) {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_zeros(mantissa), sign, exp.abs())
    } else {
        trim_zeros(&format!("{:.*}", (5 - exp) as usize, v)).to_string()
    }
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Failures that cost one row, as opposed to ones that end the run.
fn is_measurement_failure(e: &MeasureError) -> bool {
    matches!(
        e,
        MeasureError::Dataset(DatasetError::NotFound(_))
            | MeasureError::Failed(_)
            | MeasureError::Engine(EngineError::OutOfBounds(_))
    )
}

/// Values of all measures at one station, `None` where a measure failed.
fn measure_station(
    config: &Config,
    engine: &dyn Engine,
    source: &Source,
    station: &Station,
    dataset: &mut Dataset,
    debug: Option<&mut DebugInfo>,
) -> Result<Vec<Option<f64>>, WafeError> {
    let mut values = Vec::with_capacity(config.measures.len());
    let mut collected = DebugInfo::default();
    for measure in config.measures.iter().map(|m| m.measure()) {
        let targets: Vec<Target> = measure
            .components()
            .iter()
            .map(|c| Target::at_station(station, c, measure.quantity(), &config.store_id))
            .collect();
        match measure.evaluate(engine, source, &targets, dataset, debug.is_some()) {
            Ok((value, info)) => {
                values.push(Some(value));
                collected.extend(info);
            }
            Err(e) if is_measurement_failure(&e) => {
                log::warn!(
                    "feature extraction failed for {}, {}:\n   {}",
                    source.name,
                    station.nsl(),
                    e
                );
                values.push(None);
                if !config.partial_rows {
                    break;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    if let Some(debug) = debug {
        debug.extend(collected);
    }
    Ok(values)
}

fn write_debug(dir: &Path, event: &Event, mut info: DebugInfo) -> Result<(), WafeError> {
    write_traces(dir.join("traces.mseed"), &info.traces)
        .map_err(|e| WafeError::Debug(format!("{e:#}")))?;
    info.markers.insert(0, Marker::event(event));
    dump_markers(&info.markers, &dir.join("markers.yaml"))?;
    log::info!(
        "wrote {} debug traces for {} to {}",
        info.traces.len(),
        event.name,
        dir.display()
    );
    Ok(())
}

/// Run all measures of `config` and write the results to its output path.
///
/// In debug mode the intermediate traces and measurement windows are
/// written to `debug/<event>/` below the output path.
pub fn run_extract(config: &Config, engine: &dyn Engine, debug: bool) -> Result<(), WafeError> {
    let output_path = config.expand_path(&config.output_path);
    fs::create_dir_all(&output_path).map_err(|e| WafeError::write(&output_path, e))?;
    write_config(config, &output_path.join(CONFIG_FILE))?;

    let measures_path = output_path.join(MEASURES_FILE);
    let file = File::create(&measures_path).map_err(|e| WafeError::write(&measures_path, e))?;
    let mut out = BufWriter::new(file);
    let names: Vec<&str> = config.measures.iter().map(|m| m.name()).collect();
    writeln!(out, "# event station {}", names.join(" "))
        .map_err(|e| WafeError::write(&measures_path, e))?;

    let mut provider = config.dataset_provider();
    for event_name in provider.get_event_names()? {
        let dataset = provider.get_dataset(&event_name)?;
        let event = dataset.get_event().map_err(DatasetError::from)?.clone();
        let source = Source::from(&event);
        let stations: Vec<Station> = dataset.get_stations().into_iter().cloned().collect();
        log::info!("extracting features for {} at {} stations", event.name, stations.len());

        let mut debug_info = debug.then(DebugInfo::default);
        let mut nrows = 0;
        for station in &stations {
            let values = measure_station(
                config,
                engine,
                &source,
                station,
                dataset,
                debug_info.as_mut(),
            )?;
            let complete = values.len() == names.len() && values.iter().all(Option::is_some);
            if !complete && !config.partial_rows {
                continue;
            }
            let fields: Vec<String> = values
                .iter()
                .map(|v| format_g(v.unwrap_or(f64::NAN)))
                .collect();
            writeln!(out, "{} {} {}", event.name, station.nsl(), fields.join(" "))
                .map_err(|e| WafeError::write(&measures_path, e))?;
            nrows += 1;
        }
        log::info!("{}: {} of {} stations measured", event.name, nrows, stations.len());

        if let Some(info) = debug_info {
            write_debug(&output_path.join("debug").join(&event.name), &event, info)?;
        }
    }
    out.flush().map_err(|e| WafeError::write(&measures_path, e))
}
