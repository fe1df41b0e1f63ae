//! Synthetic dataset on disk: two three-component stations north and east
//! of one event, continuous data and flat instrument responses.

#![allow(dead_code)]

use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use std::thread::{self, ThreadId};

use log::Log;
use tempfile::TempDir;
use wafe::files::dump_yaml;
use wafe::model::{Channel, Event, Station};
use wafe::mseed::write_traces;
use wafe::response::{Response, ResponseEntry, ResponseStage};
use wafe::{Nsl, Nslc, Trace};

/// 2020-01-01T00:00:00Z
pub const T0: f64 = 1_577_836_800.0;
pub const DELTAT: f64 = 0.05;
pub const CHANNELS: [&str; 3] = ["HHE", "HHN", "HHZ"];

static WARNINGS: Mutex<Vec<(ThreadId, String)>> = Mutex::new(Vec::new());

/// env_logger output plus a record of warnings per test thread.
struct TestLogger {
    inner: env_logger::Logger,
}

impl Log for TestLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Warn || self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if record.level() <= log::Level::Warn {
            if let Ok(mut warnings) = WARNINGS.lock() {
                warnings.push((thread::current().id(), record.args().to_string()));
            }
        }
        self.inner.log(record);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

pub fn init_logger() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let inner = env_logger::builder()
            .filter_level(log::LevelFilter::Trace)
            .is_test(true)
            .build();
        if log::set_logger(Box::leak(Box::new(TestLogger { inner }))).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
        }
    });
}

/// Warnings logged so far by the calling test.
pub fn warnings() -> Vec<String> {
    let id = thread::current().id();
    WARNINGS
        .lock()
        .unwrap()
        .iter()
        .filter(|(tid, _)| *tid == id)
        .map(|(_, msg)| msg.clone())
        .collect()
}

pub fn event() -> Event {
    Event {
        name: "ev1".to_string(),
        time: T0,
        lat: 0.0,
        lon: 0.0,
        depth: 10_000.0,
        magnitude: Some(3.5),
    }
}

pub fn stations() -> Vec<Station> {
    [("STA1", 0.5, 0.0), ("STA2", 0.0, 1.0)]
        .into_iter()
        .map(|(sta, lat, lon)| {
            let mut station = Station::new(&Nsl::new("XX", sta, ""), lat, lon);
            station.channels = vec![
                Channel::new("HHE", 90.0, 0.0),
                Channel::new("HHN", 0.0, 0.0),
                Channel::new("HHZ", 0.0, -90.0),
            ];
            station
        })
        .collect()
}

/// Flat response with `gain` counts per meter.
pub fn response_entry(nslc: Nslc, gain: f64) -> ResponseEntry {
    ResponseEntry {
        codes: nslc,
        tmin: T0 - 86_400.0,
        tmax: None,
        response: Response::new(vec![ResponseStage::Gain { gain }]),
    }
}

/// Table entries for all channels of all stations except `skip`.
pub fn responses(skip: &[&str]) -> Vec<ResponseEntry> {
    stations()
        .iter()
        .filter(|s| !skip.contains(&s.station.as_str()))
        .flat_map(|s| {
            CHANNELS
                .iter()
                .map(|cha| response_entry(s.nsl().with_channel(cha), 1000.0))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Sinusoid sampled on `[tmin, tmax]`.
pub fn trace(nslc: Nslc, tmin: f64, tmax: f64, freq: f64) -> Trace {
    let n = ((tmax - tmin) / DELTAT).round() as usize + 1;
    let ydata = (0..n)
        .map(|i| 1000.0 * (2.0 * PI * freq * (tmin + i as f64 * DELTAT - T0)).sin())
        .collect();
    Trace::new(nslc, tmin, DELTAT, ydata)
}

pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    /// Stations, event and responses as YAML and 400 s of data per channel,
    /// without responses for the stations in `skip_responses`.
    pub fn new(skip_responses: &[&str]) -> Self {
        init_logger();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        dump_yaml(&stations(), &root.join("meta/stations.yaml")).unwrap();
        dump_yaml(&vec![event()], &root.join("events/ev1.yaml")).unwrap();
        dump_yaml(&responses(skip_responses), &root.join("meta/responses.yaml")).unwrap();

        for station in stations() {
            let traces: Vec<Trace> = CHANNELS
                .iter()
                .enumerate()
                .map(|(i, cha)| {
                    trace(
                        station.nsl().with_channel(cha),
                        T0 - 100.0,
                        T0 + 300.0,
                        0.5 + 0.25 * i as f64,
                    )
                })
                .collect();
            write_traces(
                root.join(format!("data/ev1/{}.mseed", station.station)),
                &traces,
            )
            .unwrap();
        }
        Self { dir }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Write a run configuration with `extra` appended to the dataset
    /// section and return its path.
    pub fn write_config(&self, extra: &str) -> PathBuf {
        let text = format!(
            "\
dataset_config:
  stations_path: meta/stations.yaml
  events_path: events/${{event_name}}.yaml
  waveform_paths: ['data/${{event_name}}']
  responses_table_path: meta/responses.yaml
{extra}
measures:
  - type: amplitude
    name: pgv_h
    components: [N, E]
    quantity: velocity
    timing_tmin: vel:8
    timing_tmax: vel:2
    tfade: 2.0
  - type: amplitude
    name: pgd_z
    components: [Z]
    quantity: displacement
    timing_tmin: vel:8-1
    timing_tmax: vel:2+1
    fmin: 0.1
    fmax: 5.0
    tfade: 2.0
store_id: crust2_m5
output_path: results/${{config_name}}
"
        );
        let path = self.path("run.yaml");
        fs::write(&path, text).unwrap();
        path
    }
}

/// Data lines of a `measures.txt` file.
pub fn data_rows(path: &Path) -> Vec<Vec<String>> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.starts_with('#') && !l.trim().is_empty())
        .map(|l| l.split_whitespace().map(str::to_string).collect())
        .collect()
}
