//! Feature measures evaluated per event and station, and the Green's
//! function store collaborator they consult for phase arrivals.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codes::{Nslc, ObjectRef};
use crate::dataset::{Dataset, WaveformRequest};
use crate::error::{EngineError, MeasureError};
use crate::files::load_yaml;
use crate::markers::Marker;
use crate::model::{Event, Location, Quantity, Station};
use crate::trace::Trace;

/// Earthquake origin as seen by the measures.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub name: String,
    pub time: f64,
    pub lat: f64,
    pub lon: f64,
    pub depth: f64,
    pub magnitude: Option<f64>,
}

impl Source {
    pub fn location(&self) -> Location {
        Location::new(self.lat, self.lon)
    }
}

impl From<&Event> for Source {
    fn from(ev: &Event) -> Self {
        Self {
            name: ev.name.clone(),
            time: ev.time,
            lat: ev.lat,
            lon: ev.lon,
            depth: ev.depth,
            magnitude: ev.magnitude,
        }
    }
}

/// One recorded component at a receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub codes: Nslc,
    pub quantity: Quantity,
    pub store_id: String,
    pub lat: f64,
    pub lon: f64,
    pub depth: f64,
    pub elevation: f64,
}

impl Target {
    pub fn at_station(
        station: &Station,
        channel: &str,
        quantity: Quantity,
        store_id: &str,
    ) -> Self {
        Self {
            codes: station.nsl().with_channel(channel),
            quantity,
            store_id: store_id.to_string(),
            lat: station.lat,
            lon: station.lon,
            depth: station.depth,
            elevation: station.elevation,
        }
    }

    pub fn location(&self) -> Location {
        Location::new(self.lat, self.lon)
    }

    /// Straight-line source to receiver distance, meters.
    pub fn distance_to(&self, source: &Source) -> f64 {
        let surface = source.location().distance_to(&self.location());
        let dz = source.depth - (self.depth - self.elevation);
        surface.hypot(dz)
    }
}

pub trait Engine {
    /// Travel time of `phase` from `source` to `target` in the store
    /// `store_id`, seconds.
    fn traveltime(
        &self,
        store_id: &str,
        phase: &str,
        source: &Source,
        target: &Target,
    ) -> Result<f64, EngineError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PhaseDefinition {
    id: String,
    /// Apparent velocity, m/s.
    velocity: f64,
    #[serde(default)]
    distance_min: f64,
    #[serde(default)]
    distance_max: Option<f64>,
}

/// Green's function stores on the local file system.
///
/// A store is a directory named by its id, either listed directly or
/// found under one of the super directories. Phases are defined in the
/// store's `phases.yaml`.
#[derive(Debug, Clone, Default)]
pub struct LocalEngine {
    superdirs: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl LocalEngine {
    pub fn new(superdirs: Vec<PathBuf>, dirs: Vec<PathBuf>) -> Self {
        Self { superdirs, dirs }
    }

    pub fn store_dir(&self, store_id: &str) -> Result<PathBuf, EngineError> {
        let direct = self
            .dirs
            .iter()
            .find(|d| d.is_dir() && d.file_name().is_some_and(|n| n == store_id));
        if let Some(dir) = direct {
            return Ok(dir.clone());
        }
        self.superdirs
            .iter()
            .map(|d| d.join(store_id))
            .find(|d| d.is_dir())
            .ok_or_else(|| EngineError::StoreNotFound(store_id.to_string()))
    }
}

impl Engine for LocalEngine {
    fn traveltime(
        &self,
        store_id: &str,
        phase: &str,
        source: &Source,
        target: &Target,
    ) -> Result<f64, EngineError> {
        let path = self.store_dir(store_id)?.join("phases.yaml");
        let phases: Vec<PhaseDefinition> =
            load_yaml(&path).map_err(|e| EngineError::Unavailable(e.to_string()))?;
        let def = phases.iter().find(|p| p.id == phase).ok_or_else(|| {
            EngineError::Unavailable(format!("phase {phase} not defined in store {store_id}"))
        })?;
        let distance = target.distance_to(source);
        if distance < def.distance_min || def.distance_max.is_some_and(|dmax| distance > dmax) {
            return Err(EngineError::OutOfBounds(target.codes.to_string()));
        }
        Ok(distance / def.velocity)
    }
}

/// Where a measurement window starts or ends.
#[derive(Debug, Clone, PartialEq)]
pub enum TimingKind {
    /// Origin time plus distance over an apparent velocity in km/s.
    Velocity(f64),
    /// A picked phase of the event at the station.
    Pick(String),
    /// A phase arrival from the Green's function store.
    Stored(String),
}

/// Window bound written as `vel:8`, `pick:P-2` or `stored:S+10`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timing {
    pub kind: TimingKind,
    pub offset: f64,
}

impl FromStr for Timing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (prefix, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid timing \"{s}\""))?;
        let sign = rest
            .char_indices()
            .rev()
            .find(|&(i, c)| i > 0 && (c == '+' || c == '-'));
        let (body, offset) = match sign {
            Some((i, _)) if !rest[..i].ends_with(['e', 'E']) => {
                let offset = rest[i..]
                    .parse::<f64>()
                    .map_err(|_| format!("invalid timing offset in \"{s}\""))?;
                (&rest[..i], offset)
            }
            _ => (rest, 0.0),
        };
        let kind = match prefix {
            "vel" => {
                let v = body
                    .parse::<f64>()
                    .map_err(|_| format!("invalid velocity in timing \"{s}\""))?;
                if v <= 0.0 {
                    return Err(format!("velocity must be positive in timing \"{s}\""));
                }
                TimingKind::Velocity(v)
            }
            "pick" if !body.is_empty() => TimingKind::Pick(body.to_string()),
            "stored" if !body.is_empty() => TimingKind::Stored(body.to_string()),
            _ => return Err(format!("invalid timing \"{s}\"")),
        };
        Ok(Timing { kind, offset })
    }
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TimingKind::Velocity(v) => write!(f, "vel:{v}")?,
            TimingKind::Pick(phase) => write!(f, "pick:{phase}")?,
            TimingKind::Stored(phase) => write!(f, "stored:{phase}")?,
        }
        if self.offset != 0.0 {
            write!(f, "{:+}", self.offset)?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Timing {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Timing> for String {
    fn from(t: Timing) -> Self {
        t.to_string()
    }
}

impl Timing {
    /// Absolute time of this bound for one target.
    pub fn evaluate(
        &self,
        engine: &dyn Engine,
        source: &Source,
        target: &Target,
        dataset: &Dataset,
    ) -> Result<f64, MeasureError> {
        let t = match &self.kind {
            TimingKind::Velocity(v) => {
                source.time + source.location().distance_to(&target.location()) / (v * 1000.0)
            }
            TimingKind::Pick(phase) => {
                let nsl = target.codes.nsl();
                dataset
                    .get_pick(&source.name, ObjectRef::Nsl(&nsl), phase)
                    .map(|pick| pick.time)
                    .ok_or_else(|| {
                        let msg = format!("no {phase} pick for {} at {nsl}", source.name);
                        MeasureError::Failed(msg)
                    })?
            }
            TimingKind::Stored(phase) => {
                source.time + engine.traveltime(&target.store_id, phase, source, target)?
            }
        };
        Ok(t + self.offset)
    }
}

/// Intermediate traces and windows of one evaluation.
#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    pub traces: Vec<Trace>,
    pub markers: Vec<Marker>,
}

impl DebugInfo {
    pub fn extend(&mut self, other: DebugInfo) {
        self.traces.extend(other.traces);
        self.markers.extend(other.markers);
    }
}

pub trait FeatureMeasure {
    fn name(&self) -> &str;

    /// Channel codes of the targets handed to [`FeatureMeasure::evaluate`].
    fn components(&self) -> &[String];

    fn quantity(&self) -> Quantity;

    fn evaluate(
        &self,
        engine: &dyn Engine,
        source: &Source,
        targets: &[Target],
        dataset: &mut Dataset,
        debug: bool,
    ) -> Result<(f64, DebugInfo), MeasureError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaximumMethod {
    /// Largest absolute sample over all components.
    #[default]
    PeakComponent,
    /// Largest norm of the component vector.
    PeakVector,
}

fn default_components() -> Vec<String> {
    vec!["N".to_string(), "E".to_string()]
}

fn default_quantity() -> Quantity {
    Quantity::Velocity
}

/// Peak amplitude within a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmplitudeMeasure {
    pub name: String,
    #[serde(default = "default_components")]
    pub components: Vec<String>,
    #[serde(default = "default_quantity")]
    pub quantity: Quantity,
    pub timing_tmin: Timing,
    pub timing_tmax: Timing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fmin: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fmax: Option<f64>,
    /// Taper length at both ends of the restitution window, seconds.
    #[serde(default)]
    pub tfade: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deltat: Option<f64>,
    #[serde(default)]
    pub maximum_method: MaximumMethod,
}

impl AmplitudeMeasure {
    /// Pass band with octave-wide roll-offs outside `fmin` and `fmax`.
    pub fn freqlimits(&self) -> Option<[f64; 4]> {
        match (self.fmin, self.fmax) {
            (None, None) => None,
            (fmin, fmax) => {
                let (f1, f2) =
                    fmin.map_or((f64::NEG_INFINITY, f64::NEG_INFINITY), |f| (0.5 * f, f));
                let (f3, f4) = fmax.map_or((f64::INFINITY, f64::INFINITY), |f| (f, 2.0 * f));
                Some([f1, f2, f3, f4])
            }
        }
    }

    fn request(&self, source: &Source, target: &Target, tmin: f64, tmax: f64) -> WaveformRequest {
        WaveformRequest {
            tfade: self.tfade,
            freqlimits: self.freqlimits(),
            deltat: self.deltat,
            geometry: Some((source.location(), target.location())),
            ..WaveformRequest::new(self.quantity).window(tmin, tmax)
        }
    }
}

/// Largest norm of the sample vectors over the common time span.
fn peak_vector(traces: &[Trace]) -> Result<f64, MeasureError> {
    let Some(first) = traces.first() else {
        return Err(MeasureError::Failed("no traces".to_string()));
    };
    let deltat = first.deltat;
    if traces.iter().any(|tr| (tr.deltat - deltat).abs() > deltat * 1e-6) {
        return Err(MeasureError::Failed("components differ in sampling".to_string()));
    }
    let tmin = traces.iter().map(|tr| tr.tmin).fold(f64::NEG_INFINITY, f64::max);
    let tmax = traces.iter().map(|tr| tr.tmax()).fold(f64::INFINITY, f64::min);
    if tmax < tmin {
        return Err(MeasureError::Failed("components do not overlap".to_string()));
    }
    let n = ((tmax - tmin) / deltat).round() as usize + 1;
    let offsets: Vec<usize> = traces
        .iter()
        .map(|tr| ((tmin - tr.tmin) / deltat).round() as usize)
        .collect();
    let peak = (0..n)
        .map(|i| {
            traces
                .iter()
                .zip(&offsets)
                .filter_map(|(tr, off)| tr.ydata.get(off + i))
                .map(|y| y * y)
                .sum::<f64>()
                .sqrt()
        })
        .fold(0.0, f64::max);
    Ok(peak)
}

impl FeatureMeasure for AmplitudeMeasure {
    fn name(&self) -> &str {
        &self.name
    }

    fn components(&self) -> &[String] {
        &self.components
    }

    fn quantity(&self) -> Quantity {
        self.quantity
    }

    fn evaluate(
        &self,
        engine: &dyn Engine,
        source: &Source,
        targets: &[Target],
        dataset: &mut Dataset,
        debug: bool,
    ) -> Result<(f64, DebugInfo), MeasureError> {
        let mut info = DebugInfo::default();
        let mut traces = Vec::with_capacity(targets.len());
        for target in targets {
            let tmin = self.timing_tmin.evaluate(engine, source, target, dataset)?;
            let tmax = self.timing_tmax.evaluate(engine, source, target, dataset)?;
            if tmax <= tmin {
                return Err(MeasureError::Failed(format!(
                    "empty window for {} at {}",
                    self.name, target.codes
                )));
            }
            let req = self.request(source, target, tmin, tmax);
            let obj = ObjectRef::Nslc(&target.codes);
            traces.push(dataset.get_waveform(obj, &req.clone().cached())?);

            if debug {
                let steps = dataset.get_waveform_debug(obj, &req)?;
                info.traces.extend(steps.raw);
                info.traces.extend(steps.restituted);
                info.traces.extend(steps.projected);
                info.markers.push(Marker::Span {
                    nslc: target.codes.clone(),
                    tmin,
                    tmax,
                    label: self.name.clone(),
                });
            }
        }

        let value = match self.maximum_method {
            MaximumMethod::PeakComponent => traces
                .iter()
                .filter(|tr| !tr.is_empty())
                .map(Trace::absmax)
                .reduce(f64::max)
                .ok_or_else(|| MeasureError::Failed(format!("no samples for {}", self.name)))?,
            MaximumMethod::PeakVector => peak_vector(&traces)?,
        };
        log::debug!("{} for {}: {}", self.name, source.name, value);
        Ok((value, info))
    }
}

/// Measure entry of the run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MeasureConfig {
    Amplitude(AmplitudeMeasure),
}

impl MeasureConfig {
    pub fn measure(&self) -> &dyn FeatureMeasure {
        match self {
            MeasureConfig::Amplitude(m) => m,
        }
    }

    pub fn name(&self) -> &str {
        self.measure().name()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn source() -> Source {
        Source {
            name: "ev".to_string(),
            time: 1000.0,
            lat: 0.0,
            lon: 0.0,
            depth: 0.0,
            magnitude: Some(3.0),
        }
    }

    fn target(lat: f64) -> Target {
        Target {
            codes: Nslc::new("XX", "STA", "", "Z"),
            quantity: Quantity::Velocity,
            store_id: "store".to_string(),
            lat,
            lon: 0.0,
            depth: 0.0,
            elevation: 0.0,
        }
    }

    #[test]
    fn parse_timings() {
        let t: Timing = "vel:8".parse().unwrap();
        assert_eq!(t.kind, TimingKind::Velocity(8.0));
        assert_eq!(t.offset, 0.0);

        let t: Timing = "pick:P-2.5".parse().unwrap();
        assert_eq!(t.kind, TimingKind::Pick("P".to_string()));
        assert_eq!(t.offset, -2.5);
        assert_eq!(t.to_string(), "pick:P-2.5");

        let t: Timing = "stored:S+10".parse().unwrap();
        assert_eq!(t.kind, TimingKind::Stored("S".to_string()));
        assert_eq!(t.to_string(), "stored:S+10");

        assert!("vel:-3".parse::<Timing>().is_err());
        assert!("P".parse::<Timing>().is_err());
        assert!("pick:".parse::<Timing>().is_err());
    }

    #[test]
    fn velocity_timing() {
        let ds = Dataset::new(Some("ev"));
        let engine = LocalEngine::default();
        let t: Timing = "vel:2+1".parse().unwrap();
        let target = target(1.0);
        let dist = source().location().distance_to(&target.location());
        let tt = t.evaluate(&engine, &source(), &target, &ds).unwrap();
        assert!((tt - (1000.0 + dist / 2000.0 + 1.0)).abs() < 1e-9);

        let t: Timing = "pick:P".parse().unwrap();
        assert!(matches!(
            t.evaluate(&engine, &source(), &target, &ds),
            Err(MeasureError::Failed(_))
        ));
    }

    #[test]
    fn stored_timing() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("crust");
        std::fs::create_dir_all(&store).unwrap();
        std::fs::write(
            store.join("phases.yaml"),
            "- {id: P, velocity: 6000.0, distance_max: 200000.0}\n",
        )
        .unwrap();
        let engine = LocalEngine::new(vec![dir.path().to_path_buf()], vec![]);
        let ds = Dataset::new(None);

        let t: Timing = "stored:P".parse().unwrap();
        let mut near = target(0.5);
        near.store_id = "crust".to_string();
        let tt = t.evaluate(&engine, &source(), &near, &ds).unwrap();
        assert!((tt - 1000.0 - near.distance_to(&source()) / 6000.0).abs() < 1e-9);

        let mut far = target(5.0);
        far.store_id = "crust".to_string();
        assert!(matches!(
            t.evaluate(&engine, &source(), &far, &ds),
            Err(MeasureError::Engine(EngineError::OutOfBounds(_)))
        ));
        assert!(matches!(
            t.evaluate(&engine, &source(), &target(0.5), &ds),
            Err(MeasureError::Engine(EngineError::StoreNotFound(_)))
        ));
    }

    #[test]
    fn vector_peak() {
        let nslc = Nslc::new("XX", "STA", "", "N");
        let n = Trace::new(nslc.clone(), 10.0, 1.0, vec![0.0, 3.0, 0.0, 0.0]);
        let e = Trace::new(nslc, 11.0, 1.0, vec![4.0, 1.0, 1.0]);
        assert_eq!(peak_vector(&[n, e]).unwrap(), 5.0);
    }

    #[test]
    fn measure_config_yaml() {
        let yaml = "
type: amplitude
name: ml
components: [Z]
timing_tmin: vel:8
timing_tmax: vel:2+5
fmin: 0.5
maximum_method: peak_vector
";
        let m: MeasureConfig = serde_yaml::from_str(yaml).unwrap();
        let MeasureConfig::Amplitude(amp) = &m;
        assert_eq!(m.name(), "ml");
        assert_eq!(amp.quantity, Quantity::Velocity);
        assert_eq!(amp.maximum_method, MaximumMethod::PeakVector);
        assert_eq!(
            amp.freqlimits(),
            Some([0.25, 0.5, f64::INFINITY, f64::INFINITY])
        );
        let text = serde_yaml::to_string(&m).unwrap();
        let back: MeasureConfig = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, m);
    }
}
