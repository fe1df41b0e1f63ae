//! Error taxonomy of the dataset layer and the extraction driver.
//!
//! Everything that makes a single (event, station) pair unusable is a
//! [`NotFound`] carrying a closed [`Reason`]. Load-time and I/O problems are
//! [`DatasetError`]s, which abort the run.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::time_to_str;

/// Why a station, response or waveform could not be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    /// The object (station, response or waveform) is on the blacklist.
    Blacklisted(&'static str),
    /// A whitelist is active and the object is not on it.
    NotWhitelisted(&'static str),
    NoStation,
    /// No response source has been configured at all.
    NoResponseInformation,
    NoResponse,
    AmbiguousResponse,
    WaveformMissing,
    WaveformGapped,
    WaveformClipped,
    NoProjection,
    WaveformNotAvailable,
    ResampleFailed,
    NoEvent,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Blacklisted(what) => write!(f, "{what} is blacklisted"),
            Reason::NotWhitelisted(what) => write!(f, "{what} is not on whitelist"),
            Reason::NoStation => write!(f, "no station information"),
            Reason::NoResponseInformation => write!(f, "no response information available"),
            Reason::NoResponse => write!(f, "no response found"),
            Reason::AmbiguousResponse => write!(f, "multiple responses found"),
            Reason::WaveformMissing => write!(f, "waveform missing or incomplete"),
            Reason::WaveformGapped => write!(f, "waveform has gaps"),
            Reason::WaveformClipped => write!(f, "waveform clipped"),
            Reason::NoProjection => write!(f, "cannot determine projection of data components"),
            Reason::WaveformNotAvailable => write!(f, "waveform not available"),
            Reason::ResampleFailed => write!(f, "cannot resample waveform"),
            Reason::NoEvent => write!(f, "no event information"),
        }
    }
}

/// A typed "not found / not usable" condition.
///
/// `Clone` so that the waveform cache can hand out the same failure again.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct NotFound {
    pub reason: Reason,
    pub codes: Option<String>,
    pub time_range: Option<(f64, f64)>,
    pub detail: Option<String>,
}

impl NotFound {
    pub fn new(reason: Reason) -> Self {
        Self {
            reason,
            codes: None,
            time_range: None,
            detail: None,
        }
    }

    pub fn codes(mut self, codes: impl fmt::Display) -> Self {
        self.codes = Some(codes.to_string());
        self
    }

    pub fn time_range(mut self, tmin: f64, tmax: f64) -> Self {
        self.time_range = Some((tmin, tmax));
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        if let Some(codes) = &self.codes {
            write!(f, " ({codes})")?;
        }
        if let Some((tmin, tmax)) = self.time_range {
            write!(f, " ({} - {})", time_to_str(tmin), time_to_str(tmax))?;
        }
        Ok(())
    }
}

/// The object handed in cannot provide the requested representation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot get {wanted} from object of type {kind}")]
pub struct InvalidObject {
    pub wanted: &'static str,
    pub kind: &'static str,
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error(transparent)]
    NotFound(#[from] NotFound),

    #[error(transparent)]
    InvalidObject(#[from] InvalidObject),

    #[error("duplicate event name \"{0}\" in picks")]
    DuplicateEventName(String),

    #[error("duplicate pick {0}")]
    DuplicatePick(String),

    #[error("unassociated pick {0}")]
    UnassociatedPick(String),

    #[error("invalid code list entry \"{0}\"")]
    InvalidCodes(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl DatasetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DatasetError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        DatasetError::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// The not-found condition, if this is one.
    pub fn not_found(&self) -> Option<&NotFound> {
        match self {
            DatasetError::NotFound(e) => Some(e),
            _ => None,
        }
    }
}

/// Trace-level processing failures, mapped to [`NotFound`] by the dataset.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TraceError {
    #[error("no data in requested time span")]
    NoData,

    #[error("trace too short ({nsamples} samples) for {nfade} fade samples at each end")]
    TooShort { nsamples: usize, nfade: usize },

    #[error("cannot resample from {from} s to {to} s")]
    Resample { from: f64, to: f64 },

    #[error("traces to be combined have different sample intervals")]
    SamplingMismatch,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("failed to write config {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failures of the synthetic-seismogram collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("no Green's function store with id \"{0}\"")]
    StoreNotFound(String),

    #[error("target {0} is out of the bounds of the Green's function store")]
    OutOfBounds(String),

    #[error("synthesis not available: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum MeasureError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("feature measurement failed: {0}")]
    Failed(String),
}

impl From<NotFound> for MeasureError {
    fn from(e: NotFound) -> Self {
        MeasureError::Dataset(e.into())
    }
}

/// Run-level errors; any of these ends the program with a non-zero status.
#[derive(Debug, Error)]
pub enum WafeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Measure(#[from] MeasureError),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid results file {path}: {message}")]
    Results { path: PathBuf, message: String },

    #[error("debug output failed: {0}")]
    Debug(String),
}

impl WafeError {
    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        WafeError::Write {
            path: path.into(),
            source,
        }
    }
}
