#![deny(unsafe_code)]
#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

pub mod cache;
pub mod catalog;
pub mod codes;
pub mod config;
pub mod corrections;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod files;
pub mod markers;
pub mod measure;
pub mod model;
pub mod mseed;
pub mod plot;
pub mod projection;
pub mod response;
pub mod signal;
pub mod store;
pub mod trace;

pub use codes::{Nsl, Nslc, ObjectRef};
pub use config::{read_config, write_config, Config, DatasetConfig, DatasetProvider};
pub use dataset::{ClipHandling, Dataset, RawRequest, WaveformRequest};
pub use error::{
    ConfigError, DatasetError, EngineError, MeasureError, NotFound, Reason, WafeError,
};
pub use extract::run_extract;
pub use measure::{Engine, FeatureMeasure, LocalEngine};
pub use model::{Event, Quantity, Station};
pub use plot::{run_plot, PlotFormat};
pub use trace::Trace;
