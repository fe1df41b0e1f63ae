//! Instrument transfer functions and the per-channel response table.

use std::f64::consts::PI;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::codes::Nslc;
use crate::model::{opt_time_format, time_format, Quantity};

fn one() -> Complex64 {
    Complex64::new(1.0, 0.0)
}

/// One factor of a composed transfer function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseStage {
    /// Laplace-domain poles and zeros, in rad/s.
    PoleZero {
        #[serde(default = "one")]
        constant: Complex64,
        #[serde(default)]
        zeros: Vec<Complex64>,
        #[serde(default)]
        poles: Vec<Complex64>,
    },
    /// Makes the restituted output the `order`-th time derivative of the
    /// quantity the preceding stages take as input. Negative orders
    /// integrate. Evaluates to `(2 pi i f)^-order`.
    Differentiation { order: i32 },
    Gain { gain: f64 },
}

impl ResponseStage {
    pub fn evaluate(&self, freq: f64) -> Complex64 {
        let s = Complex64::new(0.0, 2.0 * PI * freq);
        match self {
            ResponseStage::PoleZero {
                constant,
                zeros,
                poles,
            } => {
                let num: Complex64 = zeros.iter().map(|z| s - z).product();
                let den: Complex64 = poles.iter().map(|p| s - p).product();
                constant * num / den
            }
            ResponseStage::Differentiation { order } => s.powi(-*order),
            ResponseStage::Gain { gain } => Complex64::new(*gain, 0.0),
        }
    }
}

/// Ordered product of response stages.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Response {
    pub stages: Vec<ResponseStage>,
}

impl Response {
    pub fn new(stages: Vec<ResponseStage>) -> Self {
        Self { stages }
    }

    /// Append a stage, returning the composed response.
    pub fn then(mut self, stage: ResponseStage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Convert a response taking `input` as ground motion into one whose
    /// restitution yields `output`.
    pub fn converted(&self, input: Quantity, output: Quantity) -> Self {
        let order = output.order() as i32 - input.order() as i32;
        if order == 0 {
            self.clone()
        } else {
            self.clone()
                .then(ResponseStage::Differentiation { order })
        }
    }

    /// Displacement response composed for restitution to `quantity`.
    pub fn for_quantity(&self, quantity: Quantity) -> Self {
        self.converted(Quantity::Displacement, quantity)
    }

    pub fn evaluate(&self, freq: f64) -> Complex64 {
        self.stages.iter().map(|s| s.evaluate(freq)).product()
    }
}

/// A displacement response valid for one channel over a time span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEntry {
    pub codes: Nslc,
    #[serde(with = "time_format")]
    pub tmin: f64,
    #[serde(default, with = "opt_time_format")]
    pub tmax: Option<f64>,
    pub response: Response,
}

impl ResponseEntry {
    /// Whether the entry's validity strictly encloses `[tmin, tmax]`.
    pub fn encloses(&self, tmin: f64, tmax: f64) -> bool {
        self.tmin < tmin && self.tmax.map_or(true, |t| tmax < t)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResponseTable {
    entries: Vec<ResponseEntry>,
}

impl ResponseTable {
    pub fn extend(&mut self, entries: impl IntoIterator<Item = ResponseEntry>) {
        self.entries.extend(entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every entry enclosing the span under any of the fallback keys of
    /// `nslc`, composed for `quantity`.
    pub fn candidates(
        &self,
        nslc: &Nslc,
        tmin: f64,
        tmax: f64,
        quantity: Quantity,
    ) -> Vec<Response> {
        nslc.fallback_keys()
            .iter()
            .flat_map(|key| {
                self.entries
                    .iter()
                    .filter(move |e| e.codes == *key && e.encloses(tmin, tmax))
            })
            .map(|e| e.response.for_quantity(quantity))
            .collect()
    }
}
