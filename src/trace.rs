//! Evenly sampled time series for one channel.

use crate::codes::Nslc;
use crate::error::TraceError;

/// Relative tolerance used when comparing times to sample positions.
const SAMPLE_EPS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMethod {
    Zeros,
    Median,
    /// Repeat the first and last sample.
    Repeat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub codes: Nslc,
    /// Time of the first sample, seconds since the epoch.
    pub tmin: f64,
    /// Sample interval in seconds.
    pub deltat: f64,
    pub ydata: Vec<f64>,
}

impl Trace {
    pub fn new(codes: Nslc, tmin: f64, deltat: f64, ydata: Vec<f64>) -> Self {
        Self {
            codes,
            tmin,
            deltat,
            ydata,
        }
    }

    pub fn len(&self) -> usize {
        self.ydata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ydata.is_empty()
    }

    /// Time of the last sample.
    pub fn tmax(&self) -> f64 {
        self.tmin + (self.len().max(1) - 1) as f64 * self.deltat
    }

    pub fn channel(&self) -> &str {
        &self.codes.channel
    }

    pub fn shift(&mut self, dt: f64) {
        self.tmin += dt;
    }

    pub fn overlaps(&self, tmin: f64, tmax: f64) -> bool {
        self.tmin <= tmax && tmin <= self.tmax()
    }

    /// Whether the trace has a sample within one interval of both ends of
    /// `[tmin, tmax]`. Infinite bounds are always satisfied.
    pub fn covers(&self, tmin: f64, tmax: f64) -> bool {
        let tol = self.deltat * (1.0 - 1e-3);
        (!tmin.is_finite() || self.tmin - tmin < tol)
            && (!tmax.is_finite() || tmax - self.tmax() < tol)
    }

    /// Whether `other` starts with the sample following our last one.
    pub fn is_continued_by(&self, other: &Trace) -> bool {
        self.codes == other.codes
            && (self.deltat - other.deltat).abs() < self.deltat * SAMPLE_EPS
            && (other.tmin - (self.tmax() + self.deltat)).abs() < 0.5 * self.deltat
    }

    /// Append a continuation, dropping samples that overlap ours.
    pub fn append(&mut self, other: &Trace) {
        let next = self.tmax() + self.deltat;
        let skip = if other.tmin < next {
            (((next - other.tmin) / self.deltat) - SAMPLE_EPS).ceil().max(0.0) as usize
        } else {
            0
        };
        self.ydata.extend(other.ydata.iter().skip(skip));
    }

    /// Cut to the samples within `[tmin, tmax]`.
    pub fn chop(&mut self, tmin: f64, tmax: f64) -> Result<(), TraceError> {
        let n = self.len();
        let ibeg = if tmin.is_finite() {
            ((tmin - self.tmin) / self.deltat - SAMPLE_EPS).ceil().max(0.0) as usize
        } else {
            0
        };
        let iend = if tmax.is_finite() {
            let i = ((tmax - self.tmin) / self.deltat + SAMPLE_EPS).floor() + 1.0;
            (i.max(0.0) as usize).min(n)
        } else {
            n
        };
        if ibeg >= iend {
            return Err(TraceError::NoData);
        }
        self.ydata.truncate(iend);
        self.ydata.drain(..ibeg);
        self.tmin += ibeg as f64 * self.deltat;
        Ok(())
    }

    /// Pad the trace so that it spans `[tmin, tmax]`.
    pub fn extend(&mut self, tmin: f64, tmax: f64, fill: FillMethod) {
        if self.is_empty() {
            return;
        }
        let nl = if tmin.is_finite() {
            ((self.tmin - tmin) / self.deltat - SAMPLE_EPS).ceil().max(0.0) as usize
        } else {
            0
        };
        let nh = if tmax.is_finite() {
            ((tmax - self.tmax()) / self.deltat - SAMPLE_EPS).ceil().max(0.0) as usize
        } else {
            0
        };
        if nl == 0 && nh == 0 {
            return;
        }
        let (left, right) = match fill {
            FillMethod::Zeros => (0.0, 0.0),
            FillMethod::Median => {
                let m = median(&self.ydata);
                (m, m)
            }
            FillMethod::Repeat => (self.ydata[0], self.ydata[self.len() - 1]),
        };
        let mut ydata = vec![left; nl];
        ydata.append(&mut self.ydata);
        ydata.resize(ydata.len() + nh, right);
        self.ydata = ydata;
        self.tmin -= nl as f64 * self.deltat;
    }

    pub fn mean(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.ydata.iter().sum::<f64>() / self.len() as f64
    }

    pub fn absmax(&self) -> f64 {
        self.ydata.iter().fold(0.0, |m, y| m.max(y.abs()))
    }
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}
