//! Frequency-domain processing: restitution, low-pass filtering and
//! sample rate conversion.

use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

use crate::error::TraceError;
use crate::response::Response;
use crate::trace::Trace;

/// Relative tolerance for integer resampling ratios.
const RATIO_TOLERANCE: f64 = 1e-4;

/// Forward and inverse transforms of one size.
struct Spectral {
    size: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for Spectral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spectral").field("size", &self.size).finish()
    }
}

impl Spectral {
    fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            size,
            forward: planner.plan_fft_forward(size),
            inverse: planner.plan_fft_inverse(size),
        }
    }

    /// Spectrum of `ydata`, zero padded to the transform size.
    fn fft(&self, ydata: &[f64]) -> Vec<Complex64> {
        let mut buffer: Vec<Complex64> = ydata.iter().map(|&y| Complex64::new(y, 0.0)).collect();
        buffer.resize(self.size, Complex64::new(0.0, 0.0));
        self.forward.process(&mut buffer);
        buffer
    }

    /// Real part of the normalized inverse transform.
    fn ifft_real(&self, mut spectrum: Vec<Complex64>) -> Vec<f64> {
        self.inverse.process(&mut spectrum);
        let scale = 1.0 / self.size as f64;
        spectrum.iter().map(|c| c.re * scale).collect()
    }

    /// Frequency of bin `k`, negative above the Nyquist bin.
    fn freq(&self, k: usize, deltat: f64) -> f64 {
        let df = 1.0 / (self.size as f64 * deltat);
        if k <= self.size / 2 {
            k as f64 * df
        } else {
            -((self.size - k) as f64) * df
        }
    }
}

pub fn next_pow2(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

/// Four-corner cosine taper: zero outside `f1..f4`, one within `f2..f3`.
pub fn cos_taper(f: f64, [f1, f2, f3, f4]: [f64; 4]) -> f64 {
    if f <= f1 || f >= f4 {
        0.0
    } else if f < f2 {
        0.5 - 0.5 * (PI * (f - f1) / (f2 - f1)).cos()
    } else if f <= f3 {
        1.0
    } else {
        0.5 + 0.5 * (PI * (f - f3) / (f4 - f3)).cos()
    }
}

/// Apply (or with `invert` remove) a transfer function.
///
/// The trace is demeaned and faded in and out over `tfade` seconds; the
/// faded ends are cut off the result. Frequencies outside `freqlimits` are
/// suppressed with [`cos_taper`].
pub fn transfer(
    tr: &Trace,
    tfade: f64,
    freqlimits: Option<[f64; 4]>,
    response: &Response,
    invert: bool,
) -> Result<Trace, TraceError> {
    let n = tr.len();
    if n == 0 {
        return Err(TraceError::NoData);
    }
    let nfade = (tfade / tr.deltat).round() as usize;
    if 2 * nfade >= n {
        return Err(TraceError::TooShort { nsamples: n, nfade });
    }

    let mean = tr.mean();
    let mut ydata: Vec<f64> = tr.ydata.iter().map(|y| y - mean).collect();
    for i in 0..nfade {
        let w = 0.5 - 0.5 * (PI * i as f64 / nfade as f64).cos();
        ydata[i] *= w;
        ydata[n - 1 - i] *= w;
    }

    let spectral = Spectral::new(next_pow2((n as f64 * 1.2).ceil() as usize));
    let mut spectrum = spectral.fft(&ydata);
    for (k, c) in spectrum.iter_mut().enumerate() {
        let f = spectral.freq(k, tr.deltat);
        let mut coef = response.evaluate(f.abs());
        if f < 0.0 {
            coef = coef.conj();
        }
        if invert {
            coef = if coef.norm() == 0.0 || !coef.is_finite() {
                Complex64::new(0.0, 0.0)
            } else {
                coef.inv()
            };
        }
        if !coef.is_finite() {
            coef = Complex64::new(0.0, 0.0);
        }
        if let Some(limits) = freqlimits {
            coef *= cos_taper(f.abs(), limits);
        }
        *c *= coef;
    }
    let mut out = spectral.ifft_real(spectrum);
    out.truncate(n);

    let mut result = Trace::new(tr.codes.clone(), tr.tmin, tr.deltat, out);
    if nfade > 0 {
        result.ydata.truncate(n - nfade);
        result.ydata.drain(..nfade);
        result.tmin += nfade as f64 * tr.deltat;
    }
    Ok(result)
}

/// Zero-phase low-pass with a cosine roll-off from `0.8 * corner` to
/// `corner`.
pub fn lowpass(ydata: &[f64], deltat: f64, corner: f64) -> Vec<f64> {
    let n = ydata.len();
    if n == 0 {
        return Vec::new();
    }
    let spectral = Spectral::new(next_pow2((n as f64 * 1.2).ceil() as usize));
    let mut spectrum = spectral.fft(ydata);
    let limits = [-1.0, 0.0, 0.8 * corner, corner];
    for (k, c) in spectrum.iter_mut().enumerate() {
        *c *= cos_taper(spectral.freq(k, deltat).abs(), limits);
    }
    let mut out = spectral.ifft_real(spectrum);
    out.truncate(n);
    out
}

/// Band-limited interpolation by an integer factor, keeping first and last
/// sample times.
pub fn upsample(ydata: &[f64], factor: usize) -> Vec<f64> {
    let n = ydata.len();
    if factor <= 1 || n < 2 {
        return ydata.to_vec();
    }
    let m = n * factor;
    let spectral = Spectral::new(n);
    let y = spectral.fft(ydata);

    let mut z = vec![Complex64::new(0.0, 0.0); m];
    let half = n / 2;
    for k in 0..=half {
        z[k] = y[k];
    }
    for k in (half + 1)..n {
        z[m - (n - k)] = y[k];
    }
    if n % 2 == 0 {
        // split the Nyquist bin between both sides
        let nyq = y[half] * 0.5;
        z[half] = nyq;
        z[m - half] = nyq;
    }

    let mut planner = FftPlanner::new();
    planner.plan_fft_inverse(m).process(&mut z);
    let scale = 1.0 / n as f64;
    z.iter()
        .take((n - 1) * factor + 1)
        .map(|c| c.re * scale)
        .collect()
}

/// Resample to `deltat`, upsampling by at most `allow_upsample_max` when
/// the ratio is not an integer decimation. With `snap` the first sample is
/// aligned to a multiple of `deltat`.
pub fn downsample_to(
    tr: &mut Trace,
    deltat: f64,
    snap: bool,
    allow_upsample_max: usize,
) -> Result<(), TraceError> {
    if tr.is_empty() {
        return Err(TraceError::NoData);
    }
    let failed = TraceError::Resample {
        from: tr.deltat,
        to: deltat,
    };
    let ratio = deltat / tr.deltat;
    let (upsratio, dratio) = (1..=allow_upsample_max.max(1))
        .map(|u| (u, ratio * u as f64))
        .find(|(_, r)| r.round() >= 1.0 && ((r - r.round()) / r).abs() < RATIO_TOLERANCE)
        .ok_or(failed)?;
    let dratio = dratio.round() as usize;
    let deltat_inter = tr.deltat / upsratio as f64;

    let mut ydata = upsample(&tr.ydata, upsratio);
    if dratio > 1 {
        ydata = lowpass(&ydata, deltat_inter, 0.5 / deltat);
    }

    let i0 = if snap {
        let t_snap = (tr.tmin / deltat).ceil() * deltat;
        ((t_snap - tr.tmin) / deltat_inter).round() as usize
    } else {
        0
    };
    if i0 >= ydata.len() {
        return Err(TraceError::TooShort {
            nsamples: tr.len(),
            nfade: 0,
        });
    }
    log::trace!(
        "{}: resample {} s -> {} s (up {}, down {})",
        tr.codes,
        tr.deltat,
        deltat,
        upsratio,
        dratio
    );
    tr.ydata = ydata.into_iter().skip(i0).step_by(dratio).collect();
    tr.tmin += i0 as f64 * deltat_inter;
    if snap {
        tr.tmin = (tr.tmin / deltat).round() * deltat;
    }
    tr.deltat = deltat;
    Ok(())
}
