use std::collections::HashMap;

use crate::codes::Nslc;
use crate::error::NotFound;
use crate::trace::Trace;

/// Exact bit pattern of an optional window bound.
type TimeKey = Option<u64>;

fn time_key(t: Option<f64>) -> TimeKey {
    t.map(f64::to_bits)
}

/// Memoised outcomes of waveform requests, keyed by output channel and
/// window. Failures are stored like successes.
#[derive(Debug, Clone, Default)]
pub struct WaveformCache {
    entries: HashMap<(Nslc, TimeKey, TimeKey), Result<Trace, NotFound>>,
}

impl WaveformCache {
    pub fn get(
        &self,
        nslc: &Nslc,
        tmin: Option<f64>,
        tmax: Option<f64>,
    ) -> Option<&Result<Trace, NotFound>> {
        self.entries
            .get(&(nslc.clone(), time_key(tmin), time_key(tmax)))
    }

    pub fn insert(
        &mut self,
        nslc: Nslc,
        tmin: Option<f64>,
        tmax: Option<f64>,
        outcome: Result<Trace, NotFound>,
    ) {
        self.entries
            .insert((nslc, time_key(tmin), time_key(tmax)), outcome);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
