//! The dataset: metadata, waveform access, restitution, projection,
//! corrections and the waveform cache behind one request interface.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::WaveformCache;
use crate::catalog::{CatalogMiss, StationCatalog};
use crate::codes::{Blacklist, CodeKey, Nsl, Nslc, ObjectRef, Whitelist};
use crate::corrections::StationCorrection;
use crate::error::{DatasetError, NotFound, Reason};
use crate::markers::Marker;
use crate::model::{Event, Location, Quantity, Station};
use crate::projection::{projections_to_enz, projections_to_rtz, Projection};
use crate::response::{Response, ResponseEntry, ResponseTable};
use crate::signal::{downsample_to, transfer};
use crate::store::WaveformStore;
use crate::trace::{FillMethod, Trace};

/// Channel aliases whose corrections can affect a projected trace.
const OUTPUT_CHANNELS: [&str; 5] = ["E", "N", "Z", "R", "T"];
/// Bound on the upsampling factor used when resampling.
const UPSAMPLE_MAX: usize = 5;

/// Granularity at which clip markers invalidate waveforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipHandling {
    #[default]
    ByNsl,
    ByNslc,
}

/// Parameters of a raw waveform query.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRequest {
    pub tmin: f64,
    pub tmax: f64,
    pub tpad: f64,
    /// Read data this much later and shift it back, e.g. to measure
    /// pre-event noise with the same windows.
    pub toffset_noise_extract: f64,
    pub want_incomplete: bool,
    pub extend_incomplete: bool,
}

impl RawRequest {
    pub fn new(tmin: f64, tmax: f64) -> Self {
        Self {
            tmin,
            tmax,
            tpad: 0.0,
            toffset_noise_extract: 0.0,
            want_incomplete: false,
            extend_incomplete: false,
        }
    }
}

/// Parameters of a restituted and projected waveform query.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformRequest {
    pub quantity: Quantity,
    pub tmin: Option<f64>,
    pub tmax: Option<f64>,
    pub tpad: f64,
    /// Length of the cosine fade applied before restitution.
    pub tfade: f64,
    pub freqlimits: Option<[f64; 4]>,
    /// Resample to this interval before restitution.
    pub deltat: Option<f64>,
    pub backazimuth: Option<f64>,
    /// Source and receiver positions; when given, they determine the
    /// back azimuth.
    pub geometry: Option<(Location, Location)>,
    pub toffset_noise_extract: f64,
    pub want_incomplete: bool,
    pub cache: bool,
}

impl Default for WaveformRequest {
    fn default() -> Self {
        Self {
            quantity: Quantity::Displacement,
            tmin: None,
            tmax: None,
            tpad: 0.0,
            tfade: 0.0,
            freqlimits: None,
            deltat: None,
            backazimuth: None,
            geometry: None,
            toffset_noise_extract: 0.0,
            want_incomplete: false,
            cache: false,
        }
    }
}

impl WaveformRequest {
    pub fn new(quantity: Quantity) -> Self {
        Self {
            quantity,
            ..Default::default()
        }
    }

    pub fn window(mut self, tmin: f64, tmax: f64) -> Self {
        self.tmin = Some(tmin);
        self.tmax = Some(tmax);
        self
    }

    pub fn cached(mut self) -> Self {
        self.cache = true;
        self
    }

    fn bounds(&self) -> (f64, f64) {
        (
            self.tmin.unwrap_or(f64::NEG_INFINITY),
            self.tmax.unwrap_or(f64::INFINITY),
        )
    }
}

/// All intermediate traces of a waveform request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugTraces {
    pub projected: Vec<Trace>,
    pub restituted: Vec<Trace>,
    pub raw: Vec<Trace>,
}

/// A phase arrival associated with a known event.
#[derive(Debug, Clone, PartialEq)]
pub struct Pick {
    pub nslc: Nslc,
    pub time: f64,
    pub phase: String,
    pub event_name: String,
}

#[derive(Debug, Default)]
pub struct Dataset {
    events: Vec<Event>,
    store: WaveformStore,
    stations: BTreeMap<Nsl, Station>,
    responses: ResponseTable,
    catalogs: Vec<Arc<StationCatalog>>,
    clippings: HashMap<CodeKey, Vec<f64>>,
    blacklist: Blacklist,
    whitelist: Whitelist,
    station_corrections: HashMap<Nslc, StationCorrection>,
    pick_markers: Vec<Marker>,
    picks: HashMap<(Nsl, String, String), Pick>,
    pub apply_correction_delays: bool,
    pub apply_correction_factors: bool,
    pub extend_incomplete: bool,
    pub clip_handling: ClipHandling,
    cache: WaveformCache,
    event_name: Option<String>,
}

impl Dataset {
    pub fn new(event_name: Option<&str>) -> Self {
        Self {
            apply_correction_delays: true,
            apply_correction_factors: true,
            event_name: event_name.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn empty_cache(&mut self) {
        self.cache.clear();
    }

    pub fn waveform_store(&self) -> &WaveformStore {
        &self.store
    }

    pub fn add_stations(&mut self, stations: impl IntoIterator<Item = Station>) {
        for station in stations {
            self.stations.insert(station.nsl(), station);
        }
    }

    /// Add an inventory as response source. Its stations are added
    /// separately with [`Dataset::add_stations`].
    pub fn add_response_catalog(&mut self, catalog: Arc<StationCatalog>) {
        self.catalogs.push(catalog);
    }

    pub fn add_events(&mut self, events: impl IntoIterator<Item = Event>) {
        self.events.extend(events);
    }

    pub fn add_waveforms(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        self.store.add_paths(paths);
    }

    pub fn add_responses(&mut self, entries: impl IntoIterator<Item = ResponseEntry>) {
        self.responses.extend(entries);
    }

    /// Register the clip markers among `markers` under both their NSL and
    /// NSLC codes.
    pub fn add_clippings<'a>(&mut self, markers: impl IntoIterator<Item = &'a Marker>) {
        for marker in markers {
            if let Marker::Clip { nslc, tmin } = marker {
                self.clippings
                    .entry(CodeKey::Nsl(nslc.nsl()))
                    .or_default()
                    .push(*tmin);
                self.clippings
                    .entry(CodeKey::Nslc(nslc.clone()))
                    .or_default()
                    .push(*tmin);
            }
        }
    }

    pub fn add_blacklist<S: AsRef<str>>(&mut self, entries: &[S]) -> Result<(), DatasetError> {
        for entry in entries {
            self.blacklist.add(entry.as_ref())?;
        }
        Ok(())
    }

    pub fn add_whitelist<S: AsRef<str>>(&mut self, entries: &[S]) -> Result<(), DatasetError> {
        for entry in entries {
            self.whitelist.add(entry.as_ref())?;
        }
        Ok(())
    }

    pub fn add_station_corrections(
        &mut self,
        corrections: impl IntoIterator<Item = StationCorrection>,
    ) {
        for sc in corrections {
            self.station_corrections.insert(sc.codes.clone(), sc);
        }
    }

    pub fn get_station_correction(&self, nslc: &Nslc) -> Option<&StationCorrection> {
        self.station_corrections.get(nslc)
    }

    /// Add pick markers and revalidate all picks.
    ///
    /// Event markers name the events phase markers refer to by hash. Duplicate
    /// event names, duplicate picks and picks of unknown events are errors.
    pub fn add_picks(
        &mut self,
        markers: impl IntoIterator<Item = Marker>,
    ) -> Result<(), DatasetError> {
        self.pick_markers.extend(markers);

        let mut hash_to_name = HashMap::new();
        let mut names = HashSet::new();
        for marker in &self.pick_markers {
            if let Marker::Event { event } = marker {
                if !names.insert(event.name.clone()) {
                    return Err(DatasetError::DuplicateEventName(event.name.clone()));
                }
                hash_to_name.insert(event.content_hash(), event.name.clone());
            }
        }

        let mut picks = HashMap::new();
        for marker in &self.pick_markers {
            if let Marker::Phase {
                nslc,
                tmin,
                phase,
                event_hash,
            } = marker
            {
                let nsl = nslc.nsl();
                let label = format!("{nsl}, {phase}");
                let event_name = event_hash
                    .as_ref()
                    .and_then(|h| hash_to_name.get(h))
                    .ok_or_else(|| DatasetError::UnassociatedPick(label.clone()))?;
                let key = (nsl, phase.clone(), event_name.clone());
                if picks.contains_key(&key) {
                    return Err(DatasetError::DuplicatePick(label));
                }
                picks.insert(
                    key,
                    Pick {
                        nslc: nslc.clone(),
                        time: *tmin,
                        phase: phase.clone(),
                        event_name: event_name.clone(),
                    },
                );
            }
        }
        log::debug!("{} picks of {} events", picks.len(), names.len());
        self.picks = picks;
        Ok(())
    }

    pub fn is_blacklisted(&self, obj: ObjectRef<'_>) -> bool {
        self.blacklist.contains(obj)
    }

    pub fn is_whitelisted(&self, obj: ObjectRef<'_>) -> bool {
        self.whitelist.contains(obj)
    }

    fn check_eligible(&self, obj: ObjectRef<'_>, what: &'static str) -> Result<(), NotFound> {
        let codes = match obj.nslc() {
            Ok(nslc) => nslc.to_string(),
            Err(_) => obj.nsl().to_string(),
        };
        if self.is_blacklisted(obj) {
            return Err(NotFound::new(Reason::Blacklisted(what)).codes(codes));
        }
        if !self.is_whitelisted(obj) {
            return Err(NotFound::new(Reason::NotWhitelisted(what)).codes(codes));
        }
        Ok(())
    }

    /// Whether a clip marker of `key` lies in `(tmin, tmax]`.
    pub fn has_clipping(&self, key: &CodeKey, tmin: f64, tmax: f64) -> bool {
        self.clippings
            .get(key)
            .map_or(false, |times| times.iter().any(|&t| tmin < t && t <= tmax))
    }

    /// Station record of `obj`, trying the exact location code, then the
    /// empty location, then the station code alone.
    pub fn get_station(&self, obj: ObjectRef<'_>) -> Result<Station, NotFound> {
        self.check_eligible(obj, "station")?;
        if let ObjectRef::Station(station) = obj {
            return Ok(station.clone());
        }
        let keys = obj.nsl().fallback_keys();
        keys.iter()
            .find_map(|k| self.stations.get(k))
            .cloned()
            .ok_or_else(|| {
                let tried: Vec<String> = keys.iter().map(Nsl::to_string).collect();
                NotFound::new(Reason::NoStation).codes(tried.join(", "))
            })
    }

    /// Eligible stations in code order.
    pub fn get_stations(&self) -> Vec<&Station> {
        self.stations
            .values()
            .filter(|s| {
                !self.is_blacklisted(ObjectRef::Station(s))
                    && self.is_whitelisted(ObjectRef::Station(s))
            })
            .collect()
    }

    /// The unique response of the channel and time span of `obj`, composed
    /// for restitution to `quantity`.
    pub fn get_response(
        &self,
        obj: ObjectRef<'_>,
        quantity: Quantity,
    ) -> Result<Response, DatasetError> {
        if self.responses.is_empty() && self.catalogs.is_empty() {
            return Err(NotFound::new(Reason::NoResponseInformation).into());
        }
        self.check_eligible(obj, "response")?;
        let nslc = obj.nslc()?;
        let (tmin, tmax) = obj.time_span()?;

        let mut candidates = self.responses.candidates(&nslc, tmin, tmax, quantity);
        for catalog in &self.catalogs {
            match catalog.get_response(&nslc, tmin, tmax, quantity) {
                Ok(resp) => candidates.push(resp),
                Err(CatalogMiss::None) => {}
                Err(CatalogMiss::Multiple) => {
                    return Err(NotFound::new(Reason::AmbiguousResponse)
                        .codes(&nslc)
                        .detail("overlapping channel epochs in station catalog")
                        .into());
                }
            }
        }
        match candidates.len() {
            1 => Ok(candidates.remove(0)),
            0 => Err(NotFound::new(Reason::NoResponse).codes(&nslc).into()),
            _ => Err(NotFound::new(Reason::AmbiguousResponse).codes(&nslc).into()),
        }
    }

    /// Raw data of one channel.
    ///
    /// Unless incomplete data is wanted, exactly one fragment covering the
    /// padded window is required.
    pub fn get_waveform_raw(
        &mut self,
        nslc: &Nslc,
        req: &RawRequest,
    ) -> Result<Vec<Trace>, DatasetError> {
        self.check_eligible(ObjectRef::Nslc(nslc), "waveform")?;

        let clip_key = match self.clip_handling {
            ClipHandling::ByNsl => CodeKey::Nsl(nslc.nsl()),
            ClipHandling::ByNslc => CodeKey::Nslc(nslc.clone()),
        };
        if self.has_clipping(&clip_key, req.tmin, req.tmax) {
            let codes = match &clip_key {
                CodeKey::Nsl(nsl) => nsl.to_string(),
                CodeKey::Nslc(nslc) => nslc.to_string(),
            };
            return Err(NotFound::new(Reason::WaveformClipped).codes(codes).into());
        }

        let toffset = req.toffset_noise_extract;
        let mut trs = self.store.all(
            nslc,
            req.tmin + toffset,
            req.tmax + toffset,
            req.tpad,
        )?;
        if toffset != 0.0 {
            for tr in &mut trs {
                tr.shift(-toffset);
            }
        }

        let (wmin, wmax) = (req.tmin - req.tpad, req.tmax + req.tpad);
        if req.extend_incomplete && trs.len() == 1 {
            trs[0].extend(wmin, wmax, FillMethod::Median);
        }

        if !req.want_incomplete {
            let reason = match trs.as_slice() {
                [tr] if tr.covers(wmin, wmax) => None,
                [_] | [] => Some(Reason::WaveformMissing),
                _ => Some(Reason::WaveformGapped),
            };
            if let Some(reason) = reason {
                return Err(NotFound::new(reason)
                    .codes(nslc)
                    .time_range(wmin + toffset, wmax + toffset)
                    .into());
            }
        }
        Ok(trs)
    }

    /// Restituted and raw traces of one channel.
    pub fn get_waveform_restituted(
        &mut self,
        nslc: &Nslc,
        req: &WaveformRequest,
    ) -> Result<(Vec<Trace>, Vec<Trace>), DatasetError> {
        let (tmin, tmax) = req.bounds();
        let raw_req = RawRequest {
            tmin,
            tmax,
            tpad: req.tpad + req.tfade,
            toffset_noise_extract: req.toffset_noise_extract,
            want_incomplete: req.want_incomplete,
            extend_incomplete: self.extend_incomplete,
        };
        let trs_raw = self.get_waveform_raw(nslc, &raw_req)?;

        let mut trs_restituted = Vec::with_capacity(trs_raw.len());
        for raw in &trs_raw {
            let mut tr = raw.clone();
            if let Some(deltat) = req.deltat {
                downsample_to(&mut tr, deltat, true, UPSAMPLE_MAX).map_err(|e| {
                    NotFound::new(Reason::ResampleFailed)
                        .codes(&tr.codes)
                        .detail(e.to_string())
                })?;
            }
            let resp = self.get_response(ObjectRef::Trace(&tr), req.quantity)?;
            let restituted = transfer(&tr, req.tfade, req.freqlimits, &resp, true).map_err(|e| {
                NotFound::new(Reason::WaveformMissing)
                    .codes(&tr.codes)
                    .detail(e.to_string())
            })?;
            trs_restituted.push(restituted);
        }
        Ok((trs_restituted, trs_raw))
    }

    fn get_projections(
        &mut self,
        station: &Station,
        req: &WaveformRequest,
    ) -> Result<Vec<Projection>, DatasetError> {
        let mut station = station.clone();
        if station.channels.is_empty() {
            let (tmin, tmax) = req.bounds();
            let names = self.store.channels(&station.nsl(), tmin, tmax)?;
            station.set_channels_by_name(&names);
        }

        let mut projections = projections_to_enz(&station);
        let backazimuth = match &req.geometry {
            Some((source, target)) => Some(source.azibazi_to(target).1),
            None => req.backazimuth,
        };
        if let Some(baz) = backazimuth {
            projections.extend(projections_to_rtz(&station, baz));
        }
        if projections.is_empty() {
            return Err(NotFound::new(Reason::NoProjection)
                .codes(station.nsl())
                .into());
        }
        Ok(projections)
    }

    /// Station and output channel code addressed by `obj`.
    fn resolve(&self, obj: ObjectRef<'_>) -> Result<(Station, Nslc), DatasetError> {
        let channel = obj.nslc()?.channel;
        let station = self.get_station(ObjectRef::Nsl(&obj.nsl()))?;
        let nslc = station.nsl().with_channel(&channel);
        self.check_eligible(ObjectRef::Nslc(&nslc), "waveform")?;
        Ok((station, nslc))
    }

    fn project(
        &mut self,
        station: &Station,
        channel: &str,
        req: &WaveformRequest,
        debug: bool,
    ) -> Result<DebugTraces, DatasetError> {
        let nsl = station.nsl();
        let abs_delay_max = OUTPUT_CHANNELS
            .iter()
            .filter_map(|alias| self.station_corrections.get(&nsl.with_channel(alias)))
            .map(|sc| sc.delay.abs())
            .fold(0.0, f64::max);

        let projections = self.get_projections(station, req)?;
        let sub_req = WaveformRequest {
            tpad: req.tpad + abs_delay_max,
            toffset_noise_extract: 0.0,
            want_incomplete: debug,
            ..req.clone()
        };

        let mut traces = DebugTraces::default();
        for projection in &projections {
            let deps = projection.dependencies();
            let Some(inputs) = deps.get(channel) else {
                continue;
            };
            let mut restituted_group = Vec::new();
            for cha in inputs {
                let (restituted, raw) =
                    self.get_waveform_restituted(&nsl.with_channel(cha), &sub_req)?;
                restituted_group.extend(restituted);
                traces.raw.extend(raw);
            }
            let projected = projection.apply(&restituted_group).map_err(|e| {
                NotFound::new(Reason::NoProjection)
                    .codes(&nsl)
                    .detail(e.to_string())
            })?;
            traces.projected.extend(projected);
            traces.restituted.extend(restituted_group);
        }

        for tr in &mut traces.projected {
            if let Some(sc) = self.station_corrections.get(&tr.codes) {
                if self.apply_correction_factors {
                    for y in &mut tr.ydata {
                        *y /= sc.factor;
                    }
                }
                if self.apply_correction_delays {
                    tr.shift(-sc.delay);
                }
            }
            if let (Some(tmin), Some(tmax)) = (req.tmin, req.tmax) {
                tr.chop(tmin, tmax).map_err(|e| {
                    NotFound::new(Reason::WaveformMissing)
                        .codes(&tr.codes)
                        .time_range(tmin, tmax)
                        .detail(e.to_string())
                })?;
            }
        }
        Ok(traces)
    }

    /// Restituted, projected and corrected trace of one output channel.
    ///
    /// With `req.cache`, outcomes (including failures) are memoised per
    /// output channel and window.
    pub fn get_waveform(
        &mut self,
        obj: ObjectRef<'_>,
        req: &WaveformRequest,
    ) -> Result<Trace, DatasetError> {
        let (station, nslc) = self.resolve(obj)?;

        if req.cache {
            if let Some(hit) = self.cache.get(&nslc, req.tmin, req.tmax) {
                log::trace!("cache hit for {nslc}");
                return hit.clone().map_err(DatasetError::from);
            }
        }

        let outcome = self.project(&station, &nslc.channel, req, false).and_then(|traces| {
            if req.cache {
                let mut stored = HashSet::new();
                for tr in &traces.projected {
                    if stored.insert(tr.codes.clone()) {
                        self.cache
                            .insert(tr.codes.clone(), req.tmin, req.tmax, Ok(tr.clone()));
                    }
                }
            }
            traces
                .projected
                .into_iter()
                .find(|tr| tr.channel() == nslc.channel)
                .ok_or_else(|| NotFound::new(Reason::WaveformNotAvailable).codes(&nslc).into())
        });

        if let Err(DatasetError::NotFound(e)) = &outcome {
            if req.cache {
                self.cache
                    .insert(nslc.clone(), req.tmin, req.tmax, Err(e.clone()));
            }
        }
        outcome
    }

    /// All intermediate traces of a waveform request. Incomplete data is
    /// accepted and the cache is bypassed.
    pub fn get_waveform_debug(
        &mut self,
        obj: ObjectRef<'_>,
        req: &WaveformRequest,
    ) -> Result<DebugTraces, DatasetError> {
        let (station, nslc) = self.resolve(obj)?;
        self.project(&station, &nslc.channel, req, true)
    }

    pub fn get_events(&self, magmin: Option<f64>, event_names: Option<&[String]>) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|ev| match magmin {
                Some(magmin) => ev.magnitude.map_or(false, |m| m >= magmin),
                None => true,
            })
            .filter(|ev| event_names.map_or(true, |names| names.contains(&ev.name)))
            .collect()
    }

    /// Event closest in time to `t`.
    pub fn get_event_by_time(&self, t: f64, magmin: Option<f64>) -> Result<&Event, NotFound> {
        self.get_events(magmin, None)
            .into_iter()
            .min_by(|a, b| (a.time - t).abs().total_cmp(&(b.time - t).abs()))
            .ok_or_else(|| {
                NotFound::new(Reason::NoEvent).detail(format!(
                    "no event matching criteria (t={t}, magmin={magmin:?})"
                ))
            })
    }

    /// The event this dataset was set up for.
    pub fn get_event(&self) -> Result<&Event, NotFound> {
        let name = self
            .event_name
            .as_deref()
            .ok_or_else(|| {
                NotFound::new(Reason::NoEvent).detail("no main event selected in dataset")
            })?;
        self.events
            .iter()
            .find(|ev| ev.name == name)
            .ok_or_else(|| NotFound::new(Reason::NoEvent).detail(format!("no such event: {name}")))
    }

    pub fn get_picks(&self) -> &HashMap<(Nsl, String, String), Pick> {
        &self.picks
    }

    pub fn get_pick(&self, event_name: &str, obj: ObjectRef<'_>, phase: &str) -> Option<&Pick> {
        self.picks
            .get(&(obj.nsl(), phase.to_string(), event_name.to_string()))
    }
}
