mod common;

use std::sync::Arc;

use common::*;
use wafe::catalog::{CatalogStation, ChannelEpoch, StationCatalog};
use wafe::corrections::StationCorrection;
use wafe::markers::Marker;
use wafe::mseed::write_traces;
use wafe::response::{Response, ResponseStage};
use wafe::{
    ClipHandling, Dataset, DatasetError, Nsl, Nslc, ObjectRef, Quantity, RawRequest, Reason,
    WaveformRequest,
};

fn dataset(fx: &Fixture) -> Dataset {
    let mut ds = Dataset::new(Some("ev1"));
    ds.add_stations(stations());
    ds.add_events([event()]);
    ds.add_waveforms([fx.path("data/ev1")]);
    ds.add_responses(responses(&[]));
    ds
}

fn request(tmin: f64, tmax: f64) -> WaveformRequest {
    WaveformRequest {
        tfade: 2.0,
        ..WaveformRequest::new(Quantity::Displacement).window(tmin, tmax)
    }
}

fn reason(e: &DatasetError) -> &Reason {
    &e.not_found().expect("not-found condition").reason
}

#[test]
fn restituted_component() {
    let fx = Fixture::new(&[]);
    let mut ds = dataset(&fx);
    let nslc = Nslc::new("XX", "STA1", "", "N");
    let tr = ds
        .get_waveform(ObjectRef::Nslc(&nslc), &request(T0 + 10.0, T0 + 30.0))
        .unwrap();
    assert_eq!(tr.codes, nslc);
    assert!((tr.tmin - (T0 + 10.0)).abs() <= DELTAT);
    assert!((tr.tmax() - (T0 + 30.0)).abs() <= DELTAT);
    let amp = tr.absmax();
    assert!(amp > 0.9 && amp < 1.1, "amplitude {amp}");
}

#[test]
fn station_fallback() {
    let fx = Fixture::new(&[]);
    let ds = dataset(&fx);
    let station = ds
        .get_station(ObjectRef::Nsl(&Nsl::new("XX", "STA1", "10")))
        .unwrap();
    assert_eq!(station.nsl(), Nsl::new("XX", "STA1", ""));

    let err = ds
        .get_station(ObjectRef::Nsl(&Nsl::new("XX", "NOPE", "")))
        .unwrap_err();
    assert_eq!(err.reason, Reason::NoStation);
}

#[test]
fn blacklist_wins_over_whitelist() {
    let fx = Fixture::new(&[]);
    let mut ds = dataset(&fx);
    ds.add_whitelist(&["XX.STA1"]).unwrap();
    ds.add_blacklist(&["XX.STA1."]).unwrap();

    let nslc = Nslc::new("XX", "STA1", "", "Z");
    let err = ds
        .get_waveform(ObjectRef::Nslc(&nslc), &request(T0 + 10.0, T0 + 30.0))
        .unwrap_err();
    assert!(matches!(reason(&err), Reason::Blacklisted(_)));
    assert_eq!(ds.waveform_store().fetch_count(), 0);

    let err = ds
        .get_waveform(
            ObjectRef::Nslc(&Nslc::new("XX", "STA2", "", "Z")),
            &request(T0 + 10.0, T0 + 30.0),
        )
        .unwrap_err();
    assert!(matches!(reason(&err), Reason::NotWhitelisted(_)));
    assert!(ds.get_stations().is_empty());
    assert_eq!(ds.waveform_store().fetch_count(), 0);
}

#[test]
fn gap_policy() {
    let fx = Fixture::new(&[]);
    let nslc = Nslc::new("XX", "GAP", "", "HHZ");
    write_traces(
        fx.path("gappy/gap.mseed"),
        &[
            trace(nslc.clone(), T0 - 100.0, T0 + 50.0, 1.0),
            trace(nslc.clone(), T0 + 60.0, T0 + 300.0, 1.0),
        ],
    )
    .unwrap();
    let mut ds = Dataset::new(None);
    ds.add_waveforms([fx.path("gappy")]);

    let err = ds
        .get_waveform_raw(&nslc, &RawRequest::new(T0 + 40.0, T0 + 70.0))
        .unwrap_err();
    assert_eq!(reason(&err), &Reason::WaveformGapped);

    let trs = ds
        .get_waveform_raw(&nslc, &RawRequest::new(T0 + 100.0, T0 + 120.0))
        .unwrap();
    assert_eq!(trs.len(), 1);

    let partial = RawRequest::new(T0 + 290.0, T0 + 320.0);
    let err = ds.get_waveform_raw(&nslc, &partial).unwrap_err();
    assert_eq!(reason(&err), &Reason::WaveformMissing);

    let incomplete = RawRequest {
        want_incomplete: true,
        ..partial.clone()
    };
    let trs = ds.get_waveform_raw(&nslc, &incomplete).unwrap();
    assert!(trs[0].tmax() < T0 + 320.0);

    let extended = RawRequest {
        extend_incomplete: true,
        ..partial
    };
    let trs = ds.get_waveform_raw(&nslc, &extended).unwrap();
    assert!(trs[0].covers(T0 + 290.0, T0 + 320.0));
}

#[test]
fn clip_window_boundaries() {
    let fx = Fixture::new(&[]);
    let mut ds = dataset(&fx);
    let clipped = Nslc::new("XX", "STA1", "", "HHZ");
    ds.add_clippings(&[Marker::Clip {
        nslc: clipped.clone(),
        tmin: T0 + 10.0,
    }]);

    assert!(ds
        .get_waveform_raw(&clipped, &RawRequest::new(T0 + 10.0, T0 + 20.0))
        .is_ok());
    let err = ds
        .get_waveform_raw(&clipped, &RawRequest::new(T0 + 5.0, T0 + 10.0))
        .unwrap_err();
    assert_eq!(reason(&err), &Reason::WaveformClipped);

    let sibling = Nslc::new("XX", "STA1", "", "HHN");
    let window = RawRequest::new(T0 + 5.0, T0 + 15.0);
    assert!(ds.get_waveform_raw(&sibling, &window).is_err());
    ds.clip_handling = ClipHandling::ByNslc;
    assert!(ds.get_waveform_raw(&sibling, &window).is_ok());
    assert!(ds.get_waveform_raw(&clipped, &window).is_err());
}

#[test]
fn response_resolution() {
    init_logger();
    let nslc = Nslc::new("XX", "STA1", "", "HHZ");
    let tr = trace(nslc.clone(), T0, T0 + 10.0, 1.0);

    let mut ds = Dataset::new(None);
    let err = ds
        .get_response(ObjectRef::Trace(&tr), Quantity::Velocity)
        .unwrap_err();
    assert_eq!(reason(&err), &Reason::NoResponseInformation);

    ds.add_responses(responses(&["STA1"]));
    let err = ds
        .get_response(ObjectRef::Trace(&tr), Quantity::Velocity)
        .unwrap_err();
    assert_eq!(reason(&err), &Reason::NoResponse);

    ds.add_responses([response_entry(nslc.clone(), 10.0)]);
    assert!(ds.get_response(ObjectRef::Trace(&tr), Quantity::Velocity).is_ok());

    ds.add_responses([response_entry(nslc.clone(), 20.0)]);
    let err = ds
        .get_response(ObjectRef::Trace(&tr), Quantity::Velocity)
        .unwrap_err();
    assert_eq!(reason(&err), &Reason::AmbiguousResponse);

    // a bare code has no time span
    let err = ds
        .get_response(ObjectRef::Nslc(&nslc), Quantity::Velocity)
        .unwrap_err();
    assert!(matches!(err, DatasetError::InvalidObject(_)));
}

/// Inventory of STA1 with two open HHZ epochs starting at `starts`.
fn overlapping_catalog(starts: [f64; 2]) -> StationCatalog {
    let epoch = |start: f64| ChannelEpoch {
        name: "HHZ".to_string(),
        azimuth: Some(0.0),
        dip: Some(-90.0),
        start,
        end: None,
        input_quantity: Quantity::Displacement,
        response: Some(Response::new(vec![ResponseStage::Gain { gain: 1000.0 }])),
    };
    StationCatalog {
        stations: vec![CatalogStation {
            network: "XX".to_string(),
            station: "STA1".to_string(),
            location: String::new(),
            lat: 0.5,
            lon: 0.0,
            elevation: 0.0,
            depth: 0.0,
            channels: starts.into_iter().map(epoch).collect(),
        }],
    }
}

#[test]
fn overlapping_catalog_epochs_are_ambiguous() {
    init_logger();
    let nslc = Nslc::new("XX", "STA1", "", "HHZ");
    let tr = trace(nslc.clone(), T0, T0 + 10.0, 1.0);

    let mut ds = Dataset::new(None);
    ds.add_response_catalog(Arc::new(overlapping_catalog([T0 - 86_400.0, T0 - 3_600.0])));
    let err = ds
        .get_response(ObjectRef::Trace(&tr), Quantity::Velocity)
        .unwrap_err();
    assert_eq!(reason(&err), &Reason::AmbiguousResponse);

    // a unique table entry does not hide the conflict
    ds.add_responses([response_entry(nslc.clone(), 10.0)]);
    let err = ds
        .get_response(ObjectRef::Trace(&tr), Quantity::Velocity)
        .unwrap_err();
    assert_eq!(reason(&err), &Reason::AmbiguousResponse);

    // only one epoch spans the trace
    let mut ds = Dataset::new(None);
    ds.add_response_catalog(Arc::new(overlapping_catalog([T0 - 86_400.0, T0 + 5.0])));
    assert!(ds.get_response(ObjectRef::Trace(&tr), Quantity::Velocity).is_ok());
}

#[test]
fn cache_replays_outcomes() {
    let fx = Fixture::new(&["STA2"]);
    let mut ds = Dataset::new(Some("ev1"));
    ds.add_stations(stations());
    ds.add_waveforms([fx.path("data/ev1")]);
    ds.add_responses(responses(&["STA2"]));

    let req = request(T0 + 10.0, T0 + 30.0).cached();
    let good = Nslc::new("XX", "STA1", "", "E");
    let first = ds.get_waveform(ObjectRef::Nslc(&good), &req).unwrap();
    let fetches = ds.waveform_store().fetch_count();
    assert!(fetches > 0);
    let second = ds.get_waveform(ObjectRef::Nslc(&good), &req).unwrap();
    assert_eq!(first, second);
    assert_eq!(ds.waveform_store().fetch_count(), fetches);

    let bad = Nslc::new("XX", "STA2", "", "E");
    let err = ds.get_waveform(ObjectRef::Nslc(&bad), &req).unwrap_err();
    assert_eq!(reason(&err), &Reason::NoResponse);
    let fetches = ds.waveform_store().fetch_count();
    let err = ds.get_waveform(ObjectRef::Nslc(&bad), &req).unwrap_err();
    assert_eq!(reason(&err), &Reason::NoResponse);
    assert_eq!(ds.waveform_store().fetch_count(), fetches);

    ds.empty_cache();
    ds.get_waveform(ObjectRef::Nslc(&good), &req).unwrap();
    assert!(ds.waveform_store().fetch_count() > fetches);
}

#[test]
fn amplitude_corrections() {
    let fx = Fixture::new(&[]);
    let mut ds = dataset(&fx);
    let nslc = Nslc::new("XX", "STA1", "", "Z");
    let req = request(T0 + 10.0, T0 + 30.0);
    let plain = ds.get_waveform(ObjectRef::Nslc(&nslc), &req).unwrap();

    ds.add_station_corrections([StationCorrection {
        codes: nslc.clone(),
        delay: 0.0,
        factor: 2.0,
    }]);
    let corrected = ds.get_waveform(ObjectRef::Nslc(&nslc), &req).unwrap();
    assert_eq!(corrected.len(), plain.len());
    for (a, b) in corrected.ydata.iter().zip(&plain.ydata) {
        assert!((a * 2.0 - b).abs() < 1e-9);
    }

    ds.apply_correction_factors = false;
    let uncorrected = ds.get_waveform(ObjectRef::Nslc(&nslc), &req).unwrap();
    assert_eq!(uncorrected, plain);
}

#[test]
fn delay_corrections() {
    let fx = Fixture::new(&[]);
    let mut ds = dataset(&fx);
    let nslc = Nslc::new("XX", "STA1", "", "Z");
    let later = ds
        .get_waveform(ObjectRef::Nslc(&nslc), &request(T0 + 13.25, T0 + 33.25))
        .unwrap();

    ds.add_station_corrections([
        StationCorrection {
            codes: nslc.clone(),
            delay: 3.25,
            factor: 1.0,
        },
        StationCorrection {
            codes: Nslc::new("XX", "STA1", "", "N"),
            delay: -5.0,
            factor: 1.0,
        },
    ]);
    let corrected = ds
        .get_waveform(ObjectRef::Nslc(&nslc), &request(T0 + 10.0, T0 + 30.0))
        .unwrap();
    // padded by the largest delay, so the shifted trace still spans the window
    assert!((corrected.tmin - (T0 + 10.0)).abs() <= 0.5 * DELTAT);
    assert!((corrected.tmax() - (T0 + 30.0)).abs() <= 0.5 * DELTAT);
    assert!((later.tmin - (T0 + 13.25)).abs() <= 0.5 * DELTAT);
    // different padding removes a slightly different mean
    for (a, b) in corrected.ydata.iter().zip(&later.ydata) {
        assert!((a - b).abs() < 0.02, "{a} vs {b}");
    }

    // 1 Hz on Z: a quarter period off without the delay
    ds.apply_correction_delays = false;
    let unshifted = ds
        .get_waveform(ObjectRef::Nslc(&nslc), &request(T0 + 10.0, T0 + 30.0))
        .unwrap();
    assert!((unshifted.ydata[0] - corrected.ydata[0]).abs() > 0.5);
}
