//! Lazily indexed collection of miniSEED 3 files.
//!
//! The first query scans the configured paths and indexes record headers
//! only. Sample data is read for the records overlapping a query.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::codes::{Nsl, Nslc};
use crate::error::DatasetError;
use crate::mseed::{MS3Header, MS3Record};
use crate::trace::Trace;

#[derive(Debug, Clone)]
struct IndexEntry {
    file: usize,
    offset: usize,
    nslc: Nslc,
    tmin: f64,
    tmax: f64,
}

/// Largest offset from the sampling grid, in samples, for records to be
/// merged as overlapping.
const GRID_TOLERANCE: f64 = 0.01;

#[derive(Debug, Default)]
pub struct WaveformStore {
    paths: Vec<PathBuf>,
    files: Vec<PathBuf>,
    index: Option<Vec<IndexEntry>>,
    fetches: usize,
}

impl WaveformStore {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            ..Default::default()
        }
    }

    /// Add files or directories; the index is rebuilt on the next query.
    pub fn add_paths(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        self.paths.extend(paths);
        self.index = None;
    }

    /// Number of data queries answered so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches
    }

    fn ensure_index(&mut self) -> Result<&[IndexEntry], DatasetError> {
        if self.index.is_none() {
            let mut files = Vec::new();
            for path in &self.paths {
                collect_files(path, &mut files)?;
            }
            files.sort();
            files.dedup();
            let mut index = Vec::new();
            for (ifile, file) in files.iter().enumerate() {
                index_file(ifile, file, &mut index)?;
            }
            log::debug!(
                "indexed {} records in {} waveform files",
                index.len(),
                files.len()
            );
            self.files = files;
            self.index = Some(index);
        }
        Ok(self.index.as_deref().unwrap_or_default())
    }

    /// Channel codes with data overlapping `[tmin, tmax]` at `nsl`.
    pub fn channels(
        &mut self,
        nsl: &Nsl,
        tmin: f64,
        tmax: f64,
    ) -> Result<Vec<String>, DatasetError> {
        let index = self.ensure_index()?;
        let names: BTreeSet<String> = index
            .iter()
            .filter(|e| e.nslc.nsl() == *nsl && e.tmin <= tmax && tmin <= e.tmax)
            .map(|e| e.nslc.channel.clone())
            .collect();
        Ok(names.into_iter().collect())
    }

    /// All data of `nslc` within `[tmin - tpad, tmax + tpad]`, as contiguous
    /// fragments in time order.
    pub fn all(
        &mut self,
        nslc: &Nslc,
        tmin: f64,
        tmax: f64,
        tpad: f64,
    ) -> Result<Vec<Trace>, DatasetError> {
        self.fetches += 1;
        let (wmin, wmax) = (tmin - tpad, tmax + tpad);
        let mut hits: Vec<IndexEntry> = self
            .ensure_index()?
            .iter()
            .filter(|e| e.nslc == *nslc && e.tmin <= wmax && wmin <= e.tmax)
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.tmin.total_cmp(&b.tmin));

        let mut by_file: BTreeMap<usize, Vec<u8>> = BTreeMap::new();
        let mut fragments: Vec<Trace> = Vec::new();
        for hit in &hits {
            let path = &self.files[hit.file];
            if !by_file.contains_key(&hit.file) {
                let bytes = fs::read(path).map_err(|e| DatasetError::io(path, e))?;
                by_file.insert(hit.file, bytes);
            }
            let bytes = &by_file[&hit.file];
            let trace = match MS3Record::parse(bytes.get(hit.offset..).unwrap_or_default())
                .and_then(|(record, _)| record.to_trace())
            {
                Ok(trace) => trace,
                Err(e) => {
                    log::warn!(
                        "skipping unreadable record at byte {} of {}: {e:#}",
                        hit.offset,
                        path.display()
                    );
                    continue;
                }
            };
            match fragments.last_mut() {
                Some(last) if last.is_continued_by(&trace) || same_span(last, &trace) => {
                    last.append(&trace)
                }
                _ => fragments.push(trace),
            }
        }

        fragments.retain_mut(|tr| tr.chop(wmin, wmax).is_ok());
        log::trace!(
            "{}: {} fragments in window, {} records read",
            nslc,
            fragments.len(),
            hits.len()
        );
        Ok(fragments)
    }
}

/// `b` starts inside `a` on the same sampling grid, e.g. a duplicated record.
fn same_span(a: &Trace, b: &Trace) -> bool {
    a.codes == b.codes
        && (a.deltat - b.deltat).abs() < a.deltat * 1e-6
        && b.tmin >= a.tmin
        && b.tmin <= a.tmax() + 0.5 * a.deltat
        && {
            let k = (b.tmin - a.tmin) / a.deltat;
            (k - k.round()).abs() < GRID_TOLERANCE
        }
}

fn collect_files(path: &Path, files: &mut Vec<PathBuf>) -> Result<(), DatasetError> {
    let meta = fs::metadata(path).map_err(|e| DatasetError::io(path, e))?;
    if meta.is_file() {
        files.push(path.to_path_buf());
        return Ok(());
    }
    let entries = fs::read_dir(path).map_err(|e| DatasetError::io(path, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| DatasetError::io(path, e))?;
        collect_files(&entry.path(), files)?;
    }
    Ok(())
}

/// Index the records of one file. Indexing stops at the first unreadable
/// header, keeping the records before it.
fn index_file(ifile: usize, path: &Path, index: &mut Vec<IndexEntry>) -> Result<(), DatasetError> {
    let bytes = fs::read(path).map_err(|e| DatasetError::io(path, e))?;
    if !bytes.starts_with(b"MS\x03") {
        log::debug!("skipping {}: not a miniSEED 3 file", path.display());
        return Ok(());
    }
    let mut offset = 0;
    while offset < bytes.len() {
        match index_record(ifile, offset, &bytes[offset..]) {
            Ok((entry, len)) => {
                index.extend(entry);
                offset += len;
            }
            Err(e) => {
                log::warn!(
                    "skipping rest of {} from byte {offset}: {e:#}",
                    path.display()
                );
                break;
            }
        }
    }
    Ok(())
}

fn index_record(
    ifile: usize,
    offset: usize,
    bytes: &[u8],
) -> anyhow::Result<(Option<IndexEntry>, usize)> {
    let header = MS3Header::parse(bytes)?;
    let len = header.record_len();
    if len > bytes.len() {
        anyhow::bail!("record of {len} bytes truncated to {}", bytes.len());
    }
    if header.sample_count() == 0 || header.deltat() <= 0.0 {
        return Ok((None, len));
    }
    let entry = IndexEntry {
        file: ifile,
        offset,
        nslc: header.nslc()?,
        tmin: header.tmin()?,
        tmax: header.tmax()?,
    };
    Ok((Some(entry), len))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mseed::write_traces;

    fn trace(cha: &str, tmin: f64, n: usize) -> Trace {
        Trace::new(
            Nslc::new("XX", "STA", "", cha),
            tmin,
            1.0,
            (0..n).map(|i| (i as f64).sin()).collect(),
        )
    }

    #[test]
    fn joins_and_splits_fragments() {
        let dir = tempfile::tempdir().unwrap();
        write_traces(
            dir.path().join("a.mseed"),
            &[trace("HHZ", 1000.0, 100), trace("HHZ", 1100.0, 100)],
        )
        .unwrap();
        write_traces(dir.path().join("sub/b.mseed"), &[trace("HHZ", 1300.0, 50)]).unwrap();
        fs::write(dir.path().join("README"), "not data").unwrap();

        let mut store = WaveformStore::new(vec![dir.path().to_path_buf()]);
        let nslc = Nslc::new("XX", "STA", "", "HHZ");
        let frags = store.all(&nslc, 1050.0, 1150.0, 0.0).unwrap();
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].tmin, 1050.0);
        assert_eq!(frags[0].len(), 101);

        let frags = store.all(&nslc, 1150.0, 1320.0, 5.0).unwrap();
        assert_eq!(frags.len(), 2);
        assert_eq!(frags[0].tmin, 1145.0);
        assert_eq!(frags[1].tmax(), 1325.0);
        assert_eq!(store.fetch_count(), 2);

        assert!(store.all(&nslc, 5000.0, 6000.0, 0.0).unwrap().is_empty());
        assert_eq!(
            store.channels(&nslc.nsl(), 0.0, 2000.0).unwrap(),
            vec!["HHZ".to_string()]
        );
    }

    #[test]
    fn unreadable_files_are_skipped() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        write_traces(dir.path().join("good.mseed"), &[trace("HHZ", 1000.0, 100)]).unwrap();
        let long = dir.path().join("long.mseed");
        write_traces(&long, &[trace("HHN", 1000.0, 10_000)]).unwrap();
        let bytes = fs::read(&long).unwrap();
        fs::write(&long, &bytes[..bytes.len() - 10]).unwrap();
        fs::write(dir.path().join("broken.mseed"), b"MS\x03\x00garbage!!").unwrap();

        let mut store = WaveformStore::new(vec![dir.path().to_path_buf()]);
        let hhz = Nslc::new("XX", "STA", "", "HHZ");
        assert_eq!(store.all(&hhz, 1000.0, 1099.0, 0.0).unwrap()[0].len(), 100);

        // the last record of the truncated file is lost
        let hhn = Nslc::new("XX", "STA", "", "HHN");
        let frags = store.all(&hhn, 1000.0, 20_000.0, 0.0).unwrap();
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].tmax(), 1000.0 + 8191.0);
    }

    #[test]
    fn misaligned_duplicates_stay_apart() {
        let a = trace("HHZ", 1000.0, 100);
        assert!(same_span(&a, &trace("HHZ", 1050.0, 100)));
        assert!(!same_span(&a, &trace("HHZ", 1050.4, 100)));
        assert!(!same_span(&a, &trace("HHZ", 1200.0, 100)));
    }

    #[test]
    fn missing_path_is_an_error() {
        let mut store = WaveformStore::new(vec![PathBuf::from("/nonexistent/wafe/data")]);
        let err = store
            .all(&Nslc::new("XX", "STA", "", "HHZ"), 0.0, 1.0, 0.0)
            .unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
    }
}
