//! YAML metadata files and the per-run cache of parsed ones.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::catalog::StationCatalog;
use crate::error::DatasetError;
use crate::model::{Event, Station};

pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, DatasetError> {
    let text = fs::read_to_string(path).map_err(|e| DatasetError::io(path, e))?;
    serde_yaml::from_str(&text).map_err(|e| DatasetError::parse(path, e))
}

pub fn dump_yaml<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<(), DatasetError> {
    let text = serde_yaml::to_string(value).map_err(|e| DatasetError::parse(path, e))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| DatasetError::io(parent, e))?;
    }
    fs::write(path, text).map_err(|e| DatasetError::io(path, e))
}

/// Non-empty lines of a code list file; `#` starts a comment.
pub fn read_code_list(path: &Path) -> Result<Vec<String>, DatasetError> {
    let text = fs::read_to_string(path).map_err(|e| DatasetError::io(path, e))?;
    Ok(text
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Parsed station, catalog and event files, shared by the datasets of
/// one run.
#[derive(Debug, Default)]
pub struct FileCache {
    stations: HashMap<PathBuf, Arc<Vec<Station>>>,
    catalogs: HashMap<PathBuf, Arc<StationCatalog>>,
    events: HashMap<PathBuf, Arc<Vec<Event>>>,
}

fn cached<T: DeserializeOwned>(
    map: &mut HashMap<PathBuf, Arc<T>>,
    path: &Path,
    what: &str,
) -> Result<Arc<T>, DatasetError> {
    if let Some(value) = map.get(path) {
        return Ok(value.clone());
    }
    log::debug!("Loading {} from file {}", what, path.display());
    let value: Arc<T> = Arc::new(load_yaml(path)?);
    map.insert(path.to_path_buf(), value.clone());
    Ok(value)
}

impl FileCache {
    pub fn stations(&mut self, path: &Path) -> Result<Arc<Vec<Station>>, DatasetError> {
        cached(&mut self.stations, path, "stations")
    }

    pub fn catalog(&mut self, path: &Path) -> Result<Arc<StationCatalog>, DatasetError> {
        cached(&mut self.catalogs, path, "station catalog")
    }

    pub fn events(&mut self, path: &Path) -> Result<Arc<Vec<Event>>, DatasetError> {
        cached(&mut self.events, path, "events")
    }

    pub fn clear(&mut self) {
        self.stations.clear();
        self.catalogs.clear();
        self.events.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn code_list_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blacklist.txt");
        fs::write(&path, "GE.APE\n\n# broken sensor\nKTHA  # noisy\n").unwrap();
        assert_eq!(read_code_list(&path).unwrap(), vec!["GE.APE", "KTHA"]);
    }

    #[test]
    fn parsed_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.yaml");
        fs::write(
            &path,
            "- {name: ev1, time: '2020-01-01T00:00:00Z', lat: 1.0, lon: 2.0}\n",
        )
        .unwrap();
        let mut cache = FileCache::default();
        let a = cache.events(&path).unwrap();
        fs::remove_file(&path).unwrap();
        let b = cache.events(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b[0].name, "ev1");

        cache.clear();
        assert!(matches!(cache.events(&path), Err(DatasetError::Io { .. })));
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.yaml");
        fs::write(&path, "- network: GE\n  lat: [\n").unwrap();
        let err = FileCache::default().stations(&path).unwrap_err();
        assert!(err.to_string().contains("stations.yaml"), "{err}");
    }
}
