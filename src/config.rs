//! Run configuration: dataset sources, measures, synthetics engine and
//! output location, stored as YAML.
//!
//! Paths are relative to the directory of the config file and may contain
//! `${config_name}` (file stem of the config) and, for dataset paths,
//! `${event_name}` template tokens.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::corrections::load_station_corrections;
use crate::dataset::{ClipHandling, Dataset};
use crate::error::{ConfigError, DatasetError};
use crate::files::{load_yaml, read_code_list, FileCache};
use crate::markers::{load_markers, Marker};
use crate::measure::{LocalEngine, MeasureConfig};
use crate::response::ResponseEntry;

/// Replace `${key}` tokens.
pub fn expand_template(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |s, (key, value)| {
        s.replace(&format!("${{{key}}}"), value)
    })
}

/// Lexically resolve `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `path` relative to `base`; both absolute and normalized.
fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path: Vec<Component> = path.components().collect();
    let base: Vec<Component> = base.components().collect();
    let common = path
        .iter()
        .zip(&base)
        .take_while(|(a, b)| a == b)
        .count();
    let mut rel = PathBuf::new();
    for _ in common..base.len() {
        rel.push("..");
    }
    for component in &path[common..] {
        rel.push(component.as_os_str());
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    rel
}

fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    std::path::absolute(path)
        .map(|p| normalize(&p))
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Where relative paths are anchored and what templates expand to.
#[derive(Debug, Clone, PartialEq)]
pub struct PathContext {
    pub basepath: PathBuf,
    pub config_name: String,
}

impl Default for PathContext {
    fn default() -> Self {
        Self {
            basepath: PathBuf::from("."),
            config_name: "untitled".to_string(),
        }
    }
}

impl PathContext {
    pub fn expand(&self, path: &Path, event_name: Option<&str>) -> PathBuf {
        let mut vars = vec![("config_name", self.config_name.as_str())];
        if let Some(event_name) = event_name {
            vars.push(("event_name", event_name));
        }
        let expanded = PathBuf::from(expand_template(&path.to_string_lossy(), &vars));
        normalize(&self.basepath.join(expanded))
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stations_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stations_catalog_paths: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_path: Option<PathBuf>,
    #[serde(default)]
    pub waveform_paths: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clippings_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responses_table_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responses_catalog_paths: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station_corrections_path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub apply_correction_factors: bool,
    #[serde(default = "default_true")]
    pub apply_correction_delays: bool,
    #[serde(default)]
    pub extend_incomplete: bool,
    #[serde(default)]
    pub clip_handling: ClipHandling,
    #[serde(default)]
    pub picks_paths: Vec<PathBuf>,
    #[serde(default)]
    pub blacklist_paths: Vec<PathBuf>,
    /// `STA`, `NET.STA`, `NET.STA.LOC` or `NET.STA.LOC.CHA` codes to exclude.
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub whitelist_paths: Vec<PathBuf>,
    /// If given, only these codes are processed. On channel level, both
    /// the raw and the projected channel codes have to be listed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<Vec<String>>,
}

impl DatasetConfig {
    fn paths_mut(&mut self) -> Vec<&mut PathBuf> {
        let mut paths: Vec<&mut PathBuf> = Vec::new();
        paths.extend(self.stations_path.as_mut());
        paths.extend(self.stations_catalog_paths.iter_mut());
        paths.extend(self.events_path.as_mut());
        paths.extend(self.waveform_paths.iter_mut());
        paths.extend(self.clippings_path.as_mut());
        paths.extend(self.responses_table_path.as_mut());
        paths.extend(self.responses_catalog_paths.iter_mut());
        paths.extend(self.station_corrections_path.as_mut());
        paths.extend(self.picks_paths.iter_mut());
        paths.extend(self.blacklist_paths.iter_mut());
        paths.extend(self.whitelist_paths.iter_mut());
        paths
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directories whose subdirectories are Green's function stores.
    #[serde(default)]
    pub gf_store_superdirs: Vec<PathBuf>,
    #[serde(default)]
    pub gf_store_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub dataset_config: DatasetConfig,
    pub measures: Vec<MeasureConfig>,
    pub store_id: String,
    #[serde(default)]
    pub engine_config: EngineConfig,
    pub output_path: PathBuf,
    /// Write `nan` for failed measures instead of dropping the row.
    #[serde(default)]
    pub partial_rows: bool,
    #[serde(skip)]
    context: PathContext,
}

impl Config {
    pub fn context(&self) -> &PathContext {
        &self.context
    }

    pub fn set_basepath(&mut self, basepath: impl Into<PathBuf>) {
        self.context.basepath = basepath.into();
    }

    pub fn set_config_name(&mut self, name: &str) {
        self.context.config_name = name.to_string();
    }

    pub fn expand_path(&self, path: &Path) -> PathBuf {
        self.context.expand(path, None)
    }

    fn paths_mut(&mut self) -> Vec<&mut PathBuf> {
        let mut paths = self.dataset_config.paths_mut();
        paths.extend(self.engine_config.gf_store_superdirs.iter_mut());
        paths.extend(self.engine_config.gf_store_dirs.iter_mut());
        paths.push(&mut self.output_path);
        paths
    }

    /// Substitute `${config_name}` in all paths, leaving `${event_name}`.
    pub fn fix_config_name(&mut self) {
        let name = self.context.config_name.clone();
        let vars = [("config_name", name.as_str())];
        for path in self.paths_mut() {
            let expanded = expand_template(&path.to_string_lossy(), &vars);
            *path = PathBuf::from(expanded);
        }
    }

    /// Re-anchor relative paths at `basepath` so that they keep pointing
    /// at the same files.
    pub fn change_basepath(&mut self, basepath: &Path) -> Result<(), ConfigError> {
        let old = absolute(&self.context.basepath)?;
        let new = absolute(basepath)?;
        for path in self.paths_mut() {
            if path.is_relative() {
                *path = relative_to(&normalize(&old.join(&*path)), &new);
            }
        }
        self.context.basepath = new;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.measures.is_empty() {
            return Err(ConfigError::Invalid("no measures configured".to_string()));
        }
        let mut names: Vec<&str> = self.measures.iter().map(|m| m.name()).collect();
        names.sort_unstable();
        if let Some(w) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::Invalid(format!(
                "duplicate measure name \"{}\"",
                w[0]
            )));
        }
        if self.store_id.is_empty() {
            return Err(ConfigError::Invalid("empty store_id".to_string()));
        }
        Ok(())
    }

    pub fn get_engine(&self) -> LocalEngine {
        let fp = |paths: &[PathBuf]| -> Vec<PathBuf> {
            paths.iter().map(|p| self.expand_path(p)).collect()
        };
        LocalEngine::new(
            fp(&self.engine_config.gf_store_superdirs),
            fp(&self.engine_config.gf_store_dirs),
        )
    }

    /// Per-event dataset factory for this configuration.
    pub fn dataset_provider(&self) -> DatasetProvider {
        DatasetProvider::new(self.dataset_config.clone(), self.context.clone())
    }
}

pub fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: Config = serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    config.set_basepath(absolute(dir)?);
    if let Some(stem) = path.file_stem() {
        config.set_config_name(&stem.to_string_lossy());
    }
    config.validate()?;
    log::debug!("read config {}", path.display());
    Ok(config)
}

/// Write `config` to `path`, rewriting relative paths for the new location.
///
/// The config name is substituted first as the copy gets a name of its own.
pub fn write_config(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let write_error = |message: String| ConfigError::Write {
        path: path.to_path_buf(),
        message,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| write_error(e.to_string()))?;
    let mut moved = config.clone();
    moved.fix_config_name();
    moved.change_basepath(dir)?;
    let text = serde_yaml::to_string(&moved).map_err(|e| write_error(e.to_string()))?;
    fs::write(path, text).map_err(|e| write_error(e.to_string()))
}

/// Builds and memoises one [`Dataset`] per event.
#[derive(Debug)]
pub struct DatasetProvider {
    config: DatasetConfig,
    context: PathContext,
    files: FileCache,
    datasets: HashMap<String, Dataset>,
}

impl DatasetProvider {
    pub fn new(config: DatasetConfig, context: PathContext) -> Self {
        Self {
            config,
            context,
            files: FileCache::default(),
            datasets: HashMap::new(),
        }
    }

    /// Names of the events of all event files, with `${event_name}`
    /// matching any event.
    pub fn get_event_names(&mut self) -> Result<Vec<String>, DatasetError> {
        let Some(events_path) = &self.config.events_path else {
            return Ok(Vec::new());
        };
        let pattern = self.context.expand(events_path, Some("*"));
        let paths = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| DatasetError::parse(&pattern, e))?;
        let mut names = Vec::new();
        for entry in paths {
            let path = entry.map_err(|e| DatasetError::io(e.path().to_path_buf(), e.into_error()))?;
            names.extend(self.files.events(&path)?.iter().map(|ev| ev.name.clone()));
        }
        Ok(names)
    }

    pub fn get_dataset(&mut self, event_name: &str) -> Result<&mut Dataset, DatasetError> {
        match self.datasets.entry(event_name.to_string()) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let ds = build_dataset(&self.config, &self.context, &mut self.files, event_name)?;
                Ok(e.insert(ds))
            }
        }
    }
}

fn build_dataset(
    cfg: &DatasetConfig,
    context: &PathContext,
    files: &mut FileCache,
    event_name: &str,
) -> Result<Dataset, DatasetError> {
    let fp = |path: &Path| context.expand(path, Some(event_name));
    let fps = |paths: &[PathBuf]| -> Vec<PathBuf> { paths.iter().map(|p| fp(p)).collect() };

    log::debug!("setting up dataset for event {event_name}");
    let mut ds = Dataset::new(Some(event_name));
    if let Some(path) = &cfg.stations_path {
        ds.add_stations(files.stations(&fp(path))?.iter().cloned());
    }
    for path in fps(&cfg.stations_catalog_paths) {
        ds.add_stations(files.catalog(&path)?.stations());
    }
    if let Some(path) = &cfg.events_path {
        ds.add_events(files.events(&fp(path))?.iter().cloned());
    }
    if !cfg.waveform_paths.is_empty() {
        ds.add_waveforms(fps(&cfg.waveform_paths));
    }
    if let Some(path) = &cfg.clippings_path {
        ds.add_clippings(&load_markers(&fp(path))?);
    }
    if let Some(path) = &cfg.responses_table_path {
        let path = fp(path);
        log::debug!("Loading response table from {}", path.display());
        ds.add_responses(load_yaml::<Vec<ResponseEntry>>(&path)?);
    }
    for path in fps(&cfg.responses_catalog_paths) {
        ds.add_response_catalog(files.catalog(&path)?);
    }
    if let Some(path) = &cfg.station_corrections_path {
        ds.add_station_corrections(load_station_corrections(&fp(path))?);
    }

    ds.apply_correction_factors = cfg.apply_correction_factors;
    ds.apply_correction_delays = cfg.apply_correction_delays;
    ds.extend_incomplete = cfg.extend_incomplete;
    ds.clip_handling = cfg.clip_handling;

    let mut picks: Vec<Marker> = Vec::new();
    for path in fps(&cfg.picks_paths) {
        picks.extend(load_markers(&path)?);
    }
    ds.add_picks(picks)?;

    log::debug!("Loading blacklisted stations");
    ds.add_blacklist(&cfg.blacklist)?;
    for path in fps(&cfg.blacklist_paths) {
        ds.add_blacklist(&read_code_list(&path)?)?;
    }
    if let Some(whitelist) = &cfg.whitelist {
        log::debug!("Loading whitelisted stations");
        ds.add_whitelist(whitelist)?;
    }
    for path in fps(&cfg.whitelist_paths) {
        ds.add_whitelist(&read_code_list(&path)?)?;
    }
    Ok(ds)
}

#[cfg(test)]
mod test {
    use super::*;

    const CONFIG: &str = r#"
dataset_config:
  stations_path: meta/stations.yaml
  events_path: ../shared/${config_name}/${event_name}.yaml
  waveform_paths: [data]
  blacklist: [GE.APE]
measures:
  - type: amplitude
    name: pga
    timing_tmin: vel:8.0
    timing_tmax: vel:2.0
store_id: crust2_m5
output_path: results/${config_name}
"#;

    #[test]
    fn templates() {
        assert_eq!(
            expand_template("a/${config_name}/${event_name}.yaml", &[("event_name", "ev1")]),
            "a/${config_name}/ev1.yaml"
        );
        let ctx = PathContext {
            basepath: PathBuf::from("/work/project"),
            config_name: "run".to_string(),
        };
        assert_eq!(
            ctx.expand(Path::new("../out/${config_name}"), None),
            PathBuf::from("/work/out/run")
        );
        assert_eq!(
            ctx.expand(Path::new("/abs/${event_name}.yaml"), Some("ev")),
            PathBuf::from("/abs/ev.yaml")
        );
    }

    #[test]
    fn relative_paths() {
        assert_eq!(
            relative_to(Path::new("/a/b/c"), Path::new("/a/d")),
            PathBuf::from("../b/c")
        );
        assert_eq!(relative_to(Path::new("/a"), Path::new("/a")), PathBuf::from("."));
    }

    #[test]
    fn write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proj/run.yaml");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, CONFIG).unwrap();

        let config = read_config(&path).unwrap();
        assert_eq!(config.context().config_name, "run");
        let out = config.expand_path(&config.output_path);
        assert_eq!(out, normalize(&dir.path().join("proj/results/run")));

        let copy_path = dir.path().join("elsewhere/deeper/copy.yaml");
        write_config(&config, &copy_path).unwrap();
        let copy = read_config(&copy_path).unwrap();
        assert_eq!(copy.context().config_name, "copy");

        let expanded = |c: &Config| -> Vec<PathBuf> {
            let mut c = c.clone();
            let ctx = c.context().clone();
            c.paths_mut()
                .into_iter()
                .map(|p| ctx.expand(p, Some("ev1")))
                .collect()
        };
        assert_eq!(expanded(&config), expanded(&copy));
        let events_path = copy.dataset_config.events_path.as_ref().unwrap();
        assert!(events_path.to_string_lossy().ends_with("shared/run/${event_name}.yaml"));
        assert_eq!(copy.dataset_config.blacklist, vec!["GE.APE".to_string()]);
        assert_eq!(copy.measures, config.measures);
    }

    #[test]
    fn invalid_configs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, CONFIG.replace("type: amplitude", "type: unknown")).unwrap();
        assert!(matches!(read_config(&path), Err(ConfigError::Parse { .. })));

        let dup = CONFIG.replace(
            "store_id",
            "  - type: amplitude\n    name: pga\n    timing_tmin: vel:8.0\n    \
             timing_tmax: vel:2.0\nstore_id",
        );
        fs::write(&path, dup).unwrap();
        assert!(matches!(read_config(&path), Err(ConfigError::Invalid(_))));

        assert!(matches!(
            read_config(&dir.path().join("missing.yaml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn event_names_from_glob() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["ev1", "ev2"] {
            fs::write(
                dir.path().join(format!("{name}.yaml")),
                format!("- {{name: {name}, time: '2020-01-01T00:00:00Z', lat: 0.0, lon: 0.0}}\n"),
            )
            .unwrap();
        }
        let cfg = DatasetConfig {
            events_path: Some(PathBuf::from("${event_name}.yaml")),
            ..Default::default()
        };
        let ctx = PathContext {
            basepath: dir.path().to_path_buf(),
            config_name: "test".to_string(),
        };
        let mut provider = DatasetProvider::new(cfg, ctx);
        let mut names = provider.get_event_names().unwrap();
        names.sort();
        assert_eq!(names, vec!["ev1", "ev2"]);

        let ds = provider.get_dataset("ev2").unwrap();
        assert_eq!(ds.get_event().unwrap().name, "ev2");
        assert_eq!(ds.get_events(None, None).len(), 1);
    }
}
