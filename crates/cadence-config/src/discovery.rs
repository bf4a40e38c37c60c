//! Locating config files and folding them into one [`CadenceConfig`].
//!
//! Layers, lowest precedence first:
//! 1. user: `$CADENCE_CONFIG_DIR/config.toml`, else `<xdg config>/cadence/config.toml`
//! 2. project: `cadence.toml` in the project directory (cwd by default)
//!
//! `--config` on the command line replaces discovery with a single explicit
//! layer.

use std::path::{Path, PathBuf};

use crate::{CadenceConfig, ConfigError, Result};

const PROJECT_FILE: &str = "cadence.toml";
const USER_FILE: &str = "config.toml";
const APP_DIR: &str = "cadence";
const CONFIG_DIR_ENV: &str = "CADENCE_CONFIG_DIR";

/// Which discovery step a file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    User,
    Project,
    Explicit,
}

/// One file that discovery looked at.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub layer: Layer,
    pub path: PathBuf,
    /// `false` when the file was absent or unparsable.
    pub loaded: bool,
}

/// Merged config plus what it was built from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: CadenceConfig,
    /// Every file consulted, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// Layers that existed but could not be parsed.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Load exactly one file, failing hard if it is unreadable.
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self {
            config: load_config_file(path)?,
            sources: vec![ConfigSource {
                layer: Layer::Explicit,
                path: path.to_path_buf(),
                loaded: true,
            }],
            warnings: Vec::new(),
        })
    }

    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter_map(|s| s.loaded.then_some(s.path.as_path()))
            .collect()
    }
}

/// Discover and merge the user and project layers.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Like [`load_config`], with the user config directory pinned to
/// `config_dir` instead of the environment or platform default.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let user = config_dir
        .map(|dir| dir.join(USER_FILE))
        .or_else(xdg_config_path);
    let project = project_dir.map_or_else(|| PathBuf::from(PROJECT_FILE), |d| d.join(PROJECT_FILE));

    let candidates = user
        .map(|p| (Layer::User, p))
        .into_iter()
        .chain(std::iter::once((Layer::Project, project)));

    let mut loaded = LoadedConfig {
        config: CadenceConfig::new(),
        sources: Vec::new(),
        warnings: Vec::new(),
    };
    for (layer, path) in candidates {
        let ok = match read_layer(&path) {
            None => false,
            Some(Ok(partial)) => {
                loaded.config.merge(partial);
                true
            }
            Some(Err(e)) => {
                loaded.warnings.push(format!("skipping {:?} config: {e}", layer));
                false
            }
        };
        loaded.sources.push(ConfigSource {
            layer,
            path,
            loaded: ok,
        });
    }
    Ok(loaded)
}

/// Parse one file with no discovery or merging.
pub fn load_config_file(path: &Path) -> Result<CadenceConfig> {
    let text = std::fs::read_to_string(path).map_err(ConfigError::read(path))?;
    CadenceConfig::from_toml(&text)
}

/// Write `config` as TOML, creating missing parent directories.
pub fn save_config(config: &CadenceConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(ConfigError::write(parent))?;
    }
    std::fs::write(path, config.to_toml()?).map_err(ConfigError::write(path))
}

pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_FILE))
}

/// `$CADENCE_CONFIG_DIR` when set and non-empty, else the platform config dir.
pub fn xdg_config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join(APP_DIR)),
    }
}

/// Default home of the task database.
pub fn xdg_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(APP_DIR))
}

/// `None` if the file does not exist.
fn read_layer(path: &Path) -> Option<Result<CadenceConfig>> {
    path.is_file().then(|| load_config_file(path))
}
