use crate::{DiffConfig, TestCmpError};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "testcmp.toml";

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: DiffConfig,
    pub path: PathBuf,
    pub exists: bool,
    pub portable: bool,
}

/// Load the configuration file, falling back to defaults when there is none.
///
/// A `testcmp.toml` next to the executable wins over the per-user one.
pub fn load_config(prefer_portable: bool) -> Result<LoadedConfig, TestCmpError> {
    let (path, portable) = resolve_config_path(prefer_portable)?;
    let mut loaded = load_config_from(&path)?;
    loaded.portable = portable;
    Ok(loaded)
}

/// Load the configuration from an explicit path.
pub fn load_config_from(path: &Path) -> Result<LoadedConfig, TestCmpError> {
    let exists = path.exists();

    let config = if exists {
        let data = fs::read_to_string(path)?;
        let config: DiffConfig =
            toml::from_str(&data).map_err(|e| TestCmpError::Serialization(e.to_string()))?;
        validate(&config)?;
        config
    } else {
        DiffConfig::default()
    };

    Ok(LoadedConfig {
        config,
        path: path.to_path_buf(),
        exists,
        portable: false,
    })
}

pub fn save_config(path: &Path, config: &DiffConfig) -> Result<(), TestCmpError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let data = toml::to_string_pretty(config)
        .map_err(|e| TestCmpError::Serialization(e.to_string()))?;
    fs::write(path, data)?;
    Ok(())
}

pub fn validate(config: &DiffConfig) -> Result<(), TestCmpError> {
    if !(config.tolerance >= 0.0) {
        return Err(TestCmpError::Config(format!(
            "tolerance must be a non-negative number, got {}",
            config.tolerance
        )));
    }
    Ok(())
}

fn resolve_config_path(prefer_portable: bool) -> Result<(PathBuf, bool), TestCmpError> {
    if let Some(portable_path) = portable_config_path() {
        if prefer_portable || portable_path.exists() {
            return Ok((portable_path, true));
        }
    }

    let dirs = ProjectDirs::from("", "", "testcmp")
        .ok_or_else(|| TestCmpError::Config("Unable to determine config directory".to_string()))?;
    Ok((dirs.config_dir().join(CONFIG_FILE_NAME), false))
}

fn portable_config_path() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
}
