//! Config file loading (`~/.fimflow/config.ini`).

use ini::Ini;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("could not determine home directory")]
    NoHomeDirectory,

    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file parse error: {0}")]
    Parse(String),
}

/// Directory holding the config file.
pub fn config_directory() -> Result<PathBuf, ConfigFileError> {
    dirs::home_dir()
        .map(|home| home.join(".fimflow"))
        .ok_or(ConfigFileError::NoHomeDirectory)
}

/// Full path of the config file.
pub fn config_file_path() -> Result<PathBuf, ConfigFileError> {
    Ok(config_directory()?.join("config.ini"))
}

/// Parsed config file values; every field is optional and falls back to the
/// built-in default when absent.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub workers: Option<usize>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub network_path: Option<PathBuf>,
    pub dem_source: Option<String>,
    pub normal_depth_slope: Option<f64>,
    pub solver_command: Option<String>,
}

impl ConfigFile {
    /// Loads the config file; a missing file yields the empty config.
    pub fn load() -> Result<Self, ConfigFileError> {
        let path = config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(&path).map_err(|e| ConfigFileError::Parse(e.to_string()))?;
        Ok(Self::from_ini(&ini))
    }

    fn from_ini(ini: &Ini) -> Self {
        let get = |section: &str, key: &str| -> Option<String> {
            ini.get_from(Some(section), key).map(str::to_string)
        };
        Self {
            workers: get("service", "workers").and_then(|v| v.parse().ok()),
            host: get("service", "host"),
            port: get("service", "port").and_then(|v| v.parse().ok()),
            data_dir: get("service", "data_dir").map(PathBuf::from),
            network_path: get("data", "network_path").map(PathBuf::from),
            dem_source: get("data", "dem_url"),
            normal_depth_slope: get("hydraulics", "normal_depth_slope")
                .and_then(|v| v.parse().ok()),
            solver_command: get("hydraulics", "solver_command"),
        }
    }

    /// Writes a commented default config file if none exists, returning its
    /// path.
    pub fn ensure_exists() -> Result<PathBuf, ConfigFileError> {
        let path = config_file_path()?;
        if path.exists() {
            return Ok(path);
        }
        std::fs::create_dir_all(config_directory()?)?;
        std::fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        Ok(path)
    }
}

const DEFAULT_CONFIG_TEMPLATE: &str = "\
[service]
# workers = 4
# host = 0.0.0.0
# port = 8050
# data_dir = /var/lib/fimflow

[data]
# network_path = /data/reference_network.parquet
# dem_url = https://example.com/seamless_dem.grid

[hydraulics]
# normal_depth_slope = 0.001
# solver_command = /opt/solver/run
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ini() {
        let mut ini = Ini::new();
        ini.with_section(Some("service"))
            .set("workers", "6")
            .set("port", "9100");
        ini.with_section(Some("hydraulics"))
            .set("normal_depth_slope", "0.002");
        let config = ConfigFile::from_ini(&ini);
        assert_eq!(config.workers, Some(6));
        assert_eq!(config.port, Some(9100));
        assert_eq!(config.normal_depth_slope, Some(0.002));
        assert!(config.host.is_none());
        assert!(config.solver_command.is_none());
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let mut ini = Ini::new();
        ini.with_section(Some("service")).set("workers", "many");
        let config = ConfigFile::from_ini(&ini);
        assert!(config.workers.is_none());
    }
}
