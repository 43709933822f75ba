//! Service configuration.
//!
//! Precedence, lowest to highest: built-in defaults, the config file at
//! `~/.fimflow/config.ini`, `FIMFLOW_*` environment variables, CLI flags
//! (applied by the binary after `Settings::load`).

mod file;

pub use file::{config_directory, config_file_path, ConfigFile, ConfigFileError};

use std::path::PathBuf;
use std::time::Duration;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8050;

/// Default worker claim poll interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Default grace window between terminate and kill on dismissal.
pub const DEFAULT_DISMISS_GRACE_SECS: u64 = 5;

/// Default per-job captured-output byte cap (in-memory buffering bound).
pub const DEFAULT_LOG_BYTE_CAP: usize = 8 * 1024 * 1024;

/// Default downstream friction slope for normal-depth boundaries.
pub const DEFAULT_NORMAL_DEPTH_SLOPE: f64 = 0.001;

/// Workers default to `max(cores − 2, 1)`.
pub fn default_worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cores.saturating_sub(2).max(1)
}

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub workers: usize,
    pub host: String,
    pub port: u16,
    /// Job store, pid file, logs, and DEM cache live here.
    pub data_dir: PathBuf,
    /// Reference-network parquet file.
    pub network_path: Option<PathBuf>,
    /// Elevation source URL or local path.
    pub dem_source: Option<String>,
    pub normal_depth_slope: f64,
    /// External solver command; unset selects the synthetic solver.
    pub solver_command: Option<String>,
    pub poll_interval: Duration,
    pub dismiss_grace: Duration,
    pub log_byte_cap: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from("."),
            network_path: None,
            dem_source: None,
            normal_depth_slope: DEFAULT_NORMAL_DEPTH_SLOPE,
            solver_command: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            dismiss_grace: Duration::from_secs(DEFAULT_DISMISS_GRACE_SECS),
            log_byte_cap: DEFAULT_LOG_BYTE_CAP,
        }
    }
}

impl Settings {
    /// Loads settings: defaults, then the config file, then environment.
    pub fn load() -> Self {
        let mut settings = Self::default();
        if let Ok(config) = ConfigFile::load() {
            settings.apply_file(&config);
        }
        settings.apply_env();
        settings
    }

    fn apply_file(&mut self, config: &ConfigFile) {
        if let Some(workers) = config.workers {
            self.workers = workers;
        }
        if let Some(host) = &config.host {
            self.host = host.clone();
        }
        if let Some(port) = config.port {
            self.port = port;
        }
        if let Some(data_dir) = &config.data_dir {
            self.data_dir = data_dir.clone();
        }
        if let Some(network_path) = &config.network_path {
            self.network_path = Some(network_path.clone());
        }
        if let Some(dem_source) = &config.dem_source {
            self.dem_source = Some(dem_source.clone());
        }
        if let Some(slope) = config.normal_depth_slope {
            self.normal_depth_slope = slope;
        }
        if let Some(solver) = &config.solver_command {
            self.solver_command = Some(solver.clone());
        }
    }

    fn apply_env(&mut self) {
        if let Some(workers) = env_parse("FIMFLOW_WORKERS") {
            self.workers = workers;
        }
        if let Ok(host) = std::env::var("FIMFLOW_HOST") {
            self.host = host;
        }
        if let Some(port) = env_parse("FIMFLOW_PORT") {
            self.port = port;
        }
        if let Ok(data_dir) = std::env::var("FIMFLOW_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }
        if let Ok(network) = std::env::var("FIMFLOW_NETWORK_PATH") {
            self.network_path = Some(PathBuf::from(network));
        }
        if let Ok(dem) = std::env::var("FIMFLOW_DEM_URL") {
            self.dem_source = Some(dem);
        }
        if let Some(slope) = env_parse("FIMFLOW_NORMAL_DEPTH_SLOPE") {
            self.normal_depth_slope = slope;
        }
        if let Ok(solver) = std::env::var("FIMFLOW_SOLVER_COMMAND") {
            self.solver_command = Some(solver);
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("jobs.db")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.data_dir.join("fimflow.pid")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_worker_count_floor() {
        assert!(default_worker_count() >= 1);
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.normal_depth_slope, 0.001);
        assert!(settings.solver_command.is_none());
        assert!(settings.store_path().ends_with("jobs.db"));
        assert!(settings.pid_path().ends_with("fimflow.pid"));
    }

    #[test]
    fn test_listen_address() {
        let settings = Settings {
            host: "127.0.0.1".to_string(),
            port: 9000,
            ..Default::default()
        };
        assert_eq!(settings.listen_address(), "127.0.0.1:9000");
    }
}
