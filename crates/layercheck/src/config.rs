//! Harness configuration: defaults, an optional JSON file, then env overrides.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::spec::DeviceType;
use crate::env;

pub const CONFIG_PATH_VAR: &str = "LAYERCHECK_CONFIG";
pub const DEVICE_VAR: &str = "LAYERCHECK_DEVICE";
pub const DEVICE_ID_VAR: &str = "LAYERCHECK_DEVICE_ID";
pub const LIBRARY_PATH_VAR: &str = "LAYERCHECK_LIBRARY_PATH";
pub const THREADS_VAR: &str = "LAYERCHECK_THREADS";
pub const ITERATIONS_VAR: &str = "LAYERCHECK_ITERATIONS";
pub const PRINT_BENCH_VAR: &str = "LAYERCHECK_PRINT_BENCH";
pub const BENCHMARK_VAR: &str = "LAYERCHECK_BENCHMARK";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Settings shared by every test in a suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Candidate device checked against the reference.
    pub device_type: DeviceType,
    pub device_id: i32,
    /// Extension library loaded into the candidate context.
    pub library_path: Option<PathBuf>,
    /// Candidate thread count; values below 1 mean 1.
    pub threads: usize,
    /// Timed candidate forward passes per test; values below 1 mean 1.
    pub iterations: usize,
    /// Log latency and throughput after every operator run.
    pub print_benchmark: bool,
    /// Skip the reference forward and the comparison; only time the candidate.
    pub benchmark_mode: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::Packed,
            device_id: 0,
            library_path: None,
            threads: 1,
            iterations: 1,
            print_benchmark: false,
            benchmark_mode: false,
        }
    }
}

impl HarnessConfig {
    /// Loads `LAYERCHECK_CONFIG` when set, then applies per-field env overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base = match env::var(CONFIG_PATH_VAR) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        base.with_overrides(env::var)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies overrides looked up by variable name.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(device) = lookup(DEVICE_VAR) {
            self.device_type = DeviceType::from(device);
        }
        if let Some(value) = lookup(DEVICE_ID_VAR) {
            self.device_id = parse_value(DEVICE_ID_VAR, &value)?;
        }
        if let Some(path) = lookup(LIBRARY_PATH_VAR) {
            self.library_path = Some(PathBuf::from(path));
        }
        if let Some(value) = lookup(THREADS_VAR) {
            self.threads = parse_value(THREADS_VAR, &value)?;
        }
        if let Some(value) = lookup(ITERATIONS_VAR) {
            self.iterations = parse_value(ITERATIONS_VAR, &value)?;
        }
        if let Some(value) = lookup(PRINT_BENCH_VAR) {
            self.print_benchmark = env::parse_bool(&value);
        }
        if let Some(value) = lookup(BENCHMARK_VAR) {
            self.benchmark_mode = env::parse_bool(&value);
        }
        Ok(self)
    }

    pub fn with_device(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn effective_threads(&self) -> usize {
        self.threads.max(1)
    }

    pub fn effective_iterations(&self) -> usize {
        self.iterations.max(1)
    }

    pub fn library_paths(&self) -> Vec<PathBuf> {
        self.library_path.iter().cloned().collect()
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn overrides_replace_defaults() {
        let config = HarnessConfig::default()
            .with_overrides(lookup(&[
                (DEVICE_VAR, "naive"),
                (THREADS_VAR, "4"),
                (ITERATIONS_VAR, "0"),
                (PRINT_BENCH_VAR, "yes"),
            ]))
            .unwrap();
        assert_eq!(config.device_type, DeviceType::Naive);
        assert_eq!(config.effective_threads(), 4);
        assert_eq!(config.effective_iterations(), 1);
        assert!(config.print_benchmark);
        assert!(!config.benchmark_mode);
        assert!(config.library_paths().is_empty());
    }

    #[test]
    fn rejects_malformed_numbers() {
        let err = HarnessConfig::default()
            .with_overrides(lookup(&[(THREADS_VAR, "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == THREADS_VAR));
    }

    #[test]
    fn file_fields_default_when_missing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"device_type":"opencl","iterations":5}}"#).unwrap();
        let config = HarnessConfig::from_file(file.path()).unwrap();
        assert_eq!(config.device_type, DeviceType::Custom("opencl".to_string()));
        assert_eq!(config.iterations, 5);
        assert_eq!(config.threads, 1);
    }
}
