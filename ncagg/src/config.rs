//! Ambient configuration: the handful of settings the dimension cache and
//! catalog server need at startup. Loaded from a TOML file, overridable by
//! environment variables so a container deploy doesn't need a file at all.

use serde::Deserialize;
use std::path::PathBuf;

/// Settings the dimension cache store requires, plus the data root used to
/// resolve member paths and the catalog root exposed over HTTP.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root directory for generated dimension-cache entries. Required.
    pub cache_directory: PathBuf,

    /// Lowercased filename prefix for cache entries. Required.
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Maximum total bytes (MiB) before the cache starts evicting entries.
    #[serde(default = "default_cache_size_mb")]
    pub cache_size_mb: u64,

    /// Root directory used to resolve member paths, both for mtime
    /// comparisons and for relative `scan`/`netcdf` locations in NcML.
    pub data_root_dir: PathBuf,

    /// HTTP bind address for the demo server binary.
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_cache_prefix() -> String {
    "ncagg_dimcache_".to_string()
}

fn default_cache_size_mb() -> u64 {
    64
}

fn default_bind() -> String {
    "127.0.0.1:8001".to_string()
}

impl Config {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Config> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Apply `NCAGG_*` environment variable overrides on top of a base
    /// config, mirroring the `env_logger::from_env` pattern used for
    /// logging configuration.
    pub fn with_env_overrides(mut self) -> Config {
        if let Ok(v) = std::env::var("NCAGG_CACHE_DIRECTORY") {
            self.cache_directory = v.into();
        }
        if let Ok(v) = std::env::var("NCAGG_CACHE_PREFIX") {
            self.cache_prefix = v;
        }
        if let Ok(v) = std::env::var("NCAGG_CACHE_SIZE_MB") {
            if let Ok(v) = v.parse() {
                self.cache_size_mb = v;
            }
        }
        if let Ok(v) = std::env::var("NCAGG_DATA_ROOT_DIR") {
            self.data_root_dir = v.into();
        }
        if let Ok(v) = std::env::var("NCAGG_BIND") {
            self.bind = v;
        }
        self
    }

    pub fn cache_size_bytes(&self) -> u64 {
        self.cache_size_mb * 1024 * 1024
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            cache_directory: PathBuf::from("./cache"),
            cache_prefix: default_cache_prefix(),
            cache_size_mb: default_cache_size_mb(),
            data_root_dir: PathBuf::from("./data"),
            bind: default_bind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let f = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            f.path(),
            r#"
            cache_directory = "/tmp/cache"
            data_root_dir = "/tmp/data"
            "#,
        )
        .unwrap();

        let c = Config::from_file(f.path()).unwrap();
        assert_eq!(c.cache_prefix, "ncagg_dimcache_");
        assert_eq!(c.cache_size_mb, 64);
    }
}
