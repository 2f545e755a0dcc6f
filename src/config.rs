//! Worker configuration: `worker.toml` plus custom function files.
//!
//! ```toml
//! [cache]
//! max_size = 1000
//! ttl_ms = 300000
//! ```
//!
//! Command-line flags override whatever the file sets.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use sheetcache_core::CacheConfig;

use crate::error::{Result, WorkerError};

const MAX_CONFIG_FILE_BYTES: u64 = 1_048_576; // 1 MiB
const MAX_FUNCTION_FILE_BYTES: u64 = 1_048_576; // 1 MiB

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    cache: Option<CacheSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheSection {
    max_size: Option<usize>,
    ttl_ms: Option<u64>,
}

/// Load the cache settings from `config_file`, or from the user's default
/// `worker.toml` when none is given.
///
/// Never fails: problems are reported as warnings and the defaults are used.
/// A missing default file is silently fine; a missing explicit file is not.
pub fn load_config(config_file: Option<&PathBuf>) -> (CacheConfig, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();
    let mut config = CacheConfig::default();
    let config_path = config_file.cloned().or_else(user_config_path);

    let Some(path) = config_path else {
        return (config, warnings);
    };
    if !path.exists() {
        if config_file.is_some() {
            warnings.push(format!("Config file not found: {}", path.display()));
        }
        return (config, warnings);
    }

    let parsed = read_capped(&path, MAX_CONFIG_FILE_BYTES)
        .map_err(|err| err.to_string())
        .and_then(|content| {
            toml::from_str::<ConfigFile>(&content)
                .map_err(|err| format!("Failed to parse {}: {}", path.display(), err))
        });

    match parsed {
        Ok(file) => {
            if let Some(cache) = file.cache {
                if let Some(max_size) = cache.max_size {
                    config.max_size = max_size;
                }
                if let Some(ttl_ms) = cache.ttl_ms {
                    config.ttl_ms = ttl_ms;
                }
            }
            log::debug!("loaded config from {}", path.display());
        }
        Err(warning) => warnings.push(warning),
    }

    if let Err(err) = config.validate() {
        warnings.push(format!("{} in {}; using defaults", err, path.display()));
        config = CacheConfig::default();
    }

    (config, warnings)
}

fn user_config_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("", "", "sheetcache")?;
    let mut path = proj.config_dir().to_path_buf();
    path.push("worker.toml");
    Some(path)
}

/// Read and merge custom Rhai function files, in order.
pub fn read_functions(paths: &[PathBuf]) -> Result<Option<String>> {
    if paths.is_empty() {
        return Ok(None);
    }
    let mut merged = String::new();
    for (idx, path) in paths.iter().enumerate() {
        let content = read_capped(path, MAX_FUNCTION_FILE_BYTES)?;
        if idx > 0 {
            merged.push_str("\n\n");
        }
        merged.push_str(&content);
    }
    Ok(Some(merged))
}

fn read_capped(path: &Path, max: u64) -> Result<String> {
    let meta = std::fs::metadata(path)?;
    if meta.len() > max {
        return Err(WorkerError::FileTooLarge {
            path: path.to_path_buf(),
            size: meta.len(),
            max,
        });
    }
    Ok(std::fs::read_to_string(path)?)
}
