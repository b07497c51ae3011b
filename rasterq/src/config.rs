//! `rasterq`'s layered configuration (spec.md §4.12 [ADDED]): built-in
//! defaults, overridden by an optional YAML file, overridden by CLI flags —
//! the same three-layer convention the teacher crate's CLI config follows
//! (`versatiles::config::Config::from_path` plus `tools::serve`'s
//! `override_optional_*` calls), minus the `versatiles_derive` proc-macro
//! sugar this workspace doesn't carry over.

use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("reading config file '{path}': {source}")]
	Read {
		path: String,
		#[source]
		source: std::io::Error,
	},
	#[error("parsing config file '{path}': {source}")]
	Parse {
		path: String,
		#[source]
		source: serde_yaml_ng::Error,
	},
}

/// Knobs a `Dataset` construction reads ahead of any raster-specific detail
/// (dtype, nodata, footprint — all programmatic, not configuration). Per-pool
/// worker counts default to the host's CPU count, the way `versatiles`'s
/// tile-conversion pipeline sizes its `buffer_unordered` concurrency.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
	pub max_queue_size: usize,
	pub io_pool_workers: usize,
	pub resample_pool_workers: usize,
	pub computation_pool_workers: usize,
	pub merge_pool_workers: usize,
	/// Where a real `RasterBackend` would persist cache tiles. Unused by
	/// `MockBackend`; present so a future on-disk backend has somewhere to
	/// read this from without another config layer.
	pub cache_dir: Option<String>,
}

impl Default for Config {
	fn default() -> Self {
		let cpus = num_cpus::get().max(1);
		Self {
			max_queue_size: 5,
			io_pool_workers: cpus,
			resample_pool_workers: cpus,
			computation_pool_workers: cpus,
			merge_pool_workers: cpus.max(1).min(2),
			cache_dir: None,
		}
	}
}

impl Config {
	/// # Errors
	/// Returns `ConfigError::Parse` on malformed YAML.
	pub fn from_string(text: &str) -> Result<Self, ConfigError> {
		serde_yaml_ng::from_str(text).map_err(|source| ConfigError::Parse { path: "<string>".into(), source })
	}

	/// # Errors
	/// Returns `ConfigError::Read` if the file can't be opened,
	/// `ConfigError::Parse` if its contents aren't valid YAML for this shape.
	pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
		let path_str = path.display().to_string();
		let file = File::open(path).map_err(|source| ConfigError::Read { path: path_str.clone(), source })?;
		serde_yaml_ng::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Parse { path: path_str, source })
	}

	/// Applies CLI flag overrides, the way `tools::serve`'s
	/// `override_optional_*` calls layer command-line arguments on top of a
	/// loaded config. Only `Some` values replace the current setting.
	pub fn override_max_queue_size(&mut self, value: Option<usize>) {
		if let Some(value) = value {
			self.max_queue_size = value;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn defaults_size_pools_to_cpu_count() {
		let cfg = Config::default();
		assert_eq!(cfg.max_queue_size, 5);
		assert!(cfg.io_pool_workers >= 1);
		assert_eq!(cfg.cache_dir, None);
	}

	#[test]
	fn parses_partial_yaml_over_defaults() {
		let cfg = Config::from_string("max_queue_size: 10\ncache_dir: /var/cache/rasterq\n").unwrap();
		assert_eq!(cfg.max_queue_size, 10);
		assert_eq!(cfg.cache_dir.as_deref(), Some("/var/cache/rasterq"));
		assert!(cfg.io_pool_workers >= 1);
	}

	#[test]
	fn rejects_unknown_fields() {
		let err = Config::from_string("bogus_field: 1").unwrap_err();
		assert!(matches!(err, ConfigError::Parse { .. }));
	}

	#[test]
	fn cli_override_replaces_only_when_some() {
		let mut cfg = Config::default();
		let default_workers = cfg.io_pool_workers;
		cfg.override_max_queue_size(None);
		assert_eq!(cfg.max_queue_size, 5);
		cfg.override_max_queue_size(Some(42));
		assert_eq!(cfg.max_queue_size, 42);
		assert_eq!(cfg.io_pool_workers, default_workers);
	}
}
