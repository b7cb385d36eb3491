//! Reconciler configuration

use std::{
	fs,
	path::{Path, PathBuf},
	time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::ConfigError;

const fn default_check_interval_ms() -> u64 {
	1_000
}

const fn default_slices_per_pass() -> u64 {
	32
}

const fn default_switches_per_slice() -> u64 {
	128
}

const fn default_port_wait_interval_ms() -> u64 {
	1_000
}

const fn default_max_port_wait_attempts() -> u32 {
	10
}

const fn default_http_timeout_ms() -> u64 {
	5_000
}

fn default_database_url() -> String {
	"sqlite://vnm.db?mode=rwc".to_string()
}

fn default_log_level() -> String {
	"info".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
	/// Interval between two reconciliation passes
	#[serde(default = "default_check_interval_ms")]
	pub check_interval_ms: u64,

	/// Upper bound of slices scanned on each pass
	#[serde(default = "default_slices_per_pass")]
	pub slices_per_pass: u64,

	/// Upper bound of switches scanned per slice on each pass
	#[serde(default = "default_switches_per_slice")]
	pub switches_per_slice: u64,

	/// Host name this controller registers its switches under, defaults to the machine's one
	#[serde(default)]
	pub controller_host: Option<String>,

	#[serde(default = "default_database_url")]
	pub database_url: String,

	/// Filter directive of the global subscriber installed on open, `RUST_LOG` overrides it
	#[serde(default = "default_log_level")]
	pub log_level: String,

	#[serde(default)]
	pub overlay: OverlayConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayConfig {
	/// How often a switch is checked for the tunnel interface after an attach or detach
	#[serde(default = "default_port_wait_interval_ms")]
	pub port_wait_interval_ms: u64,

	#[serde(default = "default_max_port_wait_attempts")]
	pub max_port_wait_attempts: u32,

	#[serde(default = "default_http_timeout_ms")]
	pub http_timeout_ms: u64,
}

impl Default for OverlayConfig {
	fn default() -> Self {
		Self {
			port_wait_interval_ms: default_port_wait_interval_ms(),
			max_port_wait_attempts: default_max_port_wait_attempts(),
			http_timeout_ms: default_http_timeout_ms(),
		}
	}
}

impl Default for ReconcilerConfig {
	fn default() -> Self {
		Self {
			check_interval_ms: default_check_interval_ms(),
			slices_per_pass: default_slices_per_pass(),
			switches_per_slice: default_switches_per_slice(),
			controller_host: None,
			database_url: default_database_url(),
			log_level: default_log_level(),
			overlay: OverlayConfig::default(),
		}
	}
}

impl OverlayConfig {
	#[must_use]
	pub const fn port_wait_interval(&self) -> Duration {
		Duration::from_millis(self.port_wait_interval_ms)
	}

	#[must_use]
	pub const fn http_timeout(&self) -> Duration {
		Duration::from_millis(self.http_timeout_ms)
	}
}

/// Host and process a controller instance is identified by in the switch registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerIdentity {
	pub host: String,
	pub pid: u32,
}

impl ControllerIdentity {
	/// The identity of the running process.
	pub fn current(host_override: Option<&str>) -> Result<Self, ConfigError> {
		let host = match host_override {
			Some(host) => host.to_string(),
			None => hostname::get()
				.map_err(ConfigError::Hostname)?
				.to_string_lossy()
				.into_owned(),
		};

		Ok(Self {
			host,
			pid: std::process::id(),
		})
	}
}

impl ReconcilerConfig {
	pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
		let config = toml::from_str::<Self>(contents)?;
		config.validate()?;
		Ok(config)
	}

	/// Loads the configuration file, falling back to defaults when it does not exist.
	pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();

		if !path.exists() {
			warn!(path = %path.display(), "No config file found, using defaults");
			return Ok(Self::default());
		}

		info!(path = %path.display(), "Loading reconciler config");
		let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;

		Self::from_toml_str(&contents)
	}

	pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
		let path = path.as_ref();
		let contents = toml::to_string_pretty(self)?;

		fs::write(path, contents).map_err(|source| ConfigError::Write {
			path: PathBuf::from(path),
			source,
		})
	}

	pub fn identity(&self) -> Result<ControllerIdentity, ConfigError> {
		ControllerIdentity::current(self.controller_host.as_deref())
	}

	#[must_use]
	pub const fn check_interval(&self) -> Duration {
		Duration::from_millis(self.check_interval_ms)
	}

	pub(crate) fn validate(&self) -> Result<(), ConfigError> {
		if self.check_interval_ms == 0 {
			return Err(ConfigError::Invalid(
				"check_interval_ms must be greater than zero".to_string(),
			));
		}
		if self.slices_per_pass == 0 || self.switches_per_slice == 0 {
			return Err(ConfigError::Invalid(
				"pass limits must be greater than zero".to_string(),
			));
		}
		if self.overlay.port_wait_interval_ms == 0 {
			return Err(ConfigError::Invalid(
				"overlay.port_wait_interval_ms must be greater than zero".to_string(),
			));
		}
		if let Err(e) = EnvFilter::try_new(&self.log_level) {
			return Err(ConfigError::Invalid(format!(
				"log_level <directive={}>: {e}",
				self.log_level
			)));
		}

		Ok(())
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
	use super::*;

	#[test]
	fn defaults_fill_missing_fields() {
		let config = ReconcilerConfig::from_toml_str(
			r#"
			slices_per_pass = 8

			[overlay]
			max_port_wait_attempts = 3
			"#,
		)
		.unwrap();

		assert_eq!(config.slices_per_pass, 8);
		assert_eq!(config.switches_per_slice, 128);
		assert_eq!(config.check_interval(), Duration::from_secs(1));
		assert_eq!(config.overlay.max_port_wait_attempts, 3);
		assert_eq!(config.overlay.port_wait_interval(), Duration::from_secs(1));
	}

	#[test]
	fn rejects_zero_interval() {
		assert!(matches!(
			ReconcilerConfig::from_toml_str("check_interval_ms = 0"),
			Err(ConfigError::Invalid(_))
		));
	}

	#[test]
	fn rejects_invalid_log_level() {
		assert!(matches!(
			ReconcilerConfig::from_toml_str(r#"log_level = "vnm_core=loud""#),
			Err(ConfigError::Invalid(_))
		));
		assert_eq!(
			ReconcilerConfig::from_toml_str(r#"log_level = "vnm_core=debug,sea_orm=warn""#)
				.unwrap()
				.log_level,
			"vnm_core=debug,sea_orm=warn"
		);
	}

	#[test]
	fn save_and_load() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("vnm.toml");

		let config = ReconcilerConfig {
			controller_host: Some("controller-1".to_string()),
			..Default::default()
		};
		config.save(&path).unwrap();

		assert_eq!(ReconcilerConfig::load_from(&path).unwrap(), config);
		assert_eq!(
			ReconcilerConfig::load_from(dir.path().join("missing.toml")).unwrap(),
			ReconcilerConfig::default()
		);
	}

	#[test]
	fn identity_uses_override() {
		let identity = ControllerIdentity::current(Some("controller-1")).unwrap();
		assert_eq!(identity.host, "controller-1");
		assert_eq!(identity.pid, std::process::id());
	}
}
