use std::path::PathBuf;

use thiserror::Error;

use crate::overlay::OverlayError;

/// Desired-state store errors
#[derive(Error, Debug)]
pub enum StoreError {
	#[error("Database error: {0}")]
	Database(#[from] sea_orm::DbErr),

	/// A persisted value that does not map to any known variant
	#[error("Invalid value in {table}.{column}: <value={value}>")]
	InvalidValue {
		table: &'static str,
		column: &'static str,
		value: i64,
	},

	#[error("Store is unavailable: {0}")]
	Unavailable(String),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("Failed to read config file <path={path:?}>: {source}")]
	Read {
		path: PathBuf,
		source: std::io::Error,
	},

	#[error("Failed to write config file <path={path:?}>: {source}")]
	Write {
		path: PathBuf,
		source: std::io::Error,
	},

	#[error("Failed to parse config: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("Failed to serialize config: {0}")]
	Serialize(#[from] toml::ser::Error),

	#[error("Failed to resolve controller hostname: {0}")]
	Hostname(std::io::Error),

	#[error("Invalid configuration: {0}")]
	Invalid(String),
}

#[derive(Error, Debug)]
pub enum Error {
	#[error(transparent)]
	Store(#[from] StoreError),

	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Overlay(#[from] OverlayError),

	#[error("Failed to initialize logging: {0}")]
	Logging(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
