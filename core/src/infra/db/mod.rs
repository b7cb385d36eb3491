//! Database infrastructure using SeaORM

use std::time::Duration;

use sea_orm::{ConnectOptions, Database as SeaDatabase, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use crate::config::ReconcilerConfig;

pub mod entities;
pub mod migration;
mod store;

pub use store::SqlStore;

/// Connection to the network database
pub struct Database {
	conn: DatabaseConnection,
}

impl Database {
	/// Connects to the database at `url`, e.g. `sqlite://vnm.db?mode=rwc`.
	pub async fn connect(url: &str) -> Result<Self, DbErr> {
		let mut opt = ConnectOptions::new(url);
		opt.max_connections(10)
			.min_connections(1)
			.connect_timeout(Duration::from_secs(8))
			.idle_timeout(Duration::from_secs(8))
			.sqlx_logging(false);

		let conn = SeaDatabase::connect(opt).await?;

		info!(%url, "Connected to network database");

		Ok(Self { conn })
	}

	/// Connects to the configured database and brings its schema up to date.
	pub async fn open(config: &ReconcilerConfig) -> Result<Self, DbErr> {
		let db = Self::connect(&config.database_url).await?;
		db.migrate().await?;
		Ok(db)
	}

	/// Private in-memory database, every pooled connection would otherwise get its own.
	pub async fn in_memory() -> Result<Self, DbErr> {
		let mut opt = ConnectOptions::new("sqlite::memory:");
		opt.max_connections(1)
			.min_connections(1)
			.idle_timeout(Duration::from_secs(3600))
			.sqlx_logging(false);

		Ok(Self {
			conn: SeaDatabase::connect(opt).await?,
		})
	}

	pub async fn migrate(&self) -> Result<(), DbErr> {
		migration::Migrator::up(&self.conn, None).await?;
		info!("Database migrations completed successfully");
		Ok(())
	}

	#[must_use]
	pub const fn conn(&self) -> &DatabaseConnection {
		&self.conn
	}

	/// Store, registry and overlay directory backed by this database.
	#[must_use]
	pub fn store(&self) -> SqlStore {
		SqlStore::new(self.conn.clone())
	}
}
