use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::Error;

/// Installs the global subscriber. `RUST_LOG` wins over `default_directive`.
pub fn init(default_directive: &str) -> Result<(), Error> {
	let filter = match EnvFilter::try_from_default_env() {
		Ok(filter) => filter,
		Err(_) => EnvFilter::try_new(default_directive).map_err(|e| Error::Logging(e.to_string()))?,
	};

	tracing_subscriber::registry()
		.with(filter)
		.with(
			fmt::layer()
				.with_target(true)
				.with_thread_ids(false)
				.with_ansi(true),
		)
		.try_init()
		.map_err(|e| Error::Logging(e.to_string()))
}
