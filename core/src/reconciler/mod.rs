//! The reconciliation loop.
//!
//! A [`Reconciler`] owns the ledger and is the only one mutating it. Every
//! `check_interval` it scans the slices with pending work, programs the switches it owns and
//! keeps track of what it dispatched. Completions come back as [`Event`]s on a channel and are
//! handled on the same task, so nothing here needs locking.

use std::sync::Arc;

use async_channel as chan;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
	config::{ControllerIdentity, ReconcilerConfig},
	error::{Result, StoreError},
	event::{Event, Outcome},
	infra::db::Database,
	ledger::{Ledger, TransactionContext},
	logging,
	overlay::{AgentResponse, HttpAgentClient, OverlayNetworkManager, OverlayStatus},
	registry::SwitchRegistry,
	store::Store,
	transport::Transport,
	Dpid,
};

mod finalize;
mod pass;

pub struct Reconciler {
	config: ReconcilerConfig,
	identity: ControllerIdentity,
	store: Arc<dyn Store>,
	registry: Arc<dyn SwitchRegistry>,
	transport: Arc<dyn Transport>,
	overlay: OverlayNetworkManager,
	ledger: Ledger,
	events_tx: chan::Sender<Event>,
	events_rx: chan::Receiver<Event>,
	responses_rx: chan::Receiver<AgentResponse>,
}

impl Reconciler {
	pub fn new(
		config: ReconcilerConfig,
		identity: ControllerIdentity,
		store: Arc<dyn Store>,
		registry: Arc<dyn SwitchRegistry>,
		transport: Arc<dyn Transport>,
		overlay: OverlayNetworkManager,
	) -> Self {
		let (events_tx, events_rx) = chan::unbounded();
		let responses_rx = overlay.responses();

		Self {
			config,
			identity,
			store,
			registry,
			transport,
			overlay,
			ledger: Ledger::new(),
			events_tx,
			events_rx,
			responses_rx,
		}
	}

	/// Wires a reconciler to the configured database and to the tunnel agents over HTTP.
	///
	/// Installs the global subscriber with the configured log level unless the embedder already
	/// installed one.
	pub async fn open(config: ReconcilerConfig, transport: Arc<dyn Transport>) -> Result<Self> {
		config.validate()?;
		if let Err(e) = logging::init(&config.log_level) {
			debug!(?e, "Keeping the installed tracing subscriber");
		}

		let identity = config.identity()?;
		let db = Database::open(&config).await.map_err(StoreError::from)?;
		let store = Arc::new(db.store());
		let agent = Arc::new(HttpAgentClient::new(config.overlay.http_timeout())?);

		let overlay = OverlayNetworkManager::new(
			store.clone(),
			store.clone(),
			agent,
			config.overlay.clone(),
		);

		Ok(Self::new(
			config,
			identity,
			store.clone(),
			store,
			transport,
			overlay,
		))
	}

	#[must_use]
	pub const fn ledger(&self) -> &Ledger {
		&self.ledger
	}

	#[must_use]
	pub const fn overlay(&self) -> &OverlayNetworkManager {
		&self.overlay
	}

	#[must_use]
	pub const fn identity(&self) -> &ControllerIdentity {
		&self.identity
	}

	/// Runs passes and handles completions until `stop_rx` fires or its sender goes away.
	pub async fn run(mut self, stop_rx: chan::Receiver<()>) {
		let mut check_interval = interval(self.config.check_interval());
		check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

		let mut port_wait_interval = interval(self.overlay.config().port_wait_interval());
		port_wait_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

		let events_rx = self.events_rx.clone();
		let responses_rx = self.responses_rx.clone();

		info!(
			host = %self.identity.host,
			pid = self.identity.pid,
			interval_ms = self.config.check_interval_ms,
			"Reconciler started",
		);

		loop {
			tokio::select! {
				_ = check_interval.tick() => self.tick().await,

				_ = port_wait_interval.tick() => {
					if self.overlay.awaiting_ports() {
						self.overlay.poll_ports().await;
					}
				}

				Ok(event) = events_rx.recv() => self.handle_event(event).await,

				Ok(response) = responses_rx.recv() => self.overlay.handle_response(response),

				_ = stop_rx.recv() => {
					info!(pending_slices = self.ledger.len(), "Reconciler stopping");
					break;
				}
			}
		}
	}

	/// Waits for the next completion or agent response and handles it.
	pub async fn step(&mut self) {
		let events_rx = self.events_rx.clone();
		let responses_rx = self.responses_rx.clone();

		tokio::select! {
			Ok(event) = events_rx.recv() => self.handle_event(event).await,
			Ok(response) = responses_rx.recv() => self.overlay.handle_response(response),
		}
	}

	/// Handles every completion and agent response already delivered, without waiting.
	pub async fn process_pending_events(&mut self) -> usize {
		let mut processed = 0;

		loop {
			if let Ok(response) = self.responses_rx.try_recv() {
				self.overlay.handle_response(response);
			} else if let Ok(event) = self.events_rx.try_recv() {
				self.handle_event(event).await;
			} else {
				break;
			}
			processed += 1;
		}

		processed
	}

	/// Checks the tunnel interfaces of overlay operations waiting on them.
	pub async fn poll_overlay_ports(&mut self) {
		self.overlay.poll_ports().await;
	}

	pub async fn handle_event(&mut self, event: Event) {
		match event {
			Event::TransactionCompleted { context, outcome } => {
				if self.ledger.port(context.port_key()).is_none() {
					warn!(
						?context,
						%outcome,
						"Completion for a transaction the ledger does not know",
					);
					return;
				}

				if outcome == Outcome::Failed {
					warn!(?context, "Device transaction failed");
					self.ledger.mark_failed(context);
				}
				self.ledger.decrement(context, 1);
				self.finalize(context.slice_id()).await;
			}

			Event::OverlayCompleted { key, status } => {
				if self.ledger.port(key).is_none() {
					warn!(
						?key,
						%status,
						"Overlay completion for a switch the ledger does not know",
					);
					return;
				}

				debug!(
					slice_id = key.slice_id,
					datapath_id = %Dpid(key.datapath_id),
					%status,
					"Overlay operation completed",
				);
				if status != OverlayStatus::Succeeded {
					self.ledger.mark_failed(TransactionContext::Port(key));
				}
				self.ledger.decrement_overlay(key);
				self.finalize(key.slice_id).await;
			}
		}
	}
}
