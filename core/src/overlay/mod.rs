//! Attachment of switches to the overlay network of a slice.
//!
//! Attaching registers the switch's tunnel endpoint on the slice's packet reflectors (unless the
//! slice floods over multicast) and asks the switch's tunnel agent to create the `vxlan{vni}`
//! interface. Detaching undoes both. Each `(switch, vni)` pair has at most one operation in
//! flight; its outcome is reported through the callback given when it started.

use std::{collections::HashMap, fmt, net::Ipv4Addr, sync::Arc};

use async_channel as chan;
use async_trait::async_trait;
use serde_json::json;
use strum::Display;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
	config::OverlayConfig, error::StoreError, registry::SwitchRegistry, DatapathId, Dpid,
};

mod agent;

pub use agent::{AgentClient, AgentRequest, HttpAgentClient, HttpMethod};

/// Largest virtual network identifier, VNIs are 24 bits wide.
pub const VNI_MASK: u32 = 0x00ff_ffff;

/// Status code agents answer with when asked to add a network they already carry.
const HTTP_ALREADY_ADDED: u16 = 440;
const HTTP_NOT_FOUND: u16 = 404;

#[derive(Error, Debug)]
pub enum OverlayError {
	#[error("HTTP request failed: {0}")]
	Http(#[from] reqwest::Error),

	#[error(transparent)]
	Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OverlayStatus {
	Succeeded,
	InProgress,
	Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum OverlayOperation {
	Attach,
	Detach,
}

impl OverlayOperation {
	const fn accepts(self, status: u16) -> bool {
		matches!(
			(self, status),
			(_, 200..=299)
				| (Self::Attach, HTTP_ALREADY_ADDED)
				| (Self::Detach, HTTP_NOT_FOUND)
		)
	}
}

/// Name of the tunnel interface carrying a slice on a switch.
#[must_use]
pub fn overlay_interface_name(vni: u32) -> String {
	format!("vxlan{vni}")
}

/// Reflector addresses must be routable unicast or multicast IPv4.
#[must_use]
pub fn valid_reflector_address(address: Ipv4Addr) -> bool {
	!address.is_unspecified() && address != Ipv4Addr::LOCALHOST && address.octets()[0] < 240
}

/// Where a switch's tunnel endpoint lives and how a slice's broadcast traffic is carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayInfo {
	pub agent_uri: String,
	pub local_address: Ipv4Addr,
	pub local_port: u16,
	pub broadcast_address: Ipv4Addr,
	pub broadcast_port: u16,
	pub reflector_uris: Vec<String>,
}

#[async_trait]
pub trait OverlayDirectory: Send + Sync {
	async fn overlay_info(
		&self,
		datapath_id: DatapathId,
		vni: u32,
	) -> Result<Option<OverlayInfo>, StoreError>;
}

pub type OverlayCallback = Box<dyn FnOnce(OverlayStatus) + Send + Sync>;

/// Completion of one agent request, delivered on [`OverlayNetworkManager::responses`].
#[derive(Debug)]
pub struct AgentResponse {
	datapath_id: DatapathId,
	vni: u32,
	uri: String,
	result: Result<u16, OverlayError>,
}

struct Transaction {
	operation: OverlayOperation,
	callback: OverlayCallback,
	pending_requests: usize,
	failed_requests: usize,
	/// Number of interface checks done so far, `None` while requests are in flight
	port_checks: Option<u32>,
}

impl fmt::Debug for Transaction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Transaction")
			.field("operation", &self.operation)
			.field("pending_requests", &self.pending_requests)
			.field("failed_requests", &self.failed_requests)
			.field("port_checks", &self.port_checks)
			.finish_non_exhaustive()
	}
}

pub struct OverlayNetworkManager {
	directory: Arc<dyn OverlayDirectory>,
	registry: Arc<dyn SwitchRegistry>,
	agent: Arc<dyn AgentClient>,
	config: OverlayConfig,
	transactions: HashMap<(DatapathId, u32), Transaction>,
	responses_tx: chan::Sender<AgentResponse>,
	responses_rx: chan::Receiver<AgentResponse>,
}

impl OverlayNetworkManager {
	pub fn new(
		directory: Arc<dyn OverlayDirectory>,
		registry: Arc<dyn SwitchRegistry>,
		agent: Arc<dyn AgentClient>,
		config: OverlayConfig,
	) -> Self {
		let (responses_tx, responses_rx) = chan::unbounded();

		Self {
			directory,
			registry,
			agent,
			config,
			transactions: HashMap::new(),
			responses_tx,
			responses_rx,
		}
	}

	#[must_use]
	pub const fn config(&self) -> &OverlayConfig {
		&self.config
	}

	/// Receiving end of agent request completions, to be fed back into
	/// [`Self::handle_response`].
	#[must_use]
	pub fn responses(&self) -> chan::Receiver<AgentResponse> {
		self.responses_rx.clone()
	}

	#[must_use]
	pub fn in_flight(&self) -> usize {
		self.transactions.len()
	}

	/// Whether any transaction is waiting on the switch's tunnel interface.
	#[must_use]
	pub fn awaiting_ports(&self) -> bool {
		self.transactions
			.values()
			.any(|transaction| transaction.port_checks.is_some())
	}

	pub async fn attach(
		&mut self,
		datapath_id: DatapathId,
		vni: u32,
		callback: OverlayCallback,
	) -> OverlayStatus {
		self.start(OverlayOperation::Attach, datapath_id, vni, callback)
			.await
	}

	pub async fn detach(
		&mut self,
		datapath_id: DatapathId,
		vni: u32,
		callback: OverlayCallback,
	) -> OverlayStatus {
		self.start(OverlayOperation::Detach, datapath_id, vni, callback)
			.await
	}

	async fn start(
		&mut self,
		operation: OverlayOperation,
		datapath_id: DatapathId,
		vni: u32,
		callback: OverlayCallback,
	) -> OverlayStatus {
		if vni & !VNI_MASK != 0 {
			warn!(vni, "Invalid virtual network identifier");
			return OverlayStatus::Failed;
		}

		if let Some(transaction) = self.transactions.get(&(datapath_id, vni)) {
			return if transaction.operation == operation {
				OverlayStatus::InProgress
			} else {
				warn!(
					datapath_id = %Dpid(datapath_id),
					vni,
					%operation,
					in_flight = %transaction.operation,
					"Another overlay operation is in progress",
				);
				OverlayStatus::Failed
			};
		}

		let info = match self.directory.overlay_info(datapath_id, vni).await {
			Ok(Some(info)) if valid_reflector_address(info.broadcast_address) => info,
			Ok(Some(info)) => {
				warn!(
					datapath_id = %Dpid(datapath_id),
					vni,
					broadcast_address = %info.broadcast_address,
					"Invalid broadcast address",
				);
				return OverlayStatus::Failed;
			}
			Ok(None) => {
				warn!(datapath_id = %Dpid(datapath_id), vni, "No overlay network found");
				return OverlayStatus::Failed;
			}
			Err(e) => {
				warn!(
					datapath_id = %Dpid(datapath_id),
					vni,
					?e,
					"Failed to retrieve overlay network",
				);
				return OverlayStatus::Failed;
			}
		};

		let requests = build_requests(operation, vni, &info);

		info!(
			datapath_id = %Dpid(datapath_id),
			vni,
			%operation,
			requests = requests.len(),
			"Starting overlay operation",
		);

		self.transactions.insert(
			(datapath_id, vni),
			Transaction {
				operation,
				callback,
				pending_requests: requests.len(),
				failed_requests: 0,
				port_checks: None,
			},
		);

		for request in requests {
			let agent = Arc::clone(&self.agent);
			let responses_tx = self.responses_tx.clone();

			tokio::spawn(async move {
				let uri = request.uri.clone();
				let result = agent.send(request).await;

				if responses_tx
					.send(AgentResponse {
						datapath_id,
						vni,
						uri,
						result,
					})
					.await
					.is_err()
				{
					warn!("Overlay manager is gone, dropping agent response");
				}
			});
		}

		OverlayStatus::Succeeded
	}

	pub fn handle_response(&mut self, response: AgentResponse) {
		let AgentResponse {
			datapath_id,
			vni,
			uri,
			result,
		} = response;

		let Some(transaction) = self.transactions.get_mut(&(datapath_id, vni)) else {
			warn!(
				datapath_id = %Dpid(datapath_id),
				vni,
				%uri,
				"Response for an unknown overlay operation",
			);
			return;
		};

		transaction.pending_requests = transaction.pending_requests.saturating_sub(1);

		match result {
			Ok(status) if transaction.operation.accepts(status) => {
				debug!(
					datapath_id = %Dpid(datapath_id),
					vni,
					%uri,
					status,
					"Agent request succeeded",
				);
			}
			Ok(status) => {
				warn!(datapath_id = %Dpid(datapath_id), vni, %uri, status, "Agent request failed");
				transaction.failed_requests += 1;
			}
			Err(e) => {
				warn!(datapath_id = %Dpid(datapath_id), vni, %uri, ?e, "Agent request failed");
				transaction.failed_requests += 1;
			}
		}

		if transaction.pending_requests > 0 {
			return;
		}

		if transaction.failed_requests == 0 {
			transaction.port_checks = Some(0);
		} else {
			self.finish(datapath_id, vni, OverlayStatus::Failed);
		}
	}

	/// Checks every transaction waiting on its tunnel interface, giving up on those that ran out
	/// of attempts.
	pub async fn poll_ports(&mut self) {
		let waiting = self
			.transactions
			.iter()
			.filter_map(|(key, transaction)| {
				transaction
					.port_checks
					.map(|checks| (*key, transaction.operation, checks))
			})
			.collect::<Vec<_>>();

		for ((datapath_id, vni), operation, checks) in waiting {
			let name = overlay_interface_name(vni);

			let present = match self.registry.port_number_by_name(datapath_id, &name).await {
				Ok(port_no) => Some(port_no.is_some()),
				Err(e) => {
					warn!(
						datapath_id = %Dpid(datapath_id),
						%name,
						?e,
						"Failed to look up tunnel interface",
					);
					None
				}
			};

			let converged = matches!(
				(operation, present),
				(OverlayOperation::Attach, Some(true)) | (OverlayOperation::Detach, Some(false))
			);

			if converged {
				self.finish(datapath_id, vni, OverlayStatus::Succeeded);
				continue;
			}

			let checks = checks + 1;
			if checks >= self.config.max_port_wait_attempts {
				warn!(
					datapath_id = %Dpid(datapath_id),
					%name,
					%operation,
					checks,
					"Tunnel interface did not converge",
				);
				self.finish(datapath_id, vni, OverlayStatus::Failed);
			} else if let Some(transaction) = self.transactions.get_mut(&(datapath_id, vni)) {
				transaction.port_checks = Some(checks);
			}
		}
	}

	fn finish(&mut self, datapath_id: DatapathId, vni: u32, status: OverlayStatus) {
		if let Some(transaction) = self.transactions.remove(&(datapath_id, vni)) {
			info!(
				datapath_id = %Dpid(datapath_id),
				vni,
				operation = %transaction.operation,
				%status,
				"Overlay operation finished",
			);
			(transaction.callback)(status);
		}
	}
}

fn build_requests(operation: OverlayOperation, vni: u32, info: &OverlayInfo) -> Vec<AgentRequest> {
	let unicast = !info.broadcast_address.is_multicast();
	let mut requests = Vec::with_capacity(info.reflector_uris.len() + 1);

	match operation {
		OverlayOperation::Attach => {
			if unicast {
				requests.extend(info.reflector_uris.iter().map(|uri| {
					AgentRequest::post(
						format!("{uri}reflector/{vni}"),
						json!({ "ip": info.local_address.to_string(), "port": info.local_port }),
					)
				}));
			}
			requests.push(AgentRequest::post(
				format!("{}overlay_networks", info.agent_uri),
				json!({
					"vni": vni,
					"broadcast": format!("{}:{}", info.broadcast_address, info.broadcast_port),
				}),
			));
		}
		OverlayOperation::Detach => {
			requests.push(AgentRequest::delete(format!(
				"{}overlay_networks/{vni}",
				info.agent_uri
			)));
			if unicast {
				requests.extend(info.reflector_uris.iter().map(|uri| {
					AgentRequest::delete(format!("{uri}reflector/{vni}/{}", info.local_address))
				}));
			}
		}
	}

	requests
}
