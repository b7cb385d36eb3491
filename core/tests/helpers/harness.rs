//! A reconciler wired to an in-memory store, a recording transport and a mock agent

use std::{net::Ipv4Addr, sync::Arc};

use vnm_core::{
	config::{ControllerIdentity, ReconcilerConfig},
	overlay::OverlayNetworkManager,
	registry::SwitchRegistry,
	state::{PortState, PortType, SliceState},
	store::{MemoryStore, PortRow, Reflector},
	DatapathId, PortId, Reconciler, SliceId,
};

use super::{MockAgent, RecordingTransport};

pub const DPID_A: DatapathId = 0x0000_0000_0000_0001;
pub const DPID_B: DatapathId = 0x0000_0000_0000_0002;

pub fn identity() -> ControllerIdentity {
	ControllerIdentity {
		host: "controller-1".to_string(),
		pid: 4242,
	}
}

pub fn other_identity() -> ControllerIdentity {
	ControllerIdentity {
		host: "controller-2".to_string(),
		pid: 1,
	}
}

pub struct Harness {
	pub store: Arc<MemoryStore>,
	pub transport: Arc<RecordingTransport>,
	pub agent: Arc<MockAgent>,
	pub reconciler: Reconciler,
}

impl Harness {
	pub fn new() -> Self {
		Self::with(ReconcilerConfig::default(), MockAgent::always(200))
	}

	pub fn with(config: ReconcilerConfig, agent: MockAgent) -> Self {
		let store = Arc::new(MemoryStore::new());
		let transport = Arc::new(RecordingTransport::default());
		let agent = Arc::new(agent);

		let overlay = OverlayNetworkManager::new(
			store.clone(),
			store.clone(),
			agent.clone(),
			config.overlay.clone(),
		);

		let reconciler = Reconciler::new(
			config,
			identity(),
			store.clone(),
			store.clone(),
			transport.clone(),
			overlay,
		);

		Self {
			store,
			transport,
			agent,
			reconciler,
		}
	}

	pub async fn own_switch(&self, datapath_id: DatapathId) {
		self.store.add_switch(datapath_id, &identity()).await.unwrap();
	}

	pub async fn slice(&self, slice_id: SliceId, state: SliceState) {
		self.store.insert_slice(slice_id, state).await;
	}

	pub async fn port(&self, row: PortRow) {
		self.store.insert_port(row).await;
	}

	/// Overlay network of `slice_id` reflected through a unicast reflector, with `datapath_id`
	/// owning a tunnel endpoint and an agent.
	pub async fn overlay_network(&self, slice_id: SliceId, datapath_id: DatapathId) {
		self.store.insert_overlay_network(slice_id, 1).await;
		self.store
			.insert_reflector(Reflector {
				group_id: 1,
				uri: "http://198.51.100.1:8080/".to_string(),
				broadcast_address: Ipv4Addr::new(198, 51, 100, 1),
				broadcast_port: 4789,
			})
			.await;
		self.store
			.insert_tunnel_endpoint(datapath_id, Ipv4Addr::new(192, 0, 2, 1), 4789)
			.await;
		self.store
			.insert_agent(datapath_id, "http://192.0.2.1:8080/")
			.await;
	}

	/// Handles completions until none is left.
	pub async fn drain_events(&mut self) -> usize {
		tokio::task::yield_now().await;
		self.reconciler.process_pending_events().await
	}

	/// Reports every dispatched transaction as succeeded and handles the completions.
	pub async fn succeed_all(&mut self) -> usize {
		let n = self.transport.succeed_all();
		self.drain_events().await;
		n
	}

	pub async fn port_state(&self, port_id: PortId) -> Option<PortState> {
		self.store.port(port_id).await.map(|port| port.state)
	}
}

pub fn customer_port(
	id: PortId,
	datapath_id: DatapathId,
	slice_id: SliceId,
	port_no: u16,
	vid: u16,
	state: PortState,
) -> PortRow {
	PortRow {
		id,
		datapath_id,
		slice_id,
		port_no,
		port_name: None,
		vid,
		port_type: PortType::Customer,
		state,
	}
}

pub fn overlay_port(
	id: PortId,
	datapath_id: DatapathId,
	slice_id: SliceId,
	port_no: u16,
	state: PortState,
) -> PortRow {
	PortRow {
		port_type: PortType::Overlay,
		..customer_port(id, datapath_id, slice_id, port_no, 0, state)
	}
}
