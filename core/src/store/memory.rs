use std::{
	collections::{BTreeMap, BTreeSet, HashMap},
	net::Ipv4Addr,
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use vnm_openflow::MacAddress;

use super::{MacRow, PortRow, SliceSettlement, Store};
use crate::{
	config::ControllerIdentity,
	error::StoreError,
	ledger::PortKey,
	overlay::{OverlayDirectory, OverlayInfo},
	registry::SwitchRegistry,
	state::{MacState, PortState, SliceState},
	DatapathId, PortId, SliceId,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reflector {
	pub group_id: u32,
	pub uri: String,
	pub broadcast_address: Ipv4Addr,
	pub broadcast_port: u16,
}

#[derive(Debug, Default)]
struct Tables {
	slices: BTreeMap<SliceId, SliceState>,
	ports: BTreeMap<PortId, PortRow>,
	mac_addresses: Vec<MacRow>,
	switches: HashMap<DatapathId, ControllerIdentity>,
	switch_ports: BTreeMap<(DatapathId, u16), String>,
	/// slice id to reflector group
	overlay_networks: HashMap<SliceId, u32>,
	reflectors: Vec<Reflector>,
	tunnel_endpoints: HashMap<DatapathId, (Ipv4Addr, u16)>,
	agents: HashMap<DatapathId, String>,
	unavailable: bool,
}

impl Tables {
	fn check(&self) -> Result<(), StoreError> {
		if self.unavailable {
			Err(StoreError::Unavailable("memory store switched off".to_string()))
		} else {
			Ok(())
		}
	}

	fn slice_ports(&self, slice_id: SliceId) -> impl Iterator<Item = &PortRow> {
		self.ports
			.values()
			.filter(move |port| port.slice_id == slice_id)
	}
}

/// Desired-state store kept in process memory.
///
/// Also acts as switch registry and overlay directory, which is what tests and embedders
/// without a database need.
#[derive(Debug, Default)]
pub struct MemoryStore {
	tables: Mutex<Tables>,
}

impl MemoryStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes every following call fail until switched back on.
	pub async fn set_unavailable(&self, unavailable: bool) {
		self.tables.lock().await.unavailable = unavailable;
	}

	pub async fn insert_slice(&self, slice_id: SliceId, state: SliceState) {
		self.tables.lock().await.slices.insert(slice_id, state);
	}

	pub async fn set_slice_state(&self, slice_id: SliceId, state: SliceState) {
		self.insert_slice(slice_id, state).await;
	}

	pub async fn slice_state(&self, slice_id: SliceId) -> Option<SliceState> {
		self.tables.lock().await.slices.get(&slice_id).copied()
	}

	pub async fn insert_port(&self, port: PortRow) {
		self.tables.lock().await.ports.insert(port.id, port);
	}

	pub async fn set_port_state(&self, port_id: PortId, state: PortState) {
		if let Some(port) = self.tables.lock().await.ports.get_mut(&port_id) {
			port.state = state;
		}
	}

	pub async fn port(&self, port_id: PortId) -> Option<PortRow> {
		self.tables.lock().await.ports.get(&port_id).cloned()
	}

	pub async fn insert_mac(&self, mac: MacRow) {
		self.tables.lock().await.mac_addresses.push(mac);
	}

	pub async fn mac_state(
		&self,
		slice_id: SliceId,
		port_id: PortId,
		mac: MacAddress,
	) -> Option<MacState> {
		self.tables
			.lock()
			.await
			.mac_addresses
			.iter()
			.find(|row| row.slice_id == slice_id && row.port_id == port_id && row.mac == mac)
			.map(|row| row.state)
	}

	pub async fn insert_overlay_network(&self, slice_id: SliceId, reflector_group_id: u32) {
		self.tables
			.lock()
			.await
			.overlay_networks
			.insert(slice_id, reflector_group_id);
	}

	pub async fn insert_reflector(&self, reflector: Reflector) {
		self.tables.lock().await.reflectors.push(reflector);
	}

	pub async fn insert_tunnel_endpoint(
		&self,
		datapath_id: DatapathId,
		local_address: Ipv4Addr,
		local_port: u16,
	) {
		self.tables
			.lock()
			.await
			.tunnel_endpoints
			.insert(datapath_id, (local_address, local_port));
	}

	pub async fn insert_agent(&self, datapath_id: DatapathId, uri: impl Into<String>) {
		self.tables
			.lock()
			.await
			.agents
			.insert(datapath_id, uri.into());
	}
}

#[async_trait]
impl Store for MemoryStore {
	async fn slices_to_update(&self, limit: u64) -> Result<Vec<SliceId>, StoreError> {
		let tables = self.tables.lock().await;
		tables.check()?;

		Ok(tables
			.slices
			.iter()
			.filter(|(_, state)| SliceState::PENDING.contains(*state))
			.map(|(slice_id, _)| *slice_id)
			.take(usize::try_from(limit).unwrap_or(usize::MAX))
			.collect())
	}

	async fn update_slice_states(
		&self,
		from: SliceState,
		to: SliceState,
	) -> Result<u64, StoreError> {
		let mut tables = self.tables.lock().await;
		tables.check()?;

		let mut updated = 0;
		for state in tables.slices.values_mut().filter(|state| **state == from) {
			*state = to;
			updated += 1;
		}

		Ok(updated)
	}

	async fn switches_to_update(
		&self,
		slice_id: SliceId,
		limit: u64,
	) -> Result<Vec<DatapathId>, StoreError> {
		let tables = self.tables.lock().await;
		tables.check()?;

		Ok(tables
			.slice_ports(slice_id)
			.filter(|port| SliceState::PENDING.contains(&port.state))
			.map(|port| port.datapath_id)
			.collect::<BTreeSet<_>>()
			.into_iter()
			.take(usize::try_from(limit).unwrap_or(usize::MAX))
			.collect())
	}

	async fn update_port_states(
		&self,
		key: PortKey,
		from: PortState,
		to: PortState,
	) -> Result<u64, StoreError> {
		let mut tables = self.tables.lock().await;
		tables.check()?;

		let mut updated = 0;
		for port in tables.ports.values_mut().filter(|port| {
			port.slice_id == key.slice_id
				&& port.datapath_id == key.datapath_id
				&& port.state == from
		}) {
			port.state = to;
			updated += 1;
		}

		Ok(updated)
	}

	async fn ports(&self, key: PortKey, states: &[PortState]) -> Result<Vec<PortRow>, StoreError> {
		let tables = self.tables.lock().await;
		tables.check()?;

		Ok(tables
			.slice_ports(key.slice_id)
			.filter(|port| port.datapath_id == key.datapath_id && states.contains(&port.state))
			.cloned()
			.collect())
	}

	async fn update_mac_states(
		&self,
		slice_id: SliceId,
		port_id: PortId,
		from: MacState,
		to: MacState,
	) -> Result<u64, StoreError> {
		let mut tables = self.tables.lock().await;
		tables.check()?;

		let mut updated = 0;
		for row in tables.mac_addresses.iter_mut().filter(|row| {
			row.slice_id == slice_id && row.port_id == port_id && row.state == from
		}) {
			row.state = to;
			updated += 1;
		}

		Ok(updated)
	}

	async fn mac_addresses(
		&self,
		slice_id: SliceId,
		port_id: PortId,
		state: MacState,
	) -> Result<Vec<MacAddress>, StoreError> {
		let tables = self.tables.lock().await;
		tables.check()?;

		Ok(tables
			.mac_addresses
			.iter()
			.filter(|row| row.slice_id == slice_id && row.port_id == port_id && row.state == state)
			.map(|row| row.mac)
			.collect())
	}

	async fn settle_slice(
		&self,
		slice_id: SliceId,
		settlement: SliceSettlement,
	) -> Result<bool, StoreError> {
		let mut tables = self.tables.lock().await;
		tables.check()?;

		if tables.slices.get(&slice_id) != Some(&settlement.from) {
			return Ok(false);
		}

		let pending = tables
			.slice_ports(slice_id)
			.any(|port| SliceState::PENDING.contains(&port.state));
		let failed = tables
			.slice_ports(slice_id)
			.any(|port| SliceState::FAILED.contains(&port.state));

		if pending || failed != settlement.with_failed_ports {
			return Ok(false);
		}

		if settlement.to == SliceState::Destroyed {
			tables.slices.remove(&slice_id);
		} else {
			tables.slices.insert(slice_id, settlement.to);
		}

		Ok(true)
	}

	async fn purge_slice(&self, slice_id: SliceId) -> Result<(u64, u64), StoreError> {
		let mut tables = self.tables.lock().await;
		tables.check()?;

		let macs_before = tables.mac_addresses.len();
		tables
			.mac_addresses
			.retain(|row| !(row.slice_id == slice_id && row.state == MacState::Deleted));
		let macs = macs_before - tables.mac_addresses.len();

		let ports_before = tables.ports.len();
		tables
			.ports
			.retain(|_, port| !(port.slice_id == slice_id && port.state == PortState::Destroyed));
		let ports = ports_before - tables.ports.len();

		Ok((macs as u64, ports as u64))
	}

	async fn update_port_numbers(
		&self,
		datapath_id: DatapathId,
		name: Option<&str>,
		port_no: u16,
	) -> Result<u64, StoreError> {
		let mut tables = self.tables.lock().await;
		tables.check()?;

		let mut updated = 0;
		for port in tables.ports.values_mut().filter(|port| {
			port.datapath_id == datapath_id
				&& port.port_name.is_some()
				&& name.map_or(true, |name| port.port_name.as_deref() == Some(name))
		}) {
			port.port_no = port_no;
			updated += 1;
		}

		Ok(updated)
	}
}

#[async_trait]
impl SwitchRegistry for MemoryStore {
	async fn add_switch(
		&self,
		datapath_id: DatapathId,
		owner: &ControllerIdentity,
	) -> Result<(), StoreError> {
		let mut tables = self.tables.lock().await;
		tables.check()?;
		tables.switches.insert(datapath_id, owner.clone());
		Ok(())
	}

	async fn delete_switch(&self, datapath_id: DatapathId) -> Result<(), StoreError> {
		let mut tables = self.tables.lock().await;
		tables.check()?;
		tables.switches.remove(&datapath_id);
		tables
			.switch_ports
			.retain(|(dpid, _), _| *dpid != datapath_id);
		Ok(())
	}

	async fn delete_switches_by_controller(
		&self,
		owner: &ControllerIdentity,
	) -> Result<u64, StoreError> {
		let mut tables = self.tables.lock().await;
		tables.check()?;

		let owned = tables
			.switches
			.iter()
			.filter(|(_, identity)| *identity == owner)
			.map(|(dpid, _)| *dpid)
			.collect::<Vec<_>>();

		for dpid in &owned {
			tables.switches.remove(dpid);
			tables.switch_ports.retain(|(id, _), _| id != dpid);
		}

		Ok(owned.len() as u64)
	}

	async fn add_port(
		&self,
		datapath_id: DatapathId,
		port_no: u16,
		name: &str,
	) -> Result<(), StoreError> {
		let mut tables = self.tables.lock().await;
		tables.check()?;
		tables
			.switch_ports
			.insert((datapath_id, port_no), name.to_string());
		Ok(())
	}

	async fn delete_port(
		&self,
		datapath_id: DatapathId,
		port_no: u16,
		_name: &str,
	) -> Result<(), StoreError> {
		let mut tables = self.tables.lock().await;
		tables.check()?;
		tables.switch_ports.remove(&(datapath_id, port_no));
		Ok(())
	}

	async fn port_number_by_name(
		&self,
		datapath_id: DatapathId,
		name: &str,
	) -> Result<Option<u16>, StoreError> {
		let tables = self.tables.lock().await;
		tables.check()?;

		Ok(tables
			.switch_ports
			.iter()
			.find(|((dpid, _), port_name)| *dpid == datapath_id && port_name.as_str() == name)
			.map(|((_, port_no), _)| *port_no))
	}

	async fn switch_owned_by(
		&self,
		datapath_id: DatapathId,
		owner: &ControllerIdentity,
	) -> Result<bool, StoreError> {
		let tables = self.tables.lock().await;
		tables.check()?;

		Ok(tables.switches.get(&datapath_id) == Some(owner))
	}
}

#[async_trait]
impl OverlayDirectory for MemoryStore {
	async fn overlay_info(
		&self,
		datapath_id: DatapathId,
		vni: u32,
	) -> Result<Option<OverlayInfo>, StoreError> {
		let tables = self.tables.lock().await;
		tables.check()?;

		let Some(group_id) = tables.overlay_networks.get(&vni) else {
			return Ok(None);
		};
		let reflectors = tables
			.reflectors
			.iter()
			.filter(|reflector| reflector.group_id == *group_id)
			.collect::<Vec<_>>();
		let Some(first) = reflectors.first() else {
			return Ok(None);
		};
		let (Some((local_address, local_port)), Some(agent_uri)) = (
			tables.tunnel_endpoints.get(&datapath_id),
			tables.agents.get(&datapath_id),
		) else {
			return Ok(None);
		};

		Ok(Some(OverlayInfo {
			agent_uri: agent_uri.clone(),
			local_address: *local_address,
			local_port: *local_port,
			broadcast_address: first.broadcast_address,
			broadcast_port: first.broadcast_port,
			reflector_uris: reflectors
				.iter()
				.map(|reflector| reflector.uri.clone())
				.collect(),
		}))
	}
}
