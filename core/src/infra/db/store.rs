use std::net::Ipv4Addr;

use async_trait::async_trait;
use sea_orm::{
	sea_query::OnConflict, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
	PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use tracing::warn;
use vnm_openflow::MacAddress;

use super::entities::{
	agent, mac_address, overlay_network, port, reflector, slice, switch, switch_port,
	tunnel_endpoint,
};
use crate::{
	config::ControllerIdentity,
	error::StoreError,
	ledger::PortKey,
	overlay::{OverlayDirectory, OverlayInfo},
	registry::SwitchRegistry,
	state::{MacState, PortState, SliceState},
	store::{PortRow, SliceSettlement, Store},
	DatapathId, Dpid, PortId, SliceId,
};

/// Datapath ids and MAC addresses are unsigned 64 bits values stored in signed columns.
const fn to_db_bits(value: u64) -> i64 {
	i64::from_ne_bytes(value.to_ne_bytes())
}

const fn from_db_bits(value: i64) -> u64 {
	u64::from_ne_bytes(value.to_ne_bytes())
}

fn decode<T, V>(table: &'static str, column: &'static str, value: V) -> Result<T, StoreError>
where
	T: TryFrom<V>,
	V: Copy + Into<i64>,
{
	T::try_from(value).map_err(|_| StoreError::InvalidValue {
		table,
		column,
		value: value.into(),
	})
}

fn state_values<T>(states: &[T]) -> Vec<i32>
where
	T: Copy,
	i32: From<T>,
{
	states.iter().map(|state| i32::from(*state)).collect()
}

fn port_row(model: port::Model) -> Result<PortRow, StoreError> {
	Ok(PortRow {
		id: decode("ports", "id", model.id)?,
		datapath_id: from_db_bits(model.datapath_id),
		slice_id: decode("ports", "slice_id", model.slice_id)?,
		port_no: decode("ports", "port_no", model.port_no)?,
		port_name: model.port_name,
		vid: decode("ports", "vid", model.vid)?,
		port_type: decode("ports", "type", model.port_type)?,
		state: decode("ports", "state", model.state)?,
	})
}

/// [`Store`], [`SwitchRegistry`] and [`OverlayDirectory`] on top of the network database.
#[derive(Debug, Clone)]
pub struct SqlStore {
	conn: DatabaseConnection,
}

impl SqlStore {
	#[must_use]
	pub const fn new(conn: DatabaseConnection) -> Self {
		Self { conn }
	}
}

#[async_trait]
impl Store for SqlStore {
	async fn slices_to_update(&self, limit: u64) -> Result<Vec<SliceId>, StoreError> {
		slice::Entity::find()
			.filter(slice::Column::State.is_in(state_values(&SliceState::PENDING)))
			.order_by_asc(slice::Column::Id)
			.limit(limit)
			.all(&self.conn)
			.await?
			.into_iter()
			.map(|model| decode("slices", "id", model.id))
			.collect()
	}

	async fn update_slice_states(
		&self,
		from: SliceState,
		to: SliceState,
	) -> Result<u64, StoreError> {
		Ok(slice::Entity::update_many()
			.filter(slice::Column::State.eq(i32::from(from)))
			.set(slice::ActiveModel {
				state: Set(i32::from(to)),
				..Default::default()
			})
			.exec(&self.conn)
			.await?
			.rows_affected)
	}

	async fn switches_to_update(
		&self,
		slice_id: SliceId,
		limit: u64,
	) -> Result<Vec<DatapathId>, StoreError> {
		let datapath_ids = port::Entity::find()
			.select_only()
			.column(port::Column::DatapathId)
			.distinct()
			.filter(port::Column::SliceId.eq(i64::from(slice_id)))
			.filter(port::Column::State.is_in(state_values(&PortState::PENDING)))
			.order_by_asc(port::Column::DatapathId)
			.limit(limit)
			.into_tuple::<i64>()
			.all(&self.conn)
			.await?;

		Ok(datapath_ids.into_iter().map(from_db_bits).collect())
	}

	async fn update_port_states(
		&self,
		key: PortKey,
		from: PortState,
		to: PortState,
	) -> Result<u64, StoreError> {
		Ok(port::Entity::update_many()
			.filter(port::Column::SliceId.eq(i64::from(key.slice_id)))
			.filter(port::Column::DatapathId.eq(to_db_bits(key.datapath_id)))
			.filter(port::Column::State.eq(i32::from(from)))
			.set(port::ActiveModel {
				state: Set(i32::from(to)),
				..Default::default()
			})
			.exec(&self.conn)
			.await?
			.rows_affected)
	}

	async fn ports(&self, key: PortKey, states: &[PortState]) -> Result<Vec<PortRow>, StoreError> {
		port::Entity::find()
			.filter(port::Column::SliceId.eq(i64::from(key.slice_id)))
			.filter(port::Column::DatapathId.eq(to_db_bits(key.datapath_id)))
			.filter(port::Column::State.is_in(state_values(states)))
			.order_by_asc(port::Column::Id)
			.all(&self.conn)
			.await?
			.into_iter()
			.map(port_row)
			.collect()
	}

	async fn update_mac_states(
		&self,
		slice_id: SliceId,
		port_id: PortId,
		from: MacState,
		to: MacState,
	) -> Result<u64, StoreError> {
		Ok(mac_address::Entity::update_many()
			.filter(mac_address::Column::SliceId.eq(i64::from(slice_id)))
			.filter(mac_address::Column::PortId.eq(i64::from(port_id)))
			.filter(mac_address::Column::State.eq(i32::from(from)))
			.set(mac_address::ActiveModel {
				state: Set(i32::from(to)),
				..Default::default()
			})
			.exec(&self.conn)
			.await?
			.rows_affected)
	}

	async fn mac_addresses(
		&self,
		slice_id: SliceId,
		port_id: PortId,
		state: MacState,
	) -> Result<Vec<MacAddress>, StoreError> {
		let macs = mac_address::Entity::find()
			.select_only()
			.column(mac_address::Column::Mac)
			.filter(mac_address::Column::SliceId.eq(i64::from(slice_id)))
			.filter(mac_address::Column::PortId.eq(i64::from(port_id)))
			.filter(mac_address::Column::State.eq(i32::from(state)))
			.order_by_asc(mac_address::Column::Id)
			.into_tuple::<i64>()
			.all(&self.conn)
			.await?;

		Ok(macs
			.into_iter()
			.map(|mac| MacAddress::from(from_db_bits(mac)))
			.collect())
	}

	async fn settle_slice(
		&self,
		slice_id: SliceId,
		settlement: SliceSettlement,
	) -> Result<bool, StoreError> {
		let id = i64::from(slice_id);
		let txn = self.conn.begin().await?;

		let current = slice::Entity::find_by_id(id).one(&txn).await?;
		if current.map(|model| model.state) != Some(i32::from(settlement.from)) {
			txn.rollback().await?;
			return Ok(false);
		}

		let pending = port::Entity::find()
			.filter(port::Column::SliceId.eq(id))
			.filter(port::Column::State.is_in(state_values(&PortState::PENDING)))
			.count(&txn)
			.await?;
		let failed = port::Entity::find()
			.filter(port::Column::SliceId.eq(id))
			.filter(port::Column::State.is_in(state_values(&PortState::FAILED)))
			.count(&txn)
			.await?;

		if pending > 0 || (failed > 0) != settlement.with_failed_ports {
			txn.rollback().await?;
			return Ok(false);
		}

		if settlement.to == SliceState::Destroyed {
			slice::Entity::delete_by_id(id).exec(&txn).await?;
		} else {
			slice::Entity::update_many()
				.filter(slice::Column::Id.eq(id))
				.set(slice::ActiveModel {
					state: Set(i32::from(settlement.to)),
					..Default::default()
				})
				.exec(&txn)
				.await?;
		}

		txn.commit().await?;

		Ok(true)
	}

	async fn purge_slice(&self, slice_id: SliceId) -> Result<(u64, u64), StoreError> {
		let macs = mac_address::Entity::delete_many()
			.filter(mac_address::Column::SliceId.eq(i64::from(slice_id)))
			.filter(mac_address::Column::State.eq(i32::from(MacState::Deleted)))
			.exec(&self.conn)
			.await?
			.rows_affected;

		let ports = port::Entity::delete_many()
			.filter(port::Column::SliceId.eq(i64::from(slice_id)))
			.filter(port::Column::State.eq(i32::from(PortState::Destroyed)))
			.exec(&self.conn)
			.await?
			.rows_affected;

		Ok((macs, ports))
	}

	async fn update_port_numbers(
		&self,
		datapath_id: DatapathId,
		name: Option<&str>,
		port_no: u16,
	) -> Result<u64, StoreError> {
		let update = port::Entity::update_many()
			.filter(port::Column::DatapathId.eq(to_db_bits(datapath_id)))
			.set(port::ActiveModel {
				port_no: Set(i32::from(port_no)),
				..Default::default()
			});

		let update = match name {
			Some(name) => update.filter(port::Column::PortName.eq(name)),
			None => update.filter(port::Column::PortName.is_not_null()),
		};

		Ok(update.exec(&self.conn).await?.rows_affected)
	}
}

#[async_trait]
impl SwitchRegistry for SqlStore {
	async fn add_switch(
		&self,
		datapath_id: DatapathId,
		owner: &ControllerIdentity,
	) -> Result<(), StoreError> {
		switch::Entity::insert(switch::ActiveModel {
			datapath_id: Set(to_db_bits(datapath_id)),
			controller_host: Set(owner.host.clone()),
			controller_pid: Set(i64::from(owner.pid)),
		})
		.on_conflict(
			OnConflict::column(switch::Column::DatapathId)
				.update_columns([
					switch::Column::ControllerHost,
					switch::Column::ControllerPid,
				])
				.to_owned(),
		)
		.exec_without_returning(&self.conn)
		.await?;

		Ok(())
	}

	async fn delete_switch(&self, datapath_id: DatapathId) -> Result<(), StoreError> {
		let txn = self.conn.begin().await?;

		switch_port::Entity::delete_many()
			.filter(switch_port::Column::DatapathId.eq(to_db_bits(datapath_id)))
			.exec(&txn)
			.await?;
		switch::Entity::delete_by_id(to_db_bits(datapath_id))
			.exec(&txn)
			.await?;

		txn.commit().await?;

		Ok(())
	}

	async fn delete_switches_by_controller(
		&self,
		owner: &ControllerIdentity,
	) -> Result<u64, StoreError> {
		let txn = self.conn.begin().await?;

		let owned = switch::Entity::find()
			.select_only()
			.column(switch::Column::DatapathId)
			.filter(switch::Column::ControllerHost.eq(owner.host.as_str()))
			.filter(switch::Column::ControllerPid.eq(i64::from(owner.pid)))
			.into_tuple::<i64>()
			.all(&txn)
			.await?;

		switch_port::Entity::delete_many()
			.filter(switch_port::Column::DatapathId.is_in(owned.clone()))
			.exec(&txn)
			.await?;
		let deleted = switch::Entity::delete_many()
			.filter(switch::Column::DatapathId.is_in(owned))
			.exec(&txn)
			.await?
			.rows_affected;

		txn.commit().await?;

		Ok(deleted)
	}

	async fn add_port(
		&self,
		datapath_id: DatapathId,
		port_no: u16,
		name: &str,
	) -> Result<(), StoreError> {
		switch_port::Entity::insert(switch_port::ActiveModel {
			datapath_id: Set(to_db_bits(datapath_id)),
			port_no: Set(i32::from(port_no)),
			name: Set(name.to_string()),
		})
		.on_conflict(
			OnConflict::columns([switch_port::Column::DatapathId, switch_port::Column::PortNo])
				.update_column(switch_port::Column::Name)
				.to_owned(),
		)
		.exec_without_returning(&self.conn)
		.await?;

		Ok(())
	}

	async fn delete_port(
		&self,
		datapath_id: DatapathId,
		port_no: u16,
		_name: &str,
	) -> Result<(), StoreError> {
		switch_port::Entity::delete_many()
			.filter(switch_port::Column::DatapathId.eq(to_db_bits(datapath_id)))
			.filter(switch_port::Column::PortNo.eq(i32::from(port_no)))
			.exec(&self.conn)
			.await?;

		Ok(())
	}

	async fn port_number_by_name(
		&self,
		datapath_id: DatapathId,
		name: &str,
	) -> Result<Option<u16>, StoreError> {
		switch_port::Entity::find()
			.filter(switch_port::Column::DatapathId.eq(to_db_bits(datapath_id)))
			.filter(switch_port::Column::Name.eq(name))
			.order_by_asc(switch_port::Column::PortNo)
			.one(&self.conn)
			.await?
			.map(|model| decode("switch_ports", "port_no", model.port_no))
			.transpose()
	}

	async fn switch_owned_by(
		&self,
		datapath_id: DatapathId,
		owner: &ControllerIdentity,
	) -> Result<bool, StoreError> {
		Ok(switch::Entity::find_by_id(to_db_bits(datapath_id))
			.one(&self.conn)
			.await?
			.is_some_and(|model| {
				model.controller_host == owner.host && model.controller_pid == i64::from(owner.pid)
			}))
	}
}

#[async_trait]
impl OverlayDirectory for SqlStore {
	async fn overlay_info(
		&self,
		datapath_id: DatapathId,
		vni: u32,
	) -> Result<Option<OverlayInfo>, StoreError> {
		let Some(network) = overlay_network::Entity::find_by_id(i64::from(vni))
			.one(&self.conn)
			.await?
		else {
			return Ok(None);
		};

		let reflectors = reflector::Entity::find()
			.filter(reflector::Column::GroupId.eq(network.reflector_group_id))
			.order_by_asc(reflector::Column::Id)
			.all(&self.conn)
			.await?;
		let Some(first) = reflectors.first() else {
			return Ok(None);
		};

		let endpoint = tunnel_endpoint::Entity::find_by_id(to_db_bits(datapath_id))
			.one(&self.conn)
			.await?;
		let agent = agent::Entity::find_by_id(to_db_bits(datapath_id))
			.one(&self.conn)
			.await?;
		let (Some(endpoint), Some(agent)) = (endpoint, agent) else {
			return Ok(None);
		};

		let (Ok(local_address), Ok(broadcast_address)) = (
			endpoint.local_address.parse::<Ipv4Addr>(),
			first.broadcast_address.parse::<Ipv4Addr>(),
		) else {
			warn!(
				datapath_id = %Dpid(datapath_id),
				vni,
				local_address = %endpoint.local_address,
				broadcast_address = %first.broadcast_address,
				"Malformed overlay addresses",
			);
			return Ok(None);
		};

		Ok(Some(OverlayInfo {
			agent_uri: agent.uri,
			local_address,
			local_port: decode("tunnel_endpoints", "local_port", endpoint.local_port)?,
			broadcast_address,
			broadcast_port: decode("reflectors", "broadcast_port", first.broadcast_port)?,
			reflector_uris: reflectors
				.iter()
				.map(|reflector| reflector.uri.clone())
				.collect(),
		}))
	}
}
