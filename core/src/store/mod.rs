//! Desired-state store seen by the reconciler.
//!
//! Every state change goes through a compare-and-set keyed by the expected current state, so a
//! pass that got interrupted can always be replayed.

use async_trait::async_trait;
use vnm_openflow::MacAddress;

use crate::{
	error::StoreError,
	ledger::PortKey,
	state::{MacState, PortState, PortType, SliceState},
	DatapathId, PortId, SliceId,
};

mod memory;

pub use memory::{MemoryStore, Reflector};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRow {
	pub id: PortId,
	pub datapath_id: DatapathId,
	pub slice_id: SliceId,
	/// `OFPP_NONE` when the port is only known by name
	pub port_no: u16,
	pub port_name: Option<String>,
	/// 0 when untagged
	pub vid: u16,
	pub port_type: PortType,
	pub state: PortState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacRow {
	pub slice_id: SliceId,
	pub port_id: PortId,
	pub mac: MacAddress,
	pub state: MacState,
}

/// Outcome of the conditional slice update run once all of a slice's work settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceSettlement {
	pub from: SliceState,
	pub to: SliceState,
	/// Whether the update requires failed ports (`true`) or the absence of them (`false`)
	pub with_failed_ports: bool,
}

#[async_trait]
pub trait Store: Send + Sync {
	/// Slices in any of the pending states, at most `limit` of them.
	async fn slices_to_update(&self, limit: u64) -> Result<Vec<SliceId>, StoreError>;

	/// Moves every slice in `from` to `to`, returning how many rows changed.
	async fn update_slice_states(&self, from: SliceState, to: SliceState)
		-> Result<u64, StoreError>;

	/// Distinct switches holding pending ports of the slice, at most `limit` of them.
	async fn switches_to_update(
		&self,
		slice_id: SliceId,
		limit: u64,
	) -> Result<Vec<DatapathId>, StoreError>;

	async fn update_port_states(
		&self,
		key: PortKey,
		from: PortState,
		to: PortState,
	) -> Result<u64, StoreError>;

	async fn ports(&self, key: PortKey, states: &[PortState])
		-> Result<Vec<PortRow>, StoreError>;

	async fn update_mac_states(
		&self,
		slice_id: SliceId,
		port_id: PortId,
		from: MacState,
		to: MacState,
	) -> Result<u64, StoreError>;

	async fn mac_addresses(
		&self,
		slice_id: SliceId,
		port_id: PortId,
		state: MacState,
	) -> Result<Vec<MacAddress>, StoreError>;

	/// Applies `settlement` to the slice row only when it is in `settlement.from`, no port of the
	/// slice is pending and the presence of failed ports matches. Settling into `Destroyed`
	/// deletes the row. Returns whether the row changed.
	async fn settle_slice(
		&self,
		slice_id: SliceId,
		settlement: SliceSettlement,
	) -> Result<bool, StoreError>;

	/// Deletes `Deleted` MAC rows and `Destroyed` port rows of the slice.
	async fn purge_slice(&self, slice_id: SliceId) -> Result<(u64, u64), StoreError>;

	/// Rewrites the port number of the switch's slice ports carrying `name`, or of all its named
	/// ports when `name` is `None`.
	async fn update_port_numbers(
		&self,
		datapath_id: DatapathId,
		name: Option<&str>,
		port_no: u16,
	) -> Result<u64, StoreError>;
}
