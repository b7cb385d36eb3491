//! Switches and ports known to the controllers, and which controller owns each switch.

use async_trait::async_trait;
use tracing::{debug, info};
use vnm_openflow::{OFPP_ALL, OFPP_NONE};

use crate::{config::ControllerIdentity, error::StoreError, store::Store, DatapathId, Dpid};

#[async_trait]
pub trait SwitchRegistry: Send + Sync {
	async fn add_switch(
		&self,
		datapath_id: DatapathId,
		owner: &ControllerIdentity,
	) -> Result<(), StoreError>;

	/// Removes the switch and every port registered under it.
	async fn delete_switch(&self, datapath_id: DatapathId) -> Result<(), StoreError>;

	/// Forgets every switch owned by a controller instance, returning how many there were.
	async fn delete_switches_by_controller(
		&self,
		owner: &ControllerIdentity,
	) -> Result<u64, StoreError>;

	async fn add_port(
		&self,
		datapath_id: DatapathId,
		port_no: u16,
		name: &str,
	) -> Result<(), StoreError>;

	async fn delete_port(
		&self,
		datapath_id: DatapathId,
		port_no: u16,
		name: &str,
	) -> Result<(), StoreError>;

	async fn port_number_by_name(
		&self,
		datapath_id: DatapathId,
		name: &str,
	) -> Result<Option<u16>, StoreError>;

	async fn switch_owned_by(
		&self,
		datapath_id: DatapathId,
		owner: &ControllerIdentity,
	) -> Result<bool, StoreError>;
}

/// Port status notification received from a switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortStatus {
	Added { port_no: u16, name: String },
	Deleted { port_no: u16, name: String },
}

impl PortStatus {
	/// Every port of the switch went away, as reported with `OFPP_ALL` on disconnection.
	#[must_use]
	pub fn all_deleted() -> Self {
		Self::Deleted {
			port_no: OFPP_ALL,
			name: String::new(),
		}
	}
}

/// Records a port status change in the registry and points the slice ports known by that name
/// at the new port number.
pub async fn apply_port_status(
	registry: &dyn SwitchRegistry,
	store: &dyn Store,
	datapath_id: DatapathId,
	status: &PortStatus,
) -> Result<u64, StoreError> {
	let updated = match status {
		PortStatus::Added { port_no, name } => {
			registry.add_port(datapath_id, *port_no, name).await?;
			store
				.update_port_numbers(datapath_id, Some(name), *port_no)
				.await?
		}
		PortStatus::Deleted { port_no, .. } if *port_no == OFPP_ALL => {
			store
				.update_port_numbers(datapath_id, None, OFPP_NONE)
				.await?
		}
		PortStatus::Deleted { port_no, name } => {
			registry.delete_port(datapath_id, *port_no, name).await?;
			store
				.update_port_numbers(datapath_id, Some(name), OFPP_NONE)
				.await?
		}
	};

	if updated > 0 {
		info!(datapath_id = %Dpid(datapath_id), ?status, updated, "Slice ports renumbered");
	} else {
		debug!(datapath_id = %Dpid(datapath_id), ?status, "No slice port affected by port status");
	}

	Ok(updated)
}
