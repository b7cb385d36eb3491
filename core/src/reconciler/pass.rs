use std::collections::HashMap;

use tracing::{debug, error, info, instrument, trace, warn};
use vnm_openflow::{FlowMod, MacAddress, OFPP_NONE};

use super::Reconciler;
use crate::{
	error::StoreError,
	event::Event,
	ledger::{PortKey, SliceUpdate, TransactionContext},
	overlay::{overlay_interface_name, OverlayCallback, OverlayOperation, OverlayStatus},
	state::{MacState, PortState, PortType, SliceState},
	store::PortRow,
	synthesis::{synthesize, DesiredChange, SlicePort},
	transport::DeviceTransaction,
	Dpid, PortId, SliceId,
};

#[derive(Debug, Default)]
struct PortMacs {
	install: Vec<MacAddress>,
	delete: Vec<MacAddress>,
}

/// Ports of a switch pass, read before the ledger is touched. MAC addresses are filled in
/// right before dispatch.
#[derive(Debug, Default)]
struct SwitchSnapshot {
	active: Vec<SlicePort>,
	inactive: Vec<SlicePort>,
	unresolved: Vec<PortRow>,
	macs: HashMap<PortId, PortMacs>,
	attach: bool,
	detach: bool,
}

impl Reconciler {
	/// One reconciliation pass.
	#[instrument(skip_all)]
	pub async fn tick(&mut self) {
		if let Err(e) = self.advance_slices().await {
			warn!(?e, "Failed to advance slice states, skipping pass");
			return;
		}

		let slice_ids = match self.store.slices_to_update(self.config.slices_per_pass).await {
			Ok(slice_ids) => slice_ids,
			Err(e) => {
				warn!(?e, "Failed to retrieve slices to update, skipping pass");
				return;
			}
		};

		if slice_ids.is_empty() {
			trace!("No slice to update");
			return;
		}

		debug!(slices = slice_ids.len(), "Reconciling slices");

		for slice_id in &slice_ids {
			self.check_switches_to_update(*slice_id).await;
		}

		for slice_id in slice_ids {
			self.finalize(slice_id).await;
		}
	}

	async fn advance_slices(&self) -> Result<(), StoreError> {
		self.transition_slices(SliceState::ReadyToUpdate, SliceState::Updating)
			.await?;
		self.transition_slices(SliceState::ReadyToDestroy, SliceState::Destroying)
			.await?;
		Ok(())
	}

	#[instrument(skip(self))]
	async fn check_switches_to_update(&mut self, slice_id: SliceId) {
		let datapath_ids = match self
			.store
			.switches_to_update(slice_id, self.config.switches_per_slice)
			.await
		{
			Ok(datapath_ids) => datapath_ids,
			Err(e) => {
				warn!(?e, "Failed to retrieve switches to update");
				return;
			}
		};

		self.ledger.slice_or_insert(slice_id);

		for datapath_id in datapath_ids {
			match self
				.registry
				.switch_owned_by(datapath_id, &self.identity)
				.await
			{
				Ok(true) => {}
				Ok(false) => {
					trace!(datapath_id = %Dpid(datapath_id), "Switch owned by another controller");
					continue;
				}
				Err(e) => {
					warn!(datapath_id = %Dpid(datapath_id), ?e, "Failed to check switch ownership");
					return;
				}
			}

			if let Err(e) = self
				.check_ports_to_update(PortKey::new(slice_id, datapath_id))
				.await
			{
				warn!(datapath_id = %Dpid(datapath_id), ?e, "Failed to reconcile switch");
				return;
			}
		}
	}

	async fn check_ports_to_update(&mut self, key: PortKey) -> Result<(), StoreError> {
		if self
			.ledger
			.port(key)
			.is_some_and(|port| port.flow_entry_installation_started())
		{
			self.ledger.flush(key, self.transport.as_ref());
			return Ok(());
		}

		self.transition_ports(key, PortState::ReadyToUpdate, PortState::Updating)
			.await?;
		self.transition_ports(key, PortState::ReadyToDestroy, PortState::Destroying)
			.await?;

		let mut snapshot = self.load_snapshot(key).await?;

		self.ledger.port_or_insert(key);

		if self
			.ledger
			.slice(key.slice_id)
			.is_some_and(SliceUpdate::failed)
		{
			debug!(
				slice_id = key.slice_id,
				datapath_id = %Dpid(key.datapath_id),
				"Slice already failed, skipping flow synthesis",
			);
			self.ledger.set_flow_entry_installation_started(key);
			return Ok(());
		}

		if snapshot.attach && !self.start_overlay(key, OverlayOperation::Attach).await {
			self.ledger.mark_failed(TransactionContext::Port(key));
			return Ok(());
		}

		if self
			.ledger
			.port(key)
			.is_some_and(|port| port.n_overlay_network_transactions() > 0)
		{
			debug!(
				slice_id = key.slice_id,
				datapath_id = %Dpid(key.datapath_id),
				"Waiting for overlay network attachment",
			);
			return Ok(());
		}

		self.load_macs(key, &mut snapshot).await?;

		for port in &snapshot.unresolved {
			warn!(
				slice_id = key.slice_id,
				datapath_id = %Dpid(key.datapath_id),
				port_id = port.id,
				port_name = ?port.port_name,
				"Unable to resolve port number",
			);
			self.ledger.mark_failed(TransactionContext::Port(key));
		}

		self.dispatch(key, &snapshot);
		let outcome = self.ledger.flush(key, self.transport.as_ref());

		if snapshot.detach && !self.start_overlay(key, OverlayOperation::Detach).await {
			self.ledger.mark_failed(TransactionContext::Port(key));
		}

		self.ledger.set_flow_entry_installation_started(key);

		info!(
			slice_id = key.slice_id,
			datapath_id = %Dpid(key.datapath_id),
			active = snapshot.active.len(),
			inactive = snapshot.inactive.len(),
			sent = outcome.sent,
			rejected = outcome.rejected,
			"Flow entries dispatched",
		);

		Ok(())
	}

	async fn load_snapshot(&self, key: PortKey) -> Result<SwitchSnapshot, StoreError> {
		let mut snapshot = SwitchSnapshot::default();

		let active = self.store.ports(key, &PortState::ACTIVE).await?;
		let inactive = self.store.ports(key, &PortState::INACTIVE).await?;

		let has_interface = self
			.registry
			.port_number_by_name(key.datapath_id, &overlay_interface_name(key.slice_id))
			.await?
			.is_some();

		snapshot.attach = !has_interface
			&& active.iter().any(|port| {
				port.port_type == PortType::Overlay
					&& matches!(port.state, PortState::ReadyToUpdate | PortState::Updating)
			});
		snapshot.detach = has_interface
			&& inactive.iter().any(|port| {
				port.port_type == PortType::Overlay
					&& matches!(port.state, PortState::ReadyToDestroy | PortState::Destroying)
			});

		for row in active {
			match self.resolve_port(key, &row).await? {
				Some(port) => snapshot.active.push(port),
				None => snapshot.unresolved.push(row),
			}
		}

		for row in inactive {
			match self.resolve_port(key, &row).await? {
				Some(port) => snapshot.inactive.push(port),
				None => snapshot.unresolved.push(row),
			}
		}

		Ok(snapshot)
	}

	/// Starts the pending MAC address changes of every resolved port and loads them.
	///
	/// Only called once flow synthesis is going to happen for the switch, so every MAC moved
	/// here ends up under a `MacUpdate` and gets settled.
	async fn load_macs(
		&self,
		key: PortKey,
		snapshot: &mut SwitchSnapshot,
	) -> Result<(), StoreError> {
		for port in &snapshot.active {
			self.transition_macs(
				key.slice_id,
				port.port_id,
				MacState::ReadyToInstall,
				MacState::Installing,
			)
			.await?;
			self.transition_macs(
				key.slice_id,
				port.port_id,
				MacState::ReadyToDelete,
				MacState::Deleting,
			)
			.await?;

			let macs = PortMacs {
				install: self
					.store
					.mac_addresses(key.slice_id, port.port_id, MacState::Installing)
					.await?,
				delete: self
					.store
					.mac_addresses(key.slice_id, port.port_id, MacState::Deleting)
					.await?,
			};
			snapshot.macs.insert(port.port_id, macs);
		}

		for port in &snapshot.inactive {
			self.transition_macs(
				key.slice_id,
				port.port_id,
				MacState::ReadyToDelete,
				MacState::Deleting,
			)
			.await?;

			let macs = PortMacs {
				install: Vec::new(),
				delete: self
					.store
					.mac_addresses(key.slice_id, port.port_id, MacState::Deleting)
					.await?,
			};
			snapshot.macs.insert(port.port_id, macs);
		}

		Ok(())
	}

	async fn resolve_port(
		&self,
		key: PortKey,
		row: &PortRow,
	) -> Result<Option<SlicePort>, StoreError> {
		let port_no = if row.port_no == OFPP_NONE {
			match &row.port_name {
				Some(name) => {
					self.registry
						.port_number_by_name(key.datapath_id, name)
						.await?
				}
				None => None,
			}
		} else {
			Some(row.port_no)
		};

		Ok(port_no.map(|port_no| SlicePort {
			port_id: row.id,
			port_no,
			vid: row.vid,
			port_type: row.port_type,
		}))
	}

	fn dispatch(&mut self, key: PortKey, snapshot: &SwitchSnapshot) {
		let slice_id = key.slice_id;
		let no_macs = PortMacs::default();

		self.enqueue(
			TransactionContext::Port(key),
			synthesize(slice_id, DesiredChange::InstallPorts(&snapshot.active)),
		);

		for port in &snapshot.active {
			let macs = snapshot.macs.get(&port.port_id).unwrap_or(&no_macs);
			let context = TransactionContext::Mac(key.mac(port.port_id));

			self.enqueue(
				context,
				synthesize(
					slice_id,
					DesiredChange::InstallMacs {
						port,
						macs: &macs.install,
					},
				),
			);
			self.enqueue(
				context,
				synthesize(
					slice_id,
					DesiredChange::DeleteMacs {
						port,
						macs: &macs.delete,
					},
				),
			);
		}

		for port in &snapshot.inactive {
			let macs = snapshot.macs.get(&port.port_id).unwrap_or(&no_macs);

			self.enqueue(
				TransactionContext::Mac(key.mac(port.port_id)),
				synthesize(
					slice_id,
					DesiredChange::DeleteMacs {
						port,
						macs: &macs.delete,
					},
				),
			);
		}

		self.enqueue(
			TransactionContext::Port(key),
			synthesize(slice_id, DesiredChange::DeletePorts(&snapshot.inactive)),
		);
	}

	fn enqueue(&mut self, context: TransactionContext, flow_mods: Vec<FlowMod>) {
		let datapath_id = context.port_key().datapath_id;

		for flow_mod in flow_mods {
			trace!(datapath_id = %Dpid(datapath_id), %flow_mod, "Queueing flow modification");
			self.ledger.enqueue(
				context,
				DeviceTransaction::new(datapath_id, flow_mod, context, self.events_tx.clone()),
			);
		}
	}

	async fn start_overlay(&mut self, key: PortKey, operation: OverlayOperation) -> bool {
		let events_tx = self.events_tx.clone();
		let callback: OverlayCallback = Box::new(move |status| {
			if events_tx
				.try_send(Event::OverlayCompleted { key, status })
				.is_err()
			{
				warn!(?key, %status, "Reconciler is gone, dropping overlay completion");
			}
		});

		let status = match operation {
			OverlayOperation::Attach => {
				self.overlay
					.attach(key.datapath_id, key.slice_id, callback)
					.await
			}
			OverlayOperation::Detach => {
				self.overlay
					.detach(key.datapath_id, key.slice_id, callback)
					.await
			}
		};

		match status {
			OverlayStatus::Succeeded => {
				self.ledger.increment_overlay(key);
				true
			}
			OverlayStatus::InProgress => {
				debug!(
					slice_id = key.slice_id,
					datapath_id = %Dpid(key.datapath_id),
					%operation,
					"Overlay operation already in progress",
				);
				true
			}
			OverlayStatus::Failed => {
				warn!(
					slice_id = key.slice_id,
					datapath_id = %Dpid(key.datapath_id),
					%operation,
					"Overlay operation failed",
				);
				false
			}
		}
	}

	pub(super) async fn transition_slices(
		&self,
		from: SliceState,
		to: SliceState,
	) -> Result<u64, StoreError> {
		if !from.can_transition_to(to) {
			error!(%from, %to, "Illegal slice state transition");
			return Ok(0);
		}

		let updated = self.store.update_slice_states(from, to).await?;
		if updated > 0 {
			debug!(%from, %to, updated, "Slice states updated");
		}

		Ok(updated)
	}

	pub(super) async fn transition_ports(
		&self,
		key: PortKey,
		from: PortState,
		to: PortState,
	) -> Result<u64, StoreError> {
		if !from.can_transition_to(to) {
			error!(?key, %from, %to, "Illegal port state transition");
			return Ok(0);
		}

		let updated = self.store.update_port_states(key, from, to).await?;
		if updated > 0 {
			debug!(
				slice_id = key.slice_id,
				datapath_id = %Dpid(key.datapath_id),
				%from,
				%to,
				updated,
				"Port states updated",
			);
		}

		Ok(updated)
	}

	pub(super) async fn transition_macs(
		&self,
		slice_id: SliceId,
		port_id: PortId,
		from: MacState,
		to: MacState,
	) -> Result<u64, StoreError> {
		if !from.can_transition_to(to) {
			error!(slice_id, port_id, %from, %to, "Illegal MAC state transition");
			return Ok(0);
		}

		let updated = self
			.store
			.update_mac_states(slice_id, port_id, from, to)
			.await?;
		if updated > 0 {
			debug!(slice_id, port_id, %from, %to, updated, "MAC states updated");
		}

		Ok(updated)
	}
}
