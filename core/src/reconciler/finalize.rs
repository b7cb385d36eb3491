use tracing::{debug, info, warn};

use super::Reconciler;
use crate::{
	error::StoreError,
	ledger::PortKey,
	state::{MacState, PortState, SliceState},
	store::SliceSettlement,
	PortId, SliceId,
};

/// Settlements tried in order once every port of a slice settled, the first one that applies
/// wins.
const FAILED_SETTLEMENTS: [SliceSettlement; 2] = [
	SliceSettlement {
		from: SliceState::Updating,
		to: SliceState::UpdateFailed,
		with_failed_ports: true,
	},
	SliceSettlement {
		from: SliceState::Destroying,
		to: SliceState::DestroyFailed,
		with_failed_ports: true,
	},
];

const COMPLETED_SETTLEMENTS: [SliceSettlement; 2] = [
	SliceSettlement {
		from: SliceState::Updating,
		to: SliceState::Confirmed,
		with_failed_ports: false,
	},
	SliceSettlement {
		from: SliceState::Destroying,
		to: SliceState::Destroyed,
		with_failed_ports: false,
	},
];

/// Outcome of a switch pass, copied out of the ledger before persisting it.
struct SettledPort {
	key: PortKey,
	failed: bool,
	macs: Vec<(PortId, bool)>,
}

impl Reconciler {
	/// Persists the outcome of a slice once nothing is outstanding and every one of its switches
	/// went through flow synthesis, then drops its ledger entries.
	///
	/// A store error leaves the ledger untouched so the next pass tries again.
	pub(super) async fn finalize(&mut self, slice_id: SliceId) {
		let Some(slice) = self.ledger.slice(slice_id) else {
			return;
		};

		if !slice.is_complete() {
			return;
		}

		if !slice.fully_scheduled() {
			debug!(slice_id, "Slice not fully scheduled yet, deferring finalization");
			return;
		}

		let failed = slice.failed();
		let ports = slice
			.ports()
			.map(|port| SettledPort {
				key: PortKey::new(slice_id, port.datapath_id()),
				failed: port.failed(),
				macs: port
					.macs()
					.map(|mac| (mac.port_id(), mac.failed()))
					.collect(),
			})
			.collect::<Vec<_>>();

		if let Err(e) = self.persist(slice_id, failed, &ports).await {
			warn!(slice_id, ?e, "Failed to persist slice outcome, retrying on next pass");
			return;
		}

		self.ledger.discard_slice(slice_id);
	}

	async fn persist(
		&self,
		slice_id: SliceId,
		failed: bool,
		ports: &[SettledPort],
	) -> Result<(), StoreError> {
		for port in ports {
			for (port_id, mac_failed) in &port.macs {
				for from in [MacState::Installing, MacState::Deleting] {
					if let Some(to) = from.settled(*mac_failed) {
						self.transition_macs(slice_id, *port_id, from, to).await?;
					}
				}
			}

			for from in [PortState::Updating, PortState::Destroying] {
				if let Some(to) = from.settled(port.failed) {
					self.transition_ports(port.key, from, to).await?;
				}
			}
		}

		self.settle_slice(slice_id, failed).await
	}

	/// Settles the slice row, then purges deleted MAC addresses and destroyed ports unless the
	/// slice failed with ports still pending.
	async fn settle_slice(&self, slice_id: SliceId, failed: bool) -> Result<(), StoreError> {
		let mut settled = false;
		for settlement in FAILED_SETTLEMENTS {
			if self.apply_settlement(slice_id, settlement).await? {
				settled = true;
				break;
			}
		}

		if !settled {
			if failed {
				debug!(slice_id, "Slice failed while some of its ports are still pending");
				return Ok(());
			}

			for settlement in COMPLETED_SETTLEMENTS {
				if self.apply_settlement(slice_id, settlement).await? {
					break;
				}
			}
		}

		let (macs, ports) = self.store.purge_slice(slice_id).await?;
		if macs > 0 || ports > 0 {
			debug!(slice_id, macs, ports, "Purged deleted MAC addresses and destroyed ports");
		}

		Ok(())
	}

	async fn apply_settlement(
		&self,
		slice_id: SliceId,
		settlement: SliceSettlement,
	) -> Result<bool, StoreError> {
		if !settlement.from.can_transition_to(settlement.to) {
			warn!(slice_id, ?settlement, "Illegal slice settlement");
			return Ok(false);
		}

		let settled = self.store.settle_slice(slice_id, settlement).await?;
		if settled {
			info!(
				slice_id,
				from = %settlement.from,
				to = %settlement.to,
				"Slice settled",
			);
		}

		Ok(settled)
	}
}
