//! In-memory bookkeeping of the asynchronous work a reconciliation pass has in flight.
//!
//! The ledger is an owned tree: slices own their per-switch [`PortUpdate`]s, which own their
//! per-port [`MacUpdate`]s. Nodes are addressed by [`PortKey`] and [`MacKey`] and every
//! mutation goes through [`Ledger`] so that counter changes always reach the root.

use std::collections::{hash_map::Entry, HashMap, VecDeque};

use tracing::{error, trace};

use crate::{
	transport::{DeviceTransaction, Transport},
	DatapathId, Dpid, PortId, SliceId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortKey {
	pub slice_id: SliceId,
	pub datapath_id: DatapathId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacKey {
	pub slice_id: SliceId,
	pub datapath_id: DatapathId,
	pub port_id: PortId,
}

impl PortKey {
	#[must_use]
	pub const fn new(slice_id: SliceId, datapath_id: DatapathId) -> Self {
		Self {
			slice_id,
			datapath_id,
		}
	}

	#[must_use]
	pub const fn mac(self, port_id: PortId) -> MacKey {
		MacKey {
			slice_id: self.slice_id,
			datapath_id: self.datapath_id,
			port_id,
		}
	}
}

impl MacKey {
	#[must_use]
	pub const fn port(self) -> PortKey {
		PortKey::new(self.slice_id, self.datapath_id)
	}
}

/// Which ledger node owns a device transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionContext {
	Port(PortKey),
	Mac(MacKey),
}

impl TransactionContext {
	#[must_use]
	pub const fn slice_id(self) -> SliceId {
		match self {
			Self::Port(key) => key.slice_id,
			Self::Mac(key) => key.slice_id,
		}
	}

	#[must_use]
	pub const fn port_key(self) -> PortKey {
		match self {
			Self::Port(key) => key,
			Self::Mac(key) => key.port(),
		}
	}
}

#[derive(Debug)]
pub struct SliceUpdate {
	slice_id: SliceId,
	n_transactions: usize,
	n_overlay_network_transactions: usize,
	failed: bool,
	ports: HashMap<DatapathId, PortUpdate>,
}

#[derive(Debug)]
pub struct PortUpdate {
	datapath_id: DatapathId,
	n_transactions: usize,
	n_direct_transactions: usize,
	n_overlay_network_transactions: usize,
	failed: bool,
	flow_entry_installation_started: bool,
	macs: HashMap<PortId, MacUpdate>,
	queue: VecDeque<DeviceTransaction>,
}

#[derive(Debug)]
pub struct MacUpdate {
	port_id: PortId,
	n_transactions: usize,
	failed: bool,
	queue: VecDeque<DeviceTransaction>,
}

impl SliceUpdate {
	fn new(slice_id: SliceId) -> Self {
		Self {
			slice_id,
			n_transactions: 0,
			n_overlay_network_transactions: 0,
			failed: false,
			ports: HashMap::new(),
		}
	}

	#[must_use]
	pub const fn slice_id(&self) -> SliceId {
		self.slice_id
	}

	#[must_use]
	pub const fn n_transactions(&self) -> usize {
		self.n_transactions
	}

	#[must_use]
	pub const fn n_overlay_network_transactions(&self) -> usize {
		self.n_overlay_network_transactions
	}

	#[must_use]
	pub const fn failed(&self) -> bool {
		self.failed
	}

	/// No device or overlay work outstanding anywhere below this slice.
	#[must_use]
	pub const fn is_complete(&self) -> bool {
		self.n_transactions == 0 && self.n_overlay_network_transactions == 0
	}

	pub fn ports(&self) -> impl Iterator<Item = &PortUpdate> {
		self.ports.values()
	}

	#[must_use]
	pub fn port(&self, datapath_id: DatapathId) -> Option<&PortUpdate> {
		self.ports.get(&datapath_id)
	}

	/// Whether every switch of this slice already went through flow synthesis.
	#[must_use]
	pub fn fully_scheduled(&self) -> bool {
		self.ports
			.values()
			.all(|port| port.flow_entry_installation_started)
	}
}

impl PortUpdate {
	fn new(datapath_id: DatapathId) -> Self {
		Self {
			datapath_id,
			n_transactions: 0,
			n_direct_transactions: 0,
			n_overlay_network_transactions: 0,
			failed: false,
			flow_entry_installation_started: false,
			macs: HashMap::new(),
			queue: VecDeque::new(),
		}
	}

	#[must_use]
	pub const fn datapath_id(&self) -> DatapathId {
		self.datapath_id
	}

	#[must_use]
	pub const fn n_transactions(&self) -> usize {
		self.n_transactions
	}

	#[must_use]
	pub const fn n_overlay_network_transactions(&self) -> usize {
		self.n_overlay_network_transactions
	}

	#[must_use]
	pub const fn failed(&self) -> bool {
		self.failed
	}

	#[must_use]
	pub const fn flow_entry_installation_started(&self) -> bool {
		self.flow_entry_installation_started
	}

	#[must_use]
	pub const fn is_complete(&self) -> bool {
		self.n_transactions == 0 && self.n_overlay_network_transactions == 0
	}

	pub fn macs(&self) -> impl Iterator<Item = &MacUpdate> {
		self.macs.values()
	}

	#[must_use]
	pub fn mac(&self, port_id: PortId) -> Option<&MacUpdate> {
		self.macs.get(&port_id)
	}

	/// Transactions queued on this port and its MAC updates, not yet accepted by the transport.
	#[must_use]
	pub fn queued(&self) -> usize {
		self.queue.len() + self.macs.values().map(|mac| mac.queue.len()).sum::<usize>()
	}
}

impl MacUpdate {
	fn new(port_id: PortId) -> Self {
		Self {
			port_id,
			n_transactions: 0,
			failed: false,
			queue: VecDeque::new(),
		}
	}

	#[must_use]
	pub const fn port_id(&self) -> PortId {
		self.port_id
	}

	#[must_use]
	pub const fn n_transactions(&self) -> usize {
		self.n_transactions
	}

	#[must_use]
	pub const fn failed(&self) -> bool {
		self.failed
	}

	#[must_use]
	pub const fn is_complete(&self) -> bool {
		self.n_transactions == 0
	}
}

/// Result of handing queued transactions to the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
	pub sent: usize,
	pub rejected: bool,
}

/// Outstanding work of every slice being reconciled, keyed by slice id.
#[derive(Debug, Default)]
pub struct Ledger {
	slices: HashMap<SliceId, SliceUpdate>,
}

impl Ledger {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.slices.is_empty()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.slices.len()
	}

	pub fn slice_ids(&self) -> impl Iterator<Item = SliceId> + '_ {
		self.slices.keys().copied()
	}

	#[must_use]
	pub fn slice(&self, slice_id: SliceId) -> Option<&SliceUpdate> {
		self.slices.get(&slice_id)
	}

	pub fn slice_or_insert(&mut self, slice_id: SliceId) -> &SliceUpdate {
		self.slices
			.entry(slice_id)
			.or_insert_with(|| SliceUpdate::new(slice_id))
	}

	#[must_use]
	pub fn port(&self, key: PortKey) -> Option<&PortUpdate> {
		self.slices
			.get(&key.slice_id)
			.and_then(|slice| slice.ports.get(&key.datapath_id))
	}

	pub fn port_or_insert(&mut self, key: PortKey) -> &PortUpdate {
		self.slices
			.entry(key.slice_id)
			.or_insert_with(|| SliceUpdate::new(key.slice_id))
			.ports
			.entry(key.datapath_id)
			.or_insert_with(|| PortUpdate::new(key.datapath_id))
	}

	#[must_use]
	pub fn mac(&self, key: MacKey) -> Option<&MacUpdate> {
		self.port(key.port())
			.and_then(|port| port.macs.get(&key.port_id))
	}

	pub fn mac_or_insert(&mut self, key: MacKey) -> &MacUpdate {
		self.slices
			.entry(key.slice_id)
			.or_insert_with(|| SliceUpdate::new(key.slice_id))
			.ports
			.entry(key.datapath_id)
			.or_insert_with(|| PortUpdate::new(key.datapath_id))
			.macs
			.entry(key.port_id)
			.or_insert_with(|| MacUpdate::new(key.port_id))
	}

	pub fn set_flow_entry_installation_started(&mut self, key: PortKey) {
		if let Some(port) = self.port_mut(key) {
			port.flow_entry_installation_started = true;
		}
	}

	/// Adds `n` outstanding transactions to the node and all its ancestors, creating missing
	/// nodes on the way.
	pub fn increment(&mut self, context: TransactionContext, n: usize) {
		let slice = self
			.slices
			.entry(context.slice_id())
			.or_insert_with(|| SliceUpdate::new(context.slice_id()));
		slice.n_transactions += n;

		let port = slice
			.ports
			.entry(context.port_key().datapath_id)
			.or_insert_with(|| PortUpdate::new(context.port_key().datapath_id));
		port.n_transactions += n;

		match context {
			TransactionContext::Port(_) => port.n_direct_transactions += n,
			TransactionContext::Mac(key) => {
				port.macs
					.entry(key.port_id)
					.or_insert_with(|| MacUpdate::new(key.port_id))
					.n_transactions += n;
			}
		}
	}

	/// Removes `n` outstanding transactions from the node and all its ancestors.
	///
	/// Returns `false`, leaving the ledger untouched, when the node is unknown or would
	/// underflow.
	pub fn decrement(&mut self, context: TransactionContext, n: usize) -> bool {
		let own = match context {
			TransactionContext::Port(key) => self.port(key).map(|port| port.n_direct_transactions),
			TransactionContext::Mac(key) => self.mac(key).map(MacUpdate::n_transactions),
		};

		match own {
			Some(count) if count >= n => {}
			Some(count) => {
				error!(?context, count, n, "Transaction counter would underflow");
				return false;
			}
			None => {
				error!(?context, "Decrementing transactions of an unknown ledger entry");
				return false;
			}
		}

		let key = context.port_key();
		let Some(slice) = self.slices.get_mut(&key.slice_id) else {
			return false;
		};
		slice.n_transactions -= n;

		let Some(port) = slice.ports.get_mut(&key.datapath_id) else {
			return false;
		};
		port.n_transactions -= n;

		match context {
			TransactionContext::Port(_) => port.n_direct_transactions -= n,
			TransactionContext::Mac(key) => {
				if let Some(mac) = port.macs.get_mut(&key.port_id) {
					mac.n_transactions -= n;
				}
			}
		}

		true
	}

	pub fn increment_overlay(&mut self, key: PortKey) {
		let slice = self
			.slices
			.entry(key.slice_id)
			.or_insert_with(|| SliceUpdate::new(key.slice_id));
		slice.n_overlay_network_transactions += 1;
		slice
			.ports
			.entry(key.datapath_id)
			.or_insert_with(|| PortUpdate::new(key.datapath_id))
			.n_overlay_network_transactions += 1;
	}

	pub fn decrement_overlay(&mut self, key: PortKey) -> bool {
		let Some(slice) = self.slices.get_mut(&key.slice_id) else {
			error!(?key, "Decrementing overlay transactions of an unknown slice");
			return false;
		};

		match slice.ports.get_mut(&key.datapath_id) {
			Some(port) if port.n_overlay_network_transactions > 0 => {
				port.n_overlay_network_transactions -= 1;
				slice.n_overlay_network_transactions -= 1;
				true
			}
			_ => {
				error!(?key, "Overlay transaction counter would underflow");
				false
			}
		}
	}

	/// Flags the node and every ancestor as failed. Children keep their own flag.
	pub fn mark_failed(&mut self, context: TransactionContext) {
		let key = context.port_key();
		let slice = self
			.slices
			.entry(key.slice_id)
			.or_insert_with(|| SliceUpdate::new(key.slice_id));
		slice.failed = true;

		let port = slice
			.ports
			.entry(key.datapath_id)
			.or_insert_with(|| PortUpdate::new(key.datapath_id));
		port.failed = true;

		if let TransactionContext::Mac(key) = context {
			port.macs
				.entry(key.port_id)
				.or_insert_with(|| MacUpdate::new(key.port_id))
				.failed = true;
		}
	}

	pub fn mark_slice_failed(&mut self, slice_id: SliceId) {
		self.slices
			.entry(slice_id)
			.or_insert_with(|| SliceUpdate::new(slice_id))
			.failed = true;
	}

	/// Queues a transaction on its owning node and accounts for it.
	pub fn enqueue(&mut self, context: TransactionContext, transaction: DeviceTransaction) {
		self.increment(context, 1);

		let queue = match context {
			TransactionContext::Port(key) => self.port_mut(key).map(|port| &mut port.queue),
			TransactionContext::Mac(key) => self.mac_mut(key).map(|mac| &mut mac.queue),
		};

		if let Some(queue) = queue {
			queue.push_back(transaction);
		}
	}

	/// Hands every queued transaction of a switch to the transport, port queue first.
	///
	/// A rejected transaction goes back to the head of its queue and stops that queue; it stays
	/// accounted for until its completion arrives.
	pub fn flush(&mut self, key: PortKey, transport: &dyn Transport) -> FlushOutcome {
		let mut outcome = FlushOutcome::default();

		let Some(port) = self.port_mut(key) else {
			return outcome;
		};

		drain_queue(&mut port.queue, transport, &mut outcome);
		for mac in port.macs.values_mut() {
			drain_queue(&mut mac.queue, transport, &mut outcome);
		}

		trace!(
			slice_id = key.slice_id,
			datapath_id = %Dpid(key.datapath_id),
			sent = outcome.sent,
			rejected = outcome.rejected,
			"Flushed device transactions",
		);

		outcome
	}

	/// Drops the slice's aggregates once it has been persisted.
	pub fn discard_slice(&mut self, slice_id: SliceId) -> Option<SliceUpdate> {
		match self.slices.entry(slice_id) {
			Entry::Occupied(entry) => {
				if !entry.get().is_complete() {
					error!(
						slice_id,
						n_transactions = entry.get().n_transactions,
						"Refusing to discard a slice update with outstanding work",
					);
					return None;
				}
				Some(entry.remove())
			}
			Entry::Vacant(_) => None,
		}
	}

	fn port_mut(&mut self, key: PortKey) -> Option<&mut PortUpdate> {
		self.slices
			.get_mut(&key.slice_id)
			.and_then(|slice| slice.ports.get_mut(&key.datapath_id))
	}

	fn mac_mut(&mut self, key: MacKey) -> Option<&mut MacUpdate> {
		self.port_mut(key.port())
			.and_then(|port| port.macs.get_mut(&key.port_id))
	}
}

fn drain_queue(
	queue: &mut VecDeque<DeviceTransaction>,
	transport: &dyn Transport,
	outcome: &mut FlushOutcome,
) {
	while let Some(transaction) = queue.pop_front() {
		match transport.execute_transaction(transaction) {
			Ok(()) => outcome.sent += 1,
			Err(transaction) => {
				queue.push_front(transaction);
				outcome.rejected = true;
				break;
			}
		}
	}
}
