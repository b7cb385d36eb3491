//! Hand-off point between the engine and whatever talks OpenFlow to the switches.

use std::fmt;

use async_channel as chan;
use tracing::warn;
use vnm_openflow::FlowMod;

use crate::{
	event::{Event, Outcome},
	ledger::TransactionContext,
	DatapathId, Dpid,
};

/// A programming message queued for one switch, together with the continuation that reports
/// its outcome back to the reconciler.
///
/// Completing consumes the transaction, so a transport can only report once. Dropping it without
/// completing reports a failure.
pub struct DeviceTransaction {
	pub datapath_id: DatapathId,
	pub message: FlowMod,
	completion: Option<Completion>,
}

struct Completion {
	context: TransactionContext,
	events_tx: chan::Sender<Event>,
}

impl Completion {
	fn notify(self, outcome: Outcome) {
		let context = self.context;
		if self
			.events_tx
			.try_send(Event::TransactionCompleted { context, outcome })
			.is_err()
		{
			warn!(?context, %outcome, "Reconciler is gone, dropping transaction completion");
		}
	}
}

impl DeviceTransaction {
	pub(crate) fn new(
		datapath_id: DatapathId,
		message: FlowMod,
		context: TransactionContext,
		events_tx: chan::Sender<Event>,
	) -> Self {
		Self {
			datapath_id,
			message,
			completion: Some(Completion { context, events_tx }),
		}
	}

	#[must_use]
	pub fn context(&self) -> Option<TransactionContext> {
		self.completion.as_ref().map(|completion| completion.context)
	}

	pub fn succeeded(mut self) {
		if let Some(completion) = self.completion.take() {
			completion.notify(Outcome::Succeeded);
		}
	}

	pub fn failed(mut self) {
		if let Some(completion) = self.completion.take() {
			completion.notify(Outcome::Failed);
		}
	}
}

impl Drop for DeviceTransaction {
	fn drop(&mut self) {
		if let Some(completion) = self.completion.take() {
			warn!(
				datapath_id = %Dpid(self.datapath_id),
				context = ?completion.context,
				"Transaction dropped without completion, reporting it as failed",
			);
			completion.notify(Outcome::Failed);
		}
	}
}

impl fmt::Debug for DeviceTransaction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DeviceTransaction")
			.field("datapath_id", &self.datapath_id)
			.field("message", &self.message)
			.field("context", &self.context())
			.finish()
	}
}

/// Device transaction transport.
///
/// `execute_transaction` must return immediately. Accepting a transaction means the transport
/// now owns it and will eventually call [`DeviceTransaction::succeeded`] or
/// [`DeviceTransaction::failed`]. A busy transport hands the transaction back so it can be
/// retried on a later flush.
pub trait Transport: Send + Sync {
	fn execute_transaction(&self, transaction: DeviceTransaction) -> Result<(), DeviceTransaction>;
}
