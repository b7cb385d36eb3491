use strum::Display;

use crate::{
	ledger::{PortKey, TransactionContext},
	overlay::OverlayStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
	Succeeded,
	Failed,
}

/// Asynchronous completions delivered to the reconciler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
	TransactionCompleted {
		context: TransactionContext,
		outcome: Outcome,
	},
	OverlayCompleted {
		key: PortKey,
		status: OverlayStatus,
	},
}
