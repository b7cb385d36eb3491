use std::collections::HashMap;

use crate::{Action, FlowCommand, FlowMod, Match, OFPP_NONE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEntry {
	pub cookie: u64,
	pub actions: Vec<Action>,
}

impl FlowEntry {
	fn outputs_to(&self, port: u16) -> bool {
		self.actions
			.iter()
			.any(|action| matches!(action, Action::Output { port: out } if *out == port))
	}
}

/// Simulated flow tables of a single switch.
///
/// Only the strict commands are modelled: an entry is identified by its table, priority and
/// exact match, so replaying the same [`FlowMod`] never changes the outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowTable {
	entries: HashMap<(u8, u16, Match), FlowEntry>,
}

impl FlowTable {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn apply(&mut self, flow_mod: &FlowMod) {
		let key = (
			flow_mod.table_id,
			flow_mod.priority,
			flow_mod.flow_match.clone(),
		);

		match flow_mod.command {
			FlowCommand::ModifyStrict => {
				self.entries.insert(
					key,
					FlowEntry {
						cookie: flow_mod.cookie,
						actions: flow_mod.actions.clone(),
					},
				);
			}
			FlowCommand::DeleteStrict => {
				let restricted = flow_mod.out_port != OFPP_NONE;
				if self
					.entries
					.get(&key)
					.is_some_and(|entry| !restricted || entry.outputs_to(flow_mod.out_port))
				{
					self.entries.remove(&key);
				}
			}
		}
	}

	pub fn apply_all<'a>(&mut self, flow_mods: impl IntoIterator<Item = &'a FlowMod>) {
		flow_mods
			.into_iter()
			.for_each(|flow_mod| self.apply(flow_mod));
	}

	#[must_use]
	pub fn get(&self, table_id: u8, priority: u16, flow_match: &Match) -> Option<&FlowEntry> {
		self.entries.get(&(table_id, priority, flow_match.clone()))
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}
