use std::fmt;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{
	is_valid_vlan_id, MacAddress, BUFFER_ID_NONE, OFPP_NONE, OFP_DEFAULT_PRIORITY, VLAN_CFI,
};

/// Masked match on the 802.1Q tag control information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VlanTci {
	pub value: u16,
	pub mask: u16,
}

impl VlanTci {
	/// Frames carrying a VLAN header with exactly this vid.
	#[must_use]
	pub const fn tagged(vid: u16) -> Self {
		Self {
			value: VLAN_CFI | vid,
			mask: 0x1fff,
		}
	}

	/// Frames without any VLAN header.
	#[must_use]
	pub const fn untagged() -> Self {
		Self {
			value: 0,
			mask: 0xffff,
		}
	}

	/// Tagged when `vid` is a usable VLAN id, untagged otherwise.
	#[must_use]
	pub const fn for_vid(vid: u16) -> Self {
		if is_valid_vlan_id(vid) {
			Self::tagged(vid)
		} else {
			Self::untagged()
		}
	}
}

/// The subset of the match fields the engine programs. Absent fields are wildcarded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Match {
	pub in_port: Option<u16>,
	pub vlan_tci: Option<VlanTci>,
	/// Nicira register 0, as `(value, mask)`.
	pub reg0: Option<(u32, u32)>,
	pub eth_dst: Option<MacAddress>,
}

impl Match {
	#[must_use]
	pub fn with_in_port(mut self, port: u16) -> Self {
		self.in_port = Some(port);
		self
	}

	#[must_use]
	pub fn with_vlan_tci(mut self, tci: VlanTci) -> Self {
		self.vlan_tci = Some(tci);
		self
	}

	#[must_use]
	pub fn with_reg0(mut self, value: u32) -> Self {
		self.reg0 = Some((value, u32::MAX));
		self
	}

	#[must_use]
	pub fn with_eth_dst(mut self, mac: MacAddress) -> Self {
		self.eth_dst = Some(mac);
		self
	}
}

impl fmt::Display for Match {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut fields = Vec::with_capacity(4);
		if let Some(port) = self.in_port {
			fields.push(format!("in_port={port}"));
		}
		if let Some(VlanTci { value, mask }) = self.vlan_tci {
			fields.push(format!("vlan_tci={value:#06x}/{mask:#06x}"));
		}
		if let Some((value, mask)) = self.reg0 {
			fields.push(format!("reg0={value:#x}/{mask:#x}"));
		}
		if let Some(mac) = self.eth_dst {
			fields.push(format!("dl_dst={mac}"));
		}

		if fields.is_empty() {
			f.write_str("*")
		} else {
			f.write_str(&fields.join(","))
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
	/// Nicira `reg_load`: write `value` into `n_bits` of `register` starting at `offset`.
	RegLoad {
		register: u8,
		offset: u8,
		n_bits: u8,
		value: u64,
	},
	/// Nicira `resubmit_table`: re-run the lookup on `table` as if received on `in_port`.
	Resubmit { in_port: u16, table: u8 },
	SetVlanVid(u16),
	StripVlan,
	Output { port: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowCommand {
	ModifyStrict,
	DeleteStrict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMod {
	pub cookie: u64,
	pub command: FlowCommand,
	pub table_id: u8,
	pub priority: u16,
	pub idle_timeout: u16,
	pub hard_timeout: u16,
	pub buffer_id: u32,
	pub out_port: u16,
	pub flow_match: Match,
	pub actions: Vec<Action>,
}

impl FlowMod {
	/// A permanent strict modification, which installs the entry when it is missing.
	#[must_use]
	pub const fn modify_strict(table_id: u8, priority: u16, flow_match: Match) -> Self {
		Self {
			cookie: 0,
			command: FlowCommand::ModifyStrict,
			table_id,
			priority,
			idle_timeout: 0,
			hard_timeout: 0,
			buffer_id: BUFFER_ID_NONE,
			out_port: OFPP_NONE,
			flow_match,
			actions: Vec::new(),
		}
	}

	#[must_use]
	pub fn delete_strict(table_id: u8, priority: u16, flow_match: Match) -> Self {
		Self {
			command: FlowCommand::DeleteStrict,
			..Self::modify_strict(table_id, priority, flow_match)
		}
	}

	#[must_use]
	pub fn with_cookie(mut self, cookie: u64) -> Self {
		self.cookie = cookie;
		self
	}

	#[must_use]
	pub fn with_out_port(mut self, port: u16) -> Self {
		self.out_port = port;
		self
	}

	#[must_use]
	pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
		self.actions = actions;
		self
	}
}

impl Default for FlowMod {
	fn default() -> Self {
		Self::modify_strict(0, OFP_DEFAULT_PRIORITY, Match::default())
	}
}

impl fmt::Display for FlowMod {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{} table={} priority={} cookie={:#x} match=[{}] actions={}",
			self.command,
			self.table_id,
			self.priority,
			self.cookie,
			self.flow_match,
			self.actions.len()
		)
	}
}
