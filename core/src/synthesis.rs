//! Flow programming operations converging a switch onto a slice's desired state.
//!
//! Packets are classified on [`CLASSIFIER_TABLE`]: the ingress port and VLAN select the slice,
//! whose id is loaded into register 0 before resubmitting to [`FORWARDING_TABLE`]. There, known
//! destination MACs are unicast and everything else floods to the slice's other ports.
//!
//! Every operation is a strict modification or deletion, so replaying any of them against a
//! switch that already converged leaves it unchanged.

use vnm_openflow::{
	is_valid_vlan_id, Action, FlowMod, MacAddress, Match, VlanTci, OFPP_IN_PORT,
};

use crate::{state::PortType, PortId, SliceId};

pub const CLASSIFIER_TABLE: u8 = 0;
pub const FORWARDING_TABLE: u8 = 2;

pub const PORT_PRIORITY: u16 = 128;
/// Local delivery wins over tunnel delivery when both know a MAC.
pub const CUSTOMER_MAC_PRIORITY: u16 = 512;
pub const OVERLAY_MAC_PRIORITY: u16 = 256;

const SLICE_REGISTER: u8 = 0;

/// A slice port with its switch port number already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicePort {
	pub port_id: PortId,
	pub port_no: u16,
	pub vid: u16,
	pub port_type: PortType,
}

impl SlicePort {
	fn vlan_match(&self) -> Match {
		Match::default()
			.with_in_port(self.port_no)
			.with_vlan_tci(VlanTci::for_vid(self.vid))
	}

	const fn mac_priority(&self) -> u16 {
		match self.port_type {
			PortType::Customer => CUSTOMER_MAC_PRIORITY,
			PortType::Overlay => OVERLAY_MAC_PRIORITY,
		}
	}
}

#[derive(Debug, Clone, Copy)]
pub enum DesiredChange<'a> {
	/// Ports that must carry the slice. Each one floods to all the others.
	InstallPorts(&'a [SlicePort]),
	DeletePorts(&'a [SlicePort]),
	InstallMacs {
		port: &'a SlicePort,
		macs: &'a [MacAddress],
	},
	DeleteMacs {
		port: &'a SlicePort,
		macs: &'a [MacAddress],
	},
}

#[must_use]
pub fn synthesize(slice_id: SliceId, change: DesiredChange<'_>) -> Vec<FlowMod> {
	let cookie = u64::from(slice_id);

	let flow_mods = match change {
		DesiredChange::InstallPorts(ports) => ports
			.iter()
			.flat_map(|port| {
				[
					ingress_entry(slice_id, port),
					flood_entry(slice_id, port, ports),
				]
			})
			.collect::<Vec<_>>(),

		DesiredChange::DeletePorts(ports) => ports
			.iter()
			.flat_map(|port| {
				[
					FlowMod::delete_strict(CLASSIFIER_TABLE, PORT_PRIORITY, port.vlan_match()),
					FlowMod::delete_strict(
						FORWARDING_TABLE,
						PORT_PRIORITY,
						port.vlan_match().with_reg0(slice_id),
					),
				]
			})
			.collect(),

		DesiredChange::InstallMacs { port, macs } => macs
			.iter()
			.flat_map(|mac| {
				let local = (port.port_type == PortType::Customer).then(|| {
					FlowMod::modify_strict(
						CLASSIFIER_TABLE,
						CUSTOMER_MAC_PRIORITY,
						port.vlan_match().with_eth_dst(*mac),
					)
				});

				local.into_iter().chain([FlowMod::modify_strict(
					FORWARDING_TABLE,
					port.mac_priority(),
					Match::default().with_reg0(slice_id).with_eth_dst(*mac),
				)
				.with_actions(vec![
					vlan_action(port.vid),
					Action::Output { port: port.port_no },
				])])
			})
			.collect(),

		DesiredChange::DeleteMacs { port, macs } => macs
			.iter()
			.flat_map(|mac| {
				let local = (port.port_type == PortType::Customer).then(|| {
					FlowMod::delete_strict(
						CLASSIFIER_TABLE,
						CUSTOMER_MAC_PRIORITY,
						port.vlan_match().with_eth_dst(*mac),
					)
				});

				local.into_iter().chain([FlowMod::delete_strict(
					FORWARDING_TABLE,
					port.mac_priority(),
					Match::default().with_reg0(slice_id).with_eth_dst(*mac),
				)
				.with_out_port(port.port_no)])
			})
			.collect(),
	};

	flow_mods
		.into_iter()
		.map(|flow_mod| flow_mod.with_cookie(cookie))
		.collect()
}

fn ingress_entry(slice_id: SliceId, port: &SlicePort) -> FlowMod {
	FlowMod::modify_strict(CLASSIFIER_TABLE, PORT_PRIORITY, port.vlan_match()).with_actions(vec![
		Action::RegLoad {
			register: SLICE_REGISTER,
			offset: 0,
			n_bits: 32,
			value: u64::from(slice_id),
		},
		Action::Resubmit {
			in_port: OFPP_IN_PORT,
			table: FORWARDING_TABLE,
		},
	])
}

fn flood_entry(slice_id: SliceId, input: &SlicePort, ports: &[SlicePort]) -> FlowMod {
	let mut actions = Vec::with_capacity(ports.len() * 2);
	let mut current_vid = if is_valid_vlan_id(input.vid) {
		input.vid
	} else {
		0
	};

	for output in ports {
		if output.port_no == input.port_no && output.vid == input.vid {
			continue;
		}

		if is_valid_vlan_id(output.vid) {
			if current_vid != output.vid {
				actions.push(Action::SetVlanVid(output.vid));
				current_vid = output.vid;
			}
		} else if is_valid_vlan_id(current_vid) {
			actions.push(Action::StripVlan);
			current_vid = 0;
		}

		actions.push(Action::Output {
			port: if output.port_no == input.port_no {
				OFPP_IN_PORT
			} else {
				output.port_no
			},
		});
	}

	FlowMod::modify_strict(
		FORWARDING_TABLE,
		PORT_PRIORITY,
		input.vlan_match().with_reg0(slice_id),
	)
	.with_actions(actions)
}

const fn vlan_action(vid: u16) -> Action {
	if is_valid_vlan_id(vid) {
		Action::SetVlanVid(vid)
	} else {
		Action::StripVlan
	}
}
