use pretty_assertions::assert_eq;
use vnm_openflow::{
	Action, FlowMod, FlowTable, MacAddress, Match, VlanTci, OFPP_IN_PORT, OFPP_NONE,
};

fn forwarding_entry(port: u16) -> FlowMod {
	FlowMod::modify_strict(
		2,
		512,
		Match::default()
			.with_reg0(7)
			.with_eth_dst(MacAddress::from(0x0200_0000_0001)),
	)
	.with_cookie(7)
	.with_actions(vec![Action::StripVlan, Action::Output { port }])
}

#[test]
fn modify_strict_replaces_actions() {
	let mut table = FlowTable::new();
	table.apply(&forwarding_entry(1));
	table.apply(&forwarding_entry(4));

	assert_eq!(table.len(), 1);
	let entry = table
		.get(2, 512, &forwarding_entry(4).flow_match)
		.expect("entry must be installed");
	assert_eq!(
		entry.actions,
		vec![Action::StripVlan, Action::Output { port: 4 }]
	);
}

#[test]
fn replay_is_idempotent() {
	let ingress = FlowMod::modify_strict(
		0,
		128,
		Match::default()
			.with_in_port(1)
			.with_vlan_tci(VlanTci::untagged()),
	)
	.with_actions(vec![
		Action::RegLoad {
			register: 0,
			offset: 0,
			n_bits: 32,
			value: 7,
		},
		Action::Resubmit {
			in_port: OFPP_IN_PORT,
			table: 2,
		},
	]);
	let operations = vec![ingress, forwarding_entry(1)];

	let mut once = FlowTable::new();
	once.apply_all(&operations);

	let mut twice = once.clone();
	twice.apply_all(&operations);

	assert_eq!(once, twice);
}

#[test]
fn delete_strict_honours_out_port() {
	let mut table = FlowTable::new();
	table.apply(&forwarding_entry(1));

	let flow_match = forwarding_entry(1).flow_match;
	table.apply(&FlowMod::delete_strict(2, 512, flow_match.clone()).with_out_port(9));
	assert_eq!(table.len(), 1);

	table.apply(&FlowMod::delete_strict(2, 512, flow_match.clone()).with_out_port(1));
	assert!(table.is_empty());

	// Deleting what is already gone changes nothing
	table.apply(&FlowMod::delete_strict(2, 512, flow_match).with_out_port(OFPP_NONE));
	assert!(table.is_empty());
}

#[test]
fn flow_mod_serializes() {
	let json = serde_json::to_value(forwarding_entry(3)).expect("serializable flow mod");
	assert_eq!(json["flow_match"]["eth_dst"], "02:00:00:00:00:01");
	assert_eq!(json["command"], "ModifyStrict");
}
