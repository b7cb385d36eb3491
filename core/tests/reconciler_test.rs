//! Integration tests for the reconciliation loop
//!
//! Each test seeds a memory store, runs passes against a recording transport and completes the
//! dispatched transactions by hand, checking what ends up persisted.

mod helpers;

use std::{collections::HashSet, time::Duration};

use async_channel as chan;
use helpers::*;
use pretty_assertions::assert_eq;
use tracing_test::traced_test;
use vnm_core::{
	ledger::PortKey,
	registry::{apply_port_status, PortStatus, SwitchRegistry},
	state::{MacState, PortState, SliceState},
	store::{MacRow, PortRow},
	synthesis::{CLASSIFIER_TABLE, CUSTOMER_MAC_PRIORITY, FORWARDING_TABLE, OVERLAY_MAC_PRIORITY},
	ReconcilerConfig,
};
use vnm_openflow::{FlowCommand, FlowMod, FlowTable, Match, OFPP_NONE};

fn is_mac_op(flow_mod: &FlowMod) -> bool {
	flow_mod.priority == CUSTOMER_MAC_PRIORITY || flow_mod.priority == OVERLAY_MAC_PRIORITY
}

fn entry_keys(flow_mods: &[FlowMod]) -> HashSet<(u8, u16, Match)> {
	flow_mods
		.iter()
		.map(|flow_mod| (flow_mod.table_id, flow_mod.priority, flow_mod.flow_match.clone()))
		.collect()
}

#[tokio::test]
#[traced_test]
async fn single_customer_port_is_confirmed() {
	let mut h = Harness::new();
	h.own_switch(DPID_A).await;
	h.slice(1, SliceState::ReadyToUpdate).await;
	h.port(customer_port(10, DPID_A, 1, 3, 0, PortState::ReadyToUpdate))
		.await;

	h.reconciler.tick().await;

	assert_eq!(h.store.slice_state(1).await, Some(SliceState::Updating));
	assert_eq!(h.port_state(10).await, Some(PortState::Updating));

	let messages = h.transport.messages();
	assert_eq!(
		messages
			.iter()
			.filter(|flow_mod| flow_mod.table_id == CLASSIFIER_TABLE)
			.count(),
		1
	);
	assert_eq!(messages.iter().filter(|flow_mod| is_mac_op(flow_mod)).count(), 0);
	assert!(messages
		.iter()
		.all(|flow_mod| flow_mod.command == FlowCommand::ModifyStrict && flow_mod.cookie == 1));

	let mut table = FlowTable::default();
	h.transport.complete_on(&mut table);
	h.drain_events().await;

	assert_eq!(h.port_state(10).await, Some(PortState::Confirmed));
	assert_eq!(h.store.slice_state(1).await, Some(SliceState::Confirmed));
	assert!(h.reconciler.ledger().is_empty());
	assert_eq!(table.len(), 2);
}

#[tokio::test]
#[traced_test]
async fn destroyed_port_is_removed_from_switch_and_store() {
	let mut h = Harness::new();
	h.own_switch(DPID_A).await;
	h.slice(1, SliceState::ReadyToUpdate).await;
	h.port(customer_port(10, DPID_A, 1, 3, 0, PortState::ReadyToUpdate))
		.await;

	let mut table = FlowTable::default();

	h.reconciler.tick().await;
	let installed = h.transport.messages();
	h.transport.complete_on(&mut table);
	h.drain_events().await;
	assert_eq!(h.store.slice_state(1).await, Some(SliceState::Confirmed));

	h.store.set_slice_state(1, SliceState::ReadyToUpdate).await;
	h.store.set_port_state(10, PortState::ReadyToDestroy).await;

	h.reconciler.tick().await;
	assert_eq!(h.port_state(10).await, Some(PortState::Destroying));

	let deleted = h.transport.messages();
	assert!(deleted
		.iter()
		.all(|flow_mod| flow_mod.command == FlowCommand::DeleteStrict));
	assert_eq!(entry_keys(&deleted), entry_keys(&installed));

	h.transport.complete_on(&mut table);
	h.drain_events().await;

	assert!(table.is_empty());
	assert_eq!(h.store.port(10).await, None);
	assert_eq!(h.store.slice_state(1).await, Some(SliceState::Confirmed));
}

#[tokio::test]
#[traced_test]
async fn destroying_the_last_port_destroys_the_slice() {
	let mut h = Harness::new();
	h.own_switch(DPID_A).await;
	h.slice(1, SliceState::ReadyToDestroy).await;
	h.port(customer_port(10, DPID_A, 1, 3, 0, PortState::ReadyToDestroy))
		.await;

	h.reconciler.tick().await;
	assert_eq!(h.store.slice_state(1).await, Some(SliceState::Destroying));

	h.succeed_all().await;

	assert_eq!(h.store.slice_state(1).await, None);
	assert_eq!(h.store.port(10).await, None);
}

#[tokio::test]
#[traced_test]
async fn failed_mac_install_marks_mac_port_and_slice() {
	let mut h = Harness::new();
	h.own_switch(DPID_A).await;
	h.slice(1, SliceState::ReadyToUpdate).await;
	h.port(customer_port(10, DPID_A, 1, 3, 0, PortState::ReadyToUpdate))
		.await;

	let mac = "52:54:00:00:00:01".parse().unwrap();
	h.store
		.insert_mac(MacRow {
			slice_id: 1,
			port_id: 10,
			mac,
			state: MacState::ReadyToInstall,
		})
		.await;

	h.reconciler.tick().await;

	assert_eq!(h.store.mac_state(1, 10, mac).await, Some(MacState::Installing));
	assert_eq!(
		h.transport
			.messages()
			.iter()
			.filter(|flow_mod| is_mac_op(flow_mod))
			.count(),
		2
	);

	for transaction in h.transport.take() {
		let message = &transaction.message;
		if is_mac_op(message) && message.table_id == FORWARDING_TABLE {
			transaction.failed();
		} else {
			transaction.succeeded();
		}
	}
	h.drain_events().await;

	assert_eq!(h.store.mac_state(1, 10, mac).await, Some(MacState::InstallFailed));
	assert_eq!(h.port_state(10).await, Some(PortState::UpdateFailed));
	assert_eq!(h.store.slice_state(1).await, Some(SliceState::UpdateFailed));
	assert!(h.reconciler.ledger().is_empty());
}

#[tokio::test]
#[traced_test]
async fn overlay_port_mac_only_programs_forwarding() {
	let mut h = Harness::new();
	h.own_switch(DPID_A).await;
	h.store.add_port(DPID_A, 100, "vxlan1").await.unwrap();
	h.slice(1, SliceState::ReadyToUpdate).await;
	h.port(overlay_port(20, DPID_A, 1, 100, PortState::ReadyToUpdate))
		.await;

	let mac = "52:54:00:00:00:02".parse().unwrap();
	h.store
		.insert_mac(MacRow {
			slice_id: 1,
			port_id: 20,
			mac,
			state: MacState::ReadyToInstall,
		})
		.await;

	h.reconciler.tick().await;

	let mac_ops = h
		.transport
		.messages()
		.into_iter()
		.filter(is_mac_op)
		.collect::<Vec<_>>();
	assert_eq!(mac_ops.len(), 1);
	assert_eq!(mac_ops[0].table_id, FORWARDING_TABLE);
	assert_eq!(mac_ops[0].priority, OVERLAY_MAC_PRIORITY);

	// The tunnel interface already exists, nothing to ask the agent
	assert!(h.agent.requests().is_empty());

	h.succeed_all().await;

	assert_eq!(h.store.mac_state(1, 20, mac).await, Some(MacState::Installed));
	assert_eq!(h.port_state(20).await, Some(PortState::Confirmed));
}

#[tokio::test]
#[traced_test]
async fn mac_deletion_settles_and_purges() {
	let mut h = Harness::new();
	h.own_switch(DPID_A).await;
	h.slice(1, SliceState::ReadyToUpdate).await;
	h.port(customer_port(10, DPID_A, 1, 3, 0, PortState::ReadyToUpdate))
		.await;

	let mac = "52:54:00:00:00:03".parse().unwrap();
	h.store
		.insert_mac(MacRow {
			slice_id: 1,
			port_id: 10,
			mac,
			state: MacState::ReadyToDelete,
		})
		.await;

	h.reconciler.tick().await;

	let deletes = h
		.transport
		.messages()
		.into_iter()
		.filter(|flow_mod| is_mac_op(flow_mod))
		.collect::<Vec<_>>();
	assert_eq!(deletes.len(), 2);
	assert!(deletes
		.iter()
		.all(|flow_mod| flow_mod.command == FlowCommand::DeleteStrict));

	h.succeed_all().await;

	assert_eq!(h.store.mac_state(1, 10, mac).await, None);
	assert_eq!(h.store.slice_state(1).await, Some(SliceState::Confirmed));
}

#[tokio::test]
#[traced_test]
async fn overlay_attach_in_progress_is_counted_once() {
	let mut h = Harness::new();
	h.own_switch(DPID_A).await;
	h.overlay_network(1, DPID_A).await;
	h.slice(1, SliceState::ReadyToUpdate).await;
	h.port(PortRow {
		port_name: Some("vxlan1".to_string()),
		..overlay_port(20, DPID_A, 1, OFPP_NONE, PortState::ReadyToUpdate)
	})
	.await;

	let key = PortKey::new(1, DPID_A);

	for _ in 0..3 {
		h.reconciler.tick().await;
		assert_eq!(
			h.reconciler
				.ledger()
				.port(key)
				.unwrap()
				.n_overlay_network_transactions(),
			1
		);
	}
	assert_eq!(h.transport.pending(), 0);
	assert_eq!(h.reconciler.overlay().in_flight(), 1);

	// Reflector registration and agent request
	h.reconciler.step().await;
	h.reconciler.step().await;

	let mut uris = h
		.agent
		.requests()
		.into_iter()
		.map(|request| request.uri)
		.collect::<Vec<_>>();
	uris.sort();
	assert_eq!(
		uris,
		vec![
			"http://192.0.2.1:8080/overlay_networks".to_string(),
			"http://198.51.100.1:8080/reflector/1".to_string(),
		]
	);

	// The switch reports the new tunnel interface
	apply_port_status(
		h.store.as_ref(),
		h.store.as_ref(),
		DPID_A,
		&PortStatus::Added {
			port_no: 100,
			name: "vxlan1".to_string(),
		},
	)
	.await
	.unwrap();

	h.reconciler.poll_overlay_ports().await;
	h.drain_events().await;

	assert_eq!(
		h.reconciler
			.ledger()
			.port(key)
			.unwrap()
			.n_overlay_network_transactions(),
		0
	);

	h.reconciler.tick().await;
	assert!(h.transport.pending() > 0);
	assert!(h
		.transport
		.messages()
		.iter()
		.all(|flow_mod| flow_mod.flow_match.in_port.map_or(true, |port_no| port_no == 100)));

	h.succeed_all().await;

	assert_eq!(h.port_state(20).await, Some(PortState::Confirmed));
	assert_eq!(h.store.slice_state(1).await, Some(SliceState::Confirmed));
}

#[tokio::test]
#[traced_test]
async fn unscheduled_sibling_defers_finalization() {
	let mut h = Harness::new();
	h.own_switch(DPID_A).await;
	h.own_switch(DPID_B).await;
	h.slice(1, SliceState::ReadyToUpdate).await;
	h.port(customer_port(10, DPID_A, 1, 3, 0, PortState::ReadyToUpdate))
		.await;
	// No overlay network configured, so attaching fails
	h.port(overlay_port(20, DPID_B, 1, 100, PortState::ReadyToUpdate))
		.await;

	h.reconciler.tick().await;

	let slice = h.reconciler.ledger().slice(1).unwrap();
	assert!(slice.failed());
	assert!(!slice.fully_scheduled());
	assert!(!slice
		.port(DPID_B)
		.unwrap()
		.flow_entry_installation_started());

	h.succeed_all().await;

	assert!(h.reconciler.ledger().slice(1).unwrap().is_complete());
	assert_eq!(h.port_state(10).await, Some(PortState::Updating));
	assert_eq!(h.port_state(20).await, Some(PortState::Updating));
	assert_eq!(h.store.slice_state(1).await, Some(SliceState::Updating));

	// The failed slice skips synthesis on the remaining switch and settles
	h.reconciler.tick().await;

	assert_eq!(h.transport.pending(), 0);
	assert_eq!(h.port_state(10).await, Some(PortState::Confirmed));
	assert_eq!(h.port_state(20).await, Some(PortState::UpdateFailed));
	assert_eq!(h.store.slice_state(1).await, Some(SliceState::UpdateFailed));
	assert!(h.reconciler.ledger().is_empty());
}

#[tokio::test]
#[traced_test]
async fn failed_slice_still_purges_destroyed_rows() {
	let mut h = Harness::new();
	h.own_switch(DPID_A).await;
	h.own_switch(DPID_B).await;
	h.slice(1, SliceState::ReadyToUpdate).await;
	h.port(customer_port(10, DPID_A, 1, 3, 0, PortState::ReadyToDestroy))
		.await;
	h.port(customer_port(20, DPID_B, 1, 4, 0, PortState::ReadyToUpdate))
		.await;

	let mac = "52:54:00:00:00:10".parse().unwrap();
	h.store
		.insert_mac(MacRow {
			slice_id: 1,
			port_id: 10,
			mac,
			state: MacState::ReadyToDelete,
		})
		.await;

	h.reconciler.tick().await;

	for transaction in h.transport.take() {
		if transaction.datapath_id == DPID_A {
			transaction.succeeded();
		} else {
			transaction.failed();
		}
	}
	h.drain_events().await;

	assert_eq!(h.store.slice_state(1).await, Some(SliceState::UpdateFailed));
	assert_eq!(h.port_state(20).await, Some(PortState::UpdateFailed));
	// Rows of the destroyed port are gone even though the slice failed
	assert_eq!(h.port_state(10).await, None);
	assert_eq!(h.store.mac_state(1, 10, mac).await, None);
	assert!(h.reconciler.ledger().is_empty());
}

#[tokio::test]
#[traced_test]
async fn macs_are_left_pending_when_synthesis_is_skipped() {
	let mut h = Harness::new();
	h.own_switch(DPID_A).await;
	h.own_switch(DPID_B).await;
	h.slice(1, SliceState::ReadyToUpdate).await;
	// No overlay network configured, so attaching fails and fails the slice
	h.port(overlay_port(10, DPID_A, 1, 100, PortState::ReadyToUpdate))
		.await;
	h.port(customer_port(20, DPID_B, 1, 3, 0, PortState::ReadyToUpdate))
		.await;

	let mac = "52:54:00:00:00:11".parse().unwrap();
	h.store
		.insert_mac(MacRow {
			slice_id: 1,
			port_id: 20,
			mac,
			state: MacState::ReadyToInstall,
		})
		.await;

	for _ in 0..3 {
		h.reconciler.tick().await;
		h.drain_events().await;
	}

	assert_eq!(h.transport.pending(), 0);
	assert_eq!(h.store.slice_state(1).await, Some(SliceState::UpdateFailed));
	assert_eq!(h.port_state(10).await, Some(PortState::UpdateFailed));
	// Never started, so picked up again by the next update of the slice
	assert_eq!(
		h.store.mac_state(1, 20, mac).await,
		Some(MacState::ReadyToInstall)
	);
	assert!(h.reconciler.ledger().is_empty());
}

#[tokio::test]
#[traced_test]
async fn unavailable_store_is_retried_next_pass() {
	let mut h = Harness::new();
	h.own_switch(DPID_A).await;
	h.slice(1, SliceState::ReadyToUpdate).await;
	h.port(customer_port(10, DPID_A, 1, 3, 0, PortState::ReadyToUpdate))
		.await;

	h.store.set_unavailable(true).await;
	h.reconciler.tick().await;

	assert!(h.reconciler.ledger().is_empty());
	assert_eq!(h.transport.pending(), 0);
	assert_eq!(h.store.slice_state(1).await, Some(SliceState::ReadyToUpdate));

	h.store.set_unavailable(false).await;
	h.reconciler.tick().await;

	assert_eq!(h.transport.pending(), 2);
	h.succeed_all().await;
	assert_eq!(h.store.slice_state(1).await, Some(SliceState::Confirmed));
}

#[tokio::test]
#[traced_test]
async fn outcome_is_kept_while_store_is_down() {
	let mut h = Harness::new();
	h.own_switch(DPID_A).await;
	h.slice(1, SliceState::ReadyToUpdate).await;
	h.port(customer_port(10, DPID_A, 1, 3, 0, PortState::ReadyToUpdate))
		.await;

	h.reconciler.tick().await;

	h.store.set_unavailable(true).await;
	h.succeed_all().await;

	// Persisting failed, the ledger still remembers the outcome
	assert!(h.reconciler.ledger().slice(1).unwrap().is_complete());
	assert_eq!(h.port_state(10).await, Some(PortState::Updating));

	h.store.set_unavailable(false).await;
	h.reconciler.tick().await;

	assert_eq!(h.transport.pending(), 0);
	assert_eq!(h.port_state(10).await, Some(PortState::Confirmed));
	assert_eq!(h.store.slice_state(1).await, Some(SliceState::Confirmed));
	assert!(h.reconciler.ledger().is_empty());
}

#[tokio::test]
#[traced_test]
async fn busy_transport_requeues_until_accepted() {
	let mut h = Harness::new();
	h.own_switch(DPID_A).await;
	h.slice(1, SliceState::ReadyToUpdate).await;
	h.port(customer_port(10, DPID_A, 1, 3, 0, PortState::ReadyToUpdate))
		.await;

	h.transport.set_busy(true);
	h.reconciler.tick().await;

	let key = PortKey::new(1, DPID_A);
	let port = h.reconciler.ledger().port(key).unwrap();
	assert_eq!(port.queued(), 2);
	assert_eq!(port.n_transactions(), 2);
	assert_eq!(h.transport.pending(), 0);

	h.transport.set_busy(false);
	h.reconciler.tick().await;

	assert_eq!(h.reconciler.ledger().port(key).unwrap().queued(), 0);
	assert_eq!(h.transport.pending(), 2);

	h.succeed_all().await;
	assert_eq!(h.port_state(10).await, Some(PortState::Confirmed));
}

#[tokio::test]
#[traced_test]
async fn switches_of_other_controllers_are_left_alone() {
	let mut h = Harness::new();
	h.store.add_switch(DPID_A, &other_identity()).await.unwrap();
	h.slice(1, SliceState::ReadyToUpdate).await;
	h.port(customer_port(10, DPID_A, 1, 3, 0, PortState::ReadyToUpdate))
		.await;

	h.reconciler.tick().await;

	assert_eq!(h.transport.pending(), 0);
	assert_eq!(h.port_state(10).await, Some(PortState::ReadyToUpdate));
	assert_eq!(h.store.slice_state(1).await, Some(SliceState::Updating));
}

#[tokio::test]
#[traced_test]
async fn ports_known_by_name_are_resolved() {
	let mut h = Harness::new();
	h.own_switch(DPID_A).await;
	h.store.add_port(DPID_A, 7, "eth1").await.unwrap();
	h.slice(1, SliceState::ReadyToUpdate).await;
	h.port(PortRow {
		port_name: Some("eth1".to_string()),
		..customer_port(10, DPID_A, 1, OFPP_NONE, 0, PortState::ReadyToUpdate)
	})
	.await;

	h.reconciler.tick().await;

	let messages = h.transport.messages();
	assert_eq!(messages.len(), 2);
	assert!(messages
		.iter()
		.all(|flow_mod| flow_mod.flow_match.in_port == Some(7)));

	h.succeed_all().await;
	assert_eq!(h.port_state(10).await, Some(PortState::Confirmed));
}

#[tokio::test]
#[traced_test]
async fn unresolvable_port_fails_the_switch() {
	let mut h = Harness::new();
	h.own_switch(DPID_A).await;
	h.slice(1, SliceState::ReadyToUpdate).await;
	h.port(PortRow {
		port_name: Some("eth9".to_string()),
		..customer_port(10, DPID_A, 1, OFPP_NONE, 0, PortState::ReadyToUpdate)
	})
	.await;

	h.reconciler.tick().await;

	assert_eq!(h.transport.pending(), 0);
	assert_eq!(h.port_state(10).await, Some(PortState::UpdateFailed));
	assert_eq!(h.store.slice_state(1).await, Some(SliceState::UpdateFailed));
}

#[tokio::test]
#[traced_test]
async fn vlan_ports_flood_to_each_other() {
	let mut h = Harness::new();
	h.own_switch(DPID_A).await;
	h.slice(1, SliceState::ReadyToUpdate).await;
	h.port(customer_port(10, DPID_A, 1, 3, 100, PortState::ReadyToUpdate))
		.await;
	h.port(customer_port(11, DPID_A, 1, 4, 0, PortState::Confirmed))
		.await;

	h.reconciler.tick().await;

	// Confirmed ports are reprogrammed along with the updated one
	let messages = h.transport.messages();
	assert_eq!(
		messages
			.iter()
			.filter(|flow_mod| flow_mod.table_id == CLASSIFIER_TABLE)
			.count(),
		2
	);

	h.succeed_all().await;
	assert_eq!(h.port_state(10).await, Some(PortState::Confirmed));
	assert_eq!(h.port_state(11).await, Some(PortState::Confirmed));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn run_loop_converges_and_stops() {
	let config = ReconcilerConfig {
		check_interval_ms: 100,
		..Default::default()
	};
	let h = Harness::with(config, MockAgent::always(200));
	h.own_switch(DPID_A).await;
	h.slice(1, SliceState::ReadyToUpdate).await;
	h.port(customer_port(10, DPID_A, 1, 3, 0, PortState::ReadyToUpdate))
		.await;

	let Harness {
		store,
		transport,
		reconciler,
		..
	} = h;

	let (stop_tx, stop_rx) = chan::bounded(1);
	let handle = tokio::spawn(reconciler.run(stop_rx));

	let mut confirmed = false;
	for _ in 0..50 {
		tokio::time::sleep(Duration::from_millis(50)).await;
		transport.succeed_all();
		if store.slice_state(1).await == Some(SliceState::Confirmed) {
			confirmed = true;
			break;
		}
	}
	assert!(confirmed);

	stop_tx.send(()).await.unwrap();
	handle.await.unwrap();
}
