//! Lifecycle states of slices, ports and MAC entries, and the edges the engine may take.
//!
//! Every state not reachable through an edge below is owned by operators: the engine never
//! moves a row into or out of it.

use int_enum::IntEnum;
use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize, IntEnum)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum SliceState {
	Confirmed = 0,
	PreparingToUpdate = 1,
	ReadyToUpdate = 2,
	Updating = 3,
	UpdateFailed = 4,
	PreparingToDestroy = 5,
	ReadyToDestroy = 6,
	Destroying = 7,
	DestroyFailed = 8,
	Destroyed = 9,
}

/// Ports share the slice lifecycle.
pub type PortState = SliceState;

impl SliceState {
	pub const ALL: [Self; 10] = [
		Self::Confirmed,
		Self::PreparingToUpdate,
		Self::ReadyToUpdate,
		Self::Updating,
		Self::UpdateFailed,
		Self::PreparingToDestroy,
		Self::ReadyToDestroy,
		Self::Destroying,
		Self::DestroyFailed,
		Self::Destroyed,
	];

	/// States a reconciliation pass has to look at.
	pub const PENDING: [Self; 4] = [
		Self::ReadyToUpdate,
		Self::Updating,
		Self::ReadyToDestroy,
		Self::Destroying,
	];

	pub const FAILED: [Self; 2] = [Self::UpdateFailed, Self::DestroyFailed];

	/// Ports whose flows must be present on the switch.
	pub const ACTIVE: [Self; 3] = [Self::Confirmed, Self::ReadyToUpdate, Self::Updating];

	/// Ports whose flows must be gone from the switch.
	pub const INACTIVE: [Self; 3] = [Self::ReadyToDestroy, Self::Destroying, Self::Destroyed];

	#[must_use]
	pub const fn can_transition_to(self, to: Self) -> bool {
		matches!(
			(self, to),
			(Self::ReadyToUpdate, Self::Updating)
				| (Self::Updating, Self::Confirmed | Self::UpdateFailed)
				| (Self::ReadyToDestroy, Self::Destroying)
				| (Self::Destroying, Self::Destroyed | Self::DestroyFailed)
		)
	}

	/// Final state of an in-progress row once its outstanding work finished.
	#[must_use]
	pub const fn settled(self, failed: bool) -> Option<Self> {
		match (self, failed) {
			(Self::Updating, false) => Some(Self::Confirmed),
			(Self::Updating, true) => Some(Self::UpdateFailed),
			(Self::Destroying, false) => Some(Self::Destroyed),
			(Self::Destroying, true) => Some(Self::DestroyFailed),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize, IntEnum)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum MacState {
	Installed = 0,
	ReadyToInstall = 1,
	Installing = 2,
	InstallFailed = 3,
	ReadyToDelete = 4,
	Deleting = 5,
	DeleteFailed = 6,
	Deleted = 7,
}

impl MacState {
	pub const ALL: [Self; 8] = [
		Self::Installed,
		Self::ReadyToInstall,
		Self::Installing,
		Self::InstallFailed,
		Self::ReadyToDelete,
		Self::Deleting,
		Self::DeleteFailed,
		Self::Deleted,
	];

	#[must_use]
	pub const fn can_transition_to(self, to: Self) -> bool {
		matches!(
			(self, to),
			(Self::ReadyToInstall, Self::Installing)
				| (Self::Installing, Self::Installed | Self::InstallFailed)
				| (Self::ReadyToDelete, Self::Deleting)
				| (Self::Deleting, Self::Deleted | Self::DeleteFailed)
		)
	}

	#[must_use]
	pub const fn settled(self, failed: bool) -> Option<Self> {
		match (self, failed) {
			(Self::Installing, false) => Some(Self::Installed),
			(Self::Installing, true) => Some(Self::InstallFailed),
			(Self::Deleting, false) => Some(Self::Deleted),
			(Self::Deleting, true) => Some(Self::DeleteFailed),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize, IntEnum)]
#[strum(serialize_all = "snake_case")]
#[repr(i32)]
pub enum PortType {
	Customer = 0,
	Overlay = 1,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn slice_edges_are_exactly_the_engine_ones() {
		use SliceState::{
			Confirmed, DestroyFailed, Destroyed, Destroying, ReadyToDestroy, ReadyToUpdate,
			UpdateFailed, Updating,
		};

		let legal = [
			(ReadyToUpdate, Updating),
			(Updating, Confirmed),
			(Updating, UpdateFailed),
			(ReadyToDestroy, Destroying),
			(Destroying, Destroyed),
			(Destroying, DestroyFailed),
		];

		for from in SliceState::ALL {
			for to in SliceState::ALL {
				assert_eq!(
					from.can_transition_to(to),
					legal.contains(&(from, to)),
					"{from} -> {to}"
				);
			}
		}
	}

	#[test]
	fn mac_edges_are_exactly_the_engine_ones() {
		use MacState::{
			DeleteFailed, Deleted, Deleting, InstallFailed, Installed, Installing, ReadyToDelete,
			ReadyToInstall,
		};

		let legal = [
			(ReadyToInstall, Installing),
			(Installing, Installed),
			(Installing, InstallFailed),
			(ReadyToDelete, Deleting),
			(Deleting, Deleted),
			(Deleting, DeleteFailed),
		];

		for from in MacState::ALL {
			for to in MacState::ALL {
				assert_eq!(
					from.can_transition_to(to),
					legal.contains(&(from, to)),
					"{from} -> {to}"
				);
			}
		}
	}

	#[test]
	fn settled_states_are_legal_edges() {
		for failed in [false, true] {
			for from in SliceState::ALL {
				if let Some(to) = from.settled(failed) {
					assert!(from.can_transition_to(to));
				}
			}
			for from in MacState::ALL {
				if let Some(to) = from.settled(failed) {
					assert!(from.can_transition_to(to));
				}
			}
		}
	}

	#[test]
	fn persisted_discriminants() {
		assert_eq!(i32::from(SliceState::Confirmed), 0);
		assert_eq!(i32::from(SliceState::Destroyed), 9);
		assert_eq!(SliceState::try_from(3).ok(), Some(SliceState::Updating));
		assert!(SliceState::try_from(10).is_err());
		assert_eq!(MacState::try_from(5).ok(), Some(MacState::Deleting));
		assert_eq!(PortType::try_from(1).ok(), Some(PortType::Overlay));
	}
}
