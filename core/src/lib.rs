//!
//! # Virtual network manager core
//!
//! Keeps a fleet of OpenFlow switches consistent with the desired state of slices (virtual L2
//! networks), the switch ports attached to them and the MAC addresses pinned inside them.
//!
//! The [`Reconciler`] periodically reads pending work from a [`Store`], turns it into flow
//! programming operations handed to a [`Transport`], and tracks their completion in a
//! [`Ledger`] until the outcome can be written back.
//!

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use std::fmt;

pub mod config;
pub mod error;
pub mod event;
pub mod infra;
pub mod ledger;
pub mod logging;
pub mod overlay;
pub mod reconciler;
pub mod registry;
pub mod state;
pub mod store;
pub mod synthesis;
pub mod transport;

pub use config::{ControllerIdentity, ReconcilerConfig};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use reconciler::Reconciler;
pub use store::Store;
pub use transport::{DeviceTransaction, Transport};

/// Virtual network identifier of a slice, 24 bits wide.
pub type SliceId = u32;
pub type DatapathId = u64;
/// Row id of a slice port.
pub type PortId = u32;

/// Displays a datapath id the way switches report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dpid(pub DatapathId);

impl fmt::Display for Dpid {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:#018x}", self.0)
	}
}
