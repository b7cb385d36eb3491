//!
//! # OpenFlow flow programming model
//!
//! Value types for the OpenFlow 1.0 flow modification messages (with the Nicira register
//! extensions) that the reconciliation engine synthesizes and hands to the device transport.
//!
//! Encoding these values into wire bytes is the transport's business, this crate only
//! describes *what* gets programmed. [`FlowTable`] simulates a switch's flow tables with
//! strict match semantics, which is how we check that replaying a set of operations
//! converges to the same device state.
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

mod flow;
mod mac;
mod table;

pub use flow::{Action, FlowCommand, FlowMod, Match, VlanTci};
pub use mac::{MacAddress, MacAddressParseError};
pub use table::{FlowEntry, FlowTable};

/// Send the packet back out of the port it arrived on.
pub const OFPP_IN_PORT: u16 = 0xfff8;
/// Every physical port except the input one.
pub const OFPP_ALL: u16 = 0xfffc;
/// Not associated with a physical port.
pub const OFPP_NONE: u16 = 0xffff;

pub const OFP_DEFAULT_PRIORITY: u16 = 0x8000;
pub const BUFFER_ID_NONE: u32 = u32::MAX;

/// Highest VLAN id usable on the wire, `0x0fff` is reserved.
pub const VLAN_VID_MAX: u16 = 0x0fff;
/// The CFI bit, set in a TCI match when a VLAN header must be present.
pub const VLAN_CFI: u16 = 0x1000;

#[must_use]
pub const fn is_valid_vlan_id(vid: u16) -> bool {
	vid > 0 && vid < VLAN_VID_MAX
}
