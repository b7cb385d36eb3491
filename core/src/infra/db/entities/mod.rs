//! Database entities

pub mod agent;
pub mod mac_address;
pub mod overlay_network;
pub mod port;
pub mod reflector;
pub mod slice;
pub mod switch;
pub mod switch_port;
pub mod tunnel_endpoint;
