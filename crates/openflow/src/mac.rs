use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

const MAC_MASK: u64 = 0xffff_ffff_ffff;

#[derive(Debug, thiserror::Error)]
#[error("invalid mac address: <input='{0}'>")]
pub struct MacAddressParseError(String);

/// A 48 bits ethernet address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
	#[must_use]
	pub const fn new(octets: [u8; 6]) -> Self {
		Self(octets)
	}

	#[must_use]
	pub const fn octets(&self) -> [u8; 6] {
		self.0
	}

	#[must_use]
	pub fn to_u64(self) -> u64 {
		self.0
			.iter()
			.fold(0, |acc, octet| (acc << 8) | u64::from(*octet))
	}
}

impl From<u64> for MacAddress {
	fn from(value: u64) -> Self {
		let bytes = (value & MAC_MASK).to_be_bytes();
		let mut octets = [0; 6];
		octets.copy_from_slice(&bytes[2..]);
		Self(octets)
	}
}

impl From<MacAddress> for u64 {
	fn from(mac: MacAddress) -> Self {
		mac.to_u64()
	}
}

impl fmt::Display for MacAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let [a, b, c, d, e, g] = self.0;
		write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
	}
}

impl FromStr for MacAddress {
	type Err = MacAddressParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut octets = [0; 6];
		let mut parts = s.split(':');

		for octet in &mut octets {
			*octet = parts
				.next()
				.filter(|part| part.len() == 2)
				.and_then(|part| u8::from_str_radix(part, 16).ok())
				.ok_or_else(|| MacAddressParseError(s.to_string()))?;
		}

		if parts.next().is_some() {
			return Err(MacAddressParseError(s.to_string()));
		}

		Ok(Self(octets))
	}
}

impl From<MacAddress> for String {
	fn from(mac: MacAddress) -> Self {
		mac.to_string()
	}
}

impl TryFrom<String> for MacAddress {
	type Error = MacAddressParseError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}
