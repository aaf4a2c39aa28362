// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use ipnet::{Ipv4Net, Ipv6Net};
use std::io;

/// Forwarding for one peer: every listed UDP port is forwarded to both
/// of the peer's networks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRule {
	pub ipv4: Ipv4Net,
	pub ipv6: Ipv6Net,
	pub ports: Vec<u16>,
}

/// Capability handle for the packet-filter chain and its address sets.
pub trait PacketFilter: Send + Sync {
	/// Creates the chain and the sets if they are missing. Idempotent.
	fn init(&self) -> io::Result<()>;

	/// Replaces chain rules and set memberships so the filter reflects
	/// exactly the given rules.
	fn resync(&self, rules: &[ForwardRule]) -> io::Result<()>;

	/// Installs forwarding for a single peer. Idempotent.
	fn add(&self, rule: &ForwardRule) -> io::Result<()>;

	/// Removes forwarding for a single peer. Removing an absent peer is
	/// not an error.
	fn remove(&self, rule: &ForwardRule) -> io::Result<()>;
}
