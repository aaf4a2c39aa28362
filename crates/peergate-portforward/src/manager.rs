// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::filter::{ForwardRule, PacketFilter};
use peergate_common::{parse_peer, Peer};
use std::io;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum PortforwardError {
	#[error("error initializing packet filter: {0}")]
	Init(#[source] io::Error),
}

/// Translates roster peers into packet-filter state.
pub struct Portforward<F> {
	filter: F,
}

impl<F: PacketFilter> Portforward<F> {
	/// Prepares the chain and sets. Failure here is a startup error;
	/// everything after construction is logged and skipped instead.
	pub fn new(filter: F) -> Result<Self, PortforwardError> {
		filter.init().map_err(PortforwardError::Init)?;
		Ok(Self { filter })
	}

	/// Full resync: afterwards the filter reflects exactly the roster.
	pub fn update_portforwarding(&self, roster: &[Peer]) {
		let rules: Vec<ForwardRule> = roster.iter().filter_map(forward_rule).collect();
		if let Err(error) = self.filter.resync(&rules) {
			warn!(%error, "error updating port forwarding");
		}
	}

	/// Installs forwarding for a single peer.
	pub fn add_portforwarding(&self, peer: &Peer) {
		let Some(rule) = forward_rule(peer) else {
			return;
		};
		if let Err(error) = self.filter.add(&rule) {
			warn!(%error, "error adding port forwarding");
		}
	}

	/// Removes forwarding for a single peer.
	pub fn remove_portforwarding(&self, peer: &Peer) {
		let Some(rule) = forward_rule(peer) else {
			return;
		};
		if let Err(error) = self.filter.remove(&rule) {
			warn!(%error, "error removing port forwarding");
		}
	}
}

/// Peers that fail to parse or declare no ports produce no forwarding.
fn forward_rule(peer: &Peer) -> Option<ForwardRule> {
	if peer.ports.is_empty() {
		return None;
	}
	let (_, ipv4, ipv6) = parse_peer(peer).ok()?;
	Some(ForwardRule {
		ipv4,
		ipv6,
		ports: peer.ports.clone(),
	})
}
