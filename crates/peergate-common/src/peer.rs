// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::keys::{KeyError, PublicKey};
use ipnet::{Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A peer as served by the control API.
///
/// Fields are kept in their wire form; [`parse_peer`] produces the typed
/// view. `ports` lists the UDP ports forwarded to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
	pub ipv4: String,
	pub ipv6: String,
	#[serde(default)]
	pub ports: Vec<u16>,
	pub pubkey: String,
}

#[derive(Error, Debug)]
pub enum ParseError {
	#[error("invalid public key: {0}")]
	Key(#[from] KeyError),

	#[error("invalid network: {0}")]
	Network(#[from] ipnet::AddrParseError),
}

/// Parses a wire peer into its key and networks.
///
/// Networks are truncated to their network address, so `10.0.0.1/24`
/// compares equal to the `10.0.0.0/24` the kernel reports back. Returns a
/// single opaque error; callers drop the peer from whatever batch it
/// appeared in.
pub fn parse_peer(peer: &Peer) -> Result<(PublicKey, Ipv4Net, Ipv6Net), ParseError> {
	let key = PublicKey::from_base64(&peer.pubkey)?;
	let ipv4 = peer.ipv4.parse::<Ipv4Net>()?.trunc();
	let ipv6 = peer.ipv6.parse::<Ipv6Net>()?.trunc();
	Ok((key, ipv4, ipv6))
}
